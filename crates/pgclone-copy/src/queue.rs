//! The queue feeder named in spec.md §4.1: a shared, ordered work list that
//! table-copy workers dequeue from. Modeled as a `tokio::sync::Mutex`-guarded
//! `VecDeque` rather than an mpsc channel so the supervisor can inspect
//! remaining depth for the summary report without consuming an item.

use std::collections::VecDeque;

use tokio::sync::Mutex;

pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> WorkQueue<T> {
    /// Builds a queue already ordered by the caller; the table-copy feeder
    /// orders tables by descending estimated row count before calling this
    /// (spec.md §4.1: "minimizes the long-pole runtime").
    pub fn new(items: Vec<T>) -> Self {
        WorkQueue {
            items: Mutex::new(items.into()),
        }
    }

    pub async fn pop(&self) -> Option<T> {
        self.items.lock().await.pop_front()
    }

    pub async fn push(&self, item: T) {
        self.items.lock().await.push_back(item);
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pop_returns_items_in_push_order() {
        let queue = WorkQueue::new(vec![1, 2, 3]);
        assert_eq!(queue.pop().await, Some(1));
        queue.push(4).await;
        assert_eq!(queue.pop().await, Some(2));
        assert_eq!(queue.pop().await, Some(3));
        assert_eq!(queue.pop().await, Some(4));
        assert_eq!(queue.pop().await, None);
    }
}
