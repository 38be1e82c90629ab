use tokio::sync::watch;

/// Graceful-drain / immediate-terminate state shared by every worker task.
///
/// Spec behavior (ambient, not product-visible): the first interrupt moves
/// `Draining`, which workers observe at their next suspension point (a
/// queue dequeue, a byte-pipe read, a progress write, a bulk-transfer chunk
/// boundary) and use to finish the current chunk and exit; the second
/// interrupt moves to `Terminate`, which is checked more tightly inside
/// chunk loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelState {
    Running,
    Draining,
    Terminate,
}

#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<CancelState>,
}

#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<CancelState>,
}

pub fn channel() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(CancelState::Running);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    /// First signal: request a graceful drain.
    pub fn drain(&self) {
        let _ = self.tx.send_if_modified(|s| {
            if *s == CancelState::Running {
                *s = CancelState::Draining;
                true
            } else {
                false
            }
        });
    }

    /// Second signal, or a fail-fast propagation from a crashed sibling.
    pub fn terminate(&self) {
        let _ = self.tx.send(CancelState::Terminate);
    }

    pub fn state(&self) -> CancelState {
        *self.tx.borrow()
    }
}

impl CancelToken {
    pub fn state(&self) -> CancelState {
        *self.rx.borrow()
    }

    pub fn is_draining(&self) -> bool {
        !matches!(self.state(), CancelState::Running)
    }

    pub fn is_terminating(&self) -> bool {
        matches!(self.state(), CancelState::Terminate)
    }

    /// Awaits the next state change; used by the supervisor's select-loop
    /// over worker completions and cancellation.
    pub async fn changed(&mut self) {
        let _ = self.rx.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_then_terminate_escalates() {
        let (handle, token) = channel();
        assert_eq!(token.state(), CancelState::Running);
        handle.drain();
        assert_eq!(token.state(), CancelState::Draining);
        handle.drain();
        assert_eq!(
            token.state(),
            CancelState::Draining,
            "a second drain() call must not regress an already-terminating state, \
             but also must not un-drain"
        );
        handle.terminate();
        assert_eq!(token.state(), CancelState::Terminate);
    }
}
