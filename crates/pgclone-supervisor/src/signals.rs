//! Operator signal handling (spec.md §4.1): the first SIGINT/SIGTERM moves
//! every worker into a graceful drain, finishing whatever chunk or work item
//! is in flight; a second one escalates to immediate termination.

use pgclone_common::{CancelHandle, CancelState};
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

pub fn install(handle: CancelHandle) {
    tokio::spawn(async move {
        let (mut int, mut term) = match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(i), Ok(t)) => (i, t),
            _ => return,
        };
        loop {
            tokio::select! {
                _ = int.recv() => {}
                _ = term.recv() => {}
            }
            if handle.state() == CancelState::Running {
                info!("received interrupt, draining workers before exit");
                handle.drain();
            } else {
                info!("received second interrupt, terminating immediately");
                handle.terminate();
                break;
            }
        }
    });
}
