use tokio::sync::oneshot;
use tracing::{info, warn};

use pgclone_common::{CancelToken, Error};

use crate::conn;

/// Owns the one long-lived source connection that exports a transaction
/// snapshot and keeps its enclosing transaction open for the lifetime of the
/// base copy (spec.md §4.11). Every other source-side reader imports
/// `snapshot_id()` as the first statement of its own connection.
pub struct SnapshotHolder {
    snapshot_id: String,
    stop_tx: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<Result<(), Error>>,
}

impl SnapshotHolder {
    /// Exports a new snapshot and keeps the holder alive until `stop()` is
    /// called or `cancel` is signaled.
    pub async fn open(source_uri: &str, cancel: CancelToken) -> Result<Self, Error> {
        let client = conn::connect(source_uri).await?;
        client
            .batch_execute("BEGIN ISOLATION LEVEL REPEATABLE READ")
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("BEGIN for snapshot export: {e}")))?;
        let row = client
            .query_one("SELECT pg_export_snapshot()", &[])
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("pg_export_snapshot(): {e}")))?;
        let snapshot_id: String = row.get(0);
        info!(%snapshot_id, "exported source snapshot");

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let mut cancel = cancel;
        let held_id = snapshot_id.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = cancel.changed() => {
                        if cancel.is_terminating() {
                            break;
                        }
                    }
                }
            }
            // Rolling back (rather than committing) releases every lock the
            // snapshot-holding transaction took without otherwise mutating
            // source state.
            if let Err(err) = client.batch_execute("ROLLBACK").await {
                warn!(%err, snapshot_id = %held_id, "snapshot holder connection closed uncleanly");
            }
            Ok(())
        });

        Ok(SnapshotHolder {
            snapshot_id,
            stop_tx: Some(stop_tx),
            task,
        })
    }

    pub fn snapshot_id(&self) -> &str {
        &self.snapshot_id
    }

    /// Releases the snapshot. Any reader that later tries to import it will
    /// observe `SnapshotLost`.
    pub async fn stop(mut self) -> Result<(), Error> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.task
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("snapshot holder task panicked: {e}")))?
    }
}
