use std::fmt;

/// The error taxonomy from the design doc, kept as a flat enum rather than
/// per-crate hierarchies so the supervisor can classify any worker's failure
/// without downcasting.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("working directory does not match the requested run: {0}")]
    ConfigMismatch(String),

    #[error("snapshot-holding transaction has ended, resume requires --not-consistent: {0}")]
    SnapshotLost(String),

    #[error("streaming COPY aborted after {attempts} attempt(s): {source}")]
    CopyAborted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("constraint promotion conflicts with an existing target constraint: {0}")]
    ConstraintPromotionConflict(String),

    #[error("replication connection lost: {0}")]
    ReplicationDisconnected(anyhow::Error),

    #[error("apply failed executing a CDC batch, target may have diverged: {0}")]
    ApplyConflict(anyhow::Error),

    #[error("reached requested end LSN")]
    EndposReached,

    #[error("cancelled by operator")]
    Cancelled,

    #[error("a worker exited non-zero: {0}")]
    WorkerCrashed(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether the supervisor should treat this as fatal for the whole run
    /// (as opposed to marking one work item `failed` and continuing).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigMismatch(_)
                | Error::SnapshotLost(_)
                | Error::ReplicationDisconnected(_)
                | Error::ApplyConflict(_)
                | Error::Cancelled
                | Error::WorkerCrashed(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog store error: {0}")]
    Store(#[from] sled::Error),

    #[error("failed to (de)serialize catalog row: {0}")]
    Codec(#[from] Box<bincode::ErrorKind>),

    #[error("no such row for key {0}")]
    NotFound(String),

    #[error("setup row already exists and disagrees with this run")]
    SetupMismatch,
}

/// A thin helper to make it obvious in logs which work item an error belongs
/// to without threading a new type through every leaf error.
pub struct Context(pub String);

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
