//! Connection plumbing shared by every worker that talks to source or
//! target: plain connections, pooled connections, replication-mode
//! connections, and the snapshot holder.

pub mod conn;
pub mod pool;
pub mod snapshot;

pub use snapshot::SnapshotHolder;
