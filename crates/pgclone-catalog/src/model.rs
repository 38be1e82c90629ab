use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row describing the current run. Written once; read at every start to
/// detect mismatch with a previous interrupted run (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Setup {
    pub source_endpoint_id: String,
    pub target_endpoint_id: String,
    pub snapshot_id: String,
    pub cdc_plugin: String,
    pub slot_name: String,
    pub split_threshold_bytes: Option<u64>,
    pub filter_fingerprint: String,
}

/// Identity (stable OID + qualified name) for a schema object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(pub u32);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub schema: String,
    pub name: String,
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A candidate split key for same-table partitioning: either a unique,
/// NOT-NULL, non-deferrable integer column, or the physical row locator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SplitKey {
    IntegerColumn(String),
    PhysicalLocator,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Table {
    pub oid: Oid,
    pub name: QualifiedName,
    pub estimated_rows: u64,
    pub size_bytes: u64,
    pub split_key: SplitKey,
    pub part_ids: Vec<String>,
    pub restore_list_name: String,
}

/// A half-open range `[lo, hi)` over either an integer key or a physical
/// page locator. Invariant 1 (spec.md §3): disjoint across all parts of a
/// table, union covers the whole domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PartRange {
    IntegerRange { lo: i64, hi: i64 },
    PageRange { lo_block: i64, hi_block: i64 },
    WholeTable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TablePart {
    pub id: String,
    pub table_oid: Oid,
    pub range: PartRange,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Index {
    pub oid: Oid,
    pub table_oid: Oid,
    pub name: String,
    pub definition: String,
    pub constraint: Option<Constraint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Constraint {
    pub name: String,
    pub alter_table_sql: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sequence {
    pub oid: Oid,
    pub name: QualifiedName,
    pub last_value: i64,
    pub is_called: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LargeObject {
    pub oid: Oid,
    pub chunk_cursor: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProgressState {
    Queued,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub work_item_id: String,
    pub state: ProgressState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub bytes_transferred: u64,
    pub last_error: Option<String>,
}

impl Progress {
    pub fn queued(work_item_id: impl Into<String>) -> Self {
        Progress {
            work_item_id: work_item_id.into(),
            state: ProgressState::Queued,
            started_at: None,
            finished_at: None,
            bytes_transferred: 0,
            last_error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = ProgressState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_done(&mut self, bytes_transferred: u64) {
        self.state = ProgressState::Done;
        self.finished_at = Some(Utc::now());
        self.bytes_transferred = bytes_transferred;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.state = ProgressState::Failed;
        self.finished_at = Some(Utc::now());
        self.last_error = Some(error.into());
    }
}

/// Apply-side mode toggle, remote-controlled from the sentinel row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ApplyMode {
    Prefetch,
    Apply,
}

/// The single-row remote control table for the CDC pipeline (spec.md §3,
/// §4.10). `startpos`/`endpos` are textual LSNs (`%X/%X`) because `endpos`
/// may be unset ("run forever") or set to the literal "current source WAL
/// position" at the moment `stream sentinel set endpos --current` runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sentinel {
    pub startpos: Option<u64>,
    pub endpos: Option<u64>,
    pub apply: ApplyMode,
    pub write_lsn: u64,
    pub flush_lsn: u64,
    pub replay_lsn: u64,
}

impl Default for Sentinel {
    fn default() -> Self {
        Sentinel {
            startpos: None,
            endpos: None,
            apply: ApplyMode::Prefetch,
            write_lsn: 0,
            flush_lsn: 0,
            replay_lsn: 0,
        }
    }
}

impl Sentinel {
    /// Invariant 4 (spec.md §3): `replay_lsn <= flush_lsn <= write_lsn`.
    pub fn is_consistent(&self) -> bool {
        self.replay_lsn <= self.flush_lsn && self.flush_lsn <= self.write_lsn
    }
}

/// One source WAL segment's worth of decoded transactions, and the SQL file
/// derived from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CdcSegment {
    pub wal_segment: String,
    pub json_path: String,
    pub sql_path: Option<String>,
    pub closed: bool,
}
