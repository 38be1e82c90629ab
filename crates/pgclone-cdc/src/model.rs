//! The internal CDC JSON shape (spec.md §6): one JSON object per line,
//! required keys `{action, xid, lsn, nextlsn?, schema?, table?, columns?}`.
//! Both supported output-plugin dialects (`pgoutput`, `wal2json`) are
//! translated into this shape at receive time so the transformer never sees
//! plugin-specific framing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "B")]
    Begin,
    #[serde(rename = "C")]
    Commit,
    #[serde(rename = "I")]
    Insert,
    #[serde(rename = "U")]
    Update,
    #[serde(rename = "D")]
    Delete,
    #[serde(rename = "T")]
    Truncate,
    #[serde(rename = "M")]
    Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub action: Action,
    pub xid: u32,
    pub lsn: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nextlsn: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<serde_json::Map<String, Value>>,
    /// Only populated for `Update`/`Delete` on a table with `REPLICA
    /// IDENTITY FULL` or a primary key, naming the row being changed; used
    /// by the transformer to build the `WHERE` clause.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_columns: Option<serde_json::Map<String, Value>>,
}

impl ChangeEvent {
    pub fn begin(xid: u32, lsn: u64) -> Self {
        ChangeEvent {
            action: Action::Begin,
            xid,
            lsn,
            nextlsn: None,
            schema: None,
            table: None,
            columns: None,
            key_columns: None,
        }
    }

    pub fn commit(xid: u32, lsn: u64, nextlsn: u64) -> Self {
        ChangeEvent {
            action: Action::Commit,
            xid,
            lsn,
            nextlsn: Some(nextlsn),
            schema: None,
            table: None,
            columns: None,
            key_columns: None,
        }
    }
}
