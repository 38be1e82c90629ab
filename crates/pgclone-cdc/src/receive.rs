//! CDC receiver (spec.md §4.7): streams logical-decoding messages from a
//! named slot to JSON segment files, one file per source WAL segment,
//! reporting write/flush positions back to the source on a heartbeat so it
//! can recycle WAL, and stopping at `endpos` on a commit boundary so a
//! partial transaction is never emitted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use pgclone_catalog::CatalogSet;
use pgclone_common::retry::Backoff;
use pgclone_common::{CancelToken, Error, Lsn};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::model::{Action, ChangeEvent};
use crate::plugin::{DecodePlugin, PgoutputPlugin, Wal2jsonPlugin};

/// WAL segments are 16MiB by default; the segment file name embeds the
/// timeline id and the high/low 32 bits of the segment number, matching
/// Postgres's own `%08X%08X%08X` naming (`pg_walfile_name`).
const WAL_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;

pub fn wal_segment_name(timeline: u32, lsn: Lsn) -> String {
    let segno = lsn.0 / WAL_SEGMENT_SIZE;
    let log = segno >> 32;
    let seg = segno & 0xFFFF_FFFF;
    format!("{timeline:08X}{log:08X}{seg:08X}")
}

#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    pub plugin: String,
    pub slot_name: String,
    pub timeline: u32,
    pub heartbeat_interval: Duration,
    pub segment_dir: PathBuf,
    pub startpos: Option<Lsn>,
    pub endpos: Option<Lsn>,
}

fn make_plugin(name: &str) -> Box<dyn DecodePlugin> {
    match name {
        "wal2json" => Box::new(Wal2jsonPlugin::new()),
        _ => Box::new(PgoutputPlugin::new()),
    }
}

/// Creates the replication slot atomically alongside a transaction snapshot,
/// per spec.md §4.7: "created atomically with the exported snapshot when
/// `--follow` is used." Returns the slot's consistent point LSN, used as the
/// implicit `startpos` when none is given explicitly.
pub async fn create_slot(replication_uri: &str, opts: &ReceiveOptions) -> Result<Lsn, Error> {
    let client = pgclone_pgutil::conn::connect_replication(replication_uri).await?;
    let query = format!(
        "CREATE_REPLICATION_SLOT {} LOGICAL {}",
        quote_ident(&opts.slot_name),
        opts.plugin
    );
    let rows = client
        .simple_query(&query)
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("creating replication slot: {e}")))?;
    for row in rows {
        if let tokio_postgres::SimpleQueryMessage::Row(row) = row {
            if let Some(lsn_text) = row.get("consistent_point") {
                return Lsn::parse(lsn_text);
            }
        }
    }
    Err(Error::Other(anyhow::anyhow!(
        "CREATE_REPLICATION_SLOT did not return a consistent point"
    )))
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Drops the replication slot, per `stream cleanup` (spec.md §6). Idempotent:
/// a slot that no longer exists is not an error, since cleanup may run twice
/// after a partially-completed teardown.
pub async fn drop_slot(replication_uri: &str, slot_name: &str) -> Result<(), Error> {
    let client = pgclone_pgutil::conn::connect_replication(replication_uri).await?;
    let query = format!("DROP_REPLICATION_SLOT {}", quote_ident(slot_name));
    match client.simple_query(&query).await {
        Ok(_) => Ok(()),
        Err(e) if e.to_string().contains("does not exist") => Ok(()),
        Err(e) => Err(Error::Other(anyhow::anyhow!("dropping replication slot {slot_name}: {e}"))),
    }
}

/// Runs the receiver until `endpos` is reached or cancellation, reconnecting
/// with backoff on `ReplicationDisconnected` (spec.md §7). Writes JSON lines
/// into `{segment_dir}/{wal_segment}.json`, one line per decoded message.
pub async fn run(
    replication_uri: &str,
    catalogs: &CatalogSet,
    opts: &ReceiveOptions,
    cancel: &CancelToken,
) -> Result<(), Error> {
    let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30), 10);
    loop {
        match run_once(replication_uri, catalogs, opts, cancel).await {
            Ok(()) => return Ok(()),
            Err(Error::EndposReached) => return Ok(()),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => {
                let Some(delay) = backoff.next_delay() else {
                    return Err(Error::ReplicationDisconnected(anyhow::anyhow!(err)));
                };
                warn!(%err, attempt = backoff.attempt(), "replication connection lost, reconnecting");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn run_once(
    replication_uri: &str,
    catalogs: &CatalogSet,
    opts: &ReceiveOptions,
    cancel: &CancelToken,
) -> Result<(), Error> {
    let client = pgclone_pgutil::conn::connect_replication(replication_uri).await?;
    let sentinel = catalogs.target.read_sentinel()?;
    let startpos = opts
        .startpos
        .or_else(|| sentinel.startpos.map(Lsn))
        .unwrap_or(Lsn::ZERO);
    let endpos = opts.endpos.or_else(|| sentinel.endpos.map(Lsn));

    let query = format!(
        "START_REPLICATION SLOT {} LOGICAL {}",
        quote_ident(&opts.slot_name),
        startpos
    );
    let duplex_stream = client
        .copy_both_simple::<Bytes>(&query)
        .await
        .map_err(|e| Error::ReplicationDisconnected(anyhow::anyhow!(e)))?;
    let mut duplex = std::pin::pin!(duplex_stream);

    let mut plugin = make_plugin(&opts.plugin);
    let mut write_lsn = startpos;
    let mut flush_lsn = startpos;
    let mut current_segment: Option<(String, tokio::fs::File)> = None;
    let mut last_heartbeat = tokio::time::Instant::now();

    loop {
        if cancel.is_terminating() {
            return Err(Error::Cancelled);
        }
        let tick = tokio::time::sleep_until(last_heartbeat + opts.heartbeat_interval);
        tokio::select! {
            msg = duplex.next() => {
                let Some(msg) = msg else {
                    return Err(Error::ReplicationDisconnected(anyhow::anyhow!("replication stream ended")));
                };
                let msg = msg.map_err(|e| Error::ReplicationDisconnected(anyhow::anyhow!(e)))?;
                if let Some(reached) = handle_copy_data(
                    &msg,
                    opts,
                    &mut plugin,
                    &mut write_lsn,
                    &mut current_segment,
                    endpos,
                ).await? {
                    flush_lsn = reached;
                    catalogs.target.update_sentinel(|s| {
                        s.write_lsn = s.write_lsn.max(write_lsn.0);
                        s.flush_lsn = s.flush_lsn.max(flush_lsn.0);
                        s.replay_lsn = s.replay_lsn.max(flush_lsn.0);
                    })?;
                    return Err(Error::EndposReached);
                }
            }
            _ = tick => {
                send_status_update(&mut duplex, write_lsn, flush_lsn, flush_lsn).await?;
                last_heartbeat = tokio::time::Instant::now();
                catalogs.target.update_sentinel(|s| {
                    s.write_lsn = s.write_lsn.max(write_lsn.0);
                    s.flush_lsn = s.flush_lsn.max(flush_lsn.0);
                })?;
            }
        }
    }
}

/// Processes one CopyData frame. Returns `Some(lsn)` once a Commit at or
/// beyond `endpos` has been fully written, signaling the caller to stop --
/// spec.md §4.7: "endpos is not aware of transaction boundaries, so partial
/// transactions are never emitted," i.e. we only ever stop right after a
/// Commit, never mid-transaction.
async fn handle_copy_data(
    frame: &Bytes,
    opts: &ReceiveOptions,
    plugin: &mut Box<dyn DecodePlugin>,
    write_lsn: &mut Lsn,
    current_segment: &mut Option<(String, tokio::fs::File)>,
    endpos: Option<Lsn>,
) -> Result<Option<Lsn>, Error> {
    let Some(&tag) = frame.first() else {
        return Ok(None);
    };
    match tag {
        b'w' => {
            if frame.len() < 25 {
                return Ok(None);
            }
            let start_lsn = u64::from_be_bytes(frame[1..9].try_into().unwrap());
            let payload = &frame[25..];
            *write_lsn = Lsn(start_lsn.max(write_lsn.0));

            let events = plugin
                .decode_message(payload)
                .map_err(|e| Error::Other(anyhow::anyhow!("decoding replication message: {e}")))?;

            for mut event in events {
                if event.lsn == 0 {
                    event.lsn = start_lsn;
                }
                append_event(opts, current_segment, &event).await?;
                if event.action == Action::Commit && endpos.is_some_and(|e| Lsn(event.lsn) >= e) {
                    close_segment(current_segment).await?;
                    return Ok(Some(Lsn(event.lsn)));
                }
            }
            Ok(None)
        }
        b'k' => Ok(None),
        _ => Ok(None),
    }
}

async fn append_event(
    opts: &ReceiveOptions,
    current_segment: &mut Option<(String, tokio::fs::File)>,
    event: &ChangeEvent,
) -> Result<(), Error> {
    let segment_name = wal_segment_name(opts.timeline, Lsn(event.lsn));
    if current_segment.as_ref().map(|(n, _)| n.as_str()) != Some(segment_name.as_str()) {
        close_segment(current_segment).await?;
        let path = segment_path(&opts.segment_dir, &segment_name);
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("opening segment {path:?}: {e}")))?;
        *current_segment = Some((segment_name, file));
    }
    let (_, file) = current_segment.as_mut().unwrap();
    let mut line = serde_json::to_vec(event)
        .map_err(|e| Error::Other(anyhow::anyhow!("serializing CDC event: {e}")))?;
    line.push(b'\n');
    file.write_all(&line)
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("writing CDC segment: {e}")))?;
    Ok(())
}

async fn close_segment(current_segment: &mut Option<(String, tokio::fs::File)>) -> Result<(), Error> {
    if let Some((_, mut file)) = current_segment.take() {
        file.flush()
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("flushing CDC segment: {e}")))?;
    }
    Ok(())
}

pub fn segment_path(dir: &Path, wal_segment: &str) -> PathBuf {
    dir.join(format!("{wal_segment}.json"))
}

async fn send_status_update(
    duplex: &mut (impl futures::Sink<Bytes, Error = tokio_postgres::Error> + Unpin),
    write_lsn: Lsn,
    flush_lsn: Lsn,
    apply_lsn: Lsn,
) -> Result<(), Error> {
    let mut buf = BytesMut::with_capacity(34);
    buf.extend_from_slice(b"r");
    buf.extend_from_slice(&write_lsn.0.to_be_bytes());
    buf.extend_from_slice(&flush_lsn.0.to_be_bytes());
    buf.extend_from_slice(&apply_lsn.0.to_be_bytes());
    buf.extend_from_slice(&0i64.to_be_bytes()); // client system clock, informational only
    buf.extend_from_slice(&[0u8]); // reply requested = false
    duplex
        .send(buf.freeze())
        .await
        .map_err(|e| Error::ReplicationDisconnected(anyhow::anyhow!(e)))?;
    info!(%write_lsn, %flush_lsn, "sent standby status update");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_name_is_stable_within_one_16mb_window() {
        let a = wal_segment_name(1, Lsn(0x1000_0000));
        let b = wal_segment_name(1, Lsn(0x1000_0000 + 100));
        assert_eq!(a, b);
    }

    #[test]
    fn segment_name_changes_across_a_16mb_boundary() {
        let a = wal_segment_name(1, Lsn(0));
        let b = wal_segment_name(1, Lsn(WAL_SEGMENT_SIZE));
        assert_ne!(a, b);
    }
}
