//! Wires the CDC receiver, transformer, and apply worker together for
//! `--follow`/`stream replay` (spec.md §4.7-§4.9): the receiver writes one
//! JSON segment file per source WAL segment; this loop picks up each
//! segment once the receiver has moved on to the next one (meaning the
//! prior one is closed and will never be appended to again), transforms it
//! to a SQL batch, and applies that batch against the target inside one
//! origin-tracked session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pgclone_catalog::{CatalogSet, CdcSegment};
use pgclone_common::{CancelHandle, CancelToken, Error};
use pgclone_pgutil::conn;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub struct FollowOptions {
    pub replication_uri: String,
    pub target_uri: String,
    pub segment_dir: PathBuf,
    pub origin_name: String,
    pub receive: pgclone_cdc::receive::ReceiveOptions,
}

/// Runs the receiver and the transform-apply loop side by side until
/// `endpos` is reached or cancellation. Mirrors the supervisor's fail-fast
/// policy: either task ending in error stops both (the receiver on
/// `EndposReached`/`Cancelled` returns `Ok`/`Err(Cancelled)` respectively,
/// which the caller treats the same way as the copy-phase worker pools).
pub async fn run(catalogs: Arc<CatalogSet>, opts: FollowOptions, cancel: CancelToken) -> Result<(), Error> {
    tokio::fs::create_dir_all(&opts.segment_dir)
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("creating segment dir {:?}: {e}", opts.segment_dir)))?;

    let mut tasks = JoinSet::new();

    {
        let catalogs = Arc::clone(&catalogs);
        let receive_opts = opts.receive.clone();
        let replication_uri = opts.replication_uri.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            pgclone_cdc::receive::run(&replication_uri, &catalogs, &receive_opts, &cancel).await
        });
    }

    {
        let catalogs = Arc::clone(&catalogs);
        let segment_dir = opts.segment_dir.clone();
        let target_uri = opts.target_uri.clone();
        let origin_name = opts.origin_name.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move { apply_loop(catalogs, segment_dir, target_uri, origin_name, cancel, false).await });
    }

    join_all(tasks).await
}

/// `stream catchup` (spec.md §6): runs receive+transform+apply together in
/// prefetch mode -- file-by-file, no live pipe -- until the on-disk backlog
/// is fully drained, then self-drains so both tasks exit cleanly instead of
/// running forever the way [`run`] does for `follow`/`stream replay`.
pub async fn run_catchup(
    catalogs: Arc<CatalogSet>,
    opts: FollowOptions,
    cancel_handle: CancelHandle,
    cancel: CancelToken,
) -> Result<(), Error> {
    tokio::fs::create_dir_all(&opts.segment_dir)
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("creating segment dir {:?}: {e}", opts.segment_dir)))?;

    let mut tasks = JoinSet::new();

    {
        let catalogs = Arc::clone(&catalogs);
        let receive_opts = opts.receive.clone();
        let replication_uri = opts.replication_uri.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            pgclone_cdc::receive::run(&replication_uri, &catalogs, &receive_opts, &cancel).await
        });
    }

    {
        let catalogs = Arc::clone(&catalogs);
        let segment_dir = opts.segment_dir.clone();
        let target_uri = opts.target_uri.clone();
        let origin_name = opts.origin_name.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let result = apply_loop(catalogs, segment_dir, target_uri, origin_name, cancel, true).await;
            // Caught up: tell the receiver (and ourselves, on the next loop
            // iteration, moot since we're about to return) to drain too.
            cancel_handle.drain();
            result
        });
    }

    join_all(tasks).await
}

async fn join_all(mut tasks: JoinSet<Result<(), Error>>) -> Result<(), Error> {
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(%err, "follow task ended with an error");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
            Err(join_err) => {
                if first_error.is_none() {
                    first_error = Some(Error::WorkerCrashed(join_err.to_string()));
                }
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Polls `segment_dir` for files the receiver has finished writing and
/// feeds each through transform-then-apply in WAL order, recording a
/// `CdcSegment` row per processed file so a restart skips what's already
/// applied (the replication origin also guards this at the transaction
/// level, per spec.md §4.9).
async fn apply_loop(
    catalogs: Arc<CatalogSet>,
    segment_dir: PathBuf,
    target_uri: String,
    origin_name: String,
    cancel: CancelToken,
    stop_when_caught_up: bool,
) -> Result<(), Error> {
    let client = conn::connect(&target_uri).await?;
    let mut origin_progress = pgclone_cdc::apply::setup_origin(&client, &origin_name).await?;

    loop {
        if cancel.is_terminating() {
            return Err(Error::Cancelled);
        }
        let pending = pending_segments(&catalogs, &segment_dir).await?;
        if pending.is_empty() {
            if cancel.is_draining() || stop_when_caught_up {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            continue;
        }
        for (wal_segment, json_path) in pending {
            let sql_path = json_path.with_extension("sql");
            pgclone_cdc::transform::transform_file(&json_path, &sql_path).await?;
            let sql = tokio::fs::read_to_string(&sql_path)
                .await
                .map_err(|e| Error::Other(anyhow::anyhow!("reading {sql_path:?}: {e}")))?;
            origin_progress =
                pgclone_cdc::apply::apply_batch(&client, &origin_name, &sql, origin_progress).await?;
            catalogs.target.put_segment(&CdcSegment {
                wal_segment,
                json_path: json_path.to_string_lossy().into_owned(),
                sql_path: Some(sql_path.to_string_lossy().into_owned()),
                closed: true,
            })?;
            catalogs.target.update_sentinel(|s| {
                s.replay_lsn = s.replay_lsn.max(origin_progress.0);
            })?;
            info!(%origin_progress, "applied CDC segment");
        }
    }
}

/// Segments the receiver has moved past and that haven't yet been recorded
/// as applied, oldest first. The most recently created segment may still be
/// open for appends by the receiver, so it's only ever processed once a
/// newer one exists -- proof the receiver has moved on to a fresh file.
async fn pending_segments(
    catalogs: &CatalogSet,
    segment_dir: &std::path::Path,
) -> Result<Vec<(String, PathBuf)>, Error> {
    let mut entries = tokio::fs::read_dir(segment_dir)
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("reading {segment_dir:?}: {e}")))?;
    let mut found = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("scanning {segment_dir:?}: {e}")))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if catalogs.target.get_segment(stem)?.is_some_and(|s| s.closed) {
            continue;
        }
        found.push((stem.to_string(), path));
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    if found.len() > 1 {
        found.pop();
    } else {
        found.clear();
    }
    Ok(found)
}
