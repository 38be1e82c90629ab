//! `stream ...` (spec.md §4.7-§4.10, §6): the low-level entry points into the
//! CDC pipeline that `clone --follow`/`follow` compose internally but that
//! operators can also drive one step at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pgclone_catalog::CatalogSet;
use pgclone_common::{cancel, Error, PidGuard};
use tracing::info;

use crate::cli::FollowArgs;
use crate::commands::support::{load_filters, receive_options, segment_dir, write_setup};

pub async fn setup(dir: PathBuf, args: FollowArgs) -> anyhow::Result<i32> {
    let catalogs = CatalogSet::open(&dir)?;
    let replication_uri = args.replication_uri.clone().unwrap_or_else(|| args.conn.source.clone());

    let startpos = if args.create_slot {
        Some(pgclone_cdc::receive::create_slot(&replication_uri, &receive_options(&dir, &args, None)).await?)
    } else {
        None
    };
    if let Some(startpos) = startpos {
        catalogs.target.update_sentinel(|s| {
            s.startpos = s.startpos.or(Some(startpos.0));
        })?;
    }

    if let Some(existing) = catalogs.source.read_setup()? {
        let setup = pgclone_catalog::Setup {
            cdc_plugin: args.plugin.clone(),
            slot_name: args.slot_name.clone(),
            ..existing
        };
        write_setup(&catalogs, &setup, true)?;
    } else {
        let filter = load_filters(None)?;
        write_setup(
            &catalogs,
            &pgclone_catalog::Setup {
                source_endpoint_id: pgclone_pgutil::conn::endpoint_id(&args.conn.source),
                target_endpoint_id: pgclone_pgutil::conn::endpoint_id(&args.conn.target),
                snapshot_id: String::new(),
                cdc_plugin: args.plugin.clone(),
                slot_name: args.slot_name.clone(),
                split_threshold_bytes: None,
                filter_fingerprint: filter.fingerprint(),
            },
            true,
        )?;
    }
    info!(slot = %args.slot_name, plugin = %args.plugin, "CDC slot ready");
    Ok(0)
}

pub async fn cleanup(dir: PathBuf, args: FollowArgs) -> anyhow::Result<i32> {
    let replication_uri = args.replication_uri.clone().unwrap_or_else(|| args.conn.source.clone());
    pgclone_cdc::receive::drop_slot(&replication_uri, &args.slot_name).await?;

    let target = pgclone_pgutil::conn::connect(&args.conn.target).await?;
    pgclone_cdc::apply::drop_origin(&target, &args.origin).await?;

    let _ = dir;
    info!(slot = %args.slot_name, origin = %args.origin, "CDC slot and origin cleaned up");
    Ok(0)
}

/// `stream prefetch`: applies whatever SQL batch files already exist on
/// disk, then exits -- no live replication connection is opened.
pub async fn prefetch(dir: PathBuf, args: FollowArgs) -> anyhow::Result<i32> {
    let catalogs = Arc::new(CatalogSet::open(&dir)?);
    let segment_dir = segment_dir(&dir);
    let target = pgclone_pgutil::conn::connect(&args.conn.target).await?;
    let mut origin_progress = pgclone_cdc::apply::setup_origin(&target, &args.origin).await?;

    let mut sql_files = Vec::new();
    let mut entries = tokio::fs::read_dir(&segment_dir)
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("reading {segment_dir:?}: {e}")))?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| Error::Other(anyhow::anyhow!("scanning {segment_dir:?}: {e}")))? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("sql") {
            sql_files.push(path);
        }
    }
    sql_files.sort();

    for path in sql_files {
        let sql = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("reading {path:?}: {e}")))?;
        origin_progress = pgclone_cdc::apply::apply_batch(&target, &args.origin, &sql, origin_progress).await?;
        catalogs.target.update_sentinel(|s| {
            s.replay_lsn = s.replay_lsn.max(origin_progress.0);
        })?;
    }
    info!(%origin_progress, "prefetch applied every pending batch on disk");
    Ok(0)
}

pub async fn catchup(dir: PathBuf, args: FollowArgs) -> anyhow::Result<i32> {
    let _pid_guard = PidGuard::acquire(&dir)?;
    let catalogs = Arc::new(CatalogSet::open(&dir)?);
    let (cancel_handle, cancel_token) = cancel::channel();
    pgclone_supervisor::signals::install(cancel_handle.clone());

    let follow_opts = follow_options(&dir, &args);
    match pgclone_supervisor::follow::run_catchup(catalogs, follow_opts, cancel_handle, cancel_token).await {
        Ok(()) | Err(Error::Cancelled) => Ok(0),
        Err(err) => {
            tracing::error!(%err, "catchup did not complete cleanly");
            Ok(1)
        }
    }
}

pub async fn replay(dir: PathBuf, args: FollowArgs) -> anyhow::Result<i32> {
    let _pid_guard = PidGuard::acquire(&dir)?;
    let catalogs = Arc::new(CatalogSet::open(&dir)?);
    let (cancel_handle, cancel_token) = cancel::channel();
    pgclone_supervisor::signals::install(cancel_handle);

    let follow_opts = follow_options(&dir, &args);
    match pgclone_supervisor::follow::run(catalogs, follow_opts, cancel_token).await {
        Ok(()) | Err(Error::EndposReached) | Err(Error::Cancelled) => Ok(0),
        Err(err) => {
            tracing::error!(%err, "replay did not complete cleanly");
            Ok(1)
        }
    }
}

pub async fn receive(dir: PathBuf, args: FollowArgs) -> anyhow::Result<i32> {
    let _pid_guard = PidGuard::acquire(&dir)?;
    let catalogs = CatalogSet::open(&dir)?;
    let (cancel_handle, cancel_token) = cancel::channel();
    pgclone_supervisor::signals::install(cancel_handle);

    let replication_uri = args.replication_uri.clone().unwrap_or_else(|| args.conn.source.clone());
    let opts = receive_options(&dir, &args, None);
    match pgclone_cdc::receive::run(&replication_uri, &catalogs, &opts, &cancel_token).await {
        Ok(()) | Err(Error::EndposReached) | Err(Error::Cancelled) => Ok(0),
        Err(err) => {
            tracing::error!(%err, "receive did not complete cleanly");
            Ok(1)
        }
    }
}

pub async fn transform(json: PathBuf, sql: PathBuf) -> anyhow::Result<i32> {
    pgclone_cdc::transform::transform_file(&json, &sql).await?;
    Ok(0)
}

pub async fn apply(dir: PathBuf, args: FollowArgs) -> anyhow::Result<i32> {
    // `stream apply` on its own reuses the same one-shot disk-draining loop
    // as `stream prefetch`: apply never opens a replication connection, the
    // receiver's job is entirely separate.
    prefetch(dir, args).await
}

fn follow_options(dir: &Path, args: &FollowArgs) -> pgclone_supervisor::follow::FollowOptions {
    let replication_uri = args.replication_uri.clone().unwrap_or_else(|| args.conn.source.clone());
    pgclone_supervisor::follow::FollowOptions {
        replication_uri,
        target_uri: args.conn.target.clone(),
        segment_dir: segment_dir(dir),
        origin_name: args.origin.clone(),
        receive: receive_options(dir, args, None),
    }
}
