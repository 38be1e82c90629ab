//! `clone`/`fork` (spec.md §6): inspects the source, materializes a work
//! plan, runs the full copy-phase worker tree, and -- with `--follow` --
//! hands off to the CDC pipeline once the base copy has landed.

use std::path::PathBuf;
use std::sync::Arc;

use pgclone_catalog::{CatalogSet, Setup};
use pgclone_common::{Error, PidGuard, cancel};
use pgclone_copy::TableCopyOptions;
use pgclone_inspect::planner::{PlannerOptions, inspect};
use pgclone_pgutil::{SnapshotHolder, conn};
use pgclone_supervisor::{Limits, RunOptions, WorkPlan};
use tracing::info;

use crate::cli::CloneArgs;
use crate::commands::support::{load_filters, receive_options, segment_dir, write_setup};

pub async fn run(dir: PathBuf, args: CloneArgs) -> anyhow::Result<i32> {
    let _pid_guard = PidGuard::acquire(&dir)?;
    let catalogs = Arc::new(CatalogSet::open(&dir)?);
    if args.restart {
        catalogs.source.clear()?;
        catalogs.filters.clear()?;
        catalogs.target.clear()?;
    }

    let filter = load_filters(args.filters.as_deref())?;
    let (cancel_handle, cancel_token) = cancel::channel();
    pgclone_supervisor::signals::install(cancel_handle.clone());

    // An externally-provided snapshot identifier means some other process owns the
    // snapshot-holding transaction; we never open our own holder in that case, matching
    // spec.md §4.11's "`--resume` requires an explicit non-consistency waiver" contract in
    // reverse -- the caller has already accepted the consistency risk by supplying one.
    let holder = if args.snapshot.is_none() {
        Some(SnapshotHolder::open(&args.conn.source, cancel_token.clone()).await?)
    } else {
        None
    };
    let snapshot_id = match (&args.snapshot, &holder) {
        (Some(id), _) => id.clone(),
        (None, Some(h)) => h.snapshot_id().to_string(),
        (None, None) => unreachable!("holder is always opened when --snapshot is unset"),
    };

    let setup = Setup {
        source_endpoint_id: conn::endpoint_id(&args.conn.source),
        target_endpoint_id: conn::endpoint_id(&args.conn.target),
        snapshot_id: snapshot_id.clone(),
        cdc_plugin: args.plugin.clone(),
        slot_name: args.slot_name.clone(),
        split_threshold_bytes: args.split.split_tables_larger_than,
        filter_fingerprint: filter.fingerprint(),
    };
    write_setup(&catalogs, &setup, args.resume || args.restart)?;

    if args.create_slot {
        pgclone_cdc::receive::create_slot(
            &args.conn.source,
            &receive_options(&dir, &follow_args_view(&args), None),
        )
        .await?;
    }

    if !args.resume {
        let planner_opts = PlannerOptions {
            split_threshold_bytes: args.split.split_tables_larger_than,
            split_max_parts: args.split.split_max_parts,
            skip_ctid_split: args.split.skip_split_by_ctid,
            skip_large_objects: args.skip_large_objects,
            skip_extensions: args.skip_extensions,
        };
        inspect(&args.conn.source, &snapshot_id, &catalogs, &filter, &planner_opts).await?;
    }
    // skip_collations, skip_db_properties, and no_owner all govern the external
    // dump/restore helper invoked for pre/post-data DDL, out of scope per spec.md §1; they
    // are accepted here only so the option surface matches spec.md §6 and can be forwarded
    // to that helper by the caller's own tooling.
    let _ = (args.skip_collations, args.skip_db_properties, args.no_owner);

    let plan = WorkPlan::load(&catalogs)?;
    let run_opts = RunOptions {
        source_uri: args.conn.source.clone(),
        target_uri: args.conn.target.clone(),
        snapshot_id: snapshot_id.clone(),
        copy_opts: TableCopyOptions {
            binary_mode: args.binary,
            drop_if_exists: args.drop_if_exists,
            max_retries: 5,
        },
        limits: Limits {
            table_jobs: args.jobs.table_jobs,
            index_jobs: args.jobs.index_jobs,
            vacuum_jobs: args.jobs.table_jobs,
            lo_jobs: args.jobs.large_object_jobs,
        },
        skip_vacuum: args.skip_vacuum,
        fail_fast: args.fail_fast,
    };

    let copy_result = pgclone_supervisor::run(
        Arc::clone(&catalogs),
        plan,
        run_opts,
        cancel_token.clone(),
        cancel_handle.clone(),
    )
    .await;

    // The snapshot is only needed for the duration of the base copy; CDC reads from the
    // replication slot, not the snapshot, so the holder is released before `--follow` takes
    // over (spec.md §4.11).
    if let Some(holder) = holder {
        holder.stop().await?;
    }

    if let Err(err) = &copy_result {
        tracing::error!(%err, "base copy did not complete cleanly");
    }

    if args.follow && !matches!(copy_result, Err(Error::Cancelled)) {
        info!("base copy complete, starting CDC follow");
        let follow_opts = pgclone_supervisor::follow::FollowOptions {
            replication_uri: args.conn.source.clone(),
            target_uri: args.conn.target.clone(),
            segment_dir: segment_dir(&dir),
            origin_name: args.origin.clone(),
            receive: receive_options(&dir, &follow_args_view(&args), None),
        };
        if let Err(err) = pgclone_supervisor::follow::run(Arc::clone(&catalogs), follow_opts, cancel_token).await {
            if !matches!(err, Error::EndposReached) {
                tracing::error!(%err, "CDC follow did not complete cleanly");
            }
        }
        pgclone_copy::sequence::resync_all(&args.conn.target, &catalogs).await?;
    }

    println!("{}", pgclone_supervisor::summary::render(&catalogs)?);
    let (total, done, failed) = pgclone_supervisor::summary::counts(&catalogs)?;
    info!(total, done, failed, "run summary");

    Ok(if copy_result.is_err() || failed > 0 { 1 } else { 0 })
}

/// `CloneArgs` duplicates `FollowArgs`' CDC fields rather than flattening it, since `clone`
/// needs `--follow` itself as a separate toggle; this adapts the subset `receive_options`
/// needs without a dependency from [`crate::cli::CloneArgs`] back onto [`crate::cli::FollowArgs`].
fn follow_args_view(args: &CloneArgs) -> crate::cli::FollowArgs {
    crate::cli::FollowArgs {
        conn: args.conn.clone(),
        replication_uri: None,
        plugin: args.plugin.clone(),
        slot_name: args.slot_name.clone(),
        create_slot: args.create_slot,
        endpos: args.endpos,
        origin: args.origin.clone(),
    }
}
