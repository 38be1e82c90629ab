//! The supervisor (spec.md §4.1): spawns the full copy-phase worker tree --
//! queue feeder, table-copy pool, index pool, vacuum pool, large-object
//! pool, and the sequence worker -- fanning their results back in and
//! propagating the first fatal failure as a fail-fast cancel to every
//! sibling. `start` covers `clone`/`fork`; `pgclone_cdc` plus [`crate::follow`]
//! cover the CDC side for `--follow`/`stream`.

use std::sync::{Arc, Mutex};

use pgclone_catalog::{CatalogSet, Index, QualifiedName, Table, TablePart};
use pgclone_common::{CancelState, CancelToken, Error};
use pgclone_copy::index::run_index_item;
use pgclone_copy::largeobject::{copy_large_object_and_record, partition_objects};
use pgclone_copy::queue::WorkQueue;
use pgclone_copy::sequence::resync_all;
use pgclone_copy::table::{TableCopyOptions, copy_part_and_record};
use pgclone_copy::vacuum::vacuum_table_and_record;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::limits::Limits;
use crate::plan::WorkPlan;

#[derive(Clone)]
pub struct RunOptions {
    pub source_uri: String,
    pub target_uri: String,
    pub snapshot_id: String,
    pub copy_opts: TableCopyOptions,
    pub limits: Limits,
    /// Skips spawning the vacuum pool entirely (`--skip-vacuum`).
    pub skip_vacuum: bool,
    /// Escalates to immediate termination on *any* worker error, not only fatal ones.
    pub fail_fast: bool,
}

struct PartJob {
    table: Table,
    part: TablePart,
}

struct IndexJob {
    table_name: QualifiedName,
    index: Index,
}

struct VacuumJob {
    table_oid: u32,
    name: QualifiedName,
}

/// Runs the copy phase end to end and returns once every worker pool has
/// drained. A fatal error from any one worker escalates `cancel` to
/// `Terminate`, which every other pool observes at its next dequeue or chunk
/// boundary; non-fatal, single-item failures are recorded in Progress and
/// the pool simply moves to its next item (spec.md §7).
pub async fn run(
    catalogs: Arc<CatalogSet>,
    plan: WorkPlan,
    opts: RunOptions,
    cancel: CancelToken,
    cancel_handle: pgclone_common::CancelHandle,
) -> Result<(), Error> {
    let table_queue = Arc::new(WorkQueue::new(
        plan.tables
            .iter()
            .flat_map(|table| {
                plan.parts_by_table
                    .get(&table.oid.0)
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .map(move |part| PartJob {
                        table: table.clone(),
                        part,
                    })
            })
            .collect::<Vec<_>>(),
    ));
    let index_queue: Arc<WorkQueue<IndexJob>> = Arc::new(WorkQueue::new(Vec::new()));
    let vacuum_queue: Arc<WorkQueue<VacuumJob>> = Arc::new(WorkQueue::new(Vec::new()));

    let first_error: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));

    let pool = pgclone_pgutil::pool::build_pool(&opts.target_uri, opts.limits.vacuum_jobs)?;

    let mut tasks: JoinSet<Result<(), Error>> = JoinSet::new();

    for _ in 0..opts.limits.table_jobs.max(1) {
        let catalogs = Arc::clone(&catalogs);
        let table_queue = Arc::clone(&table_queue);
        let index_queue = Arc::clone(&index_queue);
        let vacuum_queue = Arc::clone(&vacuum_queue);
        let opts = opts.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            while let Some(job) = next_if_running(&table_queue, &cancel).await {
                let all_done = copy_part_and_record(
                    &opts.source_uri,
                    &opts.target_uri,
                    &opts.snapshot_id,
                    &catalogs,
                    &job.table,
                    &job.part,
                    &opts.copy_opts,
                    &cancel,
                )
                .await?;
                if all_done {
                    let indexes = catalogs.source.list_indexes_for_table(job.table.oid.0)?;
                    for index in indexes {
                        index_queue
                            .push(IndexJob {
                                table_name: job.table.name.clone(),
                                index,
                            })
                            .await;
                    }
                    vacuum_queue
                        .push(VacuumJob {
                            table_oid: job.table.oid.0,
                            name: job.table.name.clone(),
                        })
                        .await;
                }
            }
            Ok(())
        });
    }

    for _ in 0..opts.limits.index_jobs.max(1) {
        let catalogs = Arc::clone(&catalogs);
        let index_queue = Arc::clone(&index_queue);
        let target_uri = opts.target_uri.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            loop {
                if cancel.is_terminating() {
                    return Err(Error::Cancelled);
                }
                if cancel.is_draining() && index_queue.is_empty().await {
                    return Ok(());
                }
                let Some(job) = index_queue.pop().await else {
                    // Indexes are enqueued as table-copy workers finish, so an
                    // empty queue doesn't yet mean "no more work" -- only the
                    // overall drain (checked by the caller joining this pool
                    // against the table-copy pool's completion) does.
                    if index_queue_source_exhausted(&catalogs, &index_queue).await {
                        return Ok(());
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    continue;
                };
                run_index_item(&target_uri, &catalogs, &job.table_name.to_string(), &job.index).await?;
            }
        });
    }

    if !opts.skip_vacuum {
        for _ in 0..opts.limits.vacuum_jobs.max(1) {
            let catalogs = Arc::clone(&catalogs);
            let vacuum_queue = Arc::clone(&vacuum_queue);
            let pool = pool.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                loop {
                    if cancel.is_terminating() {
                        return Err(Error::Cancelled);
                    }
                    let Some(job) = vacuum_queue.pop().await else {
                        if vacuum_queue_source_exhausted(&catalogs, &vacuum_queue).await {
                            return Ok(());
                        }
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        continue;
                    };
                    vacuum_table_and_record(&pool, &catalogs, job.table_oid, &job.name).await?;
                }
            });
        }
    }

    let lo_buckets = partition_objects(plan.large_objects.clone(), opts.limits.lo_jobs);
    for bucket in lo_buckets {
        let catalogs = Arc::clone(&catalogs);
        let source_uri = opts.source_uri.clone();
        let target_uri = opts.target_uri.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            for lo in bucket {
                if cancel.is_terminating() {
                    return Err(Error::Cancelled);
                }
                copy_large_object_and_record(&source_uri, &target_uri, &catalogs, &lo).await?;
            }
            Ok(())
        });
    }

    {
        let catalogs = Arc::clone(&catalogs);
        let target_uri = opts.target_uri.clone();
        tasks.spawn(async move { resync_all(&target_uri, &catalogs).await });
    }

    while let Some(joined) = tasks.join_next().await {
        let result = match joined {
            Ok(r) => r,
            Err(join_err) => Err(Error::WorkerCrashed(join_err.to_string())),
        };
        if let Err(err) = result {
            if !matches!(err, Error::Cancelled) {
                error!(%err, "worker pool task failed");
            }
            if err.is_fatal() || opts.fail_fast {
                cancel_handle.terminate();
            }
            let mut slot = first_error.lock().unwrap();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
    }

    match Arc::try_unwrap(first_error).unwrap().into_inner().unwrap() {
        Some(err) => Err(err),
        None => {
            info!("copy phase complete");
            Ok(())
        }
    }
}

async fn next_if_running(queue: &WorkQueue<PartJob>, cancel: &CancelToken) -> Option<PartJob> {
    if cancel.state() != CancelState::Running {
        return None;
    }
    queue.pop().await
}

/// The index/vacuum pools drain a queue that's fed dynamically by the
/// table-copy pool rather than populated up front, so an empty pop doesn't
/// by itself mean "done" -- it means done once every table's parts have
/// also finished. `all_parts_done` on every table is exactly that signal.
async fn index_queue_source_exhausted(catalogs: &CatalogSet, queue: &WorkQueue<IndexJob>) -> bool {
    queue.is_empty().await && all_tables_done(catalogs).unwrap_or(false)
}

async fn vacuum_queue_source_exhausted(catalogs: &CatalogSet, queue: &WorkQueue<VacuumJob>) -> bool {
    queue.is_empty().await && all_tables_done(catalogs).unwrap_or(false)
}

fn all_tables_done(catalogs: &CatalogSet) -> Result<bool, Error> {
    for table in catalogs.source.list_tables()? {
        if !catalogs.source.all_parts_done(&table)? {
            return Ok(false);
        }
    }
    Ok(true)
}
