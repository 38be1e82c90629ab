//! Vacuum worker pool (spec.md §4.5): dequeues tables whose copy has
//! completed and runs a statistics refresh on each, at the same concurrency
//! bound `N` as the table-copy pool. Uses a pooled connection since each
//! item is a short single statement, unlike the copy/index pools which hold
//! one dedicated connection per work item for the life of a stream.

use deadpool_postgres::Pool;
use pgclone_catalog::{CatalogSet, Progress, QualifiedName};
use pgclone_common::Error;
use tracing::info;

pub async fn vacuum_table(pool: &Pool, name: &QualifiedName) -> Result<(), Error> {
    let client = pool
        .get()
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("checking out target connection: {e}")))?;
    let sql = format!(
        "ANALYZE \"{}\".\"{}\"",
        name.schema.replace('"', "\"\""),
        name.name.replace('"', "\"\"")
    );
    client
        .batch_execute(&sql)
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("analyzing {name}: {e}")))?;
    Ok(())
}

pub async fn vacuum_table_and_record(
    pool: &Pool,
    catalogs: &CatalogSet,
    table_oid: u32,
    name: &QualifiedName,
) -> Result<(), Error> {
    let work_id = format!("vacuum.{table_oid}");
    let mut progress = Progress::queued(work_id);
    progress.mark_running();
    catalogs.source.put_progress(&progress)?;

    match vacuum_table(pool, name).await {
        Ok(()) => {
            progress.mark_done(0);
            catalogs.source.put_progress(&progress)?;
            info!(%name, "post-load analyze complete");
            Ok(())
        }
        Err(err) => {
            progress.mark_failed(err.to_string());
            catalogs.source.put_progress(&progress)?;
            Err(err)
        }
    }
}
