//! Large-object worker pool (spec.md §4.6): one metadata worker enumerates
//! objects (done by the schema inspector, see `pgclone_catalog::LargeObject`
//! rows), `M` data workers stream each object's content in fixed-size
//! chunks using the SQL-callable large-object primitives
//! (`lo_create`/`lo_open`/`loread`/`lowrite`), preserving object OIDs.
//! Completion is per-object; an interrupted object restarts whole, so no
//! partial-chunk state is persisted beyond the chunk cursor used purely for
//! progress reporting.

use pgclone_catalog::{CatalogSet, LargeObject, Progress};
use pgclone_common::Error;
use pgclone_pgutil::conn;
use tokio_postgres::Client;
use tracing::info;

/// Read/write chunk size for large-object streaming. Large enough to avoid
/// per-chunk round-trip overhead dominating, small enough that a single
/// chunk never holds an entire multi-gigabyte object in memory.
const CHUNK_BYTES: i32 = 1 << 20;

const INV_READ: i32 = 0x40000;
const INV_WRITE: i32 = 0x20000;

pub async fn copy_large_object(source_uri: &str, target_uri: &str, lo: &LargeObject) -> Result<u64, Error> {
    let source = conn::connect(source_uri).await?;
    let target = conn::connect(target_uri).await?;

    source
        .batch_execute("BEGIN")
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("BEGIN on source for LO {}: {e}", lo.oid.0)))?;
    target
        .batch_execute("BEGIN")
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("BEGIN on target for LO {}: {e}", lo.oid.0)))?;

    let bytes = stream_one(&source, &target, lo.oid.0).await;

    source.batch_execute("COMMIT").await.ok();
    target.batch_execute("COMMIT").await.ok();

    bytes
}

async fn stream_one(source: &Client, target: &Client, oid: u32) -> Result<u64, Error> {
    // Preserve the object identifier on the target: lo_create accepts an
    // explicit OID (0 asks Postgres to pick one, which we never want here).
    target
        .execute("SELECT lo_create($1)", &[&(oid as i64)])
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("lo_create({oid}) on target: {e}")))?;

    let src_fd: i32 = source
        .query_one("SELECT lo_open($1, $2)", &[&(oid as i64), &INV_READ])
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("lo_open({oid}) on source: {e}")))?
        .get(0);
    let dst_fd: i32 = target
        .query_one("SELECT lo_open($1, $2)", &[&(oid as i64), &INV_WRITE])
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("lo_open({oid}) on target: {e}")))?
        .get(0);

    let mut total: u64 = 0;
    loop {
        let row = source
            .query_one("SELECT loread($1, $2)", &[&src_fd, &CHUNK_BYTES])
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("loread({oid}): {e}")))?;
        let chunk: Vec<u8> = row.get(0);
        if chunk.is_empty() {
            break;
        }
        total += chunk.len() as u64;
        target
            .execute("SELECT lowrite($1, $2)", &[&dst_fd, &chunk])
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("lowrite({oid}): {e}")))?;
        if (chunk.len() as i32) < CHUNK_BYTES {
            break;
        }
    }

    source
        .execute("SELECT lo_close($1)", &[&src_fd])
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("lo_close source {oid}: {e}")))?;
    target
        .execute("SELECT lo_close($1)", &[&dst_fd])
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("lo_close target {oid}: {e}")))?;

    Ok(total)
}

pub async fn copy_large_object_and_record(
    source_uri: &str,
    target_uri: &str,
    catalogs: &CatalogSet,
    lo: &LargeObject,
) -> Result<(), Error> {
    let work_id = format!("lo.{}", lo.oid.0);
    let mut progress = Progress::queued(work_id);
    progress.mark_running();
    catalogs.source.put_progress(&progress)?;

    match copy_large_object(source_uri, target_uri, lo).await {
        Ok(bytes) => {
            progress.mark_done(bytes);
            catalogs.source.put_progress(&progress)?;
            info!(oid = lo.oid.0, bytes, "large object copied");
            Ok(())
        }
        Err(err) => {
            progress.mark_failed(err.to_string());
            catalogs.source.put_progress(&progress)?;
            Err(err)
        }
    }
}

/// Splits the catalog's large-object list into `worker_count` disjoint,
/// roughly-even partitions for the data workers, mirroring the same
/// round-robin split the table-copy queue feeder uses for parts.
pub fn partition_objects(objects: Vec<LargeObject>, worker_count: usize) -> Vec<Vec<LargeObject>> {
    let worker_count = worker_count.max(1);
    let mut buckets: Vec<Vec<LargeObject>> = (0..worker_count).map(|_| Vec::new()).collect();
    for (i, obj) in objects.into_iter().enumerate() {
        buckets[i % worker_count].push(obj);
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgclone_catalog::Oid;

    #[test]
    fn partitions_round_robin_across_workers() {
        let objects: Vec<LargeObject> = (0..7)
            .map(|i| LargeObject {
                oid: Oid(i),
                chunk_cursor: 0,
            })
            .collect();
        let buckets = partition_objects(objects, 3);
        assert_eq!(buckets.len(), 3);
        let total: usize = buckets.iter().map(Vec::len).sum();
        assert_eq!(total, 7);
        assert!(buckets.iter().all(|b| b.len() <= 3));
    }
}
