//! Table-copy worker pool (spec.md §4.3): one worker per `TablePart`,
//! streaming `COPY ... TO STDOUT` bytes from the source directly into
//! `COPY ... FROM STDIN` on the target without ever deserializing a row.

use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use pgclone_catalog::{CatalogSet, PartRange, Progress, QualifiedName, Table, TablePart};
use pgclone_common::retry::Backoff;
use pgclone_common::{CancelToken, Error};
use pgclone_pgcopy::{CopyFormat, RowScanner};
use pgclone_pgutil::conn;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct TableCopyOptions {
    pub binary_mode: bool,
    pub drop_if_exists: bool,
    pub max_retries: u32,
}

/// Copies one `TablePart` end to end, per the six-step contract in spec.md
/// §4.3. `table` is needed alongside `part` to know whether this is the
/// table's only part (step 4's TRUNCATE/FREEZE gate) and to qualify the name.
pub async fn copy_part(
    source_uri: &str,
    target_uri: &str,
    snapshot_id: &str,
    table: &Table,
    part: &TablePart,
    opts: &TableCopyOptions,
    cancel: &CancelToken,
) -> Result<u64, Error> {
    let backoff = Backoff::new(Duration::from_millis(200), Duration::from_secs(10), opts.max_retries);
    let table = table.clone();
    let part = part.clone();
    let opts = *opts;
    pgclone_common::retry::retry(backoff, move || {
        copy_part_once(source_uri, target_uri, snapshot_id, &table, &part, &opts, cancel)
    })
    .await
    .map_err(|e| Error::CopyAborted {
        attempts: opts.max_retries,
        source: anyhow::anyhow!(e),
    })
}

async fn copy_part_once(
    source_uri: &str,
    target_uri: &str,
    snapshot_id: &str,
    table: &Table,
    part: &TablePart,
    opts: &TableCopyOptions,
    cancel: &CancelToken,
) -> Result<u64, anyhow::Error> {
    let started = Instant::now();
    let source = conn::connect_with_snapshot(source_uri, snapshot_id).await?;
    let target = conn::connect(target_uri).await?;

    let whole_table = table.part_ids.len() == 1 && matches!(part.range, PartRange::WholeTable);
    let format = if opts.binary_mode {
        CopyFormat::Binary
    } else {
        CopyFormat::Text
    };

    if whole_table && opts.drop_if_exists {
        target
            .batch_execute(&format!(
                "BEGIN; TRUNCATE ONLY {}; ",
                qualified(&table.name)
            ))
            .await?;
    }

    let out_sql = out_copy_sql(table, part, format);
    let in_sql = in_copy_sql(&table.name, format, whole_table && opts.drop_if_exists);

    let mut out_stream = std::pin::pin!(source.copy_out(&out_sql).await?);
    let mut sink = std::pin::pin!(target.copy_in::<_, bytes::Bytes, _>(&in_sql).await?);

    let mut scanner = RowScanner::new(format);
    let mut bytes_sent = 0u64;
    let mut pending = Vec::new();

    while let Some(chunk) = out_stream.next().await {
        if cancel.is_terminating() {
            anyhow::bail!("cancelled mid-copy for part {}", part.id);
        }
        let chunk = chunk?;
        bytes_sent += chunk.len() as u64;
        pending.extend_from_slice(&chunk);
        scanner.feed(&chunk).ok();
        sink.send(chunk).await?;
    }
    let _ = pending;
    sink.close().await?;

    if whole_table && opts.drop_if_exists {
        target.batch_execute("COMMIT;").await?;
    }

    info!(
        part = %part.id,
        rows = scanner.rows_seen(),
        bytes = bytes_sent,
        elapsed_ms = started.elapsed().as_millis(),
        "table part copied"
    );
    Ok(bytes_sent)
}

fn qualified(name: &QualifiedName) -> String {
    format!("\"{}\".\"{}\"", name.schema.replace('"', "\"\""), name.name.replace('"', "\"\""))
}

/// Builds the source-side `COPY ... TO STDOUT` statement for a part. Ranged
/// parts use the split key the planner resolved; whole-table and page-range
/// parts issue a plain `COPY table TO STDOUT` -- ctid ranges are scanned
/// using `WHERE ctid >= '(lo,0)' AND ctid < '(hi,0)'`, which Postgres can
/// evaluate without a sequential scan of the rest of the table.
fn out_copy_sql(table: &Table, part: &TablePart, format: CopyFormat) -> String {
    let with = copy_with_clause(format, false);
    match &part.range {
        PartRange::WholeTable => {
            format!("COPY {} TO STDOUT {}", qualified(&table.name), with)
        }
        PartRange::IntegerRange { lo, hi } => {
            let key = integer_split_key(table);
            format!(
                "COPY (SELECT * FROM {tbl} WHERE {key} >= {lo} AND {key} < {hi}) TO STDOUT {with}",
                tbl = qualified(&table.name),
            )
        }
        PartRange::PageRange { lo_block, hi_block } => {
            format!(
                "COPY (SELECT * FROM {tbl} WHERE ctid >= '({lo_block},0)'::tid AND ctid < '({hi_block},0)'::tid) TO STDOUT {with}",
                tbl = qualified(&table.name),
            )
        }
    }
}

fn integer_split_key(table: &Table) -> String {
    match &table.split_key {
        pgclone_catalog::SplitKey::IntegerColumn(col) if !col.is_empty() => {
            format!("\"{}\"", col.replace('"', "\"\""))
        }
        _ => "ctid".to_string(),
    }
}

fn in_copy_sql(name: &QualifiedName, format: CopyFormat, freeze: bool) -> String {
    format!(
        "COPY {} FROM STDIN {}",
        qualified(name),
        copy_with_clause(format, freeze)
    )
}

fn copy_with_clause(format: CopyFormat, freeze: bool) -> String {
    let fmt = match format {
        CopyFormat::Binary => "FORMAT binary",
        CopyFormat::Text => "FORMAT text",
    };
    if freeze {
        format!("WITH ({fmt}, FREEZE)")
    } else {
        format!("WITH ({fmt})")
    }
}

/// Runs a single part through [`copy_part`] and records the result in the
/// target catalog's Progress tree, per spec.md §4.3 step 6. Returns whether
/// every part of `table` is now `done`, the supervisor's signal to enqueue
/// the table's indexes and vacuum item (invariant 6).
pub async fn copy_part_and_record(
    source_uri: &str,
    target_uri: &str,
    snapshot_id: &str,
    catalogs: &CatalogSet,
    table: &Table,
    part: &TablePart,
    opts: &TableCopyOptions,
    cancel: &CancelToken,
) -> Result<bool, Error> {
    let mut progress = catalogs
        .source
        .get_progress(&part.id)?
        .unwrap_or_else(|| Progress::queued(part.id.clone()));
    progress.mark_running();
    catalogs.source.put_progress(&progress)?;

    match copy_part(source_uri, target_uri, snapshot_id, table, part, opts, cancel).await {
        Ok(bytes) => {
            progress.mark_done(bytes);
            catalogs.source.put_progress(&progress)?;
        }
        Err(err) => {
            warn!(part = %part.id, %err, "table part copy failed");
            progress.mark_failed(err.to_string());
            catalogs.source.put_progress(&progress)?;
            return Err(err);
        }
    }
    catalogs.source.all_parts_done(table).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgclone_catalog::{Oid, SplitKey};

    fn table_with(range: PartRange, split_key: SplitKey, n_parts: usize) -> (Table, TablePart) {
        let table = Table {
            oid: Oid(1),
            name: QualifiedName {
                schema: "public".into(),
                name: "rental".into(),
            },
            estimated_rows: 16_044,
            size_bytes: 1_224_000,
            split_key,
            part_ids: (0..n_parts).map(|i| format!("rental.{i}")).collect(),
            restore_list_name: "rental".into(),
        };
        let part = TablePart {
            id: "rental.0".into(),
            table_oid: table.oid.clone(),
            range,
        };
        (table, part)
    }

    #[test]
    fn whole_table_copy_out_has_no_where_clause() {
        let (table, part) = table_with(PartRange::WholeTable, SplitKey::None, 1);
        let sql = out_copy_sql(&table, &part, CopyFormat::Text);
        assert_eq!(sql, "COPY \"public\".\"rental\" TO STDOUT WITH (FORMAT text)");
    }

    #[test]
    fn integer_range_copy_out_filters_on_the_split_key() {
        let (table, part) = table_with(
            PartRange::IntegerRange { lo: 1, hi: 100 },
            SplitKey::IntegerColumn("rental_id".into()),
            7,
        );
        let sql = out_copy_sql(&table, &part, CopyFormat::Binary);
        assert!(sql.contains("\"rental_id\" >= 1 AND \"rental_id\" < 100"));
        assert!(sql.contains("FORMAT binary"));
    }

    #[test]
    fn single_part_drop_if_exists_requests_freeze() {
        let name = QualifiedName {
            schema: "public".into(),
            name: "actor".into(),
        };
        let sql = in_copy_sql(&name, CopyFormat::Text, true);
        assert!(sql.contains("FREEZE"));
    }

    #[test]
    fn multi_part_table_never_requests_freeze() {
        let (table, part) = table_with(
            PartRange::IntegerRange { lo: 1, hi: 100 },
            SplitKey::IntegerColumn("rental_id".into()),
            7,
        );
        assert!(!(table.part_ids.len() == 1));
        let _ = part;
    }
}
