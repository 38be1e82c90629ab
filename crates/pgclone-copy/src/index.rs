//! Index/constraint worker pool (spec.md §4.4): each queued index is built
//! with `CREATE INDEX IF NOT EXISTS` on its own target connection, then --
//! only if it backs a constraint, and only after the build reports `Done` --
//! promoted with `ALTER TABLE ... ADD CONSTRAINT ... USING INDEX`.
//!
//! `ADD CONSTRAINT` takes an access-exclusive lock; building the unique index
//! concurrently first and promoting afterward is far cheaper and lets
//! sibling indexes of the same table build in parallel (spec.md §4.4
//! rationale).

use pgclone_catalog::{CatalogSet, Index, Progress};
use pgclone_common::Error;
use pgclone_pgutil::conn;
use tracing::{info, warn};

/// Makes `CREATE INDEX ...` idempotent for resume, matching spec.md §4.4:
/// "built with `CREATE INDEX` (made idempotent via `IF NOT EXISTS`)". The
/// catalog stores the definition verbatim from `pg_get_indexdef`, which
/// already names the index, so we splice `IF NOT EXISTS` in just after the
/// `CREATE [UNIQUE] INDEX` keywords.
fn idempotent_definition(sql: &str) -> String {
    let lower = sql.to_ascii_lowercase();
    if lower.contains("if not exists") {
        return sql.to_string();
    }
    if let Some(pos) = lower.find("index ") {
        let insert_at = pos + "index ".len();
        let mut out = String::with_capacity(sql.len() + 14);
        out.push_str(&sql[..insert_at]);
        out.push_str("IF NOT EXISTS ");
        out.push_str(&sql[insert_at..]);
        return out;
    }
    sql.to_string()
}

pub async fn build_index(target_uri: &str, index: &Index) -> Result<(), Error> {
    let client = conn::connect(target_uri).await?;
    let sql = idempotent_definition(&index.definition);
    client
        .batch_execute(&sql)
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("building index {}: {e}", index.name)))?;
    Ok(())
}

/// Promotes the backing index into its constraint. Invariant 2 (spec.md
/// §3): callers must only reach here once the index's own Progress row is
/// `Done`; that ordering is enforced by the caller (the index worker pool
/// always runs build-then-promote sequentially for a single index, never
/// concurrently).
pub async fn promote_constraint(target_uri: &str, table_name: &str, index: &Index) -> Result<(), Error> {
    let Some(constraint) = &index.constraint else {
        return Ok(());
    };
    let client = conn::connect(target_uri).await?;
    let sql = constraint
        .alter_table_sql
        .replacen("ALTER TABLE ...", &format!("ALTER TABLE {table_name}"), 1);
    match client.batch_execute(&sql).await {
        Ok(()) => Ok(()),
        Err(err) => {
            // A conflicting constraint already present on resume is
            // reported and skipped rather than fatal (spec.md §7,
            // ConstraintPromotionConflict).
            if err.to_string().contains("already exists") {
                warn!(constraint = %constraint.name, "constraint already present, skipping promotion");
                Ok(())
            } else {
                Err(Error::ConstraintPromotionConflict(format!(
                    "{}: {err}",
                    constraint.name
                )))
            }
        }
    }
}

/// Builds then (if applicable) promotes one index, recording Progress.
pub async fn run_index_item(
    target_uri: &str,
    catalogs: &CatalogSet,
    table_name: &str,
    index: &Index,
) -> Result<(), Error> {
    let work_id = format!("index.{}", index.oid.0);
    let mut progress = Progress::queued(work_id.clone());
    progress.mark_running();
    catalogs.source.put_progress(&progress)?;

    let result = async {
        build_index(target_uri, index).await?;
        promote_constraint(target_uri, table_name, index).await
    }
    .await;

    match result {
        Ok(()) => {
            progress.mark_done(0);
            catalogs.source.put_progress(&progress)?;
            info!(index = %index.name, "index built and promoted");
            Ok(())
        }
        Err(err) => {
            progress.mark_failed(err.to_string());
            catalogs.source.put_progress(&progress)?;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splices_if_not_exists_after_create_index() {
        let sql = "CREATE INDEX rental_idx ON public.rental (rental_id)";
        assert_eq!(
            idempotent_definition(sql),
            "CREATE INDEX IF NOT EXISTS rental_idx ON public.rental (rental_id)"
        );
    }

    #[test]
    fn preserves_unique_keyword() {
        let sql = "CREATE UNIQUE INDEX rental_pkey ON public.rental (rental_id)";
        let out = idempotent_definition(sql);
        assert!(out.starts_with("CREATE UNIQUE INDEX IF NOT EXISTS"));
    }

    #[test]
    fn is_a_no_op_if_already_idempotent() {
        let sql = "CREATE INDEX IF NOT EXISTS rental_idx ON public.rental (rental_id)";
        assert_eq!(idempotent_definition(sql), sql);
    }
}
