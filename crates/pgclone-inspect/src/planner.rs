use pgclone_catalog::{
    CatalogSet, Constraint, Index, LargeObject, Oid, QualifiedName, Sequence, Table,
};
use pgclone_common::Error;
use pgclone_pgutil::conn;
use tracing::info;

use crate::filter::FilterFile;
use crate::partition::{self, PlanInput, PlanOptions};

/// Options for a single inspection pass, mirroring the `clone`/`follow`
/// option surface named in spec.md §6.
pub struct PlannerOptions {
    pub split_threshold_bytes: Option<u64>,
    pub split_max_parts: u32,
    pub skip_ctid_split: bool,
    pub skip_large_objects: bool,
    pub skip_extensions: bool,
}

/// Queries the source catalog for ordinary and partitioned tables, their
/// indexes (including constraint-backing ones), sequences, and large
/// objects, applies the filter file, and materializes a work plan into the
/// catalog (spec.md §4.2).
pub async fn inspect(
    source_uri: &str,
    snapshot_id: &str,
    catalogs: &CatalogSet,
    filter: &FilterFile,
    opts: &PlannerOptions,
) -> Result<(), Error> {
    let client = conn::connect_with_snapshot(source_uri, snapshot_id).await?;

    let table_rows = client
        .query(
            "SELECT c.oid, n.nspname, c.relname, c.reltuples::bigint, \
             pg_total_relation_size(c.oid), c.relpages \
             FROM pg_class c \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE c.relkind IN ('r', 'p') \
               AND n.nspname NOT IN ('pg_catalog', 'information_schema')",
            &[],
        )
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("listing source tables: {e}")))?;

    let mut table_count = 0usize;
    for row in table_rows {
        let oid: u32 = row.get::<_, i64>(0) as u32;
        let schema: String = row.get(1);
        let name: String = row.get(2);
        let qname = QualifiedName {
            schema: schema.clone(),
            name: name.clone(),
        };
        if filter.is_excluded(&qname) {
            continue;
        }
        let estimated_rows: i64 = row.get(3);
        let size_bytes: i64 = row.get(4);
        let relpages: i64 = row.get(5);

        let integer_key_min_max =
            find_unique_not_null_integer_key(&client, oid, &schema, &name).await?;

        let input = PlanInput {
            table_oid: Oid(oid),
            size_bytes: size_bytes.max(0) as u64,
            estimated_rows: estimated_rows.max(0) as u64,
            integer_key_min_max,
            relpages,
        };
        let plan_opts = PlanOptions {
            split_threshold_bytes: opts.split_threshold_bytes,
            split_max_parts: opts.split_max_parts,
            allow_ctid_split: !opts.skip_ctid_split,
        };
        let prefix = format!("{schema}.{name}");
        let parts = partition::with_table_oid(
            partition::plan_parts(&prefix, &input, &plan_opts),
            Oid(oid),
        );

        let split_key = partition::resolve_split_key(
            input.estimated_rows,
            input.size_bytes,
            integer_key_min_max.is_some(),
            opts.split_threshold_bytes,
            !opts.skip_ctid_split,
        );

        let table = Table {
            oid: Oid(oid),
            name: qname,
            estimated_rows: input.estimated_rows,
            size_bytes: input.size_bytes,
            split_key,
            part_ids: parts.iter().map(|p| p.id.clone()).collect(),
            restore_list_name: format!("{schema}.{name}"),
        };
        catalogs.source.put_table(&table)?;
        for part in &parts {
            catalogs.source.put_part(part)?;
            catalogs
                .source
                .put_progress(&pgclone_catalog::Progress::queued(part.id.clone()))?;
        }

        inspect_indexes(&client, &catalogs, oid).await?;
        table_count += 1;
    }
    info!(table_count, "schema inspection complete");

    inspect_sequences(&client, catalogs).await?;

    if !opts.skip_large_objects {
        inspect_large_objects(&client, catalogs).await?;
    }

    if !opts.skip_extensions {
        // Extensions are recorded only to drive the external pre/post-data
        // restore step (out of scope per spec.md §1); we still need their
        // names so the restore helper knows what to (re)create.
        let _ = client
            .query("SELECT extname FROM pg_extension", &[])
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("listing extensions: {e}")))?;
    }

    Ok(())
}

async fn find_unique_not_null_integer_key(
    client: &tokio_postgres::Client,
    table_oid: u32,
    _schema: &str,
    _name: &str,
) -> Result<Option<(i64, i64)>, Error> {
    let rows = client
        .query(
            "SELECT a.attname \
             FROM pg_index i \
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
             JOIN pg_type t ON t.oid = a.atttypid \
             WHERE i.indrelid = $1::oid \
               AND (i.indisunique OR i.indisprimary) \
               AND i.indimmediate \
               AND a.attnotnull \
               AND t.typname IN ('int2', 'int4', 'int8') \
               AND array_length(i.indkey, 1) = 1 \
             LIMIT 1",
            &[&(table_oid as i64)],
        )
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("locating integer key: {e}")))?;

    let Some(row) = rows.into_iter().next() else {
        return Ok(None);
    };
    let column: String = row.get(0);
    let bounds_query = format!(
        "SELECT min({col})::bigint, max({col})::bigint FROM {oid}::regclass",
        col = quote_ident(&column),
        oid = table_oid
    );
    let bounds = client
        .query_one(&bounds_query, &[])
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("computing key bounds: {e}")))?;
    let min: Option<i64> = bounds.get(0);
    let max: Option<i64> = bounds.get(1);
    Ok(min.zip(max))
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

async fn inspect_indexes(
    client: &tokio_postgres::Client,
    catalogs: &CatalogSet,
    table_oid: u32,
) -> Result<(), Error> {
    let rows = client
        .query(
            "SELECT ic.oid, ic.relname, pg_get_indexdef(ic.oid), con.conname, con.contype \
             FROM pg_index idx \
             JOIN pg_class ic ON ic.oid = idx.indexrelid \
             LEFT JOIN pg_constraint con ON con.conindid = idx.indexrelid \
             WHERE idx.indrelid = $1::oid",
            &[&(table_oid as i64)],
        )
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("listing indexes for table {table_oid}: {e}")))?;

    for row in rows {
        let index_oid: i64 = row.get(0);
        let index_name: String = row.get(1);
        let definition: String = row.get(2);
        let constraint_name: Option<String> = row.get(3);
        let constraint_type: Option<i8> = row.get::<_, Option<String>>(4).map(|s| s.as_bytes()[0] as i8);

        // `ADD CONSTRAINT ... USING INDEX` is only valid for unique/primary
        // key/exclusion constraints, per spec.md §4.4.
        let constraint = match (constraint_name, constraint_type) {
            (Some(name), Some(ty)) if matches!(ty as u8 as char, 'u' | 'p' | 'x') => {
                let kind = match ty as u8 as char {
                    'p' => "PRIMARY KEY",
                    'x' => "EXCLUDE",
                    _ => "UNIQUE",
                };
                Some(Constraint {
                    name: name.clone(),
                    alter_table_sql: format!(
                        "ALTER TABLE ... ADD CONSTRAINT {name} {kind} USING INDEX {index_name}",
                    ),
                })
            }
            _ => None,
        };

        catalogs.source.put_index(&Index {
            oid: Oid(index_oid as u32),
            table_oid: Oid(table_oid),
            name: index_name,
            definition,
            constraint,
        })?;
    }
    Ok(())
}

async fn inspect_sequences(client: &tokio_postgres::Client, catalogs: &CatalogSet) -> Result<(), Error> {
    let rows = client
        .query(
            "SELECT c.oid, n.nspname, c.relname \
             FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE c.relkind = 'S'",
            &[],
        )
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("listing sequences: {e}")))?;

    for row in rows {
        let oid: i64 = row.get(0);
        let schema: String = row.get(1);
        let name: String = row.get(2);
        let last_value_query = format!("SELECT last_value, is_called FROM {schema}.{name}", schema = quote_ident(&schema), name = quote_ident(&name));
        let value_row = client
            .query_one(&last_value_query, &[])
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("reading sequence {schema}.{name}: {e}")))?;
        let last_value: i64 = value_row.get(0);
        let is_called: bool = value_row.get(1);

        catalogs.source.put_sequence(&Sequence {
            oid: Oid(oid as u32),
            name: QualifiedName { schema, name },
            last_value,
            is_called,
        })?;
    }
    Ok(())
}

async fn inspect_large_objects(
    client: &tokio_postgres::Client,
    catalogs: &CatalogSet,
) -> Result<(), Error> {
    let rows = client
        .query("SELECT oid FROM pg_largeobject_metadata", &[])
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("listing large objects: {e}")))?;
    for row in rows {
        let oid: i64 = row.get(0);
        catalogs.source.put_large_object(&LargeObject {
            oid: Oid(oid as u32),
            chunk_cursor: 0,
        })?;
    }
    Ok(())
}

/// Helper used by the queue feeder: tables ordered by descending estimated
/// row count, per spec.md §4.1's scheduling policy ("minimizes the long-pole
/// runtime").
pub fn order_tables_by_descending_rows(mut tables: Vec<Table>) -> Vec<Table> {
    tables.sort_by(|a, b| b.estimated_rows.cmp(&a.estimated_rows));
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgclone_catalog::{Oid as COid, QualifiedName as QName, SplitKey};

    fn table(rows: u64) -> Table {
        Table {
            oid: COid(1),
            name: QName {
                schema: "public".into(),
                name: "t".into(),
            },
            estimated_rows: rows,
            size_bytes: 0,
            split_key: SplitKey::None,
            part_ids: vec![],
            restore_list_name: "t".into(),
        }
    }

    #[test]
    fn orders_tables_largest_first() {
        let tables = vec![table(10), table(1000), table(200)];
        let ordered = order_tables_by_descending_rows(tables);
        let rows: Vec<u64> = ordered.iter().map(|t| t.estimated_rows).collect();
        assert_eq!(rows, vec![1000, 200, 10]);
    }
}
