//! `compare schema|data` (spec.md §6, §8): validates a clone by comparing
//! catalog summaries and per-table `(count, checksum)` pairs. Per spec.md
//! §9, the data checksum is a non-cryptographic smoke test, not a proof of
//! equality -- we use Postgres's own `hashtext`, the same "cheap aggregate
//! hash over the row's text form" idiom other clone tools use, summed so row
//! order never matters.

use comfy_table::{presets::UTF8_FULL, Table as ComfyTable};
use pgclone_pgutil::conn;

use crate::cli::ConnectionArgs;

pub async fn schema(args: ConnectionArgs) -> anyhow::Result<i32> {
    let source = conn::connect(&args.source).await?;
    let target = conn::connect(&args.target).await?;

    let source_tables = table_shapes(&source).await?;
    let target_tables = table_shapes(&target).await?;

    let mut out = ComfyTable::new();
    out.load_preset(UTF8_FULL);
    out.set_header(vec!["table", "source columns", "target columns", "source indexes", "target indexes", "matched"]);

    let mut all_matched = true;
    let mut names: Vec<&String> = source_tables.keys().chain(target_tables.keys()).collect();
    names.sort();
    names.dedup();
    for name in names {
        let src = source_tables.get(name);
        let tgt = target_tables.get(name);
        let matched = matches!((src, tgt), (Some(s), Some(t)) if s == t);
        all_matched &= matched;
        out.add_row(vec![
            name.clone(),
            src.map(|s| s.0.to_string()).unwrap_or_else(|| "-".to_string()),
            tgt.map(|t| t.0.to_string()).unwrap_or_else(|| "-".to_string()),
            src.map(|s| s.1.to_string()).unwrap_or_else(|| "-".to_string()),
            tgt.map(|t| t.1.to_string()).unwrap_or_else(|| "-".to_string()),
            matched.to_string(),
        ]);
    }
    println!("{out}");
    Ok(if all_matched { 0 } else { 1 })
}

pub async fn data(args: ConnectionArgs) -> anyhow::Result<i32> {
    let source = conn::connect(&args.source).await?;
    let target = conn::connect(&args.target).await?;

    let tables = table_names(&source).await?;
    let mut out = ComfyTable::new();
    out.load_preset(UTF8_FULL);
    out.set_header(vec!["table", "source rows", "target rows", "source checksum", "target checksum", "matched"]);

    let mut all_matched = true;
    for (schema, name) in tables {
        let src = row_checksum(&source, &schema, &name).await?;
        let tgt = row_checksum(&target, &schema, &name).await?;
        let matched = src == tgt;
        all_matched &= matched;
        out.add_row(vec![
            format!("{schema}.{name}"),
            src.0.to_string(),
            tgt.0.to_string(),
            src.1.to_string(),
            tgt.1.to_string(),
            matched.to_string(),
        ]);
    }
    println!("{out}");
    Ok(if all_matched { 0 } else { 1 })
}

/// `(column count, index count)` per qualified table name -- a lightweight
/// structural fingerprint for `compare schema`.
async fn table_shapes(client: &tokio_postgres::Client) -> anyhow::Result<std::collections::BTreeMap<String, (i64, i64)>> {
    let rows = client
        .query(
            "SELECT n.nspname || '.' || c.relname, \
                    (SELECT count(*) FROM pg_attribute a WHERE a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped), \
                    (SELECT count(*) FROM pg_index i WHERE i.indrelid = c.oid) \
             FROM pg_class c \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE c.relkind IN ('r', 'p') \
               AND n.nspname NOT IN ('pg_catalog', 'information_schema')",
            &[],
        )
        .await?;
    Ok(rows.into_iter().map(|r| (r.get(0), (r.get(1), r.get(2)))).collect())
}

async fn table_names(client: &tokio_postgres::Client) -> anyhow::Result<Vec<(String, String)>> {
    let rows = client
        .query(
            "SELECT n.nspname, c.relname \
             FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE c.relkind IN ('r', 'p') \
               AND n.nspname NOT IN ('pg_catalog', 'information_schema') \
             ORDER BY 1, 2",
            &[],
        )
        .await?;
    Ok(rows.into_iter().map(|r| (r.get(0), r.get(1))).collect())
}

/// `(row count, checksum)`. The checksum sums `hashtext(t::text)` over every
/// row so it's insensitive to physical row order, matching `compare data`'s
/// "per-table `(count, checksum)` pairs" contract (spec.md §6).
async fn row_checksum(client: &tokio_postgres::Client, schema: &str, name: &str) -> anyhow::Result<(i64, i64)> {
    let query = format!(
        "SELECT count(*), coalesce(sum(hashtext(t.*::text)::bigint), 0) FROM {}.{} t",
        quote_ident(schema),
        quote_ident(name)
    );
    let row = client.query_one(&query, &[]).await?;
    Ok((row.get(0), row.get(1)))
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
