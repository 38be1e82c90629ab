//! `list`: read-only inspection (spec.md §6). `tables`/`sequences`/
//! `indexes`/`table-parts` read the materialized work plan already sitting
//! in the catalog from a prior `clone`/`follow` run; `extensions`/
//! `collations` query the source live since neither is a catalog entity.

use std::path::Path;

use comfy_table::{presets::UTF8_FULL, Table as ComfyTable};
use pgclone_catalog::CatalogSet;
use pgclone_pgutil::conn;

use crate::cli::{ConnectionOnlySource, ListCommand};

pub async fn run(dir: &Path, cmd: ListCommand) -> anyhow::Result<i32> {
    match cmd {
        ListCommand::Tables => list_tables(dir)?,
        ListCommand::Sequences => list_sequences(dir)?,
        ListCommand::Indexes => list_indexes(dir)?,
        ListCommand::TableParts => list_table_parts(dir)?,
        ListCommand::Extensions(conn_args) => list_extensions(&conn_args).await?,
        ListCommand::Collations(conn_args) => list_collations(&conn_args).await?,
    }
    Ok(0)
}

fn list_tables(dir: &Path) -> anyhow::Result<()> {
    let catalogs = CatalogSet::open(dir)?;
    let mut tables = catalogs.source.list_tables()?;
    tables.sort_by(|a, b| a.name.to_string().cmp(&b.name.to_string()));

    let mut out = ComfyTable::new();
    out.load_preset(UTF8_FULL);
    out.set_header(vec!["oid", "table", "estimated rows", "size bytes", "parts", "split key"]);
    for t in &tables {
        let split_key = match &t.split_key {
            pgclone_catalog::SplitKey::IntegerColumn(c) => format!("integer({c})"),
            pgclone_catalog::SplitKey::PhysicalLocator => "ctid".to_string(),
            pgclone_catalog::SplitKey::None => "-".to_string(),
        };
        out.add_row(vec![
            t.oid.0.to_string(),
            t.name.to_string(),
            t.estimated_rows.to_string(),
            t.size_bytes.to_string(),
            t.part_ids.len().to_string(),
            split_key,
        ]);
    }
    println!("{out}");
    Ok(())
}

fn list_sequences(dir: &Path) -> anyhow::Result<()> {
    let catalogs = CatalogSet::open(dir)?;
    let mut sequences = catalogs.source.list_sequences()?;
    sequences.sort_by(|a, b| a.name.to_string().cmp(&b.name.to_string()));

    let mut out = ComfyTable::new();
    out.load_preset(UTF8_FULL);
    out.set_header(vec!["oid", "sequence", "last_value", "is_called"]);
    for s in &sequences {
        out.add_row(vec![s.oid.0.to_string(), s.name.to_string(), s.last_value.to_string(), s.is_called.to_string()]);
    }
    println!("{out}");
    Ok(())
}

fn list_indexes(dir: &Path) -> anyhow::Result<()> {
    let catalogs = CatalogSet::open(dir)?;
    let mut tables = catalogs.source.list_tables()?;
    tables.sort_by(|a, b| a.name.to_string().cmp(&b.name.to_string()));

    let mut out = ComfyTable::new();
    out.load_preset(UTF8_FULL);
    out.set_header(vec!["table", "index", "backs constraint"]);
    for t in &tables {
        for idx in catalogs.source.list_indexes_for_table(t.oid.0)? {
            out.add_row(vec![
                t.name.to_string(),
                idx.name.clone(),
                idx.constraint.as_ref().map(|c| c.name.clone()).unwrap_or_else(|| "-".to_string()),
            ]);
        }
    }
    println!("{out}");
    Ok(())
}

fn list_table_parts(dir: &Path) -> anyhow::Result<()> {
    let catalogs = CatalogSet::open(dir)?;
    let mut tables = catalogs.source.list_tables()?;
    tables.sort_by(|a, b| a.name.to_string().cmp(&b.name.to_string()));

    let mut out = ComfyTable::new();
    out.load_preset(UTF8_FULL);
    out.set_header(vec!["table", "part", "range", "state"]);
    for t in &tables {
        for part in catalogs.source.list_parts_for_table(&t)? {
            let state = catalogs
                .source
                .get_progress(&part.id)?
                .map(|p| format!("{:?}", p.state))
                .unwrap_or_else(|| "-".to_string());
            let range = match &part.range {
                pgclone_catalog::PartRange::IntegerRange { lo, hi } => format!("[{lo}, {hi})"),
                pgclone_catalog::PartRange::PageRange { lo_block, hi_block } => format!("pages [{lo_block}, {hi_block})"),
                pgclone_catalog::PartRange::WholeTable => "whole table".to_string(),
            };
            out.add_row(vec![t.name.to_string(), part.id.clone(), range, state]);
        }
    }
    println!("{out}");
    Ok(())
}

async fn list_extensions(args: &ConnectionOnlySource) -> anyhow::Result<()> {
    let client = conn::connect(&args.source).await?;
    let rows = client.query("SELECT extname, extversion FROM pg_extension ORDER BY extname", &[]).await?;
    let mut out = ComfyTable::new();
    out.load_preset(UTF8_FULL);
    out.set_header(vec!["extension", "version"]);
    for row in rows {
        let name: String = row.get(0);
        let version: String = row.get(1);
        out.add_row(vec![name, version]);
    }
    println!("{out}");
    Ok(())
}

async fn list_collations(args: &ConnectionOnlySource) -> anyhow::Result<()> {
    let client = conn::connect(&args.source).await?;
    let rows = client
        .query(
            "SELECT n.nspname, c.collname, c.collcollate \
             FROM pg_collation c JOIN pg_namespace n ON n.oid = c.collnamespace \
             ORDER BY n.nspname, c.collname",
            &[],
        )
        .await?;
    let mut out = ComfyTable::new();
    out.load_preset(UTF8_FULL);
    out.set_header(vec!["schema", "collation", "locale"]);
    for row in rows {
        let schema: String = row.get(0);
        let name: String = row.get(1);
        let locale: Option<String> = row.get(2);
        out.add_row(vec![schema, name, locale.unwrap_or_default()]);
    }
    println!("{out}");
    Ok(())
}
