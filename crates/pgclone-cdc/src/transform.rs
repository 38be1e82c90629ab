//! CDC transformer (spec.md §4.8): turns a JSON segment into a SQL batch
//! file, one statement per line, preserving source transaction boundaries by
//! wrapping each in `BEGIN; -- {header}` / `COMMIT; -- {header}` and
//! coalescing grouped same-table inserts within one transaction into a
//! single `PREPARE`/`EXECUTE` pair.

use std::collections::BTreeMap;
use std::path::Path;

use itertools::Itertools;
use pgclone_common::Error;
use serde_json::Value;

use crate::model::{Action, ChangeEvent};

#[derive(Debug, serde::Serialize)]
struct TxHeader {
    xid: u32,
    lsn: u64,
}

/// Reads newline-delimited `ChangeEvent`s from `json`, groups them into
/// transactions (every event between a Begin and its matching Commit), and
/// renders the SQL batch text described in spec.md §6.
pub fn transform(json: &str) -> Result<String, Error> {
    let events: Vec<ChangeEvent> = json
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()
        .map_err(|e| Error::Other(anyhow::anyhow!("parsing CDC segment: {e}")))?;

    let mut out = String::new();
    let mut current_tx: Vec<ChangeEvent> = Vec::new();

    for event in events {
        match event.action {
            Action::Begin => {
                current_tx.clear();
                current_tx.push(event);
            }
            Action::Commit => {
                current_tx.push(event.clone());
                out.push_str(&render_transaction(&current_tx)?);
                current_tx.clear();
            }
            _ => current_tx.push(event),
        }
    }
    Ok(out)
}

fn render_transaction(events: &[ChangeEvent]) -> Result<String, Error> {
    let begin = events.first();
    let commit = events.last();
    let (xid, lsn) = match (begin, commit) {
        (Some(b), Some(_)) => (b.xid, b.lsn),
        _ => return Ok(String::new()),
    };
    let header = serde_json::to_string(&TxHeader { xid, lsn })
        .map_err(|e| Error::Other(anyhow::anyhow!("serializing tx header: {e}")))?;

    let mut body = String::new();
    body.push_str(&format!("BEGIN; -- {header}\n"));

    // Coalesce consecutive same-table inserts into PREPARE/EXECUTE, in the
    // order they occur; an update/delete/truncate in between breaks the run
    // so row ordering within the transaction is preserved exactly.
    let changes = &events[1..events.len().saturating_sub(1)];
    for (key, group) in &changes.iter().group_by(|e| group_key(e)) {
        let group: Vec<&ChangeEvent> = group.collect();
        match key {
            Some((schema, table)) if group.iter().all(|e| e.action == Action::Insert) && group.len() > 1 => {
                body.push_str(&render_coalesced_insert(&schema, &table, &group)?);
            }
            _ => {
                for event in group {
                    body.push_str(&render_single(event)?);
                }
            }
        }
    }

    body.push_str(&format!("COMMIT; -- {header}\n"));
    Ok(body)
}

fn group_key(event: &ChangeEvent) -> Option<(String, String)> {
    match (event.action, &event.schema, &event.table) {
        (Action::Insert, Some(s), Some(t)) => Some((s.clone(), t.clone())),
        _ => None,
    }
}

fn render_coalesced_insert(schema: &str, table: &str, group: &[&ChangeEvent]) -> Result<String, Error> {
    let columns: Vec<String> = group[0]
        .columns
        .as_ref()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    if columns.is_empty() {
        let mut out = String::new();
        for event in group {
            out.push_str(&render_single(event)?);
        }
        return Ok(out);
    }

    let hash = prepared_statement_hash(schema, table, &columns);
    let col_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut out = format!(
        "PREPARE {hash} AS INSERT INTO {q}.{t} ({col_list}) VALUES ({placeholders});\n",
        q = quote_ident(schema),
        t = quote_ident(table),
    );
    for event in group {
        let values: Vec<&Value> = columns
            .iter()
            .map(|c| event.columns.as_ref().and_then(|m| m.get(c)).unwrap_or(&Value::Null))
            .collect();
        let args = serde_json::to_string(&values)
            .map_err(|e| Error::Other(anyhow::anyhow!("serializing execute args: {e}")))?;
        out.push_str(&format!("EXECUTE {hash}{args};\n"));
    }
    out.push_str(&format!("DEALLOCATE {hash};\n"));
    Ok(out)
}

fn render_single(event: &ChangeEvent) -> Result<String, Error> {
    match event.action {
        Action::Insert => render_insert(event),
        Action::Update => render_update(event),
        Action::Delete => render_delete(event),
        Action::Truncate => render_truncate(event),
        _ => Ok(String::new()),
    }
}

fn render_insert(event: &ChangeEvent) -> Result<String, Error> {
    let (schema, table) = require_relation(event)?;
    let columns = event.columns.as_ref().cloned().unwrap_or_default();
    let col_list = columns
        .keys()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let value_list = columns
        .values()
        .map(sql_literal)
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "INSERT INTO {}.{} ({col_list}) VALUES ({value_list});\n",
        quote_ident(&schema),
        quote_ident(&table)
    ))
}

fn render_update(event: &ChangeEvent) -> Result<String, Error> {
    let (schema, table) = require_relation(event)?;
    let columns = event.columns.as_ref().cloned().unwrap_or_default();
    let sets = columns
        .iter()
        .map(|(c, v)| format!("{} = {}", quote_ident(c), sql_literal(v)))
        .collect::<Vec<_>>()
        .join(", ");
    let where_clause = render_where(event);
    Ok(format!(
        "UPDATE {}.{} SET {sets} WHERE {where_clause};\n",
        quote_ident(&schema),
        quote_ident(&table)
    ))
}

fn render_delete(event: &ChangeEvent) -> Result<String, Error> {
    let (schema, table) = require_relation(event)?;
    let where_clause = render_where(event);
    Ok(format!(
        "DELETE FROM {}.{} WHERE {where_clause};\n",
        quote_ident(&schema),
        quote_ident(&table)
    ))
}

fn render_truncate(event: &ChangeEvent) -> Result<String, Error> {
    let (schema, table) = require_relation(event)?;
    Ok(format!("TRUNCATE {}.{};\n", quote_ident(&schema), quote_ident(&table)))
}

fn render_where(event: &ChangeEvent) -> String {
    let keys = event.key_columns.as_ref().or(event.columns.as_ref());
    match keys {
        Some(m) if !m.is_empty() => m
            .iter()
            .map(|(c, v)| format!("{} = {}", quote_ident(c), sql_literal(v)))
            .collect::<Vec<_>>()
            .join(" AND "),
        _ => "true".to_string(),
    }
}

fn require_relation(event: &ChangeEvent) -> Result<(String, String), Error> {
    match (&event.schema, &event.table) {
        (Some(s), Some(t)) => Ok((s.clone(), t.clone())),
        _ => Err(Error::Other(anyhow::anyhow!(
            "CDC event missing schema/table: {event:?}"
        ))),
    }
}

fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// A short, stable name for the `PREPARE`d statement: table-qualified and
/// column-set-qualified so two different coalesced batches against the same
/// table never collide mid-transaction.
fn prepared_statement_hash(schema: &str, table: &str, columns: &[String]) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for part in [schema, table].into_iter().chain(columns.iter().map(String::as_str)) {
        for b in part.bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    format!("pgclone_{hash:016x}")
}

/// Reads `json_path`, transforms it, and writes the SQL batch to
/// `sql_path`, per spec.md §4.8's file-to-file prefetch-mode contract.
pub async fn transform_file(json_path: &Path, sql_path: &Path) -> Result<(), Error> {
    let json = tokio::fs::read_to_string(json_path)
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("reading {json_path:?}: {e}")))?;
    let sql = transform(&json)?;
    tokio::fs::write(sql_path, sql)
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("writing {sql_path:?}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(xid: u32, lsn: u64, table: &str, id: i64) -> ChangeEvent {
        let mut columns = serde_json::Map::new();
        columns.insert("id".into(), Value::from(id));
        ChangeEvent {
            action: Action::Insert,
            xid,
            lsn,
            nextlsn: None,
            schema: Some("public".into()),
            table: Some(table.into()),
            columns: Some(columns),
            key_columns: None,
        }
    }

    #[test]
    fn wraps_one_transaction_in_begin_commit_with_header() {
        let json = format!(
            "{}\n{}\n{}\n",
            serde_json::to_string(&ChangeEvent::begin(7, 100)).unwrap(),
            serde_json::to_string(&insert(7, 100, "rental", 1)).unwrap(),
            serde_json::to_string(&ChangeEvent::commit(7, 100, 200)).unwrap(),
        );
        let sql = transform(&json).unwrap();
        assert!(sql.starts_with("BEGIN; -- "));
        assert!(sql.contains("\"xid\":7"));
        assert!(sql.trim_end().ends_with("COMMIT; -- {\"xid\":7,\"lsn\":100}"));
    }

    #[test]
    fn coalesces_consecutive_same_table_inserts_into_prepare_execute() {
        let json = format!(
            "{}\n{}\n{}\n{}\n",
            serde_json::to_string(&ChangeEvent::begin(7, 100)).unwrap(),
            serde_json::to_string(&insert(7, 100, "rental", 1)).unwrap(),
            serde_json::to_string(&insert(7, 100, "rental", 2)).unwrap(),
            serde_json::to_string(&ChangeEvent::commit(7, 100, 200)).unwrap(),
        );
        let sql = transform(&json).unwrap();
        assert!(sql.contains("PREPARE pgclone_"));
        assert_eq!(sql.matches("EXECUTE pgclone_").count(), 2);
        assert!(sql.contains("DEALLOCATE"));
    }

    #[test]
    fn does_not_coalesce_a_single_insert() {
        let json = format!(
            "{}\n{}\n{}\n",
            serde_json::to_string(&ChangeEvent::begin(7, 100)).unwrap(),
            serde_json::to_string(&insert(7, 100, "rental", 1)).unwrap(),
            serde_json::to_string(&ChangeEvent::commit(7, 100, 200)).unwrap(),
        );
        let sql = transform(&json).unwrap();
        assert!(sql.contains("INSERT INTO \"public\".\"rental\""));
        assert!(!sql.contains("PREPARE"));
    }
}
