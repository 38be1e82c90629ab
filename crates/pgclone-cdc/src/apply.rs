//! CDC apply (spec.md §4.9): executes SQL batch files (or a live pipe)
//! against the target inside one transaction per source transaction,
//! registering a replication origin and skipping any batch at or below the
//! origin's recorded progress so a crash-and-resume never double-applies.

use bytes::BytesMut;
use postgres_types::{IsNull, ToSql, Type};
use serde_json::Value;
use tokio_postgres::Client;
use tracing::info;

use pgclone_common::{Error, Lsn};

#[derive(Debug, Clone, serde::Deserialize)]
struct TxHeader {
    xid: u32,
    lsn: u64,
}

/// One parsed `BEGIN; -- {header} ... COMMIT; -- {header}` block from a SQL
/// batch file.
struct Transaction {
    header: TxHeader,
    statements: Vec<Statement>,
}

enum Statement {
    Raw(String),
    Prepare { hash: String, sql: String },
    Execute { hash: String, args: Vec<Value> },
    Deallocate,
}

/// Splits a SQL batch file's text into transactions without executing
/// anything; used by both `apply` and tests that check batch parsing.
fn parse_batch(sql: &str) -> Vec<Transaction> {
    let mut txs = Vec::new();
    let mut header: Option<TxHeader> = None;
    let mut statements = Vec::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("BEGIN; -- ") {
            header = serde_json::from_str(rest).ok();
            statements.clear();
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("COMMIT; -- ") {
            if let Some(h) = header.take() {
                let _: Result<TxHeader, _> = serde_json::from_str(rest);
                txs.push(Transaction {
                    header: h,
                    statements: std::mem::take(&mut statements),
                });
            }
            continue;
        }
        statements.push(parse_statement(trimmed));
    }
    txs
}

fn parse_statement(line: &str) -> Statement {
    if let Some(rest) = line.strip_prefix("PREPARE ") {
        if let Some((hash, sql)) = rest.split_once(" AS ") {
            return Statement::Prepare {
                hash: hash.trim().to_string(),
                sql: sql.trim_end_matches(';').to_string(),
            };
        }
    }
    if let Some(rest) = line.strip_prefix("EXECUTE ") {
        if let Some(bracket) = rest.find('[') {
            let hash = rest[..bracket].trim().to_string();
            let args_text = rest[bracket..].trim_end_matches(';');
            if let Ok(args) = serde_json::from_str::<Vec<Value>>(args_text) {
                return Statement::Execute { hash, args };
            }
        }
    }
    if line.starts_with("DEALLOCATE ") {
        return Statement::Deallocate;
    }
    Statement::Raw(line.to_string())
}

/// A JSON scalar wrapped to implement `ToSql` against whatever column type
/// Postgres infers for the prepared statement's placeholder -- the apply
/// engine binds `serde_json::Value`s from the batch file's `EXECUTE [...]`
/// argument list against a real client-prepared statement rather than
/// sending that array as literal SQL (spec.md §6: "not standard SQL, read
/// by the apply engine only").
struct JsonParam<'a>(&'a Value);

impl ToSql for JsonParam<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i.to_sql(ty, out)
                } else {
                    n.as_f64().unwrap_or_default().to_sql(ty, out)
                }
            }
            Value::String(s) => s.to_sql(ty, out),
            other => other.to_string().to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    postgres_types::to_sql_checked!();
}

/// Applies one already-parsed batch of transactions, skipping any whose
/// header LSN is at or below `origin_progress` (already-applied). Returns
/// the highest LSN actually applied, or `origin_progress` unchanged if every
/// transaction in the batch was skipped.
async fn apply_transactions(
    client: &Client,
    origin_name: &str,
    origin_progress: Lsn,
    txs: &[Transaction],
) -> Result<Lsn, Error> {
    let mut applied_through = origin_progress;
    for tx in txs {
        if Lsn(tx.header.lsn) <= origin_progress {
            info!(xid = tx.header.xid, lsn = tx.header.lsn, "skipping already-applied transaction");
            continue;
        }
        client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| Error::ApplyConflict(anyhow::anyhow!(e)))?;
        client
            .execute(
                "SELECT pg_replication_origin_xact_setup($1::pg_lsn, now())",
                &[&Lsn(tx.header.lsn).to_string()],
            )
            .await
            .map_err(|e| Error::ApplyConflict(anyhow::anyhow!(e)))?;

        if let Err(err) = run_statements(client, &tx.statements).await {
            client.batch_execute("ROLLBACK").await.ok();
            return Err(Error::ApplyConflict(anyhow::anyhow!(err)));
        }

        client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| Error::ApplyConflict(anyhow::anyhow!(e)))?;
        applied_through = Lsn(tx.header.lsn);
    }
    let _ = origin_name;
    Ok(applied_through)
}

async fn run_statements(client: &Client, statements: &[Statement]) -> Result<(), anyhow::Error> {
    let mut prepared: std::collections::HashMap<String, tokio_postgres::Statement> =
        std::collections::HashMap::new();
    for stmt in statements {
        match stmt {
            Statement::Raw(sql) => {
                client.batch_execute(sql).await?;
            }
            Statement::Prepare { hash, sql } => {
                let prepared_stmt = client.prepare(sql).await?;
                prepared.insert(hash.clone(), prepared_stmt);
            }
            Statement::Execute { hash, args } => {
                let prepared_stmt = prepared
                    .get(hash)
                    .ok_or_else(|| anyhow::anyhow!("EXECUTE referenced unknown statement {hash}"))?;
                let params: Vec<JsonParam> = args.iter().map(JsonParam).collect();
                let param_refs: Vec<&(dyn ToSql + Sync)> = params
                    .iter()
                    .map(|p| p as &(dyn ToSql + Sync))
                    .collect();
                client.execute(prepared_stmt, &param_refs).await?;
            }
            Statement::Deallocate => {
                prepared.clear();
            }
        }
    }
    Ok(())
}

/// Ensures the replication origin exists and the session is bound to it,
/// per spec.md §4.9: "registers a replication origin identified by a
/// configured node name." Idempotent across resumes.
pub async fn setup_origin(client: &Client, origin_name: &str) -> Result<Lsn, Error> {
    let existing = client
        .query_opt(
            "SELECT remote_lsn FROM pg_replication_origin_status WHERE external_id = $1",
            &[&origin_name],
        )
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("checking replication origin: {e}")))?;

    if existing.is_none() {
        client
            .execute("SELECT pg_replication_origin_create($1)", &[&origin_name])
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("creating replication origin: {e}")))?;
    }
    client
        .batch_execute(&format!(
            "SELECT pg_replication_origin_session_setup('{}')",
            origin_name.replace('\'', "''")
        ))
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("binding session to replication origin: {e}")))?;

    let progress: Option<String> = client
        .query_opt("SELECT pg_replication_origin_session_progress(false)::text", &[])
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("reading replication origin progress: {e}")))?
        .and_then(|row| row.get(0));
    Ok(progress.and_then(|s| Lsn::parse(&s).ok()).unwrap_or(Lsn::ZERO))
}

/// Applies one SQL batch file's worth of transactions against `client`,
/// whose session must already be bound via [`setup_origin`]. Returns the new
/// origin progress.
pub async fn apply_batch(client: &Client, origin_name: &str, sql: &str, origin_progress: Lsn) -> Result<Lsn, Error> {
    let txs = parse_batch(sql);
    apply_transactions(client, origin_name, origin_progress, &txs).await
}

/// Drops the replication origin, per `stream cleanup`. Idempotent for the
/// same reason as [`crate::receive::drop_slot`].
pub async fn drop_origin(client: &Client, origin_name: &str) -> Result<(), Error> {
    match client.execute("SELECT pg_replication_origin_drop($1)", &[&origin_name]).await {
        Ok(_) => Ok(()),
        Err(e) if e.to_string().contains("does not exist") => Ok(()),
        Err(e) => Err(Error::Other(anyhow::anyhow!("dropping replication origin {origin_name}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_single_insert_transaction() {
        let sql = "BEGIN; -- {\"xid\":7,\"lsn\":100}\nINSERT INTO \"public\".\"rental\" (\"id\") VALUES (1);\nCOMMIT; -- {\"xid\":7,\"lsn\":100}\n";
        let txs = parse_batch(sql);
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].header.xid, 7);
        assert_eq!(txs[0].header.lsn, 100);
        assert_eq!(txs[0].statements.len(), 1);
    }

    #[test]
    fn parses_prepare_execute_deallocate_group() {
        let sql = "BEGIN; -- {\"xid\":1,\"lsn\":5}\n\
PREPARE pgclone_abc AS INSERT INTO t (a) VALUES ($1);\n\
EXECUTE pgclone_abc[1];\n\
EXECUTE pgclone_abc[2];\n\
DEALLOCATE pgclone_abc;\n\
COMMIT; -- {\"xid\":1,\"lsn\":5}\n";
        let txs = parse_batch(sql);
        assert_eq!(txs[0].statements.len(), 4);
        assert!(matches!(txs[0].statements[0], Statement::Prepare { .. }));
        assert!(matches!(txs[0].statements[1], Statement::Execute { .. }));
        assert!(matches!(txs[0].statements[3], Statement::Deallocate));
    }
}
