//! `ping` (spec.md §6): connect-check against source and target with bounded
//! retry jitter, used by operators to validate connection strings before
//! committing to a multi-hour clone.

use std::time::Duration;

use pgclone_common::retry::{retry, Backoff};
use pgclone_pgutil::conn;

use crate::cli::PingArgs;

pub async fn run(args: PingArgs) -> anyhow::Result<i32> {
    let source_ok = ping_one("source", &args.conn.source).await;
    let target_ok = ping_one("target", &args.conn.target).await;
    Ok(if source_ok && target_ok { 0 } else { 1 })
}

async fn ping_one(label: &str, uri: &str) -> bool {
    let backoff = Backoff::new(Duration::from_millis(200), Duration::from_secs(5), 3);
    match retry(backoff, || async { conn::connect(uri).await }).await {
        Ok(_) => {
            println!("{label}: ok");
            true
        }
        Err(err) => {
            println!("{label}: failed ({err})");
            false
        }
    }
}
