//! Sequence resync worker (spec.md §4.5): reads current positions from the
//! source and sets the same on the target. Runs once, in parallel with the
//! copy phase for a plain `clone`, and once more at CDC `endpos` when
//! `--follow` is active (spec.md §5, ordering guarantee 4) -- callers decide
//! when to invoke this; the function itself is timing-agnostic.

use pgclone_catalog::{CatalogSet, QualifiedName, Sequence};
use pgclone_common::Error;
use pgclone_pgutil::conn;
use tracing::info;

pub async fn resync_sequence(target_uri: &str, seq: &Sequence) -> Result<(), Error> {
    let client = conn::connect(target_uri).await?;
    let sql = format!(
        "SELECT setval('\"{}\".\"{}\"', $1, $2)",
        seq.name.schema.replace('"', "\"\""),
        seq.name.name.replace('"', "\"\"")
    );
    client
        .execute(&sql, &[&seq.last_value, &seq.is_called])
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("resyncing sequence {}: {e}", seq.name)))?;
    Ok(())
}

/// Resyncs every sequence recorded in the source catalog against the
/// target, recording one Progress row per sequence.
pub async fn resync_all(target_uri: &str, catalogs: &CatalogSet) -> Result<(), Error> {
    let sequences = catalogs.source.list_sequences()?;
    for seq in &sequences {
        let work_id = format!("sequence.{}", seq.oid.0);
        let mut progress = pgclone_catalog::Progress::queued(work_id);
        progress.mark_running();
        catalogs.source.put_progress(&progress)?;

        match resync_sequence(target_uri, seq).await {
            Ok(()) => {
                progress.mark_done(0);
                catalogs.source.put_progress(&progress)?;
            }
            Err(err) => {
                progress.mark_failed(err.to_string());
                catalogs.source.put_progress(&progress)?;
                return Err(err);
            }
        }
    }
    info!(count = sequences.len(), "sequence resync complete");
    Ok(())
}

#[allow(dead_code)]
fn qualify(name: &QualifiedName) -> String {
    format!("{}.{}", name.schema, name.name)
}
