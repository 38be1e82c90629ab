//! CLI-facing wrapper around `pgclone_catalog::SentinelControl` (spec.md
//! §4.10/§6): resolves `stream sentinel set endpos --current` against the
//! source's live WAL position before delegating to the catalog, since the
//! catalog layer has no notion of "current" on its own.

use pgclone_catalog::{CatalogSet, Sentinel};
use pgclone_common::{Error, Lsn};
use pgclone_pgutil::conn;

pub async fn get(catalogs: &CatalogSet) -> Result<Sentinel, Error> {
    pgclone_catalog::SentinelControl::new(&catalogs.target).get()
}

pub fn set_startpos(catalogs: &CatalogSet, lsn: Lsn) -> Result<Sentinel, Error> {
    pgclone_catalog::SentinelControl::new(&catalogs.target).set_startpos(lsn)
}

/// `endpos` may be an absolute LSN or the literal "current source WAL
/// position" at the moment the command runs (spec.md §6). `current` being
/// `true` means resolve against `source_uri` rather than using `lsn`.
pub async fn set_endpos(
    catalogs: &CatalogSet,
    source_uri: &str,
    lsn: Option<Lsn>,
    current: bool,
) -> Result<Sentinel, Error> {
    let resolved = if current {
        current_wal_position(source_uri).await?
    } else {
        lsn.ok_or_else(|| Error::Other(anyhow::anyhow!("set endpos requires an LSN or --current")))?
    };
    pgclone_catalog::SentinelControl::new(&catalogs.target).set_endpos(resolved)
}

pub fn set_apply(catalogs: &CatalogSet) -> Result<Sentinel, Error> {
    pgclone_catalog::SentinelControl::new(&catalogs.target).set_apply()
}

pub fn set_prefetch(catalogs: &CatalogSet) -> Result<Sentinel, Error> {
    pgclone_catalog::SentinelControl::new(&catalogs.target).set_prefetch()
}

async fn current_wal_position(source_uri: &str) -> Result<Lsn, Error> {
    let client = conn::connect(source_uri).await?;
    let row = client
        .query_one("SELECT pg_current_wal_lsn()::text", &[])
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("reading current WAL position: {e}")))?;
    let text: String = row.get(0);
    Lsn::parse(&text)
}
