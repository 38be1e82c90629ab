//! Small pieces shared by more than one command module: building the CDC
//! receiver's options from CLI flags and opening/overwriting the on-disk
//! Setup row the way spec.md §3/§7 describe.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pgclone_catalog::{CatalogSet, Setup};
use pgclone_common::{CatalogError, Error, Lsn};
use pgclone_inspect::FilterFile;

use crate::cli::FollowArgs;

pub fn segment_dir(dir: &Path) -> PathBuf {
    dir.join("cdc")
}

/// Standby status updates default to the same 10s interval `walreceiver` uses; operators
/// who need tighter WAL recycling can't currently override it from the CLI (not named in
/// spec.md §6's environment-variable list).
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);

/// Builds the receiver's options from a `follow`/`stream` invocation's shared flags.
/// `timeline` is fixed at 1: spec.md never discusses multi-timeline sources (post-failover
/// promotion), and `pgclone-cdc`'s receiver does not query `IDENTIFY_SYSTEM` for it, so a
/// source that has been through a timeline switch needs an explicit follow-up feature.
pub fn receive_options(dir: &Path, args: &FollowArgs, startpos: Option<Lsn>) -> pgclone_cdc::receive::ReceiveOptions {
    pgclone_cdc::receive::ReceiveOptions {
        plugin: args.plugin.clone(),
        slot_name: args.slot_name.clone(),
        timeline: 1,
        heartbeat_interval: DEFAULT_HEARTBEAT,
        segment_dir: segment_dir(dir),
        startpos,
        endpos: args.endpos,
    }
}

/// Writes (or confirms) the Setup row for a run, mapping the catalog's `SetupMismatch` onto
/// the *ConfigMismatch* error kind named in spec.md §7.
pub fn write_setup(catalogs: &CatalogSet, setup: &Setup, allow_overwrite: bool) -> Result<(), Error> {
    catalogs.source.write_setup(setup, allow_overwrite).map_err(|e| match e {
        CatalogError::SetupMismatch => Error::ConfigMismatch(
            "working directory already has a different run configured; pass --restart or --resume".to_string(),
        ),
        other => Error::Catalog(other),
    })
}

pub fn load_filters(path: Option<&std::path::Path>) -> Result<FilterFile, Error> {
    match path {
        Some(p) => FilterFile::load(p),
        None => Ok(FilterFile::empty()),
    }
}
