//! `follow`: CDC only, no base copy. Requires a Setup row already on disk
//! (from a prior `clone --follow` or `stream setup`) so the receiver knows
//! which slot and plugin to use.

use std::path::PathBuf;
use std::sync::Arc;

use pgclone_catalog::CatalogSet;
use pgclone_common::{Error, PidGuard, cancel};

use crate::cli::FollowArgs;
use crate::commands::support::{receive_options, segment_dir, write_setup};

pub async fn run(dir: PathBuf, args: FollowArgs) -> anyhow::Result<i32> {
    let _pid_guard = PidGuard::acquire(&dir)?;
    let catalogs = Arc::new(CatalogSet::open(&dir)?);
    let (cancel_handle, cancel_token) = cancel::channel();
    pgclone_supervisor::signals::install(cancel_handle);

    if let Some(existing) = catalogs.source.read_setup()? {
        let setup = pgclone_catalog::Setup {
            cdc_plugin: args.plugin.clone(),
            slot_name: args.slot_name.clone(),
            ..existing
        };
        write_setup(&catalogs, &setup, true)?;
    }

    let replication_uri = args.replication_uri.clone().unwrap_or_else(|| args.conn.source.clone());
    let follow_opts = pgclone_supervisor::follow::FollowOptions {
        replication_uri,
        target_uri: args.conn.target.clone(),
        segment_dir: segment_dir(&dir),
        origin_name: args.origin.clone(),
        receive: receive_options(&dir, &args, None),
    };

    match pgclone_supervisor::follow::run(Arc::clone(&catalogs), follow_opts, cancel_token).await {
        Ok(()) | Err(Error::EndposReached) => Ok(0),
        Err(Error::Cancelled) => Ok(0),
        Err(err) => {
            tracing::error!(%err, "follow did not complete cleanly");
            Ok(1)
        }
    }
}
