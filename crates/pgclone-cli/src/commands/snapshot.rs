//! `snapshot`: holds a single exported snapshot open until interrupted,
//! for operators who want to run the base copy themselves against a
//! snapshot pgclone keeps alive (spec.md §4.11).

use pgclone_common::cancel;
use pgclone_pgutil::SnapshotHolder;

use crate::cli::SnapshotArgs;

pub async fn run(args: SnapshotArgs) -> anyhow::Result<i32> {
    let (cancel_handle, cancel_token) = cancel::channel();
    pgclone_supervisor::signals::install(cancel_handle);

    let holder = SnapshotHolder::open(&args.source, cancel_token.clone()).await?;
    println!("{}", holder.snapshot_id());

    let mut token = cancel_token;
    while !token.is_draining() {
        token.changed().await.ok();
    }
    holder.stop().await?;
    Ok(0)
}
