//! `stream sentinel ...`: prints the sentinel row or forwards a remote-control
//! mutation to `pgclone_cdc::sentinel` (spec.md §4.10).

use std::path::Path;

use pgclone_catalog::{CatalogSet, Sentinel};

use crate::cli::SentinelCommand;

pub async fn run(dir: &Path, cmd: SentinelCommand) -> anyhow::Result<i32> {
    let catalogs = CatalogSet::open(dir)?;
    let sentinel = match cmd {
        SentinelCommand::Get => pgclone_cdc::sentinel::get(&catalogs).await?,
        SentinelCommand::SetStartpos { lsn } => pgclone_cdc::sentinel::set_startpos(&catalogs, lsn)?,
        SentinelCommand::SetEndpos { lsn, current, source } => {
            pgclone_cdc::sentinel::set_endpos(&catalogs, &source, lsn, current).await?
        }
        SentinelCommand::SetApply => pgclone_cdc::sentinel::set_apply(&catalogs)?,
        SentinelCommand::SetPrefetch => pgclone_cdc::sentinel::set_prefetch(&catalogs)?,
    };
    print_sentinel(&sentinel);
    Ok(0)
}

fn print_sentinel(s: &Sentinel) {
    println!("apply mode:   {:?}", s.apply);
    println!(
        "startpos:     {}",
        s.startpos.map(|l| format!("{:X}/{:X}", l >> 32, l & 0xffff_ffff)).unwrap_or_else(|| "-".to_string())
    );
    println!(
        "endpos:       {}",
        s.endpos.map(|l| format!("{:X}/{:X}", l >> 32, l & 0xffff_ffff)).unwrap_or_else(|| "-".to_string())
    );
    println!("write_lsn:    {:X}/{:X}", s.write_lsn >> 32, s.write_lsn & 0xffff_ffff);
    println!("flush_lsn:    {:X}/{:X}", s.flush_lsn >> 32, s.flush_lsn & 0xffff_ffff);
    println!("replay_lsn:   {:X}/{:X}", s.replay_lsn >> 32, s.replay_lsn & 0xffff_ffff);
}
