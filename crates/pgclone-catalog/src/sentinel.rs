use pgclone_common::{Error, Lsn};

use crate::model::{ApplyMode, Sentinel};
use crate::store::Catalog;

/// The five sentinel operations named in spec.md §4.10/§6
/// (`stream sentinel get|set startpos|endpos|apply|prefetch`), implemented
/// against the target catalog's sentinel row.
pub struct SentinelControl<'a> {
    catalog: &'a Catalog,
}

impl<'a> SentinelControl<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        SentinelControl { catalog }
    }

    pub fn get(&self) -> Result<Sentinel, Error> {
        Ok(self.catalog.read_sentinel()?)
    }

    pub fn set_startpos(&self, lsn: Lsn) -> Result<Sentinel, Error> {
        Ok(self.catalog.update_sentinel(|s| s.startpos = Some(lsn.0))?)
    }

    /// `endpos` may be an absolute LSN or the "current source WAL position"
    /// at the moment the command runs, per spec.md §6; callers resolve
    /// `--current` to a concrete `Lsn` before calling this (the receiver has
    /// no notion of "current" on its own).
    pub fn set_endpos(&self, lsn: Lsn) -> Result<Sentinel, Error> {
        Ok(self.catalog.update_sentinel(|s| s.endpos = Some(lsn.0))?)
    }

    pub fn set_apply(&self) -> Result<Sentinel, Error> {
        Ok(self.catalog.update_sentinel(|s| s.apply = ApplyMode::Apply)?)
    }

    pub fn set_prefetch(&self) -> Result<Sentinel, Error> {
        Ok(self
            .catalog
            .update_sentinel(|s| s.apply = ApplyMode::Prefetch)?)
    }

    /// Records newly observed `write`/`flush`/`replay` LSNs, enforcing
    /// invariant 4 (spec.md §3): the three stay monotonically
    /// non-decreasing and ordered `replay <= flush <= write`.
    pub fn advance_lsns(&self, write: Lsn, flush: Lsn, replay: Lsn) -> Result<Sentinel, Error> {
        Ok(self.catalog.update_sentinel(|s| {
            s.write_lsn = s.write_lsn.max(write.0);
            s.flush_lsn = s.flush_lsn.max(flush.0).min(s.write_lsn);
            s.replay_lsn = s.replay_lsn.max(replay.0).min(s.flush_lsn);
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_lsns_never_moves_backward() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("sentinel.db")).unwrap();
        let control = SentinelControl::new(&catalog);
        control.advance_lsns(Lsn(300), Lsn(200), Lsn(100)).unwrap();
        let sentinel = control.advance_lsns(Lsn(50), Lsn(50), Lsn(50)).unwrap();
        assert_eq!(sentinel.write_lsn, 300);
        assert_eq!(sentinel.flush_lsn, 200);
        assert_eq!(sentinel.replay_lsn, 100);
        assert!(sentinel.is_consistent());
    }

    #[test]
    fn advance_lsns_clamps_mis_ordered_input_to_stay_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("sentinel.db")).unwrap();
        let control = SentinelControl::new(&catalog);
        // A caller passing replay/flush ahead of write must not be allowed to
        // persist a state violating invariant 4.
        let sentinel = control.advance_lsns(Lsn(100), Lsn(300), Lsn(500)).unwrap();
        assert_eq!(sentinel.write_lsn, 100);
        assert_eq!(sentinel.flush_lsn, 100);
        assert_eq!(sentinel.replay_lsn, 100);
        assert!(sentinel.is_consistent());
    }
}
