use std::path::Path;

use pgclone_common::{CatalogError, Error};
use sled::Tree;

use crate::model::{
    CdcSegment, Constraint, Index, LargeObject, Progress, ProgressState, Sentinel, Sequence,
    Setup, Table, TablePart,
};

/// One of the three catalogs named in spec.md §3: *source*, *filters*, or
/// *target*. Each is its own sled database -- "one opaque, embedded
/// key-value/relational file per catalog."
pub struct Catalog {
    db: sled::Db,
}

const TREE_SETUP: &str = "setup";
const TREE_TABLES: &str = "tables";
const TREE_PARTS: &str = "table_parts";
const TREE_INDEXES: &str = "indexes";
const TREE_SEQUENCES: &str = "sequences";
const TREE_LARGE_OBJECTS: &str = "large_objects";
const TREE_PROGRESS: &str = "progress";
const TREE_SENTINEL: &str = "sentinel";
const TREE_SEGMENTS: &str = "cdc_segments";

const SETUP_KEY: &[u8] = b"setup";
const SENTINEL_KEY: &[u8] = b"sentinel";

impl Catalog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let db = sled::open(path)?;
        Ok(Catalog { db })
    }

    fn tree(&self, name: &str) -> Result<Tree, CatalogError> {
        Ok(self.db.open_tree(name)?)
    }

    fn get_typed<T: serde::de::DeserializeOwned>(
        &self,
        tree: &str,
        key: &[u8],
    ) -> Result<Option<T>, CatalogError> {
        let tree = self.tree(tree)?;
        match tree.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_typed<T: serde::Serialize>(
        &self,
        tree: &str,
        key: &[u8],
        value: &T,
    ) -> Result<(), CatalogError> {
        let tree = self.tree(tree)?;
        let bytes = bincode::serialize(value)?;
        tree.insert(key, bytes)?;
        Ok(())
    }

    fn scan_typed<T: serde::de::DeserializeOwned>(
        &self,
        tree: &str,
    ) -> Result<Vec<T>, CatalogError> {
        let tree = self.tree(tree)?;
        tree.iter()
            .values()
            .map(|v| v.map_err(CatalogError::from).and_then(|b| Ok(bincode::deserialize(&b)?)))
            .collect()
    }

    // -- Setup -----------------------------------------------------------

    /// Writes Setup once. Fails with `SetupMismatch` if a different Setup is
    /// already present and `allow_overwrite` is false, matching spec.md
    /// §7's `ConfigMismatch`/`--restart` contract (the supervisor maps
    /// `SetupMismatch` onto `Error::ConfigMismatch`).
    pub fn write_setup(&self, setup: &Setup, allow_overwrite: bool) -> Result<(), CatalogError> {
        if let Some(existing) = self.read_setup()? {
            if &existing != setup && !allow_overwrite {
                return Err(CatalogError::SetupMismatch);
            }
        }
        self.put_typed(TREE_SETUP, SETUP_KEY, setup)
    }

    pub fn read_setup(&self) -> Result<Option<Setup>, CatalogError> {
        self.get_typed(TREE_SETUP, SETUP_KEY)
    }

    pub fn clear(&self) -> Result<(), CatalogError> {
        for name in [
            TREE_SETUP,
            TREE_TABLES,
            TREE_PARTS,
            TREE_INDEXES,
            TREE_SEQUENCES,
            TREE_LARGE_OBJECTS,
            TREE_PROGRESS,
            TREE_SENTINEL,
            TREE_SEGMENTS,
        ] {
            self.db.drop_tree(name)?;
        }
        Ok(())
    }

    // -- Table / TablePart -------------------------------------------------

    pub fn put_table(&self, table: &Table) -> Result<(), CatalogError> {
        self.put_typed(TREE_TABLES, &table.oid.0.to_be_bytes(), table)
    }

    pub fn get_table(&self, oid: u32) -> Result<Option<Table>, CatalogError> {
        self.get_typed(TREE_TABLES, &oid.to_be_bytes())
    }

    pub fn list_tables(&self) -> Result<Vec<Table>, CatalogError> {
        self.scan_typed(TREE_TABLES)
    }

    pub fn put_part(&self, part: &TablePart) -> Result<(), CatalogError> {
        self.put_typed(TREE_PARTS, part.id.as_bytes(), part)
    }

    pub fn list_parts_for_table(&self, table: &Table) -> Result<Vec<TablePart>, CatalogError> {
        table
            .part_ids
            .iter()
            .filter_map(|id| {
                self.get_typed::<TablePart>(TREE_PARTS, id.as_bytes())
                    .transpose()
            })
            .collect()
    }

    // -- Index / Constraint -------------------------------------------------

    pub fn put_index(&self, index: &Index) -> Result<(), CatalogError> {
        self.put_typed(TREE_INDEXES, &index.oid.0.to_be_bytes(), index)
    }

    pub fn list_indexes_for_table(&self, table_oid: u32) -> Result<Vec<Index>, CatalogError> {
        Ok(self
            .scan_typed::<Index>(TREE_INDEXES)?
            .into_iter()
            .filter(|i| i.table_oid.0 == table_oid)
            .collect())
    }

    /// Promotes the backing index's constraint. Invariant 2 (spec.md §3):
    /// callers must check the index's Progress is `Done` before calling
    /// this -- enforced by the index worker pool, not here.
    pub fn set_constraint(&self, index_oid: u32, constraint: Constraint) -> Result<(), CatalogError> {
        let mut index: Index = self
            .get_typed(TREE_INDEXES, &index_oid.to_be_bytes())?
            .ok_or_else(|| CatalogError::NotFound(format!("index {index_oid}")))?;
        index.constraint = Some(constraint);
        self.put_index(&index)
    }

    // -- Sequence ----------------------------------------------------------

    pub fn put_sequence(&self, seq: &Sequence) -> Result<(), CatalogError> {
        self.put_typed(TREE_SEQUENCES, &seq.oid.0.to_be_bytes(), seq)
    }

    pub fn list_sequences(&self) -> Result<Vec<Sequence>, CatalogError> {
        self.scan_typed(TREE_SEQUENCES)
    }

    // -- LargeObject ---------------------------------------------------------

    pub fn put_large_object(&self, lo: &LargeObject) -> Result<(), CatalogError> {
        self.put_typed(TREE_LARGE_OBJECTS, &lo.oid.0.to_be_bytes(), lo)
    }

    pub fn list_large_objects(&self) -> Result<Vec<LargeObject>, CatalogError> {
        self.scan_typed(TREE_LARGE_OBJECTS)
    }

    // -- Progress ------------------------------------------------------------

    pub fn put_progress(&self, progress: &Progress) -> Result<(), CatalogError> {
        self.put_typed(TREE_PROGRESS, progress.work_item_id.as_bytes(), progress)
    }

    pub fn get_progress(&self, work_item_id: &str) -> Result<Option<Progress>, CatalogError> {
        self.get_typed(TREE_PROGRESS, work_item_id.as_bytes())
    }

    pub fn list_progress(&self) -> Result<Vec<Progress>, CatalogError> {
        self.scan_typed(TREE_PROGRESS)
    }

    /// Invariant 6 (spec.md §3): every `running -> done` transition for a
    /// TablePart strictly precedes enqueue of that table's indexes. Callers
    /// use this to gate enqueuing: true once every part of `table` reports
    /// `Done`.
    pub fn all_parts_done(&self, table: &Table) -> Result<bool, CatalogError> {
        for part_id in &table.part_ids {
            match self.get_progress(part_id)? {
                Some(p) if p.state == ProgressState::Done => continue,
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    // -- Sentinel ------------------------------------------------------------

    pub fn read_sentinel(&self) -> Result<Sentinel, CatalogError> {
        Ok(self
            .get_typed(TREE_SENTINEL, SENTINEL_KEY)?
            .unwrap_or_default())
    }

    /// All sentinel writes go through this single-row update, matching
    /// spec.md §5: "the sentinel is the only row-level shared mutable
    /// resource; all writes use one-at-a-time update semantics keyed by the
    /// single-row primary key." Callers supply a pure update closure so the
    /// read-modify-write stays atomic from the caller's point of view even
    /// though sled itself only guarantees per-key atomicity.
    pub fn update_sentinel(
        &self,
        f: impl FnOnce(&mut Sentinel),
    ) -> Result<Sentinel, CatalogError> {
        let tree = self.tree(TREE_SENTINEL)?;
        let mut current = self.read_sentinel()?;
        f(&mut current);
        let bytes = bincode::serialize(&current)?;
        tree.insert(SENTINEL_KEY, bytes)?;
        Ok(current)
    }

    // -- CDC segments --------------------------------------------------------

    pub fn put_segment(&self, segment: &CdcSegment) -> Result<(), CatalogError> {
        self.put_typed(TREE_SEGMENTS, segment.wal_segment.as_bytes(), segment)
    }

    pub fn get_segment(&self, wal_segment: &str) -> Result<Option<CdcSegment>, CatalogError> {
        self.get_typed(TREE_SEGMENTS, wal_segment.as_bytes())
    }

    pub fn list_segments(&self) -> Result<Vec<CdcSegment>, CatalogError> {
        self.scan_typed(TREE_SEGMENTS)
    }
}

/// The three catalogs for a run, per spec.md §3.
pub struct CatalogSet {
    pub source: Catalog,
    pub filters: Catalog,
    pub target: Catalog,
}

impl CatalogSet {
    pub fn open(working_dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = working_dir.as_ref().join("schema");
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Other(anyhow::anyhow!("creating {dir:?}: {e}")))?;
        Ok(CatalogSet {
            source: Catalog::open(dir.join("source.db"))?,
            filters: Catalog::open(dir.join("filters.db"))?,
            target: Catalog::open(dir.join("target.db"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApplyMode, Oid, ProgressState, QualifiedName, SplitKey};

    fn temp_catalog() -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("test.db")).unwrap();
        (dir, catalog)
    }

    #[test]
    fn setup_write_then_read_round_trips() {
        let (_dir, catalog) = temp_catalog();
        let setup = Setup {
            source_endpoint_id: "src".into(),
            target_endpoint_id: "tgt".into(),
            snapshot_id: "00000003-1".into(),
            cdc_plugin: "pgoutput".into(),
            slot_name: "pgclone".into(),
            split_threshold_bytes: Some(200_000),
            filter_fingerprint: "abc123".into(),
        };
        catalog.write_setup(&setup, false).unwrap();
        assert_eq!(catalog.read_setup().unwrap(), Some(setup));
    }

    #[test]
    fn mismatched_setup_is_rejected_without_overwrite() {
        let (_dir, catalog) = temp_catalog();
        let setup = Setup {
            source_endpoint_id: "src".into(),
            target_endpoint_id: "tgt".into(),
            snapshot_id: "snap1".into(),
            cdc_plugin: "pgoutput".into(),
            slot_name: "pgclone".into(),
            split_threshold_bytes: None,
            filter_fingerprint: "fp1".into(),
        };
        catalog.write_setup(&setup, false).unwrap();
        let mut other = setup.clone();
        other.snapshot_id = "snap2".into();
        let err = catalog.write_setup(&other, false).unwrap_err();
        assert!(matches!(err, CatalogError::SetupMismatch));
    }

    #[test]
    fn all_parts_done_reflects_progress_rows() {
        let (_dir, catalog) = temp_catalog();
        let table = Table {
            oid: Oid(1),
            name: QualifiedName {
                schema: "public".into(),
                name: "rental".into(),
            },
            estimated_rows: 16_044,
            size_bytes: 1_224_000,
            split_key: SplitKey::IntegerColumn("rental_id".into()),
            part_ids: vec!["rental.0".into(), "rental.1".into()],
            restore_list_name: "rental".into(),
        };
        catalog.put_table(&table).unwrap();
        assert!(!catalog.all_parts_done(&table).unwrap());

        for id in &table.part_ids {
            let mut p = Progress::queued(id.clone());
            p.mark_running();
            p.mark_done(1000);
            catalog.put_progress(&p).unwrap();
        }
        assert!(catalog.all_parts_done(&table).unwrap());
    }

    #[test]
    fn sentinel_updates_are_read_modify_write() {
        let (_dir, catalog) = temp_catalog();
        catalog
            .update_sentinel(|s| {
                s.apply = ApplyMode::Apply;
                s.write_lsn = 100;
            })
            .unwrap();
        let sentinel = catalog
            .update_sentinel(|s| {
                s.flush_lsn = 50;
            })
            .unwrap();
        assert_eq!(sentinel.apply, ApplyMode::Apply);
        assert_eq!(sentinel.write_lsn, 100);
        assert_eq!(sentinel.flush_lsn, 50);
    }
}
