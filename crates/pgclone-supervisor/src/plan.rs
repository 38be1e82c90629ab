//! Builds the in-memory work plan the worker pools drain from: tables
//! ordered by descending estimated rows (spec.md §4.1's scheduling policy),
//! each table's parts and indexes, the sequence list, and large objects.

use std::collections::HashMap;

use pgclone_catalog::{CatalogSet, Index, LargeObject, Sequence, Table, TablePart};
use pgclone_common::Error;
use pgclone_inspect::planner::order_tables_by_descending_rows;

pub struct WorkPlan {
    pub tables: Vec<Table>,
    pub parts_by_table: HashMap<u32, Vec<TablePart>>,
    pub indexes_by_table: HashMap<u32, Vec<Index>>,
    pub sequences: Vec<Sequence>,
    pub large_objects: Vec<LargeObject>,
}

impl WorkPlan {
    pub fn load(catalogs: &CatalogSet) -> Result<Self, Error> {
        let tables = order_tables_by_descending_rows(catalogs.source.list_tables()?);
        let mut parts_by_table = HashMap::new();
        let mut indexes_by_table = HashMap::new();
        for table in &tables {
            parts_by_table.insert(table.oid.0, catalogs.source.list_parts_for_table(table)?);
            indexes_by_table.insert(table.oid.0, catalogs.source.list_indexes_for_table(table.oid.0)?);
        }
        let sequences = catalogs.source.list_sequences()?;
        let large_objects = catalogs.source.list_large_objects()?;
        Ok(WorkPlan {
            tables,
            parts_by_table,
            indexes_by_table,
            sequences,
            large_objects,
        })
    }

    pub fn total_parts(&self) -> usize {
        self.parts_by_table.values().map(Vec::len).sum()
    }
}
