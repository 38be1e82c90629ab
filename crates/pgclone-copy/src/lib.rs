//! The table-copy engine (spec.md §4.3-§4.6): worker pools for table parts,
//! indexes/constraints, vacuum, and large objects, plus the sequence resync
//! worker and the shared work queue they dequeue from.

pub mod index;
pub mod largeobject;
pub mod queue;
pub mod sequence;
pub mod table;
pub mod vacuum;

pub use table::{TableCopyOptions, copy_part, copy_part_and_record};
