//! Schema inspector and work planner (spec.md §4.2): queries the source
//! catalog for tables, indexes, sequences, large objects and extensions,
//! applies the filter file, decides per-table partitioning, and materializes
//! the work plan into the catalog.

pub mod filter;
pub mod partition;
pub mod planner;

pub use filter::FilterFile;
pub use planner::{PlannerOptions, inspect, order_tables_by_descending_rows};
