//! The process supervisor (spec.md §4.1): builds the work plan, spawns the
//! table-copy/index/vacuum/large-object/sequence worker tree for
//! `clone`/`fork`, wires up the CDC pipeline for `--follow`/`stream`, and
//! renders the end-of-run summary.

pub mod follow;
pub mod limits;
pub mod plan;
pub mod signals;
pub mod summary;
pub mod supervisor;

pub use limits::Limits;
pub use plan::WorkPlan;
pub use supervisor::{RunOptions, run};
