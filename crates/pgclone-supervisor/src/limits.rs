//! Concurrency limits for each worker pool named in spec.md §4.1's process
//! tree, surfaced as CLI flags (`--jobs`, `--index-jobs`, `--lo-jobs`).

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub table_jobs: usize,
    pub index_jobs: usize,
    pub vacuum_jobs: usize,
    pub lo_jobs: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            table_jobs: 4,
            index_jobs: 4,
            vacuum_jobs: 4,
            lo_jobs: 2,
        }
    }
}
