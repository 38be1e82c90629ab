//! The end-of-run summary report (spec.md §6: every command prints a final
//! summary of what it did), rendered as a table over every `Progress` row in
//! the source catalog.

use comfy_table::{Table as ComfyTable, presets::UTF8_FULL};
use pgclone_catalog::{CatalogSet, ProgressState};
use pgclone_common::Error;

pub fn render(catalogs: &CatalogSet) -> Result<String, Error> {
    let mut rows = catalogs.source.list_progress()?;
    rows.sort_by(|a, b| a.work_item_id.cmp(&b.work_item_id));

    let mut table = ComfyTable::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["work item", "state", "bytes", "error"]);
    for row in &rows {
        let state = match row.state {
            ProgressState::Queued => "queued",
            ProgressState::Running => "running",
            ProgressState::Done => "done",
            ProgressState::Failed => "failed",
        };
        table.add_row(vec![
            row.work_item_id.clone(),
            state.to_string(),
            row.bytes_transferred.to_string(),
            row.last_error.clone().unwrap_or_default(),
        ]);
    }
    Ok(table.to_string())
}

/// `(total, done, failed)` counts, used for the process exit code: any
/// failed work item makes the overall run exit non-zero even though
/// individual failures don't abort siblings.
pub fn counts(catalogs: &CatalogSet) -> Result<(usize, usize, usize), Error> {
    let rows = catalogs.source.list_progress()?;
    let done = rows.iter().filter(|p| p.state == ProgressState::Done).count();
    let failed = rows.iter().filter(|p| p.state == ProgressState::Failed).count();
    Ok((rows.len(), done, failed))
}
