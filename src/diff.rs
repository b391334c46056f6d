//! Unified diff rendering for rename previews.
//!
//! Each patched cell is shown as one file (`a/<ref>` / `b/<ref>`) and each
//! edited line as a one-line hunk. Alias rewrites never add or remove line
//! breaks, so a line number means the same line before and after.

use std::collections::BTreeSet;

use pondnote_core::rename::RenamePreview;
use pondnote_core::text::line_text;
use pondnote_core::Cell;

/// Render `preview` against the cells it was computed from.
///
/// Patches for cells missing from `cells` are skipped.
pub fn generate_unified_diff(cells: &[Cell], preview: &RenamePreview) -> String {
    let mut diff = String::new();
    for patch in &preview.patches {
        let Some(cell) = cells.iter().find(|cell| cell.id == patch.cell_id) else {
            continue;
        };
        let label = cell.stable_ref().as_str();
        diff.push_str(&format!("--- a/{}\n", label));
        diff.push_str(&format!("+++ b/{}\n", label));

        let lines: BTreeSet<u32> = patch.edits.iter().map(|edit| edit.line).collect();
        for line in lines {
            let old = line_text(&cell.content, line).unwrap_or_default();
            let new = line_text(&patch.new_content, line).unwrap_or_default();
            diff.push_str(&format!("@@ -{},1 +{},1 @@\n", line, line));
            diff.push_str(&format!("-{}\n", old));
            diff.push_str(&format!("+{}\n", new));
        }
    }
    diff
}

// ============================================================================
// Tests
// ============================================================================
