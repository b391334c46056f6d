//! Rename refactor previews.
//!
//! Renaming a cell's alias (or clearing it) changes the name other cells
//! must use to read its result. [`preview_notebook_alias_rename_refactor`]
//! computes the content patches that keep those cells pointing at the same
//! cell. It never mutates anything; controllers decide whether to apply the
//! patches.
//!
//! Each consumer cell is split into statements and rewritten span by span.
//! When the splitter rejects a cell (for example an unterminated string) the
//! whole content is rewritten as one span with the same tokenizer and the
//! preview's `parser_fallback_count` goes up by one.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cell::{Cell, CellId};
use crate::naming::{normalize_cell_name, validate_cell_name, CellNameError};
use crate::references::{rewrite_name_occurrences, IdentifierStyle};
use crate::scan::Span;
use crate::statement::{ScriptSplitter, StatementSpan, StatementSplitter};
use crate::text::byte_offset_to_position;

/// Reasons a rename preview cannot be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenameError {
    #[error("cell not found: {cell_id}")]
    CellNotFound { cell_id: CellId },

    #[error("cell {cell_id} is not a SQL cell")]
    NotSqlCell { cell_id: CellId },

    #[error(transparent)]
    InvalidName(#[from] CellNameError),
}

/// A single rewritten occurrence inside a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameEdit {
    /// Byte range in the cell's current content.
    pub span: Span,
    pub old_text: String,
    pub new_text: String,
    pub style: IdentifierStyle,
    /// 1-indexed line of the occurrence.
    pub line: u32,
    /// 1-indexed column (chars) of the occurrence.
    pub col: u32,
}

/// New content for one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellContentPatch {
    pub cell_id: CellId,
    pub new_content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edits: Vec<RenameEdit>,
}

impl CellContentPatch {
    pub fn new(cell_id: impl Into<CellId>, new_content: impl Into<String>) -> Self {
        CellContentPatch {
            cell_id: cell_id.into(),
            new_content: new_content.into(),
            edits: Vec::new(),
        }
    }
}

/// Outcome of a rename preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenamePreview {
    /// Only cells whose content changes, in notebook order.
    pub patches: Vec<CellContentPatch>,
    /// The name references now use: the new alias, or the source cell's
    /// stable ref when the alias is cleared.
    pub replacement_name: String,
    /// The name references used before.
    pub previous_name: String,
    /// Cells rewritten without statement splitting.
    pub parser_fallback_count: usize,
}

impl RenamePreview {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn edit_count(&self) -> usize {
        self.patches.iter().map(|patch| patch.edits.len()).sum()
    }
}

/// Preview the patches needed to rename `source_cell_id`'s alias to
/// `new_name` (`None` or blank clears it), using the built-in splitter.
pub fn preview_notebook_alias_rename_refactor(
    cells: &[Cell],
    source_cell_id: &CellId,
    new_name: Option<&str>,
) -> Result<RenamePreview, RenameError> {
    preview_rename_with_splitter(cells, source_cell_id, new_name, &ScriptSplitter)
}

/// [`preview_notebook_alias_rename_refactor`] with a caller-supplied
/// statement splitter.
pub fn preview_rename_with_splitter(
    cells: &[Cell],
    source_cell_id: &CellId,
    new_name: Option<&str>,
    splitter: &dyn StatementSplitter,
) -> Result<RenamePreview, RenameError> {
    let source = cells
        .iter()
        .find(|cell| &cell.id == source_cell_id)
        .ok_or_else(|| RenameError::CellNotFound {
            cell_id: source_cell_id.clone(),
        })?;
    if !source.is_sql() {
        return Err(RenameError::NotSqlCell {
            cell_id: source_cell_id.clone(),
        });
    }

    let replacement_name = match normalize_cell_name(new_name) {
        Some(name) => {
            validate_cell_name(&name)?;
            name
        }
        None => source.stable_ref().to_string(),
    };
    let previous_name = source.effective_name().to_string();

    let mut preview = RenamePreview {
        patches: Vec::new(),
        replacement_name,
        previous_name,
        parser_fallback_count: 0,
    };
    if preview.previous_name == preview.replacement_name {
        return Ok(preview);
    }

    let mut consumers: Vec<&Cell> = cells
        .iter()
        .filter(|cell| cell.is_sql() && &cell.id != source_cell_id)
        .collect();
    consumers.sort_by_key(|cell| cell.order);

    for cell in consumers {
        let (patch, fell_back) = rewrite_cell(
            cell,
            &preview.previous_name,
            &preview.replacement_name,
            splitter,
        );
        if fell_back {
            preview.parser_fallback_count += 1;
        }
        if let Some(patch) = patch {
            preview.patches.push(patch);
        }
    }

    debug!(
        source = %source_cell_id,
        from = %preview.previous_name,
        to = %preview.replacement_name,
        patches = preview.patches.len(),
        fallbacks = preview.parser_fallback_count,
        "rename preview"
    );
    Ok(preview)
}

/// Rewrite one cell. Returns the patch (if the content changes) and whether
/// the splitter fallback was used.
fn rewrite_cell(
    cell: &Cell,
    old_name: &str,
    new_name: &str,
    splitter: &dyn StatementSplitter,
) -> (Option<CellContentPatch>, bool) {
    let content = cell.content.as_str();
    let checked = splitter
        .split(content)
        .map_err(|err| err.to_string())
        .and_then(|statements| checked_spans(content, &statements));
    let (spans, fell_back) = match checked {
        Ok(spans) => (spans, false),
        Err(reason) => {
            debug!(cell = %cell.id, %reason, "splitter failed, rewriting whole cell");
            (vec![Span::new(0, content.len())], true)
        }
    };

    let mut new_content = String::with_capacity(content.len());
    let mut edits = Vec::new();
    let mut cursor = 0;
    for span in spans {
        let (rewritten, replacements) =
            rewrite_name_occurrences(&content[span.start..span.end], old_name, new_name);
        if replacements.is_empty() {
            continue;
        }
        new_content.push_str(&content[cursor..span.start]);
        new_content.push_str(&rewritten);
        cursor = span.end;
        for replacement in replacements {
            let absolute = replacement.span.offset_by(span.start);
            let (line, col) = byte_offset_to_position(content, absolute.start);
            edits.push(RenameEdit {
                span: absolute,
                old_text: replacement.old_text,
                new_text: replacement.new_text,
                style: replacement.style,
                line,
                col,
            });
        }
    }

    if edits.is_empty() {
        return (None, fell_back);
    }
    new_content.push_str(&content[cursor..]);
    let patch = CellContentPatch {
        cell_id: cell.id.clone(),
        new_content,
        edits,
    };
    (Some(patch), fell_back)
}

/// Statement spans must be ordered, non-overlapping and lie on char
/// boundaries inside `content`; anything else is treated as a split failure.
fn checked_spans(content: &str, statements: &[StatementSpan]) -> Result<Vec<Span>, String> {
    let mut spans = Vec::with_capacity(statements.len());
    let mut cursor = 0;
    for statement in statements {
        let (start, end) = (statement.start, statement.end);
        if start > end || end > content.len() {
            return Err(format!("span {}..{} is out of range", start, end));
        }
        if start < cursor {
            return Err(format!("span {}..{} overlaps the previous statement", start, end));
        }
        if !content.is_char_boundary(start) || !content.is_char_boundary(end) {
            return Err(format!("span {}..{} splits a character", start, end));
        }
        spans.push(Span::new(start, end));
        cursor = end;
    }
    Ok(spans)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{SplitError, StatementKind};

    fn rename(
        cells: &[Cell],
        source: &str,
        new_name: Option<&str>,
    ) -> Result<RenamePreview, RenameError> {
        preview_notebook_alias_rename_refactor(cells, &source.into(), new_name)
    }

    fn notebook() -> Vec<Cell> {
        vec![
            Cell::sql("source", "SELECT 1 AS id")
                .with_name("old_alias")
                .with_order(0),
            Cell::sql(
                "consumer",
                "SELECT * FROM old_alias;\n-- old_alias note\nSELECT 'old_alias' AS s, \"old_alias\" AS q",
            )
            .with_order(1),
            Cell::sql("unrelated", "SELECT 42").with_order(2),
        ]
    }

    struct AlwaysFails;

    impl StatementSplitter for AlwaysFails {
        fn split(&self, _sql: &str) -> Result<Vec<StatementSpan>, SplitError> {
            Err(SplitError::Failed {
                message: "unsupported".into(),
            })
        }
    }

    mod preview {
        use super::*;

        #[test]
        fn rewrites_from_clause_and_quoted_identifier() {
            let preview = rename(&notebook(), "source", Some("new_alias")).unwrap();
            assert_eq!(preview.replacement_name, "new_alias");
            assert_eq!(preview.previous_name, "old_alias");
            assert_eq!(preview.parser_fallback_count, 0);
            assert_eq!(preview.patches.len(), 1);

            let patch = &preview.patches[0];
            assert_eq!(patch.cell_id.as_str(), "consumer");
            assert_eq!(
                patch.new_content,
                "SELECT * FROM new_alias;\n-- old_alias note\nSELECT 'old_alias' AS s, \"new_alias\" AS q"
            );
            assert_eq!(patch.edits.len(), 2);
            assert_eq!((patch.edits[0].line, patch.edits[0].col), (1, 15));
            assert_eq!(patch.edits[1].style, IdentifierStyle::Quoted);
            assert_eq!(patch.edits[1].line, 3);
        }

        #[test]
        fn clearing_alias_uses_stable_ref() {
            for cleared in [None, Some(""), Some("   ")] {
                let preview = rename(&notebook(), "source", cleared).unwrap();
                assert_eq!(preview.replacement_name, "__pp_cell_source");
                assert!(preview.patches[0]
                    .new_content
                    .starts_with("SELECT * FROM __pp_cell_source;"));
            }
        }

        #[test]
        fn naming_an_unnamed_cell_rewrites_its_ref() {
            let cells = vec![
                Cell::sql("src", "SELECT 1"),
                Cell::sql("use", "SELECT * FROM __pp_cell_src").with_order(1),
            ];
            let preview = rename(&cells, "src", Some("named")).unwrap();
            assert_eq!(preview.previous_name, "__pp_cell_src");
            assert_eq!(preview.patches[0].new_content, "SELECT * FROM named");
        }

        #[test]
        fn unchanged_cells_are_not_patched() {
            let preview = rename(&notebook(), "source", Some("x")).unwrap();
            assert!(preview
                .patches
                .iter()
                .all(|patch| patch.cell_id.as_str() != "unrelated"));
        }

        #[test]
        fn same_name_is_empty_preview() {
            let preview = rename(&notebook(), "source", Some("old_alias")).unwrap();
            assert!(preview.is_empty());
        }

        #[test]
        fn does_not_touch_source_or_markdown() {
            let cells = vec![
                Cell::sql("source", "SELECT * FROM old_alias").with_name("old_alias"),
                Cell::markdown("notes", "old_alias is great").with_order(1),
            ];
            let preview = rename(&cells, "source", Some("fresh")).unwrap();
            assert!(preview.is_empty());
        }

        #[test]
        fn input_is_not_mutated() {
            let cells = notebook();
            let before = cells.clone();
            let _ = rename(&cells, "source", Some("n"));
            assert_eq!(cells, before);
        }
    }

    /// Returns the same spans for every input.
    struct FixedSpans(Vec<(usize, usize)>);

    impl StatementSplitter for FixedSpans {
        fn split(&self, sql: &str) -> Result<Vec<StatementSpan>, SplitError> {
            Ok(self
                .0
                .iter()
                .map(|&(start, end)| StatementSpan {
                    code: sql.get(start..end).unwrap_or_default().to_string(),
                    start,
                    end,
                    kind: StatementKind::Select,
                })
                .collect())
        }
    }

    fn two_reads() -> Vec<Cell> {
        vec![
            Cell::sql("source", "SELECT 1").with_name("t"),
            Cell::sql("consumer", "SELECT * FROM t; SELECT * FROM t").with_order(1),
        ]
    }

    mod fallback {
        use super::*;

        fn rename_with(splitter: &FixedSpans) -> RenamePreview {
            preview_rename_with_splitter(&two_reads(), &"source".into(), Some("u"), splitter)
                .unwrap()
        }

        #[test]
        fn overlapping_spans_rewrite_whole_cell() {
            let preview = rename_with(&FixedSpans(vec![(0, 15), (5, 32)]));
            assert_eq!(preview.parser_fallback_count, 1);
            assert_eq!(preview.patches[0].new_content, "SELECT * FROM u; SELECT * FROM u");
            assert_eq!(preview.patches[0].edits.len(), 2);
        }

        #[test]
        fn inverted_span_rewrites_whole_cell() {
            let preview = rename_with(&FixedSpans(vec![(15, 0)]));
            assert_eq!(preview.parser_fallback_count, 1);
            assert_eq!(preview.patches[0].new_content, "SELECT * FROM u; SELECT * FROM u");
        }

        #[test]
        fn out_of_range_span_rewrites_whole_cell() {
            let preview = rename_with(&FixedSpans(vec![(0, 15), (17, 400)]));
            assert_eq!(preview.parser_fallback_count, 1);
            assert_eq!(preview.patches[0].edits.len(), 2);
        }

        #[test]
        fn span_inside_a_character_rewrites_whole_cell() {
            let cells = vec![
                Cell::sql("source", "SELECT 1").with_name("t"),
                Cell::sql("consumer", "SELECT 'é' FROM t").with_order(1),
            ];
            let preview = preview_rename_with_splitter(
                &cells,
                &"source".into(),
                Some("u"),
                &FixedSpans(vec![(0, 9)]),
            )
            .unwrap();
            assert_eq!(preview.parser_fallback_count, 1);
            assert_eq!(preview.patches[0].new_content, "SELECT 'é' FROM u");
        }

        #[test]
        fn well_formed_spans_do_not_fall_back() {
            let preview = rename_with(&FixedSpans(vec![(0, 15), (17, 32)]));
            assert_eq!(preview.parser_fallback_count, 0);
            assert_eq!(preview.patches[0].new_content, "SELECT * FROM u; SELECT * FROM u");
        }

        #[test]
        fn splitter_failure_counts_and_still_rewrites() {
            let preview = preview_rename_with_splitter(
                &notebook(),
                &"source".into(),
                Some("new_alias"),
                &AlwaysFails,
            )
            .unwrap();
            // consumer and unrelated both fell back
            assert_eq!(preview.parser_fallback_count, 2);
            assert_eq!(preview.patches.len(), 1);
            assert!(preview.patches[0].new_content.contains("\"new_alias\""));
        }

        #[test]
        fn unterminated_string_uses_fallback() {
            let cells = vec![
                Cell::sql("source", "SELECT 1").with_name("t"),
                Cell::sql("broken", "SELECT * FROM t WHERE x = 'open").with_order(1),
            ];
            let preview = rename(&cells, "source", Some("u")).unwrap();
            assert_eq!(preview.parser_fallback_count, 1);
            assert_eq!(
                preview.patches[0].new_content,
                "SELECT * FROM u WHERE x = 'open"
            );
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn unknown_source() {
            let err = rename(&notebook(), "nope", Some("x")).unwrap_err();
            assert!(matches!(err, RenameError::CellNotFound { .. }));
        }

        #[test]
        fn invalid_name() {
            let err = rename(&notebook(), "source", Some("1bad")).unwrap_err();
            assert!(matches!(err, RenameError::InvalidName(CellNameError::InvalidSyntax { .. })));
        }

        #[test]
        fn reserved_prefix() {
            let err = rename(&notebook(), "source", Some("__PP_CELL_x")).unwrap_err();
            assert!(matches!(err, RenameError::InvalidName(CellNameError::ReservedPrefix { .. })));
        }

        #[test]
        fn markdown_source() {
            let cells = vec![Cell::markdown("m", "# hi")];
            let err = rename(&cells, "m", Some("x")).unwrap_err();
            assert!(matches!(err, RenameError::NotSqlCell { .. }));
        }
    }
}
