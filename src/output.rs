//! JSON output types for CLI responses.
//!
//! Every command prints exactly one JSON document to stdout. Responses start
//! with `status` and `schema_version`; errors use [`ErrorResponse`]. Maps are
//! `BTreeMap`s and lists come out in notebook order, so the same notebook
//! always produces identical bytes.

use std::collections::BTreeSet;
use std::io::{self, Write};

use serde::Serialize;

use pondnote_core::graph::{DependencyGraph, ExecutionPlan};
use pondnote_core::rename::RenamePreview;
use pondnote_core::{Cell, CellId};

use crate::controller::NameUpdate;
use crate::error::{NotebookError, OutputErrorCode};
use crate::notebook::Notebook;

/// Current schema version for all responses.
pub const SCHEMA_VERSION: &str = "1";

// ============================================================================
// Errors
// ============================================================================

/// Error information for error responses.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub code: u8,
    pub message: String,
    /// Error-specific structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorInfo {
    pub fn from_error(err: &NotebookError) -> Self {
        let code = OutputErrorCode::from(err).code();
        let details = match err {
            NotebookError::InvalidArguments { details, .. } => details.clone(),
            NotebookError::InvalidCellName { name, .. } => {
                Some(serde_json::json!({ "name": name }))
            }
            NotebookError::NotebookNotFound { notebook_id } => {
                Some(serde_json::json!({ "notebook_id": notebook_id }))
            }
            NotebookError::CellNotFound { cell_id } => {
                Some(serde_json::json!({ "cell_id": cell_id }))
            }
            NotebookError::FileNotFound { path } => Some(serde_json::json!({ "path": path })),
            NotebookError::ApplyError { key, .. } => {
                key.as_ref().map(|key| serde_json::json!({ "key": key }))
            }
            NotebookError::InternalError { .. } => None,
        };
        ErrorInfo {
            code,
            message: err.to_string(),
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Status: "error".
    pub status: String,
    pub schema_version: String,
    pub error: ErrorInfo,
}

impl ErrorResponse {
    pub fn from_error(err: &NotebookError) -> Self {
        ErrorResponse {
            status: "error".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            error: ErrorInfo::from_error(err),
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// One notebook in a `list` response.
#[derive(Debug, Clone, Serialize)]
pub struct NotebookSummary {
    pub notebook_id: String,
    pub name: String,
    pub cell_count: usize,
    pub updated_at: String,
}

impl NotebookSummary {
    pub fn from_notebook(notebook: &Notebook) -> Self {
        NotebookSummary {
            notebook_id: notebook.id.to_string(),
            name: notebook.name.clone(),
            cell_count: notebook.cells.len(),
            updated_at: notebook.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResponse {
    pub status: String,
    pub schema_version: String,
    pub notebooks: Vec<NotebookSummary>,
}

impl ListResponse {
    pub fn new(notebooks: Vec<NotebookSummary>) -> Self {
        ListResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            notebooks,
        }
    }
}

/// Response for `import`.
#[derive(Debug, Clone, Serialize)]
pub struct ImportResponse {
    pub status: String,
    pub schema_version: String,
    pub notebook_id: String,
    pub cell_count: usize,
    /// Aliases taken from `-- @name` annotations, in notebook order.
    pub named_cells: Vec<String>,
}

impl ImportResponse {
    pub fn new(notebook: &Notebook) -> Self {
        ImportResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            notebook_id: notebook.id.to_string(),
            cell_count: notebook.cells.len(),
            named_cells: notebook
                .ordered_cells()
                .iter()
                .filter_map(|cell| cell.name().map(str::to_string))
                .collect(),
        }
    }
}

/// One cell's row in a `graph` response.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub cell_id: CellId,
    #[serde(rename = "ref")]
    pub stable_ref: String,
    pub name: Option<String>,
    pub dependencies: Vec<CellId>,
    pub dependents: Vec<CellId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
}

/// Response for `graph`.
#[derive(Debug, Clone, Serialize)]
pub struct GraphResponse {
    pub status: String,
    pub schema_version: String,
    pub notebook_id: String,
    /// Reference strategies consulted, in order.
    pub strategies: Vec<String>,
    /// SQL cells in notebook order.
    pub cells: Vec<GraphNode>,
    /// Cells whose alias collides with another cell's.
    pub duplicate_name_cells: BTreeSet<CellId>,
    /// Cells on a dependency cycle.
    pub cycles: BTreeSet<CellId>,
    pub execution_order: ExecutionPlan,
}

impl GraphResponse {
    pub fn new(
        notebook: &Notebook,
        graph: &DependencyGraph,
        cycles: BTreeSet<CellId>,
        execution_order: ExecutionPlan,
        strategies: Vec<String>,
    ) -> Self {
        let cells = notebook
            .ordered_cells()
            .iter()
            .filter(|cell| cell.is_sql())
            .map(|cell| graph_node(cell, graph))
            .collect();
        GraphResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            notebook_id: notebook.id.to_string(),
            strategies,
            cells,
            duplicate_name_cells: graph.duplicate_name_cells.clone(),
            cycles,
            execution_order,
        }
    }
}

fn graph_node(cell: &Cell, graph: &DependencyGraph) -> GraphNode {
    GraphNode {
        cell_id: cell.id.clone(),
        stable_ref: cell.stable_ref().to_string(),
        name: cell.name().map(str::to_string),
        dependencies: graph.dependencies_of(&cell.id).cloned().collect(),
        dependents: graph.dependents_of(&cell.id).cloned().collect(),
        unresolved: graph
            .unresolved_references
            .get(&cell.id)
            .cloned()
            .unwrap_or_default(),
    }
}

/// Response for `rename`.
#[derive(Debug, Clone, Serialize)]
pub struct RenameResponse {
    pub status: String,
    pub schema_version: String,
    /// Whether the notebook was updated (`--apply`).
    pub applied: bool,
    pub update: NameUpdate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<RenamePreview>,
    /// Unified diff of the rewritten cells; empty when nothing changes.
    pub unified_diff: String,
}

impl RenameResponse {
    pub fn new(
        applied: bool,
        update: NameUpdate,
        preview: Option<RenamePreview>,
        unified_diff: String,
    ) -> Self {
        RenameResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            applied,
            update,
            preview,
            unified_diff,
        }
    }
}

/// Response for `check-name`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckNameResponse {
    pub status: String,
    pub schema_version: String,
    pub name: Option<String>,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CheckNameResponse {
    pub fn new(name: Option<String>, reason: Option<String>) -> Self {
        CheckNameResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            name,
            valid: reason.is_none(),
            reason,
        }
    }
}

/// SQL to run for one cell of a plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanStep {
    pub cell_id: CellId,
    /// Empty when the cell publishes no view.
    pub statements: Vec<String>,
}

/// Response for `plan`.
#[derive(Debug, Clone, Serialize)]
pub struct PlanResponse {
    pub status: String,
    pub schema_version: String,
    pub target: CellId,
    pub steps: Vec<PlanStep>,
    pub blocked: Vec<CellId>,
}

impl PlanResponse {
    pub fn new(target: CellId, steps: Vec<PlanStep>, blocked: Vec<CellId>) -> Self {
        PlanResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            target,
            steps,
            blocked,
        }
    }
}

// ============================================================================
// Response Emission
// ============================================================================

/// Emit a response as pretty-printed JSON to a writer.
pub fn emit_response<T: Serialize>(response: &T, writer: &mut impl Write) -> io::Result<()> {
    let json = serde_json::to_string_pretty(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)
}

// ============================================================================
// Tests
// ============================================================================
