//! Cell data model.
//!
//! A [`Cell`] pairs an immutable identity (opaque [`CellId`] plus the stable
//! [`CellRef`] derived from it) with an optional user alias. Everything that
//! needs "the name other cells use in SQL" goes through
//! [`CellIdentity::effective_name`] instead of checking prefixes by hand.
//!
//! Only [`CellKind::Sql`] cells take part in the dependency graph; markdown
//! cells are carried along for ordering only.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::naming::make_cell_ref;
use crate::util::generate_cell_id;

// ============================================================================
// ID Types
// ============================================================================

/// Opaque cell identifier, assigned once at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(pub String);

impl CellId {
    /// Create a cell ID from an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        CellId(id.into())
    }

    /// Allocate a fresh, collision-resistant cell ID.
    pub fn generate() -> Self {
        CellId(generate_cell_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CellId {
    fn from(id: &str) -> Self {
        CellId(id.to_string())
    }
}

impl From<String> for CellId {
    fn from(id: String) -> Self {
        CellId(id)
    }
}

/// Stable SQL-visible relation name of a cell (`__pp_cell_<sanitized id>`).
///
/// Derived from the cell ID at creation and never changed afterwards, so SQL
/// written against it survives alias renames and reordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellRef(String);

impl CellRef {
    /// Derive the stable reference for a cell ID.
    pub fn for_cell(id: &CellId) -> Self {
        CellRef(make_cell_ref(id.as_str()))
    }

    /// Wrap a stored reference without re-deriving it.
    ///
    /// Used when loading persisted cells whose reference predates the
    /// current sanitization rules.
    pub fn from_stored(raw: impl Into<String>) -> Self {
        CellRef(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Stable reference plus optional user alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellIdentity {
    /// Immutable stable reference.
    #[serde(rename = "ref")]
    pub stable_ref: CellRef,
    /// User-chosen alias, if any.
    #[serde(rename = "name", default)]
    pub user_alias: Option<String>,
}

impl CellIdentity {
    pub fn new(stable_ref: CellRef) -> Self {
        CellIdentity {
            stable_ref,
            user_alias: None,
        }
    }

    /// The name other cells should use to reference this cell: the alias when
    /// set, otherwise the stable reference.
    pub fn effective_name(&self) -> &str {
        self.user_alias
            .as_deref()
            .unwrap_or_else(|| self.stable_ref.as_str())
    }

    /// Every name this cell answers to (alias first, then stable ref).
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.user_alias
            .as_deref()
            .into_iter()
            .chain(std::iter::once(self.stable_ref.as_str()))
    }
}

// ============================================================================
// Cell Kind
// ============================================================================

/// Variant tag of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Sql,
    Markdown,
}

// ============================================================================
// Execution / Output Metadata
// ============================================================================

/// Run state of a SQL cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Idle,
    Running,
    Success,
    Error,
}

/// Execution metadata of a SQL cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellExecution {
    #[serde(default)]
    pub status: ExecutionStatus,
    /// Number of completed runs.
    #[serde(default)]
    pub execution_count: u32,
    /// The SQL actually sent to the engine on the last run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_query: Option<String>,
    /// Wall-clock duration of the last run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Completion time of the last run (milliseconds since the Unix epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Partial update for [`CellExecution`].
///
/// `None` leaves a field untouched. For optional fields the inner option
/// distinguishes "set" (`Some(Some(v))`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellExecutionUpdate {
    pub status: Option<ExecutionStatus>,
    pub execution_count: Option<u32>,
    pub last_query: Option<Option<String>>,
    pub duration_ms: Option<Option<u64>>,
    pub finished_at_ms: Option<Option<u64>>,
    pub error: Option<Option<String>>,
}

impl CellExecution {
    /// Shallow-merge an update into a copy of this value.
    pub fn merged(&self, update: &CellExecutionUpdate) -> CellExecution {
        CellExecution {
            status: update.status.unwrap_or(self.status),
            execution_count: update.execution_count.unwrap_or(self.execution_count),
            last_query: merge_opt(&self.last_query, &update.last_query),
            duration_ms: merge_opt(&self.duration_ms, &update.duration_ms),
            finished_at_ms: merge_opt(&self.finished_at_ms, &update.finished_at_ms),
            error: merge_opt(&self.error, &update.error),
        }
    }
}

/// How a SQL cell's result is displayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Table,
    Chart,
}

/// Output/view metadata of a SQL cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellOutput {
    #[serde(default)]
    pub view_mode: ViewMode,
    /// Opaque chart configuration owned by the charting layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_config: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub collapsed: bool,
}

/// Partial update for [`CellOutput`]; same conventions as [`CellExecutionUpdate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellOutputUpdate {
    pub view_mode: Option<ViewMode>,
    pub chart_config: Option<Option<serde_json::Value>>,
    pub page_size: Option<Option<u32>>,
    pub collapsed: Option<bool>,
}

impl CellOutput {
    /// Shallow-merge an update into a copy of this value.
    pub fn merged(&self, update: &CellOutputUpdate) -> CellOutput {
        CellOutput {
            view_mode: update.view_mode.unwrap_or(self.view_mode),
            chart_config: merge_opt(&self.chart_config, &update.chart_config),
            page_size: merge_opt(&self.page_size, &update.page_size),
            collapsed: update.collapsed.unwrap_or(self.collapsed),
        }
    }
}

fn merge_opt<T: Clone>(current: &Option<T>, update: &Option<Option<T>>) -> Option<T> {
    match update {
        Some(value) => value.clone(),
        None => current.clone(),
    }
}

// ============================================================================
// Cell
// ============================================================================

/// A unit of notebook content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    #[serde(flatten)]
    pub identity: CellIdentity,
    #[serde(rename = "type")]
    pub kind: CellKind,
    pub content: String,
    pub order: usize,
    #[serde(default)]
    pub output: CellOutput,
    #[serde(default)]
    pub execution: CellExecution,
}

impl Cell {
    /// Create a cell with an explicit ID; the stable ref is derived from it.
    pub fn new(id: impl Into<CellId>, kind: CellKind, content: impl Into<String>) -> Self {
        let id = id.into();
        let stable_ref = CellRef::for_cell(&id);
        Cell {
            id,
            identity: CellIdentity::new(stable_ref),
            kind,
            content: content.into(),
            order: 0,
            output: CellOutput::default(),
            execution: CellExecution::default(),
        }
    }

    /// Create a SQL cell with an explicit ID.
    pub fn sql(id: impl Into<CellId>, content: impl Into<String>) -> Self {
        Cell::new(id, CellKind::Sql, content)
    }

    /// Create a markdown cell with an explicit ID.
    pub fn markdown(id: impl Into<CellId>, content: impl Into<String>) -> Self {
        Cell::new(id, CellKind::Markdown, content)
    }

    /// Create a cell with a freshly generated ID.
    pub fn create(kind: CellKind, content: impl Into<String>) -> Self {
        Cell::new(CellId::generate(), kind, content)
    }

    /// Set the user alias.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.identity.user_alias = Some(name.into());
        self
    }

    /// Set the position.
    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    /// Override the stable reference (loading legacy data, fixtures).
    pub fn with_stable_ref(mut self, stable_ref: CellRef) -> Self {
        self.identity.stable_ref = stable_ref;
        self
    }

    pub fn is_sql(&self) -> bool {
        self.kind == CellKind::Sql
    }

    /// The user alias, if any.
    pub fn name(&self) -> Option<&str> {
        self.identity.user_alias.as_deref()
    }

    pub fn stable_ref(&self) -> &CellRef {
        &self.identity.stable_ref
    }

    /// See [`CellIdentity::effective_name`].
    pub fn effective_name(&self) -> &str {
        self.identity.effective_name()
    }
}

// ============================================================================
// Tests
// ============================================================================
