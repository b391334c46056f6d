//! Notebook controller.
//!
//! The controller owns the application state (every open notebook) and the
//! store it is persisted to. Each operation is a state transition: it reads
//! the current notebook, computes the next cell list with a pure function,
//! and commits it with a single write to the store followed by a single
//! assignment into the state. Operations that would not change anything
//! return early without touching either.
//!
//! A failed store write leaves the in-memory state unchanged.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use pondnote_core::cell::{CellExecution, CellExecutionUpdate, CellKind, CellOutputUpdate};
use pondnote_core::graph::{
    build_available_cell_names, build_resolved_dependency_graph, compute_cell_dependencies,
    find_upstream_dependency_cells, order_cells_for_execution, DependencyGraph, ExecutionPlan,
};
use pondnote_core::lineage::DependencyResolver;
use pondnote_core::naming::{
    normalize_cell_name, parse_user_cell_name, validate_cell_name, CellNameError,
};
use pondnote_core::order::{
    insert_cell_after, insert_cell_at_start, previous_cell_id, remove_cell, swap_cell_order,
    MoveDirection,
};
use pondnote_core::rename::{
    preview_notebook_alias_rename_refactor, CellContentPatch, RenamePreview,
};
use pondnote_core::{Cell, CellId};

use crate::error::NotebookError;
use crate::notebook::{Notebook, NotebookId};
use crate::store::{KeyValueStore, NOTEBOOKS_TABLE};

// ============================================================================
// State
// ============================================================================

/// Snapshot of every notebook the controller manages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    notebooks: BTreeMap<NotebookId, Notebook>,
}

impl AppState {
    pub fn notebook(&self, id: &NotebookId) -> Option<&Notebook> {
        self.notebooks.get(id)
    }

    pub fn notebooks(&self) -> impl Iterator<Item = &Notebook> {
        self.notebooks.values()
    }

    pub fn len(&self) -> usize {
        self.notebooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notebooks.is_empty()
    }
}

// ============================================================================
// Results
// ============================================================================

/// Why an alias change was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NameRejection {
    /// The name fails validation.
    Invalid { message: String },
    /// Another SQL cell already uses the name.
    Duplicate { name: String, holder: CellId },
    /// Only SQL cells carry aliases.
    NotSqlCell,
}

impl fmt::Display for NameRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameRejection::Invalid { message } => f.write_str(message),
            NameRejection::Duplicate { name, holder } => {
                write!(f, "name '{}' is already used by cell {}", name, holder)
            }
            NameRejection::NotSqlCell => f.write_str("only SQL cells can be named"),
        }
    }
}

impl From<CellNameError> for NameRejection {
    fn from(err: CellNameError) -> Self {
        NameRejection::Invalid {
            message: err.to_string(),
        }
    }
}

/// Outcome of [`NotebookController::update_cell_name`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NameUpdate {
    /// The alias now is `name` (`None` when cleared).
    Committed { name: Option<String> },
    /// `name` would be accepted; nothing was written.
    Previewed { name: Option<String> },
    Rejected { reason: NameRejection },
}

impl NameUpdate {
    pub fn is_committed(&self) -> bool {
        matches!(self, NameUpdate::Committed { .. })
    }
}

/// A deleted cell plus what is needed to put it back.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedCell {
    pub cell: Cell,
    /// The cell that preceded it; `None` when it was first.
    pub after: Option<CellId>,
}

/// Outcome of [`NotebookController::rename_cell_with_refactor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameOutcome {
    pub update: NameUpdate,
    /// Present when the rename was committed.
    pub preview: Option<RenamePreview>,
}

// ============================================================================
// Pure transitions
// ============================================================================

/// Apply content patches. Returns the new cells and how many changed, or
/// `None` when nothing differs.
pub fn apply_content_patches(
    cells: &[Cell],
    patches: &[CellContentPatch],
) -> Option<(Vec<Cell>, usize)> {
    let mut next = cells.to_vec();
    let mut changed = 0;
    for patch in patches {
        match next.iter_mut().find(|cell| cell.id == patch.cell_id) {
            Some(cell) if cell.content != patch.new_content => {
                cell.content = patch.new_content.clone();
                changed += 1;
            }
            Some(_) => {}
            None => warn!(cell = %patch.cell_id, "patch targets unknown cell"),
        }
    }
    (changed > 0).then_some((next, changed))
}

/// Check that `name` may become `cell_id`'s alias.
///
/// `name` is the normalized alias (`None` clears). Uniqueness is checked
/// among SQL cells, case-sensitively.
pub fn check_cell_name(
    cells: &[Cell],
    cell_id: &CellId,
    name: Option<&str>,
) -> Result<(), NameRejection> {
    let Some(name) = name else {
        return Ok(());
    };
    validate_cell_name(name)?;
    let holder = cells
        .iter()
        .filter(|cell| cell.is_sql() && &cell.id != cell_id)
        .find(|cell| cell.name() == Some(name));
    match holder {
        Some(holder) => Err(NameRejection::Duplicate {
            name: name.to_string(),
            holder: holder.id.clone(),
        }),
        None => Ok(()),
    }
}

/// [`check_cell_name`] for an existing cell, refusing cells that are not
/// SQL.
pub fn check_alias_change(
    cells: &[Cell],
    cell: &Cell,
    name: Option<&str>,
) -> Result<(), NameRejection> {
    if !cell.is_sql() {
        return Err(NameRejection::NotSqlCell);
    }
    check_cell_name(cells, &cell.id, name)
}

fn with_cell<F>(cells: &[Cell], cell_id: &CellId, update: F) -> Vec<Cell>
where
    F: FnOnce(&mut Cell),
{
    let mut next = cells.to_vec();
    if let Some(cell) = next.iter_mut().find(|cell| &cell.id == cell_id) {
        update(cell);
    }
    next
}

// ============================================================================
// Controller
// ============================================================================

/// Owns application state and its persistence.
pub struct NotebookController<S: KeyValueStore> {
    store: S,
    state: AppState,
    revision: u64,
}

impl<S: KeyValueStore> NotebookController<S> {
    /// A controller with empty state over `store`.
    pub fn new(store: S) -> Self {
        NotebookController {
            store,
            state: AppState::default(),
            revision: 0,
        }
    }

    /// A controller with every notebook found in `store`.
    ///
    /// Unreadable entries are skipped with a warning.
    pub fn load(store: S) -> Result<Self, NotebookError> {
        let mut state = AppState::default();
        for key in store.keys(NOTEBOOKS_TABLE)? {
            let Some(value) = store.get(NOTEBOOKS_TABLE, &key)? else {
                continue;
            };
            match serde_json::from_value::<Notebook>(value) {
                Ok(notebook) => {
                    state.notebooks.insert(notebook.id.clone(), notebook);
                }
                Err(err) => warn!(key = %key, error = %err, "skipping unreadable notebook"),
            }
        }
        debug!(notebooks = state.len(), "loaded notebooks");
        Ok(NotebookController {
            store,
            state,
            revision: 0,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Number of committed state updates since construction.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn notebook(&self, id: &NotebookId) -> Result<&Notebook, NotebookError> {
        self.state
            .notebook(id)
            .ok_or_else(|| NotebookError::NotebookNotFound {
                notebook_id: id.clone(),
            })
    }

    fn cell<'a>(notebook: &'a Notebook, cell_id: &CellId) -> Result<&'a Cell, NotebookError> {
        notebook
            .cell(cell_id)
            .ok_or_else(|| NotebookError::cell_not_found(cell_id))
    }

    /// Persist `notebook`, then swap it into the state.
    fn commit(&mut self, notebook: Notebook) -> Result<(), NotebookError> {
        let value = serde_json::to_value(&notebook)
            .map_err(|err| NotebookError::internal(format!("cannot serialize notebook: {}", err)))?;
        self.store
            .put(NOTEBOOKS_TABLE, &value, notebook.id.as_str())?;
        self.revision += 1;
        debug!(notebook = %notebook.id, revision = self.revision, "committed notebook");
        self.state.notebooks.insert(notebook.id.clone(), notebook);
        Ok(())
    }

    fn commit_cells(&mut self, id: &NotebookId, cells: Vec<Cell>) -> Result<(), NotebookError> {
        let next = self.notebook(id)?.with_updated_cells(cells);
        self.commit(next)
    }

    // ------------------------------------------------------------------------
    // Notebooks
    // ------------------------------------------------------------------------

    pub fn create_notebook(
        &mut self,
        name: impl Into<String>,
    ) -> Result<NotebookId, NotebookError> {
        let notebook = Notebook::new(name);
        let id = notebook.id.clone();
        self.commit(notebook)?;
        Ok(id)
    }

    /// Add an existing notebook (for example one built from a script).
    pub fn insert_notebook(&mut self, notebook: Notebook) -> Result<(), NotebookError> {
        if self.state.notebook(&notebook.id).is_some() {
            return Err(NotebookError::invalid_args(format!(
                "notebook {} already exists",
                notebook.id
            )));
        }
        self.commit(notebook)
    }

    pub fn delete_notebook(&mut self, id: &NotebookId) -> Result<(), NotebookError> {
        self.notebook(id)?;
        self.store.delete(NOTEBOOKS_TABLE, id.as_str())?;
        self.state.notebooks.remove(id);
        self.revision += 1;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------------

    /// Append a cell, or insert it right after `after`.
    ///
    /// A `-- @name` annotation on the first line of a SQL cell becomes its
    /// alias when the name is valid and free.
    pub fn add_cell(
        &mut self,
        id: &NotebookId,
        kind: CellKind,
        content: impl Into<String>,
        after: Option<&CellId>,
    ) -> Result<CellId, NotebookError> {
        let notebook = self.notebook(id)?;
        let cell = Self::new_cell(notebook, kind, content.into());
        let cell_id = cell.id.clone();
        let cells = insert_cell_after(&notebook.cells, cell, after);
        self.commit_cells(id, cells)?;
        Ok(cell_id)
    }

    /// Insert a cell before every other cell.
    pub fn add_cell_at_start(
        &mut self,
        id: &NotebookId,
        kind: CellKind,
        content: impl Into<String>,
    ) -> Result<CellId, NotebookError> {
        let notebook = self.notebook(id)?;
        let cell = Self::new_cell(notebook, kind, content.into());
        let cell_id = cell.id.clone();
        let cells = insert_cell_at_start(&notebook.cells, cell);
        self.commit_cells(id, cells)?;
        Ok(cell_id)
    }

    fn new_cell(notebook: &Notebook, kind: CellKind, content: String) -> Cell {
        let mut cell = Cell::create(kind, content);
        if cell.is_sql() {
            if let Some(name) = parse_user_cell_name(&cell.content) {
                if check_cell_name(&notebook.cells, &cell.id, Some(&name)).is_ok() {
                    cell = cell.with_name(name);
                }
            }
        }
        cell
    }

    /// Remove a cell. The returned value restores it with
    /// [`restore_cell`](Self::restore_cell).
    pub fn delete_cell(
        &mut self,
        id: &NotebookId,
        cell_id: &CellId,
    ) -> Result<DeletedCell, NotebookError> {
        let notebook = self.notebook(id)?;
        let cell = Self::cell(notebook, cell_id)?.clone();
        let after = previous_cell_id(&notebook.cells, cell_id);
        let cells = remove_cell(&notebook.cells, cell_id);
        self.commit_cells(id, cells)?;
        Ok(DeletedCell { cell, after })
    }

    /// Undo a [`delete_cell`](Self::delete_cell).
    pub fn restore_cell(
        &mut self,
        id: &NotebookId,
        deleted: DeletedCell,
    ) -> Result<(), NotebookError> {
        let notebook = self.notebook(id)?;
        if notebook.cell(&deleted.cell.id).is_some() {
            return Err(NotebookError::invalid_args(format!(
                "cell {} is already in the notebook",
                deleted.cell.id
            )));
        }
        let cells = match &deleted.after {
            Some(anchor) => insert_cell_after(&notebook.cells, deleted.cell, Some(anchor)),
            None => insert_cell_at_start(&notebook.cells, deleted.cell),
        };
        self.commit_cells(id, cells)
    }

    /// Move a cell one position. Returns `false` when it cannot move.
    pub fn move_cell(
        &mut self,
        id: &NotebookId,
        cell_id: &CellId,
        direction: MoveDirection,
    ) -> Result<bool, NotebookError> {
        let notebook = self.notebook(id)?;
        let cells = match swap_cell_order(&notebook.cells, cell_id, direction) {
            Cow::Borrowed(_) => {
                if notebook.cell(cell_id).is_none() {
                    warn!(cell = %cell_id, "move targets unknown cell");
                }
                return Ok(false);
            }
            Cow::Owned(cells) => cells,
        };
        self.commit_cells(id, cells)?;
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Content and names
    // ------------------------------------------------------------------------

    pub fn update_cell_content(
        &mut self,
        id: &NotebookId,
        cell_id: &CellId,
        content: impl Into<String>,
    ) -> Result<bool, NotebookError> {
        Self::cell(self.notebook(id)?, cell_id)?;
        let patch = CellContentPatch::new(cell_id.clone(), content);
        Ok(self.apply_notebook_cell_content_patches(id, &[patch])? > 0)
    }

    /// Apply patches that change something; persist once when any did.
    /// Returns how many cells changed.
    pub fn apply_notebook_cell_content_patches(
        &mut self,
        id: &NotebookId,
        patches: &[CellContentPatch],
    ) -> Result<usize, NotebookError> {
        let notebook = self.notebook(id)?;
        let Some((cells, changed)) = apply_content_patches(&notebook.cells, patches) else {
            return Ok(0);
        };
        self.commit_cells(id, cells)?;
        Ok(changed)
    }

    /// Set or clear (`None` or blank) a SQL cell's alias.
    pub fn update_cell_name(
        &mut self,
        id: &NotebookId,
        cell_id: &CellId,
        new_name: Option<&str>,
    ) -> Result<NameUpdate, NotebookError> {
        let notebook = self.notebook(id)?;
        let cell = Self::cell(notebook, cell_id)?;
        let name = normalize_cell_name(new_name);
        if let Err(reason) = check_alias_change(&notebook.cells, cell, name.as_deref()) {
            debug!(cell = %cell_id, %reason, "rejected cell name");
            return Ok(NameUpdate::Rejected { reason });
        }
        if cell.name() == name.as_deref() {
            return Ok(NameUpdate::Committed { name });
        }

        let alias = name.clone();
        let cells = with_cell(&notebook.cells, cell_id, |cell| cell.identity.user_alias = alias);
        self.commit_cells(id, cells)?;
        Ok(NameUpdate::Committed { name })
    }

    /// Rename a cell's alias and rewrite every reference to it in one commit.
    pub fn rename_cell_with_refactor(
        &mut self,
        id: &NotebookId,
        cell_id: &CellId,
        new_name: Option<&str>,
    ) -> Result<RenameOutcome, NotebookError> {
        let notebook = self.notebook(id)?;
        let cell = Self::cell(notebook, cell_id)?;
        let name = normalize_cell_name(new_name);
        if let Err(reason) = check_alias_change(&notebook.cells, cell, name.as_deref()) {
            return Ok(RenameOutcome {
                update: NameUpdate::Rejected { reason },
                preview: None,
            });
        }

        let preview =
            preview_notebook_alias_rename_refactor(&notebook.cells, cell_id, name.as_deref())?;
        let patched = apply_content_patches(&notebook.cells, &preview.patches)
            .map(|(cells, _)| cells)
            .unwrap_or_else(|| notebook.cells.clone());
        let alias = name.clone();
        let cells = with_cell(&patched, cell_id, |cell| cell.identity.user_alias = alias);
        if cells != notebook.cells {
            self.commit_cells(id, cells)?;
        }
        Ok(RenameOutcome {
            update: NameUpdate::Committed { name },
            preview: Some(preview),
        })
    }

    // ------------------------------------------------------------------------
    // Execution and output metadata
    // ------------------------------------------------------------------------

    /// Merge an execution update into a SQL cell. Returns `false` (and
    /// writes nothing) when the cell is not SQL or nothing would change.
    pub fn update_cell_execution(
        &mut self,
        id: &NotebookId,
        cell_id: &CellId,
        update: &CellExecutionUpdate,
    ) -> Result<bool, NotebookError> {
        let notebook = self.notebook(id)?;
        let Some(cell) = notebook.cell(cell_id) else {
            warn!(cell = %cell_id, "execution update for unknown cell");
            return Ok(false);
        };
        if !cell.is_sql() {
            return Ok(false);
        }
        let merged = cell.execution.merged(update);
        if merged == cell.execution {
            return Ok(false);
        }
        let cells = with_cell(&notebook.cells, cell_id, |cell| cell.execution = merged);
        self.commit_cells(id, cells)?;
        Ok(true)
    }

    /// Merge an output/view update into a SQL cell; same rules as
    /// [`update_cell_execution`](Self::update_cell_execution).
    pub fn update_cell_output(
        &mut self,
        id: &NotebookId,
        cell_id: &CellId,
        update: &CellOutputUpdate,
    ) -> Result<bool, NotebookError> {
        let notebook = self.notebook(id)?;
        let Some(cell) = notebook.cell(cell_id) else {
            warn!(cell = %cell_id, "output update for unknown cell");
            return Ok(false);
        };
        if !cell.is_sql() {
            return Ok(false);
        }
        let merged = cell.output.merged(update);
        if merged == cell.output {
            return Ok(false);
        }
        let cells = with_cell(&notebook.cells, cell_id, |cell| cell.output = merged);
        self.commit_cells(id, cells)?;
        Ok(true)
    }

    /// Reset every SQL cell's execution state in one update. Returns how
    /// many cells were reset.
    pub fn clear_notebook_cell_executions(
        &mut self,
        id: &NotebookId,
    ) -> Result<usize, NotebookError> {
        let notebook = self.notebook(id)?;
        let idle = CellExecution::default();
        let mut cleared = 0;
        let cells: Vec<Cell> = notebook
            .cells
            .iter()
            .map(|cell| {
                let mut cell = cell.clone();
                if cell.is_sql() && cell.execution != idle {
                    cell.execution = idle.clone();
                    cleared += 1;
                }
                cell
            })
            .collect();
        if cleared > 0 {
            self.commit_cells(id, cells)?;
        }
        Ok(cleared)
    }

    // ------------------------------------------------------------------------
    // Derived views
    // ------------------------------------------------------------------------

    /// Lexical dependency graph of a notebook.
    pub fn dependency_graph(&self, id: &NotebookId) -> Result<DependencyGraph, NotebookError> {
        let cells = &self.notebook(id)?.cells;
        let available = build_available_cell_names(cells);
        let deps = compute_cell_dependencies(cells, &available);
        Ok(build_resolved_dependency_graph(cells, &deps))
    }

    /// Dependency graph using `resolver` (lineage with fallback, typically).
    pub async fn resolve_dependency_graph(
        &self,
        id: &NotebookId,
        resolver: &DependencyResolver,
    ) -> Result<DependencyGraph, NotebookError> {
        let cells = &self.notebook(id)?.cells;
        let available = build_available_cell_names(cells);
        let deps = resolver.resolve(cells, &available).await;
        Ok(build_resolved_dependency_graph(cells, &deps))
    }

    /// Cells to run, in order, to run `cell_id` with fresh upstream results.
    pub fn execution_plan(
        &self,
        id: &NotebookId,
        cell_id: &CellId,
    ) -> Result<ExecutionPlan, NotebookError> {
        let notebook = self.notebook(id)?;
        Self::cell(notebook, cell_id)?;
        let graph = self.dependency_graph(id)?;
        let upstream = find_upstream_dependency_cells(cell_id, &graph.edges);
        Ok(order_cells_for_execution(&notebook.cells, &graph.edges, &upstream))
    }
}

// ============================================================================
// Tests
// ============================================================================
