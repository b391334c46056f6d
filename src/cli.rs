//! CLI front door.
//!
//! Each `run_*` function implements one subcommand against a
//! [`NotebookController`] and returns the response to print. `main.rs` owns
//! argument parsing, configuration and output; these functions own the
//! notebook logic so tests can drive them with a [`MemoryStore`].
//!
//! [`MemoryStore`]: crate::store::MemoryStore

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use pondnote_core::graph::{detect_circular_dependency_cells, order_cells_for_execution};
use pondnote_core::lineage::{DependencyResolver, LineageOptions};
use pondnote_core::materialize::materialization_sql;
use pondnote_core::naming::normalize_cell_name;
use pondnote_core::rename::preview_notebook_alias_rename_refactor;
use pondnote_core::statement::ScriptSplitter;
use pondnote_core::CellId;

use crate::config::PondnoteConfig;
use crate::controller::{check_alias_change, NameUpdate, NotebookController};
use crate::diff::generate_unified_diff;
use crate::error::NotebookError;
use crate::lineage_process::ProcessLineageAnalyzer;
use crate::notebook::{Notebook, NotebookId};
use crate::output::{
    CheckNameResponse, GraphResponse, ImportResponse, ListResponse, NotebookSummary, PlanResponse,
    PlanStep, RenameResponse,
};
use crate::store::{FileStore, KeyValueStore};

// ============================================================================
// Setup
// ============================================================================

/// Open the file store named by `config` and load its notebooks.
pub fn open_controller(
    config: &PondnoteConfig,
) -> Result<NotebookController<FileStore>, NotebookError> {
    let store = FileStore::new(config.store_dir.value.clone());
    NotebookController::load(store)
}

/// Lineage-then-lexical when an analyzer command is configured, lexical
/// otherwise.
pub fn build_resolver(config: &PondnoteConfig) -> DependencyResolver {
    let analyzer = config
        .lineage_command
        .value
        .as_deref()
        .and_then(ProcessLineageAnalyzer::from_command_line);
    match analyzer {
        Some(analyzer) => DependencyResolver::with_lineage(
            Arc::new(analyzer),
            LineageOptions {
                schema: None,
                dialect: config.dialect.value.clone(),
            },
        ),
        None => DependencyResolver::lexical(),
    }
}

// ============================================================================
// Commands
// ============================================================================

/// `list`: every stored notebook, sorted by ID.
pub fn run_list<S: KeyValueStore>(controller: &NotebookController<S>) -> ListResponse {
    ListResponse::new(
        controller
            .state()
            .notebooks()
            .map(NotebookSummary::from_notebook)
            .collect(),
    )
}

/// `import`: create a notebook with one SQL cell per statement of a script.
pub fn run_import<S: KeyValueStore>(
    controller: &mut NotebookController<S>,
    script_path: &Path,
    name: Option<&str>,
) -> Result<ImportResponse, NotebookError> {
    let script = fs::read_to_string(script_path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => NotebookError::FileNotFound {
            path: script_path.display().to_string(),
        },
        _ => NotebookError::invalid_args(format!(
            "cannot read {}: {}",
            script_path.display(),
            err
        )),
    })?;
    let name = name
        .map(str::to_string)
        .or_else(|| {
            script_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "Untitled".to_string());

    let notebook = Notebook::from_script(name, &script, &ScriptSplitter)?;
    info!(notebook = %notebook.id, cells = notebook.cells.len(), "imported script");
    let response = ImportResponse::new(&notebook);
    controller.insert_notebook(notebook)?;
    Ok(response)
}

/// `graph`: dependencies, dependents, cycles and a full execution order.
pub async fn run_graph<S: KeyValueStore>(
    controller: &NotebookController<S>,
    notebook_id: &NotebookId,
    resolver: &DependencyResolver,
) -> Result<GraphResponse, NotebookError> {
    let graph = controller
        .resolve_dependency_graph(notebook_id, resolver)
        .await?;
    let notebook = controller.notebook(notebook_id)?;
    let cycles = detect_circular_dependency_cells(&graph.edges);
    let sql_cells = notebook
        .cells
        .iter()
        .filter(|cell| cell.is_sql())
        .map(|cell| cell.id.clone())
        .collect();
    let execution_order = order_cells_for_execution(&notebook.cells, &graph.edges, &sql_cells);
    let strategies = resolver
        .strategy_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    Ok(GraphResponse::new(
        notebook,
        &graph,
        cycles,
        execution_order,
        strategies,
    ))
}

/// `rename`: preview (default) or apply an alias rename with reference
/// rewriting. `to = None` clears the alias.
pub fn run_rename<S: KeyValueStore>(
    controller: &mut NotebookController<S>,
    notebook_id: &NotebookId,
    cell_id: &CellId,
    to: Option<&str>,
    apply: bool,
) -> Result<RenameResponse, NotebookError> {
    let before = controller.notebook(notebook_id)?.cells.clone();

    if apply {
        let outcome = controller.rename_cell_with_refactor(notebook_id, cell_id, to)?;
        let diff = outcome
            .preview
            .as_ref()
            .map(|preview| generate_unified_diff(&before, preview))
            .unwrap_or_default();
        let applied = outcome.update.is_committed();
        return Ok(RenameResponse::new(applied, outcome.update, outcome.preview, diff));
    }

    let name = normalize_cell_name(to);
    let cell = before
        .iter()
        .find(|cell| &cell.id == cell_id)
        .ok_or_else(|| NotebookError::cell_not_found(cell_id))?;
    if let Err(reason) = check_alias_change(&before, cell, name.as_deref()) {
        return Ok(RenameResponse::new(
            false,
            NameUpdate::Rejected { reason },
            None,
            String::new(),
        ));
    }
    let preview = preview_notebook_alias_rename_refactor(&before, cell_id, name.as_deref())?;
    let diff = generate_unified_diff(&before, &preview);
    Ok(RenameResponse::new(
        false,
        NameUpdate::Previewed { name },
        Some(preview),
        diff,
    ))
}

/// `check-name`: would `name` be accepted as `cell_id`'s alias?
pub fn run_check_name<S: KeyValueStore>(
    controller: &NotebookController<S>,
    notebook_id: &NotebookId,
    cell_id: &CellId,
    name: &str,
) -> Result<CheckNameResponse, NotebookError> {
    let notebook = controller.notebook(notebook_id)?;
    let cell = notebook
        .cell(cell_id)
        .ok_or_else(|| NotebookError::cell_not_found(cell_id))?;
    let name = normalize_cell_name(Some(name));
    let reason = check_alias_change(&notebook.cells, cell, name.as_deref()).err();
    Ok(CheckNameResponse::new(
        name,
        reason.map(|reason| reason.to_string()),
    ))
}

/// `plan`: SQL to run, in order, to refresh `cell_id` and its upstream.
pub fn run_plan<S: KeyValueStore>(
    controller: &NotebookController<S>,
    notebook_id: &NotebookId,
    cell_id: &CellId,
) -> Result<PlanResponse, NotebookError> {
    let plan = controller.execution_plan(notebook_id, cell_id)?;
    let notebook = controller.notebook(notebook_id)?;
    let mut steps = Vec::with_capacity(plan.ordered.len());
    for id in &plan.ordered {
        let Some(cell) = notebook.cell(id) else {
            continue;
        };
        let statements = materialization_sql(cell, &ScriptSplitter)?
            .map(|plan| plan.statements().map(str::to_string).collect())
            .unwrap_or_default();
        steps.push(PlanStep {
            cell_id: id.clone(),
            statements,
        });
    }
    Ok(PlanResponse::new(cell_id.clone(), steps, plan.blocked))
}

// ============================================================================
// Tests
// ============================================================================
