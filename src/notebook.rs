//! Notebook document type.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pondnote_core::import::cells_from_script;
use pondnote_core::order::reorder_cells;
use pondnote_core::statement::{SplitError, StatementSplitter};
use pondnote_core::util::generate_notebook_id;
use pondnote_core::{Cell, CellId};

/// Opaque notebook identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotebookId(pub String);

impl NotebookId {
    pub fn new(id: impl Into<String>) -> Self {
        NotebookId(id.into())
    }

    pub fn generate() -> Self {
        NotebookId(generate_notebook_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotebookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NotebookId {
    fn from(id: &str) -> Self {
        NotebookId(id.to_string())
    }
}

/// A named, ordered collection of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notebook {
    pub id: NotebookId,
    pub name: String,
    #[serde(default)]
    pub cells: Vec<Cell>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notebook {
    /// An empty notebook with a fresh ID.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Notebook {
            id: NotebookId::generate(),
            name: name.into(),
            cells: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A notebook with one SQL cell per statement of `script`.
    pub fn from_script(
        name: impl Into<String>,
        script: &str,
        splitter: &dyn StatementSplitter,
    ) -> Result<Self, SplitError> {
        let mut notebook = Notebook::new(name);
        notebook.cells = cells_from_script(script, splitter)?;
        Ok(notebook)
    }

    pub fn with_cells(mut self, cells: Vec<Cell>) -> Self {
        self.cells = reorder_cells(&cells);
        self
    }

    pub fn cell(&self, cell_id: &CellId) -> Option<&Cell> {
        self.cells.iter().find(|cell| &cell.id == cell_id)
    }

    /// Copy of this notebook with different cells and a fresh `updated_at`.
    pub(crate) fn with_updated_cells(&self, cells: Vec<Cell>) -> Notebook {
        Notebook {
            cells,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Cells in notebook order.
    pub fn ordered_cells(&self) -> Vec<Cell> {
        reorder_cells(&self.cells)
    }
}
