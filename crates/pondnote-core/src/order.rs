//! Cell ordering primitives.
//!
//! Every function here is pure: the input slice is never mutated and a new
//! collection comes back. Each structural operation leaves `order` values
//! exactly `0..n-1`.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::cell::{Cell, CellId};

/// Direction for [`swap_cell_order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Up,
    Down,
}

/// Sort by `order` (stable, so ties keep input position) and renumber
/// `0..n-1`.
pub fn reorder_cells(cells: &[Cell]) -> Vec<Cell> {
    let mut sorted = cells.to_vec();
    sorted.sort_by_key(|cell| cell.order);
    renumber(&mut sorted);
    sorted
}

/// Insert `new_cell` right after `after`, or at the end when `after` is
/// `None` or not present.
pub fn insert_cell_after(cells: &[Cell], new_cell: Cell, after: Option<&CellId>) -> Vec<Cell> {
    let mut sorted = reorder_cells(cells);
    let position = after
        .and_then(|id| sorted.iter().position(|cell| &cell.id == id))
        .map(|index| index + 1)
        .unwrap_or(sorted.len());
    sorted.insert(position, new_cell);
    renumber(&mut sorted);
    sorted
}

/// Insert `new_cell` before every other cell.
pub fn insert_cell_at_start(cells: &[Cell], new_cell: Cell) -> Vec<Cell> {
    let mut sorted = reorder_cells(cells);
    sorted.insert(0, new_cell);
    renumber(&mut sorted);
    sorted
}

/// Remove the cell with `cell_id`; survivors are renumbered.
///
/// An unknown ID yields an unchanged copy of the input.
pub fn remove_cell(cells: &[Cell], cell_id: &CellId) -> Vec<Cell> {
    if !cells.iter().any(|cell| &cell.id == cell_id) {
        return cells.to_vec();
    }
    let survivors: Vec<Cell> = cells
        .iter()
        .filter(|cell| &cell.id != cell_id)
        .cloned()
        .collect();
    reorder_cells(&survivors)
}

/// Exchange a cell's position with its neighbour in `direction`.
///
/// Returns [`Cow::Borrowed`] with the input slice itself when nothing moves:
/// the cell is unknown, already first (up) or already last (down).
pub fn swap_cell_order<'a>(
    cells: &'a [Cell],
    cell_id: &CellId,
    direction: MoveDirection,
) -> Cow<'a, [Cell]> {
    let mut sorted = reorder_cells(cells);
    let Some(index) = sorted.iter().position(|cell| &cell.id == cell_id) else {
        return Cow::Borrowed(cells);
    };
    let neighbour = match direction {
        MoveDirection::Up if index > 0 => index - 1,
        MoveDirection::Down if index + 1 < sorted.len() => index + 1,
        _ => return Cow::Borrowed(cells),
    };

    let target_order = sorted[index].order;
    sorted[index].order = sorted[neighbour].order;
    sorted[neighbour].order = target_order;
    Cow::Owned(reorder_cells(&sorted))
}

/// Position of `cell_id` in notebook order, if present.
pub fn cell_position(cells: &[Cell], cell_id: &CellId) -> Option<usize> {
    reorder_cells(cells)
        .iter()
        .position(|cell| &cell.id == cell_id)
}

/// The cell immediately before `cell_id` in notebook order.
///
/// Callers save this before deleting a cell so an undo can re-insert the
/// cell at the same spot with [`insert_cell_after`].
pub fn previous_cell_id(cells: &[Cell], cell_id: &CellId) -> Option<CellId> {
    let sorted = reorder_cells(cells);
    let index = sorted.iter().position(|cell| &cell.id == cell_id)?;
    index.checked_sub(1).map(|prev| sorted[prev].id.clone())
}

fn renumber(cells: &mut [Cell]) {
    for (index, cell) in cells.iter_mut().enumerate() {
        cell.order = index;
    }
}

// ============================================================================
// Tests
// ============================================================================
