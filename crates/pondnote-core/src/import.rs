//! Building cells from a plain SQL script.

use std::collections::HashSet;

use tracing::debug;

use crate::cell::{Cell, CellKind};
use crate::naming::{parse_user_cell_name, validate_cell_name};
use crate::statement::{SplitError, StatementSplitter};

/// One SQL cell per statement of `script`, in script order.
///
/// A statement whose first line is a `-- @name` annotation names its cell,
/// unless the name is reserved or an earlier cell already took it; such
/// cells keep their annotation text but get no alias.
pub fn cells_from_script(
    script: &str,
    splitter: &dyn StatementSplitter,
) -> Result<Vec<Cell>, SplitError> {
    let mut taken = HashSet::new();
    let cells = splitter
        .split(script)?
        .into_iter()
        .enumerate()
        .map(|(order, statement)| {
            let mut cell = Cell::create(CellKind::Sql, statement.code).with_order(order);
            if let Some(name) = parse_user_cell_name(&cell.content) {
                if validate_cell_name(&name).is_ok() && taken.insert(name.clone()) {
                    cell = cell.with_name(name);
                } else {
                    debug!(name = %name, "ignoring unusable @name annotation");
                }
            }
            cell
        })
        .collect();
    Ok(cells)
}
