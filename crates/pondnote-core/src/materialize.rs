//! SQL that exposes a cell's result to other cells.
//!
//! A SQL cell whose last statement is a query is published as a temporary
//! view named after its stable ref, and, when it has an alias, a second view
//! under the alias that reads from the first. Earlier statements in the cell
//! run unchanged before the view is created. Cells ending in DDL, DML or a
//! session command publish nothing.

use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::statement::{SplitError, StatementSplitter};

/// Statements to run for one cell, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializationPlan {
    /// Statements preceding the final query, unchanged.
    pub prelude: Vec<String>,
    /// `CREATE OR REPLACE TEMP VIEW <ref> AS <query>`.
    pub ref_view: String,
    /// View under the user alias, selecting from the ref view.
    pub alias_view: Option<String>,
}

impl MaterializationPlan {
    /// Every statement of the plan in execution order.
    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.prelude
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.ref_view.as_str()))
            .chain(self.alias_view.as_deref())
    }
}

/// Quote an identifier for DuckDB-style SQL.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Build the plan publishing `cell`'s result.
///
/// Returns `Ok(None)` for markdown cells, empty cells and cells whose last
/// statement is not a query.
pub fn materialization_sql(
    cell: &Cell,
    splitter: &dyn StatementSplitter,
) -> Result<Option<MaterializationPlan>, SplitError> {
    if !cell.is_sql() {
        return Ok(None);
    }
    let mut statements = splitter.split(&cell.content)?;
    let Some(last) = statements.pop() else {
        return Ok(None);
    };
    if !last.kind.is_query() {
        return Ok(None);
    }

    let stable_ref = quote_identifier(cell.stable_ref().as_str());
    let ref_view = format!("CREATE OR REPLACE TEMP VIEW {} AS\n{}", stable_ref, last.code);
    let alias_view = cell.name().map(|alias| {
        format!(
            "CREATE OR REPLACE TEMP VIEW {} AS SELECT * FROM {}",
            quote_identifier(alias),
            stable_ref
        )
    });
    Ok(Some(MaterializationPlan {
        prelude: statements.into_iter().map(|s| s.code).collect(),
        ref_view,
        alias_view,
    }))
}

/// Statements removing whatever [`materialization_sql`] published for `cell`.
pub fn drop_materialization_sql(cell: &Cell) -> Vec<String> {
    cell.identity
        .names()
        .map(|name| format!("DROP VIEW IF EXISTS {}", quote_identifier(name)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::ScriptSplitter;

    #[test]
    fn query_cell_publishes_ref_view() {
        let cell = Cell::sql("c1", "SELECT 1 AS x;");
        let plan = materialization_sql(&cell, &ScriptSplitter).unwrap().unwrap();
        assert!(plan.prelude.is_empty());
        assert_eq!(
            plan.ref_view,
            "CREATE OR REPLACE TEMP VIEW \"__pp_cell_c1\" AS\nSELECT 1 AS x"
        );
        assert_eq!(plan.alias_view, None);
    }

    #[test]
    fn alias_view_reads_ref_view() {
        let cell = Cell::sql("c1", "INSTALL httpfs;\nWITH t AS (SELECT 1) SELECT * FROM t")
            .with_name("totals");
        let plan = materialization_sql(&cell, &ScriptSplitter).unwrap().unwrap();
        assert_eq!(plan.prelude, vec!["INSTALL httpfs"]);
        assert_eq!(
            plan.alias_view.as_deref(),
            Some("CREATE OR REPLACE TEMP VIEW \"totals\" AS SELECT * FROM \"__pp_cell_c1\"")
        );
        assert_eq!(plan.statements().count(), 3);
    }

    #[test]
    fn non_query_cells_publish_nothing() {
        for sql in [
            "CREATE TABLE t AS SELECT 1",
            "ATTACH 'x.db' AS x",
            "INSERT INTO t VALUES (1)",
            "",
            "-- just a comment",
        ] {
            let cell = Cell::sql("c", sql);
            assert_eq!(materialization_sql(&cell, &ScriptSplitter).unwrap(), None, "{}", sql);
        }
        let notes = Cell::markdown("m", "SELECT 1");
        assert_eq!(materialization_sql(&notes, &ScriptSplitter).unwrap(), None);
    }

    #[test]
    fn split_errors_propagate() {
        let cell = Cell::sql("c", "SELECT 'open");
        assert!(materialization_sql(&cell, &ScriptSplitter).is_err());
    }

    #[test]
    fn drops_alias_and_ref() {
        let cell = Cell::sql("c1", "SELECT 1").with_name("a");
        assert_eq!(
            drop_materialization_sql(&cell),
            vec![
                "DROP VIEW IF EXISTS \"a\"".to_string(),
                "DROP VIEW IF EXISTS \"__pp_cell_c1\"".to_string(),
            ]
        );
    }

    #[test]
    fn quoting_escapes_quotes() {
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
