//! Lineage-aware dependency resolution.
//!
//! A [`DependencyResolver`] holds an ordered list of [`ReferenceStrategy`]
//! implementations sharing one `Result<names, error>` signature. For each
//! cell the first strategy that succeeds with at least one name wins; the
//! last strategy's answer is used as-is, even when empty. The usual chain is
//! [`LineageStrategy`] (ask a statement-level lineage analyzer) followed by
//! [`LexicalStrategy`] (tokenizer-based extraction, which never fails).
//!
//! Cells are resolved concurrently: one future per SQL cell, all awaited
//! before the aggregate map is returned. Fallbacks are per cell and never
//! surface as errors.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cell::Cell;
use crate::graph::{is_self_reference, lexical_cell_dependencies, CellDependencies};
use crate::naming::is_stable_ref;
use crate::scan::{tokenize, unescape_quoted, TokenKind};

// ============================================================================
// Analyzer interface
// ============================================================================

/// Errors from a lineage analyzer or strategy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineageError {
    /// The analyzer could not run or returned garbage.
    #[error("lineage analyzer failed: {message}")]
    Analyzer { message: String },

    /// The analyzer ran but flagged its own report as erroneous.
    #[error("lineage report contains errors")]
    ReportedErrors,

    /// The analyzer does not support the requested dialect.
    #[error("unsupported SQL dialect: {dialect}")]
    UnsupportedDialect { dialect: String },
}

impl LineageError {
    pub fn analyzer(message: impl Into<String>) -> Self {
        LineageError::Analyzer {
            message: message.into(),
        }
    }
}

/// Kind of a node in a lineage report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Table,
    Column,
    Cte,
    Output,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageNode {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub label: Option<String>,
}

impl LineageNode {
    pub fn table(label: impl Into<String>) -> Self {
        LineageNode {
            node_type: NodeType::Table,
            label: Some(label.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLineage {
    #[serde(default)]
    pub nodes: Vec<LineageNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageSummary {
    #[serde(default)]
    pub has_errors: bool,
}

/// What a lineage analyzer returns for one SQL text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageReport {
    #[serde(default)]
    pub summary: LineageSummary,
    #[serde(default)]
    pub statements: Vec<StatementLineage>,
}

impl LineageReport {
    /// A report with one statement containing the given table nodes.
    pub fn from_tables<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LineageReport {
            summary: LineageSummary::default(),
            statements: vec![StatementLineage {
                nodes: labels.into_iter().map(LineageNode::table).collect(),
            }],
        }
    }

    /// Labels of table nodes, in report order.
    pub fn table_labels(&self) -> impl Iterator<Item = &str> {
        self.statements
            .iter()
            .flat_map(|statement| &statement.nodes)
            .filter(|node| node.node_type == NodeType::Table)
            .filter_map(|node| node.label.as_deref())
    }
}

/// Known tables and their columns, handed to the analyzer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaHint {
    pub tables: Vec<TableSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
}

/// Statement-level lineage analyzer.
///
/// `#[async_trait]` keeps the trait object-safe so resolvers can hold
/// `Arc<dyn LineageAnalyzer>`.
#[async_trait]
pub trait LineageAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        sql: &str,
        schema: Option<&SchemaHint>,
        dialect: Option<&str>,
    ) -> Result<LineageReport, LineageError>;
}

/// Schema and dialect passed along with every analyzer call.
#[derive(Debug, Clone, Default)]
pub struct LineageOptions {
    pub schema: Option<SchemaHint>,
    pub dialect: Option<String>,
}

// ============================================================================
// Strategies
// ============================================================================

/// One way of finding the names a cell references.
#[async_trait]
pub trait ReferenceStrategy: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    async fn resolve(
        &self,
        cell: &Cell,
        available: &BTreeSet<String>,
    ) -> Result<Vec<String>, LineageError>;
}

/// Tokenizer-based extraction; see [`crate::references`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalStrategy;

#[async_trait]
impl ReferenceStrategy for LexicalStrategy {
    fn name(&self) -> &'static str {
        "lexical"
    }

    async fn resolve(
        &self,
        cell: &Cell,
        available: &BTreeSet<String>,
    ) -> Result<Vec<String>, LineageError> {
        Ok(lexical_cell_dependencies(cell, available))
    }
}

/// Names taken from the table nodes of a lineage report.
///
/// A label is usable when, after normalization, it is an available name or
/// carries the stable-reference prefix. Reports flagged with `has_errors`
/// count as failures.
pub struct LineageStrategy {
    analyzer: Arc<dyn LineageAnalyzer>,
    options: LineageOptions,
}

impl LineageStrategy {
    pub fn new(analyzer: Arc<dyn LineageAnalyzer>, options: LineageOptions) -> Self {
        LineageStrategy { analyzer, options }
    }
}

#[async_trait]
impl ReferenceStrategy for LineageStrategy {
    fn name(&self) -> &'static str {
        "lineage"
    }

    async fn resolve(
        &self,
        cell: &Cell,
        available: &BTreeSet<String>,
    ) -> Result<Vec<String>, LineageError> {
        let report = self
            .analyzer
            .analyze(
                &cell.content,
                self.options.schema.as_ref(),
                self.options.dialect.as_deref(),
            )
            .await?;
        if report.summary.has_errors {
            return Err(LineageError::ReportedErrors);
        }

        let mut seen = HashSet::new();
        let names = report
            .table_labels()
            .filter_map(normalize_table_label)
            .filter(|name| available.contains(name) || is_stable_ref(name))
            .filter(|name| !is_self_reference(cell, name))
            .filter(|name| seen.insert(name.clone()))
            .collect();
        Ok(names)
    }
}

/// Reduce an analyzer label such as `main."orders"` to the bare table name.
///
/// Only dots outside double quotes separate segments.
pub fn normalize_table_label(label: &str) -> Option<String> {
    let label = label.trim();
    let tokens = tokenize(label);
    let segment_start = tokens
        .iter()
        .rposition(|token| token.kind == TokenKind::Symbol && token.text(label) == ".")
        .map_or(0, |dot| tokens[dot].span.end);
    let segment = label[segment_start..].trim();

    let segment_tokens = tokenize(segment);
    let unquoted = match segment_tokens.as_slice() {
        [token] if token.terminated => match token.quoted_inner_span() {
            Some(inner) => unescape_quoted(&segment[inner.start..inner.end]).into_owned(),
            None => segment.to_string(),
        },
        _ => segment.to_string(),
    };
    if unquoted.is_empty() {
        None
    } else {
        Some(unquoted)
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Ordered fallback chain of reference strategies.
pub struct DependencyResolver {
    strategies: Vec<Box<dyn ReferenceStrategy>>,
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::lexical()
    }
}

impl DependencyResolver {
    /// An empty chain. Cells resolve to no names until a strategy is added.
    pub fn empty() -> Self {
        DependencyResolver {
            strategies: Vec::new(),
        }
    }

    /// Lexical extraction only.
    pub fn lexical() -> Self {
        Self::empty().with_strategy(LexicalStrategy)
    }

    /// Lineage analysis with lexical fallback.
    pub fn with_lineage(analyzer: Arc<dyn LineageAnalyzer>, options: LineageOptions) -> Self {
        Self::empty()
            .with_strategy(LineageStrategy::new(analyzer, options))
            .with_strategy(LexicalStrategy)
    }

    /// Append a strategy to the end of the chain.
    pub fn with_strategy(mut self, strategy: impl ReferenceStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Resolve one cell through the chain.
    pub async fn resolve_cell(&self, cell: &Cell, available: &BTreeSet<String>) -> Vec<String> {
        let last = self.strategies.len().saturating_sub(1);
        for (index, strategy) in self.strategies.iter().enumerate() {
            match strategy.resolve(cell, available).await {
                Ok(names) if !names.is_empty() || index == last => return names,
                Ok(_) => debug!(
                    cell = %cell.id,
                    strategy = strategy.name(),
                    "no usable references, falling back"
                ),
                Err(err) => debug!(
                    cell = %cell.id,
                    strategy = strategy.name(),
                    error = %err,
                    "strategy failed, falling back"
                ),
            }
        }
        Vec::new()
    }

    /// Resolve every SQL cell concurrently.
    pub async fn resolve(&self, cells: &[Cell], available: &BTreeSet<String>) -> CellDependencies {
        let sql_cells: Vec<&Cell> = cells.iter().filter(|cell| cell.is_sql()).collect();
        let resolved = join_all(
            sql_cells
                .iter()
                .map(|cell| self.resolve_cell(cell, available)),
        )
        .await;
        sql_cells
            .into_iter()
            .map(|cell| cell.id.clone())
            .zip(resolved)
            .collect()
    }
}

/// Per-cell dependencies from a lineage analyzer, with lexical fallback for
/// any cell whose analysis fails or yields no usable table.
pub async fn compute_cell_dependencies_with_lineage(
    cells: &[Cell],
    available: &BTreeSet<String>,
    analyzer: Arc<dyn LineageAnalyzer>,
    options: LineageOptions,
) -> CellDependencies {
    DependencyResolver::with_lineage(analyzer, options)
        .resolve(cells, available)
        .await
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellId;
    use crate::graph::{build_available_cell_names, compute_cell_dependencies};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Failing;

    #[async_trait]
    impl LineageAnalyzer for Failing {
        async fn analyze(
            &self,
            _sql: &str,
            _schema: Option<&SchemaHint>,
            _dialect: Option<&str>,
        ) -> Result<LineageReport, LineageError> {
            Err(LineageError::analyzer("parse error"))
        }
    }

    struct Empty;

    #[async_trait]
    impl LineageAnalyzer for Empty {
        async fn analyze(
            &self,
            _sql: &str,
            _schema: Option<&SchemaHint>,
            _dialect: Option<&str>,
        ) -> Result<LineageReport, LineageError> {
            Ok(LineageReport::default())
        }
    }

    /// Returns a canned report per SQL text and records every call.
    #[derive(Default)]
    struct Scripted {
        reports: HashMap<String, LineageReport>,
        calls: AtomicUsize,
        dialects: Mutex<Vec<Option<String>>>,
    }

    impl Scripted {
        fn with(mut self, sql: &str, report: LineageReport) -> Self {
            self.reports.insert(sql.to_string(), report);
            self
        }
    }

    #[async_trait]
    impl LineageAnalyzer for Scripted {
        async fn analyze(
            &self,
            sql: &str,
            _schema: Option<&SchemaHint>,
            dialect: Option<&str>,
        ) -> Result<LineageReport, LineageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.dialects
                .lock()
                .unwrap()
                .push(dialect.map(str::to_string));
            self.reports
                .get(sql)
                .cloned()
                .ok_or_else(|| LineageError::analyzer("no report"))
        }
    }

    fn notebook() -> Vec<Cell> {
        vec![
            Cell::sql("a", "SELECT 1 AS id").with_name("base"),
            Cell::sql("b", "SELECT * FROM base"),
            Cell::sql("c", "SELECT * FROM __pp_cell_b JOIN base USING (id)"),
            Cell::markdown("m", "base"),
        ]
    }

    async fn with_analyzer(analyzer: Arc<dyn LineageAnalyzer>) -> CellDependencies {
        let cells = notebook();
        let available = build_available_cell_names(&cells);
        compute_cell_dependencies_with_lineage(
            &cells,
            &available,
            analyzer,
            LineageOptions::default(),
        )
        .await
    }

    fn lexical() -> CellDependencies {
        let cells = notebook();
        let available = build_available_cell_names(&cells);
        compute_cell_dependencies(&cells, &available)
    }

    mod fallback {
        use super::*;

        #[tokio::test]
        async fn analyzer_error_matches_lexical() {
            assert_eq!(with_analyzer(Arc::new(Failing)).await, lexical());
        }

        #[tokio::test]
        async fn empty_report_matches_lexical() {
            assert_eq!(with_analyzer(Arc::new(Empty)).await, lexical());
        }

        #[tokio::test]
        async fn report_with_errors_falls_back() {
            let mut report = LineageReport::from_tables(["nonsense_but_known"]);
            report.summary.has_errors = true;
            let analyzer = Scripted::default().with("SELECT * FROM base", report);
            let deps = with_analyzer(Arc::new(analyzer)).await;
            assert_eq!(deps[&CellId::from("b")], vec!["base"]);
        }

        #[tokio::test]
        async fn unknown_labels_only_fall_back() {
            let analyzer = Scripted::default()
                .with("SELECT * FROM base", LineageReport::from_tables(["somewhere_else"]));
            let deps = with_analyzer(Arc::new(analyzer)).await;
            assert_eq!(deps[&CellId::from("b")], vec!["base"]);
        }
    }

    mod lineage_results {
        use super::*;

        #[tokio::test]
        async fn normalized_labels_are_used() {
            let analyzer = Scripted::default().with(
                "SELECT * FROM __pp_cell_b JOIN base USING (id)",
                LineageReport::from_tables(["memory.main.\"base\"", "main.__pp_cell_b", "base"]),
            );
            let deps = with_analyzer(Arc::new(analyzer)).await;
            assert_eq!(deps[&CellId::from("c")], vec!["base", "__pp_cell_b"]);
        }

        #[tokio::test]
        async fn self_references_are_dropped() {
            let analyzer = Scripted::default().with(
                "SELECT 1 AS id",
                LineageReport::from_tables(["base", "__pp_cell_a"]),
            );
            let deps = with_analyzer(Arc::new(analyzer)).await;
            assert!(deps[&CellId::from("a")].is_empty());
        }

        #[tokio::test]
        async fn non_table_nodes_are_ignored() {
            let report = LineageReport {
                summary: LineageSummary::default(),
                statements: vec![StatementLineage {
                    nodes: vec![
                        LineageNode {
                            node_type: NodeType::Column,
                            label: Some("__pp_cell_a".into()),
                        },
                        LineageNode {
                            node_type: NodeType::Table,
                            label: None,
                        },
                    ],
                }],
            };
            let analyzer = Scripted::default().with("SELECT * FROM base", report);
            let deps = with_analyzer(Arc::new(analyzer)).await;
            assert_eq!(deps[&CellId::from("b")], vec!["base"]);
        }

        #[tokio::test]
        async fn one_call_per_sql_cell_with_dialect() {
            let analyzer = Arc::new(Scripted::default());
            let cells = notebook();
            let available = build_available_cell_names(&cells);
            let options = LineageOptions {
                schema: None,
                dialect: Some("duckdb".into()),
            };
            let deps = compute_cell_dependencies_with_lineage(
                &cells,
                &available,
                analyzer.clone(),
                options,
            )
            .await;
            assert_eq!(deps.len(), 3);
            assert_eq!(analyzer.calls.load(Ordering::SeqCst), 3);
            let dialects = analyzer.dialects.lock().unwrap();
            assert!(dialects.iter().all(|d| d.as_deref() == Some("duckdb")));
        }
    }

    mod chain {
        use super::*;

        struct Fixed(Vec<&'static str>);

        #[async_trait]
        impl ReferenceStrategy for Fixed {
            fn name(&self) -> &'static str {
                "fixed"
            }

            async fn resolve(
                &self,
                _cell: &Cell,
                _available: &BTreeSet<String>,
            ) -> Result<Vec<String>, LineageError> {
                Ok(self.0.iter().map(|s| s.to_string()).collect())
            }
        }

        #[tokio::test]
        async fn first_non_empty_wins() {
            let resolver = DependencyResolver::empty()
                .with_strategy(Fixed(vec![]))
                .with_strategy(Fixed(vec!["x"]))
                .with_strategy(Fixed(vec!["y"]));
            let names = resolver
                .resolve_cell(&Cell::sql("a", ""), &BTreeSet::new())
                .await;
            assert_eq!(names, vec!["x"]);
        }

        #[tokio::test]
        async fn last_strategy_result_used_even_if_empty() {
            let resolver = DependencyResolver::empty()
                .with_strategy(Fixed(vec![]))
                .with_strategy(Fixed(vec![]));
            let names = resolver
                .resolve_cell(&Cell::sql("a", ""), &BTreeSet::new())
                .await;
            assert!(names.is_empty());
        }

        #[tokio::test]
        async fn empty_chain_resolves_nothing() {
            let cells = notebook();
            let deps = DependencyResolver::empty()
                .resolve(&cells, &build_available_cell_names(&cells))
                .await;
            assert!(deps.values().all(Vec::is_empty));
        }

        #[test]
        fn default_chain_names() {
            assert_eq!(DependencyResolver::default().strategy_names(), vec!["lexical"]);
            let resolver =
                DependencyResolver::with_lineage(Arc::new(Empty), LineageOptions::default());
            assert_eq!(resolver.strategy_names(), vec!["lineage", "lexical"]);
        }
    }

    mod labels {
        use super::*;

        #[test]
        fn normalization() {
            assert_eq!(normalize_table_label("orders").as_deref(), Some("orders"));
            assert_eq!(normalize_table_label("db.main.orders").as_deref(), Some("orders"));
            assert_eq!(normalize_table_label("\"My \"\"T\"\"\"").as_deref(), Some("My \"T\""));
            assert_eq!(normalize_table_label("  "), None);
            assert_eq!(normalize_table_label("\"\""), None);
        }

        #[test]
        fn dots_inside_quotes_stay_in_the_name() {
            assert_eq!(
                normalize_table_label("main.\"my.table\"").as_deref(),
                Some("my.table")
            );
            assert_eq!(normalize_table_label("\"a.b\".c").as_deref(), Some("c"));
            assert_eq!(normalize_table_label("\"x.y\"").as_deref(), Some("x.y"));
        }
    }

    #[test]
    fn analyzer_is_object_safe() {
        fn _assert_object_safe(_: Arc<dyn LineageAnalyzer>) {}
    }

    #[test]
    fn report_deserializes_from_analyzer_json() {
        let json = r#"{
            "summary": {"hasErrors": false},
            "statements": [{"nodes": [
                {"type": "table", "label": "orders"},
                {"type": "column", "label": "orders.id"},
                {"type": "join_edge"}
            ]}]
        }"#;
        let report: LineageReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.table_labels().collect::<Vec<_>>(), vec!["orders"]);
        assert_eq!(report.statements[0].nodes[2].node_type, NodeType::Other);
    }
}
