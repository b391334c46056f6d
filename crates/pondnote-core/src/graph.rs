//! Notebook dependency graph.
//!
//! The graph is derived on demand from the current cells and never stored.
//! An edge `consumer -> dependency` means the consumer's SQL reads the
//! dependency's result.
//!
//! # Resolution rules
//!
//! - Every SQL cell answers to its stable reference and, when set, its alias.
//! - A name claimed by more than one SQL cell is ambiguous: all claimants are
//!   reported in [`DependencyGraph::duplicate_name_cells`] and references to
//!   that name are left unresolved rather than picking a winner.
//! - A name matching no cell is recorded in
//!   [`DependencyGraph::unresolved_references`].

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::cell::{Cell, CellId};
use crate::references::extract_cell_references;

/// Consumer cell → cells it depends on.
pub type DependencyEdges = BTreeMap<CellId, BTreeSet<CellId>>;

/// Referenced names per SQL cell, in first-occurrence order.
pub type CellDependencies = BTreeMap<CellId, Vec<String>>;

/// Resolved dependency graph of a notebook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyGraph {
    /// One entry per SQL cell that was analyzed (possibly with no edges).
    pub edges: DependencyEdges,
    /// Names a cell references that matched no cell or an ambiguous alias.
    pub unresolved_references: BTreeMap<CellId, Vec<String>>,
    /// Cells whose alias collides with another cell's.
    pub duplicate_name_cells: BTreeSet<CellId>,
}

impl DependencyGraph {
    /// Direct dependencies of `cell_id`.
    pub fn dependencies_of(&self, cell_id: &CellId) -> impl Iterator<Item = &CellId> {
        self.edges.get(cell_id).into_iter().flatten()
    }

    /// Cells that read `cell_id` directly.
    pub fn dependents_of<'a>(&'a self, cell_id: &'a CellId) -> impl Iterator<Item = &'a CellId> {
        self.edges
            .iter()
            .filter(move |(_, deps)| deps.contains(cell_id))
            .map(|(consumer, _)| consumer)
    }

    pub fn has_unresolved(&self) -> bool {
        self.unresolved_references.values().any(|names| !names.is_empty())
    }
}

/// Every name SQL cells can be referenced by: aliases plus stable refs.
pub fn build_available_cell_names(cells: &[Cell]) -> BTreeSet<String> {
    cells
        .iter()
        .filter(|cell| cell.is_sql())
        .flat_map(|cell| cell.identity.names())
        .map(str::to_string)
        .collect()
}

/// Lexically extract the names each SQL cell references, excluding the
/// cell's own names.
pub fn compute_cell_dependencies(cells: &[Cell], available: &BTreeSet<String>) -> CellDependencies {
    cells
        .iter()
        .filter(|cell| cell.is_sql())
        .map(|cell| (cell.id.clone(), lexical_cell_dependencies(cell, available)))
        .collect()
}

/// Lexical references of a single cell, self-references removed.
pub fn lexical_cell_dependencies(cell: &Cell, available: &BTreeSet<String>) -> Vec<String> {
    extract_cell_references(&cell.content, available)
        .into_iter()
        .filter(|name| !is_self_reference(cell, name))
        .collect()
}

pub(crate) fn is_self_reference(cell: &Cell, name: &str) -> bool {
    cell.identity.names().any(|own| own == name)
}

/// Resolve referenced names to cells.
pub fn build_resolved_dependency_graph(
    cells: &[Cell],
    deps_by_cell: &CellDependencies,
) -> DependencyGraph {
    let mut claimants: HashMap<&str, Vec<&CellId>> = HashMap::new();
    for cell in cells.iter().filter(|cell| cell.is_sql()) {
        for name in cell.identity.names() {
            let entry = claimants.entry(name).or_default();
            if !entry.contains(&&cell.id) {
                entry.push(&cell.id);
            }
        }
    }

    let mut graph = DependencyGraph::default();
    for owners in claimants.values().filter(|owners| owners.len() > 1) {
        graph
            .duplicate_name_cells
            .extend(owners.iter().map(|id| (*id).clone()));
    }

    for (consumer, names) in deps_by_cell {
        let targets = graph.edges.entry(consumer.clone()).or_default();
        for name in names {
            match claimants.get(name.as_str()).map(Vec::as_slice) {
                Some([target]) if *target != consumer => {
                    targets.insert((*target).clone());
                }
                Some([_]) => {}
                _ => graph
                    .unresolved_references
                    .entry(consumer.clone())
                    .or_default()
                    .push(name.clone()),
            }
        }
    }

    trace!(
        cells = graph.edges.len(),
        edges = graph.edges.values().map(BTreeSet::len).sum::<usize>(),
        duplicates = graph.duplicate_name_cells.len(),
        "built dependency graph"
    );
    graph
}

/// Every cell that takes part in at least one cycle.
///
/// Uses Tarjan's strongly connected components: a cell is cyclic when its
/// component has more than one member or it depends on itself.
pub fn detect_circular_dependency_cells(edges: &DependencyEdges) -> BTreeSet<CellId> {
    let mut tarjan = Tarjan::new(edges);
    let nodes: BTreeSet<&CellId> = edges
        .iter()
        .flat_map(|(consumer, deps)| std::iter::once(consumer).chain(deps))
        .collect();
    for node in nodes {
        if !tarjan.index.contains_key(node) {
            tarjan.visit(node);
        }
    }

    let mut cyclic = BTreeSet::new();
    for component in tarjan.components {
        let self_loop = component.len() == 1
            && edges
                .get(component[0])
                .is_some_and(|deps| deps.contains(component[0]));
        if component.len() > 1 || self_loop {
            cyclic.extend(component.into_iter().cloned());
        }
    }
    cyclic
}

struct Tarjan<'a> {
    edges: &'a DependencyEdges,
    next_index: usize,
    index: HashMap<&'a CellId, usize>,
    lowlink: HashMap<&'a CellId, usize>,
    stack: Vec<&'a CellId>,
    on_stack: BTreeSet<&'a CellId>,
    components: Vec<Vec<&'a CellId>>,
}

impl<'a> Tarjan<'a> {
    fn new(edges: &'a DependencyEdges) -> Self {
        Tarjan {
            edges,
            next_index: 0,
            index: HashMap::new(),
            lowlink: HashMap::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            components: Vec::new(),
        }
    }

    fn visit(&mut self, node: &'a CellId) {
        self.index.insert(node, self.next_index);
        self.lowlink.insert(node, self.next_index);
        self.next_index += 1;
        self.stack.push(node);
        self.on_stack.insert(node);

        let edges = self.edges;
        for dep in edges.get(node).into_iter().flatten() {
            if !self.index.contains_key(dep) {
                self.visit(dep);
                let low = self.lowlink[node].min(self.lowlink[dep]);
                self.lowlink.insert(node, low);
            } else if self.on_stack.contains(dep) {
                let low = self.lowlink[node].min(self.index[dep]);
                self.lowlink.insert(node, low);
            }
        }

        if self.lowlink[node] == self.index[node] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(member);
                component.push(member);
                if member == node {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

/// Transitive dependencies of `target`, including `target` itself.
pub fn find_upstream_dependency_cells(
    target: &CellId,
    edges: &DependencyEdges,
) -> BTreeSet<CellId> {
    walk(target, |node| {
        edges
            .get(node)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    })
}

/// Transitive dependents of `target`, including `target` itself.
pub fn find_downstream_dependency_cells(
    target: &CellId,
    edges: &DependencyEdges,
) -> BTreeSet<CellId> {
    let mut reverse: HashMap<&CellId, Vec<CellId>> = HashMap::new();
    for (consumer, deps) in edges {
        for dep in deps {
            reverse.entry(dep).or_default().push(consumer.clone());
        }
    }
    walk(target, |node| reverse.get(node).cloned().unwrap_or_default())
}

fn walk(target: &CellId, mut next: impl FnMut(&CellId) -> Vec<CellId>) -> BTreeSet<CellId> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([target.clone()]);
    while let Some(node) = queue.pop_front() {
        if !seen.insert(node.clone()) {
            continue;
        }
        for neighbour in next(&node) {
            if !seen.contains(&neighbour) {
                queue.push_back(neighbour);
            }
        }
    }
    seen
}

/// Result of [`order_cells_for_execution`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    /// Cells in an order where every dependency runs before its consumers.
    pub ordered: Vec<CellId>,
    /// Cells that could not be ordered because they sit on or behind a cycle.
    pub blocked: Vec<CellId>,
}

/// Order `subset` so dependencies run first (Kahn's algorithm).
///
/// Ties are broken by notebook position, so independent cells run top to
/// bottom. Edges leaving `subset` are ignored. Cells that can never become
/// ready (cycles, or downstream of one) end up in
/// [`ExecutionPlan::blocked`] in notebook order.
pub fn order_cells_for_execution(
    cells: &[Cell],
    edges: &DependencyEdges,
    subset: &BTreeSet<CellId>,
) -> ExecutionPlan {
    let mut positioned: Vec<&Cell> = cells.iter().filter(|c| subset.contains(&c.id)).collect();
    positioned.sort_by_key(|cell| cell.order);
    let position: HashMap<&CellId, usize> = positioned
        .iter()
        .enumerate()
        .map(|(index, cell)| (&cell.id, index))
        .collect();

    let mut pending: HashMap<&CellId, usize> = HashMap::new();
    let mut dependents: HashMap<&CellId, Vec<&CellId>> = HashMap::new();
    for cell in &positioned {
        let deps: Vec<&CellId> = edges
            .get(&cell.id)
            .into_iter()
            .flatten()
            .filter(|dep| position.contains_key(dep))
            .collect();
        pending.insert(&cell.id, deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(&cell.id);
        }
    }

    let mut ready: BTreeSet<(usize, &CellId)> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| (position[id], *id))
        .collect();
    let mut plan = ExecutionPlan::default();
    while let Some(entry) = ready.pop_first() {
        let (_, id) = entry;
        plan.ordered.push(id.clone());
        for consumer in dependents.get(id).into_iter().flatten() {
            if let Some(count) = pending.get_mut(consumer) {
                *count -= 1;
                if *count == 0 {
                    ready.insert((position[consumer], *consumer));
                }
            }
        }
    }

    let done: BTreeSet<&CellId> = plan.ordered.iter().collect();
    plan.blocked = positioned
        .iter()
        .filter(|cell| !done.contains(&cell.id))
        .map(|cell| cell.id.clone())
        .collect();
    plan
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> CellId {
        CellId::from(raw)
    }

    fn set(ids: &[&str]) -> BTreeSet<CellId> {
        ids.iter().map(|raw| id(raw)).collect()
    }

    fn edges(rows: &[(&str, &[&str])]) -> DependencyEdges {
        rows.iter()
            .map(|(consumer, deps)| (id(consumer), set(deps)))
            .collect()
    }

    fn graph_for(cells: &[Cell]) -> DependencyGraph {
        let available = build_available_cell_names(cells);
        let deps = compute_cell_dependencies(cells, &available);
        build_resolved_dependency_graph(cells, &deps)
    }

    mod names {
        use super::*;

        #[test]
        fn available_names_cover_aliases_and_refs_of_sql_cells() {
            let cells = vec![
                Cell::sql("a", "SELECT 1").with_name("orders"),
                Cell::sql("b", "SELECT 2"),
                Cell::markdown("m", "# notes").with_name("ignored"),
            ];
            let names = build_available_cell_names(&cells);
            let expected: BTreeSet<String> = ["orders", "__pp_cell_a", "__pp_cell_b"]
                .iter()
                .map(|s| s.to_string())
                .collect();
            assert_eq!(names, expected);
        }

        #[test]
        fn dependencies_exclude_self_and_markdown() {
            let cells = vec![
                Cell::sql("a", "SELECT * FROM orders").with_name("orders"),
                Cell::sql("b", "SELECT * FROM orders JOIN __pp_cell_b USING (id)"),
                Cell::markdown("m", "FROM orders"),
            ];
            let available = build_available_cell_names(&cells);
            let deps = compute_cell_dependencies(&cells, &available);
            assert_eq!(deps.len(), 2);
            assert!(deps[&id("a")].is_empty());
            assert_eq!(deps[&id("b")], vec!["orders"]);
        }
    }

    mod resolution {
        use super::*;

        #[test]
        fn alias_and_ref_both_resolve() {
            let cells = vec![
                Cell::sql("a", "SELECT 1").with_name("base"),
                Cell::sql("b", "SELECT * FROM base"),
                Cell::sql("c", "SELECT * FROM __pp_cell_b"),
            ];
            let graph = graph_for(&cells);
            assert_eq!(graph.edges[&id("b")], set(&["a"]));
            assert_eq!(graph.edges[&id("c")], set(&["b"]));
            assert!(graph.edges[&id("a")].is_empty());
            assert!(!graph.has_unresolved());
        }

        #[test]
        fn duplicate_alias_is_unresolved() {
            let cells = vec![
                Cell::sql("a", "SELECT 1").with_name("dup"),
                Cell::sql("b", "SELECT 2").with_name("dup"),
                Cell::sql("c", "SELECT * FROM dup"),
            ];
            let graph = graph_for(&cells);
            assert_eq!(graph.duplicate_name_cells, set(&["a", "b"]));
            assert_eq!(graph.unresolved_references[&id("c")], vec!["dup"]);
            assert!(graph.edges[&id("c")].is_empty());
        }

        #[test]
        fn dangling_stable_ref_is_unresolved() {
            let cells = vec![Cell::sql("a", "SELECT * FROM __pp_cell_deleted")];
            let graph = graph_for(&cells);
            assert_eq!(
                graph.unresolved_references[&id("a")],
                vec!["__pp_cell_deleted"]
            );
        }

        #[test]
        fn unknown_names_from_external_lists_are_unresolved() {
            let cells = vec![Cell::sql("a", "SELECT 1")];
            let mut deps = CellDependencies::new();
            deps.insert(id("a"), vec!["nowhere".to_string()]);
            let graph = build_resolved_dependency_graph(&cells, &deps);
            assert_eq!(graph.unresolved_references[&id("a")], vec!["nowhere"]);
        }

        #[test]
        fn dependents_of_direct_consumers() {
            let graph = DependencyGraph {
                edges: edges(&[("b", &["a"]), ("c", &["a", "b"]), ("a", &[])]),
                ..Default::default()
            };
            let target = id("a");
            let consumers: Vec<&CellId> = graph.dependents_of(&target).collect();
            assert_eq!(consumers, vec![&id("b"), &id("c")]);
        }
    }

    mod cycles {
        use super::*;

        #[test]
        fn mutual_reference() {
            let cells = vec![
                Cell::sql("a", "SELECT * FROM __pp_cell_b"),
                Cell::sql("b", "SELECT * FROM __pp_cell_a"),
            ];
            let graph = graph_for(&cells);
            assert_eq!(detect_circular_dependency_cells(&graph.edges), set(&["a", "b"]));
        }

        #[test]
        fn reports_every_member_not_one_example() {
            // a -> b -> c -> a plus the chord a -> c
            let edges = edges(&[("a", &["b", "c"]), ("b", &["c"]), ("c", &["a"]), ("d", &["a"])]);
            assert_eq!(detect_circular_dependency_cells(&edges), set(&["a", "b", "c"]));
        }

        #[test]
        fn self_loop() {
            let edges = edges(&[("a", &["a"]), ("b", &[])]);
            assert_eq!(detect_circular_dependency_cells(&edges), set(&["a"]));
        }

        #[test]
        fn acyclic() {
            let edges = edges(&[("c", &["b"]), ("b", &["a"]), ("a", &[])]);
            assert!(detect_circular_dependency_cells(&edges).is_empty());
        }

        #[test]
        fn two_separate_cycles() {
            let edges = edges(&[("a", &["b"]), ("b", &["a"]), ("x", &["y"]), ("y", &["x"])]);
            assert_eq!(
                detect_circular_dependency_cells(&edges),
                set(&["a", "b", "x", "y"])
            );
        }
    }

    mod traversal {
        use super::*;

        fn diamond() -> DependencyEdges {
            // d reads b and c, both read a
            edges(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"]), ("e", &[])])
        }

        #[test]
        fn upstream_includes_target() {
            assert_eq!(
                find_upstream_dependency_cells(&id("d"), &diamond()),
                set(&["a", "b", "c", "d"])
            );
            assert_eq!(find_upstream_dependency_cells(&id("a"), &diamond()), set(&["a"]));
        }

        #[test]
        fn downstream_includes_target() {
            assert_eq!(
                find_downstream_dependency_cells(&id("a"), &diamond()),
                set(&["a", "b", "c", "d"])
            );
            assert_eq!(find_downstream_dependency_cells(&id("e"), &diamond()), set(&["e"]));
        }

        #[test]
        fn traversal_terminates_on_cycles() {
            let edges = edges(&[("a", &["b"]), ("b", &["a"])]);
            assert_eq!(find_upstream_dependency_cells(&id("a"), &edges), set(&["a", "b"]));
            assert_eq!(find_downstream_dependency_cells(&id("a"), &edges), set(&["a", "b"]));
        }
    }

    mod execution_order {
        use super::*;

        fn notebook(ids: &[&str]) -> Vec<Cell> {
            ids.iter()
                .enumerate()
                .map(|(order, raw)| Cell::sql(*raw, "SELECT 1").with_order(order))
                .collect()
        }

        #[test]
        fn dependencies_run_first() {
            let cells = notebook(&["d", "c", "b", "a"]);
            let edges = edges(&[("d", &["b", "c"]), ("c", &["a"]), ("b", &["a"]), ("a", &[])]);
            let plan = order_cells_for_execution(&cells, &edges, &set(&["a", "b", "c", "d"]));
            assert_eq!(plan.ordered, vec![id("a"), id("c"), id("b"), id("d")]);
            assert!(plan.blocked.is_empty());
        }

        #[test]
        fn independent_cells_keep_notebook_order() {
            let cells = notebook(&["x", "y", "z"]);
            let plan =
                order_cells_for_execution(&cells, &DependencyEdges::new(), &set(&["z", "x"]));
            assert_eq!(plan.ordered, vec![id("x"), id("z")]);
        }

        #[test]
        fn cycles_are_blocked() {
            let cells = notebook(&["a", "b", "c", "d"]);
            let edges = edges(&[("a", &["b"]), ("b", &["a"]), ("c", &["a"]), ("d", &[])]);
            let plan = order_cells_for_execution(&cells, &edges, &set(&["a", "b", "c", "d"]));
            assert_eq!(plan.ordered, vec![id("d")]);
            assert_eq!(plan.blocked, vec![id("a"), id("b"), id("c")]);
        }
    }
}
