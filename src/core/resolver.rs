//! Dependency resolution
//!
//! Builds dependency graphs between entries of a map whose values reference
//! each other through placeholders, and computes a deterministic evaluation
//! order.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashSet};

use tracing::debug;

use crate::core::placeholder::extract_placeholders;
use crate::core::value::Map;
use crate::error::TemplateError;

/// Dependency graph: entry -> entries it depends on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with its dependencies
    pub fn add_node(&mut self, name: &str, dependencies: Vec<String>) {
        self.edges.insert(name.to_string(), dependencies);
    }

    /// Dependencies of a node (empty when unknown)
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Borrow the adjacency map
    pub fn as_map(&self) -> &BTreeMap<String, Vec<String>> {
        &self.edges
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Compute an evaluation order where dependencies come first
    ///
    /// Ready nodes are taken in key order, so the result is deterministic.
    /// Dependencies naming unknown nodes are ignored.
    pub fn topological_sort(&self) -> Result<Vec<String>, TemplateError> {
        let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (node, deps) in &self.edges {
            let known: BTreeSet<&str> = deps
                .iter()
                .map(String::as_str)
                .filter(|dep| self.edges.contains_key(*dep))
                .collect();
            indegree.insert(node.as_str(), known.len());
            for dep in known {
                dependents.entry(dep).or_default().push(node.as_str());
            }
        }

        let mut ready: BinaryHeap<Reverse<&str>> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| Reverse(*node))
            .collect();
        let mut order = Vec::with_capacity(self.edges.len());

        while let Some(Reverse(node)) = ready.pop() {
            order.push(node.to_string());
            for dependent in dependents.get(node).into_iter().flatten() {
                if let Some(degree) = indegree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(*dependent));
                    }
                }
            }
        }

        if order.len() != self.edges.len() {
            return Err(match self.find_cycle() {
                Some(cycle) => TemplateError::CircularDependency { cycle },
                None => TemplateError::UnresolvedCycle,
            });
        }

        debug!("Evaluation order: {}", order.join(", "));
        Ok(order)
    }

    /// Find one concrete cycle, returned with its first node repeated at the end
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut active = HashSet::new();
        let mut path = Vec::new();

        for node in self.edges.keys() {
            if !visited.contains(node.as_str()) {
                if let Some(cycle) = self.visit(node, &mut visited, &mut active, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        active: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        active.insert(node);
        path.push(node);

        for dep in self.dependencies(node) {
            if !self.edges.contains_key(dep) {
                continue;
            }
            if active.contains(dep.as_str()) {
                let start = path.iter().position(|entry| *entry == dep.as_str()).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|s| (*s).to_string()).collect();
                cycle.push(dep.clone());
                return Some(cycle);
            }
            if !visited.contains(dep.as_str()) {
                if let Some(cycle) = self.visit(dep, visited, active, path) {
                    return Some(cycle);
                }
            }
        }

        active.remove(node);
        path.pop();
        None
    }

    /// Check if the graph has any cycles
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }
}

impl From<BTreeMap<String, Vec<String>>> for DependencyGraph {
    fn from(edges: BTreeMap<String, Vec<String>>) -> Self {
        Self { edges }
    }
}

/// Build the dependency graph of a raw entry map
///
/// A placeholder `{{<prefix><name>...}}` inside an entry makes it depend on
/// entry `<name>`, unless `<name>` is not a key of `entries`, is listed in
/// `pre_resolved`, or is the entry itself.
pub fn build_dependency_map(
    entries: &Map,
    prefixes: &[&str],
    pre_resolved: &BTreeSet<String>,
) -> DependencyGraph {
    let mut graph = DependencyGraph::new();

    for (key, value) in entries {
        let mut deps = BTreeSet::new();
        for placeholder in extract_placeholders(value) {
            for prefix in prefixes {
                let Some(rest) = placeholder.strip_prefix(prefix) else {
                    continue;
                };
                let rest = rest.trim();
                if rest.is_empty() {
                    continue;
                }
                let name = rest.split('.').next().unwrap_or(rest);
                if name != key.as_str() && entries.contains_key(name) && !pre_resolved.contains(name) {
                    deps.insert(name.to_string());
                }
            }
        }
        graph.add_node(key, deps.into_iter().collect());
    }

    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use proptest::prelude::*;

    fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (node, deps) in edges {
            graph.add_node(node, deps.iter().map(|d| (*d).to_string()).collect());
        }
        graph
    }

    #[test]
    fn test_simple_dependency_order() {
        let graph = graph(&[("app", &["lib"]), ("lib", &[])]);
        assert_eq!(graph.topological_sort().unwrap(), vec!["lib", "app"]);
    }

    #[test]
    fn test_ties_break_by_name() {
        let graph = graph(&[("c", &[]), ("b", &["c"]), ("a", &[]), ("d", &["a"])]);
        assert_eq!(graph.topological_sort().unwrap(), vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn test_unknown_dependencies_ignored() {
        let graph = graph(&[("a", &["external"])]);
        assert_eq!(graph.topological_sort().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_circular_dependency_detection() {
        let graph = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"]), ("d", &[])]);
        assert!(graph.has_cycle());
        let err = graph.topological_sort().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Circular dependency detected: a -> b -> c -> a"
        );
    }

    #[test]
    fn test_cycle_excludes_lead_in_path() {
        let graph = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["b"])]);
        assert_eq!(graph.find_cycle().unwrap(), vec!["b", "c", "b"]);
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let graph = graph(&[("a", &["a"])]);
        assert_eq!(graph.find_cycle().unwrap(), vec!["a", "a"]);
    }

    #[test]
    fn test_build_dependency_map() {
        let mut entries = Map::new();
        entries.insert("PATH".into(), "{{env.ROOT}}/bin:{{env.PATH}}".into());
        entries.insert("ROOT".into(), "/opt/{{preset.environment.NAME}}".into());
        entries.insert("NAME".into(), "tool".into());
        entries.insert("HOME_DIR".into(), "{{env.HOME}}".into());
        entries.insert(
            "LIST".into(),
            Value::List(vec!["{{env.NAME.suffix}}".into()]),
        );

        let pre_resolved: BTreeSet<String> = ["HOME".to_string()].into_iter().collect();
        let graph = build_dependency_map(
            &entries,
            &["env.", "preset.environment."],
            &pre_resolved,
        );

        assert_eq!(graph.dependencies("PATH"), ["ROOT".to_string()]);
        assert_eq!(graph.dependencies("ROOT"), ["NAME".to_string()]);
        assert!(graph.dependencies("NAME").is_empty());
        assert!(graph.dependencies("HOME_DIR").is_empty());
        assert_eq!(graph.dependencies("LIST"), ["NAME".to_string()]);
        assert_eq!(
            graph.topological_sort().unwrap(),
            vec!["HOME_DIR", "NAME", "LIST", "ROOT", "PATH"]
        );
    }

    #[test]
    fn test_pre_resolved_names_are_excluded() {
        let mut entries = Map::new();
        entries.insert("A".into(), "{{env.B}}".into());
        entries.insert("B".into(), "{{env.A}}".into());
        let pre_resolved: BTreeSet<String> = ["B".to_string()].into_iter().collect();
        let graph = build_dependency_map(&entries, &["env."], &pre_resolved);
        assert!(graph.dependencies("A").is_empty());
        assert_eq!(graph.dependencies("B"), ["A".to_string()]);
        assert!(!graph.has_cycle());
    }

    fn arbitrary_graph() -> impl Strategy<Value = DependencyGraph> {
        (1usize..8).prop_flat_map(|n| {
            prop::collection::vec(prop::collection::vec(0..n, 0..3), n).prop_map(move |deps| {
                let mut graph = DependencyGraph::new();
                for (i, node_deps) in deps.into_iter().enumerate() {
                    graph.add_node(
                        &format!("n{i}"),
                        node_deps.into_iter().map(|d| format!("n{d}")).collect(),
                    );
                }
                graph
            })
        })
    }

    proptest! {
        #[test]
        fn independent_entries_sort_lexicographically(
            keys in prop::collection::btree_set("[a-z]{1,6}", 0..10)
        ) {
            let mut entries = Map::new();
            for key in &keys {
                entries.insert(key.clone(), Value::from("plain"));
            }
            let graph = build_dependency_map(&entries, &["env."], &BTreeSet::new());
            let order = graph.topological_sort().unwrap();
            prop_assert_eq!(order, keys.into_iter().collect::<Vec<_>>());
        }

        #[test]
        fn order_respects_edges_or_cycle_is_real(graph in arbitrary_graph()) {
            match graph.topological_sort() {
                Ok(order) => {
                    prop_assert_eq!(order.len(), graph.len());
                    let position = |name: &str| order.iter().position(|n| n == name);
                    for (node, deps) in graph.as_map() {
                        for dep in deps {
                            prop_assert!(position(dep) < position(node));
                        }
                    }
                }
                Err(TemplateError::CircularDependency { cycle }) => {
                    prop_assert!(cycle.len() >= 2);
                    prop_assert_eq!(cycle.first(), cycle.last());
                    for pair in cycle.windows(2) {
                        prop_assert!(graph.dependencies(&pair[0]).contains(&pair[1]));
                    }
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }
    }
}
