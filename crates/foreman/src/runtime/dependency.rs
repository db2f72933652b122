//! Dependency graph construction, cycle detection and topological ordering

use crate::config::Procfile;
use indexmap::IndexMap;
use std::collections::HashMap;

/// DFS vertex colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    Visiting,
    Visited,
}

/// Dependency graph over service names.
///
/// Edges point from a dependent to its dependencies. Vertices are kept in
/// declaration order so traversal results are deterministic.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: IndexMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build a dependency graph from a Procfile
    pub fn build(procfile: &Procfile) -> Result<Self, DependencyError> {
        Self::from_edges(
            procfile
                .services
                .iter()
                .map(|(name, spec)| (name.clone(), spec.deps.clone())),
        )
    }

    /// Build a graph from `(service, dependencies)` pairs.
    ///
    /// Every dependency must name a declared vertex; an undeclared name would
    /// otherwise show up in the start order as a service nobody can start.
    pub fn from_edges<I>(edges: I) -> Result<Self, DependencyError>
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let edges: IndexMap<String, Vec<String>> = edges.into_iter().collect();

        for (name, deps) in &edges {
            for dep in deps {
                if !edges.contains_key(dep) {
                    return Err(DependencyError::UnknownDependency {
                        service: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(Self { edges })
    }

    /// Direct dependencies of a service
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Services that directly depend on `name`
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.iter().any(|d| d == name))
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// True if the graph contains a directed cycle
    pub fn is_cyclic(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Return the vertices of the first cycle found, in dependency order
    /// starting and ending at the same service.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut state: HashMap<&str, Visit> = self
            .edges
            .keys()
            .map(|k| (k.as_str(), Visit::Unvisited))
            .collect();
        let mut path: Vec<&str> = Vec::new();

        for vertex in self.edges.keys() {
            if state[vertex.as_str()] == Visit::Unvisited {
                if let Some(cycle) = self.visit_for_cycle(vertex, &mut state, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit_for_cycle<'a>(
        &'a self,
        vertex: &'a str,
        state: &mut HashMap<&'a str, Visit>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        state.insert(vertex, Visit::Visiting);
        path.push(vertex);

        for dep in self.dependencies(vertex) {
            match state.get(dep.as_str()).copied().unwrap_or(Visit::Visited) {
                Visit::Visiting => {
                    // Back edge: the cycle is the path suffix starting at `dep`
                    let start = path.iter().position(|v| *v == dep.as_str()).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|v| v.to_string()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                Visit::Unvisited => {
                    if let Some(cycle) = self.visit_for_cycle(dep, state, path) {
                        return Some(cycle);
                    }
                }
                Visit::Visited => {}
            }
        }

        path.pop();
        state.insert(vertex, Visit::Visited);
        None
    }

    /// Depth-first postorder: each service appears after all of its
    /// (transitive) dependencies.
    ///
    /// The result is only meaningful for acyclic graphs; check
    /// [`is_cyclic`](Self::is_cyclic) first.
    pub fn topological_order(&self) -> Vec<String> {
        let mut visited: HashMap<&str, Visit> = HashMap::with_capacity(self.edges.len());
        let mut order = Vec::with_capacity(self.edges.len());

        for vertex in self.edges.keys() {
            self.visit_postorder(vertex, &mut visited, &mut order);
        }
        order
    }

    fn visit_postorder<'a>(
        &'a self,
        vertex: &'a str,
        visited: &mut HashMap<&'a str, Visit>,
        order: &mut Vec<String>,
    ) {
        if visited.contains_key(vertex) {
            return;
        }
        visited.insert(vertex, Visit::Visited);

        for dep in self.dependencies(vertex) {
            self.visit_postorder(dep, visited, order);
        }
        order.push(vertex.to_string());
    }
}

/// Errors that can occur when building the dependency graph
#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("Service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph {
        DependencyGraph::from_edges(edges.iter().map(|(name, deps)| {
            (
                name.to_string(),
                deps.iter().map(|d| d.to_string()).collect(),
            )
        }))
        .unwrap()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    fn assert_respects_edges(g: &DependencyGraph, order: &[String]) {
        assert_eq!(order.len(), g.len());
        for (name, deps) in &g.edges {
            for dep in deps {
                assert!(
                    position(order, dep) < position(order, name),
                    "{} must start before {}: {:?}",
                    dep,
                    name,
                    order
                );
            }
        }
    }

    #[test]
    fn test_procfile_order() {
        let g = graph(&[("ping", &["redis"]), ("sleep", &["ping"]), ("redis", &[])]);
        assert!(!g.is_cyclic());

        let order = g.topological_order();
        assert_eq!(order, vec!["redis", "ping", "sleep"]);
    }

    #[test]
    fn test_diamond_dependency() {
        let g = graph(&[
            ("d", &["b", "c"]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("a", &[]),
        ]);
        let order = g.topological_order();
        assert_eq!(order[0], "a");
        assert_eq!(order[3], "d");
        assert_respects_edges(&g, &order);
    }

    #[test]
    fn test_disconnected_components() {
        let g = graph(&[
            ("web", &["db"]),
            ("worker", &["queue"]),
            ("db", &[]),
            ("queue", &[]),
            ("cron", &[]),
        ]);
        assert!(!g.is_cyclic());
        assert_respects_edges(&g, &g.topological_order());
    }

    #[test]
    fn test_two_node_cycle() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        assert!(g.is_cyclic());
    }

    #[test]
    fn test_three_node_cycle_reported() {
        let g = graph(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"]), ("d", &[])]);
        let cycle = g.find_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        for name in ["a", "b", "c"] {
            assert!(cycle.iter().any(|n| n == name));
        }
    }

    #[test]
    fn test_cycle_detection_independent_of_declaration_order() {
        let forward = graph(&[("x", &[]), ("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        let backward = graph(&[("c", &["a"]), ("b", &["c"]), ("a", &["b"]), ("x", &[])]);
        assert!(forward.is_cyclic());
        assert!(backward.is_cyclic());
    }

    #[test]
    fn test_shared_dependency_is_not_a_cycle() {
        // Reaching a fully visited vertex twice must not count as a back edge
        let g = graph(&[("a", &["c"]), ("b", &["c"]), ("c", &[])]);
        assert!(!g.is_cyclic());
    }

    #[test]
    fn test_unknown_dependency_error() {
        let result = DependencyGraph::from_edges(vec![(
            "ping".to_string(),
            vec!["redis".to_string()],
        )]);
        assert!(matches!(
            result,
            Err(DependencyError::UnknownDependency { ref dependency, .. }) if dependency == "redis"
        ));
    }

    #[test]
    fn test_dependents() {
        let g = graph(&[("ping", &["redis"]), ("sleep", &["ping"]), ("redis", &[])]);
        assert_eq!(g.dependents("redis"), vec!["ping"]);
        assert!(g.dependents("sleep").is_empty());
    }

    #[test]
    fn test_build_from_procfile() {
        let procfile = Procfile::from_yaml(
            r#"
service_ping:
  cmd: ping -c 1 localhost
  deps: [service_redis]
service_sleep:
  cmd: sleep 1
  deps: [service_ping]
service_redis:
  cmd: redis-server
"#,
        )
        .unwrap();
        let g = DependencyGraph::build(&procfile).unwrap();
        assert_eq!(g.dependencies("service_sleep"), ["service_ping".to_string()]);
        assert_eq!(
            g.topological_order(),
            vec!["service_redis", "service_ping", "service_sleep"]
        );
    }
}
