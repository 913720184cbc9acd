//! Topological ordering and reachability over pipeline subgraphs
//!
//! Both executors work on induced subgraphs: only edges whose endpoints are
//! both inside the requested node set are considered. Kahn's algorithm with
//! a lexicographic tie-break makes the order deterministic across runs.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::error::{EngineError, Result};
use crate::pipeline::Edge;

/// Topologically sort `ids` using the edges induced on that set.
///
/// Returns the order plus a map from each node to its direct predecessors
/// within the set, sorted by topological position so callers can merge
/// upstream outputs in a well-defined order (later position wins).
pub fn topo_sort(
    ids: &BTreeSet<String>,
    edges: &[Edge],
) -> Result<(Vec<String>, HashMap<String, Vec<String>>)> {
    let mut upstream: HashMap<String, Vec<String>> = HashMap::new();
    let mut downstream: HashMap<String, Vec<String>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = ids.iter().map(|id| (id.as_str(), 0)).collect();

    for edge in edges {
        if !ids.contains(&edge.source) || !ids.contains(&edge.target) {
            continue;
        }
        upstream
            .entry(edge.target.clone())
            .or_default()
            .push(edge.source.clone());
        downstream
            .entry(edge.source.clone())
            .or_default()
            .push(edge.target.clone());
        *in_degree.get_mut(edge.target.as_str()).expect("endpoint in set") += 1;
    }

    // BTreeSet as the ready queue: pops the lexicographically smallest id.
    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(ids.len());
    while let Some(id) = ready.iter().next().copied() {
        ready.remove(id);
        order.push(id.to_string());
        if let Some(targets) = downstream.get(id) {
            for target in targets {
                let deg = in_degree.get_mut(target.as_str()).expect("endpoint in set");
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(target.as_str());
                }
            }
        }
    }

    if order.len() != ids.len() {
        let sorted: HashSet<&str> = order.iter().map(|s| s.as_str()).collect();
        let mut stuck: Vec<String> = ids
            .iter()
            .filter(|id| !sorted.contains(id.as_str()))
            .cloned()
            .collect();
        stuck.sort();
        return Err(EngineError::Cycle { nodes: stuck });
    }

    let position: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    for predecessors in upstream.values_mut() {
        predecessors.sort_by_key(|id| position[id.as_str()]);
    }

    Ok((order, upstream))
}

/// Nodes reachable from `starts` by following `adjacency`, excluding the
/// start nodes themselves unless they are also someone's successor.
pub fn reachable(
    starts: &[String],
    adjacency: &HashMap<String, Vec<String>>,
) -> HashSet<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<&String> = starts.iter().collect();
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(next) = adjacency.get(id) {
            queue.extend(next.iter());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_topo_sort_linear() {
        let edges = vec![Edge::new("a", "b"), Edge::new("b", "c")];
        let (order, upstream) = topo_sort(&ids(&["a", "b", "c"]), &edges).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(upstream["b"], vec!["a"]);
    }

    #[test]
    fn test_topo_sort_tie_break_is_lexicographic() {
        let edges = vec![Edge::new("z", "m")];
        let (order, _) = topo_sort(&ids(&["z", "a", "m", "b"]), &edges).unwrap();
        assert_eq!(order, vec!["a", "b", "z", "m"]);
    }

    #[test]
    fn test_topo_sort_ignores_edges_outside_set() {
        let edges = vec![Edge::new("a", "b"), Edge::new("outside", "a")];
        let (order, _) = topo_sort(&ids(&["a", "b"]), &edges).unwrap();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn test_topo_sort_detects_cycle() {
        let edges = vec![Edge::new("a", "b"), Edge::new("b", "a")];
        let err = topo_sort(&ids(&["a", "b"]), &edges).unwrap_err();
        match err {
            EngineError::Cycle { nodes } => assert_eq!(nodes, vec!["a", "b"]),
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn test_upstream_sorted_by_topo_position() {
        // Edge declaration order lists c first, but b precedes c in the
        // topological order, so the upstream list for d is re-sorted.
        let edges = vec![
            Edge::new("c", "d"),
            Edge::new("a", "b"),
            Edge::new("b", "d"),
        ];
        let (order, upstream) = topo_sort(&ids(&["a", "b", "c", "d"]), &edges).unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        assert_eq!(upstream["d"], vec!["b", "c"]);
    }

    #[test]
    fn test_reachable_walks_transitively() {
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        adjacency.insert("p1".into(), vec!["p2".into()]);
        adjacency.insert("p2".into(), vec!["p3".into()]);
        let set = reachable(&["p1".to_string()], &adjacency);
        assert!(set.contains("p1") && set.contains("p2") && set.contains("p3"));
        assert!(!set.contains("p4"));
    }
}
