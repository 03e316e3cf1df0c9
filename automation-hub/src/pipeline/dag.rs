//! Dependency resolution for pipeline stages.
//!
//! Produces one linear order consistent with the dependency partial order.
//! Ties are broken by declaration order, so a fixed definition always
//! resolves to the same order.

use super::StageDefinition;
use crate::errors::CycleDetectedError;
use std::collections::{BTreeSet, HashMap};

/// Resolves the execution order of `stages`.
///
/// Dependencies on unknown stages are ignored here; the definition
/// validator rejects them before resolution.
///
/// # Errors
///
/// Returns `CycleDetectedError` with the offending path if the graph has a cycle.
pub fn sort(stages: &[StageDefinition]) -> Result<Vec<String>, CycleDetectedError> {
    let index: HashMap<&str, usize> = stages
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    // Dependency edges as declaration indices, deduplicated, unknowns dropped.
    let deps: Vec<Vec<usize>> = stages
        .iter()
        .map(|s| {
            let set: BTreeSet<usize> = s
                .dependencies
                .iter()
                .filter_map(|d| index.get(d.as_str()).copied())
                .collect();
            set.into_iter().collect()
        })
        .collect();

    if let Some(cycle) = find_cycle(stages, &deps) {
        return Err(CycleDetectedError::new(cycle));
    }

    let mut remaining: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];
    for (i, ds) in deps.iter().enumerate() {
        for &d in ds {
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = remaining
        .iter()
        .enumerate()
        .filter(|(_, &n)| n == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(stages.len());

    while let Some(next) = ready.pop_first() {
        order.push(stages[next].id.clone());
        for &child in &dependents[next] {
            remaining[child] -= 1;
            if remaining[child] == 0 {
                ready.insert(child);
            }
        }
    }

    Ok(order)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Depth-first search with a "visiting" marker; meeting a visiting node is a cycle.
fn find_cycle(stages: &[StageDefinition], deps: &[Vec<usize>]) -> Option<Vec<String>> {
    fn visit(
        node: usize,
        deps: &[Vec<usize>],
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[node] = Mark::Visiting;
        path.push(node);

        for &dep in &deps[node] {
            match marks[dep] {
                Mark::Visiting => {
                    let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(dep);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(dep, deps, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        path.pop();
        marks[node] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; stages.len()];
    let mut path = Vec::new();
    for node in 0..stages.len() {
        if marks[node] == Mark::Unvisited {
            if let Some(cycle) = visit(node, deps, &mut marks, &mut path) {
                return Some(cycle.into_iter().map(|i| stages[i].id.clone()).collect());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageKind;
    use pretty_assertions::assert_eq;

    fn stage(id: &str, deps: &[&str]) -> StageDefinition {
        StageDefinition::new(id, StageKind::BusinessLogic).with_dependencies(deps.iter().copied())
    }

    fn ids(order: &[String]) -> Vec<&str> {
        order.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_fan_out_follows_declaration_order() {
        let stages = vec![stage("a", &[]), stage("b", &["a"]), stage("c", &["a"])];
        assert_eq!(ids(&sort(&stages).unwrap()), vec!["a", "b", "c"]);

        let stages = vec![stage("a", &[]), stage("c", &["a"]), stage("b", &["a"])];
        assert_eq!(ids(&sort(&stages).unwrap()), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_forward_declared_dependency() {
        let stages = vec![stage("report", &["load"]), stage("audit", &[]), stage("load", &[])];
        assert_eq!(
            ids(&sort(&stages).unwrap()),
            vec!["audit", "load", "report"]
        );
    }

    #[test]
    fn test_diamond() {
        let stages = vec![
            stage("fetch", &[]),
            stage("enrich", &["fetch"]),
            stage("score", &["fetch"]),
            stage("notify", &["enrich", "score"]),
        ];
        assert_eq!(
            ids(&sort(&stages).unwrap()),
            vec!["fetch", "enrich", "score", "notify"]
        );
    }

    #[test]
    fn test_sort_is_deterministic() {
        let stages = vec![
            stage("e", &["b"]),
            stage("a", &[]),
            stage("b", &["a"]),
            stage("d", &[]),
            stage("c", &["a", "d"]),
        ];
        let first = sort(&stages).unwrap();
        for _ in 0..50 {
            assert_eq!(sort(&stages).unwrap(), first);
        }
        assert_eq!(ids(&first), vec!["a", "b", "e", "d", "c"]);
    }

    #[test]
    fn test_three_node_cycle() {
        let stages = vec![stage("a", &["c"]), stage("b", &["a"]), stage("c", &["b"])];
        let err = sort(&stages).unwrap_err();
        assert_eq!(err.cycle_path, vec!["a", "c", "b", "a"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let stages = vec![stage("a", &[]), stage("b", &["b"])];
        let err = sort(&stages).unwrap_err();
        assert_eq!(err.cycle_path, vec!["b", "b"]);
    }

    #[test]
    fn test_duplicate_dependency_entries() {
        let stages = vec![stage("a", &[]), stage("b", &["a", "a"])];
        assert_eq!(ids(&sort(&stages).unwrap()), vec!["a", "b"]);
    }
}
