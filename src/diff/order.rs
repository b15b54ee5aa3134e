//! Cycle detection and layered topological ordering.
//!
//! Nodes are indices in declaration order; `edges[i]` lists the nodes `i`
//! depends on. Only the nodes in `nodes` take part.

use std::collections::BTreeSet;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// Finds a dependency cycle by depth-first search over the active path.
///
/// Returns the cycle members in detection order with the first member
/// repeated at the end.
pub fn find_cycle(nodes: &[usize], edges: &[Vec<usize>]) -> Option<Vec<usize>> {
    let members: BTreeSet<usize> = nodes.iter().copied().collect();
    let mut marks = vec![Mark::Unvisited; edges.len()];
    let mut path = Vec::new();

    for &start in &members {
        if marks[start] == Mark::Unvisited {
            if let Some(cycle) = visit(start, &members, edges, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit(
    node: usize,
    members: &BTreeSet<usize>,
    edges: &[Vec<usize>],
    marks: &mut [Mark],
    path: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    marks[node] = Mark::OnPath;
    path.push(node);

    for &next in edges[node].iter().filter(|n| members.contains(n)) {
        match marks[next] {
            Mark::OnPath => {
                let start = path.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(next);
                return Some(cycle);
            }
            Mark::Unvisited => {
                if let Some(cycle) = visit(next, members, edges, marks, path) {
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

/// Groups nodes into layers: every node's dependencies sit in earlier layers.
///
/// Within a layer nodes keep declaration order. Assumes the graph is acyclic;
/// nodes caught in a cycle are left out.
pub fn layers(nodes: &[usize], edges: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut remaining: BTreeSet<usize> = nodes.iter().copied().collect();
    let members = remaining.clone();
    let mut placed = BTreeSet::new();
    let mut result = Vec::new();

    while !remaining.is_empty() {
        let layer: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&n| {
                edges[n]
                    .iter()
                    .all(|d| !members.contains(d) || placed.contains(d))
            })
            .collect();
        if layer.is_empty() {
            break;
        }
        for n in &layer {
            remaining.remove(n);
            placed.insert(*n);
        }
        result.push(layer);
    }
    result
}
