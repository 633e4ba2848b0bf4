//! Structural validation of workflow graphs.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Control, DfsEvent, depth_first_search};

use super::{Edge, Node, NodeId};
use crate::error::{WorkflowError, WorkflowResult};

/// Validates that nodes and edges form a single-rooted DAG.
///
/// Runs five checks in order and stops at the first violation:
/// unique node ids, edge endpoints that exist, no cycle, at least one
/// entry node (in-degree zero), and every node reachable from an entry.
pub fn validate_dag(nodes: &[Node], edges: &[Edge]) -> WorkflowResult<()> {
    let indices = check_unique(nodes)?;
    let graph = check_endpoints(nodes, edges, &indices)?;
    check_acyclic(&graph)?;
    let entries = check_entries(&graph)?;
    check_reachable(&graph, entries)
}

type DagIndex<'a> = HashMap<&'a str, NodeIndex>;
type Dag<'a> = DiGraph<&'a NodeId, ()>;

fn check_unique(nodes: &[Node]) -> WorkflowResult<DagIndex<'_>> {
    let mut indices = HashMap::with_capacity(nodes.len());
    for (position, node) in nodes.iter().enumerate() {
        if indices
            .insert(node.id.as_str(), NodeIndex::new(position))
            .is_some()
        {
            return Err(WorkflowError::DuplicateNode {
                node: node.id.clone(),
            });
        }
    }
    Ok(indices)
}

fn check_endpoints<'a>(
    nodes: &'a [Node],
    edges: &[Edge],
    indices: &DagIndex<'_>,
) -> WorkflowResult<Dag<'a>> {
    let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
    for node in nodes {
        graph.add_node(&node.id);
    }

    for edge in edges {
        let lookup = |id: &NodeId| {
            indices
                .get(id.as_str())
                .copied()
                .ok_or_else(|| WorkflowError::DanglingEdge {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    missing: id.clone(),
                })
        };
        let from = lookup(&edge.from)?;
        let to = lookup(&edge.to)?;
        graph.add_edge(from, to, ());
    }

    Ok(graph)
}

fn check_acyclic(graph: &Dag<'_>) -> WorkflowResult<()> {
    // A back edge points into a node still on the DFS stack.
    let back_edge = depth_first_search(graph, graph.node_indices(), |event| match event {
        DfsEvent::BackEdge(from, to) => Control::Break((from, to)),
        _ => Control::Continue,
    })
    .break_value();

    match back_edge {
        Some((from, to)) => Err(WorkflowError::Cycle {
            from: graph[from].clone(),
            to: graph[to].clone(),
        }),
        None => Ok(()),
    }
}

fn check_entries(graph: &Dag<'_>) -> WorkflowResult<Vec<NodeIndex>> {
    let entries: Vec<_> = graph
        .node_indices()
        .filter(|index| {
            graph
                .neighbors_directed(*index, Direction::Incoming)
                .next()
                .is_none()
        })
        .collect();

    if entries.is_empty() {
        return Err(WorkflowError::NoEntryNode);
    }
    Ok(entries)
}

fn check_reachable(graph: &Dag<'_>, entries: Vec<NodeIndex>) -> WorkflowResult<()> {
    let mut visited = HashSet::with_capacity(graph.node_count());
    depth_first_search(graph, entries, |event| {
        if let DfsEvent::Discover(index, _) = event {
            visited.insert(index);
        }
    });

    match graph.node_indices().find(|index| !visited.contains(index)) {
        Some(index) => Err(WorkflowError::Unreachable {
            node: graph[index].clone(),
        }),
        None => Ok(()),
    }
}
