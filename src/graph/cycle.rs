//! Insertion-time dependency validation.
//!
//! A candidate node is checked before it is added to the graph: every
//! dependency must already exist, and walking the dependency relation from
//! the candidate must never revisit a node that is still on the traversal
//! path. The candidate itself is treated as a virtual root whose outgoing
//! edges are the candidate set; existing nodes contribute their stored
//! dependencies.
//!
//! The walk is an iterative depth-first traversal over an explicit frame
//! stack with gray ("on path") and black ("fully explored") sets, O(V+E)
//! per insertion.

use std::collections::HashSet;

use crate::error::{GraphError, GraphResult};

use super::ThoughtGraph;

/// One unit of work on the traversal stack.
enum Frame<'a> {
    /// Start exploring a node: mark it gray and push its edges.
    Enter(&'a str),
    /// All edges of the node are done: gray -> black.
    Exit(&'a str),
}

/// Validate a candidate dependency set against the current graph.
///
/// Fails with [`GraphError::DanglingDependency`] for any id absent from the
/// graph, and with [`GraphError::Cycle`] if the walk revisits a node on the
/// current path. The graph is not modified.
pub(crate) fn validate_dependencies(
    graph: &ThoughtGraph,
    candidate: &[String],
) -> GraphResult<()> {
    for dependency in candidate {
        if !graph.contains(dependency) {
            return Err(GraphError::DanglingDependency {
                dependency_id: dependency.clone(),
            });
        }
    }

    let mut on_path: HashSet<&str> = HashSet::new();
    let mut explored: HashSet<&str> = HashSet::new();
    let mut stack: Vec<Frame> = candidate.iter().rev().map(|id| Frame::Enter(id)).collect();

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(id) => {
                if on_path.contains(id) {
                    return Err(GraphError::Cycle {
                        thought_id: id.to_string(),
                    });
                }
                if explored.contains(id) {
                    continue;
                }
                on_path.insert(id);
                stack.push(Frame::Exit(id));
                if let Some(node) = graph.get(id) {
                    for dependency in node.dependencies.iter().rev() {
                        stack.push(Frame::Enter(dependency));
                    }
                }
            }
            Frame::Exit(id) => {
                on_path.remove(id);
                explored.insert(id);
            }
        }
    }

    Ok(())
}
