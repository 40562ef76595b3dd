//! Cascading invalidation of an assumption and everything resting on it.
//!
//! Invalidation walks the reverse dependency relation with an explicit
//! work-list and a visited set checked before enqueue, so stack depth stays
//! bounded and every reachable node is staled and reported exactly once even
//! when multiple paths converge on it. A critique thought recording the
//! reason is appended as a side effect; critiques themselves are never
//! cascaded over.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{GraphError, GraphResult};

use super::{Thought, ThoughtGraph, ThoughtKind, ThoughtStatus};

/// Result of invalidating an assumption.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidationOutcome {
    /// Newly staled thought ids, the assumption first, then discovery order.
    pub invalidated_ids: Vec<String>,
    /// Id of the appended critique, absent when the call was a no-op.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critique_id: Option<String>,
}

/// Invalidate the assumption `thought_id`, staling its transitive
/// dependents.
///
/// Fails with [`GraphError::NotFound`] if the id is unknown and
/// [`GraphError::TypeMismatch`] if the thought is not an assumption, in that
/// order; either failure leaves the graph untouched. Invalidating an
/// already-stale assumption is a no-op: nothing is re-walked and no second
/// critique is appended.
pub(crate) fn invalidate(
    graph: &mut ThoughtGraph,
    thought_id: &str,
    reason: &str,
) -> GraphResult<InvalidationOutcome> {
    let target = graph.get(thought_id).ok_or_else(|| GraphError::NotFound {
        thought_id: thought_id.to_string(),
    })?;
    if target.kind != ThoughtKind::Assumption {
        return Err(GraphError::TypeMismatch {
            thought_id: thought_id.to_string(),
            expected: ThoughtKind::Assumption,
            actual: target.kind,
        });
    }
    if target.status == ThoughtStatus::Stale {
        debug!(thought_id, "assumption already stale, skipping cascade");
        return Ok(InvalidationOutcome {
            invalidated_ids: Vec::new(),
            critique_id: None,
        });
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut work_list: VecDeque<String> = VecDeque::new();
    let mut invalidated: Vec<String> = Vec::new();

    visited.insert(thought_id.to_string());
    work_list.push_back(thought_id.to_string());

    while let Some(current) = work_list.pop_front() {
        // Dependents are gathered while `current` is still active, then the
        // node is staled; the visited set keeps converging paths from
        // re-reporting a node.
        for dependent in graph.active_dependents_of(&current) {
            if visited.insert(dependent.clone()) {
                work_list.push_back(dependent);
            }
        }
        graph.mark_stale(&current);
        invalidated.push(current);
    }

    let critique = Thought::new(
        format!("Invalidated because: {}", reason),
        ThoughtKind::Critique,
        vec![thought_id.to_string()],
    );
    let critique_id = graph.insert(critique)?;

    info!(
        assumption_id = thought_id,
        staled = invalidated.len(),
        critique_id = %critique_id,
        "Cascade invalidation applied"
    );

    Ok(InvalidationOutcome {
        invalidated_ids: invalidated,
        critique_id: Some(critique_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn insert(graph: &mut ThoughtGraph, kind: ThoughtKind, deps: Vec<String>) -> String {
        graph
            .insert(Thought::new(format!("{} node", kind), kind, deps))
            .unwrap()
    }

    #[test]
    fn test_invalidate_unknown_id_fails() {
        let mut graph = ThoughtGraph::new();
        let err = graph.invalidate("ghost", "r").unwrap_err();
        assert_eq!(
            err,
            GraphError::NotFound {
                thought_id: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_invalidate_non_assumption_fails_and_graph_untouched() {
        let mut graph = ThoughtGraph::new();
        let h = insert(&mut graph, ThoughtKind::Hypothesis, vec![]);
        let err = graph.invalidate(&h, "r").unwrap_err();
        assert!(matches!(
            err,
            GraphError::TypeMismatch {
                expected: ThoughtKind::Assumption,
                actual: ThoughtKind::Hypothesis,
                ..
            }
        ));
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.stale_count(), 0);
    }

    #[test]
    fn test_cascade_stales_transitive_dependents_in_order() {
        let mut graph = ThoughtGraph::new();
        let a = insert(&mut graph, ThoughtKind::Assumption, vec![]);
        let h = insert(&mut graph, ThoughtKind::Hypothesis, vec![a.clone()]);
        let s = insert(&mut graph, ThoughtKind::Synthesis, vec![h.clone()]);
        let unrelated = insert(&mut graph, ThoughtKind::Evidence, vec![]);

        let outcome = graph.invalidate(&a, "premise fell").unwrap();
        assert_eq!(outcome.invalidated_ids, vec![a.clone(), h, s]);
        assert!(graph.get(&unrelated).unwrap().is_active());

        let critique_id = outcome.critique_id.unwrap();
        let critique = graph.get(&critique_id).unwrap();
        assert_eq!(critique.kind, ThoughtKind::Critique);
        assert_eq!(critique.dependencies, vec![a]);
        assert!(critique.content.contains("premise fell"));
        assert!(critique.is_active());
    }

    #[test]
    fn test_converging_paths_report_once() {
        // a <- b, a <- c, {b, c} <- d: d is reachable twice.
        let mut graph = ThoughtGraph::new();
        let a = insert(&mut graph, ThoughtKind::Assumption, vec![]);
        let b = insert(&mut graph, ThoughtKind::Hypothesis, vec![a.clone()]);
        let c = insert(&mut graph, ThoughtKind::Hypothesis, vec![a.clone()]);
        let d = insert(&mut graph, ThoughtKind::Synthesis, vec![b.clone(), c.clone()]);

        let outcome = graph.invalidate(&a, "r").unwrap();
        assert_eq!(outcome.invalidated_ids, vec![a, b, c, d.clone()]);
        let appearances = outcome
            .invalidated_ids
            .iter()
            .filter(|id| **id == d)
            .count();
        assert_eq!(appearances, 1);
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let mut graph = ThoughtGraph::new();
        let a = insert(&mut graph, ThoughtKind::Assumption, vec![]);
        insert(&mut graph, ThoughtKind::Hypothesis, vec![a.clone()]);

        let first = graph.invalidate(&a, "r").unwrap();
        assert_eq!(first.invalidated_ids.len(), 2);
        let size_after_first = graph.len();

        let second = graph.invalidate(&a, "r again").unwrap();
        assert!(second.invalidated_ids.is_empty());
        assert!(second.critique_id.is_none());
        assert_eq!(graph.len(), size_after_first);
    }

    #[test]
    fn test_critique_survives_cascade_on_shared_assumption() {
        // The critique from invalidating a depends on a; invalidating a
        // second assumption that shares a dependent must not stale it.
        let mut graph = ThoughtGraph::new();
        let a = insert(&mut graph, ThoughtKind::Assumption, vec![]);
        let b = insert(&mut graph, ThoughtKind::Assumption, vec![]);
        insert(
            &mut graph,
            ThoughtKind::Synthesis,
            vec![a.clone(), b.clone()],
        );

        let first = graph.invalidate(&a, "r1").unwrap();
        let critique_id = first.critique_id.unwrap();

        let second = graph.invalidate(&b, "r2").unwrap();
        assert!(graph.get(&critique_id).unwrap().is_active());
        assert!(!second.invalidated_ids.contains(&critique_id));
        // The shared synthesis was already stale from the first cascade.
        assert_eq!(second.invalidated_ids, vec![b]);
    }

    #[test]
    fn test_stale_nodes_never_revert() {
        let mut graph = ThoughtGraph::new();
        let a = insert(&mut graph, ThoughtKind::Assumption, vec![]);
        let b = insert(&mut graph, ThoughtKind::Assumption, vec![]);
        let shared = insert(
            &mut graph,
            ThoughtKind::Hypothesis,
            vec![a.clone(), b.clone()],
        );

        graph.invalidate(&a, "r1").unwrap();
        assert!(!graph.get(&shared).unwrap().is_active());
        graph.invalidate(&b, "r2").unwrap();
        assert!(!graph.get(&shared).unwrap().is_active());
    }
}
