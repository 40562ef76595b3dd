//! In-memory deliberation graph: typed thought nodes joined by dependency
//! edges.
//!
//! The graph is append-only. A thought is inserted once with immutable
//! content, type, and dependencies; its status is the only mutable attribute
//! and moves `active` -> `stale` exactly once, driven by cascade
//! invalidation. Dependencies may only point at thoughts that already exist,
//! so the relation stays acyclic as long as insertion-time validation holds.
//!
//! Nodes are kept in an id -> thought map plus an insertion-order index. The
//! order index is what makes reverse-dependency scans and query tie-breaking
//! deterministic; it is not load-bearing for correctness.

mod cascade;
mod cycle;
mod query;

pub use cascade::InvalidationOutcome;
pub use query::{QueryFilters, QueryOutcome, SortMode, ThoughtView};

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GraphResult;

/// Semantic role of a thought within a deliberation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtKind {
    /// The goal the deliberation works toward.
    Objective,
    /// A proposition under active consideration.
    Hypothesis,
    /// A premise taken as true; the only type that can be invalidated.
    Assumption,
    /// An open question raised during deliberation.
    Question,
    /// A decomposed piece of the overall problem.
    SubProblem,
    /// An observation or fact supporting other thoughts.
    Evidence,
    /// A request to act, optionally carrying a tool invocation.
    Action,
    /// A combination of earlier thoughts into a conclusion.
    Synthesis,
    /// A challenge to another thought; appended by invalidation.
    Critique,
}

impl ThoughtKind {
    /// Wire-format name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThoughtKind::Objective => "objective",
            ThoughtKind::Hypothesis => "hypothesis",
            ThoughtKind::Assumption => "assumption",
            ThoughtKind::Question => "question",
            ThoughtKind::SubProblem => "sub_problem",
            ThoughtKind::Evidence => "evidence",
            ThoughtKind::Action => "action",
            ThoughtKind::Synthesis => "synthesis",
            ThoughtKind::Critique => "critique",
        }
    }
}

impl std::fmt::Display for ThoughtKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ThoughtKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "objective" => Ok(ThoughtKind::Objective),
            "hypothesis" => Ok(ThoughtKind::Hypothesis),
            "assumption" => Ok(ThoughtKind::Assumption),
            "question" => Ok(ThoughtKind::Question),
            "sub_problem" => Ok(ThoughtKind::SubProblem),
            "evidence" => Ok(ThoughtKind::Evidence),
            "action" => Ok(ThoughtKind::Action),
            "synthesis" => Ok(ThoughtKind::Synthesis),
            "critique" => Ok(ThoughtKind::Critique),
            _ => Err(format!("Unknown thought type: {}", s)),
        }
    }
}

/// Validity status of a thought.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtStatus {
    /// The thought is currently considered reliable.
    #[default]
    Active,
    /// The thought rests on an invalidated assumption. Terminal.
    Stale,
}

impl std::fmt::Display for ThoughtStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThoughtStatus::Active => write!(f, "active"),
            ThoughtStatus::Stale => write!(f, "stale"),
        }
    }
}

impl std::str::FromStr for ThoughtStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ThoughtStatus::Active),
            "stale" => Ok(ThoughtStatus::Stale),
            _ => Err(format!("Unknown thought status: {}", s)),
        }
    }
}

/// A tool invocation requested by a thought.
///
/// Parameters are an opaque, order-preserving map of string keys to JSON
/// values. The core validates shape only, never business meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Name of the tool to invoke.
    pub tool: String,
    /// Opaque parameters, in the order the caller supplied them.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// A single typed, timestamped statement in the deliberation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    /// Unique thought identifier.
    pub id: String,
    /// The statement text.
    pub content: String,
    /// Semantic role of the statement.
    #[serde(rename = "type")]
    pub kind: ThoughtKind,
    /// Ids of thoughts this one rests on. Order preserved, duplicates kept.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Optional confidence in [0, 1].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Optional tool invocation requested by this thought.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_request: Option<ActionRequest>,
    /// When the thought was created.
    pub created_at: DateTime<Utc>,
    /// Current validity status.
    pub status: ThoughtStatus,
}

impl Thought {
    /// Create a new active thought with a fresh id.
    pub fn new(
        content: impl Into<String>,
        kind: ThoughtKind,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            kind,
            dependencies,
            confidence: None,
            action_request: None,
            created_at: Utc::now(),
            status: ThoughtStatus::Active,
        }
    }

    /// Set the confidence level
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    /// Attach an action request
    pub fn with_action_request(mut self, action_request: ActionRequest) -> Self {
        self.action_request = Some(action_request);
        self
    }

    /// Whether the thought is still active.
    pub fn is_active(&self) -> bool {
        self.status == ThoughtStatus::Active
    }
}

/// The deliberation graph for one session.
///
/// Maps thought ids to thoughts and tracks insertion order. Append-only for
/// nodes; the only mutation after insert is the active -> stale transition
/// applied by [`ThoughtGraph::invalidate`].
#[derive(Debug, Clone)]
pub struct ThoughtGraph {
    session_id: String,
    created_at: DateTime<Utc>,
    nodes: HashMap<String, Thought>,
    order: Vec<String>,
}

impl ThoughtGraph {
    /// Create an empty graph for a brand-new session.
    pub fn new() -> Self {
        Self::with_session_id(Uuid::new_v4().to_string())
    }

    /// Create an empty graph with an externally chosen session id.
    pub fn with_session_id(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            nodes: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Rebuild a graph from persisted parts, preserving stored order.
    ///
    /// Thoughts were validated when first inserted, so this skips the cycle
    /// guard; the store is trusted to return what it was given.
    pub fn from_parts(
        session_id: impl Into<String>,
        created_at: DateTime<Utc>,
        thoughts: Vec<Thought>,
    ) -> Self {
        let mut graph = Self {
            session_id: session_id.into(),
            created_at,
            nodes: HashMap::with_capacity(thoughts.len()),
            order: Vec::with_capacity(thoughts.len()),
        };
        for thought in thoughts {
            graph.insert_unchecked(thought);
        }
        graph
    }

    /// The immutable session id this graph belongs to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// When the session was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Number of thoughts in the graph.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the graph holds no thoughts.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether a thought with the given id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Look up a thought by id.
    pub fn get(&self, id: &str) -> Option<&Thought> {
        self.nodes.get(id)
    }

    /// Iterate thoughts in insertion order.
    pub fn thoughts(&self) -> impl Iterator<Item = &Thought> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Insert a thought after validating its dependencies.
    ///
    /// Every dependency must already exist and accepting the edge set must
    /// not close a cycle. On error the graph is unchanged. Returns the id of
    /// the inserted thought.
    pub fn insert(&mut self, thought: Thought) -> GraphResult<String> {
        cycle::validate_dependencies(self, &thought.dependencies)?;
        let id = thought.id.clone();
        self.insert_unchecked(thought);
        Ok(id)
    }

    /// Invalidate an assumption and stale everything resting on it.
    ///
    /// See [`cascade`] for the traversal contract. Appends one critique
    /// thought recording `reason` unless the assumption was already stale.
    pub fn invalidate(&mut self, thought_id: &str, reason: &str) -> GraphResult<InvalidationOutcome> {
        cascade::invalidate(self, thought_id, reason)
    }

    /// Filter, sort, and paginate the current node set.
    pub fn query(
        &self,
        filters: &QueryFilters,
        sort: SortMode,
        limit: usize,
        offset: usize,
    ) -> QueryOutcome {
        query::run_query(self, filters, sort, limit, offset)
    }

    /// Ids of thoughts that list `id` among their dependencies, in insertion
    /// order. Computed by a full scan.
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.thoughts()
            .filter(|t| t.dependencies.iter().any(|d| d == id))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Thought counts grouped by type name.
    pub fn counts_by_kind(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for thought in self.thoughts() {
            *counts.entry(thought.kind.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Number of stale thoughts.
    pub fn stale_count(&self) -> usize {
        self.thoughts().filter(|t| !t.is_active()).count()
    }

    /// Append without validation. Used for rebuilds from the store and by
    /// tests that need to seed specific shapes.
    pub(crate) fn insert_unchecked(&mut self, thought: Thought) {
        self.order.push(thought.id.clone());
        self.nodes.insert(thought.id.clone(), thought);
    }

    /// Mark a thought stale. No-op for unknown ids; never reverts.
    pub(crate) fn mark_stale(&mut self, id: &str) {
        if let Some(thought) = self.nodes.get_mut(id) {
            thought.status = ThoughtStatus::Stale;
        }
    }

    /// Ids of active, non-critique thoughts depending on `id`, in insertion
    /// order. Critiques record invalidations and are never cascaded over.
    pub(crate) fn active_dependents_of(&self, id: &str) -> Vec<String> {
        self.thoughts()
            .filter(|t| {
                t.is_active()
                    && t.kind != ThoughtKind::Critique
                    && t.dependencies.iter().any(|d| d == id)
            })
            .map(|t| t.id.clone())
            .collect()
    }
}

impl Default for ThoughtGraph {
    fn default() -> Self {
        Self::new()
    }
}
