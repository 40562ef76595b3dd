//! Read-only filter/sort/paginate engine over the live graph.
//!
//! Filters compose conjunctively; sorting happens after filtering and
//! pagination last. Every returned thought is augmented with its dependency
//! count and the list of thoughts depending on it, both computed against the
//! full node set at query time.

use serde::{Deserialize, Serialize};

use super::{Thought, ThoughtGraph, ThoughtKind, ThoughtStatus};

/// Conjunctive filters over the node set. Unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryFilters {
    /// Exact thought type match.
    pub kind: Option<ThoughtKind>,
    /// Exact status match.
    pub status: Option<ThoughtStatus>,
    /// Case-insensitive substring match on content.
    pub content: Option<String>,
    /// Lower confidence bound. Thoughts without a confidence never match.
    pub min_confidence: Option<f64>,
    /// Upper confidence bound. Thoughts without a confidence never match.
    pub max_confidence: Option<f64>,
    /// Match thoughts listed in this thought's own dependency list.
    pub dependency_of: Option<String>,
    /// Match thoughts whose dependency list contains this id.
    pub depends_on: Option<String>,
}

/// Ordering applied to the filtered set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    /// Newest first by creation timestamp.
    #[default]
    Recent,
    /// Highest confidence first; missing confidence sorts as zero.
    ByConfidence,
    /// Lexicographic by type name.
    ByType,
    /// Lexicographic by content.
    ByContent,
    /// Most dependencies first; duplicate edges count.
    ByDependency,
}

impl std::fmt::Display for SortMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortMode::Recent => write!(f, "recent"),
            SortMode::ByConfidence => write!(f, "by_confidence"),
            SortMode::ByType => write!(f, "by_type"),
            SortMode::ByContent => write!(f, "by_content"),
            SortMode::ByDependency => write!(f, "by_dependency"),
        }
    }
}

impl std::str::FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "recent" => Ok(SortMode::Recent),
            "by_confidence" => Ok(SortMode::ByConfidence),
            "by_type" => Ok(SortMode::ByType),
            "by_content" => Ok(SortMode::ByContent),
            "by_dependency" => Ok(SortMode::ByDependency),
            _ => Err(format!("Unknown sort mode: {}", s)),
        }
    }
}

/// A matched thought augmented with relationship data.
#[derive(Debug, Clone, Serialize)]
pub struct ThoughtView {
    /// The matched thought.
    #[serde(flatten)]
    pub thought: Thought,
    /// Length of the thought's dependency list, duplicates included.
    pub dependency_count: usize,
    /// Ids of thoughts listing this one as a dependency.
    pub dependents: Vec<String>,
}

/// Result of a query: the match count before pagination plus one page.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    /// Number of thoughts matching the filters, independent of paging.
    pub total_matching: usize,
    /// The requested page of matches.
    pub returned: Vec<ThoughtView>,
}

/// Run a query against the graph snapshot.
///
/// An offset at or past the end of the match set yields an empty page with
/// `total_matching` still reported; it is never an error.
pub(crate) fn run_query(
    graph: &ThoughtGraph,
    filters: &QueryFilters,
    sort: SortMode,
    limit: usize,
    offset: usize,
) -> QueryOutcome {
    let needle = filters.content.as_ref().map(|c| c.to_lowercase());

    let mut matched: Vec<&Thought> = graph
        .thoughts()
        .filter(|t| matches(graph, filters, needle.as_deref(), t))
        .collect();

    match sort {
        SortMode::Recent => {
            // Ties fall back to newest-insertion-first, so reverse before
            // the stable sort.
            matched.reverse();
            matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        SortMode::ByConfidence => {
            matched.sort_by(|a, b| {
                let ca = a.confidence.unwrap_or(0.0);
                let cb = b.confidence.unwrap_or(0.0);
                cb.total_cmp(&ca)
            });
        }
        SortMode::ByType => matched.sort_by(|a, b| a.kind.as_str().cmp(b.kind.as_str())),
        SortMode::ByContent => matched.sort_by(|a, b| a.content.cmp(&b.content)),
        SortMode::ByDependency => {
            matched.sort_by(|a, b| b.dependencies.len().cmp(&a.dependencies.len()));
        }
    }

    let total_matching = matched.len();
    let returned = matched
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|t| ThoughtView {
            thought: t.clone(),
            dependency_count: t.dependencies.len(),
            dependents: graph.dependents_of(&t.id),
        })
        .collect();

    QueryOutcome {
        total_matching,
        returned,
    }
}

fn matches(
    graph: &ThoughtGraph,
    filters: &QueryFilters,
    needle: Option<&str>,
    thought: &Thought,
) -> bool {
    if let Some(kind) = filters.kind {
        if thought.kind != kind {
            return false;
        }
    }
    if let Some(status) = filters.status {
        if thought.status != status {
            return false;
        }
    }
    if let Some(needle) = needle {
        if !thought.content.to_lowercase().contains(needle) {
            return false;
        }
    }
    if filters.min_confidence.is_some() || filters.max_confidence.is_some() {
        let Some(confidence) = thought.confidence else {
            return false;
        };
        if filters.min_confidence.is_some_and(|min| confidence < min) {
            return false;
        }
        if filters.max_confidence.is_some_and(|max| confidence > max) {
            return false;
        }
    }
    if let Some(anchor) = &filters.dependency_of {
        let listed = graph
            .get(anchor)
            .map(|a| a.dependencies.iter().any(|d| *d == thought.id))
            .unwrap_or(false);
        if !listed {
            return false;
        }
    }
    if let Some(anchor) = &filters.depends_on {
        if !thought.dependencies.iter().any(|d| d == anchor) {
            return false;
        }
    }
    true
}
