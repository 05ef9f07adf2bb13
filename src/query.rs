use std::collections::HashSet;
use std::sync::Arc;

use emath::Pos2;
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;

use crate::graph::{Node, NodeId};
use crate::layout::Positions;

/// Node under `point`: the closest one whose circle contains it.
pub fn hit_test(nodes: &[Node], positions: &Positions, point: Pos2) -> Option<NodeId> {
    nodes
        .iter()
        .filter_map(|node| {
            let distance = positions.get(&node.id)?.distance(point);
            (distance <= node.radius).then_some((node, distance))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(node, _)| node.id.clone())
}

fn fuzzy_match_score(matcher: &SkimMatcherV2, text: &str, query: &str) -> Option<i64> {
    matcher
        .fuzzy_match(text, query)
        .or_else(|| matcher.fuzzy_match(&text.to_ascii_lowercase(), &query.to_ascii_lowercase()))
}

/// Nodes whose label or group fuzzily matches a search query. Everything else
/// is drawn dimmed.
#[derive(Clone, Debug)]
pub struct SearchMatches {
    query: String,
    revision: u64,
    matches: Arc<HashSet<NodeId>>,
}

impl SearchMatches {
    pub fn compute(nodes: &[Node], query: &str, revision: u64) -> Self {
        let query = query.trim();
        let matcher = SkimMatcherV2::default();
        let matches = if query.is_empty() {
            HashSet::new()
        } else {
            nodes
                .iter()
                .filter(|node| {
                    fuzzy_match_score(&matcher, &node.label, query).is_some()
                        || fuzzy_match_score(&matcher, &node.group, query).is_some()
                })
                .map(|node| node.id.clone())
                .collect()
        };

        Self {
            query: query.to_owned(),
            revision,
            matches: Arc::new(matches),
        }
    }

    /// Reuses `cached` when it was computed for the same query and revision.
    pub fn refresh(cached: Option<Self>, nodes: &[Node], query: &str, revision: u64) -> Self {
        match cached {
            Some(cached) if cached.revision == revision && cached.query == query.trim() => cached,
            _ => Self::compute(nodes, query, revision),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn matches(&self) -> Arc<HashSet<NodeId>> {
        Arc::clone(&self.matches)
    }

    pub fn is_match(&self, id: &NodeId) -> bool {
        self.matches.contains(id)
    }

    /// An empty query dims nothing.
    pub fn is_dimmed(&self, id: &NodeId) -> bool {
        !self.query.is_empty() && !self.matches.contains(id)
    }
}
