//! Place search via `/locate` with a local query history.
//!
//! Search never errors: bad queries, unknown places and transport failures
//! all end up as [`SearchOutcome::NoMatches`] with suggestions drawn from
//! the history.

use crate::geodesy::{GeoBounds, GeoPoint};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use threatmap_env::{FeedSource, LocateResponse, LocateStatus};
use tracing::{debug, warn};

/// Entries kept in the history.
pub const HISTORY_CAPACITY: usize = 25;

/// Suggestions returned at most.
pub const MAX_SUGGESTIONS: usize = 20;

/// Recent successful queries, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHistory {
    entries: VecDeque<String>,
}

impl SearchHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a persisted history (most recent first), dropping duplicates.
    pub fn from_entries<I: IntoIterator<Item = String>>(entries: I) -> Self {
        let mut history = Self::new();
        let mut items: Vec<String> = entries.into_iter().collect();
        items.reverse();
        for item in items {
            history.record(&item);
        }
        history
    }

    /// Moves `query` to the front. Case-insensitive duplicates are replaced.
    pub fn record(&mut self, query: &str) {
        let query = clean_query(query);
        if query.is_empty() {
            return;
        }
        let key = query.to_lowercase();
        self.entries.retain(|e| e.to_lowercase() != key);
        self.entries.push_front(query);
        self.entries.truncate(HISTORY_CAPACITY);
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// History entries matching `query`, prefix matches first.
    ///
    /// An empty query returns the most recent entries.
    pub fn suggest(&self, query: &str) -> Vec<String> {
        let needle = clean_query(query).to_lowercase();
        let (mut prefix, mut infix): (Vec<&String>, Vec<&String>) = (Vec::new(), Vec::new());
        for entry in &self.entries {
            let lower = entry.to_lowercase();
            if lower.starts_with(&needle) {
                prefix.push(entry);
            } else if lower.contains(&needle) {
                infix.push(entry);
            }
        }
        prefix.append(&mut infix);
        prefix.into_iter().take(MAX_SUGGESTIONS).cloned().collect()
    }
}

/// Trims and collapses inner whitespace.
pub fn clean_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// What a search resolved to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    /// Center the map here
    Found { query: String, position: GeoPoint },
    /// Ambiguous; pick one of these place names
    Suggest { matches: Vec<String> },
    NoMatches { suggestions: Vec<String> },
}

/// Maps a `/locate` response to an outcome, recording hits in the history.
pub fn interpret(query: &str, response: &LocateResponse, bounds: &GeoBounds, history: &mut SearchHistory) -> SearchOutcome {
    let no_matches = |history: &SearchHistory| SearchOutcome::NoMatches {
        suggestions: history.suggest(query),
    };

    match response.status {
        LocateStatus::Ok => {
            let position = match (response.lat, response.lng) {
                (Some(lat), Some(lng)) => GeoPoint::new(lat, lng),
                _ => return no_matches(history),
            };
            if !position.is_finite() || !bounds.contains(position) {
                return no_matches(history);
            }
            history.record(query);
            SearchOutcome::Found {
                query: clean_query(query),
                position,
            }
        }
        LocateStatus::Suggest => {
            let matches: Vec<String> = response
                .matches
                .iter()
                .map(|m| clean_query(m))
                .filter(|m| !m.is_empty())
                .take(MAX_SUGGESTIONS)
                .collect();
            if matches.is_empty() {
                no_matches(history)
            } else {
                SearchOutcome::Suggest { matches }
            }
        }
        LocateStatus::NotFound => no_matches(history),
    }
}

/// Looks a place up through the backend.
pub async fn locate<S: FeedSource>(
    source: &S,
    query: &str,
    bounds: &GeoBounds,
    history: &mut SearchHistory,
) -> SearchOutcome {
    let cleaned = clean_query(query);
    if cleaned.is_empty() {
        return SearchOutcome::NoMatches {
            suggestions: history.suggest(""),
        };
    }
    match source.locate(&cleaned).await {
        Ok(response) => {
            debug!(query = %cleaned, status = ?response.status, "locate answered");
            interpret(&cleaned, &response, bounds, history)
        }
        Err(e) => {
            warn!(query = %cleaned, error = %e, "locate failed");
            SearchOutcome::NoMatches {
                suggestions: history.suggest(&cleaned),
            }
        }
    }
}
