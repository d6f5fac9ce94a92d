//! Tag filter bound to a pipeline's requested and skipped tags.

use super::is_enabled;

/// A filter for selecting units based on tags.
///
/// Wraps the requested and skipped tag lists of a pipeline run so the
/// compiler can test every play, role, and block against the same pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    /// Tags to run (units must match at least one)
    only: Vec<String>,
    /// Tags to skip (units matching any are excluded)
    skip: Vec<String>,
}

impl TagFilter {
    /// Create a new empty tag filter (matches all units)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the requested tags
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.only = normalize(tags);
        self
    }

    /// Set the skipped tags
    pub fn with_skip_tags(mut self, tags: Vec<String>) -> Self {
        self.skip = normalize(tags);
        self
    }

    /// Check if any filters are active
    pub fn is_active(&self) -> bool {
        !self.only.is_empty() || !self.skip.is_empty()
    }

    /// Requested tags
    pub fn tags(&self) -> &[String] {
        &self.only
    }

    /// Skipped tags
    pub fn skip_tags(&self) -> &[String] {
        &self.skip
    }

    /// Check if a unit with the given effective tags is enabled
    pub fn is_enabled(&self, tags: &[String]) -> bool {
        is_enabled(tags, &self.only, &self.skip)
    }
}

/// Split comma-separated CLI values and drop blanks.
fn normalize(tags: Vec<String>) -> Vec<String> {
    tags.iter()
        .flat_map(|t| t.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}
