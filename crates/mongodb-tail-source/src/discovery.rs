//! Collection discovery
//!
//! Picks the collections to watch from the names the source reports.
//! Time-partitioned collections (`events_20150227`, `events_20150228`, ...)
//! appear while the engine runs, so discovery is repeated on every pass.

use std::collections::BTreeSet;

use regex::Regex;

use crate::error::TailError;
use crate::source::DocumentSource;

/// Prefix of server-internal collections, never watched.
pub const SYSTEM_PREFIX: &str = "system.";

/// Name pattern plus exclusion list.
#[derive(Debug, Clone)]
pub struct CollectionFilter {
    pattern: Regex,
    exclude: BTreeSet<String>,
}

impl CollectionFilter {
    /// Build a filter from a regex `pattern` (unanchored, so a plain word
    /// matches as a substring) and exact names to exclude.
    pub fn new<I, S>(pattern: &str, exclude: I) -> Result<Self, TailError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pattern = Regex::new(pattern).map_err(|e| {
            TailError::config(format!("invalid collection pattern '{pattern}': {e}"))
        })?;
        Ok(Self {
            pattern,
            exclude: exclude.into_iter().map(Into::into).collect(),
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn matches(&self, name: &str) -> bool {
        !name.starts_with(SYSTEM_PREFIX)
            && self.pattern.is_match(name)
            && !self.exclude.contains(name)
    }

    /// Keep the matching names, sorted and deduplicated.
    pub fn apply<I, S>(&self, names: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter(|name| self.matches(name.as_ref()))
            .map(|name| name.as_ref().to_string())
            .collect()
    }
}

/// List the collections of `source` that pass `filter`.
pub async fn list_matching<D: DocumentSource + ?Sized>(
    source: &D,
    filter: &CollectionFilter,
) -> Result<BTreeSet<String>, TailError> {
    let names = source
        .list_collection_names()
        .await
        .map_err(|cause| TailError::Discovery { cause })?;

    let matching = filter.apply(&names);
    for name in &matching {
        tracing::debug!(
            "Collection {} matches pattern '{}'",
            name,
            filter.pattern()
        );
    }
    Ok(matching)
}
