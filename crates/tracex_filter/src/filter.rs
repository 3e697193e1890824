//! Include/exclude matching over trace tags.

use regex::Regex;
use tracex_common::ContentHash;

use crate::error::FilterError;

/// Predicate over trace tags built from include and exclude patterns.
///
/// Each pattern must match the whole tag. Excludes always win over
/// includes, and an empty include list selects every tag that is not
/// excluded. Order within each list is irrelevant.
#[derive(Debug, Clone)]
pub struct TagFilter {
    includes: Vec<Regex>,
    excludes: Vec<Regex>,
    enabled: bool,
}

impl TagFilter {
    /// Compiles a rule set, failing on the first invalid pattern.
    pub fn new<I, E>(includes: I, excludes: E) -> Result<Self, FilterError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Ok(Self {
            includes: compile_all(includes)?,
            excludes: compile_all(excludes)?,
            enabled: true,
        })
    }

    /// A filter that selects nothing, used when tracing is switched off.
    pub fn disabled() -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
            enabled: false,
        }
    }

    /// Returns `true` if the method with this tag should be instrumented.
    pub fn matches(&self, tag: &str) -> bool {
        if !self.enabled {
            return false;
        }
        if self.excludes.iter().any(|re| re.is_match(tag)) {
            return false;
        }
        if self.includes.iter().any(|re| re.is_match(tag)) {
            return true;
        }
        self.includes.is_empty()
    }

    /// Returns `true` if this filter can select anything at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Stable digest of the rule set, insensitive to order within each list.
    pub fn fingerprint(&self) -> ContentHash {
        let mut includes: Vec<&str> = self.includes.iter().map(Regex::as_str).collect();
        let mut excludes: Vec<&str> = self.excludes.iter().map(Regex::as_str).collect();
        includes.sort_unstable();
        excludes.sort_unstable();

        let enabled: &[u8] = if self.enabled { b"on" } else { b"off" };
        let parts = std::iter::once(enabled)
            .chain(std::iter::once(b"include".as_slice()))
            .chain(includes.iter().map(|s| s.as_bytes()))
            .chain(std::iter::once(b"exclude".as_slice()))
            .chain(excludes.iter().map(|s| s.as_bytes()));
        ContentHash::from_parts(parts)
    }
}

fn compile_all<I>(patterns: I) -> Result<Vec<Regex>, FilterError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| {
            let pattern = p.as_ref();
            Regex::new(&format!("^(?:{pattern})$")).map_err(|e| FilterError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}
