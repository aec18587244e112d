//! Scan filters
//!
//! Evaluated by the replica while scanning; a record is returned only when
//! both its hash key and sort key pass.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterType {
    #[default]
    NoFilter,
    /// Pattern occurs anywhere in the data
    Anywhere,
    Prefix,
    Postfix,
}

impl FilterType {
    /// Whether `data` passes this filter with `pattern`.
    ///
    /// An empty pattern always matches.
    pub fn matches(&self, pattern: &[u8], data: &[u8]) -> bool {
        if pattern.is_empty() {
            return true;
        }
        match self {
            FilterType::NoFilter => true,
            FilterType::Anywhere => {
                pattern.len() <= data.len() && data.windows(pattern.len()).any(|w| w == pattern)
            }
            FilterType::Prefix => data.starts_with(pattern),
            FilterType::Postfix => data.ends_with(pattern),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Filter {
    pub kind: FilterType,
    pub pattern: Vec<u8>,
}

impl Filter {
    pub fn new(kind: FilterType, pattern: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            pattern: pattern.into(),
        }
    }

    pub fn prefix(pattern: impl Into<Vec<u8>>) -> Self {
        Self::new(FilterType::Prefix, pattern)
    }

    pub fn postfix(pattern: impl Into<Vec<u8>>) -> Self {
        Self::new(FilterType::Postfix, pattern)
    }

    pub fn anywhere(pattern: impl Into<Vec<u8>>) -> Self {
        Self::new(FilterType::Anywhere, pattern)
    }

    pub fn matches(&self, data: &[u8]) -> bool {
        self.kind.matches(&self.pattern, data)
    }
}
