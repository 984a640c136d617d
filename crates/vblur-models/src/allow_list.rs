//! Allow-list of class names exempted from redaction.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building an allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllowListError {
    #[error("No classes to exclude from blurring provided")]
    Empty,
}

/// Set of lower-cased class names that are annotated instead of redacted.
///
/// An empty allow-list is invalid input, never "allow nothing".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct AllowList {
    classes: BTreeSet<String>,
}

impl AllowList {
    /// Build an allow-list from raw class names.
    ///
    /// Names are trimmed and lower-cased; blank entries are dropped. Fails
    /// when nothing remains.
    pub fn parse<I, S>(names: I) -> Result<Self, AllowListError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let classes: BTreeSet<String> = names
            .into_iter()
            .map(|s| normalize(s.as_ref()))
            .filter(|s| !s.is_empty())
            .collect();

        if classes.is_empty() {
            return Err(AllowListError::Empty);
        }

        Ok(Self { classes })
    }

    /// Case-insensitive membership test.
    pub fn contains(&self, class_name: &str) -> bool {
        self.classes.contains(&normalize(class_name))
    }

    /// Number of distinct classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Always false for a constructed allow-list.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Iterate over the normalized class names.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.classes.iter().map(String::as_str)
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl TryFrom<Vec<String>> for AllowList {
    type Error = AllowListError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<AllowList> for Vec<String> {
    fn from(value: AllowList) -> Self {
        value.classes.into_iter().collect()
    }
}

impl std::fmt::Display for AllowList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.iter().collect();
        write!(f, "[{}]", names.join(", "))
    }
}
