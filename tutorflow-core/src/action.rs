//! Outcome labels returned by nodes to pick the next transition.

use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

/// Label a node reports after finalizing.
///
/// The flow follows the successor registered under this label, or the
/// `"default"` successor when no exact match exists.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(String);

impl Action {
    /// Reserved label of the unlabelled transition.
    pub const DEFAULT: &'static str = "default";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl Default for Action {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Action {
    fn from(label: &str) -> Self {
        Self(label.to_string())
    }
}

impl From<String> for Action {
    fn from(label: String) -> Self {
        Self(label)
    }
}

impl Borrow<str> for Action {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Action {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Action {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
