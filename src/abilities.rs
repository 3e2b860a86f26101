use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The literal wildcard ability. Grants everything; no partial wildcards.
pub const WILDCARD: &str = "*";

/// Ordered list of ability strings carried by a token.
///
/// Order is preserved as given, but comparisons (`==`, subset) are
/// set-based and ignore duplicates. Only the literal `"*"` is special;
/// `"users.*"` is an ordinary ability name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AbilitySet(Vec<String>);

impl AbilitySet {
    pub fn new(abilities: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(abilities.into_iter().map(Into::into).collect())
    }

    /// The `["*"]` set granting every ability.
    pub fn wildcard() -> Self {
        Self(vec![WILDCARD.to_string()])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn has_wildcard(&self) -> bool {
        self.0.iter().any(|a| a == WILDCARD)
    }

    /// True when the set contains the wildcard or `name` verbatim.
    pub fn has_ability(&self, name: &str) -> bool {
        self.has_wildcard() || self.0.iter().any(|a| a == name)
    }

    /// Set-based subset check on verbatim names (no wildcard expansion).
    pub fn is_subset_of(&self, other: &AbilitySet) -> bool {
        self.0.iter().all(|a| other.0.iter().any(|b| b == a))
    }

    /// First requested ability this set does not grant. `None` when this
    /// set carries the wildcard or grants everything requested verbatim.
    pub fn first_missing(&self, requested: &[String]) -> Option<String> {
        if self.has_wildcard() {
            return None;
        }
        requested
            .iter()
            .find(|a| !self.0.iter().any(|g| &g == a))
            .cloned()
    }
}

impl PartialEq for AbilitySet {
    /// Set-based equality: order and duplicates are irrelevant.
    fn eq(&self, other: &Self) -> bool {
        let ours: HashSet<&str> = self.0.iter().map(String::as_str).collect();
        let theirs: HashSet<&str> = other.0.iter().map(String::as_str).collect();
        ours == theirs
    }
}

impl Eq for AbilitySet {}

// ── Tests ───────────────────────────────────────────────────────
