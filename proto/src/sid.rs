use serde::{Deserialize, Serialize};
use std::fmt;

/// A security identifier - the canonical string identity of a directory
/// principal or well-known group. Comparison and ordering are on the
/// canonical (upper-cased) form so that `s-1-1-0` and `S-1-1-0` are the
/// same trustee.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sid(String);

impl Sid {
    /// Canonicalise a raw trustee string. Empty input is rejected at this
    /// boundary so that a missing trustee never reaches directory I/O.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Sid(trimmed.to_uppercase()))
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
