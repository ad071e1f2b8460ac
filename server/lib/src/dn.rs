//! Distinguished names. A [`Dn`] is the hierarchical identity of a directory
//! object. Display form is preserved as supplied; equality, ordering and
//! hashing are on a lower-cased normal form so `cn=Sales,dc=Example` and
//! `CN=sales,DC=example` name the same object.

use crate::prelude::OperationError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone)]
pub struct Dn {
    /// Display components, most-specific first.
    components: Vec<String>,
    /// Lower-cased join of `components`, the comparison key.
    norm: String,
}

impl Dn {
    /// Parse a DN string. Commas escaped as `\,` stay inside a component.
    /// Empty input, empty components, and components without an `=` are
    /// rejected as [`OperationError::InvalidArgument`] before any directory
    /// I/O can happen.
    pub fn parse(raw: &str) -> Result<Self, OperationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(OperationError::InvalidArgument(
                "empty distinguished name".to_string(),
            ));
        }

        let mut components = Vec::new();
        let mut current = String::new();
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    current.push(c);
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                ',' => {
                    components.push(std::mem::take(&mut current));
                    current.clear();
                }
                _ => current.push(c),
            }
        }
        components.push(current);

        let components: Vec<String> = components
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect();

        for component in &components {
            let valid = component
                .split_once('=')
                .map(|(attr, value)| !attr.trim().is_empty() && !value.trim().is_empty())
                .unwrap_or(false);
            if !valid {
                return Err(OperationError::InvalidArgument(format!(
                    "malformed distinguished name component in {raw}"
                )));
            }
        }

        Ok(Dn::from_components(components))
    }

    fn from_components(components: Vec<String>) -> Self {
        let norm = components.join(",").to_lowercase();
        Dn { components, norm }
    }

    /// The normalised comparison key. Used as the ledger map key.
    pub fn norm(&self) -> &str {
        &self.norm
    }

    /// The most specific component, e.g. `CN=Sales`.
    pub fn rdn(&self) -> &str {
        // Parse guarantees at least one component.
        self.components.first().map(String::as_str).unwrap_or("")
    }

    /// The value part of the most specific component.
    pub fn rdn_value(&self) -> &str {
        self.rdn()
            .split_once('=')
            .map(|(_, value)| value.trim())
            .unwrap_or("")
    }

    pub fn parent(&self) -> Option<Dn> {
        if self.components.len() < 2 {
            None
        } else {
            Some(Dn::from_components(self.components[1..].to_vec()))
        }
    }

    /// Prefix a new RDN onto this DN. The RDN is validated the same way as
    /// a parsed component.
    pub fn child(&self, rdn: &str) -> Result<Dn, OperationError> {
        let rdn = rdn.trim();
        let valid = rdn
            .split_once('=')
            .map(|(attr, value)| !attr.trim().is_empty() && !value.trim().is_empty())
            .unwrap_or(false);
        if !valid {
            return Err(OperationError::InvalidArgument(format!(
                "malformed relative distinguished name {rdn}"
            )));
        }
        let mut components = Vec::with_capacity(self.components.len() + 1);
        components.push(rdn.to_string());
        components.extend(self.components.iter().cloned());
        Ok(Dn::from_components(components))
    }

    /// Strict descendant check - an object is never a descendant of itself.
    pub fn is_descendant_of(&self, other: &Dn) -> bool {
        if self.components.len() <= other.components.len() {
            return false;
        }
        let skip = self.components.len() - other.components.len();
        let suffix: String = self.components[skip..].join(",").to_lowercase();
        suffix == other.norm
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join(","))
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.norm == other.norm
    }
}

impl Eq for Dn {}

impl PartialOrd for Dn {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dn {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.norm.cmp(&other.norm)
    }
}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.norm.hash(state);
    }
}

impl Serialize for Dn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Dn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Dn::parse(&raw).map_err(|e| D::Error::custom(format!("{e}")))
    }
}
