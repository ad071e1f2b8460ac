//! Contains structures related to the Identity that initiated an operation
//! against the server. The identity's SID set is what the access-rule
//! resolution engine matches access-control entries against.

use crate::prelude::*;
use std::collections::BTreeSet;
use std::fmt;

/// The identity carried by a calling principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentUser {
    pub sid: Sid,
    pub groups: BTreeSet<Sid>,
    pub dn: Dn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentType {
    /// A server-internal activity, such as the catalogue loading its own
    /// metadata. Bypasses access gating.
    Internal,
    User(IdentUser),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub origin: IdentType,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            IdentType::Internal => write!(f, "Internal"),
            IdentType::User(u) => write!(f, "User({}) {}", u.sid, u.dn),
        }
    }
}

impl Identity {
    pub fn from_internal() -> Self {
        Identity {
            origin: IdentType::Internal,
        }
    }

    /// Build a caller identity. Empty SIDs are rejected here, before any
    /// directory I/O can happen.
    pub fn from_user(sid: &str, groups: &[&str], dn: Dn) -> Result<Self, OperationError> {
        let sid = Sid::new(sid)
            .ok_or_else(|| OperationError::InvalidArgument("empty caller sid".to_string()))?;
        let groups = groups
            .iter()
            .map(|g| {
                Sid::new(g).ok_or_else(|| {
                    OperationError::InvalidArgument("empty group sid in caller set".to_string())
                })
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Identity {
            origin: IdentType::User(IdentUser { sid, groups, dn }),
        })
    }

    pub fn user(&self) -> Option<&IdentUser> {
        match &self.origin {
            IdentType::Internal => None,
            IdentType::User(u) => Some(u),
        }
    }

    /// The SID set access-control entries are matched against: the caller's
    /// own SID, their group memberships, and exactly one synthetic entry -
    /// SELF when the caller is the target object, EVERYONE otherwise.
    pub fn applicable_sids(&self, target_is_self: bool) -> BTreeSet<Sid> {
        let mut sids = BTreeSet::new();
        if let IdentType::User(u) = &self.origin {
            sids.insert(u.sid.clone());
            sids.extend(u.groups.iter().cloned());
            let synthetic = if target_is_self { SID_SELF } else { SID_EVERYONE };
            if let Some(synthetic) = Sid::new(synthetic) {
                sids.insert(synthetic);
            }
        }
        sids
    }

    /// Whether the caller may list or modify security descriptors.
    /// Self-service principals are never in the designated group list.
    pub fn is_security_principal(&self) -> bool {
        match &self.origin {
            IdentType::Internal => true,
            IdentType::User(u) => {
                u.groups
                    .intersection(&SECURITY_PRINCIPAL_SIDS)
                    .next()
                    .is_some()
                    || SECURITY_PRINCIPAL_SIDS.contains(&u.sid)
            }
        }
    }
}
