//! Session configuration. One instance is owned by each [`AdminSession`] -
//! there is no process-wide configuration state.
//!
//! [`AdminSession`]: crate::server::AdminSession

use crate::dn::Dn;
use crate::prelude::OperationError;
use serde::{Deserialize, Serialize};

/// Where the session finds its naming contexts. The schema and
/// extended-rights bases default to the standard configuration-partition
/// locations under the domain base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    pub domain_base: Dn,
    pub schema_base: Dn,
    pub extended_rights_base: Dn,
}

impl SessionConfig {
    /// Derive a config from the domain base alone. Rejects an empty or
    /// malformed base before any directory I/O happens.
    pub fn for_domain(base: &str) -> Result<Self, OperationError> {
        let domain_base = Dn::parse(base)?;

        let configuration = domain_base.child("CN=Configuration")?;
        let schema_base = configuration.child("CN=Schema")?;
        let extended_rights_base = configuration.child("CN=Extended-Rights")?;

        Ok(SessionConfig {
            domain_base,
            schema_base,
            extended_rights_base,
        })
    }
}
