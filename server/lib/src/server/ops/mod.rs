//! The command protocol. A closed set of operations, each implementing the
//! probe / validate / execute contract against a resolved rights table.
//!
//! Probe and validate never fault on authorisation - a caller who lacks a
//! right gets a [`ProbeOutcome::Denied`] or a `false`, not an error. Faults
//! are reserved for broken metadata, vanished objects, transport failures
//! and malformed payloads.

pub(crate) mod create;
pub(crate) mod detail;
pub(crate) mod relocate;
pub(crate) mod security;

use crate::prelude::*;
use crate::server::access::resolve_effective_rights;

/// Everything resolved about the target object before an operation runs:
/// its location, its objectClass chain (base first, most derived last),
/// the caller's effective rights table against it, and the decoded
/// security-descriptor snapshot.
#[derive(Debug, Clone)]
pub struct TargetContext {
    pub dn: Dn,
    pub classes: Vec<String>,
    pub rights: EffectiveRightsTable,
    pub aces: Vec<AccessEntry>,
}

impl TargetContext {
    /// The most derived objectClass of the target.
    pub fn own_class(&self) -> Option<&str> {
        self.classes.last().map(String::as_str)
    }
}

/// The borrowed state an operation runs against. One context serves one
/// invocation; nothing in it outlives the dispatching call.
pub struct OpContext<'a, C: DirectoryClient> {
    pub client: &'a C,
    pub catalog: &'a mut SchemaCatalog,
    pub config: &'a SessionConfig,
    pub ident: &'a Identity,
    pub target: &'a TargetContext,
}

/// The result of probing one operation. `Denied` carries a human-readable
/// reason naming what was missing - it is a display string, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Available(CapabilityDescriptor),
    Denied(String),
}

impl ProbeOutcome {
    pub fn is_available(&self) -> bool {
        matches!(self, ProbeOutcome::Available(_))
    }

    pub fn into_capability(self) -> Option<CapabilityDescriptor> {
        match self {
            ProbeOutcome::Available(cap) => Some(cap),
            ProbeOutcome::Denied(_) => None,
        }
    }
}

/// Whether the operation is advertised by the discovery listing. Every
/// current operation is - per-caller hiding happens in probe, not here.
pub fn show_in_catalog(_op: OperationName) -> bool {
    true
}

pub fn probe<C: DirectoryClient>(
    op: OperationName,
    ctx: &mut OpContext<'_, C>,
) -> Result<ProbeOutcome, OperationError> {
    match op {
        OperationName::CreateUser | OperationName::CreateGroup | OperationName::CreateOrgUnit => {
            create::probe(op, ctx)
        }
        OperationName::ShowCreatable => create::probe_creatable(ctx),
        OperationName::Move => relocate::probe(ctx),
        OperationName::ModifySecurity => security::probe_modify(ctx),
        OperationName::ShowSecurity => security::probe_show(ctx),
        OperationName::ShowDetail => detail::probe(ctx),
    }
}

/// Side-effect free apart from read-only collision and relationship
/// lookups. Re-checks the same rights probe checked - the rights table may
/// have been computed speculatively before the caller settled on an
/// operation.
pub fn validate<C: DirectoryClient>(
    op: OperationName,
    ctx: &mut OpContext<'_, C>,
    payload: &serde_json::Value,
) -> Result<bool, OperationError> {
    match op {
        OperationName::CreateUser | OperationName::CreateGroup | OperationName::CreateOrgUnit => {
            create::validate(op, ctx, payload)
        }
        OperationName::ShowCreatable => create::validate_creatable(ctx),
        OperationName::Move => relocate::validate(ctx, payload),
        OperationName::ModifySecurity => security::validate_modify(ctx, payload),
        OperationName::ShowSecurity => security::validate_show(ctx),
        OperationName::ShowDetail => detail::validate(ctx, payload),
    }
}

/// Only ever called after `validate` returned true. Mutations go through
/// the ledger so each touched entry is committed and refreshed exactly
/// once at drain time.
pub fn execute<C: DirectoryClient>(
    op: OperationName,
    ctx: &mut OpContext<'_, C>,
    ledger: &mut TransactionLedger<'_, C>,
    payload: &serde_json::Value,
) -> Result<(), OperationError> {
    match op {
        OperationName::CreateUser | OperationName::CreateGroup | OperationName::CreateOrgUnit => {
            create::execute(op, ctx, ledger, payload)
        }
        OperationName::Move => relocate::execute(ctx, ledger, payload),
        OperationName::ModifySecurity => security::execute_modify(ctx, ledger, payload),
        // The inspection operations mutate nothing.
        OperationName::ShowCreatable | OperationName::ShowSecurity => Ok(()),
        OperationName::ShowDetail => detail::execute(ctx, ledger, payload),
    }
}

pub(crate) fn decode_params<T: serde::de::DeserializeOwned>(
    payload: &serde_json::Value,
) -> Result<T, OperationError> {
    serde_json::from_value(payload.clone()).map_err(|err| {
        request_error!(%err, "operation payload failed to decode");
        OperationError::InvalidPayload(err.to_string())
    })
}

/// Resolve the caller's effective rights against an arbitrary object,
/// used when an operation must consult rights somewhere other than the
/// invocation target (the destination container of a move). The handle is
/// released before returning. `Ok(None)` means the object does not exist.
pub(crate) fn resolve_rights_at<C: DirectoryClient>(
    ctx: &mut OpContext<'_, C>,
    dn: &Dn,
) -> Result<Option<(Vec<String>, EffectiveRightsTable)>, OperationError> {
    let handle = match ctx.client.get_by_dn(dn) {
        Ok(handle) => handle,
        Err(OperationError::NotFound(_)) => return Ok(None),
        Err(err) => return Err(err),
    };

    let outcome = (|| {
        let attrs = ctx.client.read_attributes(&handle)?;
        let classes: Vec<String> = attrs
            .get(ATTR_OBJECT_CLASS)
            .cloned()
            .unwrap_or_default();
        let records = ctx.client.read_security_descriptor(&handle)?;
        let aces = crate::server::access::decode_descriptor(&records)?;

        // This is never a self-target: the synthetic principal is EVERYONE.
        let sids = ctx.ident.applicable_sids(false);
        let table = resolve_effective_rights(ctx.client, ctx.catalog, &aces, &sids, &classes)?;
        Ok((classes, table))
    })();

    ctx.client.dispose(&handle);
    outcome.map(Some)
}

/// Read one entry's attributes without holding the handle afterwards.
/// `Ok(None)` means the object does not exist.
pub(crate) fn read_attrs_at<C: DirectoryClient>(
    client: &C,
    dn: &Dn,
) -> Result<Option<std::collections::BTreeMap<String, Vec<String>>>, OperationError> {
    let handle = match client.get_by_dn(dn) {
        Ok(handle) => handle,
        Err(OperationError::NotFound(_)) => return Ok(None),
        Err(err) => return Err(err),
    };
    let attrs = client.read_attributes(&handle);
    client.dispose(&handle);
    attrs.map(Some)
}
