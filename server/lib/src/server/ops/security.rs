//! The security-descriptor operations. Listing and modifying access rules
//! is reserved for callers in the designated security-principal groups -
//! self-service principals never see either operation.

use crate::prelude::*;
use crate::server::access::decode_descriptor;
use crate::server::ops::{decode_params, OpContext, ProbeOutcome};

fn denied<C: DirectoryClient>(ctx: &OpContext<'_, C>) -> ProbeOutcome {
    security_access!(ident = %ctx.ident, target = %ctx.target.dn, "security listing denied");
    ProbeOutcome::Denied("caller is not a security principal".to_string())
}

/// Render one entry for the security listing: trustee, verdict, the
/// display name of what it is scoped to, and the rights it carries.
fn render_entry<C: DirectoryClient>(
    ctx: &mut OpContext<'_, C>,
    entry: &AccessEntry,
) -> Result<String, OperationError> {
    let scope_name = match entry.object_type {
        Some(guid) => ctx.catalog.display_name_of(ctx.client, guid)?,
        None => "(all)".to_string(),
    };
    let verdict = match entry.kind {
        AceKind::Allow => "allow",
        AceKind::Deny => "deny",
    };
    Ok(format!(
        "{} {} {}: {}",
        entry.sid,
        verdict,
        scope_name,
        entry.rights.flag_names().join(", ")
    ))
}

pub(crate) fn probe_show<C: DirectoryClient>(
    ctx: &mut OpContext<'_, C>,
) -> Result<ProbeOutcome, OperationError> {
    if !ctx.ident.is_security_principal() {
        return Ok(denied(ctx));
    }

    // The listing itself is the capability: one read-only property per
    // entry, own and inherited alike.
    let target = ctx.target;
    let mut properties = Vec::with_capacity(target.aces.len());
    for entry in &target.aces {
        properties.push(PropertyDescriptor {
            name: render_entry(ctx, entry)?,
            editable: false,
            multi_valued: false,
            required: false,
        });
    }

    Ok(ProbeOutcome::Available(CapabilityDescriptor {
        type_name: OperationName::ShowSecurity.to_string(),
        editable: false,
        properties,
    }))
}

pub(crate) fn validate_show<C: DirectoryClient>(
    ctx: &mut OpContext<'_, C>,
) -> Result<bool, OperationError> {
    Ok(ctx.ident.is_security_principal())
}

pub(crate) fn probe_modify<C: DirectoryClient>(
    ctx: &mut OpContext<'_, C>,
) -> Result<ProbeOutcome, OperationError> {
    if !ctx.ident.is_security_principal() {
        return Ok(denied(ctx));
    }

    Ok(ProbeOutcome::Available(CapabilityDescriptor {
        type_name: OperationName::ModifySecurity.to_string(),
        editable: true,
        properties: vec![PropertyDescriptor {
            name: "entries".to_string(),
            editable: true,
            multi_valued: true,
            required: true,
        }],
    }))
}

pub(crate) fn validate_modify<C: DirectoryClient>(
    ctx: &mut OpContext<'_, C>,
    payload: &serde_json::Value,
) -> Result<bool, OperationError> {
    if !ctx.ident.is_security_principal() {
        return Ok(false);
    }

    let params: ModifySecurityParams = decode_params(payload)?;

    // Only the explicit entries are writable; a payload claiming to write
    // inherited entries is rejected, as is one that cannot be decoded into
    // well-formed entries at all.
    if params.entries.iter().any(|record| record.inherited) {
        request_trace!(target = %ctx.target.dn, "payload contains inherited entries");
        return Ok(false);
    }
    if let Err(err) = decode_descriptor(&params.entries) {
        security_error!(target = %ctx.target.dn, %err, "rejected malformed security entries");
        return Ok(false);
    }

    Ok(true)
}

pub(crate) fn execute_modify<C: DirectoryClient>(
    ctx: &mut OpContext<'_, C>,
    ledger: &mut TransactionLedger<'_, C>,
    payload: &serde_json::Value,
) -> Result<(), OperationError> {
    let params: ModifySecurityParams = decode_params(payload)?;

    let pending = ledger.get_or_create(&ctx.target.dn)?;
    let handle = pending.handle().clone();

    ctx.client.write_security_descriptor(&handle, &params.entries)?;
    ledger.mark_commit_required(&ctx.target.dn)?;

    security_critical!(
        ident = %ctx.ident,
        target = %ctx.target.dn,
        entries = params.entries.len(),
        "security descriptor replaced"
    );
    Ok(())
}
