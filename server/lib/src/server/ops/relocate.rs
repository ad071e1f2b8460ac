//! The move operation. Moving an object needs delete rights at its current
//! location and create-child rights for its class at the destination
//! organisational unit, and the object itself must not be move-disabled.

use crate::prelude::*;
use crate::server::ops::{decode_params, read_attrs_at, resolve_rights_at, OpContext, ProbeOutcome};

fn has_delete_right<C: DirectoryClient>(ctx: &OpContext<'_, C>, class: &str) -> bool {
    ctx.target.rights.grants(class, Rights::DELETE)
        || ctx.target.rights.grants(class, Rights::DELETE_CHILD)
}

/// Probe only consults the already-resolved rights table and the target DN.
/// The move-disabled flag needs a fresh attribute read, so it is checked at
/// validate, where directory reads are expected.
pub(crate) fn probe<C: DirectoryClient>(
    ctx: &mut OpContext<'_, C>,
) -> Result<ProbeOutcome, OperationError> {
    if ctx.target.dn.parent().is_none() {
        return Ok(ProbeOutcome::Denied(format!(
            "{} has no parent to move out of",
            ctx.target.dn
        )));
    }

    let Some(class) = ctx.target.own_class() else {
        return Err(OperationError::SchemaInconsistency(format!(
            "{} carries no objectClass",
            ctx.target.dn
        )));
    };

    if !has_delete_right(ctx, class) {
        security_access!(ident = %ctx.ident, target = %ctx.target.dn, "move denied");
        return Ok(ProbeOutcome::Denied(format!(
            "caller lacks delete or delete-child for class {class} at {}",
            ctx.target.dn
        )));
    }

    Ok(ProbeOutcome::Available(CapabilityDescriptor {
        type_name: OperationName::Move.to_string(),
        editable: true,
        properties: vec![PropertyDescriptor::required_single("destination")],
    }))
}

pub(crate) fn validate<C: DirectoryClient>(
    ctx: &mut OpContext<'_, C>,
    payload: &serde_json::Value,
) -> Result<bool, OperationError> {
    let Some(class) = ctx.target.own_class() else {
        return Err(OperationError::SchemaInconsistency(format!(
            "{} carries no objectClass",
            ctx.target.dn
        )));
    };
    let class = class.to_string();

    let Some(current_parent) = ctx.target.dn.parent() else {
        return Ok(false);
    };
    if !has_delete_right(ctx, &class) {
        return Ok(false);
    }

    let params: MoveParams = decode_params(payload)?;
    let Ok(destination) = Dn::parse(&params.destination) else {
        request_trace!(destination = %params.destination, "malformed destination");
        return Ok(false);
    };

    // No-op guard and cycle guard.
    if destination == current_parent || destination == ctx.target.dn {
        return Ok(false);
    }
    if destination.is_descendant_of(&ctx.target.dn) {
        request_trace!(%destination, "destination is beneath the object being moved");
        return Ok(false);
    }

    // A move-disabled object stays where it is, whatever the rights say.
    let Some(attrs) = read_attrs_at(ctx.client, &ctx.target.dn)? else {
        return Err(OperationError::NotFound(ctx.target.dn.to_string()));
    };
    let system_flags = attrs
        .get(ATTR_SYSTEM_FLAGS)
        .and_then(|vs| vs.first())
        .and_then(|raw| raw.parse::<u32>().ok())
        .unwrap_or(0);
    if system_flags & SYSTEM_FLAG_DISALLOW_MOVE != 0 {
        request_trace!(target = %ctx.target.dn, "object is move-disabled");
        return Ok(false);
    }

    // The destination must be an existing organisational unit where the
    // caller can create children of the target's class. Rights there are
    // resolved fresh - nothing cached from the invocation target applies.
    let Some((dest_classes, dest_rights)) = resolve_rights_at(ctx, &destination)? else {
        request_trace!(%destination, "destination does not exist");
        return Ok(false);
    };
    if !dest_classes
        .iter()
        .any(|c| c.eq_ignore_ascii_case(CLASS_ORG_UNIT))
    {
        request_trace!(%destination, "destination is not an organizational unit");
        return Ok(false);
    }
    if !dest_rights.grants(&class, Rights::CREATE_CHILD) {
        security_access!(ident = %ctx.ident, %destination, "create-child denied at destination");
        return Ok(false);
    }

    Ok(true)
}

pub(crate) fn execute<C: DirectoryClient>(
    ctx: &mut OpContext<'_, C>,
    ledger: &mut TransactionLedger<'_, C>,
    payload: &serde_json::Value,
) -> Result<(), OperationError> {
    let params: MoveParams = decode_params(payload)?;
    let destination = Dn::parse(&params.destination)?;

    let moved = ledger.get_or_create(&ctx.target.dn)?;
    let moved_handle = moved.handle().clone();
    let dest = ledger.get_or_create(&destination)?;
    let dest_handle = dest.handle().clone();

    let new_dn = ctx.client.move_entry(&moved_handle, &dest_handle)?;
    ledger.update_dn(&ctx.target.dn, new_dn.clone())?;
    ledger.mark_commit_required(&new_dn)?;

    security_critical!(ident = %ctx.ident, from = %ctx.target.dn, to = %new_dn, "object moved");
    Ok(())
}
