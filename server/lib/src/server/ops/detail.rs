//! The show-detail operation: per-attribute inspection and editing. Its
//! availability is wholly derived from the underlying attribute rights -
//! it exists as soon as the caller can write any attribute the target's
//! class chain carries.

use crate::prelude::*;
use crate::server::ops::{decode_params, OpContext, ProbeOutcome};
use std::sync::Arc;

/// The schema attributes of the target's class chain, defunct ones
/// excluded.
fn chain_attributes<C: DirectoryClient>(
    ctx: &mut OpContext<'_, C>,
) -> Result<Vec<Arc<SchemaUnit>>, OperationError> {
    let units = ctx
        .catalog
        .attributes_for_classes(ctx.client, &ctx.target.classes)?;
    Ok(units.into_iter().filter(|u| u.effective).collect())
}

pub(crate) fn probe<C: DirectoryClient>(
    ctx: &mut OpContext<'_, C>,
) -> Result<ProbeOutcome, OperationError> {
    let units = chain_attributes(ctx)?;

    let mut properties = Vec::with_capacity(units.len());
    let mut any_writable = false;
    for unit in &units {
        let writable = ctx.target.rights.grants(&unit.name, Rights::WRITE_PROP);
        any_writable |= writable;
        properties.push(PropertyDescriptor {
            name: unit.name.clone(),
            editable: writable,
            multi_valued: !unit.single_valued,
            required: false,
        });
    }

    if !any_writable {
        security_access!(ident = %ctx.ident, target = %ctx.target.dn, "detail editing denied");
        return Ok(ProbeOutcome::Denied(format!(
            "caller can modify no attribute of {}",
            ctx.target.dn
        )));
    }

    let type_name = ctx
        .target
        .own_class()
        .unwrap_or(OperationName::ShowDetail.as_str())
        .to_string();

    Ok(ProbeOutcome::Available(CapabilityDescriptor {
        type_name,
        editable: true,
        properties,
    }))
}

pub(crate) fn validate<C: DirectoryClient>(
    ctx: &mut OpContext<'_, C>,
    payload: &serde_json::Value,
) -> Result<bool, OperationError> {
    let params: DetailParams = decode_params(payload)?;
    if params.values.is_empty() {
        return Ok(false);
    }

    for (name, values) in &params.values {
        // The attribute must exist, be live, fit its cardinality, and the
        // caller must hold write-property on it.
        let Some(unit) = ctx.catalog.resolve_by_name(ctx.client, name)? else {
            request_trace!(attr = %name, "edit names an unknown attribute");
            return Ok(false);
        };
        if !unit.effective {
            request_trace!(attr = %name, "edit names a defunct attribute");
            return Ok(false);
        }
        if unit.single_valued && values.len() > 1 {
            request_trace!(attr = %name, "multiple values for a single-valued attribute");
            return Ok(false);
        }
        if !ctx.target.rights.grants(&unit.name, Rights::WRITE_PROP) {
            security_access!(ident = %ctx.ident, attr = %unit.name, "write-property denied");
            return Ok(false);
        }
    }

    Ok(true)
}

pub(crate) fn execute<C: DirectoryClient>(
    ctx: &mut OpContext<'_, C>,
    ledger: &mut TransactionLedger<'_, C>,
    payload: &serde_json::Value,
) -> Result<(), OperationError> {
    let params: DetailParams = decode_params(payload)?;

    let pending = ledger.get_or_create(&ctx.target.dn)?;
    let handle = pending.handle().clone();

    let mut touched: Vec<String> = Vec::with_capacity(params.values.len());
    for (name, values) in &params.values {
        ctx.client.set_attribute(&handle, name, values)?;
        touched.push(name.clone());
    }

    ledger.mark_commit_required(&ctx.target.dn)?;
    ledger.mark_refresh_required(&ctx.target.dn, &touched)?;

    admin_info!(ident = %ctx.ident, target = %ctx.target.dn, attrs = touched.len(), "detail edits staged");
    Ok(())
}
