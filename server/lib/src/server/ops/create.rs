//! The create operations: user, group and organisational unit, plus the
//! derived show-creatable listing. Creation is gated on the caller holding
//! create-child for the new object's class at the target container.

use crate::prelude::*;
use crate::server::ops::{decode_params, OpContext, ProbeOutcome};

const CREATE_OPS: [OperationName; 3] = [
    OperationName::CreateUser,
    OperationName::CreateGroup,
    OperationName::CreateOrgUnit,
];

/// The objectClass and naming attribute behind each create operation.
fn class_of(op: OperationName) -> Option<(&'static str, &'static str)> {
    match op {
        OperationName::CreateUser => Some((CLASS_USER, ATTR_CN)),
        OperationName::CreateGroup => Some((CLASS_GROUP, ATTR_CN)),
        OperationName::CreateOrgUnit => Some((CLASS_ORG_UNIT, ATTR_OU)),
        _ => None,
    }
}

fn has_create_right<C: DirectoryClient>(ctx: &OpContext<'_, C>, class: &str) -> bool {
    ctx.target.rights.grants(class, Rights::CREATE_CHILD)
}

pub(crate) fn probe<C: DirectoryClient>(
    op: OperationName,
    ctx: &mut OpContext<'_, C>,
) -> Result<ProbeOutcome, OperationError> {
    let Some((class, _)) = class_of(op) else {
        return Err(OperationError::LogicFault(format!(
            "{op} dispatched as a create operation"
        )));
    };

    if !has_create_right(ctx, class) {
        security_access!(ident = %ctx.ident, target = %ctx.target.dn, %class, "create denied");
        return Ok(ProbeOutcome::Denied(format!(
            "caller lacks create-child for class {class} at {}",
            ctx.target.dn
        )));
    }

    let properties = match op {
        OperationName::CreateUser => vec![
            PropertyDescriptor::required_single("name"),
            PropertyDescriptor::optional_single("password"),
            PropertyDescriptor::optional_single("account"),
        ],
        _ => vec![PropertyDescriptor::required_single("name")],
    };

    Ok(ProbeOutcome::Available(CapabilityDescriptor {
        type_name: class.to_string(),
        editable: true,
        properties,
    }))
}

/// Characters that cannot appear unescaped in a relative distinguished
/// name. Rejected outright rather than escaped.
fn valid_object_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && trimmed == name
        && !name.contains([',', '+', '"', '\\', '<', '>', ';', '='])
}

/// Whether any object under the domain already carries this naming value.
fn name_collides<C: DirectoryClient>(
    ctx: &OpContext<'_, C>,
    naming_attr: &str,
    name: &str,
) -> Result<bool, OperationError> {
    use crate::directory::SearchFilter;
    let hits = ctx.client.search(
        &ctx.config.domain_base,
        &SearchFilter::eq(naming_attr, name),
        &[ATTR_DISTINGUISHED_NAME],
        SearchScope::Subtree,
    )?;
    Ok(!hits.is_empty())
}

pub(crate) fn validate<C: DirectoryClient>(
    op: OperationName,
    ctx: &mut OpContext<'_, C>,
    payload: &serde_json::Value,
) -> Result<bool, OperationError> {
    let Some((class, naming_attr)) = class_of(op) else {
        return Err(OperationError::LogicFault(format!(
            "{op} dispatched as a create operation"
        )));
    };

    if !has_create_right(ctx, class) {
        return Ok(false);
    }

    let name = match op {
        OperationName::CreateUser => decode_params::<CreateUserParams>(payload)?.name,
        OperationName::CreateGroup => decode_params::<CreateGroupParams>(payload)?.name,
        _ => decode_params::<CreateOrgUnitParams>(payload)?.name,
    };

    if !valid_object_name(&name) {
        request_trace!(%name, "rejected malformed object name");
        return Ok(false);
    }

    if name_collides(ctx, naming_attr, &name)? {
        request_trace!(%name, "an object with this name already exists");
        return Ok(false);
    }

    Ok(true)
}

pub(crate) fn execute<C: DirectoryClient>(
    op: OperationName,
    ctx: &mut OpContext<'_, C>,
    ledger: &mut TransactionLedger<'_, C>,
    payload: &serde_json::Value,
) -> Result<(), OperationError> {
    let Some((class, naming_attr)) = class_of(op) else {
        return Err(OperationError::LogicFault(format!(
            "{op} dispatched as a create operation"
        )));
    };

    let parent = ledger.get_or_create(&ctx.target.dn)?;
    let parent_handle = parent.handle().clone();

    match op {
        OperationName::CreateUser => {
            let params: CreateUserParams = decode_params(payload)?;
            let rdn = format!("{}={}", naming_attr.to_uppercase(), params.name);
            let handle = ctx.client.create_child(&parent_handle, &rdn, class)?;
            let created = ledger.adopt(handle)?;
            let handle = created.handle().clone();
            let new_dn = created.dn().clone();

            let account = params.account.as_deref().unwrap_or(&params.name);
            ctx.client
                .set_attribute(&handle, ATTR_SAM_ACCOUNT_NAME, &[account.to_string()])?;

            // Without a password the account starts disabled.
            let mut uac = UAC_NORMAL_ACCOUNT;
            match &params.password {
                Some(password) => {
                    ctx.client
                        .set_attribute(&handle, ATTR_UNICODE_PWD, &[password.clone()])?;
                }
                None => uac |= UAC_ACCOUNT_DISABLE,
            }
            ctx.client
                .set_attribute(&handle, ATTR_USER_ACCOUNT_CONTROL, &[uac.to_string()])?;

            ledger.mark_commit_required(&new_dn)?;
            security_critical!(ident = %ctx.ident, dn = %new_dn, "user created");
        }
        OperationName::CreateGroup => {
            let params: CreateGroupParams = decode_params(payload)?;
            let rdn = format!("{}={}", naming_attr.to_uppercase(), params.name);
            let handle = ctx.client.create_child(&parent_handle, &rdn, class)?;
            let created = ledger.adopt(handle)?;
            let handle = created.handle().clone();
            let new_dn = created.dn().clone();

            ctx.client
                .set_attribute(&handle, ATTR_SAM_ACCOUNT_NAME, &[params.name.clone()])?;
            ctx.client.set_attribute(
                &handle,
                ATTR_GROUP_TYPE,
                &[GROUP_TYPE_GLOBAL_SECURITY.to_string()],
            )?;

            ledger.mark_commit_required(&new_dn)?;
            security_critical!(ident = %ctx.ident, dn = %new_dn, "group created");
        }
        _ => {
            let params: CreateOrgUnitParams = decode_params(payload)?;
            let rdn = format!("{}={}", naming_attr.to_uppercase(), params.name);
            let handle = ctx.client.create_child(&parent_handle, &rdn, class)?;
            let created = ledger.adopt(handle)?;
            let handle = created.handle().clone();
            let new_dn = created.dn().clone();

            ctx.client
                .set_attribute(&handle, ATTR_OU, &[params.name.clone()])?;

            ledger.mark_commit_required(&new_dn)?;
            security_critical!(ident = %ctx.ident, dn = %new_dn, "organizational unit created");
        }
    }

    Ok(())
}

/// show-creatable is derived entirely from the three create probes: it is
/// available when any of them is, and lists their names.
pub(crate) fn probe_creatable<C: DirectoryClient>(
    ctx: &mut OpContext<'_, C>,
) -> Result<ProbeOutcome, OperationError> {
    let mut properties = Vec::new();
    for op in CREATE_OPS {
        if probe(op, ctx)?.is_available() {
            properties.push(PropertyDescriptor {
                name: op.to_string(),
                editable: false,
                multi_valued: false,
                required: false,
            });
        }
    }

    if properties.is_empty() {
        return Ok(ProbeOutcome::Denied(format!(
            "caller can create nothing at {}",
            ctx.target.dn
        )));
    }

    Ok(ProbeOutcome::Available(CapabilityDescriptor {
        type_name: OperationName::ShowCreatable.to_string(),
        editable: false,
        properties,
    }))
}

pub(crate) fn validate_creatable<C: DirectoryClient>(
    ctx: &mut OpContext<'_, C>,
) -> Result<bool, OperationError> {
    Ok(probe_creatable(ctx)?.is_available())
}
