use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// These proto implementations are here because they have public definitions

/* ===== errors ===== */

/// The fault taxonomy of the server core. Authorisation outcomes are never
/// faults: a denied probe or a failed validation is a structural result
/// (`None` / `false`), not an error. Everything here indicates either broken
/// directory metadata, a vanished object, a transport problem, or malformed
/// caller input.
#[derive(Serialize, Deserialize, Debug, Clone, thiserror::Error)]
#[serde(rename_all = "lowercase")]
pub enum OperationError {
    /// A GUID or bitmask that must resolve against the schema or the
    /// extended-rights catalogue resolved against neither. The directory
    /// metadata is broken - fatal, never retried.
    #[error("schema inconsistency: {0}")]
    SchemaInconsistency(String),
    /// An internal invariant did not hold. Indicates a defect, not a state
    /// the caller can recover from.
    #[error("logic fault: {0}")]
    LogicFault(String),
    /// A referenced object vanished between resolution and execution.
    #[error("object not found: {0}")]
    NotFound(String),
    /// Normalised directory-service connectivity or protocol failure. The
    /// message carries the server diagnostic verbatim.
    #[error("directory transport fault: {0}")]
    Transport(String),
    /// Malformed invocation input at the public boundary, rejected before
    /// any directory I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The opaque payload token failed to decode into the parameter type
    /// the selected operation expects.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl PartialEq for OperationError {
    fn eq(&self, other: &Self) -> bool {
        // Compare on discriminant only - the contained diagnostics are for
        // humans and generally we only use the PartialEq for testing anyway.
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for OperationError {}

/* ===== the operation catalogue ===== */

/// The closed set of operations the command protocol exposes. Dispatch is
/// always by matching on this tag.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum OperationName {
    CreateUser,
    CreateGroup,
    CreateOrgUnit,
    Move,
    ModifySecurity,
    ShowSecurity,
    ShowDetail,
    ShowCreatable,
}

impl OperationName {
    pub const ALL: [OperationName; 8] = [
        OperationName::CreateUser,
        OperationName::CreateGroup,
        OperationName::CreateOrgUnit,
        OperationName::Move,
        OperationName::ModifySecurity,
        OperationName::ShowSecurity,
        OperationName::ShowDetail,
        OperationName::ShowCreatable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationName::CreateUser => "create-user",
            OperationName::CreateGroup => "create-group",
            OperationName::CreateOrgUnit => "create-org-unit",
            OperationName::Move => "move",
            OperationName::ModifySecurity => "modify-security",
            OperationName::ShowSecurity => "show-security",
            OperationName::ShowDetail => "show-detail",
            OperationName::ShowCreatable => "show-creatable",
        }
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationName {
    type Err = OperationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        OperationName::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == value)
            .ok_or_else(|| OperationError::InvalidArgument(format!("unknown operation {value}")))
    }
}

/* ===== access control entries on the wire ===== */

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AceKind {
    Allow,
    Deny,
}

/// The inheritance scope tag carried by an access-control entry. The five
/// values are exhaustive - a raw tag outside them is a fault of the source
/// data, never silently ignored.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AceScope {
    /// Applies to the carrying object only.
    None,
    /// Applies to the carrying object and its immediate children.
    SelfAndChildren,
    /// Applies to the carrying object and all descendants.
    AllDescendants,
    /// Applies only to immediate children, not the carrying object.
    ChildrenOnly,
    /// Applies only to descendants, not the carrying object.
    DescendantsOnly,
}

impl AceScope {
    pub fn try_from_raw(tag: u8) -> Result<Self, OperationError> {
        match tag {
            0 => Ok(AceScope::None),
            1 => Ok(AceScope::SelfAndChildren),
            2 => Ok(AceScope::AllDescendants),
            3 => Ok(AceScope::ChildrenOnly),
            4 => Ok(AceScope::DescendantsOnly),
            _ => Err(OperationError::LogicFault(format!(
                "unrecognised ace inheritance scope tag {tag}"
            ))),
        }
    }
}

/// One access-control entry as carried in payloads and security listings.
/// The rights mask is the raw directory bitmask - the server core decodes
/// it into typed flags and faults on a mask with no known bits.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AceRecord {
    pub trustee: String,
    pub kind: AceKind,
    pub inherited: bool,
    pub scope: AceScope,
    /// Empty means the entry applies generically rather than to one
    /// attribute / class / control-access right.
    pub object_type: Option<Uuid>,
    pub mask: u32,
}

/* ===== capability descriptors ===== */

/// Describes one input property of an operation: its name, whether the
/// caller may set it, whether it takes multiple values, and whether the
/// operation refuses to run without it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub editable: bool,
    pub multi_valued: bool,
    pub required: bool,
}

impl PropertyDescriptor {
    pub fn required_single(name: &str) -> Self {
        PropertyDescriptor {
            name: name.to_string(),
            editable: true,
            multi_valued: false,
            required: true,
        }
    }

    pub fn optional_single(name: &str) -> Self {
        PropertyDescriptor {
            name: name.to_string(),
            editable: true,
            multi_valued: false,
            required: false,
        }
    }
}

/// Returned by a successful probe: the shape of the input the operation
/// expects. A probe that returns no descriptor means the operation must be
/// hidden or disabled for this caller and target.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    pub type_name: String,
    pub editable: bool,
    pub properties: Vec<PropertyDescriptor>,
}

/* ===== operation payloads ===== */

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CreateUserParams {
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Pre-Windows-2000 style account name. Defaults to `name`.
    #[serde(default)]
    pub account: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupParams {
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CreateOrgUnitParams {
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MoveParams {
    /// Distinguished name of the destination organisational unit.
    pub destination: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ModifySecurityParams {
    /// The replacement set of explicit (non-inherited) entries.
    pub entries: Vec<AceRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct DetailParams {
    /// Attribute edits, name to replacement value set. An empty value set
    /// clears the attribute.
    pub values: BTreeMap<String, Vec<String>>,
}

/* ===== invocation results ===== */

/// One directory object touched by an invocation, reported back after the
/// ledger drained: its post-commit distinguished name and attributes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UpdatedObject {
    pub dn: String,
    pub attrs: BTreeMap<String, Vec<String>>,
}
