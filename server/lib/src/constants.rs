//! Well-known identities, directory attribute names, and flag values used
//! across the server core.

use crate::prelude::Sid;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/* ===== well known security identifiers ===== */

/// The synthetic principal that stands for "the object itself". Added to a
/// caller's applicable set only when the caller *is* the target.
pub const SID_SELF: &str = "S-1-5-10";
/// Everyone. Added to the applicable set whenever the caller is not the
/// target - exactly one of SELF / EVERYONE ever applies.
pub const SID_EVERYONE: &str = "S-1-1-0";

pub const SID_BUILTIN_ADMINISTRATORS: &str = "S-1-5-32-544";
pub const SID_BUILTIN_ACCOUNT_OPERATORS: &str = "S-1-5-32-548";
/// The relative identifier of the domain-admins group, appended to a domain
/// SID prefix.
pub const RID_DOMAIN_ADMINS: u32 = 512;

/// Principals permitted to list and modify security descriptors. Self-service
/// principals are never in this set, so show-security and modify-security
/// stay hidden from them.
pub static SECURITY_PRINCIPAL_SIDS: LazyLock<BTreeSet<Sid>> = LazyLock::new(|| {
    [SID_BUILTIN_ADMINISTRATORS, SID_BUILTIN_ACCOUNT_OPERATORS]
        .iter()
        .filter_map(|s| Sid::new(s))
        .collect()
});

/* ===== directory attribute names ===== */

pub const ATTR_CN: &str = "cn";
pub const ATTR_OU: &str = "ou";
pub const ATTR_DESCRIPTION: &str = "description";
pub const ATTR_DISTINGUISHED_NAME: &str = "distinguishedName";
pub const ATTR_OBJECT_CLASS: &str = "objectClass";
pub const ATTR_OBJECT_SID: &str = "objectSid";
pub const ATTR_SAM_ACCOUNT_NAME: &str = "sAMAccountName";
pub const ATTR_USER_ACCOUNT_CONTROL: &str = "userAccountControl";
pub const ATTR_UNICODE_PWD: &str = "unicodePwd";
pub const ATTR_GROUP_TYPE: &str = "groupType";
pub const ATTR_SYSTEM_FLAGS: &str = "systemFlags";

/* ===== schema metadata attribute names ===== */

pub const ATTR_LDAP_DISPLAY_NAME: &str = "lDAPDisplayName";
pub const ATTR_SCHEMA_ID_GUID: &str = "schemaIDGUID";
pub const ATTR_IS_SINGLE_VALUED: &str = "isSingleValued";
pub const ATTR_IS_DEFUNCT: &str = "isDefunct";
pub const ATTR_ATTRIBUTE_SECURITY_GUID: &str = "attributeSecurityGUID";
pub const ATTR_SUB_CLASS_OF: &str = "subClassOf";
pub const ATTR_MAY_CONTAIN: &str = "mayContain";
pub const ATTR_MUST_CONTAIN: &str = "mustContain";
pub const ATTR_AUXILIARY_CLASS: &str = "auxiliaryClass";
pub const ATTR_POSSIBLE_INFERIORS: &str = "possibleInferiors";
pub const ATTR_DISPLAY_NAME: &str = "displayName";
pub const ATTR_RIGHTS_GUID: &str = "rightsGuid";
pub const ATTR_VALID_ACCESSES: &str = "validAccesses";

/* ===== directory class names ===== */

pub const CLASS_TOP: &str = "top";
pub const CLASS_USER: &str = "user";
pub const CLASS_PERSON: &str = "person";
pub const CLASS_GROUP: &str = "group";
pub const CLASS_ORG_UNIT: &str = "organizationalUnit";
pub const CLASS_ATTRIBUTE_SCHEMA: &str = "attributeSchema";
pub const CLASS_CLASS_SCHEMA: &str = "classSchema";
pub const CLASS_CONTROL_ACCESS_RIGHT: &str = "controlAccessRight";

/* ===== flag values ===== */

/// systemFlags bit marking an object that must never be moved.
pub const SYSTEM_FLAG_DISALLOW_MOVE: u32 = 0x0400_0000;

/// userAccountControl for a normal, enabled account.
pub const UAC_NORMAL_ACCOUNT: u32 = 0x0200;
/// userAccountControl "account disabled" bit, set on creation when no
/// password was supplied.
pub const UAC_ACCOUNT_DISABLE: u32 = 0x0002;

/// groupType for a global security group.
pub const GROUP_TYPE_GLOBAL_SECURITY: i64 = -2147483646;
