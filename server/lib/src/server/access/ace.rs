//! Access-control entry snapshots and the typed rights mask. Entries are
//! decoded once from the target's security descriptor at resolution time
//! and never mutated afterwards.

use crate::prelude::*;

bitflags::bitflags! {
    /// The directory rights bitmask. A raw mask whose known-bit projection
    /// is empty is malformed source data and faults during decode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Rights: u32 {
        const CREATE_CHILD   = 0x0000_0001;
        const DELETE_CHILD   = 0x0000_0002;
        const LIST_CHILDREN  = 0x0000_0004;
        const SELF_WRITE     = 0x0000_0008;
        const READ_PROP      = 0x0000_0010;
        const WRITE_PROP     = 0x0000_0020;
        const DELETE_TREE    = 0x0000_0040;
        const LIST_OBJECT    = 0x0000_0080;
        const CONTROL_ACCESS = 0x0000_0100;
        const DELETE         = 0x0001_0000;
        const READ_CONTROL   = 0x0002_0000;
        const WRITE_DACL     = 0x0004_0000;
        const WRITE_OWNER    = 0x0008_0000;

        /// Rights that act on the data of individual attributes. A generic
        /// entry carrying any of these fans out over every effective
        /// attribute of the target's class chain.
        const ATTRIBUTE_GENERIC = Self::READ_PROP.bits()
            | Self::WRITE_PROP.bits()
            | Self::SELF_WRITE.bits()
            | Self::CONTROL_ACCESS.bits();

        /// Class-level rights applying to the object itself.
        const CLASS_SELF = Self::DELETE.bits() | Self::LIST_OBJECT.bits();

        /// Class-level rights that propagate to child objects.
        const CLASS_CHILD = Self::CREATE_CHILD.bits()
            | Self::DELETE_CHILD.bits()
            | Self::LIST_CHILDREN.bits();
    }
}

impl Rights {
    /// Decode a raw directory mask. Unknown high bits are discarded; a mask
    /// with no known bits at all cannot express a rule and is a fault.
    pub fn decode(mask: u32) -> Result<Self, OperationError> {
        let rights = Rights::from_bits_truncate(mask);
        if rights.is_empty() {
            admin_error!(mask, "rights mask decodes to zero known flags");
            return Err(OperationError::SchemaInconsistency(format!(
                "rights mask {mask:#x} decodes to zero known flags"
            )));
        }
        Ok(rights)
    }

    /// Human-readable flag names, for security listings.
    pub fn flag_names(&self) -> Vec<&'static str> {
        [
            (Rights::CREATE_CHILD, "create-child"),
            (Rights::DELETE_CHILD, "delete-child"),
            (Rights::LIST_CHILDREN, "list-children"),
            (Rights::SELF_WRITE, "self-write"),
            (Rights::READ_PROP, "read-property"),
            (Rights::WRITE_PROP, "write-property"),
            (Rights::DELETE_TREE, "delete-tree"),
            (Rights::LIST_OBJECT, "list-object"),
            (Rights::CONTROL_ACCESS, "control-access"),
            (Rights::DELETE, "delete"),
            (Rights::READ_CONTROL, "read-control"),
            (Rights::WRITE_DACL, "write-dacl"),
            (Rights::WRITE_OWNER, "write-owner"),
        ]
        .iter()
        .filter_map(|(flag, name)| self.contains(*flag).then_some(*name))
        .collect()
    }
}

/// An immutable snapshot of one access-control entry, decoded from the
/// target's security descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEntry {
    pub sid: Sid,
    pub kind: AceKind,
    pub inherited: bool,
    pub scope: AceScope,
    /// `None` means the entry applies generically rather than to one
    /// attribute, class, or control-access right.
    pub object_type: Option<Uuid>,
    pub rights: Rights,
}

impl AccessEntry {
    pub fn try_from_record(record: &AceRecord) -> Result<Self, OperationError> {
        let sid = Sid::new(&record.trustee).ok_or_else(|| {
            admin_error!("access control entry with empty trustee");
            OperationError::SchemaInconsistency(
                "access control entry with empty trustee".to_string(),
            )
        })?;
        let rights = Rights::decode(record.mask)?;

        Ok(AccessEntry {
            sid,
            kind: record.kind,
            inherited: record.inherited,
            scope: record.scope,
            object_type: record.object_type,
            rights,
        })
    }

    pub fn to_record(&self) -> AceRecord {
        AceRecord {
            trustee: self.sid.to_string(),
            kind: self.kind,
            inherited: self.inherited,
            scope: self.scope,
            object_type: self.object_type,
            mask: self.rights.bits(),
        }
    }

    /// Whether this entry is effective for the object carrying it. The
    /// five scope values are matched exhaustively:
    ///
    /// | scope                              | effective when        |
    /// |------------------------------------|-----------------------|
    /// | none                               | entry is NOT inherited|
    /// | self-and-children, all-descendants | always                |
    /// | children-only, descendants-only    | entry IS inherited    |
    pub fn is_effective(&self) -> bool {
        match self.scope {
            AceScope::None => !self.inherited,
            AceScope::SelfAndChildren | AceScope::AllDescendants => true,
            AceScope::ChildrenOnly | AceScope::DescendantsOnly => self.inherited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(scope: AceScope, inherited: bool) -> AceRecord {
        AceRecord {
            trustee: "S-1-1-0".to_string(),
            kind: AceKind::Allow,
            inherited,
            scope,
            object_type: None,
            mask: Rights::READ_PROP.bits(),
        }
    }

    #[test]
    fn test_rights_decode_zero_known_flags_is_fault() {
        assert_eq!(
            Rights::decode(0),
            Err(OperationError::SchemaInconsistency(String::new()))
        );
        // Only unknown bits set.
        assert_eq!(
            Rights::decode(0x4000_0000),
            Err(OperationError::SchemaInconsistency(String::new()))
        );
        // Known bits survive alongside discarded unknown bits.
        assert_eq!(
            Rights::decode(Rights::WRITE_PROP.bits() | 0x4000_0000),
            Ok(Rights::WRITE_PROP)
        );
    }

    #[test]
    fn test_ace_effectiveness_table_is_total() {
        let cases = [
            (AceScope::None, false, true),
            (AceScope::None, true, false),
            (AceScope::SelfAndChildren, false, true),
            (AceScope::SelfAndChildren, true, true),
            (AceScope::AllDescendants, false, true),
            (AceScope::AllDescendants, true, true),
            (AceScope::ChildrenOnly, false, false),
            (AceScope::ChildrenOnly, true, true),
            (AceScope::DescendantsOnly, false, false),
            (AceScope::DescendantsOnly, true, true),
        ];
        for (scope, inherited, expected) in cases {
            let entry = AccessEntry::try_from_record(&record(scope, inherited))
                .expect("failed to decode ace");
            assert_eq!(entry.is_effective(), expected, "{scope:?} {inherited}");
        }
    }

    #[test]
    fn test_ace_empty_trustee_is_fault() {
        let mut rec = record(AceScope::None, false);
        rec.trustee = String::new();
        assert!(AccessEntry::try_from_record(&rec).is_err());
    }

    #[test]
    fn test_flag_names_render() {
        let rights = Rights::CREATE_CHILD | Rights::DELETE;
        assert_eq!(rights.flag_names(), vec!["create-child", "delete"]);
    }
}
