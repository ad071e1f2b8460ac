//! The access-rule resolution engine. Converts the raw, inheritance-tagged,
//! GUID-scoped access-control entries of one target object plus the
//! caller's applicable SID set into a flat attribute-name to effective
//! rights table.
//!
//! Resolution runs in two passes. Pass A handles entries scoped to a
//! concrete object-type GUID - a control-access right (fanning out over its
//! linked property set, or standing as its own pseudo-attribute) or a plain
//! schema attribute. Pass B handles generic entries with no object type:
//! their rights are intersected with every known control-access right,
//! fanned out over the attributes of the target's class chain, and split
//! into self/child class-level subsets.
//!
//! Within one bucket all allow rights union, all deny rights union, and
//! `effective = allow & !deny` - a deny bit wins regardless of the order
//! entries arrived in.

pub mod ace;

pub use ace::{AccessEntry, Rights};

use crate::prelude::*;
use hashbrown::HashMap;
use std::collections::BTreeSet;

/// The name every generic grant also lands under - callers can consult it
/// for rights not tied to a single attribute or class.
pub const GLOBAL_RIGHTS_KEY: &str = "";

/// The read-only product of resolution. Lookups are by name,
/// case-insensitive; a name that never received a rule holds no rights.
///
/// Deny unions survive into the table so the global fallback in [`grants`]
/// can honour them - a bucket zeroed by a deny must not be resurrected by a
/// generic grant.
///
/// [`grants`]: EffectiveRightsTable::grants
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EffectiveRightsTable {
    buckets: HashMap<String, Rights>,
    denied: HashMap<String, Rights>,
}

impl EffectiveRightsTable {
    pub fn get(&self, name: &str) -> Rights {
        self.buckets
            .get(&name.to_lowercase())
            .copied()
            .unwrap_or(Rights::empty())
    }

    pub fn contains(&self, name: &str, rights: Rights) -> bool {
        self.get(name).contains(rights)
    }

    /// Whether `rights` is granted either on `name` or globally. The
    /// global grant is masked by any deny recorded against `name`, so a
    /// per-name deny wins over a generic allow.
    pub fn grants(&self, name: &str, rights: Rights) -> bool {
        let key = name.to_lowercase();
        let named = self.buckets.get(&key).copied().unwrap_or(Rights::empty());
        let denied = self.denied.get(&key).copied().unwrap_or(Rights::empty());
        let global = self.get(GLOBAL_RIGHTS_KEY) & !denied;
        (named | global).contains(rights)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Accumulates the allow and deny unions per bucket while the passes run,
/// then masks them into the final table.
#[derive(Default)]
struct RightsBuilder {
    allow: HashMap<String, Rights>,
    deny: HashMap<String, Rights>,
}

impl RightsBuilder {
    fn apply(&mut self, kind: AceKind, name: &str, rights: Rights) {
        let side = match kind {
            AceKind::Allow => &mut self.allow,
            AceKind::Deny => &mut self.deny,
        };
        let bucket = side.entry(name.to_lowercase()).or_insert(Rights::empty());
        *bucket |= rights;
    }

    fn build(self) -> EffectiveRightsTable {
        let RightsBuilder { allow, deny } = self;
        let mut buckets = HashMap::with_capacity(allow.len());
        for (name, allowed) in allow {
            let denied = deny.get(&name).copied().unwrap_or(Rights::empty());
            let effective = allowed & !denied;
            if !effective.is_empty() {
                buckets.insert(name, effective);
            }
        }
        // Deny-only buckets resolve to nothing, but the deny union is kept
        // so grants() can mask the global fallback with it.
        EffectiveRightsTable {
            buckets,
            denied: deny,
        }
    }
}

/// Resolve the effective rights table for one (caller, target) pair.
///
/// `aces` is the snapshot of the target's security descriptor,
/// `applicable_sids` the caller's SID set (own + groups + SELF xor
/// EVERYONE), and `class_chain` the target's objectClass values, most
/// derived last.
pub fn resolve_effective_rights<C: DirectoryClient>(
    client: &C,
    catalog: &mut SchemaCatalog,
    aces: &[AccessEntry],
    applicable_sids: &BTreeSet<Sid>,
    class_chain: &[String],
) -> Result<EffectiveRightsTable, OperationError> {
    let mut builder = RightsBuilder::default();

    let effective: Vec<&AccessEntry> = aces
        .iter()
        .filter(|ace| applicable_sids.contains(&ace.sid) && ace.is_effective())
        .collect();

    trace!(
        total = aces.len(),
        effective = effective.len(),
        "filtered access control entries"
    );

    // Pass A - entries scoped to a concrete object-type guid.
    for ace in effective.iter().filter(|a| a.object_type.is_some()) {
        let Some(guid) = ace.object_type else {
            continue;
        };

        if let Some(right) = catalog.resolve_extended_right(client, guid)? {
            let linked = catalog.attributes_in_property_set(client, guid)?;
            if linked.is_empty() {
                // An operation-level right with no property set stands as
                // its own pseudo-attribute, but only when the entry carries
                // the extended-right bit at all.
                if ace.rights.contains(Rights::CONTROL_ACCESS) {
                    builder.apply(ace.kind, &right.name, ace.rights);
                }
            } else {
                for attr in &linked {
                    builder.apply(ace.kind, &attr.name, ace.rights);
                }
            }
        } else if let Some(unit) = catalog.resolve_by_guid(client, guid)? {
            builder.apply(ace.kind, &unit.name, ace.rights);
        } else {
            // The guid names a sub-object this target doesn't have. The
            // entry is inapplicable here, not broken.
            trace!(%guid, "object type not applicable to this target, skipping entry");
        }
    }

    // Pass B - generic entries, not scoped to one sub-object.
    let generic: Vec<&&AccessEntry> = effective
        .iter()
        .filter(|a| a.object_type.is_none())
        .collect();

    if !generic.is_empty() {
        let all_rights = catalog.all_extended_rights(client)?;
        let chain_attrs = catalog.attributes_for_classes(client, class_chain)?;
        let own_class = match class_chain.last() {
            Some(own) => catalog.resolve_class(client, own)?,
            None => None,
        };

        for ace in generic {
            builder.apply(ace.kind, GLOBAL_RIGHTS_KEY, ace.rights);

            // Overlap with each known control-access right.
            for right in &all_rights {
                let overlap = ace.rights & right.valid_accesses;
                if overlap.is_empty() {
                    continue;
                }
                let linked = catalog.attributes_in_property_set(client, right.rights_guid)?;
                if linked.is_empty() {
                    if overlap.contains(Rights::CONTROL_ACCESS) {
                        builder.apply(ace.kind, &right.name, overlap);
                    }
                } else {
                    for attr in &linked {
                        builder.apply(ace.kind, &attr.name, overlap);
                    }
                }
            }

            // Attribute-level generic rights fan out over the class chain.
            let attr_generic = ace.rights & Rights::ATTRIBUTE_GENERIC;
            if !attr_generic.is_empty() {
                for unit in &chain_attrs {
                    if unit.effective {
                        builder.apply(ace.kind, &unit.name, attr_generic);
                    }
                }
            }

            // Class-level generic rights split into a self subset and a
            // propagates-to-children subset.
            let class_generic = ace.rights & (Rights::CLASS_SELF | Rights::CLASS_CHILD);
            if !class_generic.is_empty() {
                if let Some(own) = &own_class {
                    let mut self_rights = ace.rights & Rights::CLASS_SELF;
                    if ace.inherited {
                        // On the child side of inheritance, a right over
                        // children becomes a right over the object itself.
                        if ace.rights.contains(Rights::DELETE_CHILD) {
                            self_rights |= Rights::DELETE;
                        }
                        if ace.rights.contains(Rights::LIST_CHILDREN) {
                            self_rights |= Rights::LIST_OBJECT;
                        }
                    }

                    let child_rights = ace.rights & Rights::CLASS_CHILD;
                    if !child_rights.is_empty() {
                        for child in &own.child_classes {
                            builder.apply(ace.kind, child, child_rights);
                        }
                    }
                    if !self_rights.is_empty() {
                        builder.apply(ace.kind, &own.name, self_rights);
                    }
                }
            }
        }
    }

    Ok(builder.build())
}

/// Decode a security-descriptor listing into entry snapshots. Malformed
/// source data faults here rather than partway through resolution.
pub fn decode_descriptor(records: &[AceRecord]) -> Result<Vec<AccessEntry>, OperationError> {
    records.iter().map(AccessEntry::try_from_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{TestDirectory, PERSONAL_INFORMATION_GUID, USER_FORCE_CHANGE_PASSWORD_GUID};
    use rand::seq::SliceRandom;

    const TRUSTEE: &str = "S-1-5-21-100-200-300-1104";

    fn setup() -> (TestDirectory, SchemaCatalog) {
        let _ = crate::testkit::test_init();
        let dir = TestDirectory::seeded();
        let catalog = SchemaCatalog::new(dir.config());
        (dir, catalog)
    }

    fn sids() -> std::collections::BTreeSet<Sid> {
        [TRUSTEE, SID_EVERYONE].iter().filter_map(|s| Sid::new(s)).collect()
    }

    fn user_chain() -> Vec<String> {
        ["top", "person", "organizationalPerson", "user"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn ace(
        kind: AceKind,
        scope: AceScope,
        inherited: bool,
        object_type: Option<Uuid>,
        rights: Rights,
    ) -> AccessEntry {
        AccessEntry {
            sid: Sid::new(TRUSTEE).expect("bad trustee"),
            kind,
            inherited,
            scope,
            object_type,
            rights,
        }
    }

    fn resolve(
        dir: &TestDirectory,
        catalog: &mut SchemaCatalog,
        aces: &[AccessEntry],
    ) -> EffectiveRightsTable {
        resolve_effective_rights(dir, catalog, aces, &sids(), &user_chain())
            .expect("resolution fault")
    }

    #[test]
    fn test_access_attribute_scoped_entry() {
        let (dir, mut catalog) = setup();
        let attr = catalog
            .resolve_by_name(&dir, "telephoneNumber")
            .expect("catalog fault")
            .expect("attribute missing");

        let aces = [ace(
            AceKind::Allow,
            AceScope::None,
            false,
            Some(attr.guid),
            Rights::READ_PROP | Rights::WRITE_PROP,
        )];
        let table = resolve(&dir, &mut catalog, &aces);

        assert_eq!(table.get("telephoneNumber"), Rights::READ_PROP | Rights::WRITE_PROP);
        assert_eq!(table.get("description"), Rights::empty());
    }

    #[test]
    fn test_access_property_set_expansion() {
        let (dir, mut catalog) = setup();

        let aces = [ace(
            AceKind::Allow,
            AceScope::None,
            false,
            Some(PERSONAL_INFORMATION_GUID),
            Rights::WRITE_PROP,
        )];
        let table = resolve(&dir, &mut catalog, &aces);

        // Rights land on exactly the linked attributes, never on the
        // control-access right's own name.
        assert_eq!(table.get("telephoneNumber"), Rights::WRITE_PROP);
        assert_eq!(table.get("mail"), Rights::WRITE_PROP);
        assert_eq!(table.get("Personal-Information"), Rights::empty());
        assert_eq!(table.get("cn"), Rights::empty());
    }

    #[test]
    fn test_access_pseudo_attribute_for_unlinked_right() {
        let (dir, mut catalog) = setup();

        // With the extended-right bit, the right's own name is the bucket.
        let aces = [ace(
            AceKind::Allow,
            AceScope::None,
            false,
            Some(USER_FORCE_CHANGE_PASSWORD_GUID),
            Rights::CONTROL_ACCESS,
        )];
        let table = resolve(&dir, &mut catalog, &aces);
        assert_eq!(
            table.get("User-Force-Change-Password"),
            Rights::CONTROL_ACCESS
        );

        // Without the extended-right bit, the entry lands nowhere.
        let aces = [ace(
            AceKind::Allow,
            AceScope::None,
            false,
            Some(USER_FORCE_CHANGE_PASSWORD_GUID),
            Rights::READ_PROP,
        )];
        let table = resolve(&dir, &mut catalog, &aces);
        assert!(table.is_empty());
    }

    #[test]
    fn test_access_unresolvable_object_type_is_skipped() {
        let (dir, mut catalog) = setup();

        let aces = [ace(
            AceKind::Allow,
            AceScope::None,
            false,
            Some(uuid!("00000000-dead-beef-0000-00000000cafe")),
            Rights::WRITE_PROP,
        )];
        // Inapplicable, not an error.
        let table = resolve(&dir, &mut catalog, &aces);
        assert!(table.is_empty());
    }

    #[test]
    fn test_access_deny_wins_any_order() {
        let (dir, mut catalog) = setup();
        let attr = catalog
            .resolve_by_name(&dir, "telephoneNumber")
            .expect("catalog fault")
            .expect("attribute missing");

        let mut aces = vec![
            ace(
                AceKind::Allow,
                AceScope::None,
                false,
                Some(attr.guid),
                Rights::READ_PROP | Rights::WRITE_PROP,
            ),
            ace(
                AceKind::Deny,
                AceScope::None,
                false,
                Some(attr.guid),
                Rights::WRITE_PROP,
            ),
            ace(
                AceKind::Allow,
                AceScope::AllDescendants,
                true,
                Some(attr.guid),
                Rights::WRITE_PROP,
            ),
        ];

        let expected = resolve(&dir, &mut catalog, &aces);
        assert_eq!(expected.get("telephoneNumber"), Rights::READ_PROP);

        // Property: shuffling entry order never changes the table.
        let mut rng = rand::thread_rng();
        for _ in 0..16 {
            aces.shuffle(&mut rng);
            let table = resolve(&dir, &mut catalog, &aces);
            assert_eq!(table, expected);
        }
    }

    #[test]
    fn test_access_attribute_deny_masks_global_grant() {
        let (dir, mut catalog) = setup();
        let attr = catalog
            .resolve_by_name(&dir, "telephoneNumber")
            .expect("catalog fault")
            .expect("attribute missing");

        let aces = [
            ace(AceKind::Allow, AceScope::None, false, None, Rights::WRITE_PROP),
            ace(
                AceKind::Deny,
                AceScope::None,
                false,
                Some(attr.guid),
                Rights::WRITE_PROP,
            ),
        ];
        let table = resolve(&dir, &mut catalog, &aces);

        // The generic grant still stands globally and on other attributes.
        assert_eq!(table.get(GLOBAL_RIGHTS_KEY), Rights::WRITE_PROP);
        assert!(table.grants("mail", Rights::WRITE_PROP));
        // But the global fallback never resurrects a denied name.
        assert_eq!(table.get("telephoneNumber"), Rights::empty());
        assert!(!table.grants("telephoneNumber", Rights::WRITE_PROP));
    }

    #[test]
    fn test_access_sid_filtering() {
        let (dir, mut catalog) = setup();
        let attr = catalog
            .resolve_by_name(&dir, "telephoneNumber")
            .expect("catalog fault")
            .expect("attribute missing");

        let mut stranger = ace(
            AceKind::Allow,
            AceScope::None,
            false,
            Some(attr.guid),
            Rights::WRITE_PROP,
        );
        stranger.sid = Sid::new("S-1-5-21-999-999-999-4444").expect("bad sid");

        let table = resolve(&dir, &mut catalog, &[stranger]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_access_inheritance_effectiveness() {
        let (dir, mut catalog) = setup();
        let attr = catalog
            .resolve_by_name(&dir, "telephoneNumber")
            .expect("catalog fault")
            .expect("attribute missing");

        // scope none + inherited: ineffective here.
        let aces = [ace(
            AceKind::Allow,
            AceScope::None,
            true,
            Some(attr.guid),
            Rights::WRITE_PROP,
        )];
        assert!(resolve(&dir, &mut catalog, &aces).is_empty());

        // children-only + not inherited: ineffective here.
        let aces = [ace(
            AceKind::Allow,
            AceScope::ChildrenOnly,
            false,
            Some(attr.guid),
            Rights::WRITE_PROP,
        )];
        assert!(resolve(&dir, &mut catalog, &aces).is_empty());

        // children-only + inherited: effective.
        let aces = [ace(
            AceKind::Allow,
            AceScope::ChildrenOnly,
            true,
            Some(attr.guid),
            Rights::WRITE_PROP,
        )];
        assert_eq!(
            resolve(&dir, &mut catalog, &aces).get("telephoneNumber"),
            Rights::WRITE_PROP
        );
    }

    #[test]
    fn test_access_generic_attribute_fanout() {
        let (dir, mut catalog) = setup();

        let aces = [ace(
            AceKind::Allow,
            AceScope::None,
            false,
            None,
            Rights::WRITE_PROP,
        )];
        let table = resolve(&dir, &mut catalog, &aces);

        assert_eq!(table.get("telephoneNumber"), Rights::WRITE_PROP);
        assert_eq!(table.get("description"), Rights::WRITE_PROP);
        // The defunct attribute is skipped by generic fanout.
        assert_eq!(table.get("networkAddress"), Rights::empty());
        // The global bucket carries the raw generic grant.
        assert_eq!(table.get(GLOBAL_RIGHTS_KEY), Rights::WRITE_PROP);
    }

    #[test]
    fn test_access_generic_overlaps_control_rights() {
        let (dir, mut catalog) = setup();

        let aces = [ace(
            AceKind::Allow,
            AceScope::None,
            false,
            None,
            Rights::CONTROL_ACCESS,
        )];
        let table = resolve(&dir, &mut catalog, &aces);

        // CONTROL_ACCESS overlaps the unlinked right's valid accesses, so
        // its pseudo-attribute appears.
        assert_eq!(
            table.get("User-Force-Change-Password"),
            Rights::CONTROL_ACCESS
        );
    }

    #[test]
    fn test_access_generic_class_split() {
        let (dir, mut catalog) = setup();
        let chain = vec![
            "top".to_string(),
            "organizationalUnit".to_string(),
        ];

        let aces = [ace(
            AceKind::Allow,
            AceScope::None,
            false,
            None,
            Rights::CREATE_CHILD | Rights::DELETE | Rights::LIST_OBJECT,
        )];
        let table = resolve_effective_rights(&dir, &mut catalog, &aces, &sids(), &chain)
            .expect("resolution fault");

        // The children subset lands on every instantiable child class.
        assert_eq!(table.get("user"), Rights::CREATE_CHILD);
        assert_eq!(table.get("group"), Rights::CREATE_CHILD);
        // The self subset lands on the most-derived class name. An org unit
        // is its own possible inferior, so the children subset joins it.
        assert_eq!(
            table.get("organizationalUnit"),
            Rights::CREATE_CHILD | Rights::DELETE | Rights::LIST_OBJECT
        );
    }

    #[test]
    fn test_access_inherited_child_rights_translate() {
        let (dir, mut catalog) = setup();
        let chain = vec!["top".to_string(), "organizationalUnit".to_string()];

        let aces = [ace(
            AceKind::Allow,
            AceScope::AllDescendants,
            true,
            None,
            Rights::DELETE_CHILD | Rights::LIST_CHILDREN,
        )];
        let table = resolve_effective_rights(&dir, &mut catalog, &aces, &sids(), &chain)
            .expect("resolution fault");

        // Inherited delete-child/list-children act on the object itself.
        let own = table.get("organizationalUnit");
        assert!(own.contains(Rights::DELETE | Rights::LIST_OBJECT));
        // And still propagate as child rights too.
        assert!(table
            .get("user")
            .contains(Rights::DELETE_CHILD | Rights::LIST_CHILDREN));
    }

    #[test]
    fn test_access_unknown_name_is_zero() {
        let (dir, mut catalog) = setup();
        let table = resolve(&dir, &mut catalog, &[]);
        assert_eq!(table.get("anything-at-all"), Rights::empty());
    }
}
