//! The schema and extended-rights catalogue. Resolves attribute, class and
//! control-access-right metadata out of the directory's schema partition,
//! with a session-scoped cache keyed by both GUID and name. A unit cached
//! under either key is always the identical unit - both indices are
//! populated atomically on first resolution.
//!
//! The cache lives exactly as long as the owning session. Nothing here is
//! process-global.

use crate::prelude::*;
use crate::directory::{SearchEntry, SearchFilter};
use hashbrown::HashMap;
use std::sync::Arc;

/// One schema attribute: display name, GUID, cardinality, and the optional
/// property-set GUID linking it to a control-access right. Immutable once
/// resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaUnit {
    pub name: String,
    pub guid: Uuid,
    pub single_valued: bool,
    pub property_set: Option<Uuid>,
    /// Defunct attributes stay resolvable but are skipped when generic
    /// rights are expanded over a class chain.
    pub effective: bool,
}

impl SchemaUnit {
    fn try_from_entry(entry: &SearchEntry) -> Result<Self, OperationError> {
        let name = entry
            .attr_single(ATTR_LDAP_DISPLAY_NAME)
            .ok_or_else(|| {
                admin_error!(dn = %entry.dn, "schema attribute missing {}", ATTR_LDAP_DISPLAY_NAME);
                OperationError::SchemaInconsistency(format!(
                    "attribute entry {} missing {}",
                    entry.dn, ATTR_LDAP_DISPLAY_NAME
                ))
            })?
            .to_string();

        let guid = entry
            .attr_single(ATTR_SCHEMA_ID_GUID)
            .and_then(|raw| Uuid::try_parse(raw).ok())
            .ok_or_else(|| {
                admin_error!(%name, "schema attribute missing or malformed {}", ATTR_SCHEMA_ID_GUID);
                OperationError::SchemaInconsistency(format!(
                    "attribute {name} missing {ATTR_SCHEMA_ID_GUID}"
                ))
            })?;

        let single_valued = entry
            .attr_single(ATTR_IS_SINGLE_VALUED)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let effective = !entry
            .attr_single(ATTR_IS_DEFUNCT)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let property_set = entry
            .attr_single(ATTR_ATTRIBUTE_SECURITY_GUID)
            .map(|raw| {
                Uuid::try_parse(raw).map_err(|_| {
                    admin_error!(%name, "malformed {}", ATTR_ATTRIBUTE_SECURITY_GUID);
                    OperationError::SchemaInconsistency(format!(
                        "attribute {name} malformed {ATTR_ATTRIBUTE_SECURITY_GUID}"
                    ))
                })
            })
            .transpose()?;

        Ok(SchemaUnit {
            name,
            guid,
            single_valued,
            property_set,
            effective,
        })
    }
}

/// One schema class: its superclass chain (base first, the class itself
/// last), the attributes valid on instances (must + may, auxiliaries
/// expanded), and the classes instantiable beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaClassUnit {
    pub name: String,
    pub guid: Uuid,
    pub superclasses: Vec<String>,
    pub attributes: Vec<String>,
    pub child_classes: Vec<String>,
}

/// A control-access right: an operation-level permission exposed through
/// the same GUID space as attributes. Attributes whose `property_set`
/// equals `rights_guid` are the right's linked property set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedRightUnit {
    pub name: String,
    pub rights_guid: Uuid,
    pub valid_accesses: Rights,
}

fn guid_key(guid: Uuid) -> String {
    // Canonical lower-case hyphenated form. All GUID comparison in the
    // catalogue happens on this key.
    guid.as_hyphenated().to_string()
}

pub struct SchemaCatalog {
    schema_base: Dn,
    rights_base: Dn,
    units_by_guid: HashMap<String, Arc<SchemaUnit>>,
    units_by_name: HashMap<String, Arc<SchemaUnit>>,
    classes_by_name: HashMap<String, Arc<SchemaClassUnit>>,
    rights_by_guid: HashMap<String, Arc<ExtendedRightUnit>>,
    rights_loaded: bool,
}

impl SchemaCatalog {
    pub fn new(config: &SessionConfig) -> Self {
        SchemaCatalog {
            schema_base: config.schema_base.clone(),
            rights_base: config.extended_rights_base.clone(),
            units_by_guid: HashMap::new(),
            units_by_name: HashMap::new(),
            classes_by_name: HashMap::new(),
            rights_by_guid: HashMap::new(),
            rights_loaded: false,
        }
    }

    /// Resolve a schema attribute by its schema-id GUID. `None` is a normal
    /// outcome - the GUID may name a class or an extended right instead.
    pub fn resolve_by_guid<C: DirectoryClient>(
        &mut self,
        client: &C,
        guid: Uuid,
    ) -> Result<Option<Arc<SchemaUnit>>, OperationError> {
        let key = guid_key(guid);
        if let Some(unit) = self.units_by_guid.get(&key) {
            return Ok(Some(unit.clone()));
        }

        let entries = client.search(
            &self.schema_base,
            &SearchFilter::eq(ATTR_SCHEMA_ID_GUID, &key),
            SCHEMA_UNIT_ATTRS,
            SearchScope::OneLevel,
        )?;

        match entries.iter().find(|e| is_attribute_schema(e)) {
            Some(entry) => {
                let unit = SchemaUnit::try_from_entry(entry)?;
                Ok(Some(self.insert_unit(unit)))
            }
            None => Ok(None),
        }
    }

    /// Resolve a schema attribute by display name, case-insensitive.
    pub fn resolve_by_name<C: DirectoryClient>(
        &mut self,
        client: &C,
        name: &str,
    ) -> Result<Option<Arc<SchemaUnit>>, OperationError> {
        let key = name.to_lowercase();
        if let Some(unit) = self.units_by_name.get(&key) {
            return Ok(Some(unit.clone()));
        }

        let entries = client.search(
            &self.schema_base,
            &SearchFilter::eq(ATTR_LDAP_DISPLAY_NAME, name),
            SCHEMA_UNIT_ATTRS,
            SearchScope::OneLevel,
        )?;

        match entries.iter().find(|e| is_attribute_schema(e)) {
            Some(entry) => {
                let unit = SchemaUnit::try_from_entry(entry)?;
                Ok(Some(self.insert_unit(unit)))
            }
            None => Ok(None),
        }
    }

    /// Both indices are inserted here and only here, so a hit by either key
    /// always yields the identical unit.
    fn insert_unit(&mut self, unit: SchemaUnit) -> Arc<SchemaUnit> {
        let unit = Arc::new(unit);
        self.units_by_guid
            .insert(guid_key(unit.guid), unit.clone());
        self.units_by_name
            .insert(unit.name.to_lowercase(), unit.clone());
        unit
    }

    /// Resolve a class by display name, following its `subClassOf` chain
    /// and expanding auxiliary classes into the attribute list.
    pub fn resolve_class<C: DirectoryClient>(
        &mut self,
        client: &C,
        name: &str,
    ) -> Result<Option<Arc<SchemaClassUnit>>, OperationError> {
        let key = name.to_lowercase();
        if let Some(unit) = self.classes_by_name.get(&key) {
            return Ok(Some(unit.clone()));
        }

        let mut superclasses = Vec::new();
        let mut attributes: Vec<String> = Vec::new();
        let mut seen_attrs: HashMap<String, ()> = HashMap::new();

        let mut cursor = name.to_string();
        let mut guid = None;
        let mut child_classes = Vec::new();

        // Walk the subClassOf chain. `top` is its own superclass, which
        // terminates the walk.
        loop {
            let Some(entry) = self.fetch_class_entry(client, &cursor)? else {
                if superclasses.is_empty() {
                    // The requested class simply doesn't exist.
                    return Ok(None);
                }
                admin_error!(class = %cursor, "superclass missing from schema");
                return Err(OperationError::SchemaInconsistency(format!(
                    "class {name} references missing superclass {cursor}"
                )));
            };

            let entry_name = entry
                .attr_single(ATTR_LDAP_DISPLAY_NAME)
                .unwrap_or(&cursor)
                .to_string();

            if superclasses.is_empty() {
                guid = entry
                    .attr_single(ATTR_SCHEMA_ID_GUID)
                    .and_then(|raw| Uuid::try_parse(raw).ok());
                child_classes = entry
                    .attr_values(ATTR_POSSIBLE_INFERIORS)
                    .iter()
                    .cloned()
                    .collect();
            }

            let mut class_attrs: Vec<String> = entry
                .attr_values(ATTR_MUST_CONTAIN)
                .iter()
                .chain(entry.attr_values(ATTR_MAY_CONTAIN).iter())
                .cloned()
                .collect();

            for auxiliary in entry.attr_values(ATTR_AUXILIARY_CLASS).to_vec() {
                if let Some(aux_entry) = self.fetch_class_entry(client, &auxiliary)? {
                    class_attrs.extend(
                        aux_entry
                            .attr_values(ATTR_MUST_CONTAIN)
                            .iter()
                            .chain(aux_entry.attr_values(ATTR_MAY_CONTAIN).iter())
                            .cloned(),
                    );
                }
            }

            for attr in class_attrs {
                let attr_key = attr.to_lowercase();
                if seen_attrs.insert(attr_key, ()).is_none() {
                    attributes.push(attr);
                }
            }

            let parent = entry.attr_single(ATTR_SUB_CLASS_OF).map(str::to_string);
            superclasses.push(entry_name.clone());

            match parent {
                Some(p) if !p.eq_ignore_ascii_case(&entry_name) => {
                    // A superclass chain that revisits a class is broken
                    // metadata, and must fault rather than walk forever.
                    if superclasses.iter().any(|s| s.eq_ignore_ascii_case(&p)) {
                        admin_error!(class = %name, superclass = %p, "superclass chain loops");
                        return Err(OperationError::SchemaInconsistency(format!(
                            "class {name} has a cyclic superclass chain through {p}"
                        )));
                    }
                    cursor = p;
                }
                _ => break,
            }
        }

        let guid = guid.ok_or_else(|| {
            admin_error!(class = %name, "class entry missing or malformed {}", ATTR_SCHEMA_ID_GUID);
            OperationError::SchemaInconsistency(format!(
                "class {name} missing {ATTR_SCHEMA_ID_GUID}"
            ))
        })?;

        // Base first, the class itself last.
        superclasses.reverse();

        let unit = Arc::new(SchemaClassUnit {
            name: superclasses
                .last()
                .cloned()
                .unwrap_or_else(|| name.to_string()),
            guid,
            superclasses,
            attributes,
            child_classes,
        });
        self.classes_by_name.insert(key, unit.clone());
        Ok(Some(unit))
    }

    fn fetch_class_entry<C: DirectoryClient>(
        &self,
        client: &C,
        name: &str,
    ) -> Result<Option<SearchEntry>, OperationError> {
        let entries = client.search(
            &self.schema_base,
            &SearchFilter::eq(ATTR_LDAP_DISPLAY_NAME, name),
            SCHEMA_CLASS_ATTRS,
            SearchScope::OneLevel,
        )?;
        Ok(entries.into_iter().find(is_class_schema_owned))
    }

    /// The effective schema attributes valid for a class chain, auxiliary
    /// and inherited classes included. An attribute a class names but the
    /// schema cannot resolve is a metadata fault.
    pub fn attributes_for_classes<C: DirectoryClient>(
        &mut self,
        client: &C,
        classes: &[String],
    ) -> Result<Vec<Arc<SchemaUnit>>, OperationError> {
        let mut out: Vec<Arc<SchemaUnit>> = Vec::new();
        let mut seen: HashMap<String, ()> = HashMap::new();

        for class in classes {
            let Some(class_unit) = self.resolve_class(client, class)? else {
                admin_error!(%class, "object class missing from schema");
                return Err(OperationError::SchemaInconsistency(format!(
                    "object class {class} missing from schema"
                )));
            };
            for attr in class_unit.attributes.clone() {
                if seen.insert(attr.to_lowercase(), ()).is_some() {
                    continue;
                }
                let unit = self.resolve_by_name(client, &attr)?.ok_or_else(|| {
                    admin_error!(%class, %attr, "class names an attribute the schema lacks");
                    OperationError::SchemaInconsistency(format!(
                        "class {class} names missing attribute {attr}"
                    ))
                })?;
                out.push(unit);
            }
        }
        Ok(out)
    }

    /// Resolve a control-access right by its rights GUID.
    pub fn resolve_extended_right<C: DirectoryClient>(
        &mut self,
        client: &C,
        guid: Uuid,
    ) -> Result<Option<Arc<ExtendedRightUnit>>, OperationError> {
        self.load_extended_rights(client)?;
        Ok(self.rights_by_guid.get(&guid_key(guid)).cloned())
    }

    /// Every control-access right the directory exposes. Loaded in one bulk
    /// search and cached for the session.
    pub fn all_extended_rights<C: DirectoryClient>(
        &mut self,
        client: &C,
    ) -> Result<Vec<Arc<ExtendedRightUnit>>, OperationError> {
        self.load_extended_rights(client)?;
        let mut rights: Vec<_> = self.rights_by_guid.values().cloned().collect();
        rights.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rights)
    }

    fn load_extended_rights<C: DirectoryClient>(
        &mut self,
        client: &C,
    ) -> Result<(), OperationError> {
        if self.rights_loaded {
            return Ok(());
        }

        let entries = client.search(
            &self.rights_base,
            &SearchFilter::eq(ATTR_OBJECT_CLASS, CLASS_CONTROL_ACCESS_RIGHT),
            &[ATTR_DISPLAY_NAME, ATTR_RIGHTS_GUID, ATTR_VALID_ACCESSES],
            SearchScope::OneLevel,
        )?;

        for entry in &entries {
            let name = entry
                .attr_single(ATTR_DISPLAY_NAME)
                .ok_or_else(|| {
                    admin_error!(dn = %entry.dn, "control access right missing {}", ATTR_DISPLAY_NAME);
                    OperationError::SchemaInconsistency(format!(
                        "control access right {} missing {}",
                        entry.dn, ATTR_DISPLAY_NAME
                    ))
                })?
                .to_string();

            let rights_guid = entry
                .attr_single(ATTR_RIGHTS_GUID)
                .and_then(|raw| Uuid::try_parse(raw).ok())
                .ok_or_else(|| {
                    admin_error!(%name, "control access right missing or malformed {}", ATTR_RIGHTS_GUID);
                    OperationError::SchemaInconsistency(format!(
                        "control access right {name} missing {ATTR_RIGHTS_GUID}"
                    ))
                })?;

            let valid_accesses = entry
                .attr_single(ATTR_VALID_ACCESSES)
                .and_then(|raw| raw.parse::<u32>().ok())
                .map(Rights::decode)
                .transpose()?
                .unwrap_or(Rights::CONTROL_ACCESS);

            self.rights_by_guid.insert(
                guid_key(rights_guid),
                Arc::new(ExtendedRightUnit {
                    name,
                    rights_guid,
                    valid_accesses,
                }),
            );
        }

        self.rights_loaded = true;
        Ok(())
    }

    /// The schema attributes linked to a control-access right - those whose
    /// `attributeSecurityGUID` equals the right's GUID.
    pub fn attributes_in_property_set<C: DirectoryClient>(
        &mut self,
        client: &C,
        guid: Uuid,
    ) -> Result<Vec<Arc<SchemaUnit>>, OperationError> {
        let entries = client.search(
            &self.schema_base,
            &SearchFilter::eq(ATTR_ATTRIBUTE_SECURITY_GUID, &guid_key(guid)),
            SCHEMA_UNIT_ATTRS,
            SearchScope::OneLevel,
        )?;

        let mut units = Vec::with_capacity(entries.len());
        for entry in entries.iter().filter(|e| is_attribute_schema(e)) {
            let unit = SchemaUnit::try_from_entry(entry)?;
            // Route through the cache so later by-name/by-guid hits return
            // the identical unit.
            let key = guid_key(unit.guid);
            let cached = match self.units_by_guid.get(&key) {
                Some(cached) => cached.clone(),
                None => self.insert_unit(unit),
            };
            units.push(cached);
        }
        Ok(units)
    }

    /// Human-readable name for a GUID: the extended-rights catalogue is
    /// consulted first, then the attribute schema. A GUID resolving to
    /// neither means the directory metadata is broken - this is a fatal
    /// configuration-consistency failure, never a normal-path outcome.
    pub fn display_name_of<C: DirectoryClient>(
        &mut self,
        client: &C,
        guid: Uuid,
    ) -> Result<String, OperationError> {
        if let Some(right) = self.resolve_extended_right(client, guid)? {
            return Ok(right.name.clone());
        }
        if let Some(unit) = self.resolve_by_guid(client, guid)? {
            return Ok(unit.name.clone());
        }
        admin_error!(%guid, "guid resolves in neither the extended rights nor the schema catalogue");
        Err(OperationError::SchemaInconsistency(format!(
            "guid {guid} resolves to neither an extended right nor a schema attribute"
        )))
    }
}

const SCHEMA_UNIT_ATTRS: &[&str] = &[
    ATTR_LDAP_DISPLAY_NAME,
    ATTR_SCHEMA_ID_GUID,
    ATTR_IS_SINGLE_VALUED,
    ATTR_IS_DEFUNCT,
    ATTR_ATTRIBUTE_SECURITY_GUID,
    ATTR_OBJECT_CLASS,
];

const SCHEMA_CLASS_ATTRS: &[&str] = &[
    ATTR_LDAP_DISPLAY_NAME,
    ATTR_SCHEMA_ID_GUID,
    ATTR_SUB_CLASS_OF,
    ATTR_MUST_CONTAIN,
    ATTR_MAY_CONTAIN,
    ATTR_AUXILIARY_CLASS,
    ATTR_POSSIBLE_INFERIORS,
    ATTR_OBJECT_CLASS,
];

fn is_attribute_schema(entry: &SearchEntry) -> bool {
    entry
        .attr_values(ATTR_OBJECT_CLASS)
        .iter()
        .any(|c| c.eq_ignore_ascii_case(CLASS_ATTRIBUTE_SCHEMA))
}

fn is_class_schema_owned(entry: &SearchEntry) -> bool {
    entry
        .attr_values(ATTR_OBJECT_CLASS)
        .iter()
        .any(|c| c.eq_ignore_ascii_case(CLASS_CLASS_SCHEMA))
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use crate::testkit::TestDirectory;
    use std::sync::Arc;

    fn setup() -> (TestDirectory, SchemaCatalog) {
        let _ = crate::testkit::test_init();
        let dir = TestDirectory::seeded();
        let catalog = SchemaCatalog::new(dir.config());
        (dir, catalog)
    }

    #[test]
    fn test_schema_dual_index_agreement() {
        let (dir, mut catalog) = setup();

        let by_name = catalog
            .resolve_by_name(&dir, "telephoneNumber")
            .expect("catalog fault")
            .expect("attribute missing");
        let by_guid = catalog
            .resolve_by_guid(&dir, by_name.guid)
            .expect("catalog fault")
            .expect("attribute missing");

        // A hit by either key must return the identical logical unit.
        assert!(Arc::ptr_eq(&by_name, &by_guid));
        assert!(by_name.single_valued);
    }

    #[test]
    fn test_schema_name_lookup_case_insensitive() {
        let (dir, mut catalog) = setup();

        let lower = catalog
            .resolve_by_name(&dir, "telephonenumber")
            .expect("catalog fault")
            .expect("attribute missing");
        let display = catalog
            .resolve_by_name(&dir, "telephoneNumber")
            .expect("catalog fault")
            .expect("attribute missing");
        assert!(Arc::ptr_eq(&lower, &display));
    }

    #[test]
    fn test_schema_unknown_name_is_none() {
        let (dir, mut catalog) = setup();
        let missing = catalog
            .resolve_by_name(&dir, "flibbertigibbet")
            .expect("catalog fault");
        assert!(missing.is_none());
    }

    #[test]
    fn test_schema_class_chain_and_children() {
        let (dir, mut catalog) = setup();

        let user = catalog
            .resolve_class(&dir, "user")
            .expect("catalog fault")
            .expect("class missing");

        assert_eq!(
            user.superclasses,
            vec!["top", "person", "organizationalPerson", "user"]
        );
        // Attributes inherited from person must be present on user.
        assert!(user.attributes.iter().any(|a| a == "telephoneNumber"));

        let ou = catalog
            .resolve_class(&dir, "organizationalUnit")
            .expect("catalog fault")
            .expect("class missing");
        assert!(ou.child_classes.iter().any(|c| c == "user"));
        assert!(ou.child_classes.iter().any(|c| c == "group"));
    }

    #[test]
    fn test_schema_property_set_members() {
        let (dir, mut catalog) = setup();

        let rights = catalog.all_extended_rights(&dir).expect("catalog fault");
        let personal = rights
            .iter()
            .find(|r| r.name == "Personal-Information")
            .expect("right missing");

        let members = catalog
            .attributes_in_property_set(&dir, personal.rights_guid)
            .expect("catalog fault");
        let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
        assert!(names.contains(&"telephoneNumber"));
        assert!(!names.contains(&"cn"));
    }

    #[test]
    fn test_schema_display_name_prefers_extended_right() {
        let (dir, mut catalog) = setup();

        let rights = catalog.all_extended_rights(&dir).expect("catalog fault");
        let reset = rights
            .iter()
            .find(|r| r.name == "User-Force-Change-Password")
            .expect("right missing")
            .clone();

        let name = catalog
            .display_name_of(&dir, reset.rights_guid)
            .expect("catalog fault");
        assert_eq!(name, "User-Force-Change-Password");

        let attr = catalog
            .resolve_by_name(&dir, "description")
            .expect("catalog fault")
            .expect("attribute missing");
        let name = catalog
            .display_name_of(&dir, attr.guid)
            .expect("catalog fault");
        assert_eq!(name, "description");
    }

    #[test]
    fn test_schema_display_name_unresolved_is_fault() {
        let (dir, mut catalog) = setup();

        let bogus = uuid!("00000000-dead-beef-0000-000000000001");
        let err = catalog
            .display_name_of(&dir, bogus)
            .expect_err("must fault");
        assert_eq!(err, OperationError::SchemaInconsistency(String::new()));
    }

    #[test]
    fn test_schema_cyclic_superclass_chain_faults() {
        let (dir, mut catalog) = setup();

        // Broken metadata: two classes claiming each other as superclass.
        let base = dir.config().schema_base.clone();
        for (name, guid, parent) in [
            ("applicationA", "a1a1a1a1-0000-4000-8000-000000000001", "applicationB"),
            ("applicationB", "a1a1a1a1-0000-4000-8000-000000000002", "applicationA"),
        ] {
            dir.insert_entry(
                &format!("CN={name},{base}"),
                &[
                    (ATTR_OBJECT_CLASS, &["top", CLASS_CLASS_SCHEMA]),
                    (ATTR_LDAP_DISPLAY_NAME, &[name]),
                    (ATTR_SCHEMA_ID_GUID, &[guid]),
                    (ATTR_SUB_CLASS_OF, &[parent]),
                ],
            );
        }

        let err = catalog
            .resolve_class(&dir, "applicationA")
            .expect_err("must fault instead of walking the loop");
        assert_eq!(err, OperationError::SchemaInconsistency(String::new()));
    }
}
