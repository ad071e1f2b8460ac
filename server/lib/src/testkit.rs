//! In-memory test doubles. [`TestDirectory`] implements the full
//! [`DirectoryClient`] trait over a seeded tree with a miniature schema
//! partition, an extended-rights partition, and per-entry security
//! descriptors, plus handle accounting and an operation journal so tests
//! can assert on commit / refresh ordering and on leaked handles.

use crate::directory::{SearchEntry, SearchFilter};
use crate::prelude::*;
use std::cell::RefCell;
use std::collections::BTreeMap;

/// The Personal-Information property set. `telephoneNumber` and `mail`
/// carry it as their `attributeSecurityGUID`.
pub const PERSONAL_INFORMATION_GUID: Uuid = uuid!("77b5b886-944a-11d1-aebd-0000f80367c1");

/// A control-access right with no linked attributes, so it stands as its
/// own pseudo-attribute in rights tables.
pub const USER_FORCE_CHANGE_PASSWORD_GUID: Uuid = uuid!("00299570-246d-11d0-a768-00aa006e0529");

/// The `schemaIDGUID` the seeded `telephoneNumber` attribute carries, for
/// tests that scope an entry to one concrete attribute.
pub const TELEPHONE_NUMBER_GUID: Uuid = uuid!("bf967a49-0de6-11d0-a285-00aa003049e2");

/// Install the test tracing subscriber. Safe to call from every test; only
/// the first call in a process wins.
pub fn test_init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
}

/// One mutating client call, in invocation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOp {
    Create(Dn),
    Move(Dn),
    WriteDescriptor(Dn),
    Commit(Dn),
    Refresh(Dn),
}

#[derive(Debug, Clone)]
struct StoredEntry {
    dn: Dn,
    attrs: BTreeMap<String, Vec<String>>,
    aces: Vec<AceRecord>,
}

#[derive(Debug, Default)]
struct DirState {
    /// Committed entries, keyed by normalised DN.
    entries: BTreeMap<String, StoredEntry>,
    /// Staged attribute replacements, durable only on commit.
    staged: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// Open handles: id to current DN.
    handles: BTreeMap<u64, Dn>,
    next_handle: u64,
    disposed: u64,
    journal: Vec<TestOp>,
}

pub struct TestDirectory {
    config: SessionConfig,
    state: RefCell<DirState>,
}

impl TestDirectory {
    /// A directory seeded with the standard fixture: a small domain tree, a
    /// schema partition covering the user / group / organizationalUnit
    /// class chains, and two control-access rights (one property set, one
    /// unlinked).
    pub fn seeded() -> Self {
        #[allow(clippy::expect_used)]
        let config = SessionConfig::for_domain("DC=example,DC=com")
            .expect("fixture domain base must parse");
        let dir = TestDirectory {
            config,
            state: RefCell::new(DirState::default()),
        };
        dir.seed_tree();
        dir.seed_schema();
        dir.seed_extended_rights();
        dir
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn journal(&self) -> Vec<TestOp> {
        self.state.borrow().journal.clone()
    }

    pub fn open_handle_count(&self) -> usize {
        self.state.borrow().handles.len()
    }

    pub fn dispose_count(&self) -> u64 {
        self.state.borrow().disposed
    }

    /// Insert or replace an entry. Attribute names keep their given case.
    pub fn insert_entry(&self, dn: &str, attrs: &[(&str, &[&str])]) {
        #[allow(clippy::expect_used)]
        let dn = Dn::parse(dn).expect("fixture dn must parse");
        let attrs: BTreeMap<String, Vec<String>> = attrs
            .iter()
            .map(|(name, values)| {
                (
                    name.to_string(),
                    values.iter().map(|v| v.to_string()).collect(),
                )
            })
            .collect();
        self.state.borrow_mut().entries.insert(
            dn.norm().to_string(),
            StoredEntry {
                dn,
                attrs,
                aces: Vec::new(),
            },
        );
    }

    /// Replace an entry's security descriptor wholesale.
    pub fn set_security(&self, dn: &Dn, records: Vec<AceRecord>) {
        let mut state = self.state.borrow_mut();
        if let Some(entry) = state.entries.get_mut(dn.norm()) {
            entry.aces = records;
        }
    }

    fn seed_tree(&self) {
        self.insert_entry(
            "DC=example,DC=com",
            &[(ATTR_OBJECT_CLASS, &["top", "domain"])],
        );
        self.insert_entry(
            "OU=Staff,DC=example,DC=com",
            &[
                (ATTR_OBJECT_CLASS, &["top", CLASS_ORG_UNIT]),
                (ATTR_OU, &["Staff"]),
            ],
        );
        self.insert_entry(
            "OU=Archive,DC=example,DC=com",
            &[
                (ATTR_OBJECT_CLASS, &["top", CLASS_ORG_UNIT]),
                (ATTR_OU, &["Archive"]),
            ],
        );
        self.insert_entry(
            "CN=Jane Doe,OU=Staff,DC=example,DC=com",
            &[
                (
                    ATTR_OBJECT_CLASS,
                    &["top", CLASS_PERSON, "organizationalPerson", CLASS_USER],
                ),
                (ATTR_CN, &["Jane Doe"]),
                (ATTR_SAM_ACCOUNT_NAME, &["jdoe"]),
            ],
        );
    }

    fn schema_dn(&self, cn: &str) -> String {
        format!("CN={cn},{}", self.config.schema_base)
    }

    fn seed_attribute(
        &self,
        name: &str,
        guid: &str,
        single_valued: bool,
        defunct: bool,
        property_set: Option<Uuid>,
    ) {
        let dn = self.schema_dn(name);
        let single = if single_valued { "TRUE" } else { "FALSE" };
        let defunct = if defunct { "TRUE" } else { "FALSE" };
        let set_key = property_set.map(|g| g.as_hyphenated().to_string());

        let mut attrs: Vec<(&str, &[&str])> = vec![
            (ATTR_OBJECT_CLASS, &["top", CLASS_ATTRIBUTE_SCHEMA]),
            (ATTR_LDAP_DISPLAY_NAME, std::slice::from_ref(&name)),
            (ATTR_SCHEMA_ID_GUID, std::slice::from_ref(&guid)),
            (ATTR_IS_SINGLE_VALUED, std::slice::from_ref(&single)),
            (ATTR_IS_DEFUNCT, std::slice::from_ref(&defunct)),
        ];
        let set_key_ref: &str;
        if let Some(key) = set_key.as_deref() {
            set_key_ref = key;
            attrs.push((
                ATTR_ATTRIBUTE_SECURITY_GUID,
                std::slice::from_ref(&set_key_ref),
            ));
        }
        self.insert_entry(&dn, &attrs);
    }

    fn seed_class(
        &self,
        name: &str,
        guid: &str,
        sub_class_of: &str,
        must: &[&str],
        may: &[&str],
        inferiors: &[&str],
    ) {
        let dn = self.schema_dn(name);
        let mut attrs: Vec<(&str, &[&str])> = vec![
            (ATTR_OBJECT_CLASS, &["top", CLASS_CLASS_SCHEMA]),
            (ATTR_LDAP_DISPLAY_NAME, std::slice::from_ref(&name)),
            (ATTR_SCHEMA_ID_GUID, std::slice::from_ref(&guid)),
            (ATTR_SUB_CLASS_OF, std::slice::from_ref(&sub_class_of)),
        ];
        if !must.is_empty() {
            attrs.push((ATTR_MUST_CONTAIN, must));
        }
        if !may.is_empty() {
            attrs.push((ATTR_MAY_CONTAIN, may));
        }
        if !inferiors.is_empty() {
            attrs.push((ATTR_POSSIBLE_INFERIORS, inferiors));
        }
        self.insert_entry(&dn, &attrs);
    }

    fn seed_schema(&self) {
        self.seed_attribute("cn", "bf967a0e-0de6-11d0-a285-00aa003049e2", true, false, None);
        self.seed_attribute("ou", "bf9679f0-0de6-11d0-a285-00aa003049e2", false, false, None);
        self.seed_attribute(
            "description",
            "bf967950-0de6-11d0-a285-00aa003049e2",
            false,
            false,
            None,
        );
        self.seed_attribute(
            "distinguishedName",
            "bf9679e4-0de6-11d0-a285-00aa003049e2",
            true,
            false,
            None,
        );
        self.seed_attribute(
            "sAMAccountName",
            "3e0abfd0-126a-11d0-a060-00aa006c33ed",
            true,
            false,
            None,
        );
        self.seed_attribute(
            "telephoneNumber",
            "bf967a49-0de6-11d0-a285-00aa003049e2",
            true,
            false,
            Some(PERSONAL_INFORMATION_GUID),
        );
        self.seed_attribute(
            "mail",
            "bf967961-0de6-11d0-a285-00aa003049e2",
            true,
            false,
            Some(PERSONAL_INFORMATION_GUID),
        );
        self.seed_attribute(
            "userAccountControl",
            "bf967a68-0de6-11d0-a285-00aa003049e2",
            true,
            false,
            None,
        );
        self.seed_attribute(
            "member",
            "bf9679c0-0de6-11d0-a285-00aa003049e2",
            false,
            false,
            None,
        );
        self.seed_attribute(
            "groupType",
            "9a9a021e-4a5b-11d1-a9c3-0000f80367c1",
            true,
            false,
            None,
        );
        self.seed_attribute(
            "systemFlags",
            "e0fa1e62-9b45-11d0-afdd-00c04fd930c9",
            true,
            false,
            None,
        );
        // Defunct: resolvable but skipped by generic fanout.
        self.seed_attribute(
            "networkAddress",
            "bf9679d0-0de6-11d0-a285-00aa003049e2",
            false,
            true,
            None,
        );

        self.seed_class(
            "top",
            "bfd25f0e-0de6-11d0-a285-00aa003049e2",
            "top",
            &[],
            &["description"],
            &[],
        );
        self.seed_class(
            "person",
            "bf967aa8-0de6-11d0-a285-00aa003049e2",
            "top",
            &["cn"],
            &["telephoneNumber"],
            &[],
        );
        self.seed_class(
            "organizationalPerson",
            "bf967aa5-0de6-11d0-a285-00aa003049e2",
            "person",
            &[],
            &["mail"],
            &[],
        );
        self.seed_class(
            "user",
            "bf967aba-0de6-11d0-a285-00aa003049e2",
            "organizationalPerson",
            &[],
            &["sAMAccountName", "userAccountControl", "networkAddress"],
            &[],
        );
        self.seed_class(
            "group",
            "bf967a9c-0de6-11d0-a285-00aa003049e2",
            "top",
            &["cn"],
            &["member", "sAMAccountName", "groupType"],
            &[],
        );
        self.seed_class(
            "organizationalUnit",
            "bf967aa3-0de6-11d0-a285-00aa003049e2",
            "top",
            &["ou"],
            &["description", "systemFlags"],
            &["user", "group", "organizationalUnit"],
        );
        self.seed_class(
            "domain",
            "19195a5a-6da0-11d0-afd3-00c04fd930c9",
            "top",
            &[],
            &[],
            &["organizationalUnit", "user", "group"],
        );
    }

    fn seed_extended_rights(&self) {
        let base = &self.config.extended_rights_base;
        let personal = PERSONAL_INFORMATION_GUID.as_hyphenated().to_string();
        self.insert_entry(
            &format!("CN=Personal-Information,{base}"),
            &[
                (ATTR_OBJECT_CLASS, &["top", CLASS_CONTROL_ACCESS_RIGHT]),
                (ATTR_DISPLAY_NAME, &["Personal-Information"]),
                (ATTR_RIGHTS_GUID, &[personal.as_str()]),
                // read-property | write-property
                (ATTR_VALID_ACCESSES, &["48"]),
            ],
        );
        let reset = USER_FORCE_CHANGE_PASSWORD_GUID.as_hyphenated().to_string();
        self.insert_entry(
            &format!("CN=User-Force-Change-Password,{base}"),
            &[
                (ATTR_OBJECT_CLASS, &["top", CLASS_CONTROL_ACCESS_RIGHT]),
                (ATTR_DISPLAY_NAME, &["User-Force-Change-Password"]),
                (ATTR_RIGHTS_GUID, &[reset.as_str()]),
                // control-access
                (ATTR_VALID_ACCESSES, &["256"]),
            ],
        );
    }

    fn open_handle(&self, dn: Dn) -> EntryHandle {
        let mut state = self.state.borrow_mut();
        state.next_handle += 1;
        let id = state.next_handle;
        state.handles.insert(id, dn.clone());
        EntryHandle::new(id, dn)
    }

    fn handle_dn(&self, handle: &EntryHandle) -> Result<Dn, OperationError> {
        self.state
            .borrow()
            .handles
            .get(&handle.id())
            .cloned()
            .ok_or_else(|| {
                OperationError::LogicFault(format!("use of disposed handle {}", handle.id()))
            })
    }

    fn class_chain(class: &str) -> Vec<String> {
        let chain: &[&str] = match class {
            CLASS_USER => &["top", CLASS_PERSON, "organizationalPerson", CLASS_USER],
            CLASS_GROUP => &["top", CLASS_GROUP],
            CLASS_ORG_UNIT => &["top", CLASS_ORG_UNIT],
            other => return vec!["top".to_string(), other.to_string()],
        };
        chain.iter().map(|c| c.to_string()).collect()
    }
}

fn entry_matches(entry: &StoredEntry, filter: &SearchFilter) -> bool {
    let SearchFilter::Eq(attr, value) = filter;
    entry
        .attrs
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case(attr))
        .any(|(_, values)| values.iter().any(|v| v.eq_ignore_ascii_case(value)))
}

fn in_scope(entry: &StoredEntry, base: &Dn, scope: SearchScope) -> bool {
    match scope {
        SearchScope::Base => entry.dn == *base,
        SearchScope::OneLevel => entry.dn.parent().as_ref() == Some(base),
        SearchScope::Subtree => entry.dn == *base || entry.dn.is_descendant_of(base),
    }
}

impl DirectoryClient for TestDirectory {
    fn search(
        &self,
        base: &Dn,
        filter: &SearchFilter,
        attrs: &[&str],
        scope: SearchScope,
    ) -> Result<Vec<SearchEntry>, OperationError> {
        let state = self.state.borrow();
        let mut out = Vec::new();
        for entry in state.entries.values() {
            if !in_scope(entry, base, scope) || !entry_matches(entry, filter) {
                continue;
            }
            let projected: BTreeMap<String, Vec<String>> = entry
                .attrs
                .iter()
                .filter(|(name, _)| attrs.iter().any(|a| a.eq_ignore_ascii_case(name)))
                .map(|(name, values)| (name.clone(), values.clone()))
                .collect();
            out.push(SearchEntry {
                dn: entry.dn.clone(),
                attrs: projected,
            });
        }
        Ok(out)
    }

    fn get_by_dn(&self, dn: &Dn) -> Result<EntryHandle, OperationError> {
        if !self.state.borrow().entries.contains_key(dn.norm()) {
            return Err(OperationError::NotFound(dn.to_string()));
        }
        Ok(self.open_handle(dn.clone()))
    }

    fn get_by_guid(&self, guid: Uuid) -> Result<EntryHandle, OperationError> {
        let key = guid.as_hyphenated().to_string();
        let dn = self
            .state
            .borrow()
            .entries
            .values()
            .find(|e| {
                e.attrs
                    .get("objectGUID")
                    .map(|vs| vs.iter().any(|v| v.eq_ignore_ascii_case(&key)))
                    .unwrap_or(false)
            })
            .map(|e| e.dn.clone())
            .ok_or_else(|| OperationError::NotFound(key))?;
        Ok(self.open_handle(dn))
    }

    fn read_attributes(
        &self,
        handle: &EntryHandle,
    ) -> Result<BTreeMap<String, Vec<String>>, OperationError> {
        let dn = self.handle_dn(handle)?;
        self.state
            .borrow()
            .entries
            .get(dn.norm())
            .map(|e| e.attrs.clone())
            .ok_or_else(|| OperationError::NotFound(dn.to_string()))
    }

    fn read_security_descriptor(
        &self,
        handle: &EntryHandle,
    ) -> Result<Vec<AceRecord>, OperationError> {
        let dn = self.handle_dn(handle)?;
        self.state
            .borrow()
            .entries
            .get(dn.norm())
            .map(|e| e.aces.clone())
            .ok_or_else(|| OperationError::NotFound(dn.to_string()))
    }

    fn write_security_descriptor(
        &self,
        handle: &EntryHandle,
        entries: &[AceRecord],
    ) -> Result<(), OperationError> {
        let dn = self.handle_dn(handle)?;
        let mut state = self.state.borrow_mut();
        let entry = state
            .entries
            .get_mut(dn.norm())
            .ok_or_else(|| OperationError::NotFound(dn.to_string()))?;
        // Inherited entries are the parent's business and survive the write.
        entry.aces.retain(|ace| ace.inherited);
        entry.aces.extend(entries.iter().cloned());
        state.journal.push(TestOp::WriteDescriptor(dn));
        Ok(())
    }

    fn create_child(
        &self,
        parent: &EntryHandle,
        rdn: &str,
        class: &str,
    ) -> Result<EntryHandle, OperationError> {
        let parent_dn = self.handle_dn(parent)?;
        let child_dn = parent_dn.child(rdn)?;

        {
            let mut state = self.state.borrow_mut();
            if state.entries.contains_key(child_dn.norm()) {
                return Err(OperationError::LogicFault(format!(
                    "entry {child_dn} already exists"
                )));
            }

            let mut attrs: BTreeMap<String, Vec<String>> = BTreeMap::new();
            attrs.insert(ATTR_OBJECT_CLASS.to_string(), Self::class_chain(class));
            let (naming_attr, naming_value) = rdn.split_once('=').ok_or_else(|| {
                OperationError::InvalidArgument(format!("malformed rdn {rdn}"))
            })?;
            attrs.insert(
                naming_attr.to_lowercase(),
                vec![naming_value.to_string()],
            );
            attrs.insert(
                ATTR_DISTINGUISHED_NAME.to_string(),
                vec![child_dn.to_string()],
            );

            state.entries.insert(
                child_dn.norm().to_string(),
                StoredEntry {
                    dn: child_dn.clone(),
                    attrs,
                    aces: Vec::new(),
                },
            );
            state.journal.push(TestOp::Create(child_dn.clone()));
        }

        Ok(self.open_handle(child_dn))
    }

    fn set_attribute(
        &self,
        handle: &EntryHandle,
        name: &str,
        values: &[String],
    ) -> Result<(), OperationError> {
        let dn = self.handle_dn(handle)?;
        let mut state = self.state.borrow_mut();
        state
            .staged
            .entry(dn.norm().to_string())
            .or_default()
            .insert(name.to_string(), values.to_vec());
        Ok(())
    }

    fn move_entry(
        &self,
        handle: &EntryHandle,
        new_parent: &EntryHandle,
    ) -> Result<Dn, OperationError> {
        let old_dn = self.handle_dn(handle)?;
        let parent_dn = self.handle_dn(new_parent)?;
        let new_dn = parent_dn.child(old_dn.rdn())?;

        let mut state = self.state.borrow_mut();
        let mut entry = state
            .entries
            .remove(old_dn.norm())
            .ok_or_else(|| OperationError::NotFound(old_dn.to_string()))?;
        entry.dn = new_dn.clone();
        state.entries.insert(new_dn.norm().to_string(), entry);

        if let Some(staged) = state.staged.remove(old_dn.norm()) {
            state.staged.insert(new_dn.norm().to_string(), staged);
        }
        // Every open handle on the moved entry follows it.
        for dn in state.handles.values_mut() {
            if *dn == old_dn {
                *dn = new_dn.clone();
            }
        }
        state.journal.push(TestOp::Move(new_dn.clone()));
        Ok(new_dn)
    }

    fn commit(&self, handle: &EntryHandle) -> Result<(), OperationError> {
        let dn = self.handle_dn(handle)?;
        let mut state = self.state.borrow_mut();
        let staged = state.staged.remove(dn.norm()).unwrap_or_default();
        let entry = state
            .entries
            .get_mut(dn.norm())
            .ok_or_else(|| OperationError::NotFound(dn.to_string()))?;
        for (name, values) in staged {
            if values.is_empty() {
                entry.attrs.remove(&name);
            } else {
                entry.attrs.insert(name, values);
            }
        }
        state.journal.push(TestOp::Commit(dn));
        Ok(())
    }

    fn refresh(
        &self,
        handle: &EntryHandle,
        _attrs: Option<&[String]>,
    ) -> Result<(), OperationError> {
        let dn = self.handle_dn(handle)?;
        let mut state = self.state.borrow_mut();
        // Discard anything staged but uncommitted - a refresh re-reads the
        // durable state.
        state.staged.remove(dn.norm());
        state.journal.push(TestOp::Refresh(dn));
        Ok(())
    }

    fn dispose(&self, handle: &EntryHandle) {
        let mut state = self.state.borrow_mut();
        if state.handles.remove(&handle.id()).is_some() {
            state.disposed += 1;
        }
    }
}
