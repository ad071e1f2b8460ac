//! The admin session: the public protocol surface. One session wraps one
//! caller identity, one directory client and one schema catalogue, and
//! dispatches probe / validate / invoke calls into the operation set.
//!
//! Authorisation is never cached across invocations. Every call re-reads
//! the target's security descriptor and re-resolves the caller's effective
//! rights from scratch - a stale permission honoured once is worse than the
//! extra round trips.

pub mod access;
pub mod identity;
pub mod ledger;
pub mod ops;

use crate::prelude::*;
use crate::server::access::{decode_descriptor, resolve_effective_rights};
use crate::server::ops::{OpContext, ProbeOutcome, TargetContext};
use std::collections::BTreeMap;

pub struct AdminSession<'a, C: DirectoryClient> {
    client: &'a C,
    config: SessionConfig,
    catalog: SchemaCatalog,
    ident: Identity,
}

impl<'a, C: DirectoryClient> AdminSession<'a, C> {
    pub fn new(client: &'a C, config: SessionConfig, ident: Identity) -> Self {
        let catalog = SchemaCatalog::new(&config);
        AdminSession {
            client,
            config,
            catalog,
            ident,
        }
    }

    pub fn ident(&self) -> &Identity {
        &self.ident
    }

    /// Resolve everything an operation needs to know about the target:
    /// class chain, security-descriptor snapshot, and the caller's
    /// effective rights table. The handle used for the reads is released
    /// before returning.
    fn resolve_target(&mut self, target: &Dn) -> Result<TargetContext, OperationError> {
        let handle = self.client.get_by_dn(target)?;

        let outcome = (|| {
            let attrs = self.client.read_attributes(&handle)?;
            let classes: Vec<String> = attrs.get(ATTR_OBJECT_CLASS).cloned().unwrap_or_default();
            if classes.is_empty() {
                admin_error!(%target, "entry carries no objectClass");
                return Err(OperationError::SchemaInconsistency(format!(
                    "{target} carries no objectClass"
                )));
            }

            let records = self.client.read_security_descriptor(&handle)?;
            let aces = decode_descriptor(&records)?;

            let target_is_self = self
                .ident
                .user()
                .map(|u| u.dn == *target)
                .unwrap_or(false);
            let sids = self.ident.applicable_sids(target_is_self);

            let rights =
                resolve_effective_rights(self.client, &mut self.catalog, &aces, &sids, &classes)?;
            security_access!(
                ident = %self.ident,
                %target,
                entries = aces.len(),
                "effective rights resolved"
            );

            Ok(TargetContext {
                dn: target.clone(),
                classes,
                rights,
                aces,
            })
        })();

        self.client.dispose(&handle);
        outcome
    }

    /// Probe every catalogued operation against one target. Denied
    /// operations are omitted - the caller sees only what could succeed.
    pub fn list_available_operations(
        &mut self,
        target: &Dn,
    ) -> Result<BTreeMap<OperationName, CapabilityDescriptor>, OperationError> {
        let tc = self.resolve_target(target)?;
        let mut ctx = OpContext {
            client: self.client,
            catalog: &mut self.catalog,
            config: &self.config,
            ident: &self.ident,
            target: &tc,
        };

        let mut available = BTreeMap::new();
        for op in OperationName::ALL {
            if !ops::show_in_catalog(op) {
                continue;
            }
            if let ProbeOutcome::Available(cap) = ops::probe(op, &mut ctx)? {
                available.insert(op, cap);
            }
        }
        Ok(available)
    }

    /// Probe one operation, keeping the denial reason. The reason is a
    /// display string for the caller's UI, never an error.
    pub fn probe_operation(
        &mut self,
        op: OperationName,
        target: &Dn,
    ) -> Result<ProbeOutcome, OperationError> {
        let tc = self.resolve_target(target)?;
        let mut ctx = OpContext {
            client: self.client,
            catalog: &mut self.catalog,
            config: &self.config,
            ident: &self.ident,
            target: &tc,
        };
        ops::probe(op, &mut ctx)
    }

    pub fn get_operation_capability(
        &mut self,
        op: OperationName,
        target: &Dn,
    ) -> Result<Option<CapabilityDescriptor>, OperationError> {
        Ok(self.probe_operation(op, target)?.into_capability())
    }

    pub fn validate_operation(
        &mut self,
        op: OperationName,
        target: &Dn,
        payload: &serde_json::Value,
    ) -> Result<bool, OperationError> {
        let tc = self.resolve_target(target)?;
        let mut ctx = OpContext {
            client: self.client,
            catalog: &mut self.catalog,
            config: &self.config,
            ident: &self.ident,
            target: &tc,
        };
        ops::validate(op, &mut ctx, payload)
    }

    /// Validate then execute one operation, drain the ledger, and report
    /// every committed or refreshed object. An empty map means validation
    /// failed or there was nothing to do - never an error.
    pub fn invoke_operation(
        &mut self,
        op: OperationName,
        target: &Dn,
        payload: &serde_json::Value,
    ) -> Result<BTreeMap<String, UpdatedObject>, OperationError> {
        request_trace!(ident = %self.ident, %op, %target, "invoke");

        let tc = self.resolve_target(target)?;
        let mut ctx = OpContext {
            client: self.client,
            catalog: &mut self.catalog,
            config: &self.config,
            ident: &self.ident,
            target: &tc,
        };

        if !ops::validate(op, &mut ctx, payload)? {
            security_access!(ident = %ctx.ident, %op, %target, "validation declined");
            return Ok(BTreeMap::new());
        }

        let mut ledger = TransactionLedger::new(self.client);
        ops::execute(op, &mut ctx, &mut ledger, payload)?;
        let touched = ledger.drain()?;

        let mut updated = BTreeMap::new();
        for (dn, handle) in touched {
            let attrs = self.client.read_attributes(&handle)?;
            updated.insert(
                dn.to_string(),
                UpdatedObject {
                    dn: dn.to_string(),
                    attrs,
                },
            );
        }
        drop(ledger);

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use crate::server::ops::ProbeOutcome;
    use crate::testkit::{TestDirectory, TELEPHONE_NUMBER_GUID};
    use serde_json::json;

    const CALLER_SID: &str = "S-1-5-21-100-200-300-1104";
    const CALLER_GROUP: &str = "S-1-5-21-100-200-300-2000";

    fn staff() -> Dn {
        Dn::parse("OU=Staff,DC=example,DC=com").expect("failed to parse dn")
    }

    fn archive() -> Dn {
        Dn::parse("OU=Archive,DC=example,DC=com").expect("failed to parse dn")
    }

    fn jane() -> Dn {
        Dn::parse("CN=Jane Doe,OU=Staff,DC=example,DC=com").expect("failed to parse dn")
    }

    fn caller() -> Identity {
        Identity::from_user(CALLER_SID, &[CALLER_GROUP], jane()).expect("failed to build identity")
    }

    fn admin() -> Identity {
        Identity::from_user(
            "S-1-5-21-100-200-300-500",
            &[SID_BUILTIN_ADMINISTRATORS],
            Dn::parse("CN=Admin,DC=example,DC=com").expect("failed to parse dn"),
        )
        .expect("failed to build identity")
    }

    fn allow_generic(rights: Rights) -> AceRecord {
        AceRecord {
            trustee: CALLER_GROUP.to_string(),
            kind: AceKind::Allow,
            inherited: false,
            scope: AceScope::SelfAndChildren,
            object_type: None,
            mask: rights.bits(),
        }
    }

    fn deny_scoped(object_type: Uuid, rights: Rights) -> AceRecord {
        AceRecord {
            trustee: CALLER_GROUP.to_string(),
            kind: AceKind::Deny,
            inherited: false,
            scope: AceScope::None,
            object_type: Some(object_type),
            mask: rights.bits(),
        }
    }

    fn session_for(dir: &TestDirectory, ident: Identity) -> AdminSession<'_, TestDirectory> {
        AdminSession::new(dir, dir.config().clone(), ident)
    }

    #[test]
    fn test_e2e_create_group() {
        let _ = crate::testkit::test_init();
        let dir = TestDirectory::seeded();
        dir.set_security(&staff(), vec![allow_generic(Rights::CREATE_CHILD)]);
        let mut session = session_for(&dir, caller());

        let cap = session
            .get_operation_capability(OperationName::CreateGroup, &staff())
            .expect("probe fault")
            .expect("create-group should be available");
        assert_eq!(cap.type_name, CLASS_GROUP);
        assert!(cap
            .properties
            .iter()
            .any(|p| p.name == "name" && p.required));

        let payload = json!({ "name": "Sales" });
        assert!(session
            .validate_operation(OperationName::CreateGroup, &staff(), &payload)
            .expect("validate fault"));

        let updated = session
            .invoke_operation(OperationName::CreateGroup, &staff(), &payload)
            .expect("invoke fault");
        let new_dn = "CN=Sales,OU=Staff,DC=example,DC=com";
        assert_eq!(updated.len(), 1);
        let object = updated.get(new_dn).expect("created object not reported");
        assert_eq!(
            object.attrs.get(ATTR_SAM_ACCOUNT_NAME),
            Some(&vec!["Sales".to_string()])
        );

        // The name is now taken, so a second validation declines.
        assert!(!session
            .validate_operation(OperationName::CreateGroup, &staff(), &payload)
            .expect("validate fault"));

        // No handle leaked across the whole exchange.
        assert_eq!(dir.open_handle_count(), 0);
    }

    #[test]
    fn test_e2e_create_user_denied_without_right() {
        let _ = crate::testkit::test_init();
        let dir = TestDirectory::seeded();
        // Write-property only: no create rights anywhere.
        dir.set_security(&staff(), vec![allow_generic(Rights::WRITE_PROP)]);
        let mut session = session_for(&dir, caller());

        match session
            .probe_operation(OperationName::CreateUser, &staff())
            .expect("probe fault")
        {
            ProbeOutcome::Denied(reason) => {
                assert!(reason.contains("create-child"));
                assert!(reason.contains(CLASS_USER));
            }
            ProbeOutcome::Available(_) => panic!("create-user should be denied"),
        }

        let available = session
            .list_available_operations(&staff())
            .expect("listing fault");
        assert!(!available.contains_key(&OperationName::CreateUser));
        assert!(!available.contains_key(&OperationName::ShowCreatable));
        // Attribute edits remain on offer.
        assert!(available.contains_key(&OperationName::ShowDetail));
    }

    #[test]
    fn test_e2e_show_creatable_lists_available_creates() {
        let _ = crate::testkit::test_init();
        let dir = TestDirectory::seeded();
        dir.set_security(&staff(), vec![allow_generic(Rights::CREATE_CHILD)]);
        let mut session = session_for(&dir, caller());

        let cap = session
            .get_operation_capability(OperationName::ShowCreatable, &staff())
            .expect("probe fault")
            .expect("show-creatable should be available");
        let names: Vec<&str> = cap.properties.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"create-user"));
        assert!(names.contains(&"create-group"));
        assert!(names.contains(&"create-org-unit"));
    }

    #[test]
    fn test_e2e_move_with_noop_guard() {
        let _ = crate::testkit::test_init();
        let dir = TestDirectory::seeded();
        dir.set_security(&jane(), vec![allow_generic(Rights::DELETE)]);
        dir.set_security(&archive(), vec![allow_generic(Rights::CREATE_CHILD)]);
        let mut session = session_for(&dir, caller());

        assert!(session
            .get_operation_capability(OperationName::Move, &jane())
            .expect("probe fault")
            .is_some());

        // Destination equals the current parent: probe succeeded but the
        // no-op guard declines.
        let noop = json!({ "destination": "OU=Staff,DC=example,DC=com" });
        assert!(!session
            .validate_operation(OperationName::Move, &jane(), &noop)
            .expect("validate fault"));
        let updated = session
            .invoke_operation(OperationName::Move, &jane(), &noop)
            .expect("invoke fault");
        assert!(updated.is_empty());

        // A real destination goes through.
        let payload = json!({ "destination": "OU=Archive,DC=example,DC=com" });
        assert!(session
            .validate_operation(OperationName::Move, &jane(), &payload)
            .expect("validate fault"));
        let updated = session
            .invoke_operation(OperationName::Move, &jane(), &payload)
            .expect("invoke fault");
        assert!(updated.contains_key("CN=Jane Doe,OU=Archive,DC=example,DC=com"));
        assert_eq!(dir.open_handle_count(), 0);
    }

    #[test]
    fn test_e2e_move_declined_into_own_subtree() {
        let _ = crate::testkit::test_init();
        let dir = TestDirectory::seeded();
        dir.set_security(&staff(), vec![allow_generic(Rights::DELETE)]);
        let mut session = session_for(&dir, caller());

        let payload = json!({ "destination": "OU=Nested,OU=Staff,DC=example,DC=com" });
        assert!(!session
            .validate_operation(OperationName::Move, &staff(), &payload)
            .expect("validate fault"));
    }

    #[test]
    fn test_e2e_move_declined_for_move_disabled_object() {
        let _ = crate::testkit::test_init();
        let dir = TestDirectory::seeded();
        let flag = SYSTEM_FLAG_DISALLOW_MOVE.to_string();
        dir.insert_entry(
            "OU=Fixed,OU=Staff,DC=example,DC=com",
            &[
                (ATTR_OBJECT_CLASS, &["top", CLASS_ORG_UNIT]),
                (ATTR_OU, &["Fixed"]),
                (ATTR_SYSTEM_FLAGS, &[flag.as_str()]),
            ],
        );
        let pinned =
            Dn::parse("OU=Fixed,OU=Staff,DC=example,DC=com").expect("failed to parse dn");
        dir.set_security(&pinned, vec![allow_generic(Rights::DELETE)]);
        dir.set_security(&archive(), vec![allow_generic(Rights::CREATE_CHILD)]);
        let mut session = session_for(&dir, caller());

        // Rights alone would permit the move, so probe succeeds.
        assert!(session
            .get_operation_capability(OperationName::Move, &pinned)
            .expect("probe fault")
            .is_some());

        // The pinned flag declines it whatever the rights say.
        let payload = json!({ "destination": "OU=Archive,DC=example,DC=com" });
        assert!(!session
            .validate_operation(OperationName::Move, &pinned, &payload)
            .expect("validate fault"));
        let updated = session
            .invoke_operation(OperationName::Move, &pinned, &payload)
            .expect("invoke fault");
        assert!(updated.is_empty());
    }

    #[test]
    fn test_e2e_security_ops_gated_on_principal() {
        let _ = crate::testkit::test_init();
        let dir = TestDirectory::seeded();
        dir.set_security(&staff(), vec![allow_generic(Rights::WRITE_PROP)]);

        // A self-service caller sees neither security operation.
        let mut session = session_for(&dir, caller());
        for op in [OperationName::ShowSecurity, OperationName::ModifySecurity] {
            assert!(session
                .get_operation_capability(op, &staff())
                .expect("probe fault")
                .is_none());
        }

        // An administrator sees both, and the listing renders the entries.
        let mut session = session_for(&dir, admin());
        let cap = session
            .get_operation_capability(OperationName::ShowSecurity, &staff())
            .expect("probe fault")
            .expect("show-security should be available");
        assert_eq!(cap.properties.len(), 1);
        assert!(cap.properties[0].name.contains(CALLER_GROUP));
        assert!(cap.properties[0].name.contains("write-property"));
    }

    #[test]
    fn test_e2e_modify_security_replaces_entries() {
        let _ = crate::testkit::test_init();
        let dir = TestDirectory::seeded();
        dir.set_security(&staff(), vec![allow_generic(Rights::WRITE_PROP)]);
        let mut session = session_for(&dir, admin());

        let replacement = allow_generic(Rights::CREATE_CHILD);
        let payload =
            serde_json::to_value(ModifySecurityParams {
                entries: vec![replacement.clone()],
            })
            .expect("failed to encode payload");

        let updated = session
            .invoke_operation(OperationName::ModifySecurity, &staff(), &payload)
            .expect("invoke fault");
        assert!(updated.contains_key("OU=Staff,DC=example,DC=com"));

        // The caller's group can now create children at the container.
        let mut session = session_for(&dir, caller());
        assert!(session
            .get_operation_capability(OperationName::CreateGroup, &staff())
            .expect("probe fault")
            .is_some());
    }

    #[test]
    fn test_e2e_show_detail_edit() {
        let _ = crate::testkit::test_init();
        let dir = TestDirectory::seeded();
        dir.set_security(&jane(), vec![allow_generic(Rights::WRITE_PROP)]);
        let mut session = session_for(&dir, caller());

        let cap = session
            .get_operation_capability(OperationName::ShowDetail, &jane())
            .expect("probe fault")
            .expect("show-detail should be available");
        assert!(cap
            .properties
            .iter()
            .any(|p| p.name == "telephoneNumber" && p.editable && !p.multi_valued));

        // Two values for a single-valued attribute declines.
        let bad = json!({ "values": { "telephoneNumber": ["555-0100", "555-0101"] } });
        assert!(!session
            .validate_operation(OperationName::ShowDetail, &jane(), &bad)
            .expect("validate fault"));

        let payload = json!({ "values": { "telephoneNumber": ["555-0100"] } });
        let updated = session
            .invoke_operation(OperationName::ShowDetail, &jane(), &payload)
            .expect("invoke fault");
        let object = updated
            .get("CN=Jane Doe,OU=Staff,DC=example,DC=com")
            .expect("edited object not reported");
        assert_eq!(
            object.attrs.get("telephoneNumber"),
            Some(&vec!["555-0100".to_string()])
        );
    }

    #[test]
    fn test_e2e_attribute_deny_beats_generic_write() {
        let _ = crate::testkit::test_init();
        let dir = TestDirectory::seeded();
        dir.set_security(
            &jane(),
            vec![
                allow_generic(Rights::WRITE_PROP),
                deny_scoped(TELEPHONE_NUMBER_GUID, Rights::WRITE_PROP),
            ],
        );
        let mut session = session_for(&dir, caller());

        // The generic grant still carries the other attributes.
        let payload = json!({ "values": { "description": ["on leave"] } });
        assert!(session
            .validate_operation(OperationName::ShowDetail, &jane(), &payload)
            .expect("validate fault"));

        // The denied attribute is neither offered as editable nor writable.
        let cap = session
            .get_operation_capability(OperationName::ShowDetail, &jane())
            .expect("probe fault")
            .expect("show-detail should be available");
        assert!(cap
            .properties
            .iter()
            .any(|p| p.name == "telephoneNumber" && !p.editable));

        let payload = json!({ "values": { "telephoneNumber": ["555-0100"] } });
        assert!(!session
            .validate_operation(OperationName::ShowDetail, &jane(), &payload)
            .expect("validate fault"));
    }

    #[test]
    fn test_e2e_unknown_target_is_not_found() {
        let _ = crate::testkit::test_init();
        let dir = TestDirectory::seeded();
        let mut session = session_for(&dir, caller());

        let missing = Dn::parse("OU=Ghost,DC=example,DC=com").expect("failed to parse dn");
        assert_eq!(
            session.list_available_operations(&missing),
            Err(OperationError::NotFound(String::new()))
        );
    }
}
