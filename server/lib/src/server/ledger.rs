//! The transaction ledger. Tracks every directory entry touched during one
//! protocol invocation, deduplicates by distinguished name, and guarantees
//! each entry is committed at most once and refreshed at most once, commit
//! before refresh. The ledger exclusively owns the entry handles it
//! acquires and releases every one of them when it goes out of scope -
//! whether or not the invocation ever reached `drain`.

use crate::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Dirty-state of one pending entry. Commit supersedes refresh: an entry
/// already flagged for commit is returned by the commit pass and never
/// refreshed separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    Clean,
    RefreshPending(BTreeSet<String>),
    CommitPending,
}

#[derive(Debug)]
pub struct PendingEntry {
    dn: Dn,
    handle: EntryHandle,
    state: EntryState,
}

impl PendingEntry {
    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    pub fn handle(&self) -> &EntryHandle {
        &self.handle
    }

    pub fn state(&self) -> &EntryState {
        &self.state
    }
}

pub struct TransactionLedger<'a, C: DirectoryClient> {
    client: &'a C,
    entries: BTreeMap<String, PendingEntry>,
}

impl<'a, C: DirectoryClient> TransactionLedger<'a, C> {
    pub fn new(client: &'a C) -> Self {
        TransactionLedger {
            client,
            entries: BTreeMap::new(),
        }
    }

    /// The pending entry for a distinguished name, acquiring its handle on
    /// first touch. The map key is the normalised DN, so one invocation
    /// holds exactly one entry per object.
    pub fn get_or_create(&mut self, dn: &Dn) -> Result<&PendingEntry, OperationError> {
        if !self.entries.contains_key(dn.norm()) {
            let handle = self.client.get_by_dn(dn)?;
            trace!(%dn, id = handle.id(), "ledger acquired handle");
            self.entries.insert(
                dn.norm().to_string(),
                PendingEntry {
                    dn: dn.clone(),
                    handle,
                    state: EntryState::Clean,
                },
            );
        }
        self.entries
            .get(dn.norm())
            .ok_or_else(|| OperationError::LogicFault("ledger entry vanished".to_string()))
    }

    /// Take ownership of a handle created during this invocation (a
    /// freshly created child). Two handles for one DN would break the
    /// exactly-once release discipline, so that is a fault.
    pub fn adopt(&mut self, handle: EntryHandle) -> Result<&PendingEntry, OperationError> {
        let dn = handle.dn().clone();
        if self.entries.contains_key(dn.norm()) {
            self.client.dispose(&handle);
            return Err(OperationError::LogicFault(format!(
                "ledger already owns an entry for {dn}"
            )));
        }
        self.entries.insert(
            dn.norm().to_string(),
            PendingEntry {
                dn: dn.clone(),
                handle,
                state: EntryState::Clean,
            },
        );
        self.entries
            .get(dn.norm())
            .ok_or_else(|| OperationError::LogicFault("ledger entry vanished".to_string()))
    }

    pub fn mark_commit_required(&mut self, dn: &Dn) -> Result<(), OperationError> {
        let entry = self.entries.get_mut(dn.norm()).ok_or_else(|| {
            OperationError::LogicFault(format!("commit mark for untracked entry {dn}"))
        })?;
        entry.state = EntryState::CommitPending;
        Ok(())
    }

    pub fn mark_refresh_required(&mut self, dn: &Dn, names: &[String]) -> Result<(), OperationError> {
        let entry = self.entries.get_mut(dn.norm()).ok_or_else(|| {
            OperationError::LogicFault(format!("refresh mark for untracked entry {dn}"))
        })?;
        match &mut entry.state {
            EntryState::Clean => {
                entry.state = EntryState::RefreshPending(names.iter().cloned().collect());
            }
            EntryState::RefreshPending(set) => {
                set.extend(names.iter().cloned());
            }
            // Commit already implies the entry comes back fresh.
            EntryState::CommitPending => {}
        }
        Ok(())
    }

    /// Re-key an entry after its DN changed (move). The handle is retained.
    pub fn update_dn(&mut self, old: &Dn, new: Dn) -> Result<(), OperationError> {
        let mut entry = self.entries.remove(old.norm()).ok_or_else(|| {
            OperationError::LogicFault(format!("dn update for untracked entry {old}"))
        })?;
        entry.dn = new.clone();
        self.entries.insert(new.norm().to_string(), entry);
        Ok(())
    }

    /// Flush the ledger: commit every commit-flagged entry, then refresh
    /// every refresh-flagged entry the commit pass did not already return.
    /// Each distinguished name appears at most once in the result, and a
    /// commit always precedes any refresh of the same entry.
    pub fn drain(&mut self) -> Result<BTreeMap<Dn, EntryHandle>, OperationError> {
        let mut touched = BTreeMap::new();

        for entry in self.entries.values_mut() {
            if entry.state == EntryState::CommitPending {
                self.client.commit(&entry.handle)?;
                entry.state = EntryState::Clean;
                touched.insert(entry.dn.clone(), entry.handle.clone());
            }
        }

        for entry in self.entries.values_mut() {
            if let EntryState::RefreshPending(names) = &entry.state {
                if !touched.contains_key(&entry.dn) {
                    let names: Vec<String> = names.iter().cloned().collect();
                    self.client.refresh(&entry.handle, Some(&names))?;
                    touched.insert(entry.dn.clone(), entry.handle.clone());
                }
                entry.state = EntryState::Clean;
            }
        }

        Ok(touched)
    }
}

impl<C: DirectoryClient> Drop for TransactionLedger<'_, C> {
    fn drop(&mut self) {
        // Unconditional release - success, validation failure or fault, an
        // abandoned invocation must not leak handles.
        for entry in self.entries.values() {
            self.client.dispose(&entry.handle);
        }
        self.entries.clear();
    }
}
