//! The directory-service boundary. Everything the core needs from the
//! underlying directory protocol client is expressed on the
//! [`DirectoryClient`] trait; the core never opens a connection itself.
//!
//! Handles returned by the client are opaque tokens. The transaction ledger
//! is the only owner of handles during an invocation and disposes every one
//! of them on scope exit.

use crate::prelude::*;
use std::collections::BTreeMap;

/// An opaque reference to a live directory entry held by the client. The
/// recorded DN is the DN at acquisition time - after a move the client
/// remains authoritative for the entry's location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHandle {
    id: u64,
    dn: Dn,
}

impl EntryHandle {
    pub fn new(id: u64, dn: Dn) -> Self {
        EntryHandle { id, dn }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dn(&self) -> &Dn {
        &self.dn
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}

/// The filters the core issues. Deliberately tiny - one equality assertion
/// is all the catalogue and collision checks ever need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchFilter {
    Eq(String, String),
}

impl SearchFilter {
    pub fn eq(attr: &str, value: &str) -> Self {
        SearchFilter::Eq(attr.to_string(), value.to_string())
    }
}

/// One entry returned from a search - its DN plus the requested attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchEntry {
    pub dn: Dn,
    pub attrs: BTreeMap<String, Vec<String>>,
}

impl SearchEntry {
    pub fn attr_single(&self, name: &str) -> Option<&str> {
        self.attrs
            .get(name)
            .and_then(|vs| vs.first())
            .map(String::as_str)
    }

    pub fn attr_values(&self, name: &str) -> &[String] {
        self.attrs.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// The directory service client collaborator. Implementations wrap a real
/// protocol client; `testkit::TestDirectory` provides the in-memory double.
///
/// All methods are synchronous and blocking. Connectivity or protocol
/// failures must surface as [`OperationError::Transport`] with the server
/// diagnostic preserved - never silently swallowed.
pub trait DirectoryClient {
    fn search(
        &self,
        base: &Dn,
        filter: &SearchFilter,
        attrs: &[&str],
        scope: SearchScope,
    ) -> Result<Vec<SearchEntry>, OperationError>;

    fn get_by_dn(&self, dn: &Dn) -> Result<EntryHandle, OperationError>;

    fn get_by_guid(&self, guid: Uuid) -> Result<EntryHandle, OperationError>;

    fn read_attributes(
        &self,
        handle: &EntryHandle,
    ) -> Result<BTreeMap<String, Vec<String>>, OperationError>;

    /// The target's access-control entries, own and inherited.
    fn read_security_descriptor(
        &self,
        handle: &EntryHandle,
    ) -> Result<Vec<AceRecord>, OperationError>;

    /// Replace the explicit (non-inherited) access-control entries.
    fn write_security_descriptor(
        &self,
        handle: &EntryHandle,
        entries: &[AceRecord],
    ) -> Result<(), OperationError>;

    fn create_child(
        &self,
        parent: &EntryHandle,
        rdn: &str,
        class: &str,
    ) -> Result<EntryHandle, OperationError>;

    /// Stage a replacement value set on the entry behind the handle. Staged
    /// values become durable on `commit`.
    fn set_attribute(
        &self,
        handle: &EntryHandle,
        name: &str,
        values: &[String],
    ) -> Result<(), OperationError>;

    /// Relocate the entry under a new parent, returning its new DN.
    fn move_entry(
        &self,
        handle: &EntryHandle,
        new_parent: &EntryHandle,
    ) -> Result<Dn, OperationError>;

    fn commit(&self, handle: &EntryHandle) -> Result<(), OperationError>;

    fn refresh(&self, handle: &EntryHandle, attrs: Option<&[String]>)
        -> Result<(), OperationError>;

    /// Release the handle. Must be idempotent-safe for the ledger's
    /// exactly-once release discipline to be observable.
    fn dispose(&self, handle: &EntryHandle);
}
