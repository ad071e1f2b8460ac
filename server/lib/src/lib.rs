//! The adgated server library. This implements the core of the server: the
//! schema/extended-rights catalogue, the access-rule resolution engine that
//! reduces a target's security descriptor to an effective rights table for
//! one caller, the gated command protocol layered over that table, and the
//! transaction ledger that batches directory mutations.
//!
//! The directory service itself (connect, bind, search, commit) is a
//! collaborator behind the [`directory::DirectoryClient`] trait, never
//! implemented here.

#![warn(unused_extern_crates)]
#![deny(clippy::suspicious)]
#![deny(clippy::perf)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::manual_let_else)]

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod macros;

pub mod config;
pub mod constants;
pub mod directory;
pub mod dn;
pub mod schema;
pub mod server;
#[cfg(any(test, feature = "test"))]
pub mod testkit;

/// A prelude of imports that should be imported by all other adgate modules
/// to help make imports cleaner.
pub mod prelude {
    pub use uuid::{uuid, Uuid};

    pub use adgate_proto::sid::Sid;
    pub use adgate_proto::v1::{
        AceKind, AceRecord, AceScope, CapabilityDescriptor, CreateGroupParams, CreateOrgUnitParams,
        CreateUserParams, DetailParams, ModifySecurityParams, MoveParams, OperationError,
        OperationName, PropertyDescriptor, UpdatedObject,
    };

    pub use crate::config::SessionConfig;
    pub use crate::constants::*;
    pub use crate::directory::{DirectoryClient, EntryHandle, SearchScope};
    pub use crate::dn::Dn;
    pub use crate::schema::{ExtendedRightUnit, SchemaCatalog, SchemaClassUnit, SchemaUnit};
    pub use crate::server::access::ace::AccessEntry;
    pub use crate::server::access::{EffectiveRightsTable, Rights};
    pub use crate::server::identity::{IdentType, Identity};
    pub use crate::server::ledger::TransactionLedger;
    pub use crate::server::AdminSession;
}
