//! Adgate Protocol Bindings. These are the serde-serialisable types exchanged
//! between the adgate server core and its callers: the fault taxonomy, the
//! operation catalogue, capability descriptors returned by probes, and the
//! typed parameter payloads each operation decodes.

#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

pub mod sid;
pub mod v1;
