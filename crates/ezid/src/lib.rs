//! Core of an EZID back end.
//!
//! This crate owns everything that has to be correct regardless of how the
//! service is deployed:
//!
//! - the deterministic NOID-compatible [`Minter`] and its on-disk state,
//! - identifier syntax, normalization and the DOI to shadow-ARK mapping,
//! - the identifier record, its immutable [`RefIdentifier`] snapshots and the
//!   per-destination propagation queues,
//! - the [`Store`] interface with in-memory and SQLite backends,
//! - the [`IdentifierService`] used by boundary code to create, update, delete
//!   and mint identifiers.
//!
//! Remote propagation, link checking and sweeping live in the daemon crates;
//! they only ever talk to this crate through [`Store`].

mod error;
mod id;
mod minter;
mod model;
mod rand;
mod service;
mod store;
mod time;
mod xdig;

pub use crate::error::*;
pub use crate::id::*;
pub use crate::minter::*;
pub use crate::model::*;
pub use crate::rand::*;
pub use crate::service::*;
pub use crate::store::*;
pub use crate::time::*;
pub use crate::xdig::*;
