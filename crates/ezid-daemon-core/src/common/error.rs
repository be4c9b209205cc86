//! Error types for the propagation daemon.
//!
//! This module defines the central `Error` enum, which captures every outcome
//! a queue worker has to record or react to. Remote outcomes are split into
//! transient and permanent failures so the queue row can be parked or left
//! retryable; everything else is a local fault.
//!
//! ## Error Cases
//! - `TransientRemote`: network error, timeout or a retryable HTTP status.
//! - `PermanentRemote`: the destination explicitly rejected the request.
//! - `Local`: unexpected failure inside the worker (bad snapshot, missing
//!   credentials, XML writer failure).
//! - `ConcurrencyViolation`: a row was offered while another row for the same
//!   identifier was in flight. Deferred, never recorded as a failure.
//! - `Store`: the identifier store failed.
//! - `ChannelError`: an internal communication failure between tasks.
//! - `ServiceShutdown`: work arrived while the daemon was shutting down.

use core::fmt;
use ezid::{Destination, StoreError};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the propagation daemon.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The destination could not be reached or asked us to come back later.
    #[error("{destination} unavailable: {reason}")]
    TransientRemote {
        destination: Destination,
        reason: String,
    },

    /// The destination rejected the request; retrying will not help.
    #[error("{destination} rejected request: {reason}")]
    PermanentRemote {
        destination: Destination,
        reason: String,
    },

    /// Unexpected failure inside the worker.
    #[error("Local error: {reason}")]
    Local { reason: String },

    /// Another row for the same identifier is in flight on this destination.
    #[error("{destination} row {seq} for {identifier} deferred: identifier is in flight")]
    ConcurrencyViolation {
        destination: Destination,
        identifier: String,
        seq: u64,
    },

    /// The identifier store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The daemon is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    pub fn local(reason: impl fmt::Display) -> Self {
        Self::Local {
            reason: reason.to_string(),
        }
    }

    pub fn transient(destination: Destination, reason: impl fmt::Display) -> Self {
        Self::TransientRemote {
            destination,
            reason: reason.to_string(),
        }
    }

    pub fn permanent(destination: Destination, reason: impl fmt::Display) -> Self {
        Self::PermanentRemote {
            destination,
            reason: reason.to_string(),
        }
    }

    /// Whether a queue row failing with this error should be parked until an
    /// operator clears it.
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::PermanentRemote { .. })
    }
}

impl From<ezid::Error> for Error {
    fn from(err: ezid::Error) -> Self {
        match err {
            ezid::Error::Store(e) => Self::Store(e),
            other => Self::local(other),
        }
    }
}
