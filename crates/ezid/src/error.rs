use crate::{Destination, QueueStatus};
use thiserror::Error;

/// A result type defaulting to the crate-wide [`enum@Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All possible errors that `ezid` can produce.
///
/// Boundary callers usually only care about [`ValidationError`]; the other
/// variants describe state that the caller cannot fix by changing its input.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    /// Input was malformed or violated a precondition. No state changed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Persisted minter state is corrupt or could not be read or written.
    #[error(transparent)]
    Minter(#[from] MinterError),

    /// The identifier store failed or refused an operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Malformed input. Surfaced to the caller; nothing is written.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("malformed identifier {identifier:?}: {reason}")]
    MalformedIdentifier { identifier: String, reason: String },

    #[error("unsupported character {ch:?} in mask {mask:?}")]
    UnsupportedMask { mask: String, ch: char },

    #[error("mask {0:?} has no generated positions or too many to count")]
    InvalidMaskLength(String),

    #[error("DOI prefix 10.{0} has no shadow ARK")]
    UnsupportedDoiPrefix(String),

    #[error("DOI prefix 10.{0} maps to a lossy shadow ARK")]
    LossyDoiPrefix(u32),

    #[error("{0:?} is not a shadow ARK NAAN")]
    NotShadowNaan(String),

    #[error("identifier already exists: {0}")]
    AlreadyExists(String),

    #[error("no such identifier: {0}")]
    NotFound(String),

    #[error("no such shoulder: {0}")]
    UnknownShoulder(String),

    #[error("shoulder {0} does not mint identifiers")]
    NotMintable(String),

    #[error("unknown {kind} code {code:?}")]
    UnknownCode { kind: &'static str, code: String },

    #[error("invalid minter key {0:?}")]
    InvalidMinterKey(String),
}

/// Corrupt or inconsistent minter state. Fatal for that shoulder.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum MinterError {
    #[error("minter state is missing field `{0}`")]
    MissingField(String),

    #[error("minter field `{field}` is not a base-10 integer: {value:?}")]
    InvalidInteger { field: String, value: String },

    #[error("unsupported mask {0:?}")]
    InvalidMask(String),

    #[error("unsupported atlast rule {0:?}")]
    InvalidAtlast(String),

    #[error("oacounter {oacounter} exceeds oatop {oatop}")]
    CounterOverflow { oacounter: u64, oatop: u64 },

    #[error("template {template:?} does not embed mask {mask:?}")]
    TemplateMismatch { template: String, mask: String },

    #[error("subcounter `{0}` has no top/value entries")]
    MissingSubcounter(String),

    #[error("subcounter lists are inconsistent: {0}")]
    InconsistentSubcounters(String),

    #[error("identifier space exhausted with oacounter {0} below oatop")]
    Exhausted(u64),

    #[error("no minter for {0}")]
    NotFound(String),

    #[error("minter for {0} already exists")]
    AlreadyExists(String),

    #[error("minter i/o error for {key}: {reason}")]
    Io { key: String, reason: String },

    #[error("minter state for {key} is not a JSON string map: {reason}")]
    Encoding { key: String, reason: String },
}

/// Failures of the identifier store.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("{destination} row {seq} cannot move from {from} to {to}")]
    InvalidTransition {
        destination: Destination,
        seq: u64,
        from: QueueStatus,
        to: QueueStatus,
    },

    #[error("{destination} row {seq} does not exist")]
    RowNotFound { destination: Destination, seq: u64 },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Corrupt(e.to_string())
    }
}
