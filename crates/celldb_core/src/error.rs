//! Error types for CellDB core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in CellDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Stream codec error.
    #[error("codec error: {0}")]
    Codec(#[from] celldb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A mutating call was made with a token other than the projection's owner.
    #[error("wrong thread: projection is owned by {owner}, caller presented {caller}")]
    WrongThread {
        /// Token value of the owner.
        owner: u64,
        /// Token value presented by the caller.
        caller: u64,
    },

    /// A mutation was attempted outside a change.
    #[error("database is not changing")]
    NotChanging,

    /// A change was started, or a backup taken, while a change is in progress.
    #[error("database is already changing")]
    AlreadyChanging,

    /// The object was killed or never existed in this projection.
    #[error("killed object: {what}")]
    KilledObject {
        /// Description of the object.
        what: String,
    },

    /// A name is already taken.
    #[error("duplicate name: {name}")]
    DuplicateName {
        /// The clashing name.
        name: String,
    },

    /// A cell is still instantiated by a live cell.
    #[error("cell {cell} is still used by {parent}")]
    CellInUse {
        /// The cell that was to be killed.
        cell: String,
        /// A live cell that instantiates it.
        parent: String,
    },

    /// A name failed validation.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An argument failed validation.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// A consistency check failed.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the broken invariant.
        message: String,
    },

    /// Snapshot stream is corrupted or out of sync.
    #[error("stream corruption: {message}")]
    StreamCorruption {
        /// Description of the corruption.
        message: String,
    },
}

impl CoreError {
    /// Creates a killed object error.
    pub fn killed(what: impl Into<String>) -> Self {
        Self::KilledObject { what: what.into() }
    }

    /// Creates a duplicate name error.
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    /// Creates an invalid name error.
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invariant violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Creates a stream corruption error.
    pub fn stream_corruption(message: impl Into<String>) -> Self {
        Self::StreamCorruption {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by a caller breaking the change protocol.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::WrongThread { .. }
                | Self::NotChanging
                | Self::AlreadyChanging
                | Self::KilledObject { .. }
                | Self::DuplicateName { .. }
                | Self::CellInUse { .. }
        )
    }
}

/// Returns an invariant violation from the enclosing function when `cond` is false.
macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::CoreError::invariant(format!($($arg)+)));
        }
    };
}

pub(crate) use ensure;
