//! Error types for the provider bridge.

use crate::protocol::constants::{
    SQLSTATE_BAD_PARAMETER, SQLSTATE_GENERAL, SQLSTATE_NOT_SUPPORTED, SQLSTATE_SEQUENCE,
};
use crate::protocol::status::HResult;
use std::fmt;
use std::io;
use std::panic::Location;
use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Rendered diagnostic: status code, 5-character SQL state and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub status: HResult,
    pub sql_state: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(status: HResult, sql_state: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            sql_state: sql_state.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SQLSTATE[{}] [{}] {}", self.sql_state, self.status, self.message)
    }
}

/// Error type for bridge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error while reading a stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Provider object creation or a required initialization property failed.
    #[error("Connection setup failed: {0}")]
    ConnectionSetup(Diagnostic),

    /// Command creation, placeholder parsing or provider prepare failed.
    #[error("Prepare failed: {0}")]
    Prepare(Diagnostic),

    /// Charset could not be resolved or a converter failed.
    #[error("Conversion failed: {0}")]
    Conversion(Diagnostic),

    /// Provider execute failed.
    #[error("Execute failed: {0}")]
    Execute(Diagnostic),

    /// Cursor movement or row data retrieval failed.
    #[error("Fetch failed: {0}")]
    Fetch(Diagnostic),

    /// A parameter could not be bound.
    #[error("Parameter binding failed: {0}")]
    ParameterBind(Diagnostic),

    /// Extended column metadata could not be read.
    #[error("Metadata lookup failed: {0}")]
    Metadata(Diagnostic),

    /// The provider lacks a capability the operation needs.
    #[error("Unsupported operation: {0}")]
    Unsupported(Diagnostic),

    /// Operation attempted in a state that does not allow it.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// Column index out of bounds.
    #[error("Column index {index} out of bounds (columns: {count})")]
    ColumnIndexOutOfBounds { index: usize, count: usize },

    /// Named parameter not present in the query.
    #[error("Parameter not found: {name}")]
    ParameterNotFound { name: String },

    /// Record decoding ran past the end of a buffer.
    #[error("Buffer too small: need {needed} bytes, have {available} at {location}")]
    BufferTooSmall {
        needed: usize,
        available: usize,
        location: &'static Location<'static>,
    },

    /// Value could not be converted to the requested type.
    #[error("Type conversion error: {message}")]
    TypeConversion { message: String },

    /// Attribute unknown for the scope or carrying a bad value.
    #[error("Invalid attribute: {message}")]
    InvalidAttribute { message: String },

    /// Invalid connect string.
    #[error("Invalid connect string: {message}")]
    InvalidConnectString { message: String },
}

/// Taxonomy used to wrap a rendered diagnostic into an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectionSetup,
    Prepare,
    Conversion,
    Execute,
    Fetch,
    ParameterBind,
    Metadata,
    Unsupported,
}

impl ErrorKind {
    pub fn wrap(self, diagnostic: Diagnostic) -> Error {
        match self {
            ErrorKind::ConnectionSetup => Error::ConnectionSetup(diagnostic),
            ErrorKind::Prepare => Error::Prepare(diagnostic),
            ErrorKind::Conversion => Error::Conversion(diagnostic),
            ErrorKind::Execute => Error::Execute(diagnostic),
            ErrorKind::Fetch => Error::Fetch(diagnostic),
            ErrorKind::ParameterBind => Error::ParameterBind(diagnostic),
            ErrorKind::Metadata => Error::Metadata(diagnostic),
            ErrorKind::Unsupported => Error::Unsupported(diagnostic),
        }
    }
}

impl Error {
    /// Create a conversion error.
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion(Diagnostic::new(HResult::E_FAIL, SQLSTATE_GENERAL, message))
    }

    /// Create a parameter binding error with an explicit SQL state.
    pub fn parameter(sql_state: &str, message: impl Into<String>) -> Self {
        Self::ParameterBind(Diagnostic::new(HResult::E_FAIL, sql_state, message))
    }

    /// Create an unsupported-capability error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(Diagnostic::new(
            HResult::E_NOTIMPL,
            SQLSTATE_NOT_SUPPORTED,
            message,
        ))
    }

    /// Create a type conversion error.
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    pub fn invalid_state(operation: &'static str, state: &'static str) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Create an invalid attribute error.
    pub fn invalid_attribute(message: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            message: message.into(),
        }
    }

    /// Rendered provider diagnostic, if this error carries one.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Error::ConnectionSetup(d)
            | Error::Prepare(d)
            | Error::Conversion(d)
            | Error::Execute(d)
            | Error::Fetch(d)
            | Error::ParameterBind(d)
            | Error::Metadata(d)
            | Error::Unsupported(d) => Some(d),
            _ => None,
        }
    }

    /// Five character SQL state describing this error.
    pub fn sql_state(&self) -> &str {
        if let Some(diagnostic) = self.diagnostic() {
            return &diagnostic.sql_state;
        }
        match self {
            Error::InvalidState { .. } => SQLSTATE_SEQUENCE,
            Error::ParameterNotFound { .. } => SQLSTATE_BAD_PARAMETER,
            _ => SQLSTATE_GENERAL,
        }
    }
}
