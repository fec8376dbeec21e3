//! Error types for the planner
//!
//! Errors carry one of the engine's primary result codes plus an optional
//! human-readable message that is attached to the statement being compiled.

use std::fmt;

use thiserror::Error;

/// Primary result codes the planner can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Generic compile error (SQLITE_ERROR)
    Error,
    /// Internal logic error
    Internal,
    /// Malformed statistics or schema data
    Corrupt,
    /// Out of memory
    NoMem,
    /// A virtual table rejected the offered constraint set
    Constraint,
    /// Value out of range (for example a bad argv index)
    Range,
    /// String or expression too large
    TooBig,
}

impl ErrorCode {
    /// Numeric result code as reported by the C API
    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::Error => 1,
            ErrorCode::Internal => 2,
            ErrorCode::NoMem => 7,
            ErrorCode::Corrupt => 11,
            ErrorCode::TooBig => 18,
            ErrorCode::Constraint => 19,
            ErrorCode::Range => 25,
        }
    }

    /// Default message for the code (sqlite3ErrStr)
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Error => "SQL logic error",
            ErrorCode::Internal => "internal logic error",
            ErrorCode::NoMem => "out of memory",
            ErrorCode::Corrupt => "database disk image is malformed",
            ErrorCode::Constraint => "constraint failed",
            ErrorCode::Range => "column index out of range",
            ErrorCode::TooBig => "string or blob too big",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_message())
    }
}

/// Planner error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", describe(.code, .message))]
pub struct Error {
    pub code: ErrorCode,
    pub message: Option<String>,
}

impl Error {
    pub fn new(code: ErrorCode) -> Self {
        Error {
            code,
            message: None,
        }
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Error {
            code,
            message: Some(message.into()),
        }
    }

    /// True for the errors that abort the whole compilation rather than a
    /// single candidate
    pub fn is_fatal(&self) -> bool {
        self.code != ErrorCode::Constraint
    }
}

fn describe(code: &ErrorCode, message: &Option<String>) -> String {
    match message {
        Some(message) => message.clone(),
        None => code.default_message().to_string(),
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
