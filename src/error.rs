// Backend errors
//
// Every native call is followed by an error query; a non-zero code becomes a
// `BackendError` carrying the code, the originating call and the call site.

use std::fmt;
use std::panic::Location;

use crate::driver::{gl, Driver, NativeEnum};

/// Error taxonomy of the resource layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The driver refused to create a native object
    Allocation,
    /// A native call after allocation reported an error
    Configuration,
    /// A composite object (framebuffer, pipeline) failed its validity check
    Incomplete,
    /// Shader compilation or program linking failed; the message is the driver log
    Compile,
    /// The caller passed a description the layer can't express natively
    InvalidParameter,
    /// Command-list or map/unmap ordering was violated
    Misuse,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Allocation => "allocation failure",
            ErrorKind::Configuration => "configuration failure",
            ErrorKind::Incomplete => "incomplete object",
            ErrorKind::Compile => "compile failure",
            ErrorKind::InvalidParameter => "invalid parameter",
            ErrorKind::Misuse => "protocol misuse",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{operation}: {kind} (code {code:#06x}): {message}")]
pub struct BackendError {
    kind: ErrorKind,
    code: u32,
    message: String,
    operation: &'static str,
    location: &'static Location<'static>,
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

impl BackendError {
    #[track_caller]
    pub fn new(kind: ErrorKind, code: u32, operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            operation,
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn invalid(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParameter, 0, operation, message)
    }

    #[track_caller]
    pub fn misuse(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Misuse, 0, operation, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Native error or status code, 0 when the error originated in this layer
    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Native call or layer operation that failed
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

/// Query the driver's error flag after a native call.
///
/// `kind` classifies the failure; an out-of-memory code is always reported as
/// an allocation failure regardless of the call that raised it.
#[track_caller]
pub fn check(driver: &dyn Driver, kind: ErrorKind, operation: &'static str) -> BackendResult<()> {
    let code = driver.get_error();
    if code == gl::NO_ERROR {
        return Ok(());
    }
    let kind = if code == gl::OUT_OF_MEMORY { ErrorKind::Allocation } else { kind };
    Err(BackendError::new(kind, code, operation, gl::error_name(code)))
}

/// Wrap a native status value that is not the expected one
#[track_caller]
pub fn status(kind: ErrorKind, operation: &'static str, status: NativeEnum) -> BackendError {
    BackendError::new(kind, status, operation, gl::status_name(status))
}
