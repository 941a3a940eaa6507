//! Resource ownership, pipeline state and command recording for a
//! C-callable graphics backend.
//!
//! The [`backend`] layer wraps every native object in an owning handle and
//! checks the driver's error flag after every call it makes. [`driver`] holds
//! the native API seam and the in-memory [`driver::SoftwareDriver`]; [`ffi`]
//! exposes the whole layer to C hosts as a function table.

pub mod backend;
pub mod config;
pub mod driver;
pub mod error;
pub mod ffi;

pub use error::{BackendError, BackendResult, ErrorKind};
