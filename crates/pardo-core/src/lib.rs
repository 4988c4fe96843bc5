//! Shared core abstractions for pardo.
//!
//! This crate defines the signature model for user-supplied element-processing functions and the
//! contracts shared by runners and engines: windowed values, output tags, the `DoFn` trait and its
//! invocation contexts, restriction trackers, and the opaque external collaborators (side inputs,
//! metrics, step context).
//!
//! # API notes
//! `pardo-core` is an internal crate (`publish = false`). Its public API uses a few third-party
//! types (`chrono::DateTime<Utc>`, `serde_json::Value`) as part of the runner contract.

use std::fmt;

pub mod analyzer;
pub mod context;
pub mod declaration;
pub mod definition;
pub mod dofn;
pub mod method;
pub mod output;
pub mod parameter;
pub mod registry;
pub mod restriction;
pub mod signature;
pub mod window;

pub use analyzer::{SignatureAnalyzer, SignatureErrorKind, SignatureValidationError};
pub use dofn::DoFn;
pub use output::{OutputProtocolError, OutputTag};
pub use parameter::Parameter;
pub use registry::SignatureRegistry;
pub use signature::{Boundedness, Signature};
pub use window::{BoundedWindow, WindowedValue};

pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by user-function hooks and collaborator seams.
#[derive(Debug)]
pub struct Error {
    inner: anyhow::Error,
}

impl Error {
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            inner: anyhow::anyhow!(message.into()),
        }
    }

    pub fn context(self, context: impl Into<String>) -> Self {
        Self {
            inner: self.inner.context(context.into()),
        }
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `{:#}` keeps anyhow's context chain on one line.
        write!(f, "{:#}", self.inner)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Self { inner: value }
    }
}

impl From<OutputProtocolError> for Error {
    fn from(value: OutputProtocolError) -> Self {
        Self {
            inner: anyhow::Error::from(value),
        }
    }
}

impl From<SignatureValidationError> for Error {
    fn from(value: SignatureValidationError) -> Self {
        Self {
            inner: anyhow::Error::from(value),
        }
    }
}
