//! Volume attach/detach
//!
//! An [`AttachmentSession`] brackets a device-level operation: it asks the
//! backend to export the volume, has a device connector turn the export into a
//! local block device, and undoes both in reverse order on close.

pub mod session;

use crate::executor::ExecutionError;
use crate::properties::ConnectionPropertyError;
use std::path::PathBuf;
use thiserror::Error;

pub use session::{AttachmentSession, SessionState};

/// Attach/detach errors
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("command failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("connection properties: {0}")]
    ConnectionProperty(#[from] ConnectionPropertyError),

    #[error("device {} is unavailable: {reason}", .path.display())]
    DeviceUnavailable { path: PathBuf, reason: String },

    #[error("not implemented: {0}")]
    Unsupported(String),

    #[error("invalid connector: {0}")]
    InvalidConnector(String),

    #[error("session is {0:?}, expected Idle")]
    SessionReused(SessionState),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AttachError {
    pub fn unsupported(operation: impl Into<String>) -> Self {
        AttachError::Unsupported(operation.into())
    }
}

/// Result type for attach operations
pub type AttachResult<T> = Result<T, AttachError>;
