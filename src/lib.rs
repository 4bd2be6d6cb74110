//! Volume attach and image transfer
//!
//! This crate attaches block-storage volumes to the local host over iSCSI,
//! copies image data through the attachment, and guarantees that every
//! successful attach is matched by a detach, whatever happens in between.

pub mod attach;
pub mod backend;
pub mod config;
pub mod connector;
pub mod executor;
pub mod properties;
pub mod transfer;
pub mod volume;
pub mod volume_utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use attach::{AttachError, AttachmentSession};
pub use config::Config;
pub use executor::{ExecutionError, Executor};
pub use properties::{ConnectionProperties, ConnectionPropertyError};
pub use transfer::{ImageTransferOrchestrator, TransferError};
pub use volume::Volume;
