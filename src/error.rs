//! Error types shared across the acquisition, buffering and storage layers.
//!
//! Local, recoverable conditions (a bad channel id, a non-positive capacity) are
//! reported with [`BufferError`] and never escalate. Device and transport failures
//! are fatal to the producer that hit them and are reported with [`DeviceError`].
//! [`StorageError`] covers the persistence gateway.

use crate::core::ChannelId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BufferError {
    #[error("invalid channel {0}")]
    InvalidChannel(ChannelId),

    #[error("invalid buffer capacity {0}")]
    InvalidCapacity(usize),
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("failed to open context '{uri}': {reason}")]
    ContextUnavailable { uri: String, reason: String },

    #[error("device '{0}' not found")]
    DeviceNotFound(String),

    #[error("failed to create buffer on '{device}': {reason}")]
    BufferCreation { device: String, reason: String },

    #[error("{device} refill failed: {reason}")]
    RefillFailed { device: String, reason: String },

    #[error("invalid acquisition configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("task {0} not found")]
    TaskNotFound(i64),

    #[error("invalid channel {0}")]
    InvalidChannel(ChannelId),

    #[error("sample {index} has a non-finite value")]
    InvalidSample { index: usize },

    #[error("nothing to export")]
    NothingToExport,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
