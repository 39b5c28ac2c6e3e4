// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the bridge transport.

use bridge_hal::MapError;

/// Result alias for bridge operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors produced by the bridge transport.
///
/// `Config` and `InsufficientMemory` are fatal at image load. The
/// protocol-level variants are only returned synchronously to client calls;
/// the same conditions met in interrupt or deferred context are logged and
/// surfaced through a failed completion instead.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Bad or overlapping symbols, or an invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
    /// The reserved window cannot hold the regions the image asks for.
    #[error("shared window too small: need {required:#x} bytes, have {available:#x}")]
    InsufficientMemory { required: usize, available: usize },
    /// A symbol the transport depends on is missing from the image.
    #[error("symbol {0} not found in coprocessor image")]
    Symbol(String),
    /// The coprocessor wrote something the protocol does not allow.
    #[error("protocol corruption: {0}")]
    ProtocolCorruption(String),
    /// A bounded pool or slot is exhausted.
    #[error("resource exhausted: {0}")]
    ResourceExhaustion(&'static str),
    /// The coprocessor was reset while the request was outstanding.
    #[error("connection to coprocessor lost")]
    ConnectionLost,
    #[error("channel {0} out of range")]
    InvalidChannel(u32),
    /// Operation not allowed in the channel's current state.
    #[error("channel not in a state that allows this operation")]
    InvalidState,
    #[error("request direction does not match channel direction")]
    WrongDirection,
    #[error("buffer larger than the shared slot")]
    BufferTooLarge,
    #[error("no message queue registered for destination {0}")]
    NoSuchDestination(u32),
    #[error("destination {0} already registered")]
    DuplicateDestination(u32),
    /// Non-blocking call found nothing to take or no frame to fill.
    #[error("operation would block")]
    WouldBlock,
    #[error("timed out")]
    Timeout,
    #[error("coprocessor MMU mapping failed: {0}")]
    Map(MapError),
}

impl From<MapError> for Error {
    fn from(err: MapError) -> Self {
        Self::Map(err)
    }
}
