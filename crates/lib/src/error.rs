//! Error types for authorization checks and transport delivery.
//!
//! Neither error ever reaches a subscriber: authorization errors collapse to a denial
//! and transport errors are collected into a [`crate::broadcast::PublishReport`].

use std::time::Duration;
use thiserror::Error;

/// An authorization check could not produce an answer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorizationError {
    /// The backing authorization source is unreachable or broken.
    #[error("authorization source unavailable: {0}")]
    Unavailable(String),

    /// The identity could not be interpreted by the authorization source.
    #[error("invalid identity: {0:?}")]
    InvalidIdentity(String),
}

/// Delivery of one frame to one channel failed.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport did not accept the frame in time.
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    /// The frame could not be serialized.
    #[error("encoding frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// The transport is shut down and accepts no more frames.
    #[error("transport closed")]
    Closed,

    /// Any other transport-specific failure.
    #[error("{0}")]
    Other(String),
}
