//! Error types for the stream layer
//!
//! Render, stop and finish never fail: they log and report through their
//! return values. The helpers below (source switching, port allocation,
//! ZRTP hash checks, snapshots) return [`Result`] so their callers decide
//! how loud to be.

use thiserror::Error;

use crate::types::{MediaType, StreamIndex};

/// Result type for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors raised by the stream layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// No payload type of the answer is usable
    #[error("No payload types accepted for {0} stream")]
    NoPayloadType(MediaType),

    /// The negotiated direction leaves nothing to send or receive
    #[error("{0} stream is inactive")]
    Inactive(MediaType),

    /// The offer/answer context has no result description for this stream
    #[error("Missing negotiated description for stream {0}")]
    MissingDescription(StreamIndex),

    /// The underlying media pipeline was already destroyed
    #[error("Stream {0} has no media pipeline")]
    NoPipeline(StreamIndex),

    /// Camera lookup failed
    #[error("Could not find camera id \"{0}\"")]
    CameraNotFound(String),

    /// Static image reader could not be created
    #[error("Could not create image source for {0}")]
    ImageSource(String),

    /// Another call's video could not be used as source
    #[error("Video source unavailable: {0}")]
    SourceUnavailable(String),

    /// Unknown video source kind
    #[error("Cannot change video source with an unknown video source type")]
    UnknownSource,

    /// No ZRTP context is attached
    #[error("ZRTP context is missing on stream {0}")]
    ZrtpContextMissing(StreamIndex),

    /// Peer hello hash differs from the one already recorded
    #[error("ZRTP hello hash mismatch: expected {expected}, got {received}")]
    ZrtpHashMismatch { expected: String, received: String },

    /// A mixer of the wrong media type was provided
    #[error("Stream {0} does not have a mixer it is able to interface with")]
    MixerMismatch(StreamIndex),

    /// Port range exhausted
    #[error("No free port pair in range {min}-{max}")]
    PortsExhausted { min: u16, max: u16 },

    /// Stream lookup failed
    #[error("Stream {0} not found")]
    StreamNotFound(StreamIndex),

    /// No stream implementation for this media type
    #[error("{0} streams are not supported")]
    Unsupported(MediaType),

    /// Output needed for the operation is not active
    #[error("Video output is not active")]
    OutputInactive,

    /// Configuration layer error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<infra_common::Error> for StreamError {
    fn from(err: infra_common::Error) -> Self {
        StreamError::Config(err.to_string())
    }
}
