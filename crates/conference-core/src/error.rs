//! Error types for conferences and mixers

use rvoip_stream_core::{CallId, StreamError};
use thiserror::Error;

use crate::types::{ConferenceState, ParticipantAddress};

/// Result type for conference operations
pub type Result<T> = std::result::Result<T, ConferenceError>;

/// Errors raised by conference membership, mixing and scheduling
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConferenceError {
    /// The conference state machine refused a transition
    #[error("Invalid conference state transition from {from} to {to}")]
    InvalidStateTransition {
        from: ConferenceState,
        to: ConferenceState,
    },

    #[error("Participant {0} not found")]
    ParticipantNotFound(ParticipantAddress),

    #[error("No participant device for call {0}")]
    DeviceNotFound(CallId),

    #[error("Participant {0} is already in the conference")]
    AlreadyParticipant(ParticipantAddress),

    /// The call is already attached to a conference
    #[error("Call {0} already belongs to a conference")]
    CallAlreadyAttached(CallId),

    #[error("Conference is full ({max} participants)")]
    ConferenceFull { max: usize },

    #[error("Conference focus is not ready")]
    FocusNotReady,

    /// Operation on a conference that is being or has been terminated
    #[error("Conference is terminated")]
    Terminated,

    #[error("Local participant is already in the conference")]
    AlreadyIn,

    #[error("Recording error: {0}")]
    Recording(String),

    /// Failure reported by the signalling collaborator
    #[error("Signalling error: {0}")]
    Signaling(String),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<infra_common::Error> for ConferenceError {
    fn from(err: infra_common::Error) -> Self {
        ConferenceError::Config(err.to_string())
    }
}
