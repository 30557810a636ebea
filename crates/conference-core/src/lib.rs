//! Conferences on top of per-call media streams.
//!
//! A [`LocalConference`] mixes the calls attached to it in a [`MixerSession`]
//! (N−1 audio mix, mosaic or active-speaker video composition) and lets the
//! local user take part through the mixer's local endpoint. A
//! [`RemoteConference`] is hosted by a focus: calls are transferred to it and
//! the participant list follows its notifications. Both plug into the
//! [`StreamsGroup`](rvoip_stream_core::StreamsGroup) of each call through a
//! [`ConferenceLink`], which answers the participant lookups made while the
//! streams render.
//!
//! [`ConferenceScheduler`] creates or updates conferences on a conference
//! server, and [`ConferenceFactory`] builds all of the above from the shared
//! configuration store.

// Error handling
pub mod error;

// Configuration and identifiers
pub mod config;
pub mod types;

// Members and notifications
pub mod event;
pub mod participant;

// Media mixing
pub mod mixer;

// Conferences
pub mod conference;
pub mod factory;
pub mod registry;
pub mod scheduler;

pub use conference::{Conference, ConferenceCore, ConferenceLink, FocusSignaling, LocalConference, RemoteConference};
pub use config::{ConferenceConfig, MixerConfig, VideoLayout};
pub use error::{ConferenceError, Result};
pub use event::{ConferenceEvent, EventBus};
pub use factory::ConferenceFactory;
pub use mixer::{AudioMixer, CompositionCell, EndpointId, MixOutput, MixerParticipant, MixerSession, VideoMixer};
pub use participant::{Participant, ParticipantDevice};
pub use registry::ConferenceRegistry;
pub use scheduler::{
    ConferenceInfo, ConferenceScheduler, JoinRequest, SchedulerEvent, SchedulerSignaling, SchedulerState,
};
pub use types::{ConferenceId, ConferenceState, DeviceState, ParticipantAddress};

/// Re-export of common types and functions
pub mod prelude {
    pub use super::{
        Conference, ConferenceConfig, ConferenceError, ConferenceEvent, ConferenceFactory, ConferenceId,
        ConferenceRegistry, ConferenceState, LocalConference, MixerSession, ParticipantAddress, RemoteConference,
        Result,
    };
}
