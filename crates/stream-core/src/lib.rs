//! Per-call media stream orchestration.
//!
//! This crate drives the audio and video streams of a call from the outcome of
//! SDP offer/answer: it decides when a stream (re)starts, which source feeds a
//! video stream, which native window it renders into, how screen sharing is
//! switched between the main and thumbnail streams, how ZRTP and SRTP keys
//! survive restarts, and which quality alerts are raised while media flows.
//!
//! The signalling layer owns one [`StreamsGroup`] per call and calls
//! [`StreamsGroup::render`] with an [`OfferAnswerContext`] per stream. The
//! media engine posts [`MediaEvent`]s to the group inbox; alerts come out of
//! [`StreamsGroup::take_alert_events`].

// Error handling
pub mod error;

// Shared types and configuration
pub mod clock;
pub mod config;
pub mod types;

// Negotiation inputs and transport
pub mod offer_answer;
pub mod security;
pub mod transport;

// Media engine model and process-wide state
pub mod engine;
pub mod events;
pub mod media_core;
pub mod registry;

// Streams
pub mod group;
pub mod mixer;
pub mod screen_sharing;
pub mod session;
pub mod stats;
pub mod stream;
pub mod video_source;
pub mod window;

// Quality alerts
pub mod alert;

pub use alert::{Alert, AlertConfig, AlertEvent, AlertInformations, AlertType};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StreamConfig;
pub use engine::{AudioPipeline, PipelineId, VideoPipeline};
pub use error::{Result, StreamError};
pub use events::{EngineEventSender, MediaEvent};
pub use group::StreamsGroup;
pub use media_core::MediaCore;
pub use mixer::{AudioMixerPort, MediaEndpoint, MixerProvider, StreamMixer, VideoMixerPort};
pub use offer_answer::{OfferAnswerContext, PayloadType, StreamDescription};
pub use registry::{CallRegistration, CallRegistry};
pub use screen_sharing::ScreenSharingService;
pub use security::{MediaEncryption, SecuritySessions, ZrtpContext};
pub use session::{DeviceInfo, ParticipantResolver, SessionListener, SessionMediaState};
pub use stream::{
    AudioControl, AudioStream, RenderOutcome, StopReason, Stream, VideoControl, VideoStream,
};
pub use types::{
    CallId, CallState, CameraId, MediaType, StreamDirection, StreamIndex, StreamKey, StreamState,
    VideoContent, VideoSize, WindowId,
};
pub use video_source::{ScreenSharingDescriptor, ScreenSharingKind, VideoSourceDescriptor};

/// Volume reported when no measure is available, in dBm0
pub const VOLUME_UNKNOWN_DBM0: f32 = -96.0;

/// Re-export of common types and functions
pub mod prelude {
    pub use super::{
        AudioControl, AudioStream, CallId, CallState, MediaCore, MediaEvent, MediaType,
        OfferAnswerContext, PayloadType, RenderOutcome, Result, Stream, StreamConfig,
        StreamDescription, StreamDirection, StreamError, StreamsGroup, VideoControl, VideoStream,
    };
}
