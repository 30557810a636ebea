//! Conference mixers
//!
//! A [`MixerSession`] owns the audio and video mixers of one local
//! conference and hands them to participant streams through
//! [`MixerProvider`]. Streams connect their endpoints once running and
//! disconnect them before stopping; the local user joins through a local
//! endpoint that has no stream behind it.

mod audio;
mod video;

pub use audio::{AudioMixer, MixOutput, MixedFrame, Recording};
pub use video::{CompositionCell, VideoMixer};

use std::sync::Arc;

use rvoip_stream_core::{CallId, MediaType, MixerProvider, StreamKey, StreamMixer};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::MixerConfig;
use crate::error::Result;

/// Endpoint of a mixer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointId {
    /// The local user's sound card or camera
    Local,
    Stream(StreamKey),
}

impl EndpointId {
    pub fn participant(&self) -> MixerParticipant {
        match self {
            EndpointId::Local => MixerParticipant::Local,
            EndpointId::Stream(key) => MixerParticipant::Call(key.call),
        }
    }
}

/// Whom an endpoint belongs to: the local user or the remote end of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MixerParticipant {
    Local,
    Call(CallId),
}

/// Audio and video mixers of a local conference
pub struct MixerSession {
    audio: Arc<AudioMixer>,
    video: Arc<VideoMixer>,
}

impl MixerSession {
    pub fn new(config: MixerConfig) -> Self {
        Self {
            audio: Arc::new(AudioMixer::new(config.clone())),
            video: Arc::new(VideoMixer::new(config)),
        }
    }

    pub fn audio(&self) -> &Arc<AudioMixer> {
        &self.audio
    }

    pub fn video(&self) -> &Arc<VideoMixer> {
        &self.video
    }

    /// Plug the local user into the mixers
    pub fn add_local_participant(&self, label: &str, with_video: bool) -> Result<()> {
        self.audio.add_local_endpoint()?;
        if with_video {
            self.video.add_local_endpoint(label);
        }
        info!("Local participant joined the mixers (video: {})", with_video);
        Ok(())
    }

    pub fn remove_local_participant(&self) {
        let audio = self.audio.remove_local_endpoint();
        let video = self.video.remove_local_endpoint();
        debug!("Local participant left the mixers (audio: {}, video: {})", audio, video);
    }

    /// Drop every endpoint fed by `call`
    pub fn disconnect_call(&self, call: CallId) -> usize {
        self.audio.disconnect_call(call) + self.video.disconnect_call(call)
    }

    /// Run one audio mixing period and move the video focus to the speaker
    pub fn process(&self) -> MixOutput {
        let output = self.audio.mix();
        if output.speaker_changed {
            self.video
                .set_focus(output.active_speaker.map(|endpoint| endpoint.participant()));
        }
        output
    }
}

impl MixerProvider for MixerSession {
    fn mixer_for(&self, media_type: MediaType) -> Option<Arc<dyn StreamMixer>> {
        match media_type {
            MediaType::Audio => Some(self.audio.clone() as Arc<dyn StreamMixer>),
            MediaType::Video => Some(self.video.clone() as Arc<dyn StreamMixer>),
            MediaType::Text => None,
        }
    }
}

impl std::fmt::Debug for MixerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerSession")
            .field("audio_endpoints", &self.audio.endpoint_count())
            .field("video_endpoints", &self.video.endpoint_count())
            .finish()
    }
}
