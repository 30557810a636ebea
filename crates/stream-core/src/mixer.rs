//! Seam between streams and conference mixers
//!
//! A stream taking part in a local conference connects its endpoint to the
//! mixer of its media type once running and disconnects it before its
//! pipeline is stopped. Mixers are reached through [`MixerProvider`]; a
//! provider returning a mixer of the wrong kind is logged and treated as
//! "no mixer".

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::engine::PipelineId;
use crate::types::{MediaType, StreamKey, VideoContent};

/// Media endpoint a stream exposes to a mixer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaEndpoint {
    pub stream: StreamKey,
    pub pipeline: PipelineId,
    pub content: VideoContent,
    pub label: String,
}

/// Audio side of a mixer
pub trait AudioMixerPort: Send + Sync {
    /// Returns false when the mixer refused the endpoint
    fn connect_endpoint(&self, endpoint: MediaEndpoint, muted: bool) -> bool;
    fn disconnect_endpoint(&self, endpoint: &MediaEndpoint);
}

/// Video side of a mixer
pub trait VideoMixerPort: Send + Sync {
    /// Returns false when the mixer refused the endpoint
    fn connect_endpoint(&self, endpoint: MediaEndpoint, thumbnail: bool) -> bool;
    fn disconnect_endpoint(&self, endpoint: &MediaEndpoint);
}

/// A mixer of one media type
pub trait StreamMixer: Send + Sync {
    fn media_type(&self) -> MediaType;

    fn as_audio(&self) -> Option<&dyn AudioMixerPort> {
        None
    }

    fn as_video(&self) -> Option<&dyn VideoMixerPort> {
        None
    }
}

/// Gives the mixers of a conference to its participants' streams
pub trait MixerProvider: Send + Sync {
    fn mixer_for(&self, media_type: MediaType) -> Option<Arc<dyn StreamMixer>>;
}

/// Mixer for `media_type`, only if it offers the matching port
pub fn checked_mixer(
    provider: Option<&Arc<dyn MixerProvider>>,
    media_type: MediaType,
    stream: StreamKey,
) -> Option<Arc<dyn StreamMixer>> {
    let mixer = provider?.mixer_for(media_type)?;
    let usable = match media_type {
        MediaType::Audio => mixer.as_audio().is_some(),
        MediaType::Video => mixer.as_video().is_some(),
        MediaType::Text => false,
    };
    if !usable {
        error!("Stream {} does not have a mixer it is able to interface with.", stream);
        return None;
    }
    Some(mixer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CallId;

    struct AudioOnly;

    impl AudioMixerPort for AudioOnly {
        fn connect_endpoint(&self, _endpoint: MediaEndpoint, _muted: bool) -> bool {
            true
        }
        fn disconnect_endpoint(&self, _endpoint: &MediaEndpoint) {}
    }

    impl StreamMixer for AudioOnly {
        fn media_type(&self) -> MediaType {
            MediaType::Audio
        }

        fn as_audio(&self) -> Option<&dyn AudioMixerPort> {
            Some(self)
        }
    }

    struct WrongProvider;

    impl MixerProvider for WrongProvider {
        fn mixer_for(&self, _media_type: MediaType) -> Option<Arc<dyn StreamMixer>> {
            Some(Arc::new(AudioOnly))
        }
    }

    #[test]
    fn mismatched_mixer_is_rejected() {
        let provider: Arc<dyn MixerProvider> = Arc::new(WrongProvider);
        let key = StreamKey { call: CallId::new(), index: 1 };
        assert!(checked_mixer(Some(&provider), MediaType::Video, key).is_none());
        assert!(checked_mixer(Some(&provider), MediaType::Audio, key).is_some());
        assert!(checked_mixer(None, MediaType::Audio, key).is_none());
    }
}
