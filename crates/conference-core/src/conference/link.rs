use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rvoip_stream_core::{
    CallId, DeviceInfo, MediaType, MixerProvider, ParticipantResolver, StreamIndex, StreamMixer, StreamsGroup,
    WindowId,
};
use tracing::debug;

use super::ConferenceCore;
use crate::mixer::MixerSession;

/// Attachment of one call to a conference
///
/// Installed in the call's [`StreamsGroup`], it answers the participant
/// lookups made while rendering and, for local conferences, hands the mixers
/// to the streams. A detached link answers as if there were no conference so
/// that the next render takes the streams out of the mixers.
pub struct ConferenceLink {
    call: CallId,
    core: Arc<ConferenceCore>,
    mixers: Option<Arc<MixerSession>>,
    attached: AtomicBool,
    thumbnail_index: RwLock<Option<StreamIndex>>,
}

impl ConferenceLink {
    pub fn new(call: CallId, core: Arc<ConferenceCore>, mixers: Option<Arc<MixerSession>>) -> Arc<Self> {
        Arc::new(Self {
            call,
            core,
            mixers,
            attached: AtomicBool::new(true),
            thumbnail_index: RwLock::new(None),
        })
    }

    pub fn call(&self) -> CallId {
        self.call
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub fn detach(&self) {
        if self.attached.swap(false, Ordering::AcqRel) {
            debug!("Call {} detached from conference {}", self.call, self.core.id());
        }
    }

    pub fn set_thumbnail_stream_index(&self, index: Option<StreamIndex>) {
        *self.thumbnail_index.write() = index;
    }

    /// Plug the link into the group of its call
    pub fn install(self: &Arc<Self>, group: &mut StreamsGroup) {
        group.set_resolver(Some(self.clone() as Arc<dyn ParticipantResolver>));
        if self.mixers.is_some() {
            group.set_mixer_provider(Some(self.clone() as Arc<dyn MixerProvider>));
        }
    }

    pub fn uninstall(&self, group: &mut StreamsGroup) {
        group.set_resolver(None);
        group.set_mixer_provider(None);
    }
}

impl ParticipantResolver for ConferenceLink {
    fn in_conference(&self) -> bool {
        self.is_attached()
    }

    fn participant_device(&self, media_type: MediaType, label: &str) -> Option<DeviceInfo> {
        if !self.is_attached() {
            return None;
        }
        self.core
            .device_by_label(media_type, label)
            .map(|device| device.info(media_type))
    }

    fn me_device(&self, media_type: MediaType, label: &str) -> Option<DeviceInfo> {
        if !self.is_attached() {
            return None;
        }
        self.core
            .me_device_by_label(media_type, label)
            .map(|device| device.info(media_type))
    }

    fn conference_screen_sharing(&self) -> bool {
        self.is_attached() && self.core.any_screen_sharing()
    }

    fn participant_window_id(&self, label: &str) -> Option<WindowId> {
        self.core
            .device_by_label(MediaType::Video, label)
            .or_else(|| self.core.me_device_by_label(MediaType::Video, label))
            .and_then(|device| device.window_id)
    }

    fn thumbnail_stream_index(&self) -> Option<StreamIndex> {
        *self.thumbnail_index.read()
    }

    fn notify_displayed_speaker(&self, csrc: u32) {
        self.core.set_displayed_speaker_by_ssrc(csrc);
    }

    fn video_display_error(&self, label: &str, error_code: i32) {
        self.core.report_video_display_error(label, error_code);
    }
}

impl MixerProvider for ConferenceLink {
    fn mixer_for(&self, media_type: MediaType) -> Option<Arc<dyn StreamMixer>> {
        if !self.is_attached() {
            return None;
        }
        self.mixers.as_ref()?.mixer_for(media_type)
    }
}

impl std::fmt::Debug for ConferenceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConferenceLink")
            .field("call", &self.call)
            .field("conference", &self.core.id())
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConferenceConfig, MixerConfig};
    use crate::participant::{Participant, ParticipantDevice};

    #[test]
    fn detached_link_hides_conference() {
        let core = Arc::new(ConferenceCore::new("sip:me@example.org".into(), ConferenceConfig::default()));
        let call = CallId::new();
        let mut alice = Participant::new("sip:alice@example.org".into());
        let mut device = ParticipantDevice::new("sip:alice@example.org".into(), Some(call));
        device.set_label(MediaType::Video, "alice-v");
        device.window_id = Some(WindowId(12));
        alice.devices.push(device);
        core.add_participant(alice).unwrap();

        let link = ConferenceLink::new(call, core, Some(Arc::new(MixerSession::new(MixerConfig::default()))));
        assert!(link.in_conference());
        assert_eq!(link.participant_window_id("alice-v"), Some(WindowId(12)));
        assert_eq!(
            link.participant_device(MediaType::Video, "alice-v").map(|d| d.label),
            Some("alice-v".to_string())
        );
        assert!(link.mixer_for(MediaType::Audio).is_some());

        link.detach();
        assert!(!link.in_conference());
        assert!(link.participant_device(MediaType::Video, "alice-v").is_none());
        assert!(link.mixer_for(MediaType::Audio).is_none());
    }
}
