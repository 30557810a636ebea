//! Conference mixed on this side

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use rvoip_stream_core::{CallId, MediaType, StreamsGroup};
use tracing::{debug, info, warn};

use super::{negotiated_media, unknown_volume, Conference, ConferenceCore, ConferenceLink};
use crate::config::{ConferenceConfig, VideoLayout};
use crate::error::{ConferenceError, Result};
use crate::mixer::{EndpointId, MixOutput, MixerParticipant, MixerSession};
use crate::participant::{Participant, ParticipantDevice};
use crate::types::{ConferenceState, DeviceState, ParticipantAddress};

/// Conference hosted and mixed on this side
///
/// Each participant reaches the conference through its own call; the local
/// user takes part through the local endpoint of the mixers.
pub struct LocalConference {
    core: Arc<ConferenceCore>,
    mixers: Arc<MixerSession>,
    links: DashMap<CallId, Arc<ConferenceLink>>,
}

impl LocalConference {
    /// Create the conference, entering it when the local user takes part
    pub fn new(me: ParticipantAddress, config: ConferenceConfig) -> Self {
        let mixers = Arc::new(MixerSession::new(config.mixer.clone()));
        let enter = config.local_participant_enabled;
        let conference = Self {
            core: Arc::new(ConferenceCore::new(me, config)),
            mixers,
            links: DashMap::new(),
        };
        if let Err(e) = conference.core.set_state(ConferenceState::Created) {
            warn!("Local conference could not be created: {}", e);
        }
        if enter {
            if let Err(e) = conference.enter() {
                warn!("Could not enter local conference {}: {}", conference.core.id(), e);
            }
        }
        conference
    }

    pub fn mixers(&self) -> &Arc<MixerSession> {
        &self.mixers
    }

    pub fn link(&self, call: CallId) -> Option<Arc<ConferenceLink>> {
        self.links.get(&call).map(|link| link.clone())
    }

    pub fn set_layout(&self, layout: VideoLayout) {
        self.mixers.video().set_layout(layout);
    }

    /// Take `call` out of the conference
    ///
    /// The streams are stopped first so that they leave the mixers before
    /// their pipelines go away, then the conference collaborators are removed
    /// from the group.
    pub fn remove_call(&self, call: CallId, group: &mut StreamsGroup) -> Result<()> {
        let (address, _) = self
            .core
            .device_by_call(call)
            .ok_or(ConferenceError::DeviceNotFound(call))?;
        group.stop_all();
        if let Some((_, link)) = self.links.remove(&call) {
            link.detach();
            link.uninstall(group);
        }
        self.remove_participant(&address)
    }

    /// Mute every audio endpoint of a participant
    pub fn set_participant_muted(&self, address: &ParticipantAddress, muted: bool) -> Result<()> {
        let participant = self
            .core
            .find_participant(address)
            .ok_or_else(|| ConferenceError::ParticipantNotFound(address.clone()))?;
        let calls: Vec<CallId> = participant.devices.iter().filter_map(|d| d.call).collect();
        for endpoint in self.mixers.audio().endpoints() {
            if matches!(endpoint.participant(), MixerParticipant::Call(call) if calls.contains(&call)) {
                self.mixers.audio().set_muted(endpoint, muted);
            }
        }
        Ok(())
    }

    /// Run one mixing period and publish speaker changes
    pub fn process_audio(&self) -> MixOutput {
        let output = self.mixers.process();
        if output.speaker_changed {
            let device = output.active_speaker.and_then(|endpoint| match endpoint.participant() {
                MixerParticipant::Local => Some(self.core.me().address),
                MixerParticipant::Call(call) => self.core.device_by_call(call).map(|(_, d)| d.address),
            });
            self.core.set_active_speaker(device);
        }
        output
    }

    fn device_label(group: &StreamsGroup, media_type: MediaType) -> Option<String> {
        negotiated_media(group)
            .into_iter()
            .find(|(media, _, label)| *media == media_type && !label.is_empty())
            .map(|(_, _, label)| label)
    }
}

impl Conference for LocalConference {
    fn core(&self) -> &Arc<ConferenceCore> {
        &self.core
    }

    fn add_participant(&self, call: CallId, address: ParticipantAddress, group: &mut StreamsGroup) -> Result<()> {
        if self.core.state().is_ending() {
            return Err(ConferenceError::Terminated);
        }
        if self.links.contains_key(&call) {
            return Err(ConferenceError::CallAlreadyAttached(call));
        }

        let mut device = ParticipantDevice::new(address.clone(), Some(call));
        device.state = DeviceState::Present;
        for media_type in [MediaType::Audio, MediaType::Video] {
            if let Some(label) = Self::device_label(group, media_type) {
                device.set_label(media_type, label);
            }
        }
        if self.core.is_participant(&address) {
            self.core.add_device(&address, device)?;
        } else {
            let mut participant = Participant::new(address.clone());
            participant.devices.push(device);
            self.core.add_participant(participant)?;
        }

        let link = ConferenceLink::new(call, self.core.clone(), Some(self.mixers.clone()));
        link.install(group);
        self.links.insert(call, link);
        info!("Call {} joined local conference {}", call, self.core.id());
        Ok(())
    }

    fn remove_participant(&self, address: &ParticipantAddress) -> Result<()> {
        let removed = self.core.remove_participant(address)?;
        for call in removed.devices.iter().filter_map(|d| d.call) {
            let dropped = self.mixers.disconnect_call(call);
            if dropped > 0 {
                debug!("{} mixer endpoints of call {} dropped", dropped, call);
            }
            if let Some((_, link)) = self.links.remove(&call) {
                link.detach();
            }
        }
        if removed.is_admin {
            self.core.choose_another_admin_if_none_in_conference();
        }
        self.core.check_if_terminated();
        Ok(())
    }

    fn participant_device_media_changed(&self, call: CallId, group: &StreamsGroup) -> Result<bool> {
        let (_, device) = self
            .core
            .device_by_call(call)
            .ok_or(ConferenceError::DeviceNotFound(call))?;
        let media = negotiated_media(group);
        for (media_type, _, label) in media.iter().filter(|(_, _, label)| !label.is_empty()) {
            self.core.update_device(&device.address, |d| d.set_label(*media_type, label.clone()));
        }
        let directions: Vec<_> = media.into_iter().map(|(m, d, _)| (m, d)).collect();
        self.core.set_device_directions(&device.address, &directions)
    }

    fn participant_device_ssrc_changed(&self, call: CallId, media_type: MediaType, ssrc: u32) -> Result<()> {
        let (_, device) = self
            .core
            .device_by_call(call)
            .ok_or(ConferenceError::DeviceNotFound(call))?;
        self.core.set_device_ssrc(&device.address, media_type, ssrc)
    }

    fn participant_device_volume(&self, device: &ParticipantAddress) -> f32 {
        if self.core.me().address == *device {
            return self.mixers.audio().volume(EndpointId::Local);
        }
        let call = self
            .core
            .participants()
            .iter()
            .flat_map(|p| p.devices.iter())
            .find(|d| d.address == *device)
            .and_then(|d| d.call);
        let endpoint = call.and_then(|call| {
            self.mixers
                .audio()
                .endpoints()
                .into_iter()
                .find(|e| e.participant() == MixerParticipant::Call(call))
        });
        match endpoint {
            Some(endpoint) => self.mixers.audio().volume(endpoint),
            None => unknown_volume(device),
        }
    }

    fn enter(&self) -> Result<()> {
        if self.core.state().is_ending() {
            return Err(ConferenceError::Terminated);
        }
        if self.core.is_in() {
            return Err(ConferenceError::AlreadyIn);
        }
        let label = self.core.me().address.uri().to_string();
        self.mixers
            .add_local_participant(&label, self.core.config().video_enabled)?;
        self.core.set_in(true);
        self.core.set_me_admin(true);
        info!("Entered local conference {}", self.core.id());
        Ok(())
    }

    fn leave(&self) {
        if !self.core.is_in() {
            debug!("Not in local conference {}, nothing to leave", self.core.id());
            return;
        }
        self.mixers.remove_local_participant();
        self.core.set_in(false);
        self.core.set_me_admin(false);
        self.core.choose_another_admin_if_none_in_conference();
        info!("Left local conference {}", self.core.id());
    }

    fn is_in(&self) -> bool {
        self.core.is_in()
    }

    fn start_recording(&self, path: &Path) -> Result<()> {
        self.mixers.audio().start_recording(path)
    }

    fn stop_recording(&self) -> Result<()> {
        self.mixers.audio().stop_recording().map(|_| ())
    }

    fn is_recording(&self) -> bool {
        self.mixers.audio().is_recording()
    }

    fn terminate(&self) {
        if let Err(e) = self.core.set_state(ConferenceState::TerminationPending) {
            warn!("Cannot terminate local conference {}: {}", self.core.id(), e);
            return;
        }
        if self.is_recording() {
            let _ = self.stop_recording();
        }
        for participant in self.core.take_participants() {
            for call in participant.devices.iter().filter_map(|d| d.call) {
                self.mixers.disconnect_call(call);
            }
        }
        for link in self.links.iter() {
            link.detach();
        }
        self.links.clear();
        self.leave();
        self.core.check_if_terminated();
    }
}

impl std::fmt::Debug for LocalConference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalConference")
            .field("core", &self.core)
            .field("mixers", &self.mixers)
            .field("calls", &self.links.len())
            .finish()
    }
}
