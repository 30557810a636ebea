//! Conferences
//!
//! [`ConferenceCore`] holds what local and remote conferences share: the
//! state machine, the participant directory, the subject and the event bus.
//! [`LocalConference`] mixes its participants itself; [`RemoteConference`]
//! is a client of a conference focus reached through signalling.

mod link;
mod local;
mod remote;

pub use link::ConferenceLink;
pub use local::LocalConference;
pub use remote::{FocusSignaling, RemoteConference};

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use rvoip_stream_core::{
    CallId, CallState, MediaType, Stream, StreamDirection, StreamsGroup, VOLUME_UNKNOWN_DBM0,
};
use tracing::{debug, info, warn};

use crate::config::ConferenceConfig;
use crate::error::{ConferenceError, Result};
use crate::event::{ConferenceEvent, EventBus};
use crate::participant::{Participant, ParticipantDevice};
use crate::types::{ConferenceId, ConferenceState, DeviceState, ParticipantAddress};

/// Called on every state change
pub type StateCallback = Box<dyn Fn(ConferenceId, ConferenceState) + Send + Sync>;

#[derive(Debug)]
struct Directory {
    participants: Vec<Participant>,
    me: Participant,
    is_in: bool,
    active_speaker: Option<ParticipantAddress>,
}

/// State shared by every kind of conference
pub struct ConferenceCore {
    id: ConferenceId,
    config: ConferenceConfig,
    state: RwLock<ConferenceState>,
    subject: RwLock<String>,
    directory: RwLock<Directory>,
    events: EventBus,
    state_callback: RwLock<Option<StateCallback>>,
}

impl ConferenceCore {
    pub fn new(me: ParticipantAddress, config: ConferenceConfig) -> Self {
        let subject = config.subject.clone();
        Self {
            id: ConferenceId::new(),
            config,
            state: RwLock::new(ConferenceState::Instantiated),
            subject: RwLock::new(subject),
            directory: RwLock::new(Directory {
                participants: Vec::new(),
                me: Participant::new(me),
                is_in: false,
                active_speaker: None,
            }),
            events: EventBus::new(),
            state_callback: RwLock::new(None),
        }
    }

    pub fn id(&self) -> ConferenceId {
        self.id
    }

    pub fn config(&self) -> &ConferenceConfig {
        &self.config
    }

    pub fn state(&self) -> ConferenceState {
        *self.state.read()
    }

    /// Move the state machine, notifying the callback and subscribers
    pub fn set_state(&self, next: ConferenceState) -> Result<()> {
        {
            let mut state = self.state.write();
            if !state.can_transition_to(next) {
                return Err(ConferenceError::InvalidStateTransition { from: *state, to: next });
            }
            info!("Conference {} moving from {} to {}", self.id, *state, next);
            *state = next;
        }
        if let Some(callback) = self.state_callback.read().as_ref() {
            callback(self.id, next);
        }
        self.events.publish(ConferenceEvent::StateChanged {
            conference: self.id,
            state: next,
        });
        Ok(())
    }

    pub fn set_state_callback(&self, callback: Option<StateCallback>) {
        *self.state_callback.write() = callback;
    }

    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<ConferenceEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: ConferenceEvent) {
        self.events.publish(event);
    }

    pub fn subject(&self) -> String {
        self.subject.read().clone()
    }

    pub fn set_subject(&self, subject: impl Into<String>) {
        let subject = subject.into();
        {
            let mut current = self.subject.write();
            if *current == subject {
                return;
            }
            current.clone_from(&subject);
        }
        self.publish(ConferenceEvent::SubjectChanged {
            conference: self.id,
            subject,
        });
    }

    pub fn me(&self) -> Participant {
        self.directory.read().me.clone()
    }

    pub fn is_in(&self) -> bool {
        self.directory.read().is_in
    }

    pub(crate) fn set_in(&self, is_in: bool) {
        self.directory.write().is_in = is_in;
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.directory.read().participants.clone()
    }

    pub fn participant_count(&self) -> usize {
        self.directory.read().participants.len()
    }

    pub fn find_participant(&self, address: &ParticipantAddress) -> Option<Participant> {
        self.directory
            .read()
            .participants
            .iter()
            .find(|p| p.address.weak_equal(address))
            .cloned()
    }

    pub fn is_participant(&self, address: &ParticipantAddress) -> bool {
        self.find_participant(address).is_some()
    }

    /// Add a participant and announce it with its devices
    pub fn add_participant(&self, participant: Participant) -> Result<()> {
        if self.state().is_ending() {
            return Err(ConferenceError::Terminated);
        }
        let devices: Vec<ParticipantAddress> =
            participant.devices.iter().map(|d| d.address.clone()).collect();
        let address = participant.address.clone();
        {
            let mut directory = self.directory.write();
            if directory.participants.iter().any(|p| p.address.weak_equal(&address)) {
                return Err(ConferenceError::AlreadyParticipant(address));
            }
            let max = self.config.max_participants;
            if max > 0 && directory.participants.len() >= max {
                return Err(ConferenceError::ConferenceFull { max });
            }
            directory.participants.push(participant);
        }
        info!("Participant {} added to conference {}", address, self.id);
        self.publish(ConferenceEvent::ParticipantAdded {
            conference: self.id,
            participant: address,
        });
        for device in devices {
            self.publish(ConferenceEvent::DeviceAdded {
                conference: self.id,
                device,
            });
        }
        Ok(())
    }

    /// Remove a participant and all its devices
    pub fn remove_participant(&self, address: &ParticipantAddress) -> Result<Participant> {
        let removed = {
            let mut directory = self.directory.write();
            let position = directory
                .participants
                .iter()
                .position(|p| p.address.weak_equal(address))
                .ok_or_else(|| ConferenceError::ParticipantNotFound(address.clone()))?;
            let removed = directory.participants.remove(position);
            if let Some(speaker) = directory.active_speaker.as_ref() {
                if removed.find_device(speaker).is_some() {
                    directory.active_speaker = None;
                }
            }
            removed
        };
        for device in &removed.devices {
            self.publish(ConferenceEvent::DeviceRemoved {
                conference: self.id,
                device: device.address.clone(),
            });
        }
        info!("Participant {} removed from conference {}", removed.address, self.id);
        self.publish(ConferenceEvent::ParticipantRemoved {
            conference: self.id,
            participant: removed.address.clone(),
        });
        Ok(removed)
    }

    /// Add a device to a participant already in the conference
    pub fn add_device(&self, participant: &ParticipantAddress, device: ParticipantDevice) -> Result<()> {
        let address = device.address.clone();
        {
            let mut directory = self.directory.write();
            let owner = directory
                .participants
                .iter_mut()
                .find(|p| p.address.weak_equal(participant))
                .ok_or_else(|| ConferenceError::ParticipantNotFound(participant.clone()))?;
            if owner.find_device(&address).is_some() {
                debug!("Device {} already known", address);
                return Ok(());
            }
            owner.devices.push(device);
        }
        self.publish(ConferenceEvent::DeviceAdded {
            conference: self.id,
            device: address,
        });
        Ok(())
    }

    pub fn remove_device(&self, participant: &ParticipantAddress, device: &ParticipantAddress) -> Result<()> {
        {
            let mut directory = self.directory.write();
            let owner = directory
                .participants
                .iter_mut()
                .find(|p| p.address.weak_equal(participant))
                .ok_or_else(|| ConferenceError::ParticipantNotFound(participant.clone()))?;
            if owner.remove_device(device).is_none() {
                return Err(ConferenceError::ParticipantNotFound(device.clone()));
            }
        }
        self.publish(ConferenceEvent::DeviceRemoved {
            conference: self.id,
            device: device.clone(),
        });
        Ok(())
    }

    /// Participant and device carried by `call`
    pub fn device_by_call(&self, call: CallId) -> Option<(ParticipantAddress, ParticipantDevice)> {
        let directory = self.directory.read();
        directory.participants.iter().find_map(|p| {
            p.device_by_call(call)
                .map(|d| (p.address.clone(), d.clone()))
        })
    }

    /// Remote device using stream `label`
    pub fn device_by_label(&self, media_type: MediaType, label: &str) -> Option<ParticipantDevice> {
        self.directory
            .read()
            .participants
            .iter()
            .find_map(|p| p.device_by_label(media_type, label).cloned())
    }

    /// Local device using stream `label`
    pub fn me_device_by_label(&self, media_type: MediaType, label: &str) -> Option<ParticipantDevice> {
        self.directory.read().me.device_by_label(media_type, label).cloned()
    }

    /// Any device, local ones included, sending `ssrc`
    pub fn device_by_ssrc(&self, media_type: MediaType, ssrc: u32) -> Option<ParticipantDevice> {
        let directory = self.directory.read();
        directory
            .participants
            .iter()
            .chain(std::iter::once(&directory.me))
            .find_map(|p| p.device_by_ssrc(media_type, ssrc).cloned())
    }

    /// Find a device anywhere and update it
    pub(crate) fn update_device<R>(
        &self,
        device: &ParticipantAddress,
        f: impl FnOnce(&mut ParticipantDevice) -> R,
    ) -> Option<R> {
        let mut directory = self.directory.write();
        let directory = &mut *directory;
        directory
            .participants
            .iter_mut()
            .chain(std::iter::once(&mut directory.me))
            .find_map(|p| p.find_device_mut(device))
            .map(f)
    }

    /// Update the local participant, creating its device on first use
    pub(crate) fn update_me_device<R>(&self, call: CallId, f: impl FnOnce(&mut ParticipantDevice) -> R) -> R {
        let mut directory = self.directory.write();
        let me = &mut directory.me;
        let position = match me.devices.iter().position(|d| d.call == Some(call)) {
            Some(position) => position,
            None => {
                let mut device = ParticipantDevice::new(me.address.clone(), Some(call));
                device.state = DeviceState::Present;
                me.devices.push(device);
                me.devices.len() - 1
            }
        };
        f(&mut me.devices[position])
    }

    pub(crate) fn set_me_admin(&self, is_admin: bool) {
        self.directory.write().me.is_admin = is_admin;
    }

    pub fn any_screen_sharing(&self) -> bool {
        let directory = self.directory.read();
        directory.me.is_screen_sharing() || directory.participants.iter().any(|p| p.is_screen_sharing())
    }

    pub fn set_participant_admin_status(&self, address: &ParticipantAddress, is_admin: bool) -> Result<()> {
        let changed = {
            let mut directory = self.directory.write();
            let participant = directory
                .participants
                .iter_mut()
                .find(|p| p.address.weak_equal(address))
                .ok_or_else(|| ConferenceError::ParticipantNotFound(address.clone()))?;
            let changed = participant.is_admin != is_admin;
            participant.is_admin = is_admin;
            changed
        };
        if changed {
            self.publish(ConferenceEvent::AdminStatusChanged {
                conference: self.id,
                participant: address.clone(),
                is_admin,
            });
        }
        Ok(())
    }

    /// Give the admin role to the first participant when nobody has it
    pub fn choose_another_admin_if_none_in_conference(&self) -> Option<ParticipantAddress> {
        let candidate = {
            let directory = self.directory.read();
            if directory.me.is_admin && directory.is_in {
                return None;
            }
            if directory.participants.iter().any(|p| p.is_admin) {
                return None;
            }
            directory.participants.first().map(|p| p.address.clone())?
        };
        info!("Conference {} has no admin left, promoting {}", self.id, candidate);
        self.set_participant_admin_status(&candidate, true).ok()?;
        Some(candidate)
    }

    /// Record the directions negotiated for a device, announcing changes
    pub fn set_device_directions(
        &self,
        device: &ParticipantAddress,
        directions: &[(MediaType, StreamDirection)],
    ) -> Result<bool> {
        let changed = self
            .update_device(device, |d| {
                directions
                    .iter()
                    .fold(false, |changed, (media, direction)| d.set_direction(*media, *direction) | changed)
            })
            .ok_or_else(|| ConferenceError::ParticipantNotFound(device.clone()))?;
        if changed {
            self.publish(ConferenceEvent::DeviceMediaChanged {
                conference: self.id,
                device: device.clone(),
            });
        }
        Ok(changed)
    }

    pub fn set_device_ssrc(&self, device: &ParticipantAddress, media_type: MediaType, ssrc: u32) -> Result<()> {
        let changed = self
            .update_device(device, |d| d.ssrcs.insert(media_type, ssrc) != Some(ssrc))
            .ok_or_else(|| ConferenceError::ParticipantNotFound(device.clone()))?;
        if changed {
            self.publish(ConferenceEvent::DeviceSsrcChanged {
                conference: self.id,
                device: device.clone(),
                media_type,
                ssrc,
            });
        }
        Ok(())
    }

    pub fn set_device_screen_sharing(&self, device: &ParticipantAddress, enabled: bool) -> Result<()> {
        let changed = self
            .update_device(device, |d| std::mem::replace(&mut d.is_screen_sharing, enabled) != enabled)
            .ok_or_else(|| ConferenceError::ParticipantNotFound(device.clone()))?;
        if changed {
            self.publish(ConferenceEvent::ScreenSharingChanged {
                conference: self.id,
                device: device.clone(),
                enabled,
            });
        }
        Ok(())
    }

    pub fn active_speaker(&self) -> Option<ParticipantAddress> {
        self.directory.read().active_speaker.clone()
    }

    pub fn set_active_speaker(&self, device: Option<ParticipantAddress>) {
        {
            let mut directory = self.directory.write();
            if directory.active_speaker == device {
                return;
            }
            directory.active_speaker.clone_from(&device);
        }
        debug!("Active speaker of conference {} is {:?}", self.id, device);
        self.publish(ConferenceEvent::ActiveSpeakerChanged {
            conference: self.id,
            device,
        });
    }

    /// Displayed speaker announced through a contributing source
    pub fn set_displayed_speaker_by_ssrc(&self, csrc: u32) {
        if csrc == 0 {
            self.set_active_speaker(None);
            return;
        }
        let device = self
            .device_by_ssrc(MediaType::Video, csrc)
            .or_else(|| self.device_by_ssrc(MediaType::Audio, csrc));
        match device {
            Some(device) => self.set_active_speaker(Some(device.address)),
            None => warn!("No device of conference {} sends ssrc {}", self.id, csrc),
        }
    }

    pub fn report_video_display_error(&self, label: &str, error_code: i32) {
        let device = self
            .device_by_label(MediaType::Video, label)
            .or_else(|| self.me_device_by_label(MediaType::Video, label));
        match device {
            Some(device) => self.publish(ConferenceEvent::VideoDisplayError {
                conference: self.id,
                device: device.address,
                error_code,
            }),
            None => warn!("Video display error {} on unknown label '{}'", error_code, label),
        }
    }

    /// Finish a pending termination once the last participant is gone
    pub fn check_if_terminated(&self) -> bool {
        if self.state() == ConferenceState::TerminationPending && self.participant_count() == 0 {
            return self.set_state(ConferenceState::Terminated).is_ok();
        }
        false
    }

    pub(crate) fn take_participants(&self) -> Vec<Participant> {
        let addresses: Vec<ParticipantAddress> = self
            .directory
            .read()
            .participants
            .iter()
            .map(|p| p.address.clone())
            .collect();
        addresses
            .iter()
            .filter_map(|address| self.remove_participant(address).ok())
            .collect()
    }
}

impl std::fmt::Debug for ConferenceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConferenceCore")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("directory", &*self.directory.read())
            .finish()
    }
}

/// Operations common to local and remote conferences
pub trait Conference: Send + Sync {
    fn core(&self) -> &Arc<ConferenceCore>;

    fn id(&self) -> ConferenceId {
        self.core().id()
    }

    fn state(&self) -> ConferenceState {
        self.core().state()
    }

    fn participant_count(&self) -> usize {
        self.core().participant_count()
    }

    /// Participants plus the local user when in
    fn size(&self) -> usize {
        self.participant_count() + usize::from(self.is_in())
    }

    /// Bring the remote end of `call` into the conference
    fn add_participant(&self, call: CallId, address: ParticipantAddress, group: &mut StreamsGroup) -> Result<()>;

    fn remove_participant(&self, address: &ParticipantAddress) -> Result<()>;

    /// Re-read the directions negotiated on `call`; returns whether they changed
    fn participant_device_media_changed(&self, call: CallId, group: &StreamsGroup) -> Result<bool>;

    fn participant_device_ssrc_changed(&self, call: CallId, media_type: MediaType, ssrc: u32) -> Result<()>;

    /// Volume of a device in dBm0
    fn participant_device_volume(&self, device: &ParticipantAddress) -> f32;

    fn set_participant_admin_status(&self, address: &ParticipantAddress, is_admin: bool) -> Result<()> {
        self.core().set_participant_admin_status(address, is_admin)
    }

    fn enter(&self) -> Result<()>;

    fn leave(&self);

    fn is_in(&self) -> bool;

    fn start_recording(&self, path: &Path) -> Result<()>;

    fn stop_recording(&self) -> Result<()>;

    fn is_recording(&self) -> bool;

    fn terminate(&self);
}

/// Directions and labels of the main streams of a call
pub(crate) fn negotiated_media(group: &StreamsGroup) -> Vec<(MediaType, StreamDirection, String)> {
    let mut media = Vec::new();
    if let Some(stream) = group
        .main_stream_index(MediaType::Audio)
        .and_then(|index| group.audio_stream(index))
    {
        let direction = match stream.pipeline() {
            Some(pipeline) if pipeline.is_running() => pipeline.direction,
            _ => StreamDirection::Inactive,
        };
        media.push((MediaType::Audio, direction, stream.core().label().to_string()));
    }
    if let Some(stream) = group
        .main_stream_index(MediaType::Video)
        .and_then(|index| group.video_stream(index))
    {
        let direction = match stream.pipeline() {
            Some(pipeline) if pipeline.is_running() => pipeline.direction,
            _ => StreamDirection::Inactive,
        };
        media.push((MediaType::Video, direction, stream.core().label().to_string()));
    }
    media
}

/// Whether a call state leaves the media of a conference call flowing
pub(crate) fn is_media_state(state: CallState) -> bool {
    matches!(state, CallState::StreamsRunning | CallState::Updating | CallState::UpdatedByRemote)
}

pub(crate) fn unknown_volume(device: &ParticipantAddress) -> f32 {
    debug!("No volume measured for device {}", device);
    VOLUME_UNKNOWN_DBM0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn core() -> ConferenceCore {
        ConferenceCore::new("sip:me@example.org".into(), ConferenceConfig::default())
    }

    fn participant(address: &str, call: CallId) -> Participant {
        let mut participant = Participant::new(address.into());
        participant
            .devices
            .push(ParticipantDevice::new(address.into(), Some(call)));
        participant
    }

    #[test]
    fn invalid_transitions_are_refused_without_notifying() {
        let core = core();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        core.set_state_callback(Some(Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        assert!(core.set_state(ConferenceState::Terminated).is_err());
        core.set_state(ConferenceState::Created).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            core.set_state(ConferenceState::Instantiated),
            Err(ConferenceError::InvalidStateTransition {
                from: ConferenceState::Created,
                to: ConferenceState::Instantiated,
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_and_extra_participants_are_refused() {
        let core = ConferenceCore::new(
            "sip:me@example.org".into(),
            ConferenceConfig {
                max_participants: 1,
                ..ConferenceConfig::default()
            },
        );
        core.add_participant(participant("sip:alice@example.org", CallId::new()))
            .unwrap();
        assert!(matches!(
            core.add_participant(participant("sip:ALICE@example.org;transport=tls", CallId::new())),
            Err(ConferenceError::AlreadyParticipant(_))
        ));
        assert_eq!(
            core.add_participant(participant("sip:bob@example.org", CallId::new())),
            Err(ConferenceError::ConferenceFull { max: 1 })
        );
    }

    #[test]
    fn admin_role_moves_to_first_participant() {
        let core = core();
        core.add_participant(participant("sip:alice@example.org", CallId::new()))
            .unwrap();
        core.add_participant(participant("sip:bob@example.org", CallId::new()))
            .unwrap();
        let alice = ParticipantAddress::new("sip:alice@example.org");
        assert_eq!(core.choose_another_admin_if_none_in_conference(), Some(alice.clone()));
        assert!(core.find_participant(&alice).unwrap().is_admin);
        assert_eq!(core.choose_another_admin_if_none_in_conference(), None);
    }

    #[test]
    fn displayed_speaker_is_found_by_ssrc() {
        let core = core();
        let mut events = core.subscribe();
        let call = CallId::new();
        core.add_participant(participant("sip:alice@example.org", call)).unwrap();
        let alice = ParticipantAddress::new("sip:alice@example.org");
        core.set_device_ssrc(&alice, MediaType::Video, 0xcafe).unwrap();

        core.set_displayed_speaker_by_ssrc(0xcafe);
        assert_eq!(core.active_speaker(), Some(alice.clone()));
        core.set_displayed_speaker_by_ssrc(0xbeef);
        assert_eq!(core.active_speaker(), Some(alice));

        let mut speaker_events = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ConferenceEvent::ActiveSpeakerChanged { .. }) {
                speaker_events += 1;
            }
        }
        assert_eq!(speaker_events, 1);
    }

    #[test]
    fn termination_completes_with_last_participant() {
        let core = core();
        core.set_state(ConferenceState::Created).unwrap();
        core.add_participant(participant("sip:alice@example.org", CallId::new()))
            .unwrap();
        core.set_state(ConferenceState::TerminationPending).unwrap();
        assert!(!core.check_if_terminated());
        assert_eq!(core.take_participants().len(), 1);
        assert!(core.check_if_terminated());
        assert_eq!(core.state(), ConferenceState::Terminated);
    }
}
