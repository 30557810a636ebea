use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rvoip_stream_core::{CallId, CallState, MediaType, StreamsGroup};
use tracing::{debug, error, info, warn};

use super::{is_media_state, negotiated_media, unknown_volume, Conference, ConferenceCore, ConferenceLink};
use crate::config::ConferenceConfig;
use crate::error::{ConferenceError, Result};
use crate::participant::{Participant, ParticipantDevice};
use crate::types::{ConferenceState, DeviceState, ParticipantAddress};

/// Signalling operations a remote conference needs
pub trait FocusSignaling: Send + Sync {
    /// Place a call to the conference focus
    fn call_focus(&self, focus: &ParticipantAddress, subject: &str) -> Result<CallId>;

    /// Transfer `call` to `target`
    fn transfer(&self, call: CallId, target: &ParticipantAddress) -> Result<()>;

    /// Ask the focus to remove a participant
    fn remove_from_focus(&self, focus_call: CallId, participant: &ParticipantAddress) -> Result<()>;

    fn pause(&self, call: CallId) -> Result<()>;

    fn resume(&self, call: CallId) -> Result<()>;

    fn terminate(&self, call: CallId);
}

/// Conference hosted by a remote focus
///
/// Calls added before the focus call runs wait in a pending list and are
/// transferred to the focus once it does. The participant list is
/// maintained from the focus notifications.
pub struct RemoteConference {
    core: Arc<ConferenceCore>,
    signaling: Arc<dyn FocusSignaling>,
    focus: ParticipantAddress,
    focus_call: RwLock<Option<CallId>>,
    focus_state: RwLock<CallState>,
    focus_link: RwLock<Option<Arc<ConferenceLink>>>,
    pending_calls: Mutex<Vec<CallId>>,
    transferring_calls: Mutex<Vec<CallId>>,
    volumes: DashMap<u32, f32>,
}

impl RemoteConference {
    pub fn new(
        me: ParticipantAddress,
        focus: ParticipantAddress,
        config: ConferenceConfig,
        signaling: Arc<dyn FocusSignaling>,
    ) -> Self {
        Self {
            core: Arc::new(ConferenceCore::new(me, config)),
            signaling,
            focus,
            focus_call: RwLock::new(None),
            focus_state: RwLock::new(CallState::Idle),
            focus_link: RwLock::new(None),
            pending_calls: Mutex::new(Vec::new()),
            transferring_calls: Mutex::new(Vec::new()),
            volumes: DashMap::new(),
        }
    }

    pub fn focus(&self) -> &ParticipantAddress {
        &self.focus
    }

    pub fn focus_call(&self) -> Option<CallId> {
        *self.focus_call.read()
    }

    pub fn pending_calls(&self) -> Vec<CallId> {
        self.pending_calls.lock().clone()
    }

    pub fn transferring_calls(&self) -> Vec<CallId> {
        self.transferring_calls.lock().clone()
    }

    /// The focus call runs and can receive transfers
    pub fn focus_is_ready(&self) -> bool {
        self.focus_call().is_some()
            && matches!(*self.focus_state.read(), CallState::StreamsRunning | CallState::Paused)
    }

    /// Call the focus if not done yet
    pub fn connect_focus(&self) -> Result<CallId> {
        if let Some(call) = self.focus_call() {
            return Ok(call);
        }
        let call = self.signaling.call_focus(&self.focus, &self.core.subject())?;
        *self.focus_call.write() = Some(call);
        *self.focus_state.write() = CallState::OutgoingInit;
        self.core.set_state(ConferenceState::CreationPending)?;
        info!("Calling conference focus {} on call {}", self.focus, call);
        Ok(call)
    }

    /// Make the streams of the focus call conference-aware
    pub fn attach_focus_session(&self, group: &mut StreamsGroup) -> Result<()> {
        let call = self.focus_call().ok_or(ConferenceError::FocusNotReady)?;
        let link = ConferenceLink::new(call, self.core.clone(), None);
        link.install(group);
        *self.focus_link.write() = Some(link);
        Ok(())
    }

    /// Send `call` to the focus; returns whether the transfer started
    pub fn transfer_to_focus(&self, call: CallId) -> bool {
        match self.signaling.transfer(call, &self.focus) {
            Ok(()) => {
                debug!("Call {} is being transferred to focus {}", call, self.focus);
                self.transferring_calls.lock().push(call);
                true
            }
            Err(e) => {
                error!("Cannot transfer call {} to focus {}: {}", call, self.focus, e);
                false
            }
        }
    }

    pub fn on_focus_call_state_changed(&self, state: CallState) {
        *self.focus_state.write() = state;
        match state {
            CallState::StreamsRunning => {
                if self.core.state() == ConferenceState::CreationPending {
                    if let Err(e) = self.core.set_state(ConferenceState::Created) {
                        warn!("{}", e);
                    }
                }
                let pending: Vec<CallId> = std::mem::take(&mut *self.pending_calls.lock());
                for call in pending {
                    if !self.transfer_to_focus(call) {
                        self.pending_calls.lock().push(call);
                    }
                }
            }
            CallState::Error => {
                error!("Call to conference focus {} failed", self.focus);
                if let Err(e) = self.core.set_state(ConferenceState::CreationFailed) {
                    warn!("{}", e);
                }
                self.pending_calls.lock().clear();
            }
            CallState::End | CallState::Released => {
                info!("Call to conference focus {} ended", self.focus);
                self.reset();
                self.finish_termination();
            }
            _ => {}
        }
    }

    pub fn on_pending_call_state_changed(&self, call: CallId, state: CallState) {
        if !self.pending_calls.lock().contains(&call) {
            return;
        }
        match state {
            CallState::StreamsRunning | CallState::Paused => {
                if self.focus_is_ready() && self.transfer_to_focus(call) {
                    self.pending_calls.lock().retain(|c| *c != call);
                }
            }
            CallState::End | CallState::Error | CallState::Released => {
                debug!("Pending call {} ended before reaching the focus", call);
                self.pending_calls.lock().retain(|c| *c != call);
            }
            _ => {}
        }
    }

    pub fn on_transferring_call_state_changed(&self, call: CallId, state: CallState) {
        if !self.transferring_calls.lock().contains(&call) {
            return;
        }
        match state {
            CallState::Connected | CallState::StreamsRunning | CallState::End | CallState::Released => {
                debug!("Transfer of call {} to the focus is over", call);
                self.transferring_calls.lock().retain(|c| *c != call);
            }
            CallState::Error => {
                warn!("Transfer of call {} to focus {} failed, resuming it", call, self.focus);
                self.transferring_calls.lock().retain(|c| *c != call);
                if let Err(e) = self.signaling.resume(call) {
                    error!("Cannot resume call {}: {}", call, e);
                }
            }
            _ => {}
        }
    }

    /// A participant was announced by the focus
    pub fn on_participant_added(&self, address: ParticipantAddress, is_admin: bool) {
        if address.weak_equal(&self.core.me().address) {
            self.core.set_me_admin(is_admin);
            return;
        }
        let mut participant = Participant::new(address.clone());
        participant.is_admin = is_admin;
        if let Err(e) = self.core.add_participant(participant) {
            warn!("Ignoring notified participant {}: {}", address, e);
        }
    }

    pub fn on_participant_removed(&self, address: &ParticipantAddress) {
        if let Err(e) = self.core.remove_participant(address) {
            warn!("Ignoring removal of {}: {}", address, e);
        }
        self.core.check_if_terminated();
    }

    /// A device was announced by the focus, with its stream labels
    pub fn on_participant_device_added(
        &self,
        participant: &ParticipantAddress,
        device: ParticipantAddress,
        labels: &[(MediaType, String)],
    ) {
        let mut entry = ParticipantDevice::new(device.clone(), None);
        entry.state = DeviceState::Present;
        for (media_type, label) in labels {
            entry.set_label(*media_type, label.clone());
        }
        if let Err(e) = self.core.add_device(participant, entry) {
            warn!("Ignoring notified device {}: {}", device, e);
        }
    }

    pub fn on_participant_device_removed(&self, participant: &ParticipantAddress, device: &ParticipantAddress) {
        if let Err(e) = self.core.remove_device(participant, device) {
            warn!("Ignoring removal of device {}: {}", device, e);
        }
    }

    pub fn on_participant_device_ssrc(&self, device: &ParticipantAddress, media_type: MediaType, ssrc: u32) {
        if let Err(e) = self.core.set_device_ssrc(device, media_type, ssrc) {
            warn!("Ignoring ssrc of device {}: {}", device, e);
        }
    }

    pub fn on_subject_changed(&self, subject: &str) {
        self.core.set_subject(subject);
    }

    /// Audio level the focus reports for a contributing source
    pub fn update_ssrc_volume(&self, ssrc: u32, volume_dbm0: f32) {
        self.volumes.insert(ssrc, volume_dbm0);
    }

    fn reset(&self) {
        *self.focus_call.write() = None;
        if let Some(link) = self.focus_link.write().take() {
            link.detach();
        }
        self.pending_calls.lock().clear();
        self.transferring_calls.lock().clear();
        self.volumes.clear();
    }

    fn finish_termination(&self) {
        if !self.core.state().is_ending() {
            if let Err(e) = self.core.set_state(ConferenceState::TerminationPending) {
                warn!("{}", e);
                return;
            }
        }
        self.core.take_participants();
        self.core.check_if_terminated();
    }
}

impl Conference for RemoteConference {
    fn core(&self) -> &Arc<ConferenceCore> {
        &self.core
    }

    fn add_participant(&self, call: CallId, address: ParticipantAddress, _group: &mut StreamsGroup) -> Result<()> {
        if self.core.state().is_ending() {
            return Err(ConferenceError::Terminated);
        }
        if self.focus_call().is_none() {
            self.connect_focus()?;
        }
        if self.focus_is_ready() {
            if !self.transfer_to_focus(call) {
                return Err(ConferenceError::Signaling(format!("transfer of {} failed", address)));
            }
        } else {
            debug!("Focus not ready, call {} to {} is pending", call, address);
            self.pending_calls.lock().push(call);
        }
        Ok(())
    }

    fn remove_participant(&self, address: &ParticipantAddress) -> Result<()> {
        if !self.focus_is_ready() {
            return Err(ConferenceError::FocusNotReady);
        }
        if !self.core.is_participant(address) {
            return Err(ConferenceError::ParticipantNotFound(address.clone()));
        }
        let focus_call = self.focus_call().ok_or(ConferenceError::FocusNotReady)?;
        self.signaling.remove_from_focus(focus_call, address)
    }

    fn participant_device_media_changed(&self, call: CallId, group: &StreamsGroup) -> Result<bool> {
        if self.focus_call() != Some(call) {
            return Err(ConferenceError::DeviceNotFound(call));
        }
        let media = negotiated_media(group);
        let changed = self.core.update_me_device(call, |device| {
            media.iter().fold(false, |changed, (media_type, direction, label)| {
                if !label.is_empty() {
                    device.set_label(*media_type, label.clone());
                }
                device.set_direction(*media_type, *direction) | changed
            })
        });
        Ok(changed)
    }

    fn participant_device_ssrc_changed(&self, call: CallId, media_type: MediaType, ssrc: u32) -> Result<()> {
        if self.focus_call() != Some(call) {
            return Err(ConferenceError::DeviceNotFound(call));
        }
        self.core.update_me_device(call, |device| {
            device.ssrcs.insert(media_type, ssrc);
        });
        Ok(())
    }

    fn participant_device_volume(&self, device: &ParticipantAddress) -> f32 {
        let ssrc = self
            .core
            .participants()
            .iter()
            .chain(std::iter::once(&self.core.me()))
            .flat_map(|p| p.devices.iter())
            .find(|d| d.address == *device)
            .and_then(|d| d.ssrc(MediaType::Audio));
        match ssrc.and_then(|ssrc| self.volumes.get(&ssrc).map(|v| *v)) {
            Some(volume) => volume,
            None => unknown_volume(device),
        }
    }

    fn enter(&self) -> Result<()> {
        let call = self.focus_call().ok_or(ConferenceError::FocusNotReady)?;
        let state = *self.focus_state.read();
        match state {
            CallState::Paused => self.signaling.resume(call),
            state if is_media_state(state) => Err(ConferenceError::AlreadyIn),
            _ => Err(ConferenceError::FocusNotReady),
        }
    }

    fn leave(&self) {
        let Some(call) = self.focus_call() else {
            return;
        };
        let state = *self.focus_state.read();
        if is_media_state(state) {
            if let Err(e) = self.signaling.pause(call) {
                error!("Cannot pause focus call {}: {}", call, e);
            }
        } else {
            debug!("Focus call {} is {:?}, not pausing it", call, state);
        }
    }

    fn is_in(&self) -> bool {
        self.focus_call().is_some() && is_media_state(*self.focus_state.read())
    }

    fn start_recording(&self, _path: &Path) -> Result<()> {
        warn!("Recording a remote conference is done by its focus");
        Ok(())
    }

    fn stop_recording(&self) -> Result<()> {
        Ok(())
    }

    fn is_recording(&self) -> bool {
        false
    }

    fn terminate(&self) {
        match self.focus_call() {
            Some(call) => {
                if !self.core.state().is_ending() {
                    if let Err(e) = self.core.set_state(ConferenceState::TerminationPending) {
                        warn!("{}", e);
                    }
                }
                self.signaling.terminate(call);
            }
            None => self.finish_termination(),
        }
    }
}

impl std::fmt::Debug for RemoteConference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConference")
            .field("core", &self.core)
            .field("focus", &self.focus)
            .field("focus_call", &self.focus_call())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}
