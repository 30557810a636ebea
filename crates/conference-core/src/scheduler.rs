//! Conference creation and update on a conference server
//!
//! The scheduler sends the conference information to the server through a
//! signalling session. Once the server answers, the session is terminated and
//! its remote contact becomes the conference address. An impromptu
//! conference (no start time) is joined right away, as admin.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rvoip_stream_core::{CallId, CallState};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{ConferenceError, Result};
use crate::types::ParticipantAddress;

/// Progress of a scheduling request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SchedulerState {
    #[default]
    Idle,
    AllocationPending,
    Ready,
    Error,
    Updating,
}

/// What is sent to the server
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConferenceInfo {
    pub subject: String,
    pub organizer: ParticipantAddress,
    pub participants: Vec<ParticipantAddress>,
    /// `None` for an impromptu conference
    pub start_time: Option<DateTime<Utc>>,
    /// Minutes; 0 when open-ended
    pub duration: u32,
    /// Conference address, known once the server allocated it
    pub uri: Option<ParticipantAddress>,
}

impl ConferenceInfo {
    pub fn new(organizer: ParticipantAddress, subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            organizer,
            ..Default::default()
        }
    }

    pub fn with_participant(mut self, participant: ParticipantAddress) -> Self {
        self.participants.push(participant);
        self
    }

    pub fn with_start_time(mut self, start: DateTime<Utc>, duration: u32) -> Self {
        self.start_time = Some(start);
        self.duration = duration;
        self
    }

    pub fn is_impromptu(&self) -> bool {
        self.start_time.is_none()
    }

    /// Participants sorted, with weakly equal addresses listed once
    pub fn invitees(&self) -> Vec<ParticipantAddress> {
        let mut list = self.participants.clone();
        list.sort();
        list.dedup_by(|a, b| a.weak_equal(b));
        list
    }
}

/// Call placed to join the conference the scheduler just created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub address: ParticipantAddress,
    pub subject: String,
    /// Recipient list sent along with the call, may be empty
    pub participants: Vec<ParticipantAddress>,
    pub video: bool,
    /// Extra contact URI parameters
    pub contact_params: Vec<(String, String)>,
}

/// Signalling operations the scheduler relies on
pub trait SchedulerSignaling: Send + Sync {
    /// Open a session carrying `info` to the conference factory; `update`
    /// is set when the conference already exists on the server
    fn send_conference_request(
        &self,
        factory: &ParticipantAddress,
        info: &ConferenceInfo,
        update: bool,
    ) -> Result<CallId>;

    fn terminate(&self, session: CallId);

    fn join(&self, request: JoinRequest) -> Result<CallId>;
}

/// Notifications sent by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchedulerEvent {
    StateChanged(SchedulerState),
    /// The server allocated (or confirmed) the conference address
    ConferenceReady(ParticipantAddress),
}

#[derive(Debug, Default)]
struct SchedulerInner {
    state: SchedulerState,
    info: Option<ConferenceInfo>,
    session: Option<CallId>,
}

pub struct ConferenceScheduler {
    signaling: Arc<dyn SchedulerSignaling>,
    factory: ParticipantAddress,
    automatically_initiate_video: bool,
    inner: Mutex<SchedulerInner>,
    event_tx: mpsc::UnboundedSender<SchedulerEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<SchedulerEvent>>>,
}

impl ConferenceScheduler {
    pub fn new(
        factory: ParticipantAddress,
        signaling: Arc<dyn SchedulerSignaling>,
        automatically_initiate_video: bool,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            signaling,
            factory,
            automatically_initiate_video,
            inner: Mutex::new(SchedulerInner::default()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Receiver of scheduler events; only the first call gets it
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SchedulerEvent>> {
        self.event_rx.lock().take()
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lock().state
    }

    pub fn info(&self) -> Option<ConferenceInfo> {
        self.inner.lock().info.clone()
    }

    pub fn session(&self) -> Option<CallId> {
        self.inner.lock().session
    }

    pub fn conference_address(&self) -> Option<ParticipantAddress> {
        self.inner.lock().info.as_ref().and_then(|info| info.uri.clone())
    }

    /// Create the conference on the server, or update it when `info`
    /// already carries its address
    pub fn schedule(&self, info: ConferenceInfo) -> Result<()> {
        if matches!(self.state(), SchedulerState::AllocationPending | SchedulerState::Updating) {
            return Err(ConferenceError::Signaling("a scheduling request is already in progress".into()));
        }
        if info.organizer.is_empty() {
            return Err(ConferenceError::Config("conference organizer is missing".into()));
        }
        let update = info.uri.is_some();
        match self.signaling.send_conference_request(&self.factory, &info, update) {
            Ok(session) => {
                {
                    let mut inner = self.inner.lock();
                    inner.session = Some(session);
                    inner.info = Some(info);
                }
                let next = if update {
                    SchedulerState::Updating
                } else {
                    SchedulerState::AllocationPending
                };
                debug!("Conference request sent on session {}", session);
                self.set_state(next);
                Ok(())
            }
            Err(e) => {
                error!("Cannot send conference request to {}: {}", self.factory, e);
                self.inner.lock().info = Some(info);
                self.set_state(SchedulerState::Error);
                Err(e)
            }
        }
    }

    pub fn on_call_session_state_changed(&self, session: CallId, state: CallState) {
        if self.session() != Some(session) {
            return;
        }
        match state {
            CallState::Error => self.set_state(SchedulerState::Error),
            CallState::StreamsRunning => {
                debug!("Conference server answered on session {}, terminating it", session);
                self.signaling.terminate(session);
            }
            _ => {}
        }
    }

    /// The request session is over
    ///
    /// `remote_contact` is the contact the server answered with, if the
    /// session was established; `had_video` tells whether it negotiated video.
    pub fn on_call_session_set_terminated(
        &self,
        session: CallId,
        remote_contact: Option<ParticipantAddress>,
        had_video: bool,
    ) {
        if self.session() != Some(session) {
            return;
        }
        self.inner.lock().session = None;

        let Some(address) = remote_contact else {
            let known = self
                .conference_address()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "<unknown-address>".to_string());
            error!(
                "Session updating conference {} was not established, the server likely ignored the request",
                known
            );
            self.set_state(SchedulerState::Error);
            return;
        };

        let state = self.state();
        if state == SchedulerState::Error {
            return;
        }
        let info = self.info().unwrap_or_default();
        if state == SchedulerState::AllocationPending && info.is_impromptu() {
            info!("Automatically rejoining conference {}", address);
            let request = JoinRequest {
                address: address.clone(),
                subject: info.subject.clone(),
                participants: info.invitees(),
                video: had_video && self.automatically_initiate_video,
                contact_params: vec![("admin".to_string(), "true".to_string())],
            };
            if let Err(e) = self.signaling.join(request) {
                warn!("Cannot join conference {}: {}", address, e);
            }
        }

        info!("Conference has been successfully created: {}", address);
        self.set_conference_address(address);
    }

    fn set_conference_address(&self, address: ParticipantAddress) {
        {
            let mut inner = self.inner.lock();
            inner.info.get_or_insert_with(ConferenceInfo::default).uri = Some(address.clone());
        }
        self.set_state(SchedulerState::Ready);
        let _ = self.event_tx.send(SchedulerEvent::ConferenceReady(address));
    }

    fn set_state(&self, state: SchedulerState) {
        let previous = std::mem::replace(&mut self.inner.lock().state, state);
        if previous != state {
            debug!("Conference scheduler: {:?} -> {:?}", previous, state);
            let _ = self.event_tx.send(SchedulerEvent::StateChanged(state));
        }
    }
}

impl std::fmt::Debug for ConferenceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConferenceScheduler")
            .field("factory", &self.factory)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invitees_are_sorted_and_listed_once() {
        let info = ConferenceInfo::new("sip:me@example.org".into(), "weekly")
            .with_participant("sip:carol@example.org".into())
            .with_participant("sip:alice@example.org".into())
            .with_participant("sip:alice@example.org;gr=1".into())
            .with_participant("sip:bob@example.org".into());
        let invitees: Vec<String> = info.invitees().iter().map(|a| a.to_string()).collect();
        assert_eq!(
            invitees,
            vec!["sip:alice@example.org", "sip:bob@example.org", "sip:carol@example.org"]
        );
    }
}
