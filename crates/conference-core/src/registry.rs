//! Process-wide index of conferences and of the calls taking part in them

use std::sync::Arc;

use dashmap::DashMap;
use rvoip_stream_core::{CallId, StreamsGroup};
use tracing::{debug, info};

use crate::conference::Conference;
use crate::error::{ConferenceError, Result};
use crate::types::{ConferenceId, ConferenceState, ParticipantAddress};

/// Registry of live conferences
#[derive(Default)]
pub struct ConferenceRegistry {
    conferences: DashMap<ConferenceId, Arc<dyn Conference>>,
    calls: DashMap<CallId, ConferenceId>,
}

impl ConferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conference: Arc<dyn Conference>) -> ConferenceId {
        let id = conference.id();
        self.conferences.insert(id, conference);
        debug!("Conference {} registered", id);
        id
    }

    pub fn get(&self, id: &ConferenceId) -> Option<Arc<dyn Conference>> {
        self.conferences.get(id).map(|c| c.clone())
    }

    pub fn unregister(&self, id: &ConferenceId) -> Option<Arc<dyn Conference>> {
        self.calls.retain(|_, conference| *conference != *id);
        self.conferences.remove(id).map(|(_, c)| c)
    }

    /// Add the remote end of `call` to a registered conference
    pub fn attach_call(
        &self,
        id: &ConferenceId,
        call: CallId,
        address: ParticipantAddress,
        group: &mut StreamsGroup,
    ) -> Result<()> {
        if let Some(current) = self.calls.get(&call) {
            if *current != *id {
                return Err(ConferenceError::CallAlreadyAttached(call));
            }
        }
        let conference = self.get(id).ok_or(ConferenceError::Terminated)?;
        conference.add_participant(call, address, group)?;
        self.calls.insert(call, *id);
        Ok(())
    }

    /// Forget the conference of `call`
    pub fn detach_call(&self, call: &CallId) -> Option<ConferenceId> {
        self.calls.remove(call).map(|(_, id)| id)
    }

    pub fn conference_of_call(&self, call: &CallId) -> Option<Arc<dyn Conference>> {
        let id = *self.calls.get(call)?;
        self.get(&id)
    }

    pub fn len(&self) -> usize {
        self.conferences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conferences.is_empty()
    }

    pub fn ids(&self) -> Vec<ConferenceId> {
        self.conferences.iter().map(|entry| *entry.key()).collect()
    }

    /// Drop terminated conferences; returns how many were removed
    pub fn remove_terminated(&self) -> usize {
        let ended: Vec<ConferenceId> = self
            .conferences
            .iter()
            .filter(|entry| {
                matches!(
                    entry.value().state(),
                    ConferenceState::Terminated | ConferenceState::Deleted
                )
            })
            .map(|entry| *entry.key())
            .collect();
        for id in &ended {
            self.unregister(id);
        }
        if !ended.is_empty() {
            info!("Removed {} terminated conferences", ended.len());
        }
        ended.len()
    }
}

impl std::fmt::Debug for ConferenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConferenceRegistry")
            .field("conferences", &self.conferences.len())
            .field("calls", &self.calls.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConferenceConfig;
    use crate::conference::LocalConference;
    use rvoip_stream_core::{MediaCore, StreamConfig};

    #[test]
    fn calls_resolve_to_their_conference_until_it_ends() {
        let registry = ConferenceRegistry::new();
        let conference = Arc::new(LocalConference::new("sip:me@example.org".into(), ConferenceConfig::default()));
        let id = registry.register(conference.clone());

        let call = CallId::new();
        let mut group = StreamsGroup::new(call, MediaCore::new(), Arc::new(StreamConfig::default()));
        registry
            .attach_call(&id, call, "sip:alice@example.org".into(), &mut group)
            .unwrap();
        assert_eq!(registry.conference_of_call(&call).map(|c| c.id()), Some(id));

        let other = Arc::new(LocalConference::new("sip:me@example.org".into(), ConferenceConfig::default()));
        let other_id = registry.register(other);
        assert!(matches!(
            registry.attach_call(&other_id, call, "sip:alice@example.org".into(), &mut group),
            Err(ConferenceError::CallAlreadyAttached(_))
        ));

        conference.terminate();
        assert_eq!(registry.remove_terminated(), 1);
        assert!(registry.conference_of_call(&call).is_none());
        assert_eq!(registry.len(), 1);
    }
}
