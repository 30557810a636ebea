//! Creation of conferences and schedulers from the shared configuration

use std::sync::Arc;

use infra_common::config::ConfigStore;
use tracing::info;

use crate::conference::{FocusSignaling, LocalConference, RemoteConference};
use crate::config::ConferenceConfig;
use crate::error::{ConferenceError, Result};
use crate::registry::ConferenceRegistry;
use crate::scheduler::{ConferenceScheduler, SchedulerSignaling};
use crate::types::ParticipantAddress;

/// Builds conferences for the local user and registers them
#[derive(Debug)]
pub struct ConferenceFactory {
    me: ParticipantAddress,
    config: ConferenceConfig,
    factory_uri: Option<ParticipantAddress>,
    registry: Arc<ConferenceRegistry>,
}

impl ConferenceFactory {
    pub fn new(me: ParticipantAddress, config: ConferenceConfig, registry: Arc<ConferenceRegistry>) -> Self {
        Self {
            me,
            config,
            factory_uri: None,
            registry,
        }
    }

    /// Read `[conference]` settings, including the server `factory_uri`
    pub fn from_store(me: ParticipantAddress, store: &ConfigStore, registry: Arc<ConferenceRegistry>) -> Self {
        let mut factory = Self::new(me, ConferenceConfig::from_store(store), registry);
        factory.factory_uri = store
            .get_opt_string("conference", "factory_uri")
            .map(ParticipantAddress::new)
            .filter(|uri| !uri.is_empty());
        factory
    }

    pub fn with_factory_uri(mut self, uri: ParticipantAddress) -> Self {
        self.factory_uri = Some(uri);
        self
    }

    pub fn config(&self) -> &ConferenceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConferenceRegistry> {
        &self.registry
    }

    /// New local conference, registered and entered when so configured
    pub fn create_local(&self, subject: Option<&str>) -> Arc<LocalConference> {
        let config = match subject {
            Some(subject) => self.config.clone().with_subject(subject),
            None => self.config.clone(),
        };
        let conference = Arc::new(LocalConference::new(self.me.clone(), config));
        let id = self.registry.register(conference.clone());
        info!("Local conference {} created", id);
        conference
    }

    /// New conference hosted by `focus`; the focus is called on the first
    /// participant added
    pub fn create_remote(
        &self,
        focus: ParticipantAddress,
        signaling: Arc<dyn FocusSignaling>,
    ) -> Arc<RemoteConference> {
        let conference = Arc::new(RemoteConference::new(
            self.me.clone(),
            focus.clone(),
            self.config.clone(),
            signaling,
        ));
        let id = self.registry.register(conference.clone());
        info!("Remote conference {} created with focus {}", id, focus);
        conference
    }

    /// Scheduler talking to the configured conference factory
    pub fn create_scheduler(&self, signaling: Arc<dyn SchedulerSignaling>) -> Result<ConferenceScheduler> {
        let factory_uri = self
            .factory_uri
            .clone()
            .ok_or_else(|| ConferenceError::Config("conference.factory_uri is not set".into()))?;
        Ok(ConferenceScheduler::new(
            factory_uri,
            signaling,
            self.config.automatically_initiate_video,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conference::Conference;
    use crate::types::ConferenceState;

    #[test]
    fn local_conferences_are_registered_with_their_subject() {
        let store = ConfigStore::from_toml_str(
            r#"
            [conference]
            subject = "default"
            local_participant_enabled = false
            "#,
        )
        .unwrap();
        let registry = Arc::new(ConferenceRegistry::new());
        let factory = ConferenceFactory::from_store("sip:me@example.org".into(), &store, registry.clone());

        let named = factory.create_local(Some("standup"));
        let plain = factory.create_local(None);
        assert_eq!(named.core().subject(), "standup");
        assert_eq!(plain.core().subject(), "default");
        assert!(!plain.is_in());
        assert_eq!(plain.state(), ConferenceState::Created);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn scheduler_needs_a_factory_uri() {
        struct NoSignaling;
        impl SchedulerSignaling for NoSignaling {
            fn send_conference_request(
                &self,
                _factory: &ParticipantAddress,
                _info: &crate::scheduler::ConferenceInfo,
                _update: bool,
            ) -> Result<rvoip_stream_core::CallId> {
                Err(ConferenceError::Signaling("offline".into()))
            }
            fn terminate(&self, _session: rvoip_stream_core::CallId) {}
            fn join(&self, _request: crate::scheduler::JoinRequest) -> Result<rvoip_stream_core::CallId> {
                Err(ConferenceError::Signaling("offline".into()))
            }
        }

        let registry = Arc::new(ConferenceRegistry::new());
        let factory = ConferenceFactory::new("sip:me@example.org".into(), ConferenceConfig::default(), registry);
        assert!(factory.create_scheduler(Arc::new(NoSignaling)).is_err());
        let factory = factory.with_factory_uri("sip:conference-factory@example.org".into());
        assert!(factory.create_scheduler(Arc::new(NoSignaling)).is_ok());
    }
}
