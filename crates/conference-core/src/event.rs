//! Conference events and their subscribers

use parking_lot::Mutex;
use rvoip_stream_core::MediaType;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::types::{ConferenceId, ConferenceState, ParticipantAddress};

/// Something that happened in a conference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConferenceEvent {
    StateChanged {
        conference: ConferenceId,
        state: ConferenceState,
    },
    ParticipantAdded {
        conference: ConferenceId,
        participant: ParticipantAddress,
    },
    ParticipantRemoved {
        conference: ConferenceId,
        participant: ParticipantAddress,
    },
    AdminStatusChanged {
        conference: ConferenceId,
        participant: ParticipantAddress,
        is_admin: bool,
    },
    DeviceAdded {
        conference: ConferenceId,
        device: ParticipantAddress,
    },
    DeviceRemoved {
        conference: ConferenceId,
        device: ParticipantAddress,
    },
    /// Negotiated directions of a device changed
    DeviceMediaChanged {
        conference: ConferenceId,
        device: ParticipantAddress,
    },
    DeviceSsrcChanged {
        conference: ConferenceId,
        device: ParticipantAddress,
        media_type: MediaType,
        ssrc: u32,
    },
    SubjectChanged {
        conference: ConferenceId,
        subject: String,
    },
    ActiveSpeakerChanged {
        conference: ConferenceId,
        device: Option<ParticipantAddress>,
    },
    ScreenSharingChanged {
        conference: ConferenceId,
        device: ParticipantAddress,
        enabled: bool,
    },
    /// The renderer of a device video failed
    VideoDisplayError {
        conference: ConferenceId,
        device: ParticipantAddress,
        error_code: i32,
    },
}

/// Fan-out of conference events to subscribers
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ConferenceEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConferenceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: ConferenceEvent) {
        trace!("Publishing conference event {:?}", event);
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let mut kept = bus.subscribe();
        let dropped = bus.subscribe();
        drop(dropped);

        let conference = ConferenceId::new();
        bus.publish(ConferenceEvent::SubjectChanged {
            conference,
            subject: "Weekly".to_string(),
        });
        assert_eq!(bus.subscriber_count(), 1);
        assert!(matches!(
            kept.try_recv(),
            Ok(ConferenceEvent::SubjectChanged { subject, .. }) if subject == "Weekly"
        ));
    }
}
