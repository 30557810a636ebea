//! Events posted by the media engine
//!
//! The engine runs on its own thread and posts typed events to the inbox of
//! the [`StreamsGroup`](crate::group::StreamsGroup) owning the stream. The
//! group drains the inbox synchronously and dispatches each event to its
//! stream.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::{StreamIndex, VideoSize};

/// Event raised by the engine for one stream
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// The decoder could not decode incoming frames
    DecoderError,
    DecoderRecovered,
    FirstFrameDecoded,
    /// PLI, SLI or RPSI requested by the decoder, handled by the engine
    DecoderPictureLossRequest,
    PreviewSizeChanged(VideoSize),
    /// Display error reported by the renderer
    DisplayError(i32),
    /// Camera stopped producing frames
    CameraNotWorking(String),
    /// Contributing source changed, new active speaker
    CsrcChanged(u32),
    /// Estimated available download bandwidth in bit/s
    BandwidthEstimate(f64),
    /// Jitter buffer update confirming a NACK was sent
    JitterUpdateForNack,
    SnapshotTaken(PathBuf),
    /// Anything else, by numeric id
    Other(u32),
}

/// Event addressed to one stream of a group
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub stream_index: StreamIndex,
    pub event: MediaEvent,
}

/// Handle given to the engine to post events
#[derive(Debug, Clone)]
pub struct EngineEventSender {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl EngineEventSender {
    /// Post an event, returning false when the group is gone
    pub fn post(&self, stream_index: StreamIndex, event: MediaEvent) -> bool {
        match self.tx.send(StreamEvent { stream_index, event }) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping media event for stream {}: group is gone", e.0.stream_index);
                false
            }
        }
    }
}

/// Receiving side owned by the group
#[derive(Debug)]
pub struct EventInbox {
    tx: mpsc::UnboundedSender<StreamEvent>,
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl EventInbox {
    /// Create a new inbox
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// New sender for the engine
    pub fn sender(&self) -> EngineEventSender {
        EngineEventSender { tx: self.tx.clone() }
    }

    /// Take every pending event without waiting
    pub fn drain(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        if !events.is_empty() {
            debug!("Drained {} media events", events.len());
        }
        events
    }
}

impl Default for EventInbox {
    fn default() -> Self {
        Self::new()
    }
}
