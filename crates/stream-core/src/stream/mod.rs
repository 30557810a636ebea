//! Media streams and their lifecycle
//!
//! A [`Stream`] is one negotiated RTP flow. Concrete streams ([`AudioStream`],
//! [`VideoStream`]) share the bookkeeping kept in [`StreamCore`]: state,
//! ports, the last rendered descriptions, early-media muting, statistics and
//! the network quality monitor.
//!
//! ```text
//! Stopped --prepare--> Preparing --finish_prepare--> Stopped
//! Stopped --render--> Running --stop--> Stopped (pipeline rebuilt, keys kept)
//! any     --finish--> Finished
//! ```

pub mod audio;
pub mod control;
pub mod video;

use std::any::Any;

use tracing::{debug, info};

use crate::alert::{AlertContext, NetworkQualityAlertMonitor};
use crate::config::StreamConfig;
use crate::engine::PipelineId;
use crate::events::MediaEvent;
use crate::group::StreamsGroup;
use crate::offer_answer::{OfferAnswerContext, StreamDescription};
use crate::security::SecuritySessions;
use crate::stats::CallStats;
use crate::transport::{PortAllocator, PortConfig};
use crate::types::{CallState, MediaType, StreamDirection, StreamIndex, StreamKey, StreamState};

pub use audio::AudioStream;
pub use control::{AudioControl, VideoControl};
pub use video::VideoStream;

/// Inputs of one render pass
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub offer_answer: &'a OfferAnswerContext,
    pub target_state: CallState,
    pub config: &'a StreamConfig,
}

/// Why a render left the stream stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The answer has no description for this stream
    MissingResultDescription,
    /// No payload type was accepted
    NoPayload,
    /// Nothing left to send or receive
    Inactive,
    /// The stream was finished earlier
    Finished,
}

/// Result of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The pipeline was (re)started
    Started,
    /// The running pipeline was kept as is
    Unchanged,
    Stopped(StopReason),
}

impl RenderOutcome {
    pub fn is_running(&self) -> bool {
        matches!(self, RenderOutcome::Started | RenderOutcome::Unchanged)
    }
}

/// What changed since the last render of a running stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicChange {
    /// The stream is not running, a full start is needed
    NotRunning,
    /// Nothing that requires a restart
    Unchanged,
    /// Same as `Unchanged`, and early media just ended
    Unmuted,
    /// Descriptions changed, the stream must be stopped and restarted
    NeedsRestart,
}

/// Polymorphic capability of every stream
///
/// Render, stop and finish are driven by the owning [`StreamsGroup`], which
/// takes the stream out of its slot for the duration of the call so the
/// stream can reach its siblings through the group.
pub trait Stream: Any + Send {
    fn core(&self) -> &StreamCore;

    fn core_mut(&mut self) -> &mut StreamCore;

    /// Warm up resources before the answer is known
    ///
    /// Returns true when preparation completed synchronously.
    fn prepare(&mut self, group: &mut StreamsGroup) -> bool;

    /// Release what [`Stream::prepare`] acquired
    fn finish_prepare(&mut self);

    /// Apply content and label of the local description to the pipeline
    fn configure(&mut self, ctx: &OfferAnswerContext, group: &StreamsGroup);

    /// Bring the stream to what the negotiated descriptions ask for
    fn render(&mut self, ctx: &RenderContext<'_>, group: &mut StreamsGroup) -> RenderOutcome;

    /// Stop the pipeline, keeping security sessions for a later restart
    fn stop(&mut self, group: &mut StreamsGroup);

    /// Tear the stream down for good
    fn finish(&mut self, group: &mut StreamsGroup);

    /// Handle an event posted by the media engine
    fn handle_event(&mut self, event: MediaEvent, group: &mut StreamsGroup);

    /// ZRTP was secured on the main stream of the group
    fn zrtp_started(&mut self, _group: &mut StreamsGroup) {}

    /// Feed the alert monitors with fresh statistics
    fn run_alert_monitors(&mut self) {
        self.core_mut().run_network_monitor();
    }

    fn is_encrypted(&self) -> bool;

    fn pipeline_id(&self) -> Option<PipelineId>;

    /// Security sessions of the current pipeline
    fn sessions(&self) -> Option<&SecuritySessions>;

    fn label(&self) -> &str {
        self.core().label()
    }

    fn index(&self) -> StreamIndex {
        self.core().index()
    }

    fn media_type(&self) -> MediaType {
        self.core().media_type()
    }

    fn state(&self) -> StreamState {
        self.core().state()
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// State shared by every concrete stream
#[derive(Debug)]
pub struct StreamCore {
    key: StreamKey,
    media_type: MediaType,
    state: StreamState,
    ports: PortConfig,
    port_owner: String,
    label: String,
    last_local: Option<StreamDescription>,
    last_result: Option<StreamDescription>,
    target_state: CallState,
    muted: bool,
    stats: CallStats,
    number_of_starts: u32,
    network_monitor: NetworkQualityAlertMonitor,
}

impl StreamCore {
    /// Create the core of a stream bound to `ports`
    pub fn new(key: StreamKey, media_type: MediaType, ports: PortConfig, alerts: AlertContext) -> Self {
        Self {
            key,
            media_type,
            state: StreamState::Stopped,
            ports,
            port_owner: format!("{}", key),
            label: String::new(),
            last_local: None,
            last_result: None,
            target_state: CallState::Idle,
            muted: false,
            stats: CallStats::new(media_type),
            number_of_starts: 0,
            network_monitor: NetworkQualityAlertMonitor::new(alerts),
        }
    }

    pub fn key(&self) -> StreamKey {
        self.key
    }

    pub fn index(&self) -> StreamIndex {
        self.key.index
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == StreamState::Running
    }

    pub fn ports(&self) -> PortConfig {
        self.ports
    }

    /// Owner name used with the port allocator
    pub fn port_owner(&self) -> &str {
        &self.port_owner
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    /// Call state targeted by the last render
    pub fn target_state(&self) -> CallState {
        self.target_state
    }

    /// Muted while in early media
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn stats(&self) -> &CallStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut CallStats {
        &mut self.stats
    }

    pub fn number_of_starts(&self) -> u32 {
        self.number_of_starts
    }

    pub fn network_monitor(&self) -> &NetworkQualityAlertMonitor {
        &self.network_monitor
    }

    pub fn network_monitor_mut(&mut self) -> &mut NetworkQualityAlertMonitor {
        &mut self.network_monitor
    }

    /// Enter the preparing state
    pub fn begin_prepare(&mut self) {
        if self.state == StreamState::Stopped {
            self.state = StreamState::Preparing;
        }
    }

    pub fn end_prepare(&mut self) {
        if self.state == StreamState::Preparing {
            self.state = StreamState::Stopped;
        }
    }

    /// Compare the new descriptions with the running ones
    ///
    /// A label change alone is not a change.
    pub fn handle_basic_changes(&mut self, ctx: &OfferAnswerContext, target_state: CallState) -> BasicChange {
        self.target_state = target_state;
        if self.state != StreamState::Running {
            return BasicChange::NotRunning;
        }
        let local_changed = self
            .last_local
            .as_ref()
            .map_or(true, |last| !last.matches_ignoring_label(&ctx.local));
        let result_changed = match (&self.last_result, &ctx.result) {
            (Some(last), Some(new)) => !last.matches_ignoring_label(new),
            (None, None) => false,
            _ => true,
        };
        if ctx.local.is_disabled() || local_changed || result_changed {
            debug!("Stream {} descriptions changed, restart needed", self.key);
            return BasicChange::NeedsRestart;
        }
        if self.muted && !target_state.is_early_media() {
            info!("Early media finished on stream {}, unmuting", self.key);
            self.muted = false;
            return BasicChange::Unmuted;
        }
        BasicChange::Unchanged
    }

    /// Record a start common to every stream type
    ///
    /// Applies SRTP keys of the answer, decides early-media muting and moves
    /// the stream to running.
    pub fn begin_render(
        &mut self,
        ctx: &OfferAnswerContext,
        config: &StreamConfig,
        sessions: &mut SecuritySessions,
    ) {
        if let Some((suite, key)) = ctx.result.as_ref().and_then(|r| r.crypto.clone()) {
            debug!("Stream {} using SRTP suite {}", self.key, suite);
            sessions.enable_srtp(suite, key);
        }
        self.muted = self.target_state == CallState::OutgoingEarlyMedia && !config.real_early_media;
        self.label = ctx.local.label.clone();
        self.last_local = Some(ctx.local.clone());
        self.last_result = ctx.result.clone();
        self.state = StreamState::Running;
    }

    /// Count a pipeline start
    pub fn started(&mut self) {
        self.number_of_starts += 1;
    }

    /// Move to stopped, forgetting the rendered descriptions
    pub fn stop(&mut self) {
        if self.state == StreamState::Finished {
            return;
        }
        if self.state == StreamState::Running {
            debug!("Stopping stream {}", self.key);
        }
        self.state = StreamState::Stopped;
        self.last_local = None;
        self.last_result = None;
        self.muted = false;
    }

    /// Move to finished and release the ports
    pub fn finish(&mut self, ports: &PortAllocator) {
        self.stop();
        self.state = StreamState::Finished;
        ports.release(&self.port_owner);
        self.network_monitor.reset();
    }

    pub fn run_network_monitor(&mut self) {
        let stats = self.stats.clone();
        self.network_monitor.check(&stats, false);
    }
}

/// Direction to run with, given the answer and the local capture/display policy
///
/// Returns `None` when nothing can flow.
pub fn local_direction(negotiated: StreamDirection, capture: bool, display: bool) -> Option<StreamDirection> {
    match negotiated {
        StreamDirection::SendOnly if capture => Some(StreamDirection::SendOnly),
        StreamDirection::RecvOnly if display => Some(StreamDirection::RecvOnly),
        StreamDirection::SendRecv => Some(match (capture, display) {
            (true, true) => StreamDirection::SendRecv,
            (_, true) => StreamDirection::RecvOnly,
            _ => StreamDirection::SendOnly,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use crate::alert::AlertConfig;
    use crate::clock::ManualClock;
    use crate::offer_answer::PayloadType;
    use crate::types::CallId;

    fn core() -> StreamCore {
        let call = CallId::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let alerts = AlertContext::new(call, Arc::new(ManualClock::new(0)), Arc::new(AlertConfig::default()), tx);
        StreamCore::new(
            StreamKey { call, index: 0 },
            MediaType::Video,
            PortConfig { rtp_port: 9078, rtcp_port: 9079 },
            alerts,
        )
    }

    fn ctx(label: &str, port: u16) -> OfferAnswerContext {
        let local = StreamDescription::new(MediaType::Video, 9078).with_label(label);
        let remote = StreamDescription::new(MediaType::Video, port).with_address("192.0.2.1");
        let result = StreamDescription::new(MediaType::Video, port).with_payload(PayloadType::new(96, "VP8", 90000));
        OfferAnswerContext::negotiated(0, local, remote, result)
    }

    #[test]
    fn label_change_is_not_a_restart() {
        let mut core = core();
        let mut sessions = SecuritySessions::default();
        let first = ctx("a", 7000);
        assert_eq!(core.handle_basic_changes(&first, CallState::StreamsRunning), BasicChange::NotRunning);
        core.begin_render(&first, &StreamConfig::default(), &mut sessions);
        assert!(core.is_running());

        assert_eq!(
            core.handle_basic_changes(&ctx("b", 7000), CallState::StreamsRunning),
            BasicChange::Unchanged
        );
        assert_eq!(
            core.handle_basic_changes(&ctx("b", 7002), CallState::StreamsRunning),
            BasicChange::NeedsRestart
        );
    }

    #[test]
    fn leaving_early_media_unmutes() {
        let mut core = core();
        let mut sessions = SecuritySessions::default();
        let c = ctx("", 7000);
        core.handle_basic_changes(&c, CallState::OutgoingEarlyMedia);
        core.begin_render(&c, &StreamConfig::default(), &mut sessions);
        assert!(core.is_muted());
        assert_eq!(core.handle_basic_changes(&c, CallState::StreamsRunning), BasicChange::Unmuted);
        assert!(!core.is_muted());
    }

    #[test]
    fn finish_is_terminal() {
        let mut core = core();
        let ports = PortAllocator::new();
        core.finish(&ports);
        core.stop();
        assert_eq!(core.state(), StreamState::Finished);
    }

    #[test]
    fn direction_policy() {
        assert_eq!(local_direction(StreamDirection::SendOnly, false, true), None);
        assert_eq!(
            local_direction(StreamDirection::SendRecv, false, true),
            Some(StreamDirection::RecvOnly)
        );
        assert_eq!(
            local_direction(StreamDirection::SendRecv, true, false),
            Some(StreamDirection::SendOnly)
        );
        assert_eq!(local_direction(StreamDirection::Inactive, true, true), None);
    }
}
