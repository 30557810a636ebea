//! Audio stream of a call
//!
//! Renders negotiated audio descriptions onto an engine pipeline, follows
//! microphone and speaker controls, and joins the conference audio mixer
//! while running.

use std::any::Any;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{local_direction, AudioControl, BasicChange, RenderContext, RenderOutcome, StopReason, Stream, StreamCore};
use crate::engine::{AudioPipeline, IoInput, IoOutput, MediaIo, PipelineId, StartParams};
use crate::events::MediaEvent;
use crate::group::StreamsGroup;
use crate::mixer::{checked_mixer, MediaEndpoint, StreamMixer};
use crate::offer_answer::OfferAnswerContext;
use crate::security::{MediaEncryption, SecuritySessions, ZrtpContext};
use crate::types::{CallState, MediaType, MulticastRole, StreamDirection, VideoContent};
use crate::VOLUME_UNKNOWN_DBM0;

/// Audio stream of a call
///
/// The main audio stream is the ZRTP master of its session: video streams
/// derive their multistream context from it.
pub struct AudioStream {
    core: StreamCore,
    pipeline: Option<AudioPipeline>,
    mixer: Option<Arc<dyn StreamMixer>>,
    endpoint: Option<MediaEndpoint>,
    mic_muted: bool,
    speaker_muted: bool,
    playback_gain_db: f32,
}

impl AudioStream {
    pub fn new(core: StreamCore) -> Self {
        Self {
            core,
            pipeline: Some(AudioPipeline::new()),
            mixer: None,
            endpoint: None,
            mic_muted: false,
            speaker_muted: false,
            playback_gain_db: 0.0,
        }
    }

    pub fn pipeline(&self) -> Option<&AudioPipeline> {
        self.pipeline.as_ref()
    }

    pub fn pipeline_mut(&mut self) -> Option<&mut AudioPipeline> {
        self.pipeline.as_mut()
    }

    /// Endpoint registered with the conference mixer
    pub fn endpoint(&self) -> Option<&MediaEndpoint> {
        self.endpoint.as_ref()
    }

    fn start_zrtp(&mut self, ctx: &OfferAnswerContext, group: &StreamsGroup) {
        let media_state = group.media_state();
        let remote_hash = ctx.remote_zrtp_hash();
        if media_state.negotiated_encryption != MediaEncryption::Zrtp && remote_hash.is_none() {
            return;
        }
        if !media_state.is_encryption_accepted(MediaEncryption::Zrtp) {
            debug!("ZRTP not accepted on call {}, not starting it", group.call_id());
            return;
        }
        let go_clear = group.config().zrtp_go_clear;
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };
        let zrtp = pipeline
            .sessions_mut()
            .zrtp
            .get_or_insert_with(|| ZrtpContext::new(go_clear));
        zrtp.start();
        if let Some(hash) = remote_hash {
            if let Err(e) = zrtp.set_peer_hello_hash(hash) {
                error!("Audio stream ZRTP hash mismatch: {}", e);
            }
        }
    }

    fn connect_to_mixer(&mut self, target_state: CallState) {
        let (Some(mixer), Some(pipeline)) = (self.mixer.as_ref(), self.pipeline.as_ref()) else {
            return;
        };
        if target_state != CallState::StreamsRunning {
            return;
        }
        if let Some(port) = mixer.as_audio() {
            let endpoint = MediaEndpoint {
                stream: self.core.key(),
                pipeline: pipeline.id(),
                content: VideoContent::Default,
                label: self.core.label().to_string(),
            };
            if port.connect_endpoint(endpoint.clone(), self.mic_muted) {
                self.endpoint = Some(endpoint);
            } else {
                warn!("Audio stream {} left out of the mixer", self.core.key());
            }
        }
    }

    fn disconnect_from_mixer(&mut self) {
        let Some(endpoint) = self.endpoint.take() else {
            return;
        };
        match self.mixer.as_ref().and_then(|m| m.as_audio()) {
            Some(port) => port.disconnect_endpoint(&endpoint),
            None => warn!("Audio endpoint of stream {} has no mixer to leave", self.core.key()),
        }
    }
}

impl Stream for AudioStream {
    fn core(&self) -> &StreamCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StreamCore {
        &mut self.core
    }

    fn prepare(&mut self, _group: &mut StreamsGroup) -> bool {
        self.core.begin_prepare();
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.prepared = true;
        }
        false
    }

    fn finish_prepare(&mut self) {
        self.core.end_prepare();
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.prepared = false;
        }
    }

    fn configure(&mut self, _ctx: &OfferAnswerContext, _group: &StreamsGroup) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.mic_muted = self.mic_muted;
            pipeline.speaker_muted = self.speaker_muted;
            pipeline.playback_gain_db = self.playback_gain_db;
        }
    }

    fn render(&mut self, rctx: &RenderContext<'_>, group: &mut StreamsGroup) -> RenderOutcome {
        let ctx = rctx.offer_answer;
        if self.pipeline.is_none() {
            error!("Audio stream {} was finished, cannot render", self.core.key());
            return RenderOutcome::Stopped(StopReason::Finished);
        }

        match self.core.handle_basic_changes(ctx, rctx.target_state) {
            BasicChange::Unchanged => return RenderOutcome::Unchanged,
            BasicChange::Unmuted => {
                info!("Early media finished, unmuting audio input");
                if let Some(pipeline) = self.pipeline.as_mut() {
                    pipeline.mic_muted = self.mic_muted;
                }
                return RenderOutcome::Unchanged;
            }
            BasicChange::NeedsRestart => self.stop(group),
            BasicChange::NotRunning => {}
        }

        let Some(result) = ctx.result.as_ref() else {
            error!("Unable to find audio stream");
            self.stop(group);
            return RenderOutcome::Stopped(StopReason::MissingResultDescription);
        };
        let Some(payload) = result.used_payload_type().cloned() else {
            error!("No payload types accepted for audio stream !");
            self.stop(group);
            return RenderOutcome::Stopped(StopReason::NoPayload);
        };
        let Some(mut direction) = local_direction(result.direction, true, true) else {
            warn!("Audio stream is inactive");
            self.stop(group);
            return RenderOutcome::Stopped(StopReason::Inactive);
        };
        match result.multicast_role {
            MulticastRole::Receiver => direction = StreamDirection::RecvOnly,
            MulticastRole::Sender => direction = StreamDirection::SendOnly,
            MulticastRole::None => {}
        }

        let is_main = group.main_stream_index(MediaType::Audio) == Some(self.core.index());
        if is_main {
            group.media_state_mut().used_audio_codec = Some(payload.clone());
        }
        self.mixer = checked_mixer(group.mixer_provider(), MediaType::Audio, self.core.key());

        let io = if rctx.config.rtp_io {
            MediaIo::rtp()
        } else if self.mixer.is_some() {
            MediaIo::void()
        } else {
            MediaIo {
                input: IoInput::Default,
                output: IoOutput::Default,
            }
        };

        self.configure(ctx, group);
        let destination = ctx.rtp_destination().unwrap_or_default();
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.direction = direction;
            self.core.begin_render(ctx, rctx.config, pipeline.sessions_mut());
            if self.core.is_muted() {
                pipeline.mic_muted = true;
            }
            pipeline.start_from_io(StartParams { payload, destination }, io);
        }
        self.core.started();
        self.start_zrtp(ctx, group);
        self.connect_to_mixer(rctx.target_state);
        RenderOutcome::Started
    }

    fn stop(&mut self, group: &mut StreamsGroup) {
        self.core.stop();
        self.disconnect_from_mixer();
        if let Some(pipeline) = self.pipeline.take() {
            let linked = pipeline.linked_video;
            let mut renewed = AudioPipeline::with_sessions(pipeline.stop());
            renewed.linked_video = linked;
            self.pipeline = Some(renewed);
        }
        if group.main_stream_index(MediaType::Audio) == Some(self.core.index()) {
            group.media_state_mut().used_audio_codec = None;
        }
    }

    fn finish(&mut self, group: &mut StreamsGroup) {
        self.disconnect_from_mixer();
        if let Some(pipeline) = self.pipeline.take() {
            drop(pipeline.stop());
        }
        self.core.finish(group.media_core().ports());
    }

    fn handle_event(&mut self, event: MediaEvent, _group: &mut StreamsGroup) {
        match event {
            MediaEvent::JitterUpdateForNack => self.core.network_monitor_mut().confirm_nack_sent(),
            MediaEvent::BandwidthEstimate(bps) => {
                debug!("Audio bandwidth estimate {} bit/s ignored", bps);
            }
            other => warn!("Unhandled audio event {:?}", other),
        }
    }

    fn run_alert_monitors(&mut self) {
        if let Some(pipeline) = self.pipeline.as_ref() {
            self.core.stats_mut().rtp = pipeline.rtp;
        }
        self.core.run_network_monitor();
    }

    fn is_encrypted(&self) -> bool {
        self.pipeline
            .as_ref()
            .map(|p| p.sessions().is_encrypted())
            .unwrap_or(false)
    }

    fn pipeline_id(&self) -> Option<PipelineId> {
        self.pipeline.as_ref().map(|p| p.id())
    }

    fn sessions(&self) -> Option<&SecuritySessions> {
        self.pipeline.as_ref().map(|p| p.sessions())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl AudioControl for AudioStream {
    fn set_mic_muted(&mut self, muted: bool) {
        self.mic_muted = muted;
        let early_muted = self.core.is_muted();
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.mic_muted = muted || early_muted;
        }
    }

    fn mic_muted(&self) -> bool {
        self.mic_muted
    }

    fn set_speaker_muted(&mut self, muted: bool) {
        self.speaker_muted = muted;
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.speaker_muted = muted;
        }
    }

    fn speaker_muted(&self) -> bool {
        self.speaker_muted
    }

    fn set_playback_gain_db(&mut self, gain: f32) {
        self.playback_gain_db = gain;
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.playback_gain_db = gain;
        }
    }

    fn playback_gain_db(&self) -> f32 {
        self.playback_gain_db
    }

    fn record_volume(&self) -> f32 {
        match self.pipeline.as_ref() {
            Some(p) if p.is_running() => p.record_volume,
            _ => VOLUME_UNKNOWN_DBM0,
        }
    }

    fn play_volume(&self) -> f32 {
        match self.pipeline.as_ref() {
            Some(p) if p.is_running() => p.play_volume,
            _ => VOLUME_UNKNOWN_DBM0,
        }
    }

    fn link_video(&mut self, video: PipelineId) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            debug!("Linking audio pipeline {:?} with video {:?}", pipeline.id(), video);
            pipeline.linked_video = Some(video);
        }
    }

    fn unlink_video(&mut self, video: PipelineId) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            if pipeline.linked_video == Some(video) {
                pipeline.linked_video = None;
            }
        }
    }
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream")
            .field("core", &self.core)
            .field("pipeline", &self.pipeline)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
