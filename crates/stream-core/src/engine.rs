//! Model of the native media engine objects driven by streams
//!
//! A pipeline is what the engine builds for one RTP stream. Stopping a
//! pipeline destroys it: the stream immediately builds a new one from the
//! [`SecuritySessions`] handed back by [`VideoPipeline::stop`] so a later
//! restart keeps its keys.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::offer_answer::{PayloadType, RtpDestination};
use crate::security::SecuritySessions;
use crate::types::{CameraId, DisplayMode, StreamDirection, VideoContent, VideoSize, WindowId};
use crate::video_source::ScreenSharingDescriptor;

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one engine pipeline instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineId(pub u64);

impl PipelineId {
    fn next() -> Self {
        PipelineId(NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Input of a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoInput {
    /// Engine default (sound card)
    Default,
    Rtp,
    Camera(CameraId),
    ScreenSharing(ScreenSharingDescriptor),
    /// Frames pushed by the itc sink of another pipeline
    Itc(PipelineId),
    /// Fed by a conference mixer
    Void,
}

/// Output of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutput {
    Default,
    Rtp,
    Void,
}

/// Input and output of a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaIo {
    pub input: IoInput,
    pub output: IoOutput,
}

impl MediaIo {
    /// RTP in, RTP out
    pub fn rtp() -> Self {
        Self {
            input: IoInput::Rtp,
            output: IoOutput::Rtp,
        }
    }

    /// Mixer-driven endpoint
    pub fn void() -> Self {
        Self {
            input: IoInput::Void,
            output: IoOutput::Void,
        }
    }
}

/// Capture filter feeding a video pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFilter {
    Camera(CameraId),
    StaticImage(PathBuf),
    ScreenSharing(ScreenSharingDescriptor),
    /// Frames forwarded from another pipeline
    Forwarded(PipelineId),
}

/// Capture filter kept alive by a stopped preview
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewSource {
    pub camera: CameraId,
}

/// Payload and destination a pipeline is started with
#[derive(Debug, Clone, PartialEq)]
pub struct StartParams {
    pub payload: PayloadType,
    pub destination: RtpDestination,
}

/// RTP reception counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtpCounters {
    pub packets_received: u64,
    pub cum_packet_loss: u64,
    /// Packets found missing before retransmission requests
    pub lost_before_nack: u64,
}

/// Engine-side video stream
#[derive(Debug)]
pub struct VideoPipeline {
    id: PipelineId,
    sessions: SecuritySessions,
    running: bool,
    start: Option<StartParams>,
    pub io: Option<MediaIo>,
    pub camera: Option<CameraId>,
    pub source_filter: Option<SourceFilter>,
    pub reused_preview: bool,
    pub direction: StreamDirection,
    pub content: VideoContent,
    pub label: String,
    pub display_mode: DisplayMode,
    pub preview_display_mode: DisplayMode,
    pub native_window_id: Option<WindowId>,
    pub native_preview_window_id: Option<WindowId>,
    pub local_screen_sharing: bool,
    pub fallback_to_dummy_codec: bool,
    pub freeze_on_error: bool,
    pub display_filter_auto_rotate: bool,
    pub display_filter: Option<String>,
    pub preset: Option<String>,
    pub fps: f32,
    pub static_image_fps_optimization: bool,
    pub sent_size: Option<VideoSize>,
    pub sent_size_max: Option<VideoSize>,
    pub preview_size: Option<VideoSize>,
    pub max_network_bitrate: Option<u32>,
    pub self_view: bool,
    pub use_preview_window: bool,
    pub device_rotation: i32,
    pub frame_marking_extension_id: Option<u8>,
    pub retransmission_on_nack: bool,
    pub csrc_notifications: bool,
    pub avpf: bool,
    pub prepared: bool,
    /// The itc sink of this pipeline is plugged
    pub itc_sink_linked: bool,
    /// Pipeline receiving frames from our itc sink
    pub itc_sink_target: Option<PipelineId>,
    pub zoom: Option<(f32, f32, f32)>,
    pub vfu_sent: u32,
    pub fir_sent: u32,
    pub pending_snapshot: Option<PathBuf>,
    pub last_decoding_error_report_ms: Option<u64>,
    /// Measured outgoing frame rate
    pub sent_fps: f32,
    pub received_fps: f32,
    pub received_size: VideoSize,
    pub rtp: RtpCounters,
}

impl VideoPipeline {
    /// Create a new pipeline with fresh security sessions
    pub fn new() -> Self {
        Self::with_sessions(SecuritySessions::default())
    }

    /// Create a new pipeline reusing existing security sessions
    pub fn with_sessions(sessions: SecuritySessions) -> Self {
        let id = PipelineId::next();
        debug!("Creating video pipeline {:?}", id);
        Self {
            id,
            sessions,
            running: false,
            start: None,
            io: None,
            camera: None,
            source_filter: None,
            reused_preview: false,
            direction: StreamDirection::SendRecv,
            content: VideoContent::Default,
            label: String::new(),
            display_mode: DisplayMode::Hybrid,
            preview_display_mode: DisplayMode::Hybrid,
            native_window_id: None,
            native_preview_window_id: None,
            local_screen_sharing: false,
            fallback_to_dummy_codec: true,
            freeze_on_error: true,
            display_filter_auto_rotate: false,
            display_filter: None,
            preset: None,
            fps: 0.0,
            static_image_fps_optimization: true,
            sent_size: None,
            sent_size_max: None,
            preview_size: None,
            max_network_bitrate: None,
            self_view: true,
            use_preview_window: false,
            device_rotation: 0,
            frame_marking_extension_id: None,
            retransmission_on_nack: false,
            csrc_notifications: false,
            avpf: false,
            prepared: false,
            itc_sink_linked: false,
            itc_sink_target: None,
            zoom: None,
            vfu_sent: 0,
            fir_sent: 0,
            pending_snapshot: None,
            last_decoding_error_report_ms: None,
            sent_fps: 0.0,
            received_fps: 0.0,
            received_size: VideoSize::default(),
            rtp: RtpCounters::default(),
        }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn sessions(&self) -> &SecuritySessions {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut SecuritySessions {
        &mut self.sessions
    }

    /// Payload and destination of the current run
    pub fn start_params(&self) -> Option<&StartParams> {
        self.start.as_ref()
    }

    /// Start with the given input and output
    pub fn start_from_io(&mut self, params: StartParams, io: MediaIo, camera: Option<CameraId>) {
        debug!("Starting video pipeline {:?} with input {:?}", self.id, io.input);
        self.source_filter = match &io.input {
            IoInput::Camera(cam) => Some(SourceFilter::Camera(cam.clone())),
            IoInput::ScreenSharing(desc) => Some(SourceFilter::ScreenSharing(desc.clone())),
            _ => None,
        };
        self.camera = camera;
        self.io = Some(io);
        self.start = Some(params);
        self.running = true;
    }

    /// Start reusing the capture filter of a stopped preview
    pub fn start_with_source(&mut self, params: StartParams, camera: Option<CameraId>, source: PreviewSource) {
        debug!("Starting video pipeline {:?} with reused preview source", self.id);
        self.source_filter = Some(SourceFilter::Camera(source.camera));
        self.camera = camera;
        self.io = Some(MediaIo {
            input: IoInput::Default,
            output: IoOutput::Default,
        });
        self.reused_preview = true;
        self.start = Some(params);
        self.running = true;
    }

    /// Destroy the pipeline, handing its security sessions back
    pub fn stop(self) -> SecuritySessions {
        debug!("Stopping video pipeline {:?}", self.id);
        self.sessions
    }

    pub fn change_camera(&mut self, camera: CameraId) {
        self.source_filter = Some(SourceFilter::Camera(camera.clone()));
        self.camera = Some(camera);
    }

    pub fn change_source_filter(&mut self, filter: SourceFilter) {
        self.source_filter = Some(filter);
    }

    /// Reconfigure an existing screen-sharing filter in place
    pub fn set_screen_sharing_descriptor(&mut self, desc: ScreenSharingDescriptor) {
        if let Some(SourceFilter::ScreenSharing(current)) = self.source_filter.as_mut() {
            *current = desc;
        }
    }

    pub fn link_itc_sink(&mut self) {
        self.itc_sink_linked = true;
    }

    pub fn connect_itc_sink(&mut self, target: PipelineId) {
        self.itc_sink_target = Some(target);
    }

    /// Whether a decoding error should be reported again after `interval_ms`
    pub fn is_decoding_error_to_be_reported(&self, now_ms: u64, interval_ms: u64) -> bool {
        match self.last_decoding_error_report_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= interval_ms,
        }
    }

    pub fn decoding_error_reported(&mut self, now_ms: u64) {
        self.last_decoding_error_report_ms = Some(now_ms);
    }

    pub fn decoding_error_recovered(&mut self) {
        self.last_decoding_error_report_ms = None;
    }

    /// Whether decoded frames are displayed
    pub fn has_output(&self) -> bool {
        self.running && self.direction.receives()
    }

    pub fn send_vfu(&mut self) {
        self.vfu_sent += 1;
    }

    pub fn send_fir(&mut self) {
        self.fir_sent += 1;
    }
}

impl Default for VideoPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine-side audio stream
#[derive(Debug)]
pub struct AudioPipeline {
    id: PipelineId,
    sessions: SecuritySessions,
    running: bool,
    start: Option<StartParams>,
    pub io: Option<MediaIo>,
    pub direction: StreamDirection,
    pub mic_muted: bool,
    pub speaker_muted: bool,
    pub playback_gain_db: f32,
    /// Measured capture level in dBm0
    pub record_volume: f32,
    /// Measured playback level in dBm0
    pub play_volume: f32,
    /// Video pipeline synchronized with this one
    pub linked_video: Option<PipelineId>,
    pub prepared: bool,
    pub rtp: RtpCounters,
}

impl AudioPipeline {
    /// Create a new pipeline with fresh security sessions
    pub fn new() -> Self {
        Self::with_sessions(SecuritySessions::default())
    }

    /// Create a new pipeline reusing existing security sessions
    pub fn with_sessions(sessions: SecuritySessions) -> Self {
        Self {
            id: PipelineId::next(),
            sessions,
            running: false,
            start: None,
            io: None,
            direction: StreamDirection::SendRecv,
            mic_muted: false,
            speaker_muted: false,
            playback_gain_db: 0.0,
            record_volume: crate::VOLUME_UNKNOWN_DBM0,
            play_volume: crate::VOLUME_UNKNOWN_DBM0,
            linked_video: None,
            prepared: false,
            rtp: RtpCounters::default(),
        }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn sessions(&self) -> &SecuritySessions {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut SecuritySessions {
        &mut self.sessions
    }

    pub fn start_params(&self) -> Option<&StartParams> {
        self.start.as_ref()
    }

    pub fn start_from_io(&mut self, params: StartParams, io: MediaIo) {
        debug!("Starting audio pipeline {:?} with input {:?}", self.id, io.input);
        self.io = Some(io);
        self.start = Some(params);
        self.running = true;
    }

    /// Destroy the pipeline, handing its security sessions back
    pub fn stop(self) -> SecuritySessions {
        debug!("Stopping audio pipeline {:?}", self.id);
        self.sessions
    }
}

impl Default for AudioPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::ZrtpContext;

    #[test]
    fn stop_hands_sessions_back() {
        let mut pipeline = VideoPipeline::new();
        pipeline.sessions_mut().zrtp = Some(ZrtpContext::new(false));
        let zrtp_id = pipeline.sessions().zrtp.as_ref().map(|z| z.id());
        let old_id = pipeline.id();
        let renewed = VideoPipeline::with_sessions(pipeline.stop());
        assert_ne!(renewed.id(), old_id);
        assert_eq!(renewed.sessions().zrtp.as_ref().map(|z| z.id()), zrtp_id);
        assert!(!renewed.is_running());
    }

    #[test]
    fn decoding_errors_are_throttled() {
        let mut pipeline = VideoPipeline::new();
        assert!(pipeline.is_decoding_error_to_be_reported(0, 5000));
        pipeline.decoding_error_reported(1000);
        assert!(!pipeline.is_decoding_error_to_be_reported(5999, 5000));
        assert!(pipeline.is_decoding_error_to_be_reported(6000, 5000));
        pipeline.decoding_error_recovered();
        assert!(pipeline.is_decoding_error_to_be_reported(1001, 5000));
    }
}
