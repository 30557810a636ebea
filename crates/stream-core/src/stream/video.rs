//! Video stream of a call
//!
//! Besides starting the pipeline this stream picks its input (camera,
//! screen sharing, the main stream for thumbnails or the conference mixer),
//! resolves display modes and window ids from the participant it belongs to,
//! and runs the video alert monitors.

use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{
    local_direction, AudioControl, BasicChange, RenderContext, RenderOutcome, StopReason, Stream, StreamCore,
    VideoControl,
};
use crate::alert::{VideoBandwidthAlertMonitor, VideoQualityAlertMonitor};
use crate::config::StreamConfig;
use crate::engine::{IoInput, IoOutput, MediaIo, PipelineId, PreviewSource, SourceFilter, StartParams, VideoPipeline};
use crate::error::{Result, StreamError};
use crate::events::MediaEvent;
use crate::group::StreamsGroup;
use crate::media_core::MediaCore;
use crate::mixer::{checked_mixer, MediaEndpoint, StreamMixer};
use crate::offer_answer::OfferAnswerContext;
use crate::screen_sharing::ScreenSharingService;
use crate::security::{MediaEncryption, SecuritySessions, ZrtpContext};
use crate::session::DeviceInfo;
use crate::stats::VideoStats;
use crate::types::{CallState, CameraId, MediaType, MulticastRole, StreamDirection, VideoContent, VideoSize, WindowId};
use crate::video_source::VideoSourceDescriptor;
use crate::window::{
    choose_window_id, preview_window_assigned, resolve_display_modes, DisplayModeInputs, WindowIdInputs,
    WindowIdSource,
};

/// Interval between two VFU requests caused by decoding errors
const DECODING_ERROR_REPORT_INTERVAL_MS: u64 = 5000;

const THUMBNAIL_BITRATE: u32 = 80_000;
const THUMBNAIL_FPS: f32 = 20.0;
const THUMBNAIL_SIZE: VideoSize = VideoSize::new(160, 120);

/// Video stream of a call
///
/// Besides the negotiated RTP flow, a video stream decides where its frames
/// come from (camera, still image, shared screen, another call, or the itc
/// sink of its main stream when it is a thumbnail) and which native window
/// it renders into.
pub struct VideoStream {
    core: StreamCore,
    pipeline: Option<VideoPipeline>,
    media: Arc<MediaCore>,
    mixer: Option<Arc<dyn StreamMixer>>,
    endpoint: Option<MediaEndpoint>,
    native_window_id: Option<WindowId>,
    native_preview_window_id: Option<WindowId>,
    video_source: Option<VideoSourceDescriptor>,
    camera_enabled: bool,
    video_monitor: VideoQualityAlertMonitor,
    bandwidth_monitor: VideoBandwidthAlertMonitor,
}

impl VideoStream {
    /// Create a video stream, installing the screen-sharing service of the group
    pub fn new(core: StreamCore, group: &mut StreamsGroup) -> Self {
        group.install_shared_service::<ScreenSharingService>();
        let alerts = group.alert_context();
        Self {
            core,
            pipeline: Some(VideoPipeline::new()),
            media: group.media_core().clone(),
            mixer: None,
            endpoint: None,
            native_window_id: None,
            native_preview_window_id: None,
            video_source: None,
            camera_enabled: true,
            video_monitor: VideoQualityAlertMonitor::new(alerts.clone()),
            bandwidth_monitor: VideoBandwidthAlertMonitor::new(alerts),
        }
    }

    pub fn pipeline(&self) -> Option<&VideoPipeline> {
        self.pipeline.as_ref()
    }

    pub fn pipeline_mut(&mut self) -> Option<&mut VideoPipeline> {
        self.pipeline.as_mut()
    }

    pub fn video_source(&self) -> Option<&VideoSourceDescriptor> {
        self.video_source.as_ref()
    }

    pub fn endpoint(&self) -> Option<&MediaEndpoint> {
        self.endpoint.as_ref()
    }

    pub fn video_monitor(&self) -> &VideoQualityAlertMonitor {
        &self.video_monitor
    }

    pub fn bandwidth_monitor(&self) -> &VideoBandwidthAlertMonitor {
        &self.bandwidth_monitor
    }

    fn source_is_screen_sharing(&self) -> bool {
        self.video_source
            .as_ref()
            .map(|s| s.is_screen_sharing())
            .unwrap_or(false)
    }

    fn local_screen_sharing(&self) -> bool {
        self.pipeline
            .as_ref()
            .map(|p| p.local_screen_sharing)
            .unwrap_or(false)
    }

    /// Capture device for `target_state`
    ///
    /// The still-image camera replaces the real one while paused, muted for
    /// early media, or with the camera disabled.
    pub fn video_device(&self, target_state: CallState) -> Option<CameraId> {
        if target_state.is_paused() || self.core.is_muted() || !self.camera_enabled {
            self.media.static_image_camera()
        } else {
            self.media.default_camera()
        }
    }

    /// Switch local screen sharing for the whole call
    ///
    /// Only a real change of the shared state touches the pipeline: on
    /// activation the display handle moves to the preview, on deactivation
    /// both handles get their own value back. Returns whether it changed.
    pub fn enable_local_screen_sharing(&mut self, value: bool, group: &mut StreamsGroup) -> bool {
        let changed = group
            .shared_service_mut::<ScreenSharingService>()
            .map(|s| s.update_local_screen_sharing(value))
            .unwrap_or(false);
        if !changed {
            return false;
        }
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.local_screen_sharing = value;
            if value {
                debug!("Enabling screen sharing, preview id set to {:?}", self.native_window_id);
                pipeline.native_window_id = None;
                pipeline.native_preview_window_id = self.native_window_id;
            } else {
                debug!(
                    "Disabling screen sharing, preview id set to {:?} and window id to {:?}",
                    self.native_preview_window_id, self.native_window_id
                );
                pipeline.native_preview_window_id = self.native_preview_window_id;
                pipeline.native_window_id = self.native_window_id;
            }
        }
        true
    }

    /// Replace the source of captured frames
    ///
    /// A failed lookup leaves the previous source in place, except for an
    /// unknown kind which clears it.
    pub fn set_video_source(&mut self, descriptor: Option<VideoSourceDescriptor>) -> Result<()> {
        let index = self.core.index();
        let Some(pipeline) = self.pipeline.as_mut() else {
            error!("Could not find video stream while attempting to change video source on stream {}", index);
            return Err(StreamError::NoPipeline(index));
        };
        let Some(descriptor) = descriptor else {
            self.video_source = None;
            return Ok(());
        };
        match &descriptor {
            VideoSourceDescriptor::Call(call) => {
                let Some(source) = self.media.calls().main_video_pipeline(call) else {
                    error!(
                        "Could not find video stream of call {} while attempting to change video source on stream {}",
                        call, index
                    );
                    return Err(StreamError::SourceUnavailable(call.to_string()));
                };
                pipeline.change_source_filter(SourceFilter::Forwarded(source));
            }
            VideoSourceDescriptor::Camera(id) => {
                let Some(camera) = self.media.find_camera(id) else {
                    error!(
                        "Could not find camera id \"{}\" while attempting to change video source on stream {}",
                        id, index
                    );
                    return Err(StreamError::CameraNotFound(id.clone()));
                };
                pipeline.change_camera(camera);
            }
            VideoSourceDescriptor::Image(path) => {
                if self.media.static_image_camera().is_none() {
                    error!(
                        "Could not create filter for image while attempting to change video source on stream {}",
                        index
                    );
                    return Err(StreamError::ImageSource(path.display().to_string()));
                }
                pipeline.change_source_filter(SourceFilter::StaticImage(path.clone()));
            }
            VideoSourceDescriptor::ScreenSharing(desc) => {
                let in_place = pipeline
                    .source_filter
                    .as_ref()
                    .map(|f| matches!(f, SourceFilter::ScreenSharing(_)));
                match in_place {
                    Some(true) => pipeline.set_screen_sharing_descriptor(desc.clone()),
                    Some(false) => pipeline.change_source_filter(SourceFilter::ScreenSharing(desc.clone())),
                    None => debug!("Stream {} has no source filter yet, screen sharing applies at start", index),
                }
            }
            VideoSourceDescriptor::Unknown => {
                error!("Cannot change video source with an unknown video source type");
                self.video_source = None;
                return Err(StreamError::UnknownSource);
            }
        }
        self.video_source = Some(descriptor);
        Ok(())
    }

    fn update_window_id(
        &mut self,
        group: &StreamsGroup,
        device: Option<&DeviceInfo>,
        label: &str,
        is_me: bool,
        is_screen_sharing: bool,
        is_thumbnail: bool,
    ) {
        let core_preview = self.media.preview_window_id();
        let session_window = match (device, group.resolver()) {
            (None, Some(resolver)) if !label.is_empty() => resolver.participant_window_id(label),
            _ => None,
        };
        let inputs = WindowIdInputs {
            explicit: self.native_window_id,
            is_me,
            is_thumbnail,
            label,
            device_found: device.is_some(),
            device_window: device.and_then(|d| d.window_id),
            session_window,
            core_preview,
            core_video_window: self.media.video_window_id(),
            fallback_enabled: group.config().window_id_fallback,
        };
        match choose_window_id(&inputs) {
            Some(choice) => match choice.source {
                WindowIdSource::Explicit => self.set_native_window_id(choice.window),
                WindowIdSource::CorePreview => {
                    debug!("Stream {} renders into the core preview window", self.core.key())
                }
                WindowIdSource::Participant | WindowIdSource::Fallback => self.set_native_window_id(choice.window),
            },
            None => warn!("Video stream {} does not set native window id", self.core.key()),
        }
        if core_preview.is_some() {
            if preview_window_assigned(is_me, is_screen_sharing, is_thumbnail, !label.is_empty()) {
                self.set_native_preview_window_id(core_preview);
            } else {
                self.set_native_preview_window_id(None);
            }
        }
    }

    fn discard_preview_source(&self, source: Option<PreviewSource>) {
        if let Some(source) = source {
            warn!("Video preview of {} not reused: destroying it", source.camera);
        }
    }

    fn init_zrtp(&mut self, group: &StreamsGroup) {
        let master = group
            .main_stream_index(MediaType::Audio)
            .and_then(|i| group.audio_stream(i))
            .and_then(|a| a.sessions())
            .and_then(|s| s.zrtp.clone());
        let Some(master) = master else {
            error!(
                "Unable to initiate ZRTP session because no audio stream is attached to video stream {}.",
                self.core.key()
            );
            return;
        };
        let go_clear = group.config().zrtp_go_clear;
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.sessions_mut().zrtp = Some(ZrtpContext::multistream(&master, go_clear));
        }
    }

    fn start_zrtp(&mut self, group: &StreamsGroup) {
        if !group.media_state().is_encryption_accepted(MediaEncryption::Zrtp) {
            return;
        }
        let has_context = self
            .pipeline
            .as_ref()
            .map(|p| p.sessions().zrtp.is_some())
            .unwrap_or(false);
        if !has_context {
            self.init_zrtp(group);
        }
        match self.pipeline.as_mut().and_then(|p| p.sessions_mut().zrtp.as_mut()) {
            Some(zrtp) => zrtp.start(),
            None => error!("Error while enabling zrtp on video stream: ZRTP context is NULL"),
        }
    }

    fn connect_to_mixer(&mut self, target_state: CallState) {
        let (Some(mixer), Some(pipeline)) = (self.mixer.as_ref(), self.pipeline.as_ref()) else {
            return;
        };
        if target_state != CallState::StreamsRunning {
            return;
        }
        if let Some(port) = mixer.as_video() {
            let endpoint = MediaEndpoint {
                stream: self.core.key(),
                pipeline: pipeline.id(),
                content: pipeline.content,
                label: pipeline.label.clone(),
            };
            if port.connect_endpoint(endpoint.clone(), pipeline.content == VideoContent::Thumbnail) {
                self.endpoint = Some(endpoint);
            } else {
                warn!("Video stream {} left out of the mixer", self.core.key());
            }
        }
    }

    fn disconnect_from_mixer(&mut self) {
        let Some(endpoint) = self.endpoint.take() else {
            return;
        };
        match self.mixer.as_ref().and_then(|m| m.as_video()) {
            Some(port) => port.disconnect_endpoint(&endpoint),
            None => warn!("Video endpoint of stream {} has no mixer to leave", self.core.key()),
        }
    }

    fn apply_configuration(
        &mut self,
        config: &StreamConfig,
        group: &StreamsGroup,
        in_conference: bool,
        is_main: bool,
    ) {
        let local_screen_sharing = group
            .shared_service::<ScreenSharingService>()
            .map(|s| s.local_screen_sharing_enabled())
            .unwrap_or(false);
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };
        pipeline.fallback_to_dummy_codec = config.fallback_to_dummy_codec;
        pipeline.display_filter_auto_rotate = config.display_filter_auto_rotate;
        if let Some(filter) = config.display_filter.as_ref() {
            pipeline.display_filter = Some(filter.clone());
        }
        if let Some(preview) = config.preview_size.as_ref() {
            pipeline.preview_size = Some(preview.size);
        }
        pipeline.fps = config.preferred_fps;
        if config.nowebcam_uses_normal_fps {
            pipeline.static_image_fps_optimization = false;
        }
        if is_main {
            pipeline.local_screen_sharing = local_screen_sharing;
        }

        let max = if in_conference {
            config.max_conference_size.as_ref().map(|d| d.size)
        } else {
            None
        };
        if let Some(max) = max {
            pipeline.sent_size_max = Some(max);
        }
        if let Some(preferred) = config.preferred_video_size.as_ref() {
            let size = match max {
                Some(max) if max.width < preferred.size.width && max.height < preferred.size.height => max,
                _ => preferred.size,
            };
            pipeline.sent_size = Some(size);
        }
        pipeline.self_view = config.self_view;
    }
}

impl Stream for VideoStream {
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

    fn configure(&mut self, ctx: &OfferAnswerContext, _group: &StreamsGroup) {
        let has_mixer = self.mixer.is_some();
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };
        let mut content = ctx.local.video_content();
        if has_mixer && content == VideoContent::Default && pipeline.direction == StreamDirection::SendRecv {
            info!("No content given, assuming active speaker mode.");
            content = VideoContent::Speaker;
        }
        pipeline.content = content;
        if !ctx.local.label.is_empty() {
            pipeline.label = ctx.local.label.clone();
        }
    }

    fn render(&mut self, rctx: &RenderContext<'_>, group: &mut StreamsGroup) -> RenderOutcome {
        let ctx = rctx.offer_answer;
        let config = rctx.config;
        let target_state = rctx.target_state;
        let index = self.core.index();
        let label = ctx.local.label.as_str();

        if self.pipeline.is_none() {
            error!("Video stream {} was finished, cannot render", self.core.key());
            return RenderOutcome::Stopped(StopReason::Finished);
        }
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.fallback_to_dummy_codec = config.fallback_to_dummy_codec;
        }

        let mut preview_source = None;
        if let Some(preview) = self.media.take_preview() {
            if config.reuse_preview_source {
                preview_source = Some(preview.stop_reuse_source());
            } else {
                preview.stop();
            }
        }

        let change = self.core.handle_basic_changes(ctx, target_state);
        if change == BasicChange::NeedsRestart {
            self.stop(group);
        }
        let basic_changes_handled = matches!(change, BasicChange::Unchanged | BasicChange::Unmuted);

        let is_thumbnail = ctx.local.video_content() == VideoContent::Thumbnail;
        let is_main = group.main_stream_index(MediaType::Video) == Some(index);
        let resolver = group.resolver().cloned();
        let in_conference = resolver.as_ref().map(|r| r.in_conference()).unwrap_or(false);
        let conference_screen_sharing =
            in_conference && resolver.as_ref().map(|r| r.conference_screen_sharing()).unwrap_or(false);

        let mut is_me = false;
        let mut is_screen_sharing = false;
        let mut local_screen_sharing_changed = false;
        let mut camera_changed = false;
        let mut aux_stream = None;
        let mut device = resolver
            .as_ref()
            .and_then(|r| r.participant_device(MediaType::Video, label));
        match device.as_ref() {
            Some(found) => is_screen_sharing = found.is_screen_sharing,
            None if in_conference => {
                device = resolver.as_ref().and_then(|r| r.me_device(MediaType::Video, label));
                is_me = device.is_some();
                is_screen_sharing = device.as_ref().map(|d| d.is_screen_sharing).unwrap_or(false);
                if is_me && is_thumbnail {
                    if let Some(main) = group.main_stream_index(MediaType::Video) {
                        aux_stream = Some(main);
                        let current_camera = self.pipeline.as_ref().and_then(|p| p.camera.clone());
                        let sharing = is_screen_sharing;
                        if let Some((changed, moved)) = group.with_stream::<VideoStream, _, _>(main, |aux, g| {
                            let changed = aux.enable_local_screen_sharing(sharing, g);
                            let moved = aux.source_is_screen_sharing()
                                && current_camera != aux.video_device(target_state);
                            (changed, moved)
                        }) {
                            local_screen_sharing_changed = changed;
                            camera_changed = !changed && sharing && moved;
                        }
                    }
                } else if is_me {
                    aux_stream = resolver.as_ref().and_then(|r| r.thumbnail_stream_index());
                    local_screen_sharing_changed = self.enable_local_screen_sharing(is_screen_sharing, group);
                }
            }
            None => {}
        }

        let modes = resolve_display_modes(
            DisplayModeInputs {
                is_screen_sharing,
                is_me,
                is_thumbnail,
                has_label: !label.is_empty(),
                is_main,
                conference_screen_sharing,
            },
            config,
        );
        let display_mode_changed = self
            .pipeline
            .as_ref()
            .map(|p| p.display_mode != modes.display || p.preview_display_mode != modes.preview)
            .unwrap_or(false);

        if basic_changes_handled {
            if change == BasicChange::Unmuted {
                info!("Early media finished, unmuting video input...");
                let current = self.pipeline.as_ref().and_then(|p| p.camera.clone());
                let camera = self.video_device(target_state);
                camera_changed = current.is_some() && camera.is_some() && current != camera;
            }
            let current_label = self.pipeline.as_ref().map(|p| p.label.clone()).unwrap_or_default();
            if !label.is_empty() && label != current_label {
                info!(
                    "Handling label change - previously it was {} and now it is {}",
                    current_label, label
                );
                self.set_native_window_id(None);
                if let Some(pipeline) = self.pipeline.as_mut() {
                    pipeline.label = label.to_string();
                }
                self.core.set_label(label);
            }
            if !camera_changed && !local_screen_sharing_changed && !display_mode_changed {
                if is_me {
                    self.update_window_id(group, device.as_ref(), label, is_me, is_screen_sharing, is_thumbnail);
                }
                self.discard_preview_source(preview_source);
                return RenderOutcome::Unchanged;
            }
        }

        if local_screen_sharing_changed {
            info!(
                "Screen sharing mode changed: screen sharing={}. Stopping stream {} and auxiliary stream {:?}",
                is_screen_sharing, index, aux_stream
            );
            self.stop(group);
            if let Some(aux) = aux_stream.filter(|a| *a != index) {
                group.with_stream::<VideoStream, _, _>(aux, |s, g| s.stop(g));
            }
        } else if display_mode_changed {
            info!("Display mode changed. Stopping stream {}", index);
            self.stop(group);
        } else if camera_changed {
            info!("Camera device changed. Stopping stream {}", index);
            self.stop(group);
        }

        let Some(result) = ctx.result.as_ref() else {
            error!("Unable to find video stream");
            self.stop(group);
            self.discard_preview_source(preview_source);
            return RenderOutcome::Stopped(StopReason::MissingResultDescription);
        };
        let Some(payload) = result.used_payload_type().cloned() else {
            error!("No payload types accepted for video stream !");
            self.enable_local_screen_sharing(false, group);
            self.stop(group);
            self.discard_preview_source(preview_source);
            return RenderOutcome::Stopped(StopReason::NoPayload);
        };

        self.mixer = checked_mixer(group.mixer_provider(), MediaType::Video, self.core.key());
        if is_main {
            group.media_state_mut().used_video_codec = Some(payload.clone());
        }
        self.apply_configuration(config, group, in_conference, is_main);
        self.update_window_id(group, device.as_ref(), label, is_me, is_screen_sharing, is_thumbnail);
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.use_preview_window = config.use_preview_window;
            pipeline.avpf = result.avpf;
            self.core.begin_render(ctx, config, pipeline.sessions_mut());
        }
        let camera = self.video_device(target_state);

        let Some(mut direction) = local_direction(result.direction, config.capture, config.display) else {
            self.enable_local_screen_sharing(false, group);
            warn!("Video stream is inactive");
            self.stop(group);
            self.discard_preview_source(preview_source);
            return RenderOutcome::Stopped(StopReason::Inactive);
        };
        match result.multicast_role {
            MulticastRole::Receiver => direction = StreamDirection::RecvOnly,
            MulticastRole::Sender => direction = StreamDirection::SendOnly,
            MulticastRole::None => {}
        }

        group.media_state_mut().video_enabled = true;
        let rotation = self.media.device_rotation();
        info!("Device rotation = {}", rotation);
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.direction = direction;
            pipeline.device_rotation = rotation;
            pipeline.freeze_on_error = config.freeze_on_error;
            pipeline.preset = config.video_preset.clone();
            pipeline.preview_display_mode = modes.preview;
            pipeline.display_mode = modes.display;
        }
        self.configure(ctx, group);

        let params = StartParams {
            payload: payload.clone(),
            destination: ctx.rtp_destination().unwrap_or_default(),
        };
        let has_mixer = self.mixer.is_some();
        let same_label = |s: &VideoStream| s.label() == label && s.index() != index;
        let mut reused_preview = false;
        let reusable = if config.reuse_preview_source {
            preview_source.take()
        } else {
            None
        };

        if let Some(source) = reusable {
            info!("Starting video stream {} with kept preview source", index);
            if let Some(pipeline) = self.pipeline.as_mut() {
                pipeline.start_with_source(params, camera.clone(), source);
            }
            reused_preview = true;
        } else {
            let mut io = if config.rtp_io {
                MediaIo::rtp()
            } else if has_mixer {
                MediaIo::void()
            } else {
                let input = match self.video_source.as_ref().and_then(|s| s.screen_sharing()) {
                    Some(desc) => IoInput::ScreenSharing(desc.clone()),
                    None => camera.clone().map(IoInput::Camera).unwrap_or(IoInput::Default),
                };
                MediaIo {
                    input,
                    output: IoOutput::Default,
                }
            };

            if result.frame_marking_extension_id > 0 && payload.number == 96 {
                if let Some(pipeline) = self.pipeline.as_mut() {
                    pipeline.frame_marking_extension_id = Some(result.frame_marking_extension_id);
                }
            }

            if !has_mixer && !label.is_empty() && direction == StreamDirection::SendOnly && is_thumbnail {
                match group.lookup_stream::<VideoStream, _>(same_label) {
                    Some(main) => {
                        info!("Thumbnail stream {} found stream {} with label {}", index, main.index(), label);
                        let main_camera = main.video_device(target_state);
                        match (main.source_is_screen_sharing(), main_camera, main.pipeline_id()) {
                            (true, Some(cam), _) => io.input = IoInput::Camera(cam),
                            (_, _, Some(itc)) => io.input = IoInput::Itc(itc),
                            _ => {}
                        }
                    }
                    None => error!("Thumbnail stream {} can not find a stream with label {}", index, label),
                }
                if let Some(pipeline) = self.pipeline.as_mut() {
                    pipeline.max_network_bitrate = Some(THUMBNAIL_BITRATE);
                    pipeline.content = VideoContent::Thumbnail;
                    pipeline.fps = THUMBNAIL_FPS;
                    pipeline.sent_size = Some(THUMBNAIL_SIZE);
                    pipeline.start_from_io(params, io, camera.clone());
                }
            } else {
                let peer_itc = if !has_mixer && !label.is_empty() && direction != StreamDirection::RecvOnly && !is_thumbnail
                {
                    Some(group.lookup_stream::<VideoStream, _>(same_label).and_then(|s| s.pipeline_id()))
                } else {
                    None
                };
                let mut started = None;
                if let Some(pipeline) = self.pipeline.as_mut() {
                    pipeline.start_from_io(params, io, camera.clone());
                    if let Some(target) = peer_itc {
                        pipeline.link_itc_sink();
                        if let Some(target) = target {
                            info!("Stream {} feeds thumbnail pipeline {:?} with label {}", index, target, label);
                            pipeline.connect_itc_sink(target);
                        }
                    }
                    started = Some(pipeline.id());
                }
                if let (Some(video), Some(audio)) = (started, group.main_stream_index(MediaType::Audio)) {
                    if let Some(audio) = group.audio_stream_mut(audio) {
                        audio.link_video(video);
                    }
                }
            }
        }
        self.core.started();

        if let Some(listener) = group.listener() {
            listener.on_reset_first_video_frame_decoded();
        }

        let remote_hash = ctx.remote_zrtp_hash();
        if group.media_state().negotiated_encryption == MediaEncryption::Zrtp || remote_hash.is_some() {
            let audio_encrypted = group
                .lookup_main_stream(MediaType::Audio)
                .map(|a| a.is_encrypted())
                .unwrap_or(false);
            if audio_encrypted {
                self.start_zrtp(group);
                let zrtp = self.pipeline.as_mut().and_then(|p| p.sessions_mut().zrtp.as_mut());
                if let (Some(zrtp), Some(hash)) = (zrtp, remote_hash) {
                    if let Err(e) = zrtp.set_peer_hello_hash(hash) {
                        error!("Video stream ZRTP hash mismatch: {}", e);
                    }
                }
            }
        }

        if config.retransmission_on_nack {
            if let Some(pipeline) = self.pipeline.as_mut() {
                pipeline.retransmission_on_nack = true;
            }
        }
        if !reused_preview {
            self.discard_preview_source(preview_source);
        }

        self.connect_to_mixer(target_state);
        if is_main {
            group.registration().publish_main_video(self.pipeline_id());
        }
        RenderOutcome::Started
    }

    fn stop(&mut self, group: &mut StreamsGroup) {
        self.core.stop();
        if let (Some(video), Some(audio)) = (self.pipeline_id(), group.main_stream_index(MediaType::Audio)) {
            if let Some(audio) = group.audio_stream_mut(audio) {
                audio.unlink_video(video);
            }
        }
        self.disconnect_from_mixer();
        if let Some(pipeline) = self.pipeline.take() {
            self.pipeline = Some(VideoPipeline::with_sessions(pipeline.stop()));
        }
        if group.main_stream_index(MediaType::Video) == Some(self.core.index()) {
            group.media_state_mut().used_video_codec = None;
            group.registration().publish_main_video(None);
        }
    }

    fn finish(&mut self, group: &mut StreamsGroup) {
        self.disconnect_from_mixer();
        if let Some(pipeline) = self.pipeline.take() {
            drop(pipeline.stop());
        }
        self.video_monitor.reset();
        self.bandwidth_monitor.reset();
        self.core.finish(group.media_core().ports());
    }

    fn handle_event(&mut self, event: MediaEvent, group: &mut StreamsGroup) {
        match event {
            MediaEvent::DecoderError => {
                warn!("Video decoder reported decoding errors on stream {}", self.core.key());
                let now = group.clock().now_ms();
                let Some(pipeline) = self.pipeline.as_mut() else {
                    return;
                };
                if !pipeline.avpf && pipeline.is_decoding_error_to_be_reported(now, DECODING_ERROR_REPORT_INTERVAL_MS) {
                    pipeline.decoding_error_reported(now);
                    if let Some(listener) = group.listener() {
                        listener.on_vfu_request();
                    }
                }
            }
            MediaEvent::DecoderRecovered => {
                info!("Video decoder recovered from errors");
                if let Some(pipeline) = self.pipeline.as_mut() {
                    pipeline.decoding_error_recovered();
                }
            }
            MediaEvent::FirstFrameDecoded => {
                info!("First video frame decoded successfully");
                if let Some(listener) = group.listener() {
                    listener.on_first_video_frame_decoded();
                }
            }
            MediaEvent::DecoderPictureLossRequest => {}
            MediaEvent::PreviewSizeChanged(size) => self.media.resize_video_preview(size),
            MediaEvent::DisplayError(code) => {
                if let Some(listener) = group.listener() {
                    listener.on_video_display_error(code);
                }
                if let Some(resolver) = group.resolver() {
                    if resolver.participant_device(MediaType::Video, self.core.label()).is_some() {
                        resolver.video_display_error(self.core.label(), code);
                    }
                }
            }
            MediaEvent::CameraNotWorking(name) => {
                if let Some(listener) = group.listener() {
                    listener.on_camera_not_working(&name);
                }
            }
            MediaEvent::CsrcChanged(csrc) => {
                if let Some(resolver) = group.resolver().filter(|r| r.in_conference()) {
                    resolver.notify_displayed_speaker(csrc);
                }
            }
            MediaEvent::BandwidthEstimate(bps) => {
                if group.main_stream_index(MediaType::Video) == Some(self.core.index()) {
                    self.core.stats_mut().estimated_download_bandwidth_kbps = Some((bps * 1e-3) as f32);
                }
            }
            MediaEvent::JitterUpdateForNack => self.core.network_monitor_mut().confirm_nack_sent(),
            MediaEvent::SnapshotTaken(path) => {
                if let Some(pipeline) = self.pipeline.as_mut() {
                    pipeline.pending_snapshot = None;
                }
                if let Some(listener) = group.listener() {
                    listener.on_snapshot_taken(&path);
                }
            }
            MediaEvent::Other(id) => warn!("Unhandled event {}", id),
        }
    }

    fn zrtp_started(&mut self, group: &mut StreamsGroup) {
        if !self.core.is_running() {
            return;
        }
        self.start_zrtp(group);
        if group.media_state().encryption_mandatory {
            // nothing could have been sent yet
            self.send_vfu();
        }
    }

    fn run_alert_monitors(&mut self) {
        if let Some(pipeline) = self.pipeline.as_ref() {
            let sent = self.send_stats();
            let received = self.recv_stats();
            let camera_fps = if self.camera_enabled { pipeline.sent_fps } else { -1.0 };
            self.core.stats_mut().rtp = pipeline.rtp;
            self.video_monitor.check(Some(&sent), Some(&received), camera_fps);
            self.bandwidth_monitor.check(self.core.stats());
            self.core.network_monitor_mut().check_nack_quality(&pipeline.rtp);
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

impl VideoControl for VideoStream {
    fn native_window_id(&self) -> Option<WindowId> {
        if self.native_window_id.is_some() {
            return self.native_window_id;
        }
        let pipeline = self.pipeline.as_ref()?;
        if pipeline.local_screen_sharing {
            pipeline.native_preview_window_id
        } else {
            pipeline.native_window_id
        }
    }

    fn set_native_window_id(&mut self, window: Option<WindowId>) {
        self.native_window_id = window;
        if let Some(pipeline) = self.pipeline.as_mut() {
            if pipeline.local_screen_sharing {
                pipeline.native_preview_window_id = window;
            } else {
                pipeline.native_window_id = window;
            }
        }
    }

    fn create_native_window_id(&mut self) -> Option<WindowId> {
        let pipeline = self.pipeline.as_mut()?;
        let window = self.media.create_window_id();
        if pipeline.local_screen_sharing {
            pipeline.native_preview_window_id = Some(window);
        } else {
            pipeline.native_window_id = Some(window);
        }
        Some(window)
    }

    fn native_preview_window_id(&self) -> Option<WindowId> {
        if self.native_preview_window_id.is_some() {
            return self.native_preview_window_id;
        }
        self.pipeline
            .as_ref()
            .filter(|p| !p.local_screen_sharing)
            .and_then(|p| p.native_preview_window_id)
    }

    fn set_native_preview_window_id(&mut self, window: Option<WindowId>) {
        self.native_preview_window_id = window;
        if let Some(pipeline) = self.pipeline.as_mut() {
            if !pipeline.local_screen_sharing {
                pipeline.native_preview_window_id = window;
            }
        }
    }

    fn create_native_preview_window_id(&mut self) -> Option<WindowId> {
        if self.local_screen_sharing() {
            return None;
        }
        let pipeline = self.pipeline.as_mut()?;
        let window = self.media.create_window_id();
        pipeline.native_preview_window_id = Some(window);
        Some(window)
    }

    fn zoom_video(&mut self, factor: f32, cx: f32, cy: f32) {
        let Some(pipeline) = self.pipeline.as_mut().filter(|p| p.has_output()) else {
            warn!("Could not apply zoom: video output wasn't activated");
            return;
        };
        let factor = factor.max(1.0);
        let half = 0.5 / factor;
        let clamp = |c: f32| c.max(half).min(1.0 - half);
        pipeline.zoom = Some((factor, clamp(cx), clamp(cy)));
    }

    fn take_snapshot(&mut self, path: &Path) -> Result<()> {
        let Some(pipeline) = self.pipeline.as_mut().filter(|p| p.has_output()) else {
            return Err(StreamError::OutputInactive);
        };
        debug!("Snapshot of stream {} requested to {}", self.core.key(), path.display());
        pipeline.pending_snapshot = Some(path.to_path_buf());
        Ok(())
    }

    fn send_vfu_request(&mut self) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.send_fir();
        }
    }

    fn send_vfu(&mut self) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.send_vfu();
        }
    }

    fn send_stats(&self) -> VideoStats {
        self.pipeline
            .as_ref()
            .map(|p| VideoStats {
                fps: p.sent_fps,
                size: p.sent_size.unwrap_or_default(),
            })
            .unwrap_or_default()
    }

    fn recv_stats(&self) -> VideoStats {
        self.pipeline
            .as_ref()
            .map(|p| VideoStats {
                fps: p.received_fps,
                size: p.received_size,
            })
            .unwrap_or_default()
    }

    fn enable_camera(&mut self, enabled: bool) {
        self.camera_enabled = enabled;
        let device = self.video_device(self.core.target_state());
        let running = self.core.is_running();
        if let Some(pipeline) = self.pipeline.as_mut().filter(|p| running && p.is_running()) {
            if let Some(device) = device.filter(|d| pipeline.camera.as_ref() != Some(d)) {
                info!("Switching camera of running stream to {}", device);
                pipeline.change_camera(device);
            }
        }
    }

    fn camera_enabled(&self) -> bool {
        self.camera_enabled
    }
}

impl std::fmt::Debug for VideoStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoStream")
            .field("core", &self.core)
            .field("pipeline", &self.pipeline.as_ref().map(|p| p.id()))
            .field("video_source", &self.video_source)
            .field("native_window_id", &self.native_window_id)
            .field("camera_enabled", &self.camera_enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::offer_answer::StreamDescription;
    use crate::types::CallId;
    use crate::video_source::{ScreenSharingDescriptor, ScreenSharingKind};

    fn group_with_video() -> StreamsGroup {
        let media = MediaCore::new();
        media.add_camera("front", "Front camera");
        let mut group = StreamsGroup::new(CallId::new(), media, Arc::new(StreamConfig::default()));
        let ctx = OfferAnswerContext::local_only(0, StreamDescription::new(MediaType::Video, 0));
        group.add_stream(&ctx).unwrap();
        group
    }

    fn screen() -> ScreenSharingDescriptor {
        ScreenSharingDescriptor {
            kind: ScreenSharingKind::Display,
            native_handle: 0,
        }
    }

    #[test]
    fn screen_sharing_swaps_window_handles() {
        let mut group = group_with_video();
        let swapped = group.with_stream::<VideoStream, _, _>(0, |video, g| {
            video.set_native_window_id(Some(WindowId(1)));
            video.set_native_preview_window_id(Some(WindowId(2)));

            assert!(video.enable_local_screen_sharing(true, g));
            let pipeline = video.pipeline().unwrap();
            assert_eq!(pipeline.native_window_id, None);
            assert_eq!(pipeline.native_preview_window_id, Some(WindowId(1)));
            assert_eq!(video.native_window_id(), Some(WindowId(1)));
            assert_eq!(video.create_native_preview_window_id(), None);

            assert!(!video.enable_local_screen_sharing(true, g));
            assert!(video.enable_local_screen_sharing(false, g));
            let pipeline = video.pipeline().unwrap();
            assert_eq!(pipeline.native_window_id, Some(WindowId(1)));
            assert_eq!(pipeline.native_preview_window_id, Some(WindowId(2)));
            true
        });
        assert_eq!(swapped, Some(true));
    }

    #[test]
    fn failed_camera_lookup_keeps_previous_source() {
        let mut group = group_with_video();
        let video = group.video_stream_mut(0).unwrap();
        video.set_video_source(Some(VideoSourceDescriptor::Camera("front".into()))).unwrap();
        let err = video
            .set_video_source(Some(VideoSourceDescriptor::Camera("side".into())))
            .unwrap_err();
        assert_eq!(err, StreamError::CameraNotFound("side".into()));
        assert_eq!(video.video_source(), Some(&VideoSourceDescriptor::Camera("front".into())));

        assert_eq!(
            video.set_video_source(Some(VideoSourceDescriptor::Unknown)),
            Err(StreamError::UnknownSource)
        );
        assert!(video.video_source().is_none());
    }

    #[test]
    fn screen_sharing_source_is_reconfigured_in_place() {
        let mut group = group_with_video();
        let video = group.video_stream_mut(0).unwrap();
        video
            .set_video_source(Some(VideoSourceDescriptor::Image(PathBuf::from("/tmp/nowebcam.png"))))
            .unwrap();
        video.set_video_source(Some(VideoSourceDescriptor::ScreenSharing(screen()))).unwrap();
        assert_eq!(
            video.pipeline().and_then(|p| p.source_filter.clone()),
            Some(SourceFilter::ScreenSharing(screen()))
        );

        let window = ScreenSharingDescriptor {
            kind: ScreenSharingKind::Window,
            native_handle: 42,
        };
        video
            .set_video_source(Some(VideoSourceDescriptor::ScreenSharing(window.clone())))
            .unwrap();
        assert_eq!(
            video.pipeline().and_then(|p| p.source_filter.clone()),
            Some(SourceFilter::ScreenSharing(window))
        );
        assert!(video.video_source().map(|s| s.is_screen_sharing()).unwrap_or(false));
    }

    #[test]
    fn call_source_needs_a_live_call() {
        let mut group = group_with_video();
        let other = CallId::new();
        let registration = group.media_core().calls().register(other);
        let video = group.video_stream_mut(0).unwrap();
        assert!(matches!(
            video.set_video_source(Some(VideoSourceDescriptor::Call(other))),
            Err(StreamError::SourceUnavailable(_))
        ));
        registration.publish_main_video(Some(PipelineId(99)));
        video.set_video_source(Some(VideoSourceDescriptor::Call(other))).unwrap();
        assert_eq!(
            video.pipeline().and_then(|p| p.source_filter.clone()),
            Some(SourceFilter::Forwarded(PipelineId(99)))
        );
    }

    #[test]
    fn still_image_replaces_camera_when_paused_or_disabled() {
        let mut group = group_with_video();
        let video = group.video_stream_mut(0).unwrap();
        let static_image = video.media.static_image_camera();
        assert_eq!(video.video_device(CallState::StreamsRunning), Some(CameraId::new("front")));
        assert_eq!(video.video_device(CallState::Paused), static_image);
        video.enable_camera(false);
        assert_eq!(video.video_device(CallState::StreamsRunning), static_image);
    }

    #[test]
    fn zoom_needs_an_active_output() {
        let mut group = group_with_video();
        let video = group.video_stream_mut(0).unwrap();
        video.zoom_video(2.0, 0.9, 0.1);
        assert!(video.pipeline().and_then(|p| p.zoom).is_none());
        assert_eq!(
            video.take_snapshot(Path::new("/tmp/snap.jpg")),
            Err(StreamError::OutputInactive)
        );
    }
}
