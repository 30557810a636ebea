//! Stream group render scenarios
//!
//! Drives a [`StreamsGroup`] the way the signalling layer does: add streams
//! from local descriptions, render negotiated contexts, then check what the
//! engine-side pipelines ended up with.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use rvoip_stream_core::engine::IoInput;
use rvoip_stream_core::stream::StopReason;
use rvoip_stream_core::types::{DisplayMode, StreamState};
use rvoip_stream_core::{
    CallId, CallState, DeviceInfo, MediaCore, MediaEncryption, MediaType, OfferAnswerContext,
    ParticipantResolver, PayloadType, RenderOutcome, ScreenSharingDescriptor, ScreenSharingKind,
    ScreenSharingService, Stream, StreamConfig, StreamDescription, StreamDirection, StreamIndex, StreamsGroup,
    VideoControl, VideoSourceDescriptor, VideoStream, WindowId,
};

fn media() -> Arc<MediaCore> {
    let media = MediaCore::new();
    media.add_camera("front", "Front camera");
    media
}

fn group_with(media: Arc<MediaCore>) -> StreamsGroup {
    StreamsGroup::new(CallId::new(), media, Arc::new(StreamConfig::default()))
}

fn vp8() -> PayloadType {
    PayloadType::new(96, "VP8", 90000)
}

fn pcmu() -> PayloadType {
    PayloadType::new(0, "PCMU", 8000)
}

fn ctx(
    index: StreamIndex,
    media_type: MediaType,
    local_port: u16,
    remote_port: u16,
    label: &str,
    payload: PayloadType,
) -> OfferAnswerContext {
    let local = StreamDescription::new(media_type, local_port)
        .with_label(label)
        .with_payload(payload.clone());
    let remote = StreamDescription::new(media_type, remote_port)
        .with_address("192.0.2.10")
        .with_payload(payload.clone());
    let result = StreamDescription::new(media_type, remote_port)
        .with_address("192.0.2.10")
        .with_label(label)
        .with_payload(payload);
    OfferAnswerContext::negotiated(index, local, remote, result)
}

fn video_ctx(index: StreamIndex, local_port: u16, remote_port: u16, label: &str) -> OfferAnswerContext {
    ctx(index, MediaType::Video, local_port, remote_port, label, vp8())
}

fn audio_ctx(index: StreamIndex, local_port: u16, remote_port: u16) -> OfferAnswerContext {
    ctx(index, MediaType::Audio, local_port, remote_port, "", pcmu())
}

fn screen() -> ScreenSharingDescriptor {
    ScreenSharingDescriptor {
        kind: ScreenSharingKind::Display,
        native_handle: 0,
    }
}

#[test]
fn label_change_alone_does_not_restart() {
    let mut group = group_with(media());
    let first = video_ctx(0, 41000, 51000, "alice");
    group.add_stream(&first).unwrap();

    assert_eq!(group.render(&first, CallState::StreamsRunning), RenderOutcome::Started);
    let started_id = group.stream(0).unwrap().pipeline_id();

    let relabeled = video_ctx(0, 41000, 51000, "bob");
    assert_eq!(group.render(&relabeled, CallState::StreamsRunning), RenderOutcome::Unchanged);
    let stream = group.video_stream(0).unwrap();
    assert_eq!(stream.pipeline_id(), started_id);
    assert_eq!(stream.core().label(), "bob");
    assert_eq!(stream.pipeline().unwrap().label, "bob");
    assert_eq!(stream.core().number_of_starts(), 1);

    let moved = video_ctx(0, 41000, 52000, "bob");
    assert_eq!(group.render(&moved, CallState::StreamsRunning), RenderOutcome::Started);
    let stream = group.video_stream(0).unwrap();
    assert_ne!(stream.pipeline_id(), started_id);
    assert_eq!(stream.core().number_of_starts(), 2);
    assert_eq!(
        stream.pipeline().unwrap().start_params().map(|p| p.destination.rtp_port),
        Some(52000)
    );
}

#[test]
fn missing_payload_stops_and_disables_screen_sharing() {
    let mut group = group_with(media());
    let local = StreamDescription::new(MediaType::Video, 41000).with_payload(vp8());
    let remote = StreamDescription::new(MediaType::Video, 51000).with_address("192.0.2.10");
    let result = StreamDescription::new(MediaType::Video, 51000).with_address("192.0.2.10");
    let no_payload = OfferAnswerContext::negotiated(0, local, remote, result);
    group.add_stream(&no_payload).unwrap();

    let enabled = group.with_stream::<VideoStream, _, _>(0, |s, g| s.enable_local_screen_sharing(true, g));
    assert_eq!(enabled, Some(true));

    assert_eq!(
        group.render(&no_payload, CallState::StreamsRunning),
        RenderOutcome::Stopped(StopReason::NoPayload)
    );
    let sharing = group
        .shared_service::<ScreenSharingService>()
        .map(|s| s.local_screen_sharing_enabled());
    assert_eq!(sharing, Some(false));
    assert_eq!(group.stream(0).unwrap().state(), StreamState::Stopped);
}

#[test]
fn inactive_and_incomplete_negotiations_stop_the_stream() {
    let mut group = group_with(media());
    let mut inactive = video_ctx(0, 41000, 51000, "");
    if let Some(result) = inactive.result.as_mut() {
        result.direction = StreamDirection::Inactive;
    }
    group.add_stream(&inactive).unwrap();
    assert_eq!(
        group.render(&inactive, CallState::StreamsRunning),
        RenderOutcome::Stopped(StopReason::Inactive)
    );

    let pending = OfferAnswerContext::local_only(0, StreamDescription::new(MediaType::Video, 41000));
    assert_eq!(
        group.render(&pending, CallState::OutgoingInit),
        RenderOutcome::Stopped(StopReason::MissingResultDescription)
    );
    assert!(!group.stream(0).unwrap().core().is_running());
}

#[test]
fn thumbnail_is_fed_by_main_stream_then_by_camera_while_sharing() {
    let media = media();
    let front = media.find_camera("front").unwrap();
    let mut group = group_with(media);

    let main = video_ctx(0, 41000, 51000, "me");
    let mut thumbnail = video_ctx(1, 41002, 51002, "me");
    thumbnail.local.content = "thumbnail".to_string();
    if let Some(result) = thumbnail.result.as_mut() {
        result.direction = StreamDirection::SendOnly;
    }
    group.add_stream(&main).unwrap();
    group.add_stream(&thumbnail).unwrap();
    assert_eq!(group.main_stream_index(MediaType::Video), Some(0));

    assert_eq!(group.render(&main, CallState::StreamsRunning), RenderOutcome::Started);
    assert_eq!(group.render(&thumbnail, CallState::StreamsRunning), RenderOutcome::Started);

    let main_id = group.stream(0).unwrap().pipeline_id().unwrap();
    let pipeline = group.video_stream(1).unwrap().pipeline().unwrap();
    assert_eq!(pipeline.io.as_ref().map(|io| io.input.clone()), Some(IoInput::Itc(main_id)));
    assert_eq!(pipeline.max_network_bitrate, Some(80_000));
    assert_eq!(pipeline.fps, 20.0);
    assert_eq!(pipeline.sent_size.map(|s| (s.width, s.height)), Some((160, 120)));

    group
        .video_stream_mut(0)
        .unwrap()
        .set_video_source(Some(VideoSourceDescriptor::ScreenSharing(screen())))
        .unwrap();
    group.stop(1).unwrap();
    assert_eq!(group.render(&thumbnail, CallState::StreamsRunning), RenderOutcome::Started);

    let pipeline = group.video_stream(1).unwrap().pipeline().unwrap();
    assert_eq!(pipeline.io.as_ref().map(|io| io.input.clone()), Some(IoInput::Camera(front)));
}

#[test]
fn video_zrtp_derives_from_audio_and_survives_restart() {
    let mut group = group_with(media());
    group.media_state_mut().negotiated_encryption = MediaEncryption::Zrtp;
    let audio = audio_ctx(0, 40000, 50000);
    let mut video = video_ctx(1, 41000, 51000, "");
    if let Some(remote) = video.remote.as_mut() {
        remote.zrtp_hash = Some("1.10 0123456789abcdef".to_string());
    }
    group.add_stream(&audio).unwrap();
    group.add_stream(&video).unwrap();

    assert_eq!(group.render(&audio, CallState::StreamsRunning), RenderOutcome::Started);
    let master_id = {
        let zrtp = group
            .audio_stream_mut(0)
            .and_then(|a| a.pipeline_mut())
            .and_then(|p| p.sessions_mut().zrtp.as_mut())
            .unwrap();
        assert!(zrtp.is_started());
        zrtp.mark_secured();
        zrtp.id()
    };

    assert_eq!(group.render(&video, CallState::StreamsRunning), RenderOutcome::Started);
    let zrtp = group.stream(1).unwrap().sessions().unwrap().zrtp.clone().unwrap();
    assert_eq!(zrtp.master(), Some(master_id));
    assert!(zrtp.is_started());
    assert_eq!(zrtp.peer_hello_hash(), Some("1.10 0123456789abcdef"));

    let audio_linked = group.audio_stream(0).unwrap().pipeline().unwrap().linked_video;
    assert_eq!(audio_linked, group.stream(1).unwrap().pipeline_id());

    group.stop(1).unwrap();
    assert_eq!(group.audio_stream(0).unwrap().pipeline().unwrap().linked_video, None);
    assert_eq!(group.render(&video, CallState::StreamsRunning), RenderOutcome::Started);
    let restarted = group.stream(1).unwrap().sessions().unwrap().zrtp.clone().unwrap();
    assert_eq!(restarted.id(), zrtp.id());
}

struct ConferenceMe {
    screen_sharing: bool,
}

impl ParticipantResolver for ConferenceMe {
    fn in_conference(&self) -> bool {
        true
    }

    fn participant_device(&self, _media_type: MediaType, _label: &str) -> Option<DeviceInfo> {
        None
    }

    fn me_device(&self, _media_type: MediaType, label: &str) -> Option<DeviceInfo> {
        Some(DeviceInfo {
            label: label.to_string(),
            is_screen_sharing: self.screen_sharing,
            window_id: None,
        })
    }

    fn conference_screen_sharing(&self) -> bool {
        self.screen_sharing
    }

    fn participant_window_id(&self, _label: &str) -> Option<WindowId> {
        None
    }

    fn thumbnail_stream_index(&self) -> Option<StreamIndex> {
        None
    }
}

#[test]
fn sharing_my_screen_in_conference_moves_the_window_to_preview() {
    let mut group = group_with(media());
    let resolver: Arc<dyn ParticipantResolver> = Arc::new(ConferenceMe { screen_sharing: true });
    group.set_resolver(Some(resolver));
    let main = video_ctx(0, 41000, 51000, "me");
    group.add_stream(&main).unwrap();
    group
        .video_stream_mut(0)
        .unwrap()
        .set_native_window_id(Some(WindowId(7)));

    assert_eq!(group.render(&main, CallState::StreamsRunning), RenderOutcome::Started);
    let stream = group.video_stream(0).unwrap();
    let pipeline = stream.pipeline().unwrap();
    assert!(pipeline.local_screen_sharing);
    assert_eq!(pipeline.display_mode, DisplayMode::BlackBars);
    assert_eq!(pipeline.preview_display_mode, DisplayMode::BlackBars);
    assert_eq!(pipeline.native_window_id, None);
    assert_eq!(pipeline.native_preview_window_id, Some(WindowId(7)));
    assert_eq!(stream.native_window_id(), Some(WindowId(7)));

    assert_eq!(group.render(&main, CallState::StreamsRunning), RenderOutcome::Unchanged);
    assert_eq!(group.video_stream(0).unwrap().core().number_of_starts(), 1);
}

#[derive(Default)]
struct CountingListener {
    vfu_requests: AtomicUsize,
    first_frames: AtomicUsize,
}

impl rvoip_stream_core::SessionListener for CountingListener {
    fn on_first_video_frame_decoded(&self) {
        self.first_frames.fetch_add(1, Ordering::SeqCst);
    }

    fn on_vfu_request(&self) {
        self.vfu_requests.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn decoder_errors_are_throttled() {
    let clock = Arc::new(rvoip_stream_core::ManualClock::new(1_000));
    let mut group = group_with(media()).with_clock(clock.clone());
    let listener = Arc::new(CountingListener::default());
    group.set_listener(Some(listener.clone()));
    let video = video_ctx(0, 41000, 51000, "");
    group.add_stream(&video).unwrap();
    group.render(&video, CallState::StreamsRunning);

    let sender = group.event_sender();
    assert!(sender.post(0, rvoip_stream_core::MediaEvent::DecoderError));
    assert!(sender.post(0, rvoip_stream_core::MediaEvent::DecoderError));
    assert!(sender.post(0, rvoip_stream_core::MediaEvent::FirstFrameDecoded));
    assert_eq!(group.process_events(), 3);
    assert_eq!(listener.vfu_requests.load(Ordering::SeqCst), 1);
    assert_eq!(listener.first_frames.load(Ordering::SeqCst), 1);

    clock.advance(5_000);
    sender.post(0, rvoip_stream_core::MediaEvent::DecoderError);
    group.process_events();
    assert_eq!(listener.vfu_requests.load(Ordering::SeqCst), 2);

    sender.post(0, rvoip_stream_core::MediaEvent::BandwidthEstimate(250_000.0));
    group.process_events();
    let estimated = group
        .stream(0)
        .unwrap()
        .core()
        .stats()
        .estimated_download_bandwidth_kbps
        .unwrap();
    assert!((estimated - 250.0).abs() < 0.01);
}

#[test]
fn events_for_unknown_streams_are_dropped() {
    let mut group = group_with(media());
    let sender = group.event_sender();
    sender.post(4, rvoip_stream_core::MediaEvent::DecoderRecovered);
    assert_eq!(group.process_events(), 1);
}
