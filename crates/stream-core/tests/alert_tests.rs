//! Quality alerts raised while streams run

use std::sync::Arc;

use rvoip_stream_core::{
    AlertEvent, AlertType, CallId, CallState, ManualClock, MediaCore, MediaType, OfferAnswerContext,
    PayloadType, StreamConfig, StreamDescription, StreamsGroup,
};
use tokio::sync::mpsc::UnboundedReceiver;

fn video_ctx() -> OfferAnswerContext {
    let vp8 = PayloadType::new(96, "VP8", 90000);
    let local = StreamDescription::new(MediaType::Video, 41000).with_payload(vp8.clone());
    let remote = StreamDescription::new(MediaType::Video, 51000)
        .with_address("192.0.2.20")
        .with_payload(vp8.clone());
    let result = remote.clone();
    OfferAnswerContext::negotiated(0, local, remote, result)
}

fn running_group(clock: Arc<ManualClock>) -> StreamsGroup {
    let media = MediaCore::new();
    media.add_camera("front", "Front camera");
    let mut group =
        StreamsGroup::new(CallId::new(), media, Arc::new(StreamConfig::default())).with_clock(clock);
    let ctx = video_ctx();
    group.add_stream(&ctx).unwrap();
    assert!(group.render(&ctx, CallState::StreamsRunning).is_running());
    group
}

/// Drain pending events of one alert type, as (triggered, terminated) counts
fn drain(rx: &mut UnboundedReceiver<AlertEvent>, alert_type: AlertType) -> (usize, usize) {
    let mut counts = (0, 0);
    while let Ok(event) = rx.try_recv() {
        match event {
            AlertEvent::Triggered(alert) if alert.alert_type() == alert_type => counts.0 += 1,
            AlertEvent::Terminated(alert) if alert.alert_type() == alert_type => {
                assert!(!alert.state());
                counts.1 += 1;
            }
            _ => {}
        }
    }
    counts
}

#[test]
fn silent_camera_raises_one_alert_until_it_recovers() {
    let clock = Arc::new(ManualClock::new(10_000));
    let mut group = running_group(clock.clone());
    let mut rx = group.take_alert_events().unwrap();
    assert!(group.take_alert_events().is_none());

    group.run_alert_monitors();
    clock.advance(2_000);
    group.run_alert_monitors();
    assert_eq!(drain(&mut rx, AlertType::QoSCameraMisfunction), (1, 0));

    if let Some(pipeline) = group.video_stream_mut(0).and_then(|v| v.pipeline_mut()) {
        pipeline.sent_fps = 25.0;
    }
    group.run_alert_monitors();
    assert_eq!(drain(&mut rx, AlertType::QoSCameraMisfunction), (0, 1));

    // more than the debounce delay since the first raise
    if let Some(pipeline) = group.video_stream_mut(0).and_then(|v| v.pipeline_mut()) {
        pipeline.sent_fps = 0.0;
    }
    group.run_alert_monitors();
    assert_eq!(drain(&mut rx, AlertType::QoSCameraMisfunction), (1, 0));
}

#[test]
fn low_frame_rate_is_debounced() {
    let clock = Arc::new(ManualClock::new(0));
    let mut group = running_group(clock.clone());
    let mut rx = group.take_alert_events().unwrap();

    if let Some(pipeline) = group.video_stream_mut(0).and_then(|v| v.pipeline_mut()) {
        pipeline.sent_fps = 5.0;
    }
    group.run_alert_monitors();
    assert_eq!(drain(&mut rx, AlertType::QoSCameraLowFramerate), (1, 0));

    if let Some(pipeline) = group.video_stream_mut(0).and_then(|v| v.pipeline_mut()) {
        pipeline.sent_fps = 30.0;
    }
    group.run_alert_monitors();
    assert_eq!(drain(&mut rx, AlertType::QoSCameraLowFramerate), (0, 1));

    if let Some(pipeline) = group.video_stream_mut(0).and_then(|v| v.pipeline_mut()) {
        pipeline.sent_fps = 5.0;
    }
    clock.advance(500);
    group.run_alert_monitors();
    assert_eq!(drain(&mut rx, AlertType::QoSCameraLowFramerate), (0, 0));

    clock.advance(500);
    group.run_alert_monitors();
    assert_eq!(drain(&mut rx, AlertType::QoSCameraLowFramerate), (1, 0));
}

#[test]
fn stopped_streams_are_not_monitored() {
    let clock = Arc::new(ManualClock::new(0));
    let mut group = running_group(clock);
    let mut rx = group.take_alert_events().unwrap();
    group.stop(0).unwrap();
    group.run_alert_monitors();
    assert_eq!(drain(&mut rx, AlertType::QoSCameraMisfunction), (0, 0));
}
