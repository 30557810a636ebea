//! Control interfaces exposed to the conference and participant layer

use std::path::Path;

use crate::engine::PipelineId;
use crate::error::Result;
use crate::stats::VideoStats;
use crate::types::WindowId;

/// Controls of an audio stream
pub trait AudioControl {
    fn set_mic_muted(&mut self, muted: bool);

    fn mic_muted(&self) -> bool;

    fn set_speaker_muted(&mut self, muted: bool);

    fn speaker_muted(&self) -> bool;

    /// Playback gain in dB
    fn set_playback_gain_db(&mut self, gain: f32);

    fn playback_gain_db(&self) -> f32;

    /// Capture level in dBm0, [`VOLUME_UNKNOWN_DBM0`](crate::VOLUME_UNKNOWN_DBM0) when not running
    fn record_volume(&self) -> f32;

    /// Playback level in dBm0, [`VOLUME_UNKNOWN_DBM0`](crate::VOLUME_UNKNOWN_DBM0) when not running
    fn play_volume(&self) -> f32;

    /// Synchronize a video pipeline with this audio stream
    fn link_video(&mut self, video: PipelineId);

    fn unlink_video(&mut self, video: PipelineId);
}

/// Controls of a video stream
///
/// Window handles follow the screen-sharing distribution: while local screen
/// sharing is on, the display handle of the stream renders the preview.
pub trait VideoControl {
    fn native_window_id(&self) -> Option<WindowId>;

    fn set_native_window_id(&mut self, window: Option<WindowId>);

    /// Let the engine create a display window
    fn create_native_window_id(&mut self) -> Option<WindowId>;

    fn native_preview_window_id(&self) -> Option<WindowId>;

    fn set_native_preview_window_id(&mut self, window: Option<WindowId>);

    fn create_native_preview_window_id(&mut self) -> Option<WindowId>;

    /// Zoom on the displayed video, `cx` and `cy` being the relative centre
    fn zoom_video(&mut self, factor: f32, cx: f32, cy: f32);

    /// Ask for a snapshot of the displayed video
    fn take_snapshot(&mut self, path: &Path) -> Result<()>;

    /// Ask the remote for a full intra frame
    fn send_vfu_request(&mut self);

    /// Generate a key frame locally
    fn send_vfu(&mut self);

    fn send_stats(&self) -> VideoStats;

    fn recv_stats(&self) -> VideoStats;

    fn enable_camera(&mut self, enabled: bool);

    fn camera_enabled(&self) -> bool;
}
