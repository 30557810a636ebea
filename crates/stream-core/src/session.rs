//! Collaborators of a stream group on the call-session side

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::offer_answer::PayloadType;
use crate::security::MediaEncryption;
use crate::types::{MediaType, StreamIndex, WindowId};

/// Notifications from streams to the call session
///
/// Every method has an empty default so listeners implement what they need.
pub trait SessionListener: Send + Sync {
    fn on_first_video_frame_decoded(&self) {}
    fn on_reset_first_video_frame_decoded(&self) {}
    fn on_video_display_error(&self, _error_code: i32) {}
    fn on_camera_not_working(&self, _camera_name: &str) {}
    fn on_snapshot_taken(&self, _path: &Path) {}
    /// A video fast update should be requested through signalling
    fn on_vfu_request(&self) {}
}

/// Participant device as seen from a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub label: String,
    pub is_screen_sharing: bool,
    pub window_id: Option<WindowId>,
}

/// Conference lookups needed while rendering
pub trait ParticipantResolver: Send + Sync {
    /// Whether the session belongs to a conference
    fn in_conference(&self) -> bool;

    /// Remote participant device using `label` in this session
    fn participant_device(&self, media_type: MediaType, label: &str) -> Option<DeviceInfo>;

    /// Local participant device using `label`
    fn me_device(&self, media_type: MediaType, label: &str) -> Option<DeviceInfo>;

    /// Whether any participant of the conference shares its screen
    fn conference_screen_sharing(&self) -> bool;

    /// Window registered by the application for a label
    fn participant_window_id(&self, label: &str) -> Option<WindowId>;

    /// Index of the local thumbnail stream of the session
    fn thumbnail_stream_index(&self) -> Option<StreamIndex>;

    /// A remote conference changed its displayed speaker
    fn notify_displayed_speaker(&self, _csrc: u32) {}

    /// Renderer failure for the device using `label`
    fn video_display_error(&self, _label: &str, _error_code: i32) {}
}

/// Session-level media parameters shared by the streams
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMediaState {
    pub negotiated_encryption: MediaEncryption,
    /// Encryptions the session is willing to use
    pub accepted_encryptions: Vec<MediaEncryption>,
    pub encryption_mandatory: bool,
    pub used_audio_codec: Option<PayloadType>,
    pub used_video_codec: Option<PayloadType>,
    pub video_enabled: bool,
}

impl SessionMediaState {
    pub fn is_encryption_accepted(&self, encryption: MediaEncryption) -> bool {
        self.negotiated_encryption == encryption || self.accepted_encryptions.contains(&encryption)
    }
}
