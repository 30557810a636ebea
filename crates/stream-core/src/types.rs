//! Common types shared by the stream layer

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Position of a stream in the session description
pub type StreamIndex = usize;

/// Media carried by a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Audio,
    Video,
    Text,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Audio => write!(f, "audio"),
            MediaType::Video => write!(f, "video"),
            MediaType::Text => write!(f, "text"),
        }
    }
}

/// Negotiated direction of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StreamDirection {
    #[default]
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl StreamDirection {
    /// Whether media flows out
    pub fn sends(&self) -> bool {
        matches!(self, StreamDirection::SendRecv | StreamDirection::SendOnly)
    }

    /// Whether media flows in
    pub fn receives(&self) -> bool {
        matches!(self, StreamDirection::SendRecv | StreamDirection::RecvOnly)
    }
}

/// Multicast role advertised in the description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MulticastRole {
    #[default]
    None,
    Sender,
    Receiver,
}

/// Lifecycle state of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StreamState {
    #[default]
    Stopped,
    /// Resources warmed up before the answer is known
    Preparing,
    Running,
    /// Torn down for good
    Finished,
}

/// Role of a video stream in conference layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoContent {
    #[default]
    Default,
    Thumbnail,
    Speaker,
}

impl VideoContent {
    /// Map the `content` attribute of a description
    pub fn from_attribute(content: &str) -> Self {
        match content {
            "thumbnail" => VideoContent::Thumbnail,
            "speaker" => VideoContent::Speaker,
            _ => VideoContent::Default,
        }
    }

    /// Attribute value, empty for the default content
    pub fn as_attribute(&self) -> &'static str {
        match self {
            VideoContent::Default => "",
            VideoContent::Thumbnail => "thumbnail",
            VideoContent::Speaker => "speaker",
        }
    }
}

/// State of the call session owning a group of streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CallState {
    #[default]
    Idle,
    IncomingReceived,
    OutgoingInit,
    OutgoingProgress,
    OutgoingRinging,
    OutgoingEarlyMedia,
    IncomingEarlyMedia,
    Connected,
    StreamsRunning,
    Pausing,
    Paused,
    Resuming,
    Referred,
    Error,
    End,
    PausedByRemote,
    UpdatedByRemote,
    Updating,
    EarlyUpdating,
    EarlyUpdatedByRemote,
    Released,
}

impl CallState {
    /// Pausing or paused by us
    pub fn is_paused(&self) -> bool {
        matches!(self, CallState::Pausing | CallState::Paused)
    }

    /// Early media states
    pub fn is_early_media(&self) -> bool {
        matches!(
            self,
            CallState::OutgoingEarlyMedia | CallState::IncomingEarlyMedia
        )
    }
}

/// How a video is fitted in its window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DisplayMode {
    #[default]
    Hybrid,
    BlackBars,
    OccupyAllSpace,
}

impl DisplayMode {
    /// Parse a configuration value, falling back to `Hybrid`
    pub fn from_config(mode: &str) -> Self {
        match mode {
            "Hybrid" => DisplayMode::Hybrid,
            "BlackBars" => DisplayMode::BlackBars,
            "OccupyAllSpace" => DisplayMode::OccupyAllSpace,
            other => {
                warn!(
                    "Video stream set display mode {} failed, available values {{Hybrid, BlackBars, OccupyAllSpace}}.",
                    other
                );
                DisplayMode::Hybrid
            }
        }
    }
}

/// Width and height of a picture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
}

impl VideoSize {
    /// Create a new size
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl fmt::Display for VideoSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A named video definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDefinition {
    pub name: String,
    pub size: VideoSize,
}

const SUPPORTED_DEFINITIONS: &[(&str, u32, u32)] = &[
    ("1080p", 1920, 1080),
    ("uxga", 1600, 1200),
    ("sxga-", 1280, 960),
    ("720p", 1280, 720),
    ("xga", 1024, 768),
    ("svga", 800, 600),
    ("4cif", 704, 576),
    ("vga", 640, 480),
    ("cif", 352, 288),
    ("qvga", 320, 240),
    ("qcif", 176, 144),
];

impl VideoDefinition {
    /// Look a supported definition up by name (case insensitive)
    pub fn by_name(name: &str) -> Option<Self> {
        SUPPORTED_DEFINITIONS
            .iter()
            .find(|(n, _, _)| n.eq_ignore_ascii_case(name))
            .map(|(n, w, h)| VideoDefinition {
                name: (*n).to_string(),
                size: VideoSize::new(*w, *h),
            })
    }
}

/// Opaque native window handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Capture device identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraId(pub String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the still-image capture device
pub const STATIC_IMAGE_CAMERA: &str = "StaticImage: Static picture";

/// Call identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    /// Create a new random call id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a stream across the whole process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    pub call: CallId,
    pub index: StreamIndex,
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.call, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_display_mode_is_hybrid() {
        assert_eq!(DisplayMode::from_config("BlackBars"), DisplayMode::BlackBars);
        assert_eq!(DisplayMode::from_config("Stretch"), DisplayMode::Hybrid);
    }

    #[test]
    fn definitions_are_found_by_name() {
        let vga = VideoDefinition::by_name("VGA").unwrap();
        assert_eq!(vga.size, VideoSize::new(640, 480));
        assert!(VideoDefinition::by_name("8k").is_none());
    }

    #[test]
    fn content_attribute_mapping() {
        assert_eq!(VideoContent::from_attribute("thumbnail"), VideoContent::Thumbnail);
        assert_eq!(VideoContent::from_attribute("main"), VideoContent::Default);
        assert_eq!(VideoContent::Speaker.as_attribute(), "speaker");
    }
}
