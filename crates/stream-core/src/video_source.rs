//! Where the frames of a video stream come from

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::CallId;

/// What part of the screen is shared
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScreenSharingKind {
    Display,
    Window,
    Area { x: i32, y: i32, width: u32, height: u32 },
}

/// Native description of a shared screen
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScreenSharingDescriptor {
    pub kind: ScreenSharingKind,
    /// Display index or native window handle
    pub native_handle: u64,
}

/// Kind of a [`VideoSourceDescriptor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoSourceType {
    Call,
    Camera,
    Image,
    ScreenSharing,
    Unknown,
}

/// Source of a video stream, replaced as a whole on every change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoSourceDescriptor {
    /// Forward what another call captures
    Call(CallId),
    /// Capture device by id
    Camera(String),
    /// Still picture
    Image(PathBuf),
    ScreenSharing(ScreenSharingDescriptor),
    Unknown,
}

impl VideoSourceDescriptor {
    pub fn source_type(&self) -> VideoSourceType {
        match self {
            VideoSourceDescriptor::Call(_) => VideoSourceType::Call,
            VideoSourceDescriptor::Camera(_) => VideoSourceType::Camera,
            VideoSourceDescriptor::Image(_) => VideoSourceType::Image,
            VideoSourceDescriptor::ScreenSharing(_) => VideoSourceType::ScreenSharing,
            VideoSourceDescriptor::Unknown => VideoSourceType::Unknown,
        }
    }

    pub fn is_screen_sharing(&self) -> bool {
        matches!(self, VideoSourceDescriptor::ScreenSharing(_))
    }

    pub fn screen_sharing(&self) -> Option<&ScreenSharingDescriptor> {
        match self {
            VideoSourceDescriptor::ScreenSharing(desc) => Some(desc),
            _ => None,
        }
    }
}
