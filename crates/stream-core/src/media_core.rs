//! Process-wide media state shared by every call
//!
//! Holds what the native core keeps globally: capture devices, the preview
//! and default video windows, the standalone camera preview, device rotation,
//! the port allocator and the call registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::engine::PreviewSource;
use crate::registry::CallRegistry;
use crate::transport::{PortAllocator, PortAllocatorConfig};
use crate::types::{CameraId, VideoSize, WindowId, STATIC_IMAGE_CAMERA};

/// A capture device known to the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Camera {
    pub id: CameraId,
    pub name: String,
}

/// Standalone camera preview running outside any call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewStream {
    pub camera: CameraId,
}

impl PreviewStream {
    /// Stop the preview and keep its capture filter for reuse
    pub fn stop_reuse_source(self) -> PreviewSource {
        debug!("Stopping preview, keeping source of {}", self.camera);
        PreviewSource { camera: self.camera }
    }

    /// Stop the preview and destroy its capture filter
    pub fn stop(self) {
        debug!("Stopping preview of {}", self.camera);
    }
}

/// Shared media state of the process
#[derive(Debug)]
pub struct MediaCore {
    cameras: RwLock<Vec<Camera>>,
    default_camera: RwLock<Option<CameraId>>,
    preview_window_id: RwLock<Option<WindowId>>,
    video_window_id: RwLock<Option<WindowId>>,
    preview: RwLock<Option<PreviewStream>>,
    preview_size: RwLock<Option<VideoSize>>,
    device_rotation: RwLock<i32>,
    next_window_id: AtomicU64,
    ports: PortAllocator,
    calls: CallRegistry,
}

impl MediaCore {
    /// Create a new core with the still-image camera registered
    pub fn new() -> Arc<Self> {
        Self::with_ports(PortAllocatorConfig::default())
    }

    /// Create a new core with a custom port range
    pub fn with_ports(config: PortAllocatorConfig) -> Arc<Self> {
        let static_image = Camera {
            id: CameraId::new(STATIC_IMAGE_CAMERA),
            name: "Static picture".to_string(),
        };
        Arc::new(Self {
            cameras: RwLock::new(vec![static_image]),
            default_camera: RwLock::new(None),
            preview_window_id: RwLock::new(None),
            video_window_id: RwLock::new(None),
            preview: RwLock::new(None),
            preview_size: RwLock::new(None),
            device_rotation: RwLock::new(0),
            next_window_id: AtomicU64::new(0x1000),
            ports: PortAllocator::with_config(config),
            calls: CallRegistry::new(),
        })
    }

    /// Register a capture device; the first real one becomes the default
    pub fn add_camera(&self, id: impl Into<String>, name: impl Into<String>) -> CameraId {
        let camera = Camera {
            id: CameraId::new(id),
            name: name.into(),
        };
        let id = camera.id.clone();
        self.cameras.write().push(camera);
        let mut default = self.default_camera.write();
        if default.is_none() {
            *default = Some(id.clone());
        }
        id
    }

    pub fn find_camera(&self, id: &str) -> Option<CameraId> {
        self.cameras
            .read()
            .iter()
            .find(|c| c.id.as_str() == id)
            .map(|c| c.id.clone())
    }

    pub fn static_image_camera(&self) -> Option<CameraId> {
        self.find_camera(STATIC_IMAGE_CAMERA)
    }

    pub fn default_camera(&self) -> Option<CameraId> {
        self.default_camera.read().clone()
    }

    pub fn set_default_camera(&self, id: Option<CameraId>) {
        *self.default_camera.write() = id;
    }

    pub fn preview_window_id(&self) -> Option<WindowId> {
        *self.preview_window_id.read()
    }

    pub fn set_preview_window_id(&self, id: Option<WindowId>) {
        *self.preview_window_id.write() = id;
    }

    pub fn video_window_id(&self) -> Option<WindowId> {
        *self.video_window_id.read()
    }

    pub fn set_video_window_id(&self, id: Option<WindowId>) {
        *self.video_window_id.write() = id;
    }

    /// Start a standalone preview of the default camera
    pub fn start_preview(&self) -> bool {
        let Some(camera) = self.default_camera() else {
            return false;
        };
        info!("Starting video preview of {}", camera);
        *self.preview.write() = Some(PreviewStream { camera });
        true
    }

    /// Hand the running preview over, leaving none
    pub fn take_preview(&self) -> Option<PreviewStream> {
        self.preview.write().take()
    }

    pub fn preview_running(&self) -> bool {
        self.preview.read().is_some()
    }

    /// Record the new size of the camera preview
    pub fn resize_video_preview(&self, size: VideoSize) {
        info!("Camera video preview size changed: {}", size);
        *self.preview_size.write() = Some(size);
    }

    pub fn preview_size(&self) -> Option<VideoSize> {
        *self.preview_size.read()
    }

    pub fn device_rotation(&self) -> i32 {
        *self.device_rotation.read()
    }

    pub fn set_device_rotation(&self, degrees: i32) {
        *self.device_rotation.write() = degrees;
    }

    /// Allocate a native window handle
    pub fn create_window_id(&self) -> WindowId {
        WindowId(self.next_window_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn calls(&self) -> &CallRegistry {
        &self.calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_camera_becomes_default() {
        let core = MediaCore::new();
        assert!(core.default_camera().is_none());
        assert!(core.static_image_camera().is_some());
        let front = core.add_camera("front", "Front camera");
        core.add_camera("back", "Back camera");
        assert_eq!(core.default_camera(), Some(front));
        assert!(core.find_camera("side").is_none());
    }

    #[test]
    fn preview_is_taken_once() {
        let core = MediaCore::new();
        assert!(!core.start_preview());
        core.add_camera("front", "Front camera");
        assert!(core.start_preview());
        assert!(core.take_preview().is_some());
        assert!(core.take_preview().is_none());
    }
}
