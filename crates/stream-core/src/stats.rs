//! Statistics read by alert monitors and control interfaces

use serde::{Deserialize, Serialize};

use crate::engine::RtpCounters;
use crate::types::{MediaType, VideoSize};

/// Frame rate and size of one direction of a video stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoStats {
    pub fps: f32,
    pub size: VideoSize,
}

/// Per-stream call statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStats {
    pub media_type: MediaType,
    pub download_bandwidth_kbps: f32,
    pub upload_bandwidth_kbps: f32,
    /// Set from engine estimates on the main video stream
    pub estimated_download_bandwidth_kbps: Option<f32>,
    /// Percent of packets lost locally
    pub local_loss_rate: f32,
    /// Percent of packets arriving too late
    pub local_late_rate: f32,
    /// Percent lost as reported by the peer
    pub remote_loss_rate: Option<f32>,
    pub burst_occurred: bool,
    /// Radio signal strength, when the platform reports it
    pub signal_strength_dbm: Option<f32>,
    #[serde(skip)]
    pub rtp: RtpCounters,
}

impl CallStats {
    /// Create empty statistics for a media type
    pub fn new(media_type: MediaType) -> Self {
        Self {
            media_type,
            download_bandwidth_kbps: 0.0,
            upload_bandwidth_kbps: 0.0,
            estimated_download_bandwidth_kbps: None,
            local_loss_rate: 0.0,
            local_late_rate: 0.0,
            remote_loss_rate: None,
            burst_occurred: false,
            signal_strength_dbm: None,
            rtp: RtpCounters::default(),
        }
    }
}
