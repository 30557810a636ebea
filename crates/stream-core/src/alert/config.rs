use std::collections::BTreeMap;

use infra_common::ConfigStore;
use serde::{Deserialize, Serialize};

use super::AlertType;
use crate::types::{VideoDefinition, VideoSize};

/// Default debounce delay of every alert type
pub const DEFAULT_ALERT_INTERVAL_MS: u64 = 1000;

const INTERVAL_KEYS: &[(AlertType, &str, &str)] = &[
    (AlertType::QoSCameraMisfunction, "alerts::camera", "misfunction_interval"),
    (AlertType::QoSCameraLowFramerate, "alerts::camera", "low_framerate_interval"),
    (AlertType::QoSVideoStalled, "alerts::video", "stalled_interval"),
    (AlertType::QoSLowQualitySentVideo, "alerts::video", "low_quality_sent_interval"),
    (AlertType::QoSLowQualityReceivedVideo, "alerts::video", "low_quality_received_interval"),
    (AlertType::QoSLowDownloadBandwidthEstimation, "alerts::video", "bandwidth_estimation_interval"),
    (AlertType::QoSHighLossLateRate, "alerts::network", "loss_rate_interval"),
    (AlertType::QoSHighRemoteLossRate, "alerts::network", "remote_loss_rate_interval"),
    (AlertType::QoSBurstOccured, "alerts::network", "burst_occured_interval"),
    (AlertType::QoSRetransmissionFailures, "alerts::network", "nack_check_interval"),
    (AlertType::QoSLowSignal, "alerts::network", "low_signal_interval"),
    (AlertType::QoSLostSignal, "alerts::network", "lost_signal_interval"),
];

/// Alert thresholds and debounce delays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    pub enabled: bool,
    /// Frame rate under which the camera is considered slow
    pub fps_threshold: f32,
    /// Received video bandwidth floor, kbit/s
    pub video_bandwidth_threshold_kbps: f32,
    /// Smallest acceptable sent picture
    pub min_sent_size: VideoSize,
    /// Loss and late rate ceiling, percent
    pub loss_rate_threshold: f32,
    /// Share of losses that retransmission must recover
    pub nack_performance_threshold: f32,
    /// Signal strength floor, dBm
    pub signal_threshold_dbm: f32,
    pub intervals: BTreeMap<AlertType, u64>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fps_threshold: 10.0,
            video_bandwidth_threshold_kbps: 150.0,
            min_sent_size: VideoSize::new(320, 240),
            loss_rate_threshold: 10.0,
            nack_performance_threshold: 0.5,
            signal_threshold_dbm: -80.0,
            intervals: BTreeMap::new(),
        }
    }
}

impl AlertConfig {
    /// Read the `alerts` sections of a configuration store
    pub fn from_store(store: &ConfigStore) -> Self {
        let d = Self::default();
        let min_sent_size = store
            .get_opt_string("alerts::video", "min_sent_definition")
            .and_then(|name| VideoDefinition::by_name(&name))
            .map(|def| def.size)
            .unwrap_or(d.min_sent_size);
        let intervals = INTERVAL_KEYS
            .iter()
            .filter(|(_, section, key)| store.has_key(section, key))
            .map(|(alert_type, section, key)| {
                let delay = store.get_int(section, key, DEFAULT_ALERT_INTERVAL_MS as i64);
                (*alert_type, delay.max(0) as u64)
            })
            .collect();

        Self {
            enabled: store.get_bool("alerts", "enabled", d.enabled),
            fps_threshold: store.get_float("alerts::video", "fps_threshold", d.fps_threshold),
            video_bandwidth_threshold_kbps: store.get_float(
                "alerts::video",
                "bandwidth_threshold",
                d.video_bandwidth_threshold_kbps,
            ),
            min_sent_size,
            loss_rate_threshold: store.get_float(
                "alerts::network",
                "loss_rate_threshold",
                d.loss_rate_threshold,
            ),
            nack_performance_threshold: store.get_float(
                "alerts::network",
                "nack_threshold",
                d.nack_performance_threshold,
            ),
            signal_threshold_dbm: store.get_float(
                "alerts::network",
                "signal_threshold",
                d.signal_threshold_dbm,
            ),
            intervals,
        }
    }

    /// Debounce delay of an alert type
    pub fn interval_ms(&self, alert_type: AlertType) -> u64 {
        self.intervals
            .get(&alert_type)
            .copied()
            .unwrap_or(DEFAULT_ALERT_INTERVAL_MS)
    }

    /// Override the debounce delay of an alert type
    pub fn with_interval(mut self, alert_type: AlertType, delay_ms: u64) -> Self {
        self.intervals.insert(alert_type, delay_ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_thresholds_and_intervals() {
        let store = ConfigStore::from_toml_str(
            r#"
[alerts]
enabled = false

["alerts::video"]
fps_threshold = 12.5
stalled_interval = 5000

["alerts::network"]
loss_rate_threshold = 3
"#,
        )
        .unwrap();
        let config = AlertConfig::from_store(&store);
        assert!(!config.enabled);
        assert_eq!(config.fps_threshold, 12.5);
        assert_eq!(config.loss_rate_threshold, 3.0);
        assert_eq!(config.interval_ms(AlertType::QoSVideoStalled), 5000);
        assert_eq!(config.interval_ms(AlertType::QoSLostSignal), DEFAULT_ALERT_INTERVAL_MS);
    }
}
