use super::monitor::informations;
use super::{AlertContext, AlertMonitor, AlertType};
use crate::stats::CallStats;

/// Received video bandwidth alerts
#[derive(Debug)]
pub struct VideoBandwidthAlertMonitor {
    monitor: AlertMonitor,
    threshold_kbps: f32,
}

impl VideoBandwidthAlertMonitor {
    pub fn new(context: AlertContext) -> Self {
        let threshold_kbps = context.config.video_bandwidth_threshold_kbps;
        Self {
            monitor: AlertMonitor::new(context),
            threshold_kbps,
        }
    }

    pub fn bandwidth_threshold(&self) -> f32 {
        self.threshold_kbps
    }

    pub fn monitor(&self) -> &AlertMonitor {
        &self.monitor
    }

    pub fn check(&mut self, stats: &CallStats) {
        self.check_video_bandwidth(stats.download_bandwidth_kbps);
        if let Some(estimated) = stats.estimated_download_bandwidth_kbps {
            self.check_bandwidth_estimation(estimated);
        }
    }

    pub fn check_video_bandwidth(&mut self, kbps: f32) {
        let threshold = self.threshold_kbps;
        let trigger = kbps > 0.0 && kbps < threshold;
        self.monitor.handle_alert(AlertType::QoSLowQualityReceivedVideo, trigger, || {
            informations([("bandwidth", kbps), ("threshold", threshold)])
        });
    }

    pub fn check_bandwidth_estimation(&mut self, kbps: f32) {
        let threshold = self.threshold_kbps;
        let trigger = kbps > 0.0 && kbps < threshold;
        self.monitor
            .handle_alert(AlertType::QoSLowDownloadBandwidthEstimation, trigger, || {
                informations([("bandwidth", kbps), ("threshold", threshold)])
            });
    }

    pub fn reset(&mut self) {
        self.monitor.reset();
    }
}
