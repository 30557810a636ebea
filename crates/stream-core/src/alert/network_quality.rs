use tracing::debug;

use super::monitor::informations;
use super::{AlertContext, AlertMonitor, AlertType};
use crate::engine::RtpCounters;
use crate::stats::CallStats;
use crate::types::MediaType;

/// Loss, burst, retransmission and signal alerts
#[derive(Debug)]
pub struct NetworkQualityAlertMonitor {
    monitor: AlertMonitor,
    last_nack_loss: u64,
    last_total_loss: u64,
    burst_count: u32,
    nack_indicator: f32,
    first_measure_non_zero: bool,
    nack_sent: bool,
}

impl NetworkQualityAlertMonitor {
    pub fn new(context: AlertContext) -> Self {
        Self {
            monitor: AlertMonitor::new(context),
            last_nack_loss: 0,
            last_total_loss: 0,
            burst_count: 0,
            nack_indicator: 0.0,
            first_measure_non_zero: false,
            nack_sent: false,
        }
    }

    pub fn monitor(&self) -> &AlertMonitor {
        &self.monitor
    }

    pub fn loss_rate_threshold(&self) -> f32 {
        self.monitor.config().loss_rate_threshold
    }

    pub fn nack_indicator(&self) -> f32 {
        self.nack_indicator
    }

    pub fn burst_count(&self) -> u32 {
        self.burst_count
    }

    /// Retransmission requests are flowing, start judging their efficiency
    pub fn confirm_nack_sent(&mut self) {
        self.nack_sent = true;
    }

    /// Check one sample of stream statistics
    pub fn check(&mut self, stats: &CallStats, retransmission_on_nack: bool) {
        self.check_local_loss_rate(stats.local_loss_rate, stats.local_late_rate, stats.media_type);
        if let Some(remote) = stats.remote_loss_rate {
            self.check_remote_loss_rate(remote);
        }
        self.check_burst_occurence(stats.burst_occurred);
        self.check_lost_signal(stats.download_bandwidth_kbps);
        if retransmission_on_nack {
            self.check_nack_quality(&stats.rtp);
        }
        self.check_signal_quality(stats.signal_strength_dbm);
    }

    pub fn check_local_loss_rate(&mut self, loss_rate: f32, late_rate: f32, media_type: MediaType) {
        let threshold = self.loss_rate_threshold();
        let trigger = loss_rate > threshold || late_rate > threshold;
        self.monitor.handle_alert(AlertType::QoSHighLossLateRate, trigger, || {
            let mut info = informations([("loss_rate", loss_rate), ("late_rate", late_rate)]);
            info.insert("media_type".into(), media_type.to_string().into());
            info
        });
    }

    pub fn check_remote_loss_rate(&mut self, received_loss_rate: f32) {
        let trigger = received_loss_rate > self.loss_rate_threshold();
        self.monitor.handle_alert(AlertType::QoSHighRemoteLossRate, trigger, || {
            informations([("loss_rate", received_loss_rate)])
        });
    }

    pub fn check_burst_occurence(&mut self, burst_occurred: bool) {
        if burst_occurred {
            self.burst_count += 1;
        }
        let count = self.burst_count;
        self.monitor
            .handle_alert(AlertType::QoSBurstOccured, burst_occurred, || informations([("count", count)]));
    }

    /// Raise once the download bandwidth drops to zero after having flowed
    pub fn check_lost_signal(&mut self, download_kbps: f32) {
        if download_kbps > 0.0 {
            self.first_measure_non_zero = true;
        }
        let trigger = self.first_measure_non_zero && download_kbps == 0.0;
        self.monitor
            .handle_alert(AlertType::QoSLostSignal, trigger, || informations([("bandwidth", download_kbps)]));
    }

    /// Judge how many losses retransmission recovered since the last check
    pub fn check_nack_quality(&mut self, rtp: &RtpCounters) {
        if !self.nack_sent {
            return;
        }
        let lost_before = rtp.lost_before_nack.saturating_sub(self.last_nack_loss);
        let still_lost = rtp.cum_packet_loss.saturating_sub(self.last_total_loss);
        self.last_nack_loss = rtp.lost_before_nack;
        self.last_total_loss = rtp.cum_packet_loss;
        self.nack_indicator = Self::compute_nack_indicator(lost_before, still_lost);
        debug!(
            "NACK indicator {:.2} (lost before NACK {}, still lost {})",
            self.nack_indicator, lost_before, still_lost
        );

        let indicator = self.nack_indicator;
        let trigger = indicator < self.monitor.config().nack_performance_threshold;
        self.monitor
            .handle_alert(AlertType::QoSRetransmissionFailures, trigger, || {
                informations([("indicator", indicator)])
            });
    }

    /// Share of losses recovered by retransmission, 1 when nothing was lost
    pub fn compute_nack_indicator(lost_before_nack: u64, cum_packet_loss: u64) -> f32 {
        if lost_before_nack == 0 {
            return 1.0;
        }
        (1.0 - cum_packet_loss as f32 / lost_before_nack as f32).clamp(0.0, 1.0)
    }

    pub fn check_signal_quality(&mut self, signal_dbm: Option<f32>) {
        let Some(dbm) = signal_dbm else {
            return;
        };
        let threshold = self.monitor.config().signal_threshold_dbm;
        self.monitor.handle_alert(AlertType::QoSLowSignal, dbm < threshold, || {
            informations([("signal", dbm), ("threshold", threshold)])
        });
    }

    pub fn reset(&mut self) {
        self.last_nack_loss = 0;
        self.last_total_loss = 0;
        self.burst_count = 0;
        self.nack_indicator = 0.0;
        self.first_measure_non_zero = false;
        self.nack_sent = false;
        self.monitor.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::monitor::tests::{monitor_with, triggered};
    use crate::alert::AlertConfig;

    fn network_monitor() -> (
        NetworkQualityAlertMonitor,
        std::sync::Arc<crate::clock::ManualClock>,
        tokio::sync::mpsc::UnboundedReceiver<crate::alert::AlertEvent>,
    ) {
        let (base, clock, rx) = monitor_with(AlertConfig::default());
        (NetworkQualityAlertMonitor::new(base.context().clone()), clock, rx)
    }

    #[test]
    fn nack_indicator_bounds() {
        assert_eq!(NetworkQualityAlertMonitor::compute_nack_indicator(0, 10), 1.0);
        assert_eq!(NetworkQualityAlertMonitor::compute_nack_indicator(10, 0), 1.0);
        assert_eq!(NetworkQualityAlertMonitor::compute_nack_indicator(10, 5), 0.5);
        assert_eq!(NetworkQualityAlertMonitor::compute_nack_indicator(10, 20), 0.0);
    }

    #[test]
    fn nack_quality_needs_confirmation() {
        let (mut monitor, _clock, mut rx) = network_monitor();
        let rtp = RtpCounters {
            packets_received: 1000,
            cum_packet_loss: 9,
            lost_before_nack: 10,
        };
        monitor.check_nack_quality(&rtp);
        assert!(triggered(&mut rx).is_empty());

        monitor.confirm_nack_sent();
        monitor.check_nack_quality(&rtp);
        assert_eq!(triggered(&mut rx), vec![AlertType::QoSRetransmissionFailures]);
        assert!((monitor.nack_indicator() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn lost_signal_after_flow() {
        let (mut monitor, _clock, mut rx) = network_monitor();
        let mut stats = CallStats::new(MediaType::Audio);
        monitor.check(&stats, false);
        assert!(triggered(&mut rx).is_empty());

        stats.download_bandwidth_kbps = 40.0;
        monitor.check(&stats, false);
        stats.download_bandwidth_kbps = 0.0;
        monitor.check(&stats, false);
        assert_eq!(triggered(&mut rx), vec![AlertType::QoSLostSignal]);
    }

    #[test]
    fn losses_bursts_and_signal() {
        let (mut monitor, _clock, mut rx) = network_monitor();
        let mut stats = CallStats::new(MediaType::Audio);
        stats.local_late_rate = 12.0;
        stats.remote_loss_rate = Some(15.0);
        stats.burst_occurred = true;
        stats.signal_strength_dbm = Some(-95.0);
        monitor.check(&stats, false);
        assert_eq!(
            triggered(&mut rx),
            vec![
                AlertType::QoSHighLossLateRate,
                AlertType::QoSHighRemoteLossRate,
                AlertType::QoSBurstOccured,
                AlertType::QoSLowSignal
            ]
        );
        assert_eq!(monitor.burst_count(), 1);

        monitor.reset();
        assert_eq!(monitor.burst_count(), 0);
        assert!(!monitor.monitor().already_running(AlertType::QoSLowSignal));
    }
}
