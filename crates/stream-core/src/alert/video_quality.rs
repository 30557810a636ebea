use super::monitor::informations;
use super::{AlertContext, AlertMonitor, AlertType};
use crate::stats::VideoStats;

/// Camera and video flow alerts
#[derive(Debug)]
pub struct VideoQualityAlertMonitor {
    monitor: AlertMonitor,
    fps_threshold: f32,
    /// Video was received at least once
    received: bool,
}

impl VideoQualityAlertMonitor {
    pub fn new(context: AlertContext) -> Self {
        let fps_threshold = context.config.fps_threshold;
        Self {
            monitor: AlertMonitor::new(context),
            fps_threshold,
            received: false,
        }
    }

    pub fn fps_threshold(&self) -> f32 {
        self.fps_threshold
    }

    pub fn monitor(&self) -> &AlertMonitor {
        &self.monitor
    }

    /// Check one sample of video statistics
    ///
    /// `camera_fps` is negative when no camera is capturing.
    pub fn check(&mut self, sent: Option<&VideoStats>, received: Option<&VideoStats>, camera_fps: f32) {
        if let Some(sent) = sent {
            self.check_sending_low_quality(sent);
        }
        if let Some(received) = received {
            self.video_stalled_check(received.fps);
        }
        if camera_fps >= 0.0 {
            self.check_camera_misfunction(camera_fps);
            self.check_camera_low_framerate(camera_fps);
        }
    }

    pub fn check_camera_misfunction(&mut self, fps: f32) {
        self.monitor.handle_alert(AlertType::QoSCameraMisfunction, fps == 0.0, || {
            informations([("fps", fps)])
        });
    }

    pub fn check_camera_low_framerate(&mut self, fps: f32) {
        let threshold = self.fps_threshold;
        let trigger = fps > 0.0 && fps < threshold;
        self.monitor.handle_alert(AlertType::QoSCameraLowFramerate, trigger, || {
            informations([("fps", fps), ("threshold", threshold)])
        });
    }

    /// Raise a stall once frames stop arriving after having flowed
    pub fn video_stalled_check(&mut self, fps: f32) {
        if fps > 0.0 {
            self.received = true;
        }
        let trigger = self.received && fps == 0.0;
        self.monitor
            .handle_alert(AlertType::QoSVideoStalled, trigger, || informations([("fps", fps)]));
    }

    pub fn check_sending_low_quality(&mut self, sent: &VideoStats) {
        let min = self.monitor.config().min_sent_size;
        let size = sent.size;
        let trigger = !size.is_empty() && size.pixels() < min.pixels();
        self.monitor.handle_alert(AlertType::QoSLowQualitySentVideo, trigger, || {
            informations([
                ("width", size.width),
                ("height", size.height),
                ("min_width", min.width),
                ("min_height", min.height),
            ])
        });
    }

    pub fn reset(&mut self) {
        self.received = false;
        self.monitor.reset();
    }
}
