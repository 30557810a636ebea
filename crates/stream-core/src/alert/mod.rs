//! Quality alerts raised from stream statistics
//!
//! Each stream owns a few monitors. A monitor raises an [`Alert`] when a
//! threshold is breached, at most one running alert per type, and ends it
//! once the condition clears. Raised and ended alerts are published as
//! [`AlertEvent`]s.

pub mod config;
pub mod monitor;
pub mod network_quality;
pub mod timer;
pub mod video_bandwidth;
pub mod video_quality;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::registry::CallRegistry;
use crate::types::CallId;

pub use config::AlertConfig;
pub use monitor::{AlertContext, AlertMonitor};
pub use network_quality::NetworkQualityAlertMonitor;
pub use timer::AlertTimer;
pub use video_bandwidth::VideoBandwidthAlertMonitor;
pub use video_quality::VideoQualityAlertMonitor;

/// Free-form information attached to an alert
pub type AlertInformations = serde_json::Map<String, serde_json::Value>;

/// Kinds of quality alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertType {
    QoSCameraMisfunction,
    QoSCameraLowFramerate,
    QoSVideoStalled,
    QoSHighLossLateRate,
    QoSHighRemoteLossRate,
    QoSBurstOccured,
    QoSRetransmissionFailures,
    QoSLowDownloadBandwidthEstimation,
    QoSLowQualityReceivedVideo,
    QoSLowQualitySentVideo,
    QoSLowSignal,
    QoSLostSignal,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

type TerminatedCallback = Box<dyn Fn(&Alert) + Send + Sync>;

/// A time-bounded quality alert
///
/// Refers to its call by id only; whether the call still exists is resolved
/// through the [`CallRegistry`].
pub struct Alert {
    id: Uuid,
    call: CallId,
    alert_type: AlertType,
    start_time: DateTime<Utc>,
    end_time: Mutex<Option<DateTime<Utc>>>,
    informations: AlertInformations,
    state: AtomicBool,
    on_terminated: Mutex<Vec<TerminatedCallback>>,
}

impl Alert {
    /// Create a new running alert
    pub fn new(
        call: CallId,
        alert_type: AlertType,
        start_time: DateTime<Utc>,
        informations: AlertInformations,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            call,
            alert_type,
            start_time,
            end_time: Mutex::new(None),
            informations,
            state: AtomicBool::new(true),
            on_terminated: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn call_id(&self) -> CallId {
        self.call
    }

    /// Whether the originating call still exists
    pub fn call_alive(&self, registry: &CallRegistry) -> bool {
        registry.is_alive(&self.call)
    }

    pub fn alert_type(&self) -> AlertType {
        self.alert_type
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        *self.end_time.lock()
    }

    pub fn informations(&self) -> &AlertInformations {
        &self.informations
    }

    /// True while the alert is running
    pub fn state(&self) -> bool {
        self.state.load(Ordering::SeqCst)
    }

    /// Register a callback invoked when the alert ends
    pub fn on_terminated<F>(&self, callback: F)
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        self.on_terminated.lock().push(Box::new(callback));
    }

    /// End the alert; later calls do nothing
    pub fn terminate(&self, end_time: DateTime<Utc>) {
        if !self.state.swap(false, Ordering::SeqCst) {
            return;
        }
        *self.end_time.lock() = Some(end_time);
        let callbacks = std::mem::take(&mut *self.on_terminated.lock());
        for callback in &callbacks {
            callback(self);
        }
    }
}

impl fmt::Debug for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alert")
            .field("id", &self.id)
            .field("call", &self.call)
            .field("type", &self.alert_type)
            .field("start_time", &self.start_time)
            .field("end_time", &self.end_time())
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Alert {} [{}] started {}", self.alert_type, self.call, self.start_time)?;
        if let Some(end) = self.end_time() {
            write!(f, ", ended {}", end)?;
        }
        Ok(())
    }
}

/// Published when alerts start and end
#[derive(Debug, Clone)]
pub enum AlertEvent {
    Triggered(Arc<Alert>),
    Terminated(Arc<Alert>),
}
