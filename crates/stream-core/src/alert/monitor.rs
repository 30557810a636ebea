use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Alert, AlertConfig, AlertEvent, AlertInformations, AlertTimer, AlertType};
use crate::clock::Clock;
use crate::types::CallId;

/// What a monitor needs from its call
#[derive(Clone)]
pub struct AlertContext {
    pub call: CallId,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<AlertConfig>,
    events: mpsc::UnboundedSender<AlertEvent>,
}

impl AlertContext {
    /// Create a new context publishing on `events`
    pub fn new(
        call: CallId,
        clock: Arc<dyn Clock>,
        config: Arc<AlertConfig>,
        events: mpsc::UnboundedSender<AlertEvent>,
    ) -> Self {
        Self {
            call,
            clock,
            config,
            events,
        }
    }

    fn publish(&self, event: AlertEvent) {
        if self.events.send(event).is_err() {
            debug!("No alert listener left for call {}", self.call);
        }
    }
}

impl std::fmt::Debug for AlertContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertContext")
            .field("call", &self.call)
            .field("config", &self.config)
            .finish()
    }
}

/// Debounced alert bookkeeping shared by every monitor
#[derive(Debug)]
pub struct AlertMonitor {
    context: AlertContext,
    timers: HashMap<AlertType, AlertTimer>,
    running: HashMap<AlertType, Arc<Alert>>,
}

impl AlertMonitor {
    /// Create a new monitor
    pub fn new(context: AlertContext) -> Self {
        Self {
            context,
            timers: HashMap::new(),
            running: HashMap::new(),
        }
    }

    pub fn context(&self) -> &AlertContext {
        &self.context
    }

    pub fn config(&self) -> &AlertConfig {
        &self.context.config
    }

    pub fn alerts_enabled(&self) -> bool {
        self.context.config.enabled
    }

    pub fn already_running(&self, alert_type: AlertType) -> bool {
        self.running.contains_key(&alert_type)
    }

    /// Running alert of a type
    pub fn running_alert(&self, alert_type: AlertType) -> Option<Arc<Alert>> {
        self.running.get(&alert_type).cloned()
    }

    /// Raise or end the alert of `alert_type`
    ///
    /// A breach raises a new alert only when none of that type is running and
    /// the debounce delay elapsed. `informations` is evaluated only when an
    /// alert is actually raised.
    pub fn handle_alert<F>(&mut self, alert_type: AlertType, trigger: bool, informations: F)
    where
        F: FnOnce() -> AlertInformations,
    {
        if !self.alerts_enabled() {
            return;
        }
        let running = self.already_running(alert_type);
        if trigger && !running {
            let now_ms = self.context.clock.now_ms();
            let delay = self.context.config.interval_ms(alert_type);
            let timer = self
                .timers
                .entry(alert_type)
                .or_insert_with(|| AlertTimer::new(delay));
            if timer.is_timeout(now_ms, true) {
                self.notify(alert_type, informations());
            }
        } else if !trigger && running {
            if let Some(alert) = self.running.remove(&alert_type) {
                alert.terminate(self.context.clock.now());
                info!("Alert {} ended on call {}", alert_type, self.context.call);
                self.context.publish(AlertEvent::Terminated(alert));
            }
        }
    }

    fn notify(&mut self, alert_type: AlertType, informations: AlertInformations) {
        let alert = Arc::new(Alert::new(
            self.context.call,
            alert_type,
            self.context.clock.now(),
            informations,
        ));
        warn!("Alert {} raised on call {}", alert_type, self.context.call);
        self.running.insert(alert_type, alert.clone());
        self.context.publish(AlertEvent::Triggered(alert));
    }

    /// End every running alert and forget the timers
    pub fn reset(&mut self) {
        let end = self.context.clock.now();
        for (_, alert) in self.running.drain() {
            alert.terminate(end);
            self.context.publish(AlertEvent::Terminated(alert));
        }
        self.timers.clear();
    }
}

/// Build an information map from key/value pairs
pub fn informations<I, K, V>(pairs: I) -> AlertInformations
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<serde_json::Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;

    pub(crate) fn monitor_with(
        config: AlertConfig,
    ) -> (AlertMonitor, Arc<ManualClock>, mpsc::UnboundedReceiver<AlertEvent>) {
        let clock = Arc::new(ManualClock::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        let context = AlertContext::new(CallId::new(), clock.clone(), Arc::new(config), tx);
        (AlertMonitor::new(context), clock, rx)
    }

    pub(crate) fn triggered(rx: &mut mpsc::UnboundedReceiver<AlertEvent>) -> Vec<AlertType> {
        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AlertEvent::Triggered(alert) = event {
                types.push(alert.alert_type());
            }
        }
        types
    }

    #[test]
    fn second_trigger_within_delay_is_suppressed() {
        let config = AlertConfig::default().with_interval(AlertType::QoSVideoStalled, 5000);
        let (mut monitor, clock, mut rx) = monitor_with(config);

        monitor.handle_alert(AlertType::QoSVideoStalled, true, AlertInformations::new);
        clock.set(4000);
        monitor.handle_alert(AlertType::QoSVideoStalled, true, AlertInformations::new);

        assert_eq!(triggered(&mut rx), vec![AlertType::QoSVideoStalled]);
        assert!(monitor.already_running(AlertType::QoSVideoStalled));
    }

    #[test]
    fn clearing_condition_terminates_alert() {
        let (mut monitor, clock, mut rx) = monitor_with(AlertConfig::default());
        monitor.handle_alert(AlertType::QoSLowSignal, true, || informations([("signal", -90.0)]));
        let alert = monitor.running_alert(AlertType::QoSLowSignal).unwrap();
        assert_eq!(alert.informations()["signal"], serde_json::json!(-90.0));

        clock.advance(300);
        monitor.handle_alert(AlertType::QoSLowSignal, false, AlertInformations::new);
        assert!(!alert.state());
        assert_eq!(alert.end_time().map(|t| t.timestamp_millis()), Some(300));
        assert!(!monitor.already_running(AlertType::QoSLowSignal));

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(matches!(events.last(), Some(AlertEvent::Terminated(_))));
    }

    #[test]
    fn retrigger_waits_for_debounce() {
        let (mut monitor, clock, mut rx) = monitor_with(AlertConfig::default());
        monitor.handle_alert(AlertType::QoSBurstOccured, true, AlertInformations::new);
        monitor.handle_alert(AlertType::QoSBurstOccured, false, AlertInformations::new);
        clock.advance(500);
        monitor.handle_alert(AlertType::QoSBurstOccured, true, AlertInformations::new);
        assert!(!monitor.already_running(AlertType::QoSBurstOccured));
        clock.advance(500);
        monitor.handle_alert(AlertType::QoSBurstOccured, true, AlertInformations::new);
        assert!(monitor.already_running(AlertType::QoSBurstOccured));
        assert_eq!(triggered(&mut rx).len(), 2);
    }

    #[test]
    fn disabled_monitor_is_silent() {
        let config = AlertConfig {
            enabled: false,
            ..AlertConfig::default()
        };
        let (mut monitor, _clock, mut rx) = monitor_with(config);
        monitor.handle_alert(AlertType::QoSLostSignal, true, || panic!("not evaluated"));
        assert!(triggered(&mut rx).is_empty());
    }

    #[test]
    fn reset_terminates_running_alerts() {
        let (mut monitor, _clock, _rx) = monitor_with(AlertConfig::default());
        monitor.handle_alert(AlertType::QoSLostSignal, true, AlertInformations::new);
        let alert = monitor.running_alert(AlertType::QoSLostSignal).unwrap();
        monitor.reset();
        assert!(!alert.state());
        assert!(!monitor.already_running(AlertType::QoSLostSignal));
    }
}
