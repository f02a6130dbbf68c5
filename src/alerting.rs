//! Threshold evaluation and alert routing.
//!
//! The evaluator looks only at the newest sample in the window and raises
//! at most one notification per distinct sample identity, however often it
//! is re-run.

use crate::auth::SessionIdentity;
use crate::config::ThresholdConfig;
use crate::models::{AnomalyAlert, VitalSample};
use crate::notify::Notification;
use crate::subject::SubjectId;
use crate::window::VitalsWindow;

pub const CRITICAL_TITLE: &str = "CRITICAL ALERT";
pub const ANOMALY_TITLE: &str = "Anomaly detected";

/// Fixed clinical limits. A sample is critical when any one is crossed.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub heart_rate_high: i32,
    pub spo2_low: f32,
    pub temperature_high: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            heart_rate_high: 100,
            spo2_low: 95.0,
            temperature_high: 37.5,
        }
    }
}

impl Thresholds {
    pub fn from_config(config: &ThresholdConfig) -> Self {
        Self {
            heart_rate_high: config.heart_rate_high,
            spo2_low: config.spo2_low,
            temperature_high: config.temperature_high,
        }
    }

    pub fn is_critical(&self, sample: &VitalSample) -> bool {
        sample.heart_rate > self.heart_rate_high
            || sample.spo2 < self.spo2_low
            || sample.temperature > self.temperature_high
    }
}

/// Identity used to deduplicate alerts: the backend record id when the
/// sample has one, otherwise its arrival ordinal in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKey {
    Record(i64),
    Arrival(u64),
}

impl SampleKey {
    pub fn of(ordinal: u64, sample: &VitalSample) -> Self {
        match sample.id {
            Some(id) => SampleKey::Record(id),
            None => SampleKey::Arrival(ordinal),
        }
    }
}

/// Identity of the last sample that raised a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertState {
    last_alerted: Option<SampleKey>,
}

impl AlertState {
    pub fn last_alerted(&self) -> Option<SampleKey> {
        self.last_alerted
    }
}

/// Conditions outside the sample that gate notifications.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext {
    pub notifications_permitted: bool,
    pub detail_view: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    thresholds: Thresholds,
    state: AlertState,
}

impl ThresholdEvaluator {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: AlertState::default(),
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn state(&self) -> &AlertState {
        &self.state
    }

    /// Forget the last alerted sample. Called when a new window begins.
    pub fn reset(&mut self) {
        self.state = AlertState::default();
    }

    /// Carry the alerted identity over to a new key for the same reading,
    /// e.g. after the window was rebuilt from history.
    pub fn rekey(&mut self, from: SampleKey, to: SampleKey) {
        if self.state.last_alerted == Some(from) {
            self.state.last_alerted = Some(to);
        }
    }

    /// Evaluate the newest sample of `window`. Returns the notification to
    /// raise, if any, and records the sample as alerted.
    pub fn evaluate(
        &mut self,
        subject: &SubjectId,
        window: &VitalsWindow,
        ctx: EvaluationContext,
    ) -> Option<Notification> {
        if !ctx.notifications_permitted || !ctx.detail_view {
            return None;
        }
        let (ordinal, latest) = window.latest_with_ordinal()?;
        if !self.thresholds.is_critical(latest) {
            return None;
        }
        let key = SampleKey::of(ordinal, latest);
        if self.state.last_alerted == Some(key) {
            return None;
        }

        self.state.last_alerted = Some(key);
        Some(critical_notification(subject, latest))
    }
}

pub fn critical_notification(subject: &SubjectId, sample: &VitalSample) -> Notification {
    Notification {
        title: CRITICAL_TITLE.to_string(),
        subject: subject.to_string(),
        body: format!(
            "Patient {} is in critical condition!\nHR: {} | SpO2: {}% | Temp: {}°C",
            subject, sample.heart_rate, sample.spo2, sample.temperature
        ),
    }
}

/// Decide whether an alert from the global topic is surfaced to this viewer.
///
/// Patients only see alerts about the subject they are viewing; clinical
/// roles see every alert.
pub fn route_anomaly_alert(
    alert: &AnomalyAlert,
    viewing: Option<&SubjectId>,
    viewer: &SessionIdentity,
    notifications_permitted: bool,
) -> Option<Notification> {
    if !notifications_permitted || alert.anomalies.is_empty() {
        return None;
    }
    let about_viewed = viewing.is_some_and(|s| s.as_str() == alert.subject_id);
    if !about_viewed && viewer.is_patient() {
        return None;
    }

    Some(Notification {
        title: ANOMALY_TITLE.to_string(),
        subject: alert.subject_id.clone(),
        body: format!("Patient {}: {}", alert.subject_id, alert.anomalies.join(", ")),
    })
}
