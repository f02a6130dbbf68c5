//! The vitals monitor state machine.
//!
//! `VitalsMonitor` is plain synchronous state: it is fed events (history
//! results, stream events, lockdown polls) by the runtime and renders a
//! `View`. It owns the window and the alert state of the viewed subject,
//! and the ward board in list mode; nothing else writes them.

use crate::alerting::{route_anomaly_alert, EvaluationContext, SampleKey, ThresholdEvaluator, Thresholds};
use crate::auth::SessionIdentity;
use crate::error::ClientError;
use crate::lockdown::LockdownState;
use crate::metrics::{
    MESSAGES_REJECTED, NOTIFICATIONS_RAISED, SAMPLES_RECEIVED, STALE_EVENTS_DROPPED, STREAM_CONNECTED, WINDOW_LEN,
};
use crate::models::{AnomalyAlert, SecurityStatus, VitalSample};
use crate::notify::{Notification, Notifier};
use crate::stream::StreamMessage;
use crate::subject::SubjectId;
use crate::subscription::StreamEvent;
use crate::window::VitalsWindow;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connected,
    /// Reconnect budget spent. Left only by opening a view again.
    GaveUp,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connected => "Connected",
            ConnectionState::GaveUp => "Offline",
        }
    }

    /// Outcome of a history fetch. `GaveUp` only yields to a new subscription.
    fn after_fetch(self, ok: bool) -> Self {
        match (self, ok) {
            (ConnectionState::GaveUp, _) => ConnectionState::GaveUp,
            (_, true) => ConnectionState::Connected,
            (_, false) => ConnectionState::Disconnected,
        }
    }
}

/// Outcome of the one-shot history backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryState {
    Pending,
    Loaded,
    /// Last attempt failed; whatever was already shown stays.
    Failed,
}

/// Latest ward reading for one subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WardEntry {
    pub subject_id: String,
    pub heart_rate: i32,
    pub spo2: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum View {
    Lockdown {
        reason: Option<String>,
    },
    List {
        viewer: String,
        connection: ConnectionState,
        /// Ordered by subject id.
        patients: Vec<WardEntry>,
    },
    Detail {
        subject: SubjectId,
        connection: ConnectionState,
        history: HistoryState,
        critical: bool,
        latest: Option<VitalSample>,
        samples: Vec<VitalSample>,
    },
}

impl View {
    pub fn is_lockdown(&self) -> bool {
        matches!(self, View::Lockdown { .. })
    }
}

struct ActiveSubject {
    subject: SubjectId,
    generation: u64,
    window: VitalsWindow,
    connection: ConnectionState,
    history: HistoryState,
}

struct WardBoard {
    /// `None` when no ward feed is open.
    generation: Option<u64>,
    connection: ConnectionState,
    latest: BTreeMap<String, WardEntry>,
}

impl WardBoard {
    fn new(generation: Option<u64>) -> Self {
        Self {
            generation,
            connection: ConnectionState::Disconnected,
            latest: BTreeMap::new(),
        }
    }
}

enum Mode {
    List(WardBoard),
    Detail(ActiveSubject),
}

pub struct VitalsMonitor {
    identity: SessionIdentity,
    notifier: Arc<dyn Notifier>,
    evaluator: ThresholdEvaluator,
    capacity: usize,
    lockdown: LockdownState,
    mode: Mode,
}

impl VitalsMonitor {
    pub fn new(identity: SessionIdentity, notifier: Arc<dyn Notifier>, thresholds: Thresholds, capacity: usize) -> Self {
        Self {
            identity,
            notifier,
            evaluator: ThresholdEvaluator::new(thresholds),
            capacity,
            lockdown: LockdownState::default(),
            mode: Mode::List(WardBoard::new(None)),
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn subject(&self) -> Option<&SubjectId> {
        match &self.mode {
            Mode::Detail(active) => Some(&active.subject),
            Mode::List(_) => None,
        }
    }

    /// Generation of the subscription whose events are accepted.
    pub fn generation(&self) -> Option<u64> {
        match &self.mode {
            Mode::Detail(active) => Some(active.generation),
            Mode::List(ward) => ward.generation,
        }
    }

    pub fn window(&self) -> Option<&VitalsWindow> {
        match &self.mode {
            Mode::Detail(active) => Some(&active.window),
            Mode::List(_) => None,
        }
    }

    pub fn connection(&self) -> ConnectionState {
        match &self.mode {
            Mode::Detail(active) => active.connection,
            Mode::List(ward) => ward.connection,
        }
    }

    pub fn lockdown(&self) -> &LockdownState {
        &self.lockdown
    }

    /// Switch to detail mode on `subject`. Starts a fresh window and alert
    /// state; `generation` is the tag the new subscription's events carry.
    pub fn open(&mut self, subject: SubjectId, generation: u64) {
        self.evaluator.reset();
        self.mode = Mode::Detail(ActiveSubject {
            subject,
            generation,
            window: VitalsWindow::new(self.capacity),
            connection: ConnectionState::Disconnected,
            history: HistoryState::Pending,
        });
        WINDOW_LEN.set(0);
        STREAM_CONNECTED.set(0);
    }

    /// Switch to list mode fed by the ward subscription tagged `generation`.
    pub fn show_list(&mut self, generation: u64) {
        self.enter_list(Some(generation));
    }

    /// List mode with no feed behind it.
    pub fn clear(&mut self) {
        self.enter_list(None);
    }

    fn enter_list(&mut self, generation: Option<u64>) {
        self.evaluator.reset();
        self.mode = Mode::List(WardBoard::new(generation));
        WINDOW_LEN.set(0);
        STREAM_CONNECTED.set(0);
    }

    fn drop_stale(generation: u64) -> bool {
        STALE_EVENTS_DROPPED.inc();
        tracing::debug!(generation, "Dropping event from a closed subscription");
        false
    }

    /// Apply a history fetch result. Returns false if the result was stale.
    ///
    /// A successful fetch replaces the window and marks the view connected;
    /// a failed one marks it disconnected and keeps what is shown.
    pub fn apply_history(&mut self, generation: u64, result: Result<Vec<VitalSample>, ClientError>) -> bool {
        let active = match &mut self.mode {
            Mode::Detail(active) if active.generation == generation => active,
            _ => return Self::drop_stale(generation),
        };
        let history = match result {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(subject = %active.subject, error = %e, "History fetch failed");
                active.history = HistoryState::Failed;
                active.connection = active.connection.after_fetch(false);
                return true;
            }
        };

        let total = history.len();
        let kept: Vec<VitalSample> = history
            .into_iter()
            .filter(|s| s.subject_id == active.subject.as_str())
            .collect();
        if kept.len() < total {
            tracing::warn!(subject = %active.subject, dropped = total - kept.len(), "History held samples for another subject");
        }
        tracing::info!(subject = %active.subject, samples = kept.len(), "History loaded");

        let previous = active
            .window
            .latest_with_ordinal()
            .map(|(ordinal, s)| (SampleKey::of(ordinal, s), s.clone()));
        active.window.replace(kept);
        active.history = HistoryState::Loaded;
        active.connection = active.connection.after_fetch(true);
        WINDOW_LEN.set(active.window.len() as i64);

        // A live sample already alerted on comes back as the newest history row.
        let carried = match (previous, active.window.latest_with_ordinal()) {
            (Some((old_key, old)), Some((ordinal, new))) if old.same_reading(new) => {
                Some((old_key, SampleKey::of(ordinal, new)))
            }
            _ => None,
        };
        if let Some((from, to)) = carried {
            self.evaluator.rekey(from, to);
        }
        self.evaluate();
        true
    }

    /// Apply one event from the subscription task. Returns false if stale.
    pub fn apply_stream(&mut self, generation: u64, event: StreamEvent) -> bool {
        if self.generation() != Some(generation) {
            return Self::drop_stale(generation);
        }
        match event {
            StreamEvent::Connected => {
                tracing::info!(generation, "Stream connected");
                self.set_connection(ConnectionState::Connected);
            }
            StreamEvent::Disconnected { .. } => self.set_connection(ConnectionState::Disconnected),
            StreamEvent::GaveUp => self.set_connection(ConnectionState::GaveUp),
            StreamEvent::Message(StreamMessage::Vitals(body)) => self.on_vitals(&body),
            StreamEvent::Message(StreamMessage::Ward(body)) => self.on_ward(&body),
            StreamEvent::Message(StreamMessage::Alert(body)) => self.on_alert(&body),
        }
        true
    }

    fn set_connection(&mut self, state: ConnectionState) {
        match &mut self.mode {
            Mode::Detail(active) => active.connection = state,
            Mode::List(ward) => ward.connection = state,
        }
        STREAM_CONNECTED.set(i64::from(state == ConnectionState::Connected));
    }

    pub fn apply_lockdown(&mut self, result: Result<SecurityStatus, ClientError>) -> bool {
        let was_active = self.lockdown.active;
        let changed = self.lockdown.apply(result);
        if was_active && !self.lockdown.active {
            // A critical sample held back during lockdown is raised now.
            self.evaluate();
        }
        changed
    }

    /// Ask the notifier for permission, then re-run evaluation so a
    /// pending critical sample is raised once allowed.
    pub fn enable_notifications(&mut self) -> bool {
        let granted = self.notifier.request_permission().is_granted();
        tracing::info!(granted, "Notification permission requested");
        if granted {
            self.evaluate();
        }
        granted
    }

    fn on_vitals(&mut self, body: &str) {
        let Mode::Detail(active) = &mut self.mode else {
            return;
        };
        let sample = match VitalSample::from_message(body) {
            Ok(sample) => sample,
            Err(rejection) => {
                MESSAGES_REJECTED.with_label_values(&[rejection.reason()]).inc();
                tracing::warn!(subject = %active.subject, reason = %rejection, "Dropping vitals message");
                return;
            }
        };
        if sample.subject_id != active.subject.as_str() {
            MESSAGES_REJECTED.with_label_values(&["subject_mismatch"]).inc();
            tracing::warn!(subject = %active.subject, "Dropping vitals message for another subject");
            return;
        }

        active.window.push(sample);
        SAMPLES_RECEIVED.inc();
        WINDOW_LEN.set(active.window.len() as i64);
        self.evaluate();
    }

    fn on_ward(&mut self, body: &str) {
        let Mode::List(ward) = &mut self.mode else {
            return;
        };
        let sample = match VitalSample::from_message(body) {
            Ok(sample) => sample,
            Err(rejection) => {
                MESSAGES_REJECTED.with_label_values(&[rejection.reason()]).inc();
                tracing::warn!(reason = %rejection, "Dropping ward message");
                return;
            }
        };
        SAMPLES_RECEIVED.inc();
        ward.latest.insert(
            sample.subject_id.clone(),
            WardEntry {
                subject_id: sample.subject_id,
                heart_rate: sample.heart_rate,
                spo2: sample.spo2,
            },
        );
    }

    fn on_alert(&mut self, body: &str) {
        let alert = match AnomalyAlert::from_message(body) {
            Ok(alert) => alert,
            Err(rejection) => {
                MESSAGES_REJECTED.with_label_values(&[rejection.reason()]).inc();
                tracing::warn!(reason = %rejection, "Dropping alert message");
                return;
            }
        };
        if self.lockdown.active {
            return;
        }
        let permitted = self.notifier.permission().is_granted();
        if let Some(notification) = route_anomaly_alert(&alert, self.subject(), &self.identity, permitted) {
            self.raise(notification, "anomaly", &alert.subject_id);
        }
    }

    fn evaluate(&mut self) {
        let Mode::Detail(active) = &self.mode else {
            return;
        };
        let ctx = EvaluationContext {
            notifications_permitted: self.notifier.permission().is_granted(),
            detail_view: !self.lockdown.active,
        };
        if let Some(notification) = self.evaluator.evaluate(&active.subject, &active.window, ctx) {
            let subject = active.subject.to_string();
            self.raise(notification, "threshold", &subject);
        }
    }

    fn raise(&self, notification: Notification, kind: &str, subject: &str) {
        NOTIFICATIONS_RAISED.with_label_values(&[kind]).inc();
        crate::clinical_event!("NOTIFICATION_RAISED", subject, kind);
        self.notifier.notify(notification);
    }

    /// Current view. Lockdown is checked before anything else.
    pub fn render(&self) -> View {
        if self.lockdown.active {
            return View::Lockdown {
                reason: self.lockdown.reason.clone(),
            };
        }
        match &self.mode {
            Mode::List(ward) => View::List {
                viewer: self.identity.username.clone(),
                connection: ward.connection,
                patients: ward.latest.values().cloned().collect(),
            },
            Mode::Detail(active) => {
                let latest = active.window.latest().cloned();
                View::Detail {
                    subject: active.subject.clone(),
                    connection: active.connection,
                    history: active.history,
                    critical: latest
                        .as_ref()
                        .is_some_and(|s| self.evaluator.thresholds().is_critical(s)),
                    latest,
                    samples: active.window.to_vec(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::notify::{MemoryNotifier, Permission};

    fn monitor(role: Role, permission: Permission) -> (VitalsMonitor, Arc<MemoryNotifier>) {
        let notifier = Arc::new(MemoryNotifier::new(permission));
        let monitor = VitalsMonitor::new(
            SessionIdentity::new("nurse_1", role),
            notifier.clone(),
            Thresholds::default(),
            50,
        );
        (monitor, notifier)
    }

    fn vitals(subject: &str, id: i64, hr: i32) -> StreamEvent {
        StreamEvent::Message(StreamMessage::Vitals(format!(
            r#"{{"id":{},"patientId":"{}","heartRate":{},"spo2":98.0,"temperature":36.6,"humidity":40.0,"systolicBP":120,"diastolicBP":80}}"#,
            id, subject, hr
        )))
    }

    /// A live broadcast: no record id.
    fn reading(subject: &str, hr: i32) -> StreamEvent {
        StreamEvent::Message(StreamMessage::Vitals(format!(
            r#"{{"patientId":"{}","heartRate":{},"spo2":98.0,"temperature":36.6,"humidity":40.0,"systolicBP":120,"diastolicBP":80}}"#,
            subject, hr
        )))
    }

    /// The stored row behind a broadcast.
    fn stored(subject: &str, id: i64, hr: i32) -> VitalSample {
        VitalSample {
            id: Some(id),
            subject_id: subject.to_string(),
            heart_rate: hr,
            spo2: 98.0,
            temperature: 36.6,
            humidity: 40.0,
            systolic_bp: 120,
            diastolic_bp: 80,
            timestamp: chrono::NaiveDate::from_ymd_opt(2024, 3, 1).and_then(|d| d.and_hms_opt(10, 0, id as u32)),
        }
    }

    fn ward(subject: &str, hr: i32, spo2: f32) -> StreamEvent {
        StreamEvent::Message(StreamMessage::Ward(format!(
            r#"{{"patientId":"{}","heartRate":{},"spo2":{},"temperature":36.6}}"#,
            subject, hr, spo2
        )))
    }

    fn rates(monitor: &VitalsMonitor) -> Vec<i32> {
        monitor.window().unwrap().iter().map(|s| s.heart_rate).collect()
    }

    fn subject(raw: &str) -> SubjectId {
        SubjectId::parse(raw).unwrap()
    }

    #[test]
    fn test_stale_generation_cannot_touch_new_window() {
        let (mut monitor, _) = monitor(Role::Nurse, Permission::Granted);
        monitor.open(subject("a"), 1);
        monitor.open(subject("b"), 2);

        assert!(!monitor.apply_stream(1, vitals("a", 1, 72)));
        assert!(!monitor.apply_history(1, Ok(vec![])));
        assert!(monitor.window().unwrap().is_empty());
        assert_eq!(monitor.subject(), Some(&subject("b")));
    }

    #[test]
    fn test_connection_state_transitions() {
        let (mut monitor, _) = monitor(Role::Nurse, Permission::Granted);
        monitor.open(subject("a"), 1);
        assert_eq!(monitor.connection(), ConnectionState::Disconnected);

        monitor.apply_stream(1, StreamEvent::Connected);
        assert_eq!(monitor.connection(), ConnectionState::Connected);
        monitor.apply_stream(1, StreamEvent::Disconnected { reason: "reset".to_string() });
        assert_eq!(monitor.connection(), ConnectionState::Disconnected);
        monitor.apply_stream(1, StreamEvent::GaveUp);
        assert_eq!(monitor.connection().label(), "Offline");

        monitor.open(subject("a"), 2);
        assert_eq!(monitor.connection(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_malformed_messages_are_skipped() {
        let (mut monitor, notifier) = monitor(Role::Nurse, Permission::Granted);
        monitor.open(subject("a"), 1);

        monitor.apply_stream(1, StreamEvent::Message(StreamMessage::Vitals("not json".to_string())));
        monitor.apply_stream(1, vitals("a", 1, 900));
        monitor.apply_stream(1, vitals("other", 2, 72));
        monitor.apply_stream(1, StreamEvent::Message(StreamMessage::Alert("{".to_string())));
        monitor.apply_stream(1, vitals("a", 3, 72));

        assert_eq!(monitor.window().unwrap().len(), 1);
        assert_eq!(notifier.count(), 0);
    }

    #[test]
    fn test_failed_history_keeps_displayed_samples() {
        let (mut monitor, _) = monitor(Role::Nurse, Permission::Granted);
        monitor.open(subject("a"), 1);
        monitor.apply_stream(1, vitals("a", 1, 72));

        monitor.apply_history(1, Err(ClientError::Status { status: 502, path: "/x".to_string() }));

        match monitor.render() {
            View::Detail { history, samples, .. } => {
                assert_eq!(history, HistoryState::Failed);
                assert_eq!(samples.len(), 1);
            }
            other => panic!("unexpected view {:?}", other),
        }
    }

    #[test]
    fn test_history_replaces_window_without_duplicating_live_samples() {
        let (mut monitor, _) = monitor(Role::Nurse, Permission::Granted);
        monitor.open(subject("p1"), 1);
        monitor.apply_stream(1, reading("p1", 72));

        monitor.apply_history(1, Ok(vec![stored("p1", 1, 70), stored("p1", 2, 72)]));

        assert_eq!(rates(&monitor), vec![70, 72]);
    }

    #[test]
    fn test_history_does_not_refire_an_alerted_live_sample() {
        let (mut monitor, notifier) = monitor(Role::Nurse, Permission::Granted);
        monitor.open(subject("p1"), 1);
        monitor.apply_stream(1, reading("p1", 130));
        assert_eq!(notifier.count(), 1);

        monitor.apply_history(1, Ok(vec![stored("p1", 1, 72), stored("p1", 2, 130)]));
        assert_eq!(rates(&monitor), vec![72, 130]);
        assert_eq!(notifier.count(), 1);

        monitor.apply_stream(1, reading("p1", 130));
        assert_eq!(notifier.count(), 2);
    }

    #[test]
    fn test_history_critical_row_alerts_when_nothing_was_raised() {
        let (mut monitor, notifier) = monitor(Role::Nurse, Permission::Granted);
        monitor.open(subject("p1"), 1);
        monitor.apply_stream(1, reading("p1", 72));

        monitor.apply_history(1, Ok(vec![stored("p1", 1, 72), stored("p1", 2, 130)]));
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn test_history_outcome_drives_connection_state() {
        let (mut monitor, _) = monitor(Role::Nurse, Permission::Granted);
        monitor.open(subject("a"), 1);
        monitor.apply_stream(1, StreamEvent::Connected);

        monitor.apply_history(1, Err(ClientError::Status { status: 503, path: "/x".to_string() }));
        assert_eq!(monitor.connection(), ConnectionState::Disconnected);
        match monitor.render() {
            View::Detail { connection, history, .. } => {
                assert_eq!(connection, ConnectionState::Disconnected);
                assert_eq!(history, HistoryState::Failed);
            }
            other => panic!("unexpected view {:?}", other),
        }

        monitor.apply_history(1, Ok(vec![]));
        assert_eq!(monitor.connection(), ConnectionState::Connected);

        monitor.apply_stream(1, StreamEvent::GaveUp);
        monitor.apply_history(1, Ok(vec![]));
        assert_eq!(monitor.connection(), ConnectionState::GaveUp);
    }

    #[test]
    fn test_ward_board_keeps_latest_reading_per_subject() {
        let (mut monitor, _) = monitor(Role::Doctor, Permission::Granted);
        monitor.show_list(3);
        monitor.apply_stream(3, StreamEvent::Connected);

        monitor.apply_stream(3, ward("p2", 80, 97.0));
        monitor.apply_stream(3, ward("p1", 72, 99.0));
        monitor.apply_stream(3, ward("p2", 118, 93.0));
        monitor.apply_stream(3, ward("p3", 900, 99.0));
        monitor.apply_stream(3, reading("p1", 140));
        assert!(!monitor.apply_stream(2, ward("p9", 70, 98.0)));

        assert_eq!(
            monitor.render(),
            View::List {
                viewer: "nurse_1".to_string(),
                connection: ConnectionState::Connected,
                patients: vec![
                    WardEntry { subject_id: "p1".to_string(), heart_rate: 72, spo2: 99.0 },
                    WardEntry { subject_id: "p2".to_string(), heart_rate: 118, spo2: 93.0 },
                ],
            }
        );
    }

    #[test]
    fn test_opening_a_subject_ignores_the_old_ward_feed() {
        let (mut monitor, _) = monitor(Role::Doctor, Permission::Granted);
        monitor.show_list(1);
        monitor.apply_stream(1, ward("p1", 72, 99.0));
        monitor.open(subject("p1"), 2);

        assert!(!monitor.apply_stream(1, ward("p1", 75, 99.0)));
        assert!(monitor.window().unwrap().is_empty());

        monitor.clear();
        assert_eq!(monitor.generation(), None);
        assert!(!monitor.apply_stream(2, reading("p1", 72)));
    }

    #[test]
    fn test_lockdown_overrides_every_view_and_survives_failed_poll() {
        let (mut monitor, _) = monitor(Role::Nurse, Permission::Granted);
        monitor.open(subject("a"), 1);
        monitor.apply_lockdown(Ok(SecurityStatus {
            is_lockdown: true,
            reason: Some("Intrusion".to_string()),
        }));
        assert_eq!(monitor.render(), View::Lockdown { reason: Some("Intrusion".to_string()) });

        monitor.apply_lockdown(Err(ClientError::Session("offline".to_string())));
        monitor.show_list(2);
        assert!(monitor.render().is_lockdown());

        monitor.apply_lockdown(Ok(SecurityStatus { is_lockdown: false, reason: None }));
        assert_eq!(
            monitor.render(),
            View::List {
                viewer: "nurse_1".to_string(),
                connection: ConnectionState::Disconnected,
                patients: vec![],
            }
        );
    }

    #[test]
    fn test_critical_sample_held_during_lockdown_fires_after() {
        let (mut monitor, notifier) = monitor(Role::Nurse, Permission::Granted);
        monitor.open(subject("a"), 1);
        monitor.apply_lockdown(Ok(SecurityStatus { is_lockdown: true, reason: None }));

        monitor.apply_stream(1, vitals("a", 5, 130));
        assert_eq!(notifier.count(), 0);

        monitor.apply_lockdown(Ok(SecurityStatus { is_lockdown: false, reason: None }));
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn test_enable_notifications_raises_pending_sample_once() {
        let (mut monitor, notifier) = monitor(Role::Nurse, Permission::Default);
        monitor.open(subject("a"), 1);
        monitor.apply_stream(1, vitals("a", 1, 130));
        assert_eq!(notifier.count(), 0);

        assert!(monitor.enable_notifications());
        assert!(monitor.enable_notifications());
        assert_eq!(notifier.count(), 1);
        assert!(notifier.sent()[0].body.contains("Patient a"));
    }

    #[test]
    fn test_denied_permission_raises_nothing() {
        let (mut monitor, notifier) = monitor(Role::Nurse, Permission::Denied);
        monitor.open(subject("a"), 1);
        monitor.apply_stream(1, vitals("a", 1, 130));

        assert!(!monitor.enable_notifications());
        assert_eq!(notifier.count(), 0);
    }

    #[test]
    fn test_anomaly_alert_for_other_subject_reaches_clinician() {
        let (mut monitor, notifier) = monitor(Role::Doctor, Permission::Granted);
        monitor.open(subject("a"), 1);
        monitor.apply_stream(
            1,
            StreamEvent::Message(StreamMessage::Alert(
                r#"{"patientId":"b","anomalies":["Fever"],"risk_level":"HIGH","risk_score":40}"#.to_string(),
            )),
        );
        assert_eq!(notifier.count(), 1);
        assert_eq!(notifier.sent()[0].body, "Patient b: Fever");
    }

    #[test]
    fn test_detail_view_flags_critical_latest() {
        let (mut monitor, _) = monitor(Role::Nurse, Permission::Denied);
        monitor.open(subject("a"), 1);
        monitor.apply_stream(1, vitals("a", 1, 130));

        match monitor.render() {
            View::Detail { critical, latest, .. } => {
                assert!(critical);
                assert_eq!(latest.map(|s| s.heart_rate), Some(130));
            }
            other => panic!("unexpected view {:?}", other),
        }
    }
}
