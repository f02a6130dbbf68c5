//! Event loop that owns the monitor.
//!
//! One task holds the `VitalsMonitor`, the subscription handle and the
//! background tasks. Commands, stream events, history results, consent
//! verdicts and lockdown polls all arrive over channels and are applied in
//! arrival order, so the window and alert state have a single writer. The
//! loop itself never waits on the network. Each change is published as a
//! `View` on a watch channel.

use crate::alerting::Thresholds;
use crate::api::BackendApi;
use crate::auth::{SessionIdentity, SessionStore};
use crate::backoff::BackoffPolicy;
use crate::config::Settings;
use crate::error::ClientError;
use crate::lockdown::spawn_poller;
use crate::metrics::STREAM_CONNECTED;
use crate::models::{SecurityStatus, VitalSample};
use crate::monitor::{View, VitalsMonitor};
use crate::notify::Notifier;
use crate::stream::{Feed, StreamConnector};
use crate::subject::SubjectId;
use crate::subscription::{SubscriptionEvent, SubscriptionHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open the detail view for a subject.
    Select(String),
    ShowList,
    EnableNotifications,
    /// Clear the session and stop.
    Logout,
    Shutdown,
}

type Reply = oneshot::Sender<Result<(), ClientError>>;

struct Request {
    command: Command,
    reply: Reply,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub window_capacity: usize,
    pub thresholds: Thresholds,
    pub lockdown_interval: Duration,
    pub backoff: BackoffPolicy,
}

impl RuntimeConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            window_capacity: settings.vitals.window_profile.capacity(),
            thresholds: Thresholds::from_config(&settings.thresholds),
            lockdown_interval: Duration::from_millis(settings.lockdown.poll_interval_ms.max(1)),
            backoff: BackoffPolicy::from_config(&settings.reconnect),
        }
    }
}

/// Collaborators the runtime talks to.
#[derive(Clone)]
pub struct RuntimeDeps {
    pub api: Arc<dyn BackendApi>,
    pub connector: Arc<dyn StreamConnector>,
    pub notifier: Arc<dyn Notifier>,
    pub session: Arc<SessionStore>,
}

struct HistoryResult {
    generation: u64,
    result: Result<Vec<VitalSample>, ClientError>,
}

/// Outcome of a consent check, tagged with the selection that asked for it.
struct ConsentVerdict {
    selection: u64,
    subject: SubjectId,
    result: Result<(), ClientError>,
    reply: Reply,
}

/// Caller side of a running monitor. Dropping it stops the runtime.
pub struct RuntimeHandle {
    commands: mpsc::UnboundedSender<Request>,
    views: watch::Receiver<View>,
    task: JoinHandle<()>,
}

impl RuntimeHandle {
    async fn request(&self, command: Command) -> Result<(), ClientError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Request { command, reply })
            .map_err(|_| stopped())?;
        response.await.map_err(|_| stopped())?
    }

    pub async fn select(&self, subject: impl Into<String>) -> Result<(), ClientError> {
        self.request(Command::Select(subject.into())).await
    }

    pub async fn show_list(&self) -> Result<(), ClientError> {
        self.request(Command::ShowList).await
    }

    pub async fn enable_notifications(&self) -> Result<(), ClientError> {
        self.request(Command::EnableNotifications).await
    }

    pub async fn logout(self) -> Result<(), ClientError> {
        let result = self.request(Command::Logout).await;
        let _ = self.task.await;
        result
    }

    pub async fn shutdown(self) {
        let _ = self.request(Command::Shutdown).await;
        let _ = self.task.await;
    }

    pub fn view(&self) -> View {
        self.views.borrow().clone()
    }

    pub fn views(&self) -> watch::Receiver<View> {
        self.views.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

fn stopped() -> ClientError {
    ClientError::Session("monitor is not running".to_string())
}

/// Start the monitor for the identity held by `deps.session`. A patient
/// opens their own subject straight away; other roles start on the ward
/// list.
pub fn spawn(deps: RuntimeDeps, config: RuntimeConfig) -> Result<RuntimeHandle, ClientError> {
    let identity = deps
        .session
        .identity()
        .ok_or_else(|| ClientError::Session("no authenticated identity".to_string()))?;
    let own_subject = if identity.is_patient() {
        Some(SubjectId::parse(identity.username.clone())?)
    } else {
        None
    };

    let (stream_tx, stream_rx) = mpsc::unbounded_channel();
    let (history_tx, history_rx) = mpsc::unbounded_channel();
    let (lockdown_tx, lockdown_rx) = mpsc::unbounded_channel();
    let (consent_tx, consent_rx) = mpsc::unbounded_channel();
    let (commands, command_rx) = mpsc::unbounded_channel();

    let monitor = VitalsMonitor::new(
        identity.clone(),
        deps.notifier.clone(),
        config.thresholds.clone(),
        config.window_capacity,
    );
    let (views_tx, views) = watch::channel(monitor.render());

    let poller = spawn_poller(deps.api.clone(), config.lockdown_interval, lockdown_tx);
    let subscription = SubscriptionHandle::new(deps.connector.clone(), config.backoff.clone(), stream_tx);

    let mut runtime = Runtime {
        deps,
        config,
        identity,
        monitor,
        subscription,
        fetch: None,
        poller,
        selection: 0,
        history_tx,
        consent_tx,
        views: views_tx,
    };

    let task = tokio::spawn(async move {
        match own_subject {
            Some(subject) => runtime.open(subject),
            None => runtime.open_ward(),
        }
        runtime.publish();
        runtime
            .run(Inbox {
                commands: command_rx,
                stream: stream_rx,
                history: history_rx,
                consent: consent_rx,
                lockdown: lockdown_rx,
            })
            .await;
    });

    Ok(RuntimeHandle { commands, views, task })
}

struct Runtime {
    deps: RuntimeDeps,
    config: RuntimeConfig,
    identity: SessionIdentity,
    monitor: VitalsMonitor,
    subscription: SubscriptionHandle,
    fetch: Option<JoinHandle<()>>,
    poller: JoinHandle<()>,
    /// Bumped by every selection and list request; a consent verdict for
    /// an older value is answered as superseded.
    selection: u64,
    history_tx: mpsc::UnboundedSender<HistoryResult>,
    consent_tx: mpsc::UnboundedSender<ConsentVerdict>,
    views: watch::Sender<View>,
}

struct Inbox {
    commands: mpsc::UnboundedReceiver<Request>,
    stream: mpsc::UnboundedReceiver<SubscriptionEvent>,
    history: mpsc::UnboundedReceiver<HistoryResult>,
    consent: mpsc::UnboundedReceiver<ConsentVerdict>,
    lockdown: mpsc::UnboundedReceiver<Result<SecurityStatus, ClientError>>,
}

impl Runtime {
    async fn run(&mut self, mut inbox: Inbox) {
        tracing::info!(user = %self.identity.username, role = ?self.identity.role, "Monitor runtime started");
        loop {
            tokio::select! {
                request = inbox.commands.recv() => {
                    let Some(Request { command, reply }) = request else {
                        break;
                    };
                    let stop = matches!(command, Command::Logout | Command::Shutdown);
                    self.handle(command, reply);
                    if stop {
                        break;
                    }
                }
                Some(event) = inbox.stream.recv() => {
                    self.monitor.apply_stream(event.generation, event.event);
                }
                Some(fetched) = inbox.history.recv() => {
                    self.monitor.apply_history(fetched.generation, fetched.result);
                }
                Some(verdict) = inbox.consent.recv() => {
                    self.apply_consent(verdict);
                }
                Some(result) = inbox.lockdown.recv() => {
                    self.monitor.apply_lockdown(result);
                }
            }
            self.publish();
        }
        self.teardown();
        self.publish();
        tracing::info!("Monitor runtime stopped");
    }

    fn handle(&mut self, command: Command, reply: Reply) {
        let result = match command {
            Command::Select(raw) => match SubjectId::parse(raw) {
                Ok(subject) => return self.select(subject, reply),
                Err(e) => Err(e),
            },
            Command::ShowList => {
                if self.identity.is_patient() {
                    Err(ClientError::Forbidden("patient list".to_string()))
                } else {
                    self.selection += 1;
                    self.open_ward();
                    Ok(())
                }
            }
            Command::EnableNotifications => {
                self.monitor.enable_notifications();
                Ok(())
            }
            Command::Logout => {
                self.deps.session.logout();
                tracing::info!(user = %self.identity.username, "Logged out");
                Ok(())
            }
            Command::Shutdown => Ok(()),
        };
        let _ = reply.send(result);
    }

    /// Patients may only view themselves and are answered at once. Other
    /// roles wait for a consent check that runs off the loop.
    fn select(&mut self, subject: SubjectId, reply: Reply) {
        self.selection += 1;
        if self.identity.is_patient() {
            let result = if subject.policy_key() == self.identity.username {
                self.open(subject);
                Ok(())
            } else {
                Err(ClientError::Forbidden(subject.to_string()))
            };
            let _ = reply.send(result);
            return;
        }

        tokio::spawn(check_consent(
            self.deps.api.clone(),
            subject,
            self.identity.username.clone(),
            self.selection,
            reply,
            self.consent_tx.clone(),
        ));
    }

    fn apply_consent(&mut self, verdict: ConsentVerdict) {
        let ConsentVerdict {
            selection,
            subject,
            result,
            reply,
        } = verdict;
        let result = if selection != self.selection {
            tracing::debug!(subject = %subject, "Dropping consent verdict for an older selection");
            Err(ClientError::Superseded(subject.to_string()))
        } else {
            result.map(|()| self.open(subject))
        };
        let _ = reply.send(result);
    }

    fn open(&mut self, subject: SubjectId) {
        self.close_subject();
        let generation = self.subscription.open(Feed::Subject(subject.clone()));
        self.monitor.open(subject.clone(), generation);
        self.fetch = Some(tokio::spawn(fetch_history(
            self.deps.api.clone(),
            subject,
            generation,
            self.config.backoff.clone(),
            self.history_tx.clone(),
        )));
    }

    fn open_ward(&mut self) {
        self.close_subject();
        let generation = self.subscription.open(Feed::Ward);
        self.monitor.show_list(generation);
    }

    fn close_subject(&mut self) {
        self.subscription.close();
        if let Some(fetch) = self.fetch.take() {
            fetch.abort();
        }
    }

    fn teardown(&mut self) {
        self.close_subject();
        self.monitor.clear();
        self.poller.abort();
        STREAM_CONNECTED.set(0);
    }

    fn publish(&self) {
        let view = self.monitor.render();
        self.views.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

/// Approved or absent consent permits viewing. An unreachable consent
/// service does not block.
async fn check_consent(
    api: Arc<dyn BackendApi>,
    subject: SubjectId,
    viewer: String,
    selection: u64,
    reply: Reply,
    verdicts: mpsc::UnboundedSender<ConsentVerdict>,
) {
    let result = match api.consent_status(&subject, &viewer).await {
        Ok(status) if !status.permits_viewing() => Err(ClientError::ConsentDenied {
            subject: subject.to_string(),
            status: status.as_str().to_string(),
        }),
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::warn!(subject = %subject, error = %e, "Consent check failed, treating as no record");
            Ok(())
        }
    };
    let _ = verdicts.send(ConsentVerdict {
        selection,
        subject,
        result,
        reply,
    });
}

/// One-shot history backfill, retried with backoff until it succeeds or
/// the budget is spent. Every attempt's outcome is reported.
async fn fetch_history(
    api: Arc<dyn BackendApi>,
    subject: SubjectId,
    generation: u64,
    policy: BackoffPolicy,
    results: mpsc::UnboundedSender<HistoryResult>,
) {
    let mut backoff = policy.start();
    loop {
        let result = api.fetch_history(&subject).await;
        let done = result.is_ok();
        if results.send(HistoryResult { generation, result }).is_err() || done {
            return;
        }
        match backoff.next_delay() {
            Some(delay) => tokio::time::sleep(delay).await,
            None => {
                tracing::error!(subject = %subject, "History fetch budget spent, giving up");
                return;
            }
        }
    }
}
