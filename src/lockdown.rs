use crate::api::BackendApi;
use crate::error::ClientError;
use crate::metrics::{LOCKDOWN_ACTIVE, LOCKDOWN_POLL_FAILURES};
use crate::models::SecurityStatus;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Last known global lockdown flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockdownState {
    pub active: bool,
    pub reason: Option<String>,
}

impl LockdownState {
    /// Fold one poll result into the state. A failed poll keeps the last
    /// known state. Returns true when the state changed.
    pub fn apply(&mut self, result: Result<SecurityStatus, ClientError>) -> bool {
        let status = match result {
            Ok(status) => status,
            Err(e) => {
                LOCKDOWN_POLL_FAILURES.inc();
                tracing::warn!(error = %e, active = self.active, "Lockdown poll failed, keeping last known state");
                return false;
            }
        };

        let next = LockdownState {
            active: status.is_lockdown,
            reason: status.reason.filter(|r| !r.trim().is_empty()),
        };
        if next == *self {
            return false;
        }

        if next.active != self.active {
            let event = if next.active { "LOCKDOWN_ENTERED" } else { "LOCKDOWN_LIFTED" };
            crate::clinical_event!(event, "system", next.reason.as_deref().unwrap_or("none"));
        }
        LOCKDOWN_ACTIVE.set(i64::from(next.active));
        *self = next;
        true
    }
}

/// Poll the lockdown flag every `interval`, first poll immediately. The
/// task ends when the receiver is dropped.
pub fn spawn_poller(
    api: Arc<dyn BackendApi>,
    interval: Duration,
    results: mpsc::UnboundedSender<Result<SecurityStatus, ClientError>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let result = api.security_status().await;
            if results.send(result).is_err() {
                tracing::debug!("Lockdown poller stopped");
                return;
            }
        }
    })
}
