//! Local notification sink.
//!
//! The monitor never talks to a desktop notification API directly. It asks
//! a `Notifier` for the current permission and hands it finished
//! notifications; the binary uses `TracingNotifier`, tests use
//! `MemoryNotifier`.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Granted,
    Denied,
    /// Never asked.
    Default,
}

impl Permission {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "granted" => Permission::Granted,
            "denied" => Permission::Denied,
            _ => Permission::Default,
        }
    }

    pub fn is_granted(self) -> bool {
        self == Permission::Granted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    /// Subject the notification is about.
    pub subject: String,
    /// User-facing text. May carry raw readings.
    pub body: String,
}

pub trait Notifier: Send + Sync {
    fn permission(&self) -> Permission;

    /// Ask for permission. Sinks that cannot prompt return the current state.
    fn request_permission(&self) -> Permission {
        self.permission()
    }

    fn notify(&self, notification: Notification);
}

/// Emits notifications as warn-level log records. Only the title and the
/// subject are written; the body stays out of the log.
pub struct TracingNotifier {
    permission: Mutex<Permission>,
}

impl TracingNotifier {
    pub fn new(permission: Permission) -> Self {
        Self {
            permission: Mutex::new(permission),
        }
    }
}

impl Notifier for TracingNotifier {
    fn permission(&self) -> Permission {
        self.permission
            .lock()
            .map(|p| *p)
            .unwrap_or(Permission::Denied)
    }

    /// An operator running the monitor headless has opted in by asking.
    /// An explicit denial from configuration stays denied.
    fn request_permission(&self) -> Permission {
        match self.permission.lock() {
            Ok(mut current) => {
                if *current == Permission::Default {
                    *current = Permission::Granted;
                }
                *current
            }
            Err(_) => Permission::Denied,
        }
    }

    fn notify(&self, notification: Notification) {
        tracing::warn!(
            title = %notification.title,
            subject = %notification.subject,
            "Notification raised"
        );
    }
}

/// Collects notifications in memory.
pub struct MemoryNotifier {
    permission: Mutex<Permission>,
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new(permission: Permission) -> Self {
        Self {
            permission: Mutex::new(permission),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_permission(&self, permission: Permission) {
        if let Ok(mut current) = self.permission.lock() {
            *current = permission;
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Notifier for MemoryNotifier {
    fn permission(&self) -> Permission {
        self.permission
            .lock()
            .map(|p| *p)
            .unwrap_or(Permission::Denied)
    }

    fn request_permission(&self) -> Permission {
        match self.permission.lock() {
            Ok(mut current) => {
                if *current == Permission::Default {
                    *current = Permission::Granted;
                }
                *current
            }
            Err(_) => Permission::Denied,
        }
    }

    fn notify(&self, notification: Notification) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }
    }
}
