//! Subject identity shared by the REST history endpoint, the streaming
//! topic and the consent check.
//!
//! The backend keys all three on the same string, compared byte for byte.
//! `SubjectId` is the only way to build those three representations, so the
//! value is validated once and never re-cased or re-trimmed afterwards.

use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Global alert topic, not scoped to any subject.
pub const ALERTS_TOPIC: &str = "/topic/alerts";

/// Every subject's readings, for the list view.
pub const WARD_TOPIC: &str = "/topic/ward";

const VITALS_TOPIC_PREFIX: &str = "/topic/vitals/";
const HISTORY_PATH_PREFIX: &str = "/api/sensor/history/";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl SubjectId {
    /// Validate a raw identifier. Rejects empty strings and anything that
    /// would change meaning inside a URL path segment or topic name.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ClientError> {
        let raw = raw.into();
        let invalid = raw.is_empty()
            || raw
                .chars()
                .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '/' | '?' | '#' | '%'));
        if invalid {
            return Err(ClientError::InvalidSubject(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path of the one-shot history request.
    pub fn history_path(&self) -> String {
        format!("{}{}", HISTORY_PATH_PREFIX, self.0)
    }

    /// Destination of the subject-scoped vitals subscription.
    pub fn vitals_topic(&self) -> String {
        format!("{}{}", VITALS_TOPIC_PREFIX, self.0)
    }

    /// Key used as `patientId` in consent and ownership checks.
    pub fn policy_key(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SubjectId {
    type Error = ClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SubjectId> for String {
    fn from(value: SubjectId) -> Self {
        value.0
    }
}
