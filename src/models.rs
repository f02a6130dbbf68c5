use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use validator::Validate;

// ============ Telemetry Models ============

/// One telemetry reading for a subject, as published by the backend.
///
/// Ranges mirror the backend's ingestion DTO; a sample outside them is
/// treated as a malformed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct VitalSample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(rename = "patientId")]
    pub subject_id: String,
    #[serde(rename = "heartRate")]
    #[validate(range(min = 0, max = 300))]
    pub heart_rate: i32,
    #[validate(range(min = 0.0, max = 100.0))]
    pub spo2: f32,
    #[validate(range(min = 0.0, max = 50.0))]
    pub temperature: f32,
    #[serde(default)]
    pub humidity: f32,
    #[serde(rename = "systolicBP", default)]
    #[validate(range(min = 0, max = 300))]
    pub systolic_bp: i32,
    #[serde(rename = "diastolicBP", default)]
    #[validate(range(min = 0, max = 200))]
    pub diastolic_bp: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<NaiveDateTime>,
}

/// Why an inbound message was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Decode(String),
    OutOfRange(String),
}

impl Rejection {
    /// Metric label for the rejection.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::Decode(_) => "decode",
            Rejection::OutOfRange(_) => "out_of_range",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Decode(e) => write!(f, "undecodable message: {}", e),
            Rejection::OutOfRange(e) => write!(f, "reading out of range: {}", e),
        }
    }
}

impl VitalSample {
    /// Decode and range-check one streamed sample.
    pub fn from_message(body: &str) -> Result<Self, Rejection> {
        let sample: VitalSample =
            serde_json::from_str(body).map_err(|e| Rejection::Decode(e.to_string()))?;
        sample
            .validate()
            .map_err(|e| Rejection::OutOfRange(e.to_string()))?;
        Ok(sample)
    }

    /// Same reading, ignoring the record id and timestamp that a stored
    /// history row carries and a live broadcast may not.
    pub fn same_reading(&self, other: &VitalSample) -> bool {
        self.subject_id == other.subject_id
            && self.heart_rate == other.heart_rate
            && self.spo2 == other.spo2
            && self.temperature == other.temperature
            && self.humidity == other.humidity
            && self.systolic_bp == other.systolic_bp
            && self.diastolic_bp == other.diastolic_bp
    }
}

// ============ Alert Models ============

/// Message on the global alert topic, produced by the analytics service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    #[serde(rename = "patientId", alias = "subjectId")]
    pub subject_id: String,
    #[serde(default)]
    pub anomalies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<i32>,
}

impl AnomalyAlert {
    pub fn from_message(body: &str) -> Result<Self, Rejection> {
        serde_json::from_str(body).map_err(|e| Rejection::Decode(e.to_string()))
    }
}

// ============ Security Models ============

/// Body of `GET /api/security/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityStatus {
    #[serde(rename = "isLockdown")]
    pub is_lockdown: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

// ============ Consent Models ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsentStatus {
    Approved,
    Pending,
    Rejected,
    None,
}

impl ConsentStatus {
    /// Whether a viewer may open the subject under this consent state.
    /// A missing consent record does not block viewing.
    pub fn permits_viewing(self) -> bool {
        matches!(self, ConsentStatus::Approved | ConsentStatus::None)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConsentStatus::Approved => "APPROVED",
            ConsentStatus::Pending => "PENDING",
            ConsentStatus::Rejected => "REJECTED",
            ConsentStatus::None => "NONE",
        }
    }
}

/// The parts of a consent record the client reads.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsentRecord {
    pub status: ConsentStatus,
}
