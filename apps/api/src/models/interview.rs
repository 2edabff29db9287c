use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::models::CandidateFacts;

/// An interview time proposed to a candidate, before acceptance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Human-readable local time, e.g. "martes 14 de octubre, 09:00".
    pub display: String,
}

/// Candidate record scoped to a tenant, snapshot of the facts gathered in chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub tenant_id: String,
    pub id: String,
    pub facts: CandidateFacts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Accepted, calendar-backed booking. Immutable once written, apart from `confirmed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interview {
    pub id: Uuid,
    pub tenant_id: String,
    pub candidate_id: String,
    pub vacancy_id: String,
    pub store_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub address: String,
    pub calendar_event_id: String,
    pub status: String,
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
}

pub const INTERVIEW_STATUS_SCHEDULED: &str = "scheduled";
pub const INTERVIEW_STATUS_CONFIRMED: &str = "confirmed";
pub const APPLICATION_STATUS_INTERVIEW_SCHEDULED: &str = "interview_scheduled";

/// Append-only application history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub candidate_id: String,
    pub store_id: String,
    pub vacancy_id: String,
    pub brand: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}
