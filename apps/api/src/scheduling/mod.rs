//! Interview scheduling: slot generation, calendar conflict filtering and booking.

pub mod calendar;
pub mod handlers;
pub mod repository;
pub mod slots;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::RepositoryError;
use crate::models::interview::{
    ApplicationEntry, Interview, TimeSlot, APPLICATION_STATUS_INTERVIEW_SCHEDULED,
    INTERVIEW_STATUS_SCHEDULED,
};
use calendar::{CalendarError, CalendarEventDraft, CalendarProvider};
use repository::BookingRepository;
use slots::SLOT_MINUTES;

pub use slots::generate_slots;

/// What the candidate accepted, plus the context the booking needs.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub store_id: String,
    pub vacancy_id: String,
    pub start_time: DateTime<Utc>,
    pub address: String,
    pub calendar_id: String,
    pub store_name: String,
    pub vacancy_title: String,
    pub brand: Option<String>,
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("candidate {0} not found")]
    CandidateNotFound(String),

    #[error("candidate already has an interview at {0}")]
    AlreadyScheduled(DateTime<Utc>),

    #[error("requested slot is no longer free")]
    SlotTaken,

    #[error("vacancy has no open slots")]
    NoOpenSlots,

    #[error("no interview to confirm")]
    NoInterview,

    #[error("calendar error: {0}")]
    Calendar(#[from] CalendarError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Owns interview creation and is the only writer of a vacancy's open-slot count.
#[derive(Clone)]
pub struct Scheduler {
    calendar: Arc<dyn CalendarProvider>,
    bookings: Arc<dyn BookingRepository>,
    calendar_timeout: Duration,
}

impl Scheduler {
    pub fn new(
        calendar: Arc<dyn CalendarProvider>,
        bookings: Arc<dyn BookingRepository>,
        calendar_timeout: Duration,
    ) -> Self {
        Self {
            calendar,
            bookings,
            calendar_timeout,
        }
    }

    pub fn bookings(&self) -> &Arc<dyn BookingRepository> {
        &self.bookings
    }

    pub fn generate_slots(&self, from: DateTime<FixedOffset>, days_ahead: u32) -> Vec<TimeSlot> {
        generate_slots(from, days_ahead)
    }

    /// Drops every slot overlapping a busy event in the window the slots span.
    pub async fn filter_available(
        &self,
        calendar_id: &str,
        slots: Vec<TimeSlot>,
    ) -> Result<Vec<TimeSlot>, CalendarError> {
        let (Some(from), Some(to)) = (
            slots.iter().map(|s| s.start).min(),
            slots.iter().map(|s| s.end).max(),
        ) else {
            return Ok(slots);
        };

        let busy = self
            .bounded(self.calendar.list_events(calendar_id, from, to))
            .await?;
        Ok(slots::without_conflicts(slots, &busy))
    }

    /// `generate_slots` followed by `filter_available`.
    pub async fn available_slots(
        &self,
        calendar_id: &str,
        from: DateTime<FixedOffset>,
        days_ahead: u32,
    ) -> Result<Vec<TimeSlot>, CalendarError> {
        let slots = self.generate_slots(from, days_ahead);
        self.filter_available(calendar_id, slots).await
    }

    /// Books a one-hour interview.
    ///
    /// Order matters: the vacancy slot is reserved atomically before the calendar
    /// event is created. If the event or the final write fails, the slot is
    /// released and any created event is deleted, so a failed booking leaves no
    /// partial state behind.
    pub async fn schedule_interview(
        &self,
        tenant_id: &str,
        candidate_id: &str,
        request: BookingRequest,
    ) -> Result<Interview, BookingError> {
        let candidate = self
            .bookings
            .get_candidate(tenant_id, candidate_id)
            .await?
            .ok_or_else(|| BookingError::CandidateNotFound(candidate_id.to_string()))?;

        if let Some(existing) = self.bookings.get_interview(tenant_id, candidate_id).await? {
            return Err(BookingError::AlreadyScheduled(existing.start_time));
        }

        let start = request.start_time;
        let end = start + ChronoDuration::minutes(SLOT_MINUTES);

        let busy = self
            .bounded(self.calendar.list_events(&request.calendar_id, start, end))
            .await?;
        if busy
            .iter()
            .any(|b| slots::overlaps(start, end, b.start, b.end))
        {
            warn!(tenant_id, store_id = %request.store_id, %start, "slot taken before booking");
            return Err(BookingError::SlotTaken);
        }

        let Some(remaining) = self
            .bookings
            .reserve_vacancy_slot(tenant_id, &request.vacancy_id)
            .await?
        else {
            warn!(tenant_id, vacancy_id = %request.vacancy_id, "vacancy full at booking time");
            return Err(BookingError::NoOpenSlots);
        };

        let name = candidate.facts.name.as_deref().unwrap_or("Candidato");
        let draft = CalendarEventDraft {
            summary: format!("Entrevista: {name} - {}", request.vacancy_title),
            description: format!(
                "Candidato: {name}\nTeléfono: {candidate_id}\nCorreo: {}\nTienda: {}\nDirección: {}",
                candidate.facts.email.as_deref().unwrap_or("-"),
                request.store_name,
                request.address,
            ),
            start,
            end,
        };

        let event = match self
            .bounded(self.calendar.create_event(&request.calendar_id, &draft))
            .await
        {
            Ok(event) => event,
            Err(e) => {
                self.release(tenant_id, &request.vacancy_id).await;
                return Err(e.into());
            }
        };

        let now = Utc::now();
        let interview = Interview {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            candidate_id: candidate_id.to_string(),
            vacancy_id: request.vacancy_id.clone(),
            store_id: request.store_id.clone(),
            start_time: start,
            end_time: end,
            address: request.address.clone(),
            calendar_event_id: event.id,
            status: INTERVIEW_STATUS_SCHEDULED.to_string(),
            confirmed: false,
            created_at: now,
        };
        let application = ApplicationEntry {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            candidate_id: candidate_id.to_string(),
            store_id: request.store_id.clone(),
            vacancy_id: request.vacancy_id.clone(),
            brand: request.brand.clone(),
            status: APPLICATION_STATUS_INTERVIEW_SCHEDULED.to_string(),
            created_at: now,
        };

        if let Err(e) = self.bookings.record_booking(&interview, &application).await {
            warn!(
                tenant_id,
                event_id = %interview.calendar_event_id,
                "booking write failed after calendar event was created: {e}"
            );
            self.discard_event(&request.calendar_id, &interview.calendar_event_id)
                .await;
            self.release(tenant_id, &request.vacancy_id).await;
            return Err(match e {
                RepositoryError::Conflict => BookingError::SlotTaken,
                other => other.into(),
            });
        }

        info!(
            tenant_id,
            vacancy_id = %request.vacancy_id,
            remaining_slots = remaining,
            start = %start,
            "interview scheduled"
        );
        Ok(interview)
    }

    /// Marks the candidate's interview as confirmed. Confirming twice is a no-op.
    pub async fn confirm_interview(
        &self,
        tenant_id: &str,
        candidate_id: &str,
    ) -> Result<Interview, BookingError> {
        let interview = self
            .bookings
            .confirm_interview(tenant_id, candidate_id)
            .await?
            .ok_or(BookingError::NoInterview)?;
        info!(tenant_id, interview_id = %interview.id, "interview confirmed");
        Ok(interview)
    }

    async fn release(&self, tenant_id: &str, vacancy_id: &str) {
        if let Err(e) = self.bookings.release_vacancy_slot(tenant_id, vacancy_id).await {
            warn!(tenant_id, vacancy_id, "failed to release reserved vacancy slot: {e}");
        }
    }

    async fn discard_event(&self, calendar_id: &str, event_id: &str) {
        if let Err(e) = self
            .bounded(self.calendar.delete_event(calendar_id, event_id))
            .await
        {
            warn!(calendar_id, event_id, "failed to delete orphaned calendar event: {e}");
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CalendarError>>,
    ) -> Result<T, CalendarError> {
        tokio::time::timeout(self.calendar_timeout, call)
            .await
            .map_err(|_| CalendarError::Timeout)?
    }
}
