//! Calendar capability: the only way the scheduler sees external commitments.
//!
//! `GoogleCalendar` talks to the Calendar v3 REST API. `FakeCalendar` is a
//! deterministic in-memory calendar, injected in tests and demo deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::scheduling::slots::overlaps;

const GOOGLE_CALENDAR_API_URL: &str = "https://www.googleapis.com/calendar/v3";
const MAX_PAGES: usize = 10;

/// A committed interval `[start, end)` on a calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEventDraft {
    pub summary: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedEvent {
    pub id: String,
}

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("calendar API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("calendar call timed out")]
    Timeout,

    #[error("invalid calendar request: {0}")]
    InvalidRequest(String),

    #[error("calendar unavailable")]
    Unavailable,
}

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn list_events(
        &self,
        calendar_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CalendarError>;

    async fn create_event(
        &self,
        calendar_id: &str,
        draft: &CalendarEventDraft,
    ) -> Result<CreatedEvent, CalendarError>;

    /// Removes an event. Deleting an event that is already gone succeeds.
    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Google Calendar v3
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct GoogleCalendar {
    client: Client,
    base_url: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventList {
    #[serde(default)]
    items: Vec<EventItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventItem {
    status: Option<String>,
    transparency: Option<String>,
    start: Option<EventTime>,
    end: Option<EventTime>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    date_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<NaiveDate>,
}

impl EventTime {
    /// All-day events carry only a date; they block from that day's UTC midnight.
    fn instant(&self) -> Option<DateTime<Utc>> {
        self.date_time.or_else(|| {
            self.date
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
    }
}

#[derive(Debug, Serialize)]
struct EventInsert<'a> {
    summary: &'a str,
    description: &'a str,
    start: EventTime,
    end: EventTime,
}

#[derive(Debug, Deserialize)]
struct InsertedEvent {
    id: String,
}

impl GoogleCalendar {
    pub fn new(
        base_url: Option<String>,
        access_token: String,
        timeout: Duration,
    ) -> Result<Self, CalendarError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.unwrap_or_else(|| GOOGLE_CALENDAR_API_URL.to_string()),
            access_token,
        })
    }

    fn events_url(&self, calendar_id: &str) -> Result<Url, CalendarError> {
        self.url_for(&["calendars", calendar_id, "events"])
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> Result<Url, CalendarError> {
        self.url_for(&["calendars", calendar_id, "events", event_id])
    }

    fn url_for(&self, segments: &[&str]) -> Result<Url, CalendarError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| CalendarError::InvalidRequest(format!("bad base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| CalendarError::InvalidRequest("base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, CalendarError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(CalendarError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendar {
    async fn list_events(
        &self,
        calendar_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CalendarError> {
        let url = self.events_url(calendar_id)?;
        let time_min = from.to_rfc3339();
        let time_max = to.to_rfc3339();
        let mut busy = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut query = vec![
                ("timeMin", time_min.as_str()),
                ("timeMax", time_max.as_str()),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
            ];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }

            let response = self
                .client
                .get(url.clone())
                .bearer_auth(&self.access_token)
                .query(&query)
                .send()
                .await?;
            let page: EventList = Self::check(response).await?.json().await?;

            busy.extend(page.items.into_iter().filter_map(|item| {
                if item.status.as_deref() == Some("cancelled")
                    || item.transparency.as_deref() == Some("transparent")
                {
                    return None;
                }
                let start = item.start.as_ref()?.instant()?;
                let end = item.end.as_ref()?.instant()?;
                (start < end).then_some(BusyInterval { start, end })
            }));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(calendar_id, events = busy.len(), "fetched busy intervals");
        Ok(busy)
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        draft: &CalendarEventDraft,
    ) -> Result<CreatedEvent, CalendarError> {
        let body = EventInsert {
            summary: &draft.summary,
            description: &draft.description,
            start: EventTime {
                date_time: Some(draft.start),
                date: None,
            },
            end: EventTime {
                date_time: Some(draft.end),
                date: None,
            },
        };

        let response = self
            .client
            .post(self.events_url(calendar_id)?)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        let inserted: InsertedEvent = Self::check(response).await?.json().await?;

        Ok(CreatedEvent { id: inserted.id })
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError> {
        let response = self
            .client
            .delete(self.event_url(calendar_id, event_id)?)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        // 404 and 410 mean the event is already gone.
        if matches!(response.status().as_u16(), 404 | 410) {
            debug!(calendar_id, event_id, "event already deleted");
            return Ok(());
        }
        Self::check(response).await?;
        debug!(calendar_id, event_id, "deleted calendar event");
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FakeCalendar: deterministic, in-memory
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct FakeEvent {
    id: String,
    interval: BusyInterval,
}

/// In-memory calendar. Created events become busy intervals immediately, so a
/// second booking of the same time sees the first.
#[derive(Default)]
pub struct FakeCalendar {
    events: Mutex<HashMap<String, Vec<FakeEvent>>>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
    fail_creates: AtomicBool,
}

impl FakeCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_busy(&self, calendar_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.insert(calendar_id, BusyInterval { start, end });
    }

    fn insert(&self, calendar_id: &str, interval: BusyInterval) -> String {
        let id = format!("fake-event-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        if let Ok(mut events) = self.events.lock() {
            events
                .entry(calendar_id.to_string())
                .or_default()
                .push(FakeEvent {
                    id: id.clone(),
                    interval,
                });
        }
        id
    }

    /// Makes every call fail with `CalendarError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes `create_event` fail while listing keeps working.
    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn event_count(&self, calendar_id: &str) -> usize {
        self.events
            .lock()
            .map(|e| e.get(calendar_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl CalendarProvider for FakeCalendar {
    async fn list_events(
        &self,
        calendar_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CalendarError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CalendarError::Unavailable);
        }
        let events = self.events.lock().map_err(|_| CalendarError::Unavailable)?;
        Ok(events
            .get(calendar_id)
            .map(|list| {
                list.iter()
                    .map(|e| e.interval)
                    .filter(|b| overlaps(b.start, b.end, from, to))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        draft: &CalendarEventDraft,
    ) -> Result<CreatedEvent, CalendarError> {
        if self.unavailable.load(Ordering::SeqCst) || self.fail_creates.load(Ordering::SeqCst) {
            return Err(CalendarError::Unavailable);
        }
        let id = self.insert(
            calendar_id,
            BusyInterval {
                start: draft.start,
                end: draft.end,
            },
        );
        Ok(CreatedEvent { id })
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CalendarError::Unavailable);
        }
        let mut events = self.events.lock().map_err(|_| CalendarError::Unavailable)?;
        if let Some(list) = events.get_mut(calendar_id) {
            list.retain(|e| e.id != event_id);
        }
        Ok(())
    }
}
