use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;
use crate::matching::CandidateLocation;
use crate::models::interview::TimeSlot;
use crate::models::store::ShiftType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Dialogue states. Stored as the snake_case string returned by `as_str`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Start,
    TermsCheck,
    BasicInfo,
    HardFilters,
    SalaryExpectation,
    LocationInput,
    StoreSelection,
    VacancySelection,
    Screening,
    InterviewSlotOffer,
    Confirmed,
    Rejected,
}

impl ConversationState {
    pub const ALL: [ConversationState; 12] = [
        ConversationState::Start,
        ConversationState::TermsCheck,
        ConversationState::BasicInfo,
        ConversationState::HardFilters,
        ConversationState::SalaryExpectation,
        ConversationState::LocationInput,
        ConversationState::StoreSelection,
        ConversationState::VacancySelection,
        ConversationState::Screening,
        ConversationState::InterviewSlotOffer,
        ConversationState::Confirmed,
        ConversationState::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Start => "start",
            ConversationState::TermsCheck => "terms_check",
            ConversationState::BasicInfo => "basic_info",
            ConversationState::HardFilters => "hard_filters",
            ConversationState::SalaryExpectation => "salary_expectation",
            ConversationState::LocationInput => "location_input",
            ConversationState::StoreSelection => "store_selection",
            ConversationState::VacancySelection => "vacancy_selection",
            ConversationState::Screening => "screening",
            ConversationState::InterviewSlotOffer => "interview_slot_offer",
            ConversationState::Confirmed => "confirmed",
            ConversationState::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConversationState::Confirmed | ConversationState::Rejected)
    }
}

/// Everything learned about the candidate so far. Every field is optional;
/// [`CandidateFacts::merge`] is the only way facts are combined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateFacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_accepted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub national_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_rotating_shifts: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_weekends: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shift_preference: Option<ShiftType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salary_expectation: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_store_index: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_vacancy_index: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screening_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_slot_index: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interview_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance_confirmed: Option<bool>,
}

fn overlay<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

impl CandidateFacts {
    /// Shallow merge: present fields in `incoming` overwrite, absent fields
    /// never erase what is already known.
    pub fn merge(&mut self, incoming: CandidateFacts) {
        overlay(&mut self.terms_accepted, incoming.terms_accepted);
        overlay(&mut self.name, incoming.name);
        overlay(&mut self.birth_date, incoming.birth_date);
        overlay(&mut self.national_id, incoming.national_id);
        overlay(&mut self.email, incoming.email);
        overlay(&mut self.available_rotating_shifts, incoming.available_rotating_shifts);
        overlay(&mut self.available_weekends, incoming.available_weekends);
        overlay(&mut self.shift_preference, incoming.shift_preference);
        overlay(&mut self.salary_expectation, incoming.salary_expectation);
        overlay(&mut self.district, incoming.district);
        overlay(&mut self.location, incoming.location);
        overlay(&mut self.selected_store_index, incoming.selected_store_index);
        overlay(&mut self.selected_vacancy_index, incoming.selected_vacancy_index);
        overlay(&mut self.screening_answer, incoming.screening_answer);
        overlay(&mut self.selected_slot_index, incoming.selected_slot_index);
        overlay(&mut self.interview_start, incoming.interview_start);
        overlay(&mut self.attendance_confirmed, incoming.attendance_confirmed);
    }

    pub fn is_empty(&self) -> bool {
        *self == CandidateFacts::default()
    }

    pub fn has_basic_info(&self) -> bool {
        self.name.is_some() && self.national_id.is_some() && self.email.is_some()
    }

    pub fn location_input(&self) -> CandidateLocation {
        CandidateLocation {
            gps: self.location,
            district: self.district.clone(),
        }
    }

    /// Declared availability used for shift compatibility; no declaration is
    /// treated as the stricter fixed availability.
    pub fn shift_availability(&self) -> ShiftType {
        self.shift_preference.unwrap_or(ShiftType::Fixed)
    }
}

/// A ranked store as shown to the candidate, frozen at the time it was offered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferedStore {
    pub store_id: String,
    pub name: String,
    pub address: String,
    pub brand: Option<String>,
    pub calendar_id: Option<String>,
    pub distance_km: f64,
    pub vacancies: Vec<OfferedVacancy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferedVacancy {
    pub vacancy_id: String,
    pub title: String,
    pub shift_type: ShiftType,
    pub open_slots: u32,
}

/// Options most recently shown to the candidate; numeric picks index into these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Offers {
    pub stores: Vec<OfferedStore>,
    pub slots: Vec<TimeSlot>,
}

impl Offers {
    pub fn selected_store(&self, facts: &CandidateFacts) -> Option<&OfferedStore> {
        let index = facts.selected_store_index? as usize;
        self.stores.get(index.checked_sub(1)?)
    }

    /// Falls back to the first vacancy when no valid pick was made.
    pub fn selected_vacancy(&self, facts: &CandidateFacts) -> Option<&OfferedVacancy> {
        let store = self.selected_store(facts)?;
        facts
            .selected_vacancy_index
            .and_then(|i| (i as usize).checked_sub(1))
            .and_then(|i| store.vacancies.get(i))
            .or_else(|| store.vacancies.first())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub identity: String,
    pub tenant_id: String,
    pub origin_id: String,
    pub state: ConversationState,
    pub messages: Vec<ChatMessage>,
    pub facts: CandidateFacts,
    pub offers: Offers,
    pub active: bool,
    /// Optimistic-concurrency token, bumped on every successful save.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_inbound_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn new(identity: &str, tenant_id: &str, origin_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            identity: identity.to_string(),
            tenant_id: tenant_id.to_string(),
            origin_id: origin_id.to_string(),
            state: ConversationState::Start,
            messages: Vec::new(),
            facts: CandidateFacts::default(),
            offers: Offers::default(),
            active: true,
            version: 0,
            created_at: now,
            updated_at: now,
            last_inbound_at: None,
        }
    }

    /// Discards history, facts and offers and returns to `Start` under a new owner.
    /// Identity, creation time and the concurrency token are kept.
    pub fn reset(&mut self, tenant_id: &str, origin_id: &str, now: DateTime<Utc>) {
        self.tenant_id = tenant_id.to_string();
        self.origin_id = origin_id.to_string();
        self.state = ConversationState::Start;
        self.messages.clear();
        self.facts = CandidateFacts::default();
        self.offers = Offers::default();
        self.active = true;
        self.updated_at = now;
        self.last_inbound_at = None;
    }

    pub fn append_message(&mut self, role: Role, text: &str, now: DateTime<Utc>) {
        self.messages.push(ChatMessage {
            role,
            text: text.to_string(),
            timestamp: now,
        });
        if role == Role::User {
            self.last_inbound_at = Some(now);
        }
        self.updated_at = now;
    }

    /// The last `window` messages, oldest first.
    pub fn recent_history(&self, window: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(window);
        &self.messages[start..]
    }

    pub fn is_idle(&self, now: DateTime<Utc>, idle_after: Duration) -> bool {
        match self.last_inbound_at {
            Some(last) => now - last > idle_after,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overwrites_present_fields_and_keeps_known_ones() {
        let mut facts = CandidateFacts {
            name: Some("Ana Torres".to_string()),
            email: Some("ana@example.com".to_string()),
            ..Default::default()
        };
        facts.merge(CandidateFacts {
            email: Some("ana.torres@example.com".to_string()),
            national_id: Some("45678912".to_string()),
            ..Default::default()
        });

        assert_eq!(facts.name.as_deref(), Some("Ana Torres"));
        assert_eq!(facts.email.as_deref(), Some("ana.torres@example.com"));
        assert_eq!(facts.national_id.as_deref(), Some("45678912"));
    }

    #[test]
    fn test_merge_with_empty_is_noop() {
        let mut facts = CandidateFacts {
            terms_accepted: Some(true),
            salary_expectation: Some(1200),
            ..Default::default()
        };
        let before = facts.clone();
        facts.merge(CandidateFacts::default());
        assert_eq!(facts, before);
    }

    #[test]
    fn test_state_string_roundtrip_covers_all_states() {
        for state in ConversationState::ALL {
            assert_eq!(ConversationState::parse(state.as_str()), Some(state));
        }
        assert_eq!(ConversationState::parse("bogus"), None);
    }

    #[test]
    fn test_facts_serialize_sparsely() {
        let facts = CandidateFacts {
            name: Some("Luis".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&facts).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "Luis" }));
        let back: CandidateFacts = serde_json::from_value(json).unwrap();
        assert_eq!(back, facts);
    }

    #[test]
    fn test_recent_history_returns_tail_in_order() {
        let now = Utc::now();
        let mut conv = Conversation::new("+51900000001", "t1", "o1", now);
        for i in 0..5 {
            conv.append_message(Role::User, &format!("m{i}"), now);
        }
        let tail: Vec<_> = conv.recent_history(2).iter().map(|m| m.text.as_str()).collect();
        assert_eq!(tail, vec!["m3", "m4"]);
        assert_eq!(conv.recent_history(50).len(), 5);
    }

    #[test]
    fn test_reset_clears_history_and_state() {
        let now = Utc::now();
        let mut conv = Conversation::new("+51900000001", "t1", "o1", now);
        conv.append_message(Role::User, "hola", now);
        conv.state = ConversationState::BasicInfo;
        conv.facts.terms_accepted = Some(true);
        conv.version = 4;

        conv.reset("t2", "o2", now);

        assert!(conv.messages.is_empty());
        assert_eq!(conv.state, ConversationState::Start);
        assert!(conv.facts.is_empty());
        assert_eq!(conv.tenant_id, "t2");
        assert_eq!(conv.version, 4);
    }

    #[test]
    fn test_is_idle_uses_last_inbound() {
        let now = Utc::now();
        let mut conv = Conversation::new("+51900000001", "t1", "o1", now);
        assert!(!conv.is_idle(now, Duration::hours(1)));
        conv.append_message(Role::User, "hola", now - Duration::hours(3));
        assert!(conv.is_idle(now, Duration::hours(1)));
        assert!(!conv.is_idle(now, Duration::hours(4)));
    }
}
