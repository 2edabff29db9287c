//! The conversation engine: one inbound message in, one reply out.
//!
//! Pipeline per message:
//! 1. Resolve the tenant from the message origin.
//! 2. Take the identity lock.
//! 3. Load (or create, or reset) the conversation.
//! 4. Extract facts with the current state's extractor and merge them.
//! 5. Run the current state's side effect (store matching, slot lookup,
//!    booking, attendance confirmation).
//! 6. Compute the next state from facts and side-effect outcomes.
//! 7. Ask the language model to phrase the reply for that state.
//! 8. Persist everything with one versioned write.
//!
//! Any failure before step 8 leaves the stored conversation untouched and
//! yields a generic "please repeat" reply.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::extract::ExtractorSet;
use super::lock::IdentityLock;
use super::models::{
    CandidateFacts, ChatMessage, ConversationState, OfferedStore, OfferedVacancy, Offers, Role,
};
use super::prompts::{self, Notice, TurnContext};
use super::store::ConversationStore;
use super::transitions::{next_state, Gates};
use crate::db::RepositoryError;
use crate::llm_client::{LanguageModel, LlmError};
use crate::matching::{StoreMatch, StoreMatcher, DEFAULT_MAX_DISTANCE_KM};
use crate::messaging::InboundMessage;
use crate::models::interview::{Interview, TimeSlot};
use crate::models::tenant::{Tenant, DEFAULT_UTC_OFFSET_MINUTES};
use crate::scheduling::calendar::CalendarError;
use crate::scheduling::slots::display_local;
use crate::scheduling::{BookingError, BookingRequest, Scheduler};
use crate::tenancy::{TenantError, TenantResolver};

/// Calendar used when neither the store nor the tenant names one.
const DEFAULT_CALENDAR_ID: &str = "primary";

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_max_distance_km: f64,
    pub days_ahead: u32,
    /// Messages of history sent to the model.
    pub history_window: usize,
    pub llm_timeout: Duration,
    /// Interview times listed per offer.
    pub max_slots_offered: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_max_distance_km: DEFAULT_MAX_DISTANCE_KM,
            days_ahead: 5,
            history_window: 10,
            llm_timeout: Duration::from_secs(20),
            max_slots_offered: 6,
        }
    }
}

/// What to send back to the candidate.
#[derive(Debug, Clone, Serialize)]
pub struct EngineReply {
    pub to: String,
    pub text: String,
    /// State after the turn; `None` when the turn was abandoned.
    pub state: Option<ConversationState>,
    /// Whether the conversation record was written.
    #[serde(skip)]
    pub mutated: bool,
}

impl EngineReply {
    fn unchanged(to: &str, text: &str) -> Self {
        Self {
            to: to.to_string(),
            text: text.to_string(),
            state: None,
            mutated: false,
        }
    }
}

#[derive(Debug, Error)]
enum TurnError {
    #[error("repository: {0}")]
    Repository(#[from] RepositoryError),

    #[error("calendar: {0}")]
    Calendar(#[from] CalendarError),

    #[error("booking: {0}")]
    Booking(#[from] BookingError),

    #[error("language model: {0}")]
    Llm(#[from] LlmError),

    #[error("no {0} on offer to book")]
    MissingOffer(&'static str),
}

/// Outcome of the current state's side effect.
#[derive(Default)]
struct Effects {
    gates: Gates,
    notice: Option<Notice>,
    /// Set when an interview was booked during this turn.
    booked: Option<Interview>,
}

pub struct ConversationEngine {
    tenants: Arc<TenantResolver>,
    store: ConversationStore,
    locks: Arc<dyn IdentityLock>,
    extractors: ExtractorSet,
    matcher: StoreMatcher,
    scheduler: Arc<Scheduler>,
    llm: Arc<dyn LanguageModel>,
    settings: EngineSettings,
}

impl ConversationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenants: Arc<TenantResolver>,
        store: ConversationStore,
        locks: Arc<dyn IdentityLock>,
        extractors: ExtractorSet,
        matcher: StoreMatcher,
        scheduler: Arc<Scheduler>,
        llm: Arc<dyn LanguageModel>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            tenants,
            store,
            locks,
            extractors,
            matcher,
            scheduler,
            llm,
            settings,
        }
    }

    /// Processes one inbound message. Never fails: every error path ends in a
    /// safe reply with the stored conversation left as it was.
    pub async fn handle(&self, inbound: &InboundMessage) -> EngineReply {
        let identity = inbound.from.as_str();

        let tenant_id = match self.tenants.resolve(&inbound.origin_id).await {
            Ok(tenant_id) => tenant_id,
            Err(TenantError::UnknownOrigin(origin_id)) => {
                warn!(identity, %origin_id, "message from unmapped origin dropped");
                return EngineReply::unchanged(identity, prompts::UNKNOWN_CHANNEL);
            }
            Err(e) => {
                warn!(identity, "tenant resolution failed: {e}");
                return EngineReply::unchanged(identity, prompts::TECHNICAL_DIFFICULTY);
            }
        };

        let lease = match self.locks.acquire(identity).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(identity, %tenant_id, "identity lock unavailable: {e}");
                return EngineReply::unchanged(identity, prompts::TECHNICAL_DIFFICULTY);
            }
        };
        let result = self.process(inbound, &tenant_id).await;
        self.locks.release(lease).await;

        result.unwrap_or_else(|e| {
            warn!(identity, %tenant_id, "turn abandoned, conversation unchanged: {e}");
            EngineReply::unchanged(identity, prompts::TECHNICAL_DIFFICULTY)
        })
    }

    async fn process(
        &self,
        inbound: &InboundMessage,
        tenant_id: &str,
    ) -> Result<EngineReply, TurnError> {
        let now = Utc::now();
        let tenant = self.load_tenant(tenant_id).await?;
        let mut conversation = self
            .store
            .load_or_create(&inbound.from, tenant_id, &inbound.origin_id, now)
            .await?;
        let current = conversation.state;

        let extracted = self
            .extractors
            .extract(current, &inbound.text, &conversation.facts);
        let mut facts = conversation.facts.clone();
        let mut offers = conversation.offers.clone();
        if current == ConversationState::LocationInput && !extracted.is_empty() {
            // A new location replaces the old one instead of mixing with it.
            facts.location = None;
            facts.district = None;
        }
        facts.merge(extracted.clone());

        let effects = self
            .run_effects(current, &tenant, &conversation.identity, &extracted, &mut facts, &mut offers, now)
            .await?;

        let next = next_state(current, &facts, &effects.gates);
        let offset = utc_offset(&tenant);
        let interview_display = facts
            .interview_start
            .map(|start| display_local(&start.with_timezone(&offset)));

        let context = TurnContext {
            brand: &tenant.name,
            state: next,
            facts: &facts,
            offers: &offers,
            notice: effects.notice,
            interview_display: interview_display.clone(),
        };
        let system_prompt = prompts::build_system_prompt(&context);
        let history = conversation.recent_history(self.settings.history_window);

        let reply = match self.generate(&system_prompt, history, &inbound.text).await {
            Ok(text) => text,
            Err(e) => match (&effects.booked, offers.selected_store(&facts)) {
                (Some(_), Some(store)) => {
                    warn!(identity = %conversation.identity, "model unavailable after booking, using fixed confirmation: {e}");
                    prompts::booking_confirmed(
                        interview_display.as_deref().unwrap_or_default(),
                        &store.name,
                        &store.address,
                    )
                }
                _ => return Err(e.into()),
            },
        };

        conversation.append_message(Role::User, &inbound.text, now);
        conversation.facts = facts;
        conversation.offers = offers;
        conversation.state = next;
        conversation.append_message(Role::Assistant, &reply, Utc::now());

        if let Err(e) = self.store.save(&mut conversation).await {
            if effects.booked.is_some() {
                warn!(
                    identity = %conversation.identity,
                    tenant_id,
                    "interview booked but conversation write failed; next pick resumes from the booking"
                );
            }
            return Err(e.into());
        }

        info!(
            identity = %conversation.identity,
            tenant_id,
            from = current.as_str(),
            state = next.as_str(),
            "turn complete"
        );
        Ok(EngineReply {
            to: conversation.identity,
            text: reply,
            state: Some(next),
            mutated: true,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_effects(
        &self,
        current: ConversationState,
        tenant: &Tenant,
        identity: &str,
        extracted: &CandidateFacts,
        facts: &mut CandidateFacts,
        offers: &mut Offers,
        now: DateTime<Utc>,
    ) -> Result<Effects, TurnError> {
        let mut effects = Effects::default();

        match current {
            ConversationState::LocationInput => {
                let location = facts.location_input();
                if location.resolve().is_none() {
                    effects.notice = Some(Notice::LocationNotFound);
                    return Ok(effects);
                }
                let stores = self.match_stores(tenant, facts, None).await?;
                if stores.is_empty() {
                    effects.notice = Some(Notice::NoOpeningsNearby);
                } else {
                    offers.stores = stores;
                    facts.selected_store_index = None;
                    facts.selected_vacancy_index = None;
                    effects.gates.matches_available = true;
                }
            }

            ConversationState::StoreSelection => {
                if !within(facts.selected_store_index, offers.stores.len()) {
                    facts.selected_store_index = None;
                    effects.notice = Some(Notice::InvalidChoice);
                }
            }

            ConversationState::VacancySelection => {
                let listed = offers
                    .selected_store(facts)
                    .map_or(0, |store| store.vacancies.len());
                if !within(facts.selected_vacancy_index, listed) {
                    facts.selected_vacancy_index = None;
                }
            }

            ConversationState::Screening => {
                self.offer_slots(tenant, facts, offers, now, &mut effects)
                    .await?;
            }

            ConversationState::InterviewSlotOffer => {
                self.book_selected_slot(tenant, identity, facts, offers, now, &mut effects)
                    .await?;
            }

            ConversationState::Confirmed if extracted.attendance_confirmed == Some(true) => {
                match self.scheduler.confirm_interview(&tenant.id, identity).await {
                    Ok(_) => effects.notice = Some(Notice::AttendanceConfirmed),
                    Err(BookingError::NoInterview) => {
                        warn!(identity, tenant_id = %tenant.id, "attendance confirmed without an interview on record");
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            _ => {}
        }

        effects.gates.interview_booked |= facts.interview_start.is_some();
        Ok(effects)
    }

    /// Ranked stores around the candidate's location, leaving out `excluded`.
    async fn match_stores(
        &self,
        tenant: &Tenant,
        facts: &CandidateFacts,
        excluded: Option<&str>,
    ) -> Result<Vec<OfferedStore>, TurnError> {
        let location = facts.location_input();
        if location.resolve().is_none() {
            return Ok(Vec::new());
        }
        let max_km = tenant
            .max_distance_km
            .unwrap_or(self.settings.default_max_distance_km);
        let matches = self
            .matcher
            .find_matches(&location, facts.shift_availability(), &tenant.id, max_km)
            .await?;

        Ok(matches
            .into_iter()
            .map(OfferedStore::from)
            .filter_map(|mut store| {
                store
                    .vacancies
                    .retain(|v| Some(v.vacancy_id.as_str()) != excluded);
                (!store.vacancies.is_empty()).then_some(store)
            })
            .collect())
    }

    /// Replaces the offered slots with the currently free ones.
    async fn offer_slots(
        &self,
        tenant: &Tenant,
        facts: &mut CandidateFacts,
        offers: &mut Offers,
        now: DateTime<Utc>,
        effects: &mut Effects,
    ) -> Result<(), TurnError> {
        let calendar_id = calendar_for(tenant, offers, facts);
        let from = now.with_timezone(&utc_offset(tenant));
        let mut slots = self
            .scheduler
            .available_slots(&calendar_id, from, self.settings.days_ahead)
            .await?;
        slots.truncate(self.settings.max_slots_offered);

        facts.selected_slot_index = None;
        if slots.is_empty() {
            effects.notice = Some(Notice::NoSlots);
        } else {
            effects.gates.slots_available = true;
        }
        offers.slots = slots;
        Ok(())
    }

    async fn book_selected_slot(
        &self,
        tenant: &Tenant,
        identity: &str,
        facts: &mut CandidateFacts,
        offers: &mut Offers,
        now: DateTime<Utc>,
        effects: &mut Effects,
    ) -> Result<(), TurnError> {
        let Some(slot) = pick(&offers.slots, facts.selected_slot_index).cloned() else {
            facts.selected_slot_index = None;
            effects.notice = Some(Notice::InvalidChoice);
            return Ok(());
        };

        let request = booking_request(tenant, offers, facts, &slot)?;
        let slot_vacancy = request.vacancy_id.clone();
        self.scheduler
            .bookings()
            .upsert_candidate(&tenant.id, identity, facts, now)
            .await?;

        match self
            .scheduler
            .schedule_interview(&tenant.id, identity, request)
            .await
        {
            Ok(interview) => {
                facts.interview_start = Some(interview.start_time);
                effects.booked = Some(interview);
            }
            Err(BookingError::AlreadyScheduled(start)) => {
                debug!(identity, "candidate already booked, resuming from existing interview");
                facts.interview_start = Some(start);
            }
            Err(BookingError::SlotTaken) => {
                warn!(identity, tenant_id = %tenant.id, start = %slot.start, "slot taken at booking, re-offering");
                self.offer_slots(tenant, facts, offers, now, effects).await?;
                if effects.gates.slots_available {
                    effects.notice = Some(Notice::SlotTaken);
                }
            }
            Err(BookingError::NoOpenSlots) => {
                warn!(identity, tenant_id = %tenant.id, vacancy_id = %slot_vacancy, "vacancy filled before booking, back to store choice");
                let stores = self
                    .match_stores(tenant, facts, Some(slot_vacancy.as_str()))
                    .await?;
                facts.selected_store_index = None;
                facts.selected_vacancy_index = None;
                facts.selected_slot_index = None;
                effects.gates.matches_available = !stores.is_empty();
                effects.gates.vacancy_filled = true;
                effects.notice = Some(Notice::VacancyFilled);
                offers.stores = stores;
                offers.slots.clear();
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn load_tenant(&self, tenant_id: &str) -> Result<Tenant, TurnError> {
        Ok(self
            .tenants
            .directory()
            .get(tenant_id)
            .await?
            .unwrap_or_else(|| Tenant::unconfigured(tenant_id)))
    }

    async fn generate(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        user_message: &str,
    ) -> Result<String, LlmError> {
        let text = tokio::time::timeout(
            self.settings.llm_timeout,
            self.llm.generate(system_prompt, history, user_message),
        )
        .await
        .map_err(|_| LlmError::Timeout)??;

        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::EmptyContent);
        }
        Ok(text.to_string())
    }
}

impl From<StoreMatch> for OfferedStore {
    fn from(m: StoreMatch) -> Self {
        OfferedStore {
            store_id: m.store.id,
            name: m.store.name,
            address: m.store.address,
            brand: m.store.brand,
            calendar_id: m.store.calendar_id,
            distance_km: m.distance_km,
            vacancies: m
                .vacancies
                .into_iter()
                .map(|v| OfferedVacancy {
                    vacancy_id: v.id,
                    title: v.title,
                    shift_type: v.shift_type,
                    open_slots: v.open_slots,
                })
                .collect(),
        }
    }
}

/// True when `choice` is a 1-based index into a list of `len` items.
fn within(choice: Option<u8>, len: usize) -> bool {
    choice.is_some_and(|c| c >= 1 && usize::from(c) <= len)
}

fn pick<T>(items: &[T], choice: Option<u8>) -> Option<&T> {
    let index = usize::from(choice?).checked_sub(1)?;
    items.get(index)
}

fn utc_offset(tenant: &Tenant) -> FixedOffset {
    FixedOffset::east_opt(tenant.utc_offset_minutes * 60)
        .or_else(|| FixedOffset::east_opt(DEFAULT_UTC_OFFSET_MINUTES * 60))
        .unwrap_or_else(|| Utc.fix())
}

fn calendar_for(tenant: &Tenant, offers: &Offers, facts: &CandidateFacts) -> String {
    offers
        .selected_store(facts)
        .and_then(|store| store.calendar_id.clone())
        .or_else(|| tenant.calendar_id.clone())
        .unwrap_or_else(|| DEFAULT_CALENDAR_ID.to_string())
}

fn booking_request(
    tenant: &Tenant,
    offers: &Offers,
    facts: &CandidateFacts,
    slot: &TimeSlot,
) -> Result<BookingRequest, TurnError> {
    let store = offers
        .selected_store(facts)
        .ok_or(TurnError::MissingOffer("store"))?;
    let vacancy = offers
        .selected_vacancy(facts)
        .ok_or(TurnError::MissingOffer("vacancy"))?;
    Ok(BookingRequest {
        store_id: store.store_id.clone(),
        vacancy_id: vacancy.vacancy_id.clone(),
        start_time: slot.start,
        address: store.address.clone(),
        calendar_id: calendar_for(tenant, offers, facts),
        store_name: store.name.clone(),
        vacancy_title: vacancy.title.clone(),
        brand: store.brand.clone().or_else(|| Some(tenant.name.clone())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::conversation::lock::LocalIdentityLock;
    use crate::conversation::models::Conversation;
    use crate::matching::StoreListing;
    use crate::models::store::{ShiftType, Store, Vacancy, VacancyStatus};
    use crate::scheduling::calendar::FakeCalendar;
    use crate::scheduling::repository::BookingRepository;
    use crate::tenancy::cache::TenantCache;
    use crate::tenancy::MissPolicy;
    use crate::testing::{
        MemoryBookingRepository, MemoryConversationRepository, MemoryStoreDirectory,
        MemoryTenantDirectory, ScriptedModel,
    };

    const TENANT: &str = "tenant-bodega";
    const ORIGIN: &str = "wa-bodega";
    const OTHER_TENANT: &str = "tenant-farma";
    const OTHER_ORIGIN: &str = "wa-farma";
    const CANDIDATE: &str = "+51987654321";
    const CALENDAR: &str = "cal-bodega";

    /// Messages that take a new conversation to the slot offer, with the state after each.
    const TO_SLOT_OFFER: &[(&str, ConversationState)] = &[
        ("hola", ConversationState::TermsCheck),
        ("sí, acepto", ConversationState::BasicInfo),
        ("Ana Torres, 45678912, ana@correo.pe, 15/08/1995", ConversationState::HardFilters),
        ("sí, puedo turnos rotativos", ConversationState::HardFilters),
        ("sí, fines de semana también", ConversationState::SalaryExpectation),
        ("1,200 soles", ConversationState::LocationInput),
        // Miraflores
        ("-12.1211, -77.0297", ConversationState::StoreSelection),
        ("la 1", ConversationState::VacancySelection),
        ("1", ConversationState::Screening),
        ("Trabajé dos años en una tienda", ConversationState::InterviewSlotOffer),
    ];

    struct Harness {
        engine: ConversationEngine,
        conversations: Arc<MemoryConversationRepository>,
        bookings: Arc<MemoryBookingRepository>,
        stores: Arc<MemoryStoreDirectory>,
        calendar: Arc<FakeCalendar>,
        model: Arc<ScriptedModel>,
    }

    fn listing(id: &str, latitude: f64, shift_type: ShiftType, open_slots: u32) -> StoreListing {
        StoreListing {
            store: Store {
                id: id.to_string(),
                tenant_id: TENANT.to_string(),
                name: format!("Bodega {id}"),
                address: format!("Av. Arequipa {}", open_slots * 100),
                district: None,
                latitude: Some(latitude),
                longitude: Some(-77.0297),
                coordinates: None,
                brand: None,
                calendar_id: None,
            },
            vacancies: vec![Vacancy {
                id: format!("{id}-vac"),
                store_id: id.to_string(),
                title: "Cajero".to_string(),
                shift_type,
                open_slots,
                status: VacancyStatus::Active,
            }],
        }
    }

    fn harness(policy: MissPolicy) -> Harness {
        let tenants = Arc::new(MemoryTenantDirectory::new());
        tenants.upsert(Tenant {
            id: TENANT.to_string(),
            name: "Bodega Norte".to_string(),
            webhook_origin: Some(ORIGIN.to_string()),
            calendar_id: Some(CALENDAR.to_string()),
            // Store B at 6 km falls outside this radius but inside the 7 km default.
            max_distance_km: Some(5.0),
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            active: true,
        });
        tenants.add_tenant(OTHER_TENANT, Some(OTHER_ORIGIN));

        // Store A is ~3 km north of the candidate, store B ~6 km south.
        let stores = Arc::new(MemoryStoreDirectory::new());
        stores.add_listing(listing("a", -12.0941, ShiftType::Flexible, 2));
        stores.add_listing(listing("b", -12.1751, ShiftType::Fixed, 4));

        let bookings = Arc::new(MemoryBookingRepository::new());
        bookings.add_vacancy(TENANT, "a-vac", 2);
        bookings.add_vacancy(TENANT, "b-vac", 4);

        let calendar = Arc::new(FakeCalendar::new());
        let conversations = Arc::new(MemoryConversationRepository::new());
        let model = Arc::new(ScriptedModel::new());

        let resolver = TenantResolver::new(
            HashMap::new(),
            tenants,
            Arc::new(TenantCache::new(Duration::from_secs(60))),
            policy,
        );
        let engine = ConversationEngine::new(
            Arc::new(resolver),
            ConversationStore::new(conversations.clone(), None),
            Arc::new(LocalIdentityLock::new(Duration::from_secs(5))),
            ExtractorSet::default(),
            StoreMatcher::new(stores.clone()),
            Arc::new(Scheduler::new(
                calendar.clone(),
                bookings.clone(),
                Duration::from_secs(1),
            )),
            model.clone(),
            EngineSettings {
                llm_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        );

        Harness {
            engine,
            conversations,
            bookings,
            stores,
            calendar,
            model,
        }
    }

    fn message(text: &str) -> InboundMessage {
        InboundMessage {
            from: CANDIDATE.to_string(),
            text: text.to_string(),
            origin_id: ORIGIN.to_string(),
        }
    }

    async fn say(h: &Harness, text: &str) -> EngineReply {
        h.engine.handle(&message(text)).await
    }

    async fn reach_slot_offer(h: &Harness) {
        for (text, expected) in TO_SLOT_OFFER {
            let reply = say(h, text).await;
            assert_eq!(reply.state, Some(*expected), "after {text:?}");
        }
    }

    fn stored(h: &Harness) -> Conversation {
        h.conversations.snapshot(CANDIDATE).expect("conversation stored")
    }

    #[tokio::test]
    async fn test_full_conversation_books_and_confirms() {
        let h = harness(MissPolicy::FailClosed);
        reach_slot_offer(&h).await;

        let offered = stored(&h).offers.slots;
        assert!(!offered.is_empty());

        let reply = say(&h, "la 2").await;
        assert_eq!(reply.state, Some(ConversationState::Confirmed));
        assert_eq!(h.bookings.interview_count(), 1);
        assert_eq!(h.bookings.open_slots(TENANT, "a-vac"), Some(1));
        assert_eq!(h.calendar.event_count(CALENDAR), 1);

        let interview = h
            .bookings
            .get_interview(TENANT, CANDIDATE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(interview.start_time, offered[1].start);
        assert_eq!(interview.store_id, "a");
        assert!(!interview.confirmed);

        let candidate = h.bookings.get_candidate(TENANT, CANDIDATE).await.unwrap().unwrap();
        assert_eq!(candidate.facts.national_id.as_deref(), Some("45678912"));

        let reply = say(&h, "sí, ahí estaré").await;
        assert_eq!(reply.state, Some(ConversationState::Confirmed));
        let interview = h
            .bookings
            .get_interview(TENANT, CANDIDATE)
            .await
            .unwrap()
            .unwrap();
        assert!(interview.confirmed);

        let conversation = stored(&h);
        assert_eq!(conversation.messages.len(), 2 * (TO_SLOT_OFFER.len() + 2));
        assert_eq!(conversation.facts.attendance_confirmed, Some(true));
    }

    #[tokio::test]
    async fn test_store_beyond_tenant_radius_is_not_offered() {
        let h = harness(MissPolicy::FailClosed);
        for (text, _) in &TO_SLOT_OFFER[..7] {
            say(&h, text).await;
        }
        let conversation = stored(&h);
        assert_eq!(conversation.state, ConversationState::StoreSelection);
        assert_eq!(conversation.facts.shift_preference, Some(ShiftType::Flexible));

        let offered: Vec<&str> = conversation
            .offers
            .stores
            .iter()
            .map(|s| s.store_id.as_str())
            .collect();
        assert_eq!(offered, vec!["a"]);
        assert!((conversation.offers.stores[0].distance_km - 3.0).abs() < 0.05);
    }

    #[tokio::test]
    async fn test_declined_terms_reject_and_stay_rejected() {
        let h = harness(MissPolicy::FailClosed);
        say(&h, "hola").await;
        let reply = say(&h, "no acepto").await;
        assert_eq!(reply.state, Some(ConversationState::Rejected));

        let reply = say(&h, "bueno, sí acepto").await;
        assert_eq!(reply.state, Some(ConversationState::Rejected));
    }

    #[tokio::test]
    async fn test_model_failure_leaves_conversation_untouched() {
        let h = harness(MissPolicy::FailClosed);
        say(&h, "hola").await;
        let before = stored(&h);

        h.model.fail_next();
        let reply = say(&h, "sí, acepto").await;
        assert_eq!(reply.text, prompts::TECHNICAL_DIFFICULTY);
        assert_eq!(reply.state, None);
        assert!(!reply.mutated);

        let after = stored(&h);
        assert_eq!(after.state, ConversationState::TermsCheck);
        assert_eq!(after.messages, before.messages);
        assert_eq!(after.version, before.version);

        // The same answer passes the gate on retry.
        let reply = say(&h, "sí, acepto").await;
        assert_eq!(reply.state, Some(ConversationState::BasicInfo));
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_timeout_yields_generic_reply() {
        let h = harness(MissPolicy::FailClosed);
        h.model.stall_next(Duration::from_secs(60));

        let reply = say(&h, "hola").await;
        assert_eq!(reply.text, prompts::TECHNICAL_DIFFICULTY);
        assert!(stored(&h).messages.is_empty());
    }

    #[tokio::test]
    async fn test_calendar_outage_keeps_screening_state() {
        let h = harness(MissPolicy::FailClosed);
        for (text, _) in &TO_SLOT_OFFER[..9] {
            say(&h, text).await;
        }
        h.calendar.set_unavailable(true);

        let reply = say(&h, "Trabajé dos años en una tienda").await;
        assert_eq!(reply.text, prompts::TECHNICAL_DIFFICULTY);
        assert_eq!(stored(&h).state, ConversationState::Screening);

        h.calendar.set_unavailable(false);
        let reply = say(&h, "Trabajé dos años en una tienda").await;
        assert_eq!(reply.state, Some(ConversationState::InterviewSlotOffer));
    }

    #[tokio::test]
    async fn test_tenant_mismatch_resets_history() {
        let h = harness(MissPolicy::FailClosed);
        let mut old = Conversation::new(CANDIDATE, OTHER_TENANT, OTHER_ORIGIN, Utc::now());
        old.state = ConversationState::BasicInfo;
        old.facts.terms_accepted = Some(true);
        old.append_message(Role::User, "datos de otra campaña", Utc::now());
        h.conversations.put(old);

        let reply = say(&h, "hola").await;
        assert_eq!(reply.state, Some(ConversationState::TermsCheck));

        let conversation = stored(&h);
        assert_eq!(conversation.tenant_id, TENANT);
        assert_eq!(conversation.origin_id, ORIGIN);
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].text, "hola");
        assert_eq!(conversation.facts.terms_accepted, None);
    }

    #[tokio::test]
    async fn test_unknown_origin_fails_closed_without_state() {
        let h = harness(MissPolicy::FailClosed);
        let mut inbound = message("hola");
        inbound.origin_id = "unmapped".to_string();

        let reply = h.engine.handle(&inbound).await;
        assert_eq!(reply.text, prompts::UNKNOWN_CHANNEL);
        assert!(h.conversations.snapshot(CANDIDATE).is_none());
        assert_eq!(h.model.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_origin_uses_default_tenant_in_demo() {
        let h = harness(MissPolicy::DefaultTenant(TENANT.to_string()));
        let mut inbound = message("hola");
        inbound.origin_id = "unmapped".to_string();

        let reply = h.engine.handle(&inbound).await;
        assert_eq!(reply.state, Some(ConversationState::TermsCheck));
        assert_eq!(stored(&h).tenant_id, TENANT);
    }

    #[tokio::test]
    async fn test_taken_slot_is_reoffered_not_double_booked() {
        let h = harness(MissPolicy::FailClosed);
        reach_slot_offer(&h).await;

        let taken = stored(&h).offers.slots[0].clone();
        h.calendar.add_busy(CALENDAR, taken.start, taken.end);

        let reply = say(&h, "1").await;
        assert_eq!(reply.state, Some(ConversationState::InterviewSlotOffer));
        assert_eq!(h.bookings.interview_count(), 0);
        assert_eq!(h.bookings.open_slots(TENANT, "a-vac"), Some(2));

        let conversation = stored(&h);
        assert!(conversation.offers.slots.iter().all(|s| s.start != taken.start));
        assert_eq!(conversation.facts.selected_slot_index, None);
        assert!(h.model.last_prompt().unwrap().contains("just taken"));
    }

    #[tokio::test]
    async fn test_filled_vacancy_returns_to_store_choice() {
        let h = harness(MissPolicy::FailClosed);
        reach_slot_offer(&h).await;

        h.bookings.add_vacancy(TENANT, "a-vac", 0);
        h.stores.add_listing(listing("c", -12.1300, ShiftType::Flexible, 1));
        h.bookings.add_vacancy(TENANT, "c-vac", 1);

        let reply = say(&h, "1").await;
        assert_eq!(reply.state, Some(ConversationState::StoreSelection));
        assert_eq!(h.bookings.interview_count(), 0);
        assert!(h.model.last_prompt().unwrap().contains("filled up"));

        let conversation = stored(&h);
        let offered: Vec<&str> = conversation
            .offers
            .stores
            .iter()
            .map(|s| s.store_id.as_str())
            .collect();
        assert_eq!(offered, vec!["c"]);
        assert!(conversation.offers.slots.is_empty());
        assert_eq!(conversation.facts.selected_store_index, None);
        assert_eq!(conversation.facts.selected_vacancy_index, None);
        assert_eq!(conversation.facts.selected_slot_index, None);

        let reply = say(&h, "la 1").await;
        assert_eq!(reply.state, Some(ConversationState::VacancySelection));
    }

    #[tokio::test]
    async fn test_filled_vacancy_without_alternatives_asks_for_location() {
        let h = harness(MissPolicy::FailClosed);
        reach_slot_offer(&h).await;
        h.bookings.add_vacancy(TENANT, "a-vac", 0);

        let reply = say(&h, "1").await;
        assert_eq!(reply.state, Some(ConversationState::LocationInput));

        let conversation = stored(&h);
        assert!(conversation.offers.stores.is_empty());
        assert_eq!(conversation.facts.selected_store_index, None);
    }

    #[tokio::test]
    async fn test_booking_survives_model_failure() {
        let h = harness(MissPolicy::FailClosed);
        reach_slot_offer(&h).await;

        h.model.fail_next();
        let reply = say(&h, "1").await;
        assert_eq!(reply.state, Some(ConversationState::Confirmed));
        assert!(reply.text.starts_with("¡Listo!"));
        assert!(reply.text.contains("Bodega a"));
        assert_eq!(stored(&h).state, ConversationState::Confirmed);
    }

    #[tokio::test]
    async fn test_location_and_choice_misses_keep_state() {
        let h = harness(MissPolicy::FailClosed);
        for (text, _) in &TO_SLOT_OFFER[..6] {
            say(&h, text).await;
        }

        let reply = say(&h, "por el parque").await;
        assert_eq!(reply.state, Some(ConversationState::LocationInput));
        assert!(h.model.last_prompt().unwrap().contains("not recognized"));

        // Barranco is within the radius of store B only.
        let reply = say(&h, "vivo en Barranco").await;
        assert_eq!(reply.state, Some(ConversationState::StoreSelection));

        let reply = say(&h, "la 3").await;
        assert_eq!(reply.state, Some(ConversationState::StoreSelection));
        assert!(h.model.last_prompt().unwrap().contains("did not match"));
    }

    #[tokio::test]
    async fn test_duplicate_deliveries_are_serialized() {
        let h = harness(MissPolicy::FailClosed);
        let first = message("hola");
        let second = message("hola");

        let (a, b) = tokio::join!(h.engine.handle(&first), h.engine.handle(&second));
        assert!(a.mutated && b.mutated);

        let conversation = stored(&h);
        assert_eq!(conversation.messages.len(), 4);
        assert_eq!(conversation.version, 2);
        assert_eq!(conversation.state, ConversationState::TermsCheck);
    }
}
