//! In-memory implementations of every storage and collaborator trait, for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::conversation::models::{CandidateFacts, ChatMessage, Conversation};
use crate::conversation::store::ConversationRepository;
use crate::db::RepositoryError;
use crate::llm_client::{LanguageModel, LlmError};
use crate::matching::{StoreDirectory, StoreListing};
use crate::messaging::{MessageSender, OutboundMessage, TransportError};
use crate::models::interview::{
    ApplicationEntry, CandidateRecord, Interview, INTERVIEW_STATUS_CONFIRMED,
};
use crate::models::tenant::Tenant;
use crate::scheduling::repository::BookingRepository;
use crate::tenancy::directory::TenantDirectory;

fn poisoned() -> RepositoryError {
    RepositoryError::Corrupt("test store lock poisoned".to_string())
}

// ────────────────────────────────────────────────────────────────────────────
// Conversations
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryConversationRepository {
    records: Mutex<HashMap<String, Conversation>>,
    forced_conflicts: AtomicUsize,
}

impl MemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` updates fail with `Conflict`.
    pub fn fail_next_updates(&self, n: usize) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    pub fn snapshot(&self, identity: &str) -> Option<Conversation> {
        self.records.lock().ok()?.get(identity).cloned()
    }

    pub fn put(&self, conversation: Conversation) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(conversation.identity.clone(), conversation);
        }
    }
}

#[async_trait]
impl ConversationRepository for MemoryConversationRepository {
    async fn get(&self, identity: &str) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.records.lock().map_err(|_| poisoned())?.get(identity).cloned())
    }

    async fn insert(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let mut records = self.records.lock().map_err(|_| poisoned())?;
        if records.contains_key(&conversation.identity) {
            return Err(RepositoryError::Conflict);
        }
        records.insert(conversation.identity.clone(), conversation.clone());
        Ok(())
    }

    async fn update(&self, conversation: &Conversation) -> Result<i64, RepositoryError> {
        let forced = self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if forced.is_ok() {
            return Err(RepositoryError::Conflict);
        }

        let mut records = self.records.lock().map_err(|_| poisoned())?;
        let stored = records
            .get_mut(&conversation.identity)
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != conversation.version {
            return Err(RepositoryError::Conflict);
        }
        let mut next = conversation.clone();
        next.version += 1;
        *stored = next;
        Ok(conversation.version + 1)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tenants
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryTenantDirectory {
    tenants: Mutex<Vec<Tenant>>,
    origin_lookups: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tenant(&self, id: &str, origin: Option<&str>) {
        let mut tenant = Tenant::unconfigured(id);
        tenant.webhook_origin = origin.map(str::to_string);
        self.upsert(tenant);
    }

    pub fn upsert(&self, tenant: Tenant) {
        if let Ok(mut tenants) = self.tenants.lock() {
            tenants.retain(|t| t.id != tenant.id);
            tenants.push(tenant);
        }
    }

    pub fn origin_lookups(&self) -> usize {
        self.origin_lookups.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Corrupt("tenant directory offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantDirectory for MemoryTenantDirectory {
    async fn find_by_origin(&self, origin_id: &str) -> Result<Option<Tenant>, RepositoryError> {
        self.origin_lookups.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let tenants = self.tenants.lock().map_err(|_| poisoned())?;
        Ok(tenants
            .iter()
            .find(|t| t.active && t.webhook_origin.as_deref() == Some(origin_id))
            .cloned())
    }

    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>, RepositoryError> {
        self.check()?;
        let tenants = self.tenants.lock().map_err(|_| poisoned())?;
        Ok(tenants.iter().find(|t| t.id == tenant_id).cloned())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stores
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStoreDirectory {
    listings: Mutex<HashMap<String, Vec<StoreListing>>>,
}

impl MemoryStoreDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listing(&self, listing: StoreListing) {
        if let Ok(mut listings) = self.listings.lock() {
            listings
                .entry(listing.store.tenant_id.clone())
                .or_default()
                .push(listing);
        }
    }
}

#[async_trait]
impl StoreDirectory for MemoryStoreDirectory {
    async fn list_stores(&self, tenant_id: &str) -> Result<Vec<StoreListing>, RepositoryError> {
        let listings = self.listings.lock().map_err(|_| poisoned())?;
        Ok(listings.get(tenant_id).cloned().unwrap_or_default())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bookings
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct BookingTables {
    candidates: HashMap<(String, String), CandidateRecord>,
    /// (tenant, vacancy) → (open slots, active)
    vacancies: HashMap<(String, String), (u32, bool)>,
    interviews: Vec<Interview>,
    applications: Vec<ApplicationEntry>,
}

/// Every operation runs under one mutex, which makes the slot counter atomic
/// the same way the conditional `UPDATE` is in Postgres.
#[derive(Default)]
pub struct MemoryBookingRepository {
    tables: Mutex<BookingTables>,
}

impl MemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vacancy(&self, tenant_id: &str, vacancy_id: &str, open_slots: u32) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.vacancies.insert(
                (tenant_id.to_string(), vacancy_id.to_string()),
                (open_slots, open_slots > 0),
            );
        }
    }

    pub fn open_slots(&self, tenant_id: &str, vacancy_id: &str) -> Option<u32> {
        let tables = self.tables.lock().ok()?;
        tables
            .vacancies
            .get(&(tenant_id.to_string(), vacancy_id.to_string()))
            .map(|(slots, _)| *slots)
    }

    pub fn interview_count(&self) -> usize {
        self.tables.lock().map(|t| t.interviews.len()).unwrap_or_default()
    }
}

fn key(a: &str, b: &str) -> (String, String) {
    (a.to_string(), b.to_string())
}

#[async_trait]
impl BookingRepository for MemoryBookingRepository {
    async fn get_candidate(
        &self,
        tenant_id: &str,
        candidate_id: &str,
    ) -> Result<Option<CandidateRecord>, RepositoryError> {
        let tables = self.tables.lock().map_err(|_| poisoned())?;
        Ok(tables.candidates.get(&key(tenant_id, candidate_id)).cloned())
    }

    async fn upsert_candidate(
        &self,
        tenant_id: &str,
        candidate_id: &str,
        facts: &CandidateFacts,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;
        tables
            .candidates
            .entry(key(tenant_id, candidate_id))
            .and_modify(|c| {
                c.facts = facts.clone();
                c.updated_at = now;
            })
            .or_insert_with(|| CandidateRecord {
                tenant_id: tenant_id.to_string(),
                id: candidate_id.to_string(),
                facts: facts.clone(),
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn get_interview(
        &self,
        tenant_id: &str,
        candidate_id: &str,
    ) -> Result<Option<Interview>, RepositoryError> {
        let tables = self.tables.lock().map_err(|_| poisoned())?;
        Ok(tables
            .interviews
            .iter()
            .find(|i| i.tenant_id == tenant_id && i.candidate_id == candidate_id)
            .cloned())
    }

    async fn reserve_vacancy_slot(
        &self,
        tenant_id: &str,
        vacancy_id: &str,
    ) -> Result<Option<u32>, RepositoryError> {
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;
        let Some((slots, active)) = tables.vacancies.get_mut(&key(tenant_id, vacancy_id)) else {
            return Ok(None);
        };
        if !*active || *slots == 0 {
            return Ok(None);
        }
        *slots -= 1;
        if *slots == 0 {
            *active = false;
        }
        Ok(Some(*slots))
    }

    async fn release_vacancy_slot(
        &self,
        tenant_id: &str,
        vacancy_id: &str,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;
        if let Some((slots, active)) = tables.vacancies.get_mut(&key(tenant_id, vacancy_id)) {
            *slots += 1;
            *active = true;
        }
        Ok(())
    }

    async fn record_booking(
        &self,
        interview: &Interview,
        application: &ApplicationEntry,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;
        let clash = tables.interviews.iter().any(|i| {
            (i.tenant_id == interview.tenant_id && i.candidate_id == interview.candidate_id)
                || (i.store_id == interview.store_id && i.start_time == interview.start_time)
        });
        if clash {
            return Err(RepositoryError::Conflict);
        }
        tables.interviews.push(interview.clone());
        tables.applications.push(application.clone());
        Ok(())
    }

    async fn confirm_interview(
        &self,
        tenant_id: &str,
        candidate_id: &str,
    ) -> Result<Option<Interview>, RepositoryError> {
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;
        Ok(tables
            .interviews
            .iter_mut()
            .find(|i| i.tenant_id == tenant_id && i.candidate_id == candidate_id)
            .map(|i| {
                i.confirmed = true;
                i.status = INTERVIEW_STATUS_CONFIRMED.to_string();
                i.clone()
            }))
    }

    async fn list_applications(
        &self,
        tenant_id: &str,
        candidate_id: &str,
    ) -> Result<Vec<ApplicationEntry>, RepositoryError> {
        let tables = self.tables.lock().map_err(|_| poisoned())?;
        Ok(tables
            .applications
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.candidate_id == candidate_id)
            .cloned()
            .collect())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Language model
// ────────────────────────────────────────────────────────────────────────────

enum Scripted {
    Reply(String),
    Fail,
    Stall(Duration),
}

/// Answers from a queue of scripted outcomes, then with a numbered default
/// reply. Records every system prompt it was given.
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Scripted>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, step: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(step);
        }
    }

    pub fn reply(&self, text: &str) {
        self.push(Scripted::Reply(text.to_string()));
    }

    pub fn fail_next(&self) {
        self.push(Scripted::Fail);
    }

    pub fn stall_next(&self, delay: Duration) {
        self.push(Scripted::Stall(delay));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().ok()?.last().cloned()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(
        &self,
        system_prompt: &str,
        _history: &[ChatMessage],
        _user_message: &str,
    ) -> Result<String, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(system_prompt.to_string());
        }
        let step = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match step {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Fail) => Err(LlmError::Api {
                status: 529,
                message: "overloaded".to_string(),
            }),
            Some(Scripted::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Ok("demasiado tarde".to_string())
            }
            None => Ok(format!("respuesta {n}")),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transport
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<OutboundMessage>>,
    reject: AtomicBool,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                status: 503,
                message: "transport offline".to_string(),
            });
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        Ok(())
    }
}
