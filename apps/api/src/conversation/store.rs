//! Conversation persistence.
//!
//! One record per identity. Every write is a compare-and-set on `version`, so
//! two deliveries racing on the same identity cannot silently overwrite each
//! other: the loser gets [`RepositoryError::Conflict`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info};

use super::models::{CandidateFacts, ChatMessage, Conversation, ConversationState, Offers};
#[cfg(test)]
use super::models::Role;
use crate::db::RepositoryError;

/// Attempts made by the single-field read-modify-write helpers before giving up.
#[cfg(test)]
const MAX_CAS_ATTEMPTS: usize = 3;

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn get(&self, identity: &str) -> Result<Option<Conversation>, RepositoryError>;

    /// Creates the record. `Conflict` if the identity already exists.
    async fn insert(&self, conversation: &Conversation) -> Result<(), RepositoryError>;

    /// Replaces the record if its stored version still equals
    /// `conversation.version`. Returns the new version.
    async fn update(&self, conversation: &Conversation) -> Result<i64, RepositoryError>;
}

pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ConversationRow {
    identity: String,
    tenant_id: String,
    origin_id: String,
    state: String,
    messages: Json<Vec<ChatMessage>>,
    facts: Json<CandidateFacts>,
    offers: Json<Offers>,
    active: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_inbound_at: Option<DateTime<Utc>>,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = RepositoryError;

    fn try_from(row: ConversationRow) -> Result<Self, Self::Error> {
        let state = ConversationState::parse(&row.state).ok_or_else(|| {
            RepositoryError::Corrupt(format!(
                "conversation {} has unknown state '{}'",
                row.identity, row.state
            ))
        })?;
        Ok(Conversation {
            identity: row.identity,
            tenant_id: row.tenant_id,
            origin_id: row.origin_id,
            state,
            messages: row.messages.0,
            facts: row.facts.0,
            offers: row.offers.0,
            active: row.active,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_inbound_at: row.last_inbound_at,
        })
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn get(&self, identity: &str) -> Result<Option<Conversation>, RepositoryError> {
        let row: Option<ConversationRow> = sqlx::query_as(
            r#"
            SELECT identity, tenant_id, origin_id, state, messages, facts, offers, active,
                   version, created_at, updated_at, last_inbound_at
            FROM conversations
            WHERE identity = $1
            "#,
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Conversation::try_from).transpose()
    }

    async fn insert(&self, c: &Conversation) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO conversations
                (identity, tenant_id, origin_id, state, messages, facts, offers, active,
                 version, created_at, updated_at, last_inbound_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&c.identity)
        .bind(&c.tenant_id)
        .bind(&c.origin_id)
        .bind(c.state.as_str())
        .bind(Json(&c.messages))
        .bind(Json(&c.facts))
        .bind(Json(&c.offers))
        .bind(c.active)
        .bind(c.version)
        .bind(c.created_at)
        .bind(c.updated_at)
        .bind(c.last_inbound_at)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from_write)?;
        Ok(())
    }

    async fn update(&self, c: &Conversation) -> Result<i64, RepositoryError> {
        let version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE conversations
            SET tenant_id = $2, origin_id = $3, state = $4, messages = $5, facts = $6,
                offers = $7, active = $8, updated_at = $9, last_inbound_at = $10,
                version = version + 1
            WHERE identity = $1 AND version = $11
            RETURNING version
            "#,
        )
        .bind(&c.identity)
        .bind(&c.tenant_id)
        .bind(&c.origin_id)
        .bind(c.state.as_str())
        .bind(Json(&c.messages))
        .bind(Json(&c.facts))
        .bind(Json(&c.offers))
        .bind(c.active)
        .bind(c.updated_at)
        .bind(c.last_inbound_at)
        .bind(c.version)
        .fetch_optional(&self.pool)
        .await?;

        version.ok_or(RepositoryError::Conflict)
    }
}

/// Owns conversation records: creation, tenant-safe reloads, inactivity
/// age-out and versioned writes.
#[derive(Clone)]
pub struct ConversationStore {
    repo: Arc<dyn ConversationRepository>,
    idle_after: Option<Duration>,
}

impl ConversationStore {
    pub fn new(repo: Arc<dyn ConversationRepository>, idle_after: Option<Duration>) -> Self {
        Self { repo, idle_after }
    }

    /// Returns the identity's conversation under `tenant_id`.
    ///
    /// A stored record owned by another tenant, or idle past the configured
    /// limit, is reset to `Start` with empty history and persisted before it
    /// is returned.
    pub async fn load_or_create(
        &self,
        identity: &str,
        tenant_id: &str,
        origin_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError> {
        let Some(mut conversation) = self.repo.get(identity).await? else {
            let conversation = Conversation::new(identity, tenant_id, origin_id, now);
            self.repo.insert(&conversation).await?;
            debug!(identity, tenant_id, "conversation created");
            return Ok(conversation);
        };

        let reason = if conversation.tenant_id != tenant_id {
            Some("tenant mismatch")
        } else if self
            .idle_after
            .is_some_and(|limit| conversation.is_idle(now, limit))
        {
            Some("inactivity")
        } else {
            None
        };

        if let Some(reason) = reason {
            info!(
                identity,
                stored_tenant = %conversation.tenant_id,
                tenant_id,
                reason,
                "resetting conversation"
            );
            conversation.reset(tenant_id, origin_id, now);
            self.save(&mut conversation).await?;
        }
        Ok(conversation)
    }

    /// Versioned write of the whole record; bumps `conversation.version` on success.
    pub async fn save(&self, conversation: &mut Conversation) -> Result<(), RepositoryError> {
        conversation.version = self.repo.update(conversation).await?;
        Ok(())
    }
}

/// Single-field writes, each retried on a lost compare-and-set. A turn commits
/// through one `save`, so only tests write field by field.
#[cfg(test)]
impl ConversationStore {
    pub async fn get(&self, identity: &str) -> Result<Option<Conversation>, RepositoryError> {
        self.repo.get(identity).await
    }

    pub async fn append_message(
        &self,
        identity: &str,
        role: Role,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError> {
        self.modify(identity, |c| c.append_message(role, text, now))
            .await
    }

    /// Shallow-merges `facts`; fields already known are never removed.
    pub async fn update_facts(
        &self,
        identity: &str,
        facts: &CandidateFacts,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError> {
        self.modify(identity, |c| {
            c.facts.merge(facts.clone());
            c.updated_at = now;
        })
        .await
    }

    pub async fn set_state(
        &self,
        identity: &str,
        state: ConversationState,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError> {
        self.modify(identity, |c| {
            c.state = state;
            c.updated_at = now;
        })
        .await
    }

    async fn modify<F>(&self, identity: &str, mut apply: F) -> Result<Conversation, RepositoryError>
    where
        F: FnMut(&mut Conversation) + Send,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut conversation = self
                .repo
                .get(identity)
                .await?
                .ok_or(RepositoryError::NotFound)?;
            apply(&mut conversation);
            match self.repo.update(&conversation).await {
                Ok(version) => {
                    conversation.version = version;
                    return Ok(conversation);
                }
                Err(RepositoryError::Conflict) => {
                    debug!(identity, "conversation write lost a race, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(RepositoryError::Conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryConversationRepository;

    const IDENTITY: &str = "+51987654321";

    fn store(idle_after: Option<Duration>) -> (ConversationStore, Arc<MemoryConversationRepository>) {
        let repo = Arc::new(MemoryConversationRepository::new());
        (ConversationStore::new(repo.clone(), idle_after), repo)
    }

    #[tokio::test]
    async fn test_load_or_create_creates_once() {
        let (store, _) = store(None);
        let now = Utc::now();
        let first = store.load_or_create(IDENTITY, "t1", "o1", now).await.unwrap();
        assert_eq!(first.state, ConversationState::Start);

        store
            .append_message(IDENTITY, Role::User, "hola", now)
            .await
            .unwrap();
        let again = store.load_or_create(IDENTITY, "t1", "o1", now).await.unwrap();
        assert_eq!(again.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_tenant_mismatch_resets_on_reload() {
        let (store, _) = store(None);
        let now = Utc::now();
        store.load_or_create(IDENTITY, "t1", "o1", now).await.unwrap();
        store.append_message(IDENTITY, Role::User, "hola", now).await.unwrap();
        store
            .set_state(IDENTITY, ConversationState::BasicInfo, now)
            .await
            .unwrap();

        let reloaded = store.load_or_create(IDENTITY, "t2", "o9", now).await.unwrap();
        assert!(reloaded.messages.is_empty());
        assert_eq!(reloaded.state, ConversationState::Start);
        assert_eq!(reloaded.tenant_id, "t2");

        // The reset was persisted, not only returned.
        let stored = store.get(IDENTITY).await.unwrap().unwrap();
        assert!(stored.messages.is_empty());
        assert_eq!(stored.tenant_id, "t2");
    }

    #[tokio::test]
    async fn test_idle_conversation_ages_out() {
        let (store, _) = store(Some(Duration::hours(24)));
        let start = Utc::now() - Duration::hours(48);
        store.load_or_create(IDENTITY, "t1", "o1", start).await.unwrap();
        store.append_message(IDENTITY, Role::User, "hola", start).await.unwrap();

        let reloaded = store
            .load_or_create(IDENTITY, "t1", "o1", Utc::now())
            .await
            .unwrap();
        assert!(reloaded.messages.is_empty());
    }

    #[tokio::test]
    async fn test_update_facts_never_erases_known_fields() {
        let (store, _) = store(None);
        let now = Utc::now();
        store.load_or_create(IDENTITY, "t1", "o1", now).await.unwrap();
        store
            .update_facts(
                IDENTITY,
                &CandidateFacts {
                    name: Some("Ana Torres".into()),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();
        let merged = store
            .update_facts(
                IDENTITY,
                &CandidateFacts {
                    email: Some("ana@x.pe".into()),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();
        assert_eq!(merged.facts.name.as_deref(), Some("Ana Torres"));
        assert_eq!(merged.facts.email.as_deref(), Some("ana@x.pe"));
    }

    #[tokio::test]
    async fn test_stale_save_is_rejected() {
        let (store, _) = store(None);
        let now = Utc::now();
        let mut a = store.load_or_create(IDENTITY, "t1", "o1", now).await.unwrap();
        let mut b = a.clone();

        a.append_message(Role::User, "primero", now);
        store.save(&mut a).await.unwrap();

        b.append_message(Role::User, "segundo", now);
        let err = store.save(&mut b).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict));

        let stored = store.get(IDENTITY).await.unwrap().unwrap();
        assert_eq!(stored.messages.len(), 1);
        assert_eq!(stored.messages[0].text, "primero");
    }

    #[tokio::test]
    async fn test_single_field_writes_retry_past_conflicts() {
        let (store, repo) = store(None);
        let now = Utc::now();
        store.load_or_create(IDENTITY, "t1", "o1", now).await.unwrap();
        repo.fail_next_updates(2);

        let updated = store
            .set_state(IDENTITY, ConversationState::TermsCheck, now)
            .await
            .unwrap();
        assert_eq!(updated.state, ConversationState::TermsCheck);
    }
}
