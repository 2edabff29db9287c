use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::conversation::models::CandidateFacts;
use crate::db::RepositoryError;
use crate::models::interview::{
    ApplicationEntry, CandidateRecord, Interview, INTERVIEW_STATUS_CONFIRMED,
};

/// Storage for candidate records, interviews, application history and the
/// vacancy open-slot counter.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn get_candidate(
        &self,
        tenant_id: &str,
        candidate_id: &str,
    ) -> Result<Option<CandidateRecord>, RepositoryError>;

    /// Inserts the record or replaces its facts snapshot.
    async fn upsert_candidate(
        &self,
        tenant_id: &str,
        candidate_id: &str,
        facts: &CandidateFacts,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn get_interview(
        &self,
        tenant_id: &str,
        candidate_id: &str,
    ) -> Result<Option<Interview>, RepositoryError>;

    /// Atomically takes one open slot. Returns the remaining count, or `None`
    /// when the vacancy is closed or already full. Reaching zero closes it.
    async fn reserve_vacancy_slot(
        &self,
        tenant_id: &str,
        vacancy_id: &str,
    ) -> Result<Option<u32>, RepositoryError>;

    /// Gives back a slot taken by `reserve_vacancy_slot` when the booking could not complete.
    async fn release_vacancy_slot(
        &self,
        tenant_id: &str,
        vacancy_id: &str,
    ) -> Result<(), RepositoryError>;

    /// Writes the interview and its application entry together.
    async fn record_booking(
        &self,
        interview: &Interview,
        application: &ApplicationEntry,
    ) -> Result<(), RepositoryError>;

    /// Sets `confirmed`; returns the interview, or `None` if the candidate has none.
    async fn confirm_interview(
        &self,
        tenant_id: &str,
        candidate_id: &str,
    ) -> Result<Option<Interview>, RepositoryError>;

    async fn list_applications(
        &self,
        tenant_id: &str,
        candidate_id: &str,
    ) -> Result<Vec<ApplicationEntry>, RepositoryError>;
}

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct CandidateRow {
    tenant_id: String,
    id: String,
    facts: Json<CandidateFacts>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct InterviewRow {
    id: Uuid,
    tenant_id: String,
    candidate_id: String,
    vacancy_id: String,
    store_id: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    address: String,
    calendar_event_id: String,
    status: String,
    confirmed: bool,
    created_at: DateTime<Utc>,
}

impl From<InterviewRow> for Interview {
    fn from(row: InterviewRow) -> Self {
        Interview {
            id: row.id,
            tenant_id: row.tenant_id,
            candidate_id: row.candidate_id,
            vacancy_id: row.vacancy_id,
            store_id: row.store_id,
            start_time: row.start_time,
            end_time: row.end_time,
            address: row.address,
            calendar_event_id: row.calendar_event_id,
            status: row.status,
            confirmed: row.confirmed,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ApplicationRow {
    id: Uuid,
    tenant_id: String,
    candidate_id: String,
    store_id: String,
    vacancy_id: String,
    brand: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
}

const INTERVIEW_COLUMNS: &str = "id, tenant_id, candidate_id, vacancy_id, store_id, start_time, \
     end_time, address, calendar_event_id, status, confirmed, created_at";

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn get_candidate(
        &self,
        tenant_id: &str,
        candidate_id: &str,
    ) -> Result<Option<CandidateRecord>, RepositoryError> {
        let row: Option<CandidateRow> = sqlx::query_as(
            "SELECT tenant_id, id, facts, created_at, updated_at FROM candidates WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| CandidateRecord {
            tenant_id: r.tenant_id,
            id: r.id,
            facts: r.facts.0,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }))
    }

    async fn upsert_candidate(
        &self,
        tenant_id: &str,
        candidate_id: &str,
        facts: &CandidateFacts,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO candidates (tenant_id, id, facts, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (tenant_id, id) DO UPDATE SET facts = EXCLUDED.facts, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(candidate_id)
        .bind(Json(facts))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_interview(
        &self,
        tenant_id: &str,
        candidate_id: &str,
    ) -> Result<Option<Interview>, RepositoryError> {
        let row: Option<InterviewRow> = sqlx::query_as(&format!(
            "SELECT {INTERVIEW_COLUMNS} FROM interviews WHERE tenant_id = $1 AND candidate_id = $2"
        ))
        .bind(tenant_id)
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Interview::from))
    }

    async fn reserve_vacancy_slot(
        &self,
        tenant_id: &str,
        vacancy_id: &str,
    ) -> Result<Option<u32>, RepositoryError> {
        // Single conditional UPDATE: two concurrent reservations of the last
        // slot serialize on the row lock and the second matches no row.
        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE vacancies
            SET open_slots = open_slots - 1,
                status = CASE WHEN open_slots - 1 = 0 THEN 'closed' ELSE status END
            WHERE tenant_id = $1 AND id = $2 AND status = 'active' AND open_slots > 0
            RETURNING open_slots
            "#,
        )
        .bind(tenant_id)
        .bind(vacancy_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(remaining.map(|n| n.max(0) as u32))
    }

    async fn release_vacancy_slot(
        &self,
        tenant_id: &str,
        vacancy_id: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE vacancies
            SET open_slots = open_slots + 1, status = 'active'
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(vacancy_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_booking(
        &self,
        interview: &Interview,
        application: &ApplicationEntry,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO interviews ({INTERVIEW_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(interview.id)
        .bind(&interview.tenant_id)
        .bind(&interview.candidate_id)
        .bind(&interview.vacancy_id)
        .bind(&interview.store_id)
        .bind(interview.start_time)
        .bind(interview.end_time)
        .bind(&interview.address)
        .bind(&interview.calendar_event_id)
        .bind(&interview.status)
        .bind(interview.confirmed)
        .bind(interview.created_at)
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from_write)?;

        // Append-only history: never UPDATE an application row.
        sqlx::query(
            r#"
            INSERT INTO applications
                (id, tenant_id, candidate_id, store_id, vacancy_id, brand, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(application.id)
        .bind(&application.tenant_id)
        .bind(&application.candidate_id)
        .bind(&application.store_id)
        .bind(&application.vacancy_id)
        .bind(&application.brand)
        .bind(&application.status)
        .bind(application.created_at)
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from_write)?;

        tx.commit().await?;
        Ok(())
    }

    async fn confirm_interview(
        &self,
        tenant_id: &str,
        candidate_id: &str,
    ) -> Result<Option<Interview>, RepositoryError> {
        let row: Option<InterviewRow> = sqlx::query_as(&format!(
            "UPDATE interviews SET confirmed = TRUE, status = $3 WHERE tenant_id = $1 AND candidate_id = $2 RETURNING {INTERVIEW_COLUMNS}"
        ))
        .bind(tenant_id)
        .bind(candidate_id)
        .bind(INTERVIEW_STATUS_CONFIRMED)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Interview::from))
    }

    async fn list_applications(
        &self,
        tenant_id: &str,
        candidate_id: &str,
    ) -> Result<Vec<ApplicationEntry>, RepositoryError> {
        let rows: Vec<ApplicationRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, candidate_id, store_id, vacancy_id, brand, status, created_at
            FROM applications
            WHERE tenant_id = $1 AND candidate_id = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant_id)
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ApplicationEntry {
                id: r.id,
                tenant_id: r.tenant_id,
                candidate_id: r.candidate_id,
                store_id: r.store_id,
                vacancy_id: r.vacancy_id,
                brand: r.brand,
                status: r.status,
                created_at: r.created_at,
            })
            .collect())
    }
}
