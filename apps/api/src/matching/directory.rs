use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use crate::db::RepositoryError;
use crate::geo::GeoPoint;
use crate::models::store::{ShiftType, Store, Vacancy, VacancyStatus};

/// A store together with its currently open vacancies.
#[derive(Debug, Clone)]
pub struct StoreListing {
    pub store: Store,
    pub vacancies: Vec<Vacancy>,
}

/// Read-only view over a tenant's stores and vacancies.
#[async_trait]
pub trait StoreDirectory: Send + Sync {
    async fn list_stores(&self, tenant_id: &str) -> Result<Vec<StoreListing>, RepositoryError>;
}

pub struct PgStoreDirectory {
    pool: PgPool,
}

impl PgStoreDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct StoreRow {
    id: String,
    tenant_id: String,
    name: String,
    address: String,
    district: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    coordinates: Option<Json<GeoPoint>>,
    brand: Option<String>,
    calendar_id: Option<String>,
}

#[derive(FromRow)]
struct VacancyRow {
    id: String,
    store_id: String,
    title: String,
    shift_type: String,
    open_slots: i32,
    status: String,
}

impl TryFrom<VacancyRow> for Vacancy {
    type Error = RepositoryError;

    fn try_from(row: VacancyRow) -> Result<Self, Self::Error> {
        let shift_type = ShiftType::parse(&row.shift_type).ok_or_else(|| {
            RepositoryError::Corrupt(format!("vacancy {} has shift_type '{}'", row.id, row.shift_type))
        })?;
        let status = VacancyStatus::parse(&row.status).ok_or_else(|| {
            RepositoryError::Corrupt(format!("vacancy {} has status '{}'", row.id, row.status))
        })?;
        Ok(Vacancy {
            id: row.id,
            store_id: row.store_id,
            title: row.title,
            shift_type,
            open_slots: row.open_slots.max(0) as u32,
            status,
        })
    }
}

#[async_trait]
impl StoreDirectory for PgStoreDirectory {
    async fn list_stores(&self, tenant_id: &str) -> Result<Vec<StoreListing>, RepositoryError> {
        let stores: Vec<StoreRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, name, address, district, latitude, longitude,
                   coordinates, brand, calendar_id
            FROM stores
            WHERE tenant_id = $1
            ORDER BY id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let vacancy_rows: Vec<VacancyRow> = sqlx::query_as(
            r#"
            SELECT id, store_id, title, shift_type, open_slots, status
            FROM vacancies
            WHERE tenant_id = $1 AND status = 'active' AND open_slots > 0
            ORDER BY id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let mut by_store: HashMap<String, Vec<Vacancy>> = HashMap::new();
        for row in vacancy_rows {
            let vacancy = Vacancy::try_from(row)?;
            by_store.entry(vacancy.store_id.clone()).or_default().push(vacancy);
        }

        Ok(stores
            .into_iter()
            .map(|row| {
                let vacancies = by_store.remove(&row.id).unwrap_or_default();
                StoreListing {
                    store: Store {
                        id: row.id,
                        tenant_id: row.tenant_id,
                        name: row.name,
                        address: row.address,
                        district: row.district,
                        latitude: row.latitude,
                        longitude: row.longitude,
                        coordinates: row.coordinates.map(|Json(p)| p),
                        brand: row.brand,
                        calendar_id: row.calendar_id,
                    },
                    vacancies,
                }
            })
            .collect())
    }
}
