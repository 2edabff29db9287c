use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::RepositoryError;
use crate::models::tenant::Tenant;

/// Persistent tenant configuration.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Looks up the active tenant whose webhook origin attribute equals `origin_id`.
    async fn find_by_origin(&self, origin_id: &str) -> Result<Option<Tenant>, RepositoryError>;

    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>, RepositoryError>;
}

pub struct PgTenantDirectory {
    pool: PgPool,
}

impl PgTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn find_by_origin(&self, origin_id: &str) -> Result<Option<Tenant>, RepositoryError> {
        Ok(sqlx::query_as::<_, Tenant>(
            r#"
            SELECT id, name, webhook_origin, calendar_id, max_distance_km, utc_offset_minutes, active
            FROM tenants
            WHERE webhook_origin = $1 AND active
            "#,
        )
        .bind(origin_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>, RepositoryError> {
        Ok(sqlx::query_as::<_, Tenant>(
            r#"
            SELECT id, name, webhook_origin, calendar_id, max_distance_km, utc_offset_minutes, active
            FROM tenants
            WHERE id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?)
    }
}
