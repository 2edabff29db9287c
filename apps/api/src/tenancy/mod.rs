//! Tenant resolution: maps the origin of an inbound message to a tenant.
//!
//! Lookup order: static fallback table, cache, persistent directory. What
//! happens on a miss is decided by [`MissPolicy`]: production deployments
//! fail closed, demo and test deployments fall back to a designated tenant.

pub mod cache;
pub mod directory;
pub mod handlers;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use cache::TenantCache;
use directory::TenantDirectory;

use crate::db::RepositoryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissPolicy {
    /// Unknown origins are rejected.
    FailClosed,
    /// Unknown origins resolve to this tenant. Demo/test deployments only.
    DefaultTenant(String),
}

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("no tenant configured for origin '{0}'")]
    UnknownOrigin(String),

    #[error("tenant directory unavailable: {0}")]
    Directory(#[from] RepositoryError),
}

pub struct TenantResolver {
    static_table: HashMap<String, String>,
    directory: Arc<dyn TenantDirectory>,
    cache: Arc<TenantCache>,
    miss_policy: MissPolicy,
}

impl TenantResolver {
    pub fn new(
        static_table: HashMap<String, String>,
        directory: Arc<dyn TenantDirectory>,
        cache: Arc<TenantCache>,
        miss_policy: MissPolicy,
    ) -> Self {
        Self {
            static_table,
            directory,
            cache,
            miss_policy,
        }
    }

    pub fn cache(&self) -> &Arc<TenantCache> {
        &self.cache
    }

    pub fn directory(&self) -> &Arc<dyn TenantDirectory> {
        &self.directory
    }

    pub async fn resolve(&self, origin_id: &str) -> Result<String, TenantError> {
        if let Some(tenant_id) = self.static_table.get(origin_id) {
            debug!(origin_id, tenant_id = %tenant_id, "tenant resolved from static table");
            return Ok(tenant_id.clone());
        }

        if let Some(tenant_id) = self.cache.get(origin_id) {
            return Ok(tenant_id);
        }

        match self.directory.find_by_origin(origin_id).await {
            Ok(Some(tenant)) => {
                self.cache.insert(origin_id, &tenant.id);
                info!(origin_id, tenant_id = %tenant.id, "tenant resolved from directory");
                Ok(tenant.id)
            }
            Ok(None) => self.on_miss(origin_id, TenantError::UnknownOrigin(origin_id.to_string())),
            Err(e) => {
                warn!(origin_id, "tenant directory lookup failed: {e}");
                self.on_miss(origin_id, e.into())
            }
        }
    }

    fn on_miss(&self, origin_id: &str, err: TenantError) -> Result<String, TenantError> {
        match &self.miss_policy {
            MissPolicy::DefaultTenant(tenant_id) => {
                warn!(origin_id, tenant_id = %tenant_id, "unmapped origin, using default tenant");
                Ok(tenant_id.clone())
            }
            MissPolicy::FailClosed => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTenantDirectory;
    use std::time::Duration;

    fn build(policy: MissPolicy) -> (TenantResolver, Arc<MemoryTenantDirectory>) {
        let directory = Arc::new(MemoryTenantDirectory::new());
        directory.add_tenant("tenant-db", Some("wa-campaign-7"));
        let table = HashMap::from([("demo-channel".to_string(), "tenant-demo".to_string())]);
        let resolver = TenantResolver::new(
            table,
            directory.clone(),
            Arc::new(TenantCache::new(Duration::from_secs(300))),
            policy,
        );
        (resolver, directory)
    }

    #[tokio::test]
    async fn test_static_table_wins() {
        let (resolver, directory) = build(MissPolicy::FailClosed);
        assert_eq!(resolver.resolve("demo-channel").await.unwrap(), "tenant-demo");
        assert_eq!(directory.origin_lookups(), 0);
    }

    #[tokio::test]
    async fn test_directory_lookup_is_cached() {
        let (resolver, directory) = build(MissPolicy::FailClosed);
        assert_eq!(resolver.resolve("wa-campaign-7").await.unwrap(), "tenant-db");
        assert_eq!(resolver.resolve("wa-campaign-7").await.unwrap(), "tenant-db");
        assert_eq!(directory.origin_lookups(), 1);

        resolver.cache().invalidate("wa-campaign-7");
        resolver.resolve("wa-campaign-7").await.unwrap();
        assert_eq!(directory.origin_lookups(), 2);
    }

    #[tokio::test]
    async fn test_unknown_origin_falls_back_to_default_tenant() {
        let (resolver, _) = build(MissPolicy::DefaultTenant("tenant-default".to_string()));
        assert_eq!(
            resolver.resolve("misconfigured-channel").await.unwrap(),
            "tenant-default"
        );
    }

    #[tokio::test]
    async fn test_unknown_origin_fails_closed_in_production() {
        let (resolver, _) = build(MissPolicy::FailClosed);
        let err = resolver.resolve("misconfigured-channel").await.unwrap_err();
        assert!(matches!(err, TenantError::UnknownOrigin(o) if o == "misconfigured-channel"));
    }

    #[tokio::test]
    async fn test_directory_outage_uses_default_when_allowed() {
        let (resolver, directory) = build(MissPolicy::DefaultTenant("tenant-default".to_string()));
        directory.set_unavailable(true);
        assert_eq!(resolver.resolve("wa-campaign-7").await.unwrap(), "tenant-default");

        let (strict, directory) = build(MissPolicy::FailClosed);
        directory.set_unavailable(true);
        assert!(matches!(
            strict.resolve("wa-campaign-7").await,
            Err(TenantError::Directory(_))
        ));
    }
}
