use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Origin → tenant cache owned by the resolver.
///
/// Entries expire after `ttl`; `invalidate` and `clear` drop them early, e.g.
/// after an admin re-points a channel to another tenant.
pub struct TenantCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl TenantCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, origin_id: &str) -> Option<String> {
        let entries = self.entries.read().ok()?;
        let (tenant_id, stored_at) = entries.get(origin_id)?;
        (stored_at.elapsed() < self.ttl).then(|| tenant_id.clone())
    }

    pub fn insert(&self, origin_id: &str, tenant_id: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(origin_id.to_string(), (tenant_id.to_string(), Instant::now()));
        }
    }

    /// Returns whether an entry was present.
    pub fn invalidate(&self, origin_id: &str) -> bool {
        self.entries
            .write()
            .map(|mut e| e.remove(origin_id).is_some())
            .unwrap_or(false)
    }

    /// Returns how many entries were dropped.
    pub fn clear(&self) -> usize {
        self.entries
            .write()
            .map(|mut e| {
                let n = e.len();
                e.clear();
                n
            })
            .unwrap_or(0)
    }
}
