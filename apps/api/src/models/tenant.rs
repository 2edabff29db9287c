use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lima is UTC-5 with no daylight saving.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = -300;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub webhook_origin: Option<String>,
    pub calendar_id: Option<String>,
    pub max_distance_km: Option<f64>,
    pub utc_offset_minutes: i32,
    pub active: bool,
}

impl Tenant {
    /// Settings used when a tenant id resolves but has no configuration row,
    /// e.g. the default tenant in demo deployments.
    pub fn unconfigured(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            webhook_origin: None,
            calendar_id: None,
            max_distance_km: None,
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            active: true,
        }
    }
}
