use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

/// A physical location that hires. Coordinates may come from the direct
/// latitude/longitude columns, the `coordinates` document, or neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub address: String,
    pub district: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub coordinates: Option<GeoPoint>,
    pub brand: Option<String>,
    pub calendar_id: Option<String>,
}

impl Store {
    pub fn direct_point(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => GeoPoint::new(lat, lng).usable(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftType {
    Fixed,
    Flexible,
}

impl ShiftType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftType::Fixed => "fixed",
            ShiftType::Flexible => "flexible",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fixed" => Some(ShiftType::Fixed),
            "flexible" => Some(ShiftType::Flexible),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VacancyStatus {
    Active,
    Closed,
}

impl VacancyStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(VacancyStatus::Active),
            "closed" => Some(VacancyStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vacancy {
    pub id: String,
    pub store_id: String,
    pub title: String,
    pub shift_type: ShiftType,
    pub open_slots: u32,
    pub status: VacancyStatus,
}

impl Vacancy {
    pub fn is_open(&self) -> bool {
        self.status == VacancyStatus::Active && self.open_slots > 0
    }
}
