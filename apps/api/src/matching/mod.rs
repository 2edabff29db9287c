//! Store matching: ranks a tenant's hiring locations around a candidate.
//!
//! Algorithm:
//! 1. Resolve the candidate point (GPS first, then district centroid).
//! 2. Resolve each store point (direct lat/lng, then `coordinates`, then district centroid).
//! 3. Drop stores beyond the radius or without a point on either side.
//! 4. Keep only open vacancies compatible with the candidate's shift availability;
//!    drop stores left with none.
//! 5. Order by distance; inside a 0.5 km window prefer more open slots. Keep the top 3.

pub mod directory;

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::RepositoryError;
use crate::geo::{distance_km, district_centroid, GeoPoint};
use crate::models::store::{ShiftType, Store, Vacancy};

pub use directory::{StoreDirectory, StoreListing};

pub const DEFAULT_MAX_DISTANCE_KM: f64 = 7.0;
/// Stores closer together than this are ranked by capacity instead of distance.
pub const DISTANCE_TIE_WINDOW_KM: f64 = 0.5;
pub const MAX_MATCHES: usize = 3;

/// Where the candidate says they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateLocation {
    pub gps: Option<GeoPoint>,
    pub district: Option<String>,
}

impl CandidateLocation {
    pub fn resolve(&self) -> Option<GeoPoint> {
        self.gps
            .and_then(GeoPoint::usable)
            .or_else(|| self.district.as_deref().and_then(centroid_of))
    }
}

fn centroid_of(district: &str) -> Option<GeoPoint> {
    district_centroid(district).map(|m| m.centroid)
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreMatch {
    pub store: Store,
    pub vacancies: Vec<Vacancy>,
    pub total_open_slots: u32,
    pub distance_km: f64,
}

/// Resolves a store's coordinate: direct columns, explicit coordinates, district centroid.
pub fn resolve_store_point(store: &Store) -> Option<GeoPoint> {
    store
        .direct_point()
        .or_else(|| store.coordinates.and_then(GeoPoint::usable))
        .or_else(|| store.district.as_deref().and_then(centroid_of))
}

/// A flexible vacancy or a flexible candidate always fits; otherwise the types must agree.
pub fn is_shift_compatible(vacancy: ShiftType, candidate: ShiftType) -> bool {
    vacancy == ShiftType::Flexible || candidate == ShiftType::Flexible || vacancy == candidate
}

/// Reads store listings for a tenant and ranks them around the candidate.
#[derive(Clone)]
pub struct StoreMatcher {
    directory: Arc<dyn StoreDirectory>,
}

impl StoreMatcher {
    pub fn new(directory: Arc<dyn StoreDirectory>) -> Self {
        Self { directory }
    }

    pub async fn find_matches(
        &self,
        candidate: &CandidateLocation,
        availability: ShiftType,
        tenant_id: &str,
        max_distance_km: f64,
    ) -> Result<Vec<StoreMatch>, RepositoryError> {
        let Some(origin) = candidate.resolve() else {
            debug!(tenant_id, "candidate location unresolved, no matches");
            return Ok(Vec::new());
        };

        let listings = self.directory.list_stores(tenant_id).await?;
        let total = listings.len();
        let matches = rank_matches(origin, listings, availability, max_distance_km);
        debug!(
            tenant_id,
            stores = total,
            matched = matches.len(),
            "store matching complete"
        );
        Ok(matches)
    }
}

/// Pure ranking step, separated from I/O for testing.
pub fn rank_matches(
    origin: GeoPoint,
    listings: Vec<StoreListing>,
    availability: ShiftType,
    max_distance_km: f64,
) -> Vec<StoreMatch> {
    let mut matches: Vec<StoreMatch> = listings
        .into_iter()
        .filter_map(|listing| {
            let distance = distance_km(Some(origin), resolve_store_point(&listing.store));
            if distance > max_distance_km {
                return None;
            }

            let vacancies: Vec<Vacancy> = listing
                .vacancies
                .into_iter()
                .filter(|v| v.store_id == listing.store.id && v.is_open())
                .filter(|v| is_shift_compatible(v.shift_type, availability))
                .collect();
            if vacancies.is_empty() {
                return None;
            }

            let total_open_slots = vacancies
                .iter()
                .fold(0u32, |total, v| total.saturating_add(v.open_slots));
            Some(StoreMatch {
                store: listing.store,
                vacancies,
                total_open_slots,
                distance_km: distance,
            })
        })
        .collect();

    order_matches(&mut matches);
    matches.truncate(MAX_MATCHES);
    matches
}

fn compare_matches(a: &StoreMatch, b: &StoreMatch) -> Ordering {
    if (a.distance_km - b.distance_km).abs() < DISTANCE_TIE_WINDOW_KM {
        b.total_open_slots.cmp(&a.total_open_slots)
    } else {
        a.distance_km.total_cmp(&b.distance_km)
    }
}

/// The tie window makes `compare_matches` non-transitive, which `sort_by` does not
/// accept. Pre-sort by distance, then run a stable insertion pass with the
/// windowed comparison so every input has one deterministic order.
fn order_matches(matches: &mut [StoreMatch]) {
    matches.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    for i in 1..matches.len() {
        let mut j = i;
        while j > 0 && compare_matches(&matches[j], &matches[j - 1]) == Ordering::Less {
            matches.swap(j, j - 1);
            j -= 1;
        }
    }
}
