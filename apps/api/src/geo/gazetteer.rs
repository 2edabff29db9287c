use std::sync::LazyLock;

use super::GeoPoint;
use crate::text::{contains_phrase, fold};

struct District {
    name: &'static str,
    aliases: &'static [&'static str],
    centroid: GeoPoint,
}

/// Metropolitan Lima and Callao district centroids.
static DISTRICTS: &[District] = &[
    District { name: "Ate", aliases: &["ate vitarte", "vitarte"], centroid: GeoPoint::new(-12.0256, -76.9214) },
    District { name: "Barranco", aliases: &[], centroid: GeoPoint::new(-12.1494, -77.0219) },
    District { name: "Breña", aliases: &[], centroid: GeoPoint::new(-12.0597, -77.0500) },
    District { name: "Callao", aliases: &[], centroid: GeoPoint::new(-12.0566, -77.1181) },
    District { name: "Cercado de Lima", aliases: &["lima cercado", "centro de lima"], centroid: GeoPoint::new(-12.0464, -77.0428) },
    District { name: "Chorrillos", aliases: &[], centroid: GeoPoint::new(-12.1667, -77.0167) },
    District { name: "Comas", aliases: &[], centroid: GeoPoint::new(-11.9333, -77.0500) },
    District { name: "Independencia", aliases: &[], centroid: GeoPoint::new(-11.9936, -77.0556) },
    District { name: "Jesús María", aliases: &[], centroid: GeoPoint::new(-12.0769, -77.0472) },
    District { name: "La Molina", aliases: &[], centroid: GeoPoint::new(-12.0867, -76.9350) },
    District { name: "La Victoria", aliases: &[], centroid: GeoPoint::new(-12.0653, -77.0306) },
    District { name: "Lince", aliases: &[], centroid: GeoPoint::new(-12.0847, -77.0364) },
    District { name: "Los Olivos", aliases: &[], centroid: GeoPoint::new(-11.9928, -77.0706) },
    District { name: "Magdalena del Mar", aliases: &["magdalena"], centroid: GeoPoint::new(-12.0906, -77.0722) },
    District { name: "Miraflores", aliases: &[], centroid: GeoPoint::new(-12.1211, -77.0297) },
    District { name: "Pueblo Libre", aliases: &[], centroid: GeoPoint::new(-12.0742, -77.0628) },
    District { name: "Rímac", aliases: &[], centroid: GeoPoint::new(-12.0300, -77.0300) },
    District { name: "San Borja", aliases: &[], centroid: GeoPoint::new(-12.1000, -77.0000) },
    District { name: "San Isidro", aliases: &[], centroid: GeoPoint::new(-12.0977, -77.0365) },
    District { name: "San Juan de Lurigancho", aliases: &["sjl"], centroid: GeoPoint::new(-11.9833, -77.0000) },
    District { name: "San Juan de Miraflores", aliases: &["sjm"], centroid: GeoPoint::new(-12.1561, -76.9711) },
    District { name: "San Martín de Porres", aliases: &["smp"], centroid: GeoPoint::new(-12.0167, -77.0667) },
    District { name: "San Miguel", aliases: &[], centroid: GeoPoint::new(-12.0769, -77.0906) },
    District { name: "Santiago de Surco", aliases: &["surco"], centroid: GeoPoint::new(-12.1459, -76.9910) },
    District { name: "Surquillo", aliases: &[], centroid: GeoPoint::new(-12.1128, -77.0197) },
    District { name: "Villa El Salvador", aliases: &["ves"], centroid: GeoPoint::new(-12.2133, -76.9389) },
];

/// (folded key, district) pairs, longest key first so that
/// "san juan de miraflores" wins over "miraflores".
static INDEX: LazyLock<Vec<(String, &'static District)>> = LazyLock::new(|| {
    let mut index: Vec<(String, &'static District)> = DISTRICTS
        .iter()
        .flat_map(|d| {
            std::iter::once(fold(d.name))
                .chain(d.aliases.iter().map(|a| fold(a)))
                .map(move |key| (key, d))
        })
        .collect();
    index.sort_by_key(|(key, _)| std::cmp::Reverse(key.len()));
    index
});

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistrictMatch {
    /// Canonical district name, with accents.
    pub name: &'static str,
    pub centroid: GeoPoint,
}

/// Case- and accent-insensitive lookup of a district named anywhere in `text`.
pub fn district_centroid(text: &str) -> Option<DistrictMatch> {
    let folded = fold(text);
    if folded.is_empty() {
        return None;
    }
    INDEX
        .iter()
        .find(|(key, _)| contains_phrase(&folded, key))
        .map(|(_, d)| DistrictMatch {
            name: d.name,
            centroid: d.centroid,
        })
}
