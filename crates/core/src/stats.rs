//! Numeric and string helpers shared by the anomaly detectors.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::expense::GeoPoint;

/// Mean radius of the earth in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Population distribution statistics for a sample of amounts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistributionStats {
    pub mean: f64,
    pub std_dev: f64,
    pub sample_count: usize,
}

impl DistributionStats {
    /// Returns `None` for an empty sample.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let count = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / count;
        let variance = samples.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / count;

        Some(Self { mean, std_dev: variance.sqrt(), sample_count: samples.len() })
    }

    /// Absolute z-score, or `None` when the spread is zero.
    pub fn z_score(&self, value: f64) -> Option<f64> {
        if self.std_dev <= f64::EPSILON {
            return None;
        }
        Some(((value - self.mean) / self.std_dev).abs())
    }

    /// Absolute deviation from the mean as a percentage of the mean.
    pub fn relative_deviation_pct(&self, value: f64) -> Option<f64> {
        if self.mean.abs() <= f64::EPSILON {
            return None;
        }
        Some(((value - self.mean) / self.mean).abs() * 100.0)
    }
}

pub fn decimal_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Great-circle distance in kilometres.
pub fn haversine_km(from: GeoPoint, to: GeoPoint) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let delta_lat = (to.latitude - from.latitude).to_radians();
    let delta_lng = (to.longitude - from.longitude).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Arithmetic mean of latitudes and longitudes.
pub fn centroid(points: &[GeoPoint]) -> Option<GeoPoint> {
    if points.is_empty() {
        return None;
    }

    let count = points.len() as f64;
    let latitude = points.iter().map(|point| point.latitude).sum::<f64>() / count;
    let longitude = points.iter().map(|point| point.longitude).sum::<f64>() / count;
    Some(GeoPoint { latitude, longitude })
}

/// `1 - distance / longer_len` over normalized text; two empty strings are identical.
pub fn similarity(left: &str, right: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize_text(left), &normalize_text(right))
}

/// Lowercase, alphanumerics only, single spaces.
pub fn normalize_text(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|ch| if ch.is_alphanumeric() { ch } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::{centroid, haversine_km, normalize_text, similarity, DistributionStats};
    use crate::domain::expense::GeoPoint;

    #[test]
    fn population_std_dev_matches_hand_calculation() {
        let stats = DistributionStats::from_samples(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0])
            .expect("non-empty sample");

        assert!((stats.mean - 5.0).abs() < 1e-10);
        assert!((stats.std_dev - 2.0).abs() < 1e-10);
        assert!((stats.z_score(9.0).unwrap_or_default() - 2.0).abs() < 1e-10);
        assert!((stats.z_score(1.0).unwrap_or_default() - 2.0).abs() < 1e-10);
    }

    #[test]
    fn zero_spread_has_no_z_score() {
        let stats = DistributionStats::from_samples(&[50.0, 50.0, 50.0]).expect("sample");
        assert!(stats.z_score(500.0).is_none());
        assert!((stats.relative_deviation_pct(500.0).unwrap_or_default() - 900.0).abs() < 1e-10);
        assert!(DistributionStats::from_samples(&[]).is_none());
    }

    #[test]
    fn haversine_san_francisco_to_new_york() {
        let sf = GeoPoint::new(37.77, -122.42);
        let ny = GeoPoint::new(40.71, -74.00);
        let distance = haversine_km(sf, ny);
        assert!((distance - 4_130.0).abs() < 25.0, "distance was {distance}");
        assert!(haversine_km(sf, sf).abs() < 1e-9);
    }

    #[test]
    fn centroid_is_mean_of_coordinates() {
        let center = centroid(&[
            GeoPoint::new(37.0, -122.0),
            GeoPoint::new(38.0, -123.0),
            GeoPoint::new(39.0, -121.0),
        ])
        .expect("non-empty");
        assert!((center.latitude - 38.0).abs() < 1e-10);
        assert!((center.longitude + 122.0).abs() < 1e-10);
        assert!(centroid(&[]).is_none());
    }

    #[test]
    fn similarity_scales_with_edit_distance() {
        assert!((similarity("kitten", "sitting") - (1.0 - 3.0 / 7.0)).abs() < 1e-10);
        assert!((similarity("", "") - 1.0).abs() < 1e-10);
        assert!(similarity("", "abc").abs() < 1e-10);
    }

    #[test]
    fn similarity_normalizes_punctuation_and_case() {
        assert!((similarity("STARBUCKS #1234", "starbucks 1234") - 1.0).abs() < 1e-10);
        assert!(similarity("Delta Air Lines", "Uber") < 0.6);
        assert_eq!(normalize_text("  Joe's   Diner! "), "joe s diner");
    }
}
