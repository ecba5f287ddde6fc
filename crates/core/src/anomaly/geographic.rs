use super::{AnomalyDetector, DetectionInput, DetectorSettings};
use crate::domain::anomaly::{AnomalyFinding, AnomalyType, Severity};
use crate::domain::expense::GeoPoint;
use crate::errors::DetectorError;
use crate::stats::{centroid, haversine_km};

/// Distance from the centroid of the submitter's recent expense locations.
#[derive(Clone, Debug)]
pub struct GeographicDetector {
    window_days: u32,
    min_points: usize,
    flag_km: f64,
    high_km: f64,
}

impl GeographicDetector {
    pub fn new(settings: &DetectorSettings) -> Self {
        Self {
            window_days: settings.geo_window_days,
            min_points: settings.geo_min_points,
            flag_km: settings.geo_flag_km,
            high_km: settings.geo_high_km,
        }
    }
}

impl AnomalyDetector for GeographicDetector {
    fn kind(&self) -> AnomalyType {
        AnomalyType::GeographicAnomaly
    }

    fn detect(&self, input: &DetectionInput) -> Result<Vec<AnomalyFinding>, DetectorError> {
        let Some(location) = input.expense.location else {
            return Ok(Vec::new());
        };
        if !location.is_valid() {
            return Err(DetectorError::InvalidInput(format!(
                "expense location ({}, {}) is out of range",
                location.latitude, location.longitude
            )));
        }

        let points: Vec<GeoPoint> = input
            .recent_history(self.window_days)
            .filter_map(|other| other.location)
            .filter(GeoPoint::is_valid)
            .collect();
        if points.len() < self.min_points {
            return Ok(Vec::new());
        }
        let Some(center) = centroid(&points) else {
            return Ok(Vec::new());
        };

        let distance_km = haversine_km(center, location);
        if distance_km <= self.flag_km {
            return Ok(Vec::new());
        }

        let severity = if distance_km > self.high_km { Severity::High } else { Severity::Medium };
        Ok(vec![AnomalyFinding::new(
            AnomalyType::GeographicAnomaly,
            severity,
            (50.0 + distance_km / 20.0).min(95.0),
            format!(
                "expense location is {distance_km:.0} km from the usual area ({} recent points)",
                points.len()
            ),
            input.now,
        )
        .with_metadata("distance_km", distance_km)
        .with_metadata("centroid_latitude", center.latitude)
        .with_metadata("centroid_longitude", center.longitude)
        .with_metadata("sample_count", points.len())])
    }
}
