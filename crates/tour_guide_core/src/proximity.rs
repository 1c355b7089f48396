//! crates/tour_guide_core/src/proximity.rs
//!
//! Straight-line distance math for the point-of-interest trigger. A caller
//! feeds periodic location fixes into a `ProximityTrigger`; when the fix
//! enters a POI's radius the trigger fires once, so location-bound audio
//! auto-starts exactly one time per visit.

use crate::domain::GeoLocation;
use std::collections::HashSet;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Radius applied to POIs that do not declare their own.
pub const DEFAULT_TRIGGER_RADIUS_M: f64 = 50.0;

/// A point of interest with optional location-bound audio.
#[derive(Debug, Clone, PartialEq)]
pub struct PointOfInterest {
    pub id: String,
    pub name: String,
    pub location: GeoLocation,
    /// Trigger radius in meters; `None` falls back to the default.
    pub radius_m: Option<f64>,
    /// Guide to replay when this POI triggers, if one exists.
    pub guide_id: Option<String>,
}

/// Great-circle distance between two fixes, in meters.
pub fn haversine_distance_m(a: &GeoLocation, b: &GeoLocation) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Latched proximity trigger over a fixed POI set.
#[derive(Debug)]
pub struct ProximityTrigger {
    pois: Vec<PointOfInterest>,
    triggered: HashSet<String>,
}

impl ProximityTrigger {
    pub fn new(pois: Vec<PointOfInterest>) -> Self {
        Self {
            pois,
            triggered: HashSet::new(),
        }
    }

    /// Feeds one location fix. Returns the nearest POI whose radius the fix
    /// is inside and that has not fired before; the returned POI is latched
    /// and will not fire again until `reset`.
    pub fn update(&mut self, fix: &GeoLocation) -> Option<&PointOfInterest> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, poi) in self.pois.iter().enumerate() {
            if self.triggered.contains(&poi.id) {
                continue;
            }
            let radius = poi.radius_m.unwrap_or(DEFAULT_TRIGGER_RADIUS_M);
            let distance = haversine_distance_m(fix, &poi.location);
            if distance <= radius && best.map_or(true, |(_, d)| distance < d) {
                best = Some((idx, distance));
            }
        }

        let (idx, _) = best?;
        self.triggered.insert(self.pois[idx].id.clone());
        Some(&self.pois[idx])
    }

    /// Clears the latch so every POI may fire again.
    pub fn reset(&mut self) {
        self.triggered.clear();
    }
}
