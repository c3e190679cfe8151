// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory geospatial index of available drivers.
//!
//! Positions are bucketed into H3 cells at a fixed resolution and kept in a
//! sorted cell map next to a per-driver record map. Radius queries collect
//! the grid disk covering the radius, then rank members by great-circle
//! distance. All operations take the inner lock, so a query reflects every
//! add/remove that completed before it started.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use h3o::{CellIndex, LatLng, Resolution};
use tracing::debug;

use ridehail_api::{GeoPoint, VehicleTier};

/// Index resolution. Cells are ~240 m across, suitable for city-scale
/// candidate search.
const RESOLUTION: Resolution = Resolution::Nine;

/// Approximate center-to-center spacing of adjacent cells at [`RESOLUTION`],
/// used to translate a radius in kilometers into grid-disk rings.
const CELL_SPACING_KM: f64 = 0.3;

/// Mean Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points via the haversine formula.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Attribute bag carried with each indexed driver, used for filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoMeta {
    /// Vehicle tier the driver serves.
    pub tier: VehicleTier,
    /// Aggregate driver rating.
    pub rating: f64,
}

/// One entry of a radius query result.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoCandidate {
    /// The driver.
    pub driver_id: String,
    /// Great-circle distance from the query point, in kilometers.
    pub distance_km: f64,
    /// The driver's attribute bag.
    pub meta: GeoMeta,
}

#[derive(Debug, Clone)]
struct DriverEntry {
    cell: CellIndex,
    position: GeoPoint,
    meta: GeoMeta,
    /// Caller-supplied monotonically increasing timestamp (ms); resolves
    /// concurrent updates last-writer-wins.
    observed_at_ms: i64,
}

#[derive(Default)]
struct Inner {
    by_driver: HashMap<String, DriverEntry>,
    by_cell: BTreeMap<CellIndex, BTreeSet<String>>,
}

impl Inner {
    fn detach_from_cell(&mut self, driver_id: &str, cell: CellIndex) {
        if let Some(members) = self.by_cell.get_mut(&cell) {
            members.remove(driver_id);
            if members.is_empty() {
                let _ = self.by_cell.remove(&cell);
            }
        }
    }
}

/// Concurrent in-memory index answering "drivers within radius R of P".
pub struct GeoIndex {
    inner: RwLock<Inner>,
}

impl Default for GeoIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl GeoIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Insert or update a driver position.
    ///
    /// `observed_at_ms` orders concurrent updates for the same driver:
    /// an update older than the stored one is discarded. Coordinates
    /// outside WGS84 ranges are ignored (the ingest path validates before
    /// calling here).
    pub fn add(&self, driver_id: &str, lat: f64, lng: f64, meta: GeoMeta, observed_at_ms: i64) {
        let Ok(latlng) = LatLng::new(lat, lng) else {
            debug!(driver_id, lat, lng, "Discarding out-of-range position");
            return;
        };
        let cell = latlng.to_cell(RESOLUTION);

        let mut inner = self.inner.write().expect("geo index lock poisoned");
        if let Some(existing) = inner.by_driver.get(driver_id) {
            if existing.observed_at_ms > observed_at_ms {
                return;
            }
            let old_cell = existing.cell;
            if old_cell != cell {
                inner.detach_from_cell(driver_id, old_cell);
            }
        }
        inner
            .by_cell
            .entry(cell)
            .or_default()
            .insert(driver_id.to_string());
        inner.by_driver.insert(
            driver_id.to_string(),
            DriverEntry {
                cell,
                position: GeoPoint::new(lat, lng),
                meta,
                observed_at_ms,
            },
        );
    }

    /// Remove a driver. Removing an absent driver is a no-op.
    pub fn remove(&self, driver_id: &str) {
        let mut inner = self.inner.write().expect("geo index lock poisoned");
        if let Some(entry) = inner.by_driver.remove(driver_id) {
            let cell = entry.cell;
            inner.detach_from_cell(driver_id, cell);
        }
    }

    /// Drivers within `radius_km` of the query point, ascending by
    /// great-circle distance, ties broken by driver id ascending, at most
    /// `limit` results. Never fails; an empty index yields an empty vec.
    pub fn query(&self, lat: f64, lng: f64, radius_km: f64, limit: usize) -> Vec<GeoCandidate> {
        let Ok(origin) = LatLng::new(lat, lng) else {
            return Vec::new();
        };
        if radius_km <= 0.0 || limit == 0 {
            return Vec::new();
        }
        let origin_cell = origin.to_cell(RESOLUTION);
        let rings = (radius_km / CELL_SPACING_KM).ceil() as u32 + 1;
        let disk = origin_cell.grid_disk::<Vec<_>>(rings);
        let query_point = GeoPoint::new(lat, lng);

        let inner = self.inner.read().expect("geo index lock poisoned");
        let mut candidates: Vec<GeoCandidate> = Vec::new();
        for cell in disk {
            let Some(members) = inner.by_cell.get(&cell) else {
                continue;
            };
            for driver_id in members {
                let entry = &inner.by_driver[driver_id];
                let distance_km = haversine_km(query_point, entry.position);
                if distance_km <= radius_km {
                    candidates.push(GeoCandidate {
                        driver_id: driver_id.clone(),
                        distance_km,
                        meta: entry.meta,
                    });
                }
            }
        }
        drop(inner);

        candidates.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        });
        candidates.truncate(limit);
        candidates
    }

    /// Last indexed position of a driver, if present.
    pub fn position(&self, driver_id: &str) -> Option<GeoPoint> {
        let inner = self.inner.read().expect("geo index lock poisoned");
        inner.by_driver.get(driver_id).map(|e| e.position)
    }

    /// Number of indexed drivers.
    pub fn len(&self) -> usize {
        self.inner.read().expect("geo index lock poisoned").by_driver.len()
    }

    /// Whether the index holds no drivers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict entries whose position is older than `max_age` relative to
    /// `now_ms`. Returns the number of evicted drivers.
    pub fn sweep_stale(&self, max_age: Duration, now_ms: i64) -> usize {
        let cutoff = now_ms - max_age.as_millis() as i64;
        let mut inner = self.inner.write().expect("geo index lock poisoned");
        let stale: Vec<(String, CellIndex)> = inner
            .by_driver
            .iter()
            .filter(|(_, entry)| entry.observed_at_ms < cutoff)
            .map(|(id, entry)| (id.clone(), entry.cell))
            .collect();
        for (driver_id, cell) in &stale {
            let _ = inner.by_driver.remove(driver_id);
            inner.detach_from_cell(driver_id, *cell);
        }
        if !stale.is_empty() {
            debug!(evicted = stale.len(), "Evicted stale driver positions");
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(rating: f64) -> GeoMeta {
        GeoMeta {
            tier: VehicleTier::Standard,
            rating,
        }
    }

    #[test]
    fn test_query_orders_by_great_circle_distance() {
        let index = GeoIndex::new();
        // Pickup and two drivers from the happy-path scenario: D1 sits on
        // the pickup point, D2 about 0.75 km away.
        index.add("D2", 19.0656, 72.8326, meta(4.6), 1);
        index.add("D1", 19.0596, 72.8295, meta(4.9), 1);

        let results = index.query(19.0596, 72.8295, 5.0, 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].driver_id, "D1");
        assert!(results[0].distance_km < 0.01);
        assert_eq!(results[1].driver_id, "D2");
        assert!(results[1].distance_km > results[0].distance_km);
    }

    #[test]
    fn test_query_ties_break_by_driver_id() {
        let index = GeoIndex::new();
        index.add("D9", 19.06, 72.83, meta(4.0), 1);
        index.add("D1", 19.06, 72.83, meta(5.0), 1);

        let results = index.query(19.06, 72.83, 1.0, 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].driver_id, "D1");
        assert_eq!(results[1].driver_id, "D9");
    }

    #[test]
    fn test_query_respects_radius_and_limit() {
        let index = GeoIndex::new();
        index.add("near", 19.0596, 72.8295, meta(4.5), 1);
        // Roughly 5.6 km north-east of the pickup.
        index.add("far", 19.10, 72.87, meta(4.5), 1);

        let within_one_km = index.query(19.0596, 72.8295, 1.0, 10);
        assert_eq!(within_one_km.len(), 1);
        assert_eq!(within_one_km[0].driver_id, "near");

        index.add("near2", 19.0600, 72.8300, meta(4.5), 1);
        let limited = index.query(19.0596, 72.8295, 1.0, 1);
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_empty_index_returns_empty() {
        let index = GeoIndex::new();
        assert!(index.query(19.0, 72.0, 5.0, 10).is_empty());
        assert!(index.position("nobody").is_none());
    }

    #[test]
    fn test_add_is_last_writer_wins_by_timestamp() {
        let index = GeoIndex::new();
        index.add("D1", 19.06, 72.83, meta(4.5), 100);
        // A late-arriving older ping must not clobber the newer position.
        index.add("D1", 18.00, 72.00, meta(4.5), 50);
        let pos = index.position("D1").unwrap();
        assert!((pos.lat - 19.06).abs() < 1e-9);

        index.add("D1", 19.10, 72.90, meta(4.5), 200);
        let pos = index.position("D1").unwrap();
        assert!((pos.lat - 19.10).abs() < 1e-9);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let index = GeoIndex::new();
        index.add("D1", 19.06, 72.83, meta(4.5), 1);
        index.remove("D1");
        index.remove("D1");
        assert!(index.is_empty());
    }

    #[test]
    fn test_sweep_evicts_only_stale_positions() {
        let index = GeoIndex::new();
        index.add("old", 19.06, 72.83, meta(4.5), 0);
        index.add("fresh", 19.07, 72.84, meta(4.5), 280_000);

        let evicted = index.sweep_stale(Duration::from_secs(300), 310_000);
        assert_eq!(evicted, 1);
        assert!(index.position("old").is_none());
        assert!(index.position("fresh").is_some());
    }

    #[test]
    fn test_out_of_range_position_is_discarded() {
        let index = GeoIndex::new();
        index.add("D1", 120.0, 72.83, meta(4.5), 1);
        assert!(index.is_empty());
    }
}
