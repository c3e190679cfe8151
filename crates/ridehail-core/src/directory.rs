// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory shadow of driver live state.
//!
//! The ping hot path cannot afford a database read per ping, so the engine
//! maintains this directory on every driver status transition and the
//! pipeline consults it instead. Eventually consistent by design: all
//! authoritative decisions re-read the driver row inside a transaction.

use std::collections::HashMap;
use std::sync::Mutex;

use ridehail_api::{DriverStatus, VehicleTier};

/// Live state of one driver, as last seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverLiveState {
    /// Current availability status.
    pub status: DriverStatus,
    /// Tier served, for geo index metadata.
    pub tier: VehicleTier,
    /// Aggregate rating, for geo index metadata.
    pub rating: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct DirectoryEntry {
    state: DriverLiveState,
    active_ride: Option<String>,
}

/// Engine-maintained map of driver id to live state.
#[derive(Default)]
pub struct DriverDirectory {
    entries: Mutex<HashMap<String, DirectoryEntry>>,
}

impl DriverDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a driver's status and profile attributes.
    pub fn set_status(&self, driver_id: &str, status: DriverStatus, tier: VehicleTier, rating: f64) {
        let mut entries = self.entries.lock().expect("directory lock poisoned");
        let entry = entries
            .entry(driver_id.to_string())
            .or_insert(DirectoryEntry {
                state: DriverLiveState {
                    status,
                    tier,
                    rating,
                },
                active_ride: None,
            });
        entry.state = DriverLiveState {
            status,
            tier,
            rating,
        };
        if status != DriverStatus::OnRide {
            entry.active_ride = None;
        }
    }

    /// Mark a driver as committed to a ride.
    pub fn set_on_ride(&self, driver_id: &str, ride_id: &str) {
        let mut entries = self.entries.lock().expect("directory lock poisoned");
        if let Some(entry) = entries.get_mut(driver_id) {
            entry.state.status = DriverStatus::OnRide;
            entry.active_ride = Some(ride_id.to_string());
        }
    }

    /// Release a driver from their ride back into `status`.
    pub fn clear_ride(&self, driver_id: &str, status: DriverStatus) {
        let mut entries = self.entries.lock().expect("directory lock poisoned");
        if let Some(entry) = entries.get_mut(driver_id) {
            entry.state.status = status;
            entry.active_ride = None;
        }
    }

    /// The driver's live state, if the engine has seen them.
    pub fn get(&self, driver_id: &str) -> Option<DriverLiveState> {
        let entries = self.entries.lock().expect("directory lock poisoned");
        entries.get(driver_id).map(|entry| entry.state)
    }

    /// The ride the driver is currently committed to, if any.
    pub fn active_ride(&self, driver_id: &str) -> Option<String> {
        let entries = self.entries.lock().expect("directory lock poisoned");
        entries.get(driver_id).and_then(|entry| entry.active_ride.clone())
    }

    /// Drop a driver from the directory entirely.
    pub fn remove(&self, driver_id: &str) {
        let mut entries = self.entries.lock().expect("directory lock poisoned");
        let _ = entries.remove(driver_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        let directory = DriverDirectory::new();
        directory.set_status("D1", DriverStatus::Available, VehicleTier::Standard, 4.9);
        let state = directory.get("D1").unwrap();
        assert_eq!(state.status, DriverStatus::Available);
        assert_eq!(state.rating, 4.9);
        assert!(directory.active_ride("D1").is_none());
    }

    #[test]
    fn test_on_ride_tracks_and_clears_active_ride() {
        let directory = DriverDirectory::new();
        directory.set_status("D1", DriverStatus::Available, VehicleTier::Standard, 4.9);
        directory.set_on_ride("D1", "r-1");
        assert_eq!(directory.get("D1").unwrap().status, DriverStatus::OnRide);
        assert_eq!(directory.active_ride("D1").unwrap(), "r-1");

        directory.clear_ride("D1", DriverStatus::Available);
        assert_eq!(directory.get("D1").unwrap().status, DriverStatus::Available);
        assert!(directory.active_ride("D1").is_none());
    }

    #[test]
    fn test_setting_non_ride_status_drops_active_ride() {
        let directory = DriverDirectory::new();
        directory.set_status("D1", DriverStatus::Available, VehicleTier::Standard, 4.9);
        directory.set_on_ride("D1", "r-1");
        directory.set_status("D1", DriverStatus::Offline, VehicleTier::Standard, 4.9);
        assert!(directory.active_ride("D1").is_none());
    }

    #[test]
    fn test_unknown_driver_is_none() {
        let directory = DriverDirectory::new();
        assert!(directory.get("ghost").is_none());
        assert!(directory.active_ride("ghost").is_none());
    }
}
