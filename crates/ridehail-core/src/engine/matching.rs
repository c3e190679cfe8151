// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The driver-matching loop.
//!
//! Runs detached from the request that created the ride. Each attempt
//! queries the geo index around the pickup, ranks candidates, and tries
//! them in order; the SEARCHING -> MATCHED transition is guarded by the
//! per-ride matching lock and a transaction that re-checks the driver is
//! still AVAILABLE, so exactly one driver ever wins a ride no matter how
//! many workers race. Failures in here are logged, never surfaced to the
//! creator; clients observe outcomes via `ride:<id>` or `getRide`.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ridehail_api::{NotificationKind, RideStatus};

use crate::error::{EngineError, Result};
use crate::geo::GeoCandidate;
use crate::persistence::AssignOutcome;

use super::{CANDIDATE_LIMIT, RideEngine};

/// TTL of the per-ride matching lock.
pub(crate) const MATCHING_LOCK_TTL: Duration = Duration::from_secs(10);

/// Distance band within which a higher rating beats a shorter pickup.
const RATING_BAND_KM: f64 = 0.5;

pub(crate) fn matching_lock_name(ride_id: &str) -> String {
    format!("lock:ride:{ride_id}:matching")
}

/// Launch the detached matching task for a freshly created ride.
pub(crate) fn spawn_matching(engine: RideEngine, ride_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_matching_loop(engine, ride_id).await;
    })
}

async fn run_matching_loop(engine: RideEngine, ride_id: String) {
    let state = &engine.state;
    let max_attempts = state.config.match_max_attempts;

    for attempt in 1..=max_attempts {
        // Another actor (cancel, concurrent accept) may have moved the ride.
        let ride = match state.persistence.get_ride(&ride_id).await {
            Ok(Some(ride)) => ride,
            Ok(None) => {
                warn!(ride_id, "Ride vanished during matching");
                return;
            }
            Err(e) => {
                warn!(ride_id, error = %e, "Failed to read ride, retrying attempt");
                tokio::time::sleep(state.config.match_backoff).await;
                continue;
            }
        };
        if ride.status != RideStatus::Searching.to_string() {
            debug!(ride_id, status = %ride.status, "Ride left SEARCHING, matching stops");
            return;
        }

        if let Err(e) = state.persistence.increment_search_attempts(&ride_id).await {
            warn!(ride_id, error = %e, "Failed to bump search attempts");
        }

        let candidates = state.geo.query(
            ride.pickup_lat,
            ride.pickup_lng,
            state.config.search_radius_km,
            CANDIDATE_LIMIT,
        );
        if candidates.is_empty() {
            debug!(ride_id, attempt, "No drivers in radius, backing off");
            tokio::time::sleep(state.config.match_backoff).await;
            continue;
        }

        let ranked = rank_candidates(candidates, &ride.ride_type);
        debug!(ride_id, attempt, candidates = ranked.len(), "Trying ranked candidates");

        for candidate in &ranked {
            match engine.try_assign(&ride_id, &candidate.driver_id).await {
                Ok(true) => {
                    info!(ride_id, driver_id = %candidate.driver_id, attempt, "Ride matched");
                    return;
                }
                Ok(false) => {
                    // Candidate lost their availability; try the next one.
                    continue;
                }
                Err(e) if e.is_retryable() => {
                    debug!(ride_id, driver_id = %candidate.driver_id, error = %e, "Assign attempt failed");
                    continue;
                }
                Err(e) => {
                    warn!(ride_id, error = %e, "Assign failed hard, matching stops");
                    return;
                }
            }
        }
        // All candidates failed; this round still counts as an attempt.
    }

    fail_ride(&engine, &ride_id).await;
}

/// Filter by requested tier and rank: distance first; inside a 0.5 km band
/// the higher rating wins; driver id breaks exact ties.
fn rank_candidates(candidates: Vec<GeoCandidate>, ride_type: &str) -> Vec<GeoCandidate> {
    let mut ranked: Vec<GeoCandidate> = candidates
        .into_iter()
        .filter(|c| c.meta.tier.to_string() == ride_type)
        .collect();
    ranked.sort_by(|a, b| {
        let a_band = (a.distance_km / RATING_BAND_KM).floor() as i64;
        let b_band = (b.distance_km / RATING_BAND_KM).floor() as i64;
        a_band
            .cmp(&b_band)
            .then_with(|| b.meta.rating.total_cmp(&a.meta.rating))
            .then_with(|| a.driver_id.cmp(&b.driver_id))
    });
    ranked
}

async fn fail_ride(engine: &RideEngine, ride_id: &str) {
    let state = &engine.state;
    let searching = RideStatus::Searching.to_string();
    let failed = RideStatus::Failed.to_string();
    let moved = match state
        .persistence
        .update_ride_status(ride_id, &[searching.as_str()], &failed)
        .await
    {
        Ok(moved) => moved,
        Err(e) => {
            warn!(ride_id, error = %e, "Failed to mark ride FAILED");
            return;
        }
    };
    if !moved {
        // Cancelled (or matched) while we were giving up; nothing to do.
        return;
    }

    info!(ride_id, "Matching exhausted, ride failed");
    state
        .announce(ride_id, "ride_failed", json!({ "status": "FAILED" }))
        .await;

    if let Ok(Some(ride)) = state.persistence.get_ride(ride_id).await {
        state
            .notify(
                &ride.rider_id,
                "rider",
                Some(ride_id),
                NotificationKind::RideFailed,
                "No drivers are available right now. Please try again.".to_string(),
            )
            .await;
    }
}

impl RideEngine {
    /// Atomically assign a driver to a SEARCHING ride.
    ///
    /// Serialized by the per-ride matching lock; inside the lock the
    /// transaction re-checks both the ride and driver status, so at most
    /// one caller ever sees `Ok(true)` for a given ride. `Ok(false)` means
    /// this driver lost their availability; an already-claimed ride is a
    /// `Conflict`.
    pub(crate) async fn try_assign(&self, ride_id: &str, driver_id: &str) -> Result<bool> {
        let state = self.state.clone();
        let outcome = state
            .locks
            .with_lock(&matching_lock_name(ride_id), MATCHING_LOCK_TTL, || async {
                state
                    .persistence
                    .assign_driver(ride_id, driver_id, Utc::now())
                    .await
            })
            .await?;

        match outcome {
            AssignOutcome::Assigned => {
                // The winner leaves the candidate pool immediately.
                self.state.geo.remove(driver_id);
                self.state.directory.set_on_ride(driver_id, ride_id);
                self.state
                    .announce(
                        ride_id,
                        "driver_matched",
                        json!({ "status": "MATCHED", "driverId": driver_id }),
                    )
                    .await;
                if let Ok(Some(ride)) = self.state.persistence.get_ride(ride_id).await {
                    self.state
                        .notify(
                            &ride.rider_id,
                            "rider",
                            Some(ride_id),
                            NotificationKind::DriverMatched,
                            "A driver has accepted your ride and is on the way.".to_string(),
                        )
                        .await;
                }
                Ok(true)
            }
            AssignOutcome::DriverNotAvailable => Ok(false),
            AssignOutcome::RideNotSearching => Err(EngineError::conflict(
                format!("ride:{ride_id}"),
                "ride is no longer searching",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoMeta;
    use ridehail_api::VehicleTier;

    fn candidate(id: &str, distance_km: f64, rating: f64, tier: VehicleTier) -> GeoCandidate {
        GeoCandidate {
            driver_id: id.to_string(),
            distance_km,
            meta: GeoMeta { tier, rating },
        }
    }

    #[test]
    fn test_distance_dominates_across_bands() {
        let ranked = rank_candidates(
            vec![
                candidate("far-but-great", 1.8, 5.0, VehicleTier::Standard),
                candidate("near-but-ok", 0.1, 4.1, VehicleTier::Standard),
            ],
            "STANDARD",
        );
        assert_eq!(ranked[0].driver_id, "near-but-ok");
    }

    #[test]
    fn test_rating_wins_inside_band() {
        let ranked = rank_candidates(
            vec![
                candidate("close-low", 0.10, 4.2, VehicleTier::Standard),
                candidate("closer-high", 0.30, 4.9, VehicleTier::Standard),
            ],
            "STANDARD",
        );
        // Both inside the first 0.5 km band: rating decides.
        assert_eq!(ranked[0].driver_id, "closer-high");
    }

    #[test]
    fn test_tier_filter_and_id_tiebreak() {
        let ranked = rank_candidates(
            vec![
                candidate("D9", 0.2, 4.5, VehicleTier::Standard),
                candidate("D1", 0.2, 4.5, VehicleTier::Standard),
                candidate("premium", 0.05, 5.0, VehicleTier::Premium),
            ],
            "STANDARD",
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].driver_id, "D1");
        assert_eq!(ranked[1].driver_id, "D9");
    }
}
