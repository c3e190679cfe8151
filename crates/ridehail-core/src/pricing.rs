// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fare calculation.
//!
//! The fare function is pure: it maps frozen pricing inputs and measured
//! distance/duration to a full breakdown. Monetary outputs are rounded to
//! two decimals half-to-even; distances and durations are never rounded.
//! Conservation holds exactly: driver earnings are derived from the rounded
//! platform fee, so `platform_fee + driver_earnings == final_fare`.

/// Platform's share of the final fare.
pub const PLATFORM_FEE_RATE: f64 = 0.20;

/// Tax rate applied on receipts.
pub const RECEIPT_TAX_RATE: f64 = 0.18;

/// Share of the estimated fare charged on fee-bearing cancellations.
pub const CANCELLATION_FEE_RATE: f64 = 0.10;

/// Assumed average city speed for duration estimates, km/h.
pub const AVG_SPEED_KMH: f64 = 40.0;

/// Round a monetary amount to two decimals, ties to even.
pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round_ties_even() / 100.0
}

/// Inputs to the fare function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FareInputs {
    /// Travelled distance in kilometers.
    pub distance_km: f64,
    /// Trip duration in seconds.
    pub duration_secs: f64,
    /// Frozen base fare.
    pub base_fare: f64,
    /// Frozen per-kilometer rate.
    pub per_km_rate: f64,
    /// Frozen per-minute rate.
    pub per_min_rate: f64,
    /// Surge multiplier captured at ride creation, >= 1.0.
    pub surge_multiplier: f64,
    /// Discount applied before the final fare.
    pub discount: f64,
}

/// Derived fare components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FareBreakdown {
    /// `distance * per_km_rate`
    pub distance_fare: f64,
    /// `(duration / 60) * per_min_rate`
    pub time_fare: f64,
    /// `base + distance + time`
    pub subtotal: f64,
    /// `subtotal * (surge - 1)`
    pub surge_amount: f64,
    /// `subtotal + surge_amount`
    pub total_fare: f64,
    /// `max(0, total - discount)`
    pub final_fare: f64,
    /// `final * 0.20`
    pub platform_fee: f64,
    /// `final - platform_fee`
    pub driver_earnings: f64,
}

/// Compute the fare breakdown for a completed trip.
pub fn calculate_fare(inputs: FareInputs) -> FareBreakdown {
    let distance_fare = inputs.distance_km * inputs.per_km_rate;
    let time_fare = (inputs.duration_secs / 60.0) * inputs.per_min_rate;
    let subtotal = inputs.base_fare + distance_fare + time_fare;
    let surge_amount = subtotal * (inputs.surge_multiplier - 1.0);
    let total_fare = subtotal + surge_amount;
    let final_fare = round_money((total_fare - inputs.discount).max(0.0));
    let platform_fee = round_money(final_fare * PLATFORM_FEE_RATE);
    // Derived from the rounded fee so the split conserves the final fare.
    let driver_earnings = round_money(final_fare - platform_fee);

    FareBreakdown {
        distance_fare: round_money(distance_fare),
        time_fare: round_money(time_fare),
        subtotal: round_money(subtotal),
        surge_amount: round_money(surge_amount),
        total_fare: round_money(total_fare),
        final_fare,
        platform_fee,
        driver_earnings,
    }
}

/// Tax line for a receipt over a final fare.
pub fn receipt_tax(final_fare: f64) -> f64 {
    round_money(final_fare * RECEIPT_TAX_RATE)
}

/// Cancellation fee in whole rupees for fee-bearing cancellations.
pub fn cancellation_fee(estimated_fare: f64) -> i64 {
    (estimated_fare * CANCELLATION_FEE_RATE).round() as i64
}

/// Straight-line estimate shown at ride creation: fare and duration in
/// minutes for a direct trip at the assumed city speed.
pub fn estimate_fare(
    distance_km: f64,
    base_fare: f64,
    per_km_rate: f64,
    per_min_rate: f64,
    surge_multiplier: f64,
) -> (f64, f64) {
    let duration_min = (distance_km / AVG_SPEED_KMH) * 60.0;
    let breakdown = calculate_fare(FareInputs {
        distance_km,
        duration_secs: duration_min * 60.0,
        base_fare,
        per_km_rate,
        per_min_rate,
        surge_multiplier,
        discount: 0.0,
    });
    (breakdown.final_fare, duration_min)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> FareInputs {
        FareInputs {
            distance_km: 8.7,
            duration_secs: 1200.0,
            base_fare: 50.0,
            per_km_rate: 12.0,
            per_min_rate: 2.0,
            surge_multiplier: 1.2,
            discount: 0.0,
        }
    }

    #[test]
    fn test_happy_path_breakdown() {
        let fare = calculate_fare(inputs());
        assert_eq!(fare.distance_fare, 104.40);
        assert_eq!(fare.time_fare, 40.00);
        assert_eq!(fare.subtotal, 194.40);
        assert_eq!(fare.surge_amount, 38.88);
        assert_eq!(fare.final_fare, 233.28);
        assert_eq!(fare.platform_fee, 46.66);
        assert_eq!(fare.driver_earnings, 186.62);
    }

    #[test]
    fn test_fee_plus_earnings_equals_final_fare() {
        // Conservation must survive rounding across a spread of inputs.
        for distance in [0.0, 0.3, 2.45, 8.7, 17.21, 42.001] {
            for duration in [60.0, 725.0, 1200.0, 5431.0] {
                for surge in [1.0, 1.2, 1.75, 2.5] {
                    let fare = calculate_fare(FareInputs {
                        distance_km: distance,
                        duration_secs: duration,
                        surge_multiplier: surge,
                        ..inputs()
                    });
                    assert_eq!(
                        round_money(fare.platform_fee + fare.driver_earnings),
                        fare.final_fare,
                        "split must conserve for d={distance} t={duration} s={surge}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_discount_floors_at_zero() {
        let fare = calculate_fare(FareInputs {
            discount: 10_000.0,
            ..inputs()
        });
        assert_eq!(fare.final_fare, 0.0);
        assert_eq!(fare.platform_fee, 0.0);
        assert_eq!(fare.driver_earnings, 0.0);
    }

    #[test]
    fn test_no_surge_means_no_surge_amount() {
        let fare = calculate_fare(FareInputs {
            surge_multiplier: 1.0,
            ..inputs()
        });
        assert_eq!(fare.surge_amount, 0.0);
        assert_eq!(fare.total_fare, fare.subtotal);
    }

    #[test]
    fn test_round_money_is_half_to_even() {
        assert_eq!(round_money(46.656), 46.66);
        assert_eq!(round_money(0.125), 0.12);
        assert_eq!(round_money(0.135), 0.14);
        assert_eq!(round_money(2.005), 2.0);
    }

    #[test]
    fn test_receipt_tax() {
        assert_eq!(receipt_tax(233.28), 41.99);
    }

    #[test]
    fn test_cancellation_fee_is_whole_rupees() {
        assert_eq!(cancellation_fee(233.28), 23);
        assert_eq!(cancellation_fee(0.0), 0);
    }

    #[test]
    fn test_estimate_uses_city_speed() {
        let (fare, duration_min) = estimate_fare(8.0, 50.0, 12.0, 2.0, 1.0);
        assert_eq!(duration_min, 12.0);
        // 50 + 96 + 24
        assert_eq!(fare, 170.0);
    }
}
