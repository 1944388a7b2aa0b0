//! Candidate lookup and composite scoring.
//!
//! Candidates come from a region-scoped radius query (5 km, capped at 50),
//! filtered to IDLE drivers of a compatible tier, then ranked by a weighted
//! blend of proximity, rating, and reliability:
//!
//! ```text
//! score = α · 1/max(distance_km, 0.01) + β · rating + γ · 1/max(decline_rate, 0.01)
//! ```
//!
//! The weight triple is feature-flag gated per tenant; ties keep the
//! geo-index ascending-distance order (the sort is stable).

use rideflow_core::{DriverStatus, VehicleTier};
use rideflow_kv::{flags, DriverMetadata, FeatureFlagStore, GeoIndex, KvError};
use std::collections::HashSet;
use std::sync::Arc;

/// Search radius around the pickup point.
pub const SEARCH_RADIUS_KM: f64 = 5.0;

/// Maximum drivers considered per dispatch attempt.
pub const CANDIDATE_LIMIT: usize = 50;

/// Floor applied to distance and decline rate before inversion.
const SCORE_FLOOR: f64 = 0.01;

/// Rating assumed when a driver's metadata lacks one.
const DEFAULT_RATING: f64 = 4.0;

/// Decline rate assumed when a driver's metadata lacks one.
const DEFAULT_DECLINE_RATE: f64 = 0.1;

/// Scoring weight triple.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoringWeights {
    /// Distance weight.
    pub alpha: f64,
    /// Rating weight.
    pub beta: f64,
    /// Decline-rate weight.
    pub gamma: f64,
}

/// Distance-heavy standard weights.
pub const STANDARD_WEIGHTS: ScoringWeights = ScoringWeights {
    alpha: 0.5,
    beta: 0.3,
    gamma: 0.2,
};

/// Rating-rebalanced A/B variant, gated by `new_scoring_algo`.
pub const REBALANCED_WEIGHTS: ScoringWeights = ScoringWeights {
    alpha: 0.4,
    beta: 0.4,
    gamma: 0.2,
};

/// A scored dispatch candidate.
#[derive(Clone, Debug, PartialEq)]
pub struct DriverCandidate {
    /// Driver id.
    pub driver_id: String,
    /// Distance from the pickup point.
    pub distance_km: f64,
    /// Rating (defaulted when missing).
    pub rating: f64,
    /// Decline rate (defaulted when missing).
    pub decline_rate: f64,
    /// Driver's tier.
    pub tier: VehicleTier,
    /// Composite score.
    pub score: f64,
}

/// Composite candidate score.
#[must_use]
pub fn compute_score(
    distance_km: f64,
    rating: f64,
    decline_rate: f64,
    weights: ScoringWeights,
) -> f64 {
    weights.alpha * (1.0 / distance_km.max(SCORE_FLOOR))
        + weights.beta * rating
        + weights.gamma * (1.0 / decline_rate.max(SCORE_FLOOR))
}

/// Finds and ranks dispatch candidates around a pickup point.
pub struct CandidateFinder {
    geo: Arc<dyn GeoIndex>,
    flags: Arc<dyn FeatureFlagStore>,
}

impl CandidateFinder {
    /// Creates a finder over the given geo index and flag store.
    #[must_use]
    pub fn new(geo: Arc<dyn GeoIndex>, flags: Arc<dyn FeatureFlagStore>) -> Self {
        Self { geo, flags }
    }

    /// Ranked candidates near the pickup, best first.
    ///
    /// Drivers are dropped when excluded, when their metadata is missing or
    /// expired, when they are not IDLE, or when their tier cannot serve the
    /// required tier.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the geo index is unreachable.
    pub async fn find(
        &self,
        tenant_id: &str,
        region_id: &str,
        pickup_lat: f64,
        pickup_lng: f64,
        required_tier: VehicleTier,
        exclude: &HashSet<String>,
    ) -> Result<Vec<DriverCandidate>, KvError> {
        let nearby = self
            .geo
            .radius(
                region_id,
                pickup_lat,
                pickup_lng,
                SEARCH_RADIUS_KM,
                CANDIDATE_LIMIT,
            )
            .await?;

        let use_rebalanced = self
            .flags
            .is_enabled(tenant_id, flags::NEW_SCORING_ALGO, false)
            .await;
        let weights = if use_rebalanced {
            REBALANCED_WEIGHTS
        } else {
            STANDARD_WEIGHTS
        };

        let mut candidates = Vec::new();
        for (driver_id, distance_km) in nearby {
            if exclude.contains(&driver_id) {
                continue;
            }
            let Some(meta) = self.geo.metadata(&driver_id).await? else {
                continue; // expired or never seen
            };
            if let Some(candidate) = Self::evaluate(driver_id, distance_km, &meta, required_tier, weights)
            {
                candidates.push(candidate);
            }
        }

        // Stable sort keeps the ascending-distance geo order on score ties.
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        tracing::debug!(
            region_id = %region_id,
            tier = %required_tier,
            count = candidates.len(),
            "candidates ranked"
        );
        Ok(candidates)
    }

    fn evaluate(
        driver_id: String,
        distance_km: f64,
        meta: &DriverMetadata,
        required_tier: VehicleTier,
        weights: ScoringWeights,
    ) -> Option<DriverCandidate> {
        if meta.status != Some(DriverStatus::Idle) {
            return None;
        }
        let tier = meta.tier?;
        if !tier.can_serve(required_tier) {
            return None;
        }

        let rating = meta.rating.unwrap_or(DEFAULT_RATING);
        let decline_rate = meta.decline_rate.unwrap_or(DEFAULT_DECLINE_RATE);
        let score = compute_score(distance_km, rating, decline_rate, weights);

        Some(DriverCandidate {
            driver_id,
            distance_km,
            rating,
            decline_rate,
            tier,
            score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_floor_caps_the_proximity_term() {
        let at_zero = compute_score(0.0, 4.5, 0.1, STANDARD_WEIGHTS);
        let at_floor = compute_score(0.01, 4.5, 0.1, STANDARD_WEIGHTS);
        assert_eq!(at_zero, at_floor);
    }

    #[test]
    fn decline_rate_floor_is_symmetric() {
        let at_zero = compute_score(1.0, 4.5, 0.0, STANDARD_WEIGHTS);
        let at_floor = compute_score(1.0, 4.5, 0.01, STANDARD_WEIGHTS);
        assert_eq!(at_zero, at_floor);
    }

    #[test]
    fn closer_drivers_score_higher_all_else_equal() {
        let near = compute_score(0.5, 4.5, 0.1, STANDARD_WEIGHTS);
        let far = compute_score(2.0, 4.5, 0.1, STANDARD_WEIGHTS);
        assert!(near > far);
    }

    #[test]
    fn rebalanced_weights_shift_toward_rating() {
        // Same inputs; the variant weighs rating up and distance down.
        let standard = compute_score(1.0, 5.0, 0.1, STANDARD_WEIGHTS);
        let rebalanced = compute_score(1.0, 5.0, 0.1, REBALANCED_WEIGHTS);
        // distance term: 0.5 vs 0.4; rating term: 1.5 vs 2.0
        assert!(rebalanced > standard);
    }

    #[test]
    fn evaluate_rejects_busy_and_undertiered_drivers() {
        let idle_economy = DriverMetadata {
            status: Some(DriverStatus::Idle),
            tier: Some(VehicleTier::Economy),
            rating: Some(4.5),
            decline_rate: Some(0.1),
            ..Default::default()
        };
        // Economy driver cannot serve a Premium request.
        assert!(CandidateFinder::evaluate(
            "d1".into(),
            1.0,
            &idle_economy,
            VehicleTier::Premium,
            STANDARD_WEIGHTS
        )
        .is_none());

        let busy = DriverMetadata {
            status: Some(DriverStatus::OnTrip),
            tier: Some(VehicleTier::Premium),
            ..Default::default()
        };
        assert!(CandidateFinder::evaluate(
            "d2".into(),
            1.0,
            &busy,
            VehicleTier::Economy,
            STANDARD_WEIGHTS
        )
        .is_none());
    }

    #[test]
    fn evaluate_defaults_missing_rating_and_decline_rate() {
        let sparse = DriverMetadata {
            status: Some(DriverStatus::Idle),
            tier: Some(VehicleTier::Economy),
            ..Default::default()
        };
        let candidate = CandidateFinder::evaluate(
            "d3".into(),
            1.0,
            &sparse,
            VehicleTier::Economy,
            STANDARD_WEIGHTS,
        )
        .unwrap();
        assert_eq!(candidate.rating, 4.0);
        assert_eq!(candidate.decline_rate, 0.1);
    }
}
