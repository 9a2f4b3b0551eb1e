//! Confidence router: final score -> routing decision.

use crate::config::{LowBandPolicy, RoutingConfig};
use crate::domain::{ConfidenceBand, clamp_score};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    AutoApprove,
    ManualReview(ConfidenceBand),
    AutoReject,
}

/// Thresholds come from configuration so operators can tune them.
///
/// - `score >= high` -> auto-approve
/// - `medium <= score < high` -> manual review (medium band)
/// - `low <= score < medium` -> manual review (low band) or auto-reject,
///   per `low_band_policy`
/// - `score < low` -> auto-reject
#[derive(Debug, Clone)]
pub struct ConfidenceRouter {
    config: RoutingConfig,
}

impl ConfidenceRouter {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    pub fn route(&self, score: f64) -> RouteDecision {
        let score = clamp_score(score);
        if score >= self.config.high {
            RouteDecision::AutoApprove
        } else if score >= self.config.medium {
            RouteDecision::ManualReview(ConfidenceBand::Medium)
        } else if score >= self.config.low {
            match self.config.low_band_policy {
                LowBandPolicy::ManualReview => RouteDecision::ManualReview(ConfidenceBand::Low),
                LowBandPolicy::AutoReject => RouteDecision::AutoReject,
            }
        } else {
            RouteDecision::AutoReject
        }
    }

    /// Band label for any score (scores >= high are `High`).
    pub fn band(&self, score: f64) -> Option<ConfidenceBand> {
        let score = clamp_score(score);
        if score >= self.config.high {
            Some(ConfidenceBand::High)
        } else if score >= self.config.medium {
            Some(ConfidenceBand::Medium)
        } else if score >= self.config.low {
            Some(ConfidenceBand::Low)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn router() -> ConfidenceRouter {
        ConfidenceRouter::new(RoutingConfig::default())
    }

    #[rstest]
    #[case(1.0, RouteDecision::AutoApprove)]
    #[case(0.8, RouteDecision::AutoApprove)]
    #[case(0.79, RouteDecision::ManualReview(ConfidenceBand::Medium))]
    #[case(0.67, RouteDecision::ManualReview(ConfidenceBand::Medium))]
    #[case(0.5, RouteDecision::ManualReview(ConfidenceBand::Medium))]
    #[case(0.49, RouteDecision::ManualReview(ConfidenceBand::Low))]
    #[case(0.3, RouteDecision::ManualReview(ConfidenceBand::Low))]
    #[case(0.29, RouteDecision::AutoReject)]
    #[case(0.0, RouteDecision::AutoReject)]
    fn default_bands(#[case] score: f64, #[case] expected: RouteDecision) {
        assert_eq!(router().route(score), expected);
    }

    #[test]
    fn low_band_can_auto_reject() {
        let router = ConfidenceRouter::new(RoutingConfig {
            low_band_policy: LowBandPolicy::AutoReject,
            ..RoutingConfig::default()
        });
        assert_eq!(router.route(0.4), RouteDecision::AutoReject);
        assert_eq!(
            router.route(0.6),
            RouteDecision::ManualReview(ConfidenceBand::Medium)
        );
    }

    #[test]
    fn thresholds_are_configurable() {
        let router = ConfidenceRouter::new(RoutingConfig {
            high: 0.9,
            medium: 0.6,
            low: 0.2,
            ..RoutingConfig::default()
        });
        assert_eq!(
            router.route(0.85),
            RouteDecision::ManualReview(ConfidenceBand::Medium)
        );
        assert_eq!(router.route(0.25), RouteDecision::ManualReview(ConfidenceBand::Low));
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        assert_eq!(router().route(7.0), RouteDecision::AutoApprove);
        assert_eq!(router().route(-1.0), RouteDecision::AutoReject);
        assert_eq!(router().route(f64::NAN), RouteDecision::AutoReject);
    }

    proptest! {
        #[test]
        fn routing_is_monotonic(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let rank = |d: RouteDecision| match d {
                RouteDecision::AutoReject => 0,
                RouteDecision::ManualReview(ConfidenceBand::Low) => 1,
                RouteDecision::ManualReview(_) => 2,
                RouteDecision::AutoApprove => 3,
            };
            prop_assert!(rank(router().route(lo)) <= rank(router().route(hi)));
        }
    }
}
