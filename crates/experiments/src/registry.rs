//! Experiment registry — assignment, counter recording, winner declaration.

use chrono::Utc;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use reach_core::error::{EngineError, EngineResult};

use crate::significance::two_proportion_confidence;
use crate::types::{AbTest, AbTestStatus, Variant, VariantResults, WinnerDecision};

/// Winner declaration requires at least this one-sided confidence.
const WINNER_CONFIDENCE_THRESHOLD: f64 = 0.95;

/// Thread-safe registry of A/B tests, indexed by test id and by the step
/// each test overrides.
pub struct ExperimentRegistry {
    tests: DashMap<Uuid, AbTest>,
    by_step: DashMap<Uuid, Uuid>,
}

impl ExperimentRegistry {
    pub fn new() -> Self {
        Self {
            tests: DashMap::new(),
            by_step: DashMap::new(),
        }
    }

    pub fn register(&self, test: AbTest) -> Uuid {
        let id = test.id;
        info!(test_id = %id, step_id = %test.step_id, name = %test.name, "Registering A/B test");
        self.by_step.insert(test.step_id, id);
        self.tests.insert(id, test);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<AbTest> {
        self.tests.get(&id).map(|t| t.clone())
    }

    /// The running test attached to a step, if any.
    pub fn running_test_for_step(&self, step_id: Uuid) -> Option<AbTest> {
        let test_id = *self.by_step.get(&step_id)?;
        self.tests
            .get(&test_id)
            .filter(|t| t.status == AbTestStatus::Running)
            .map(|t| t.clone())
    }

    /// Deterministic, idempotent variant assignment: a stable hash of
    /// `(test_id, customer_id)` compared against the split ratio. The same
    /// pair always yields the same variant, so reporting and repeat sends
    /// stay consistent.
    pub fn assign(&self, test_id: Uuid, customer_id: &str, split_ratio: f64) -> Variant {
        let hash = format!("{test_id}:{customer_id}")
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
        let normalized = (hash % 10_000) as f64 / 10_000.0;
        if normalized < split_ratio {
            Variant::A
        } else {
            Variant::B
        }
    }

    /// Bump one variant counter. `f` receives the variant's results slot.
    pub fn record<F>(&self, test_id: Uuid, variant: Variant, f: F) -> EngineResult<()>
    where
        F: FnOnce(&mut VariantResults),
    {
        let mut test = self
            .tests
            .get_mut(&test_id)
            .ok_or(EngineError::ExperimentNotFound(test_id))?;
        match variant {
            Variant::A => f(&mut test.results_a),
            Variant::B => f(&mut test.results_b),
        }
        test.updated_at = Utc::now();
        Ok(())
    }

    /// Close a test and attempt to declare a winner: the variant with the
    /// higher converted/delivered rate, provided both arms reached the
    /// minimum sample size and the two-proportion test clears the
    /// confidence threshold. Ties and underpowered tests stay inconclusive.
    pub fn declare_winner(&self, test_id: Uuid) -> EngineResult<WinnerDecision> {
        let mut test = self
            .tests
            .get_mut(&test_id)
            .ok_or(EngineError::ExperimentNotFound(test_id))?;

        test.status = AbTestStatus::Completed;
        test.updated_at = Utc::now();

        let a = test.results_a;
        let b = test.results_b;

        if a.delivered < test.min_sample_size || b.delivered < test.min_sample_size {
            let decision = WinnerDecision::Inconclusive {
                reason: format!(
                    "insufficient samples (A={}, B={}, need {} per arm)",
                    a.delivered, b.delivered, test.min_sample_size
                ),
            };
            return Ok(decision);
        }

        let rate_a = a.conversion_rate();
        let rate_b = b.conversion_rate();
        if (rate_a - rate_b).abs() < f64::EPSILON {
            return Ok(WinnerDecision::Inconclusive {
                reason: "conversion rates are tied".to_string(),
            });
        }

        let confidence =
            match two_proportion_confidence(a.converted, a.delivered, b.converted, b.delivered) {
                Some(c) => c,
                None => {
                    return Ok(WinnerDecision::Inconclusive {
                        reason: "conversion data is degenerate".to_string(),
                    })
                }
            };

        if confidence < WINNER_CONFIDENCE_THRESHOLD {
            return Ok(WinnerDecision::Inconclusive {
                reason: format!("confidence {confidence:.3} below threshold"),
            });
        }

        let variant = if rate_a > rate_b { Variant::A } else { Variant::B };
        test.winner = Some(variant);
        test.confidence = Some(confidence);
        info!(
            test_id = %test_id,
            winner = variant.as_str(),
            confidence,
            "A/B test winner declared"
        );
        Ok(WinnerDecision::Winner {
            variant,
            confidence,
        })
    }
}

impl Default for ExperimentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VariantContent;

    fn make_test(split_ratio: f64) -> AbTest {
        AbTest::new(
            Uuid::new_v4(),
            "Subject line test",
            VariantContent {
                subject: "Plain subject".to_string(),
                body: "Body A".to_string(),
            },
            VariantContent {
                subject: "Urgent subject!".to_string(),
                body: "Body B".to_string(),
            },
            split_ratio,
        )
    }

    #[test]
    fn test_assignment_is_stable() {
        let registry = ExperimentRegistry::new();
        let test_id = Uuid::new_v4();
        for i in 0..100 {
            let customer = format!("cust-{i}");
            let first = registry.assign(test_id, &customer, 0.5);
            for _ in 0..5 {
                assert_eq!(registry.assign(test_id, &customer, 0.5), first);
            }
        }
    }

    #[test]
    fn test_split_ratio_roughly_respected() {
        let registry = ExperimentRegistry::new();
        let test_id = Uuid::new_v4();
        let assigned_a = (0..1000)
            .filter(|i| registry.assign(test_id, &format!("customer-{i}"), 0.5) == Variant::A)
            .count();
        // 45–55% tolerance band over 1,000 distinct ids.
        assert!((450..=550).contains(&assigned_a), "A got {assigned_a}/1000");
    }

    #[test]
    fn test_extreme_ratios() {
        let registry = ExperimentRegistry::new();
        let test_id = Uuid::new_v4();
        for i in 0..100 {
            assert_eq!(
                registry.assign(test_id, &format!("c{i}"), 1.0),
                Variant::A
            );
            assert_eq!(
                registry.assign(test_id, &format!("c{i}"), 0.0),
                Variant::B
            );
        }
    }

    #[test]
    fn test_winner_requires_sample_size() {
        let registry = ExperimentRegistry::new();
        let test = make_test(0.5);
        let id = registry.register(test);

        registry
            .record(id, Variant::A, |r| {
                r.delivered = 10;
                r.converted = 8;
            })
            .unwrap();
        registry
            .record(id, Variant::B, |r| {
                r.delivered = 10;
                r.converted = 1;
            })
            .unwrap();

        let decision = registry.declare_winner(id).unwrap();
        assert!(matches!(decision, WinnerDecision::Inconclusive { .. }));
    }

    #[test]
    fn test_clear_winner_declared() {
        let registry = ExperimentRegistry::new();
        let test = make_test(0.5);
        let id = registry.register(test);

        registry
            .record(id, Variant::A, |r| {
                r.delivered = 500;
                r.converted = 100;
            })
            .unwrap();
        registry
            .record(id, Variant::B, |r| {
                r.delivered = 500;
                r.converted = 25;
            })
            .unwrap();

        match registry.declare_winner(id).unwrap() {
            WinnerDecision::Winner {
                variant,
                confidence,
            } => {
                assert_eq!(variant, Variant::A);
                assert!(confidence > 0.99);
            }
            other => panic!("Expected winner, got {other:?}"),
        }

        let stored = registry.get(id).unwrap();
        assert_eq!(stored.status, AbTestStatus::Completed);
        assert_eq!(stored.winner, Some(Variant::A));
    }

    #[test]
    fn test_tied_rates_inconclusive() {
        let registry = ExperimentRegistry::new();
        let test = make_test(0.5);
        let id = registry.register(test);

        for variant in [Variant::A, Variant::B] {
            registry
                .record(id, variant, |r| {
                    r.delivered = 500;
                    r.converted = 50;
                })
                .unwrap();
        }

        let decision = registry.declare_winner(id).unwrap();
        assert!(matches!(decision, WinnerDecision::Inconclusive { .. }));
    }
}
