//! Bounded-polling filter gate
//!
//! New pools often fail a predicate for a few seconds (LP burn lands later,
//! authorities get revoked after creation), so the gate keeps re-checking
//! within its budget instead of judging once.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{poll_budget, FilterConfig};
use crate::error::{Error, Result};
use crate::filter::PoolFilter;
use crate::pool::PoolKeys;

/// Final verdict on a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    Passed,
    /// A predicate hard-rejected the pool
    Rejected(String),
    /// Budget ran out with a predicate still failing
    Exhausted(String),
}

impl GateVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, GateVerdict::Passed)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            GateVerdict::Passed => None,
            GateVerdict::Rejected(reason) | GateVerdict::Exhausted(reason) => Some(reason),
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            GateVerdict::Passed => Ok(()),
            GateVerdict::Rejected(reason) => Err(Error::GateRejected { reason }),
            GateVerdict::Exhausted(reason) => Err(Error::GateRejected {
                reason: format!("{} (budget exhausted)", reason),
            }),
        }
    }
}

pub struct FilterGate {
    filters: Vec<Box<dyn PoolFilter>>,
    interval: Duration,
    budget: u32,
}

impl FilterGate {
    pub fn new(filters: Vec<Box<dyn PoolFilter>>, interval: Duration, budget: u32) -> Self {
        Self {
            filters,
            interval,
            budget: budget.max(1),
        }
    }

    pub fn from_config(filters: Vec<Box<dyn PoolFilter>>, config: &FilterConfig) -> Self {
        Self::new(
            filters,
            Duration::from_millis(config.check_interval_ms),
            poll_budget(config.check_duration_ms, config.check_interval_ms),
        )
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Run the predicates until they all pass, one hard-rejects, or the
    /// budget is spent. A predicate that passed is not run again.
    pub async fn evaluate(&self, pool: &PoolKeys) -> GateVerdict {
        if self.filters.is_empty() {
            return GateVerdict::Passed;
        }

        let mut passed = vec![false; self.filters.len()];
        let mut last_reason = String::new();

        for iteration in 1..=self.budget {
            let mut failure = None;

            for (idx, filter) in self.filters.iter().enumerate() {
                if passed[idx] {
                    continue;
                }

                match filter.check(pool).await {
                    Ok(outcome) if outcome.ok => passed[idx] = true,
                    Ok(outcome) if outcome.hard_reject => {
                        info!("Pool {} rejected by {}: {}", pool.id, filter.name(), outcome.reason);
                        return GateVerdict::Rejected(format!("{}: {}", filter.name(), outcome.reason));
                    }
                    Ok(outcome) => {
                        failure = Some(format!("{}: {}", filter.name(), outcome.reason));
                        break;
                    }
                    Err(e) => {
                        warn!("Filter {} errored on pool {}: {}", filter.name(), pool.id, e);
                        failure = Some(format!("{}: {}", filter.name(), e));
                        break;
                    }
                }
            }

            match failure {
                None => {
                    debug!("Pool {} passed all filters on check {}", pool.id, iteration);
                    return GateVerdict::Passed;
                }
                Some(reason) => {
                    debug!(
                        "Pool {} check {}/{} failed: {}",
                        pool.id, iteration, self.budget, reason
                    );
                    last_reason = reason;
                }
            }

            if iteration < self.budget {
                tokio::time::sleep(self.interval).await;
            }
        }

        info!("Pool {} did not pass filters in time: {}", pool.id, last_reason);
        GateVerdict::Exhausted(last_reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOutcome;
    use crate::pool::tests::descriptor;
    use async_trait::async_trait;
    use solana_sdk::pubkey::Pubkey;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Replays scripted outcomes, repeating the last one
    struct Scripted {
        name: &'static str,
        script: Mutex<VecDeque<Result<FilterOutcome>>>,
        calls: Arc<AtomicU32>,
    }

    impl Scripted {
        fn new(name: &'static str, script: Vec<Result<FilterOutcome>>) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    name,
                    script: Mutex::new(script.into()),
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl PoolFilter for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn check(&self, _pool: &PoolKeys) -> Result<FilterOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                match script.front().unwrap() {
                    Ok(outcome) => Ok(outcome.clone()),
                    Err(e) => Err(Error::Rpc(e.to_string())),
                }
            }
        }
    }

    fn keys() -> PoolKeys {
        PoolKeys::resolve(Pubkey::new_unique(), &descriptor(Pubkey::new_unique())).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_predicate_polls_budget_times() {
        let (filter, calls) = Scripted::new("never", vec![Ok(FilterOutcome::fail("not yet"))]);
        let gate = FilterGate::from_config(
            vec![Box::new(filter)],
            &FilterConfig {
                check_interval_ms: 2000,
                check_duration_ms: 10000,
                min_pool_size_sol: 0.0,
                max_pool_size_sol: 0.0,
                check_burned: true,
                check_renounced: true,
                check_freezable: true,
            },
        );

        let started = tokio::time::Instant::now();
        let verdict = gate.evaluate(&keys()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(verdict, GateVerdict::Exhausted("never: not yet".to_string()));
        // Four sleeps between five checks
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(8000));
        assert!(elapsed < Duration::from_millis(10000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_passed_predicates_are_not_rerun() {
        let (first, first_calls) = Scripted::new("first", vec![Ok(FilterOutcome::pass())]);
        let (second, second_calls) = Scripted::new(
            "second",
            vec![
                Ok(FilterOutcome::fail("a")),
                Ok(FilterOutcome::fail("b")),
                Ok(FilterOutcome::pass()),
            ],
        );

        let gate = FilterGate::new(
            vec![Box::new(first), Box::new(second)],
            Duration::from_millis(100),
            10,
        );

        assert!(gate.evaluate(&keys()).await.is_pass());
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_stops_the_iteration() {
        let (first, _) = Scripted::new(
            "first",
            vec![Ok(FilterOutcome::fail("wait")), Ok(FilterOutcome::pass())],
        );
        let (second, second_calls) = Scripted::new("second", vec![Ok(FilterOutcome::pass())]);

        let gate = FilterGate::new(
            vec![Box::new(first), Box::new(second)],
            Duration::from_millis(100),
            3,
        );

        assert!(gate.evaluate(&keys()).await.is_pass());
        // Not reached on the first iteration
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_reject_short_circuits() {
        let (cap, cap_calls) = Scripted::new("pool_size", vec![Ok(FilterOutcome::reject("too big"))]);
        let gate = FilterGate::new(vec![Box::new(cap)], Duration::from_millis(100), 10);

        let verdict = gate.evaluate(&keys()).await;
        assert!(matches!(verdict, GateVerdict::Rejected(_)));
        assert_eq!(verdict.reason(), Some("pool_size: too big"));
        assert_eq!(cap_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_count_as_failed_polls() {
        let (flaky, calls) = Scripted::new(
            "flaky",
            vec![
                Err(Error::Rpc("timeout".to_string())),
                Ok(FilterOutcome::pass()),
            ],
        );
        let gate = FilterGate::new(vec![Box::new(flaky)], Duration::from_millis(100), 3);

        assert!(gate.evaluate(&keys()).await.is_pass());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_predicates_pass_immediately() {
        let gate = FilterGate::new(vec![], Duration::from_millis(100), 3);
        assert_eq!(gate.evaluate(&keys()).await, GateVerdict::Passed);
    }
}
