use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::clock::{to_chrono, Clock, TimerHandle, TimerTask};

/// Backoff schedule for failed sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delays: Vec<Duration>,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(5),
                Duration::from_secs(30),
                Duration::from_secs(60),
            ],
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before `attempt` (1-based). Attempts past the table reuse the last entry.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = (attempt.max(1) - 1) as usize;
        self.delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default()
    }
}

/// Whatever re-runs a source when its retry timer fires.
pub trait RetryRunner: Send + Sync {
    fn rerun(self: Arc<Self>, source_id: i64) -> TimerTask;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStatus {
    pub attempt: u32,
    pub max_attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: String,
}

struct RetryState {
    attempt: u32,
    next_retry_at: DateTime<Utc>,
    last_error: String,
    _timer: TimerHandle,
}

/// In-memory retry bookkeeping, one entry per failing source.
pub struct RetryManager {
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    runner: Weak<dyn RetryRunner>,
    states: Mutex<HashMap<i64, RetryState>>,
}

impl RetryManager {
    pub fn new(clock: Arc<dyn Clock>, policy: RetryPolicy, runner: Weak<dyn RetryRunner>) -> Self {
        Self {
            clock,
            policy,
            runner,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, RetryState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Record a failure and arm the next attempt.
    ///
    /// Returns `false` once the source has used up its attempts; its state
    /// is dropped and nothing further is scheduled.
    pub fn schedule_retry(&self, source_id: i64, error: &str) -> bool {
        let mut states = self.lock();
        let attempt = states.get(&source_id).map_or(1, |s| s.attempt + 1);

        if attempt > self.policy.max_attempts {
            states.remove(&source_id);
            warn!(
                "Source {} failed {} retries, waiting for its next scheduled run",
                source_id, self.policy.max_attempts
            );
            return false;
        }

        let Some(runner) = self.runner.upgrade() else {
            states.remove(&source_id);
            return false;
        };

        let delay = self.policy.delay_for(attempt);
        let next_retry_at = self.clock.now() + to_chrono(delay);
        let timer = self.clock.arm(delay, runner.rerun(source_id));

        states.insert(
            source_id,
            RetryState {
                attempt,
                next_retry_at,
                last_error: error.to_string(),
                _timer: timer,
            },
        );

        info!(
            "Retry {}/{} for source {} in {:?}",
            attempt, self.policy.max_attempts, source_id, delay
        );
        true
    }

    /// Forget a source's failures and cancel any pending attempt.
    pub fn clear_retry(&self, source_id: i64) {
        self.lock().remove(&source_id);
    }

    pub fn status(&self, source_id: i64) -> Option<RetryStatus> {
        self.lock().get(&source_id).map(|state| RetryStatus {
            attempt: state.attempt,
            max_attempts: self.policy.max_attempts,
            next_retry_at: state.next_retry_at,
            last_error: state.last_error.clone(),
        })
    }

    pub fn statuses(&self, source_ids: &[i64]) -> HashMap<i64, RetryStatus> {
        source_ids
            .iter()
            .filter_map(|&id| self.status(id).map(|status| (id, status)))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use chrono::TimeZone;

    #[derive(Default)]
    struct CountingRunner {
        calls: Mutex<Vec<i64>>,
    }

    impl CountingRunner {
        fn calls(&self) -> Vec<i64> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RetryRunner for CountingRunner {
        fn rerun(self: Arc<Self>, source_id: i64) -> TimerTask {
            Box::pin(async move {
                self.calls.lock().unwrap().push(source_id);
            })
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn setup() -> (Arc<ManualClock>, Arc<CountingRunner>, RetryManager) {
        let clock = Arc::new(ManualClock::new(start()));
        let runner = Arc::new(CountingRunner::default());
        let dyn_runner: Arc<dyn RetryRunner> = runner.clone();
        let manager = RetryManager::new(
            clock.clone(),
            RetryPolicy::default(),
            Arc::downgrade(&dyn_runner),
        );
        (clock, runner, manager)
    }

    #[test]
    fn test_delay_table() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(30));
        assert_eq!(policy.delay_for(3), Duration::from_secs(60));
        assert_eq!(policy.delay_for(9), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_first_failure_fires_after_five_seconds() {
        let (clock, runner, manager) = setup();

        assert!(manager.schedule_retry(7, "[Runtime] boom"));
        let status = manager.status(7).unwrap();
        assert_eq!(status.attempt, 1);
        assert_eq!(status.max_attempts, 3);
        assert_eq!(status.next_retry_at, start() + chrono::Duration::seconds(5));
        assert_eq!(status.last_error, "[Runtime] boom");

        clock.advance(Duration::from_millis(4999)).await;
        assert!(runner.calls().is_empty());

        clock.advance(Duration::from_millis(1)).await;
        assert_eq!(runner.calls(), vec![7]);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_false_and_drops_state() {
        let (clock, _runner, manager) = setup();

        assert!(manager.schedule_retry(1, "e1"));
        assert!(manager.schedule_retry(1, "e2"));
        assert!(manager.schedule_retry(1, "e3"));
        assert_eq!(manager.status(1).unwrap().attempt, 3);

        assert!(!manager.schedule_retry(1, "e4"));
        assert!(manager.status(1).is_none());
        assert_eq!(manager.active_count(), 0);
        assert_eq!(clock.pending(), 0);
    }

    #[tokio::test]
    async fn test_rescheduling_replaces_pending_timer() {
        let (clock, runner, manager) = setup();

        manager.schedule_retry(3, "first");
        manager.schedule_retry(3, "second");
        assert_eq!(clock.pending(), 1);

        clock.advance(Duration::from_secs(30)).await;
        assert_eq!(runner.calls(), vec![3]);
    }

    #[tokio::test]
    async fn test_clear_retry_cancels_timer() {
        let (clock, runner, manager) = setup();

        manager.schedule_retry(4, "boom");
        manager.clear_retry(4);
        assert!(manager.status(4).is_none());

        clock.advance(Duration::from_secs(120)).await;
        assert!(runner.calls().is_empty());

        assert!(manager.schedule_retry(4, "again"));
        assert_eq!(manager.status(4).unwrap().attempt, 1);
    }

    #[tokio::test]
    async fn test_statuses_only_reports_failing_sources() {
        let (_clock, _runner, manager) = setup();
        manager.schedule_retry(1, "x");
        manager.schedule_retry(2, "y");

        let statuses = manager.statuses(&[1, 2, 3]);
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[&2].last_error, "y");
        assert!(!statuses.contains_key(&3));
    }
}
