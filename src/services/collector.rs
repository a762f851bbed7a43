use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::clock::{Clock, TimerTask};
use super::expression;
use super::matching;
use super::retry::{RetryManager, RetryPolicy, RetryRunner, RetryStatus};
use crate::domain::{
    CollectResult, CollectedItem, Notification, RunFailure, RunUpdate, Source, StoredItem,
};
use crate::errors::{HarvestError, HarvestResult};
use crate::sandbox::ProgramRunner;
use crate::storage::Repositories;

/// Runs one source end to end: sandbox, dedup, persistence, statistics,
/// notifications and retry bookkeeping.
pub struct Collector {
    repos: Repositories,
    runner: Arc<dyn ProgramRunner>,
    clock: Arc<dyn Clock>,
    retries: RetryManager,
    in_flight: Mutex<HashSet<i64>>,
    last_results: Mutex<HashMap<i64, CollectResult>>,
}

struct InFlight<'a> {
    set: &'a Mutex<HashSet<i64>>,
    source_id: i64,
}

impl<'a> InFlight<'a> {
    fn enter(set: &'a Mutex<HashSet<i64>>, source_id: i64) -> Self {
        lock(set).insert(source_id);
        Self { set, source_id }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.source_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Collector {
    pub fn new(
        repos: Repositories,
        runner: Arc<dyn ProgramRunner>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Collector>| {
            let retry_runner: Weak<dyn RetryRunner> = this.clone();
            Self {
                retries: RetryManager::new(clock.clone(), policy, retry_runner),
                repos,
                runner,
                clock,
                in_flight: Mutex::new(HashSet::new()),
                last_results: Mutex::new(HashMap::new()),
            }
        })
    }

    /// Collect one source now.
    ///
    /// Program failures are reported inside the `CollectResult`; only a
    /// missing source or a persistence failure is an `Err`.
    pub async fn collect(&self, source_id: i64) -> HarvestResult<CollectResult> {
        let Some(source) = self.repos.sources.get_by_id(source_id)? else {
            self.retries.clear_retry(source_id);
            return Err(HarvestError::SourceNotFound(source_id));
        };

        let _in_flight = InFlight::enter(&self.in_flight, source_id);
        info!("Collecting source {} ({})", source.id, source.name);

        let runner = self.runner.clone();
        let program = source.program.clone();
        let outcome = tokio::task::spawn_blocking(move || runner.run(&program))
            .await
            .unwrap_or_else(|e| Err(RunFailure::runtime(format!("sandbox worker failed: {e}"))));

        let result = match outcome {
            Ok(items) if items.is_empty() => self.fail(&source, RunFailure::empty())?,
            Ok(items) => self.absorb(&source, items)?,
            Err(failure) => self.fail(&source, failure)?,
        };

        lock(&self.last_results).insert(source_id, result.clone());
        Ok(result)
    }

    fn next_run(&self, source: &Source, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        expression::next_run_for(&source.schedule, now).ok()
    }

    fn fail(&self, source: &Source, failure: RunFailure) -> HarvestResult<CollectResult> {
        let now = self.clock.now();
        let message = failure.to_string();
        warn!("Source {} ({}) failed: {}", source.id, source.name, message);

        self.repos.sources.record_run(
            source.id,
            &RunUpdate::failed(now, message.clone(), self.next_run(source, now)),
        )?;
        self.repos
            .notifications
            .insert(&Notification::source_failed(source, &message, now))?;

        if source.enabled {
            self.retries.schedule_retry(source.id, &message);
        }

        Ok(CollectResult::failed(message))
    }

    fn absorb(&self, source: &Source, items: Vec<CollectedItem>) -> HarvestResult<CollectResult> {
        let now = self.clock.now();
        let criteria = self
            .repos
            .subscriptions
            .get_by_id(source.subscription_id)?
            .map(|s| s.criteria)
            .unwrap_or_default();

        let mut new_items = 0;
        let mut skipped = 0;

        for mut item in items {
            if self.repos.items.contains(&item.content_hash(), source.id)? {
                skipped += 1;
                continue;
            }

            if item.criteria_result.is_none() {
                item.criteria_result =
                    matching::keyword_overlap(&criteria, &item.title, item.summary.as_deref());
            }

            let stored = StoredItem::unread(source.id, source.subscription_id, item, now);
            if self.repos.items.insert_if_absent(&stored)? {
                new_items += 1;
            } else {
                skipped += 1;
            }
        }

        self.repos.sources.record_run(
            source.id,
            &RunUpdate::succeeded(now, new_items as u64, self.next_run(source, now)),
        )?;

        if new_items > 0 {
            self.repos
                .subscriptions
                .increment_counters(source.subscription_id, new_items as u64)?;
            self.repos
                .notifications
                .insert(&Notification::cards_collected(source, new_items, now))?;
        }

        self.retries.clear_retry(source.id);
        info!(
            "Source {} ({}): {} new, {} skipped",
            source.id, source.name, new_items, skipped
        );

        Ok(CollectResult::collected(new_items, skipped))
    }

    pub fn retries(&self) -> &RetryManager {
        &self.retries
    }

    pub fn retry_status(&self, source_id: i64) -> Option<RetryStatus> {
        self.retries.status(source_id)
    }

    pub fn is_collecting(&self, source_id: i64) -> bool {
        lock(&self.in_flight).contains(&source_id)
    }

    pub fn last_result(&self, source_id: i64) -> Option<CollectResult> {
        lock(&self.last_results).get(&source_id).cloned()
    }
}

impl RetryRunner for Collector {
    fn rerun(self: Arc<Self>, source_id: i64) -> TimerTask {
        let collector = Arc::downgrade(&self);
        Box::pin(async move {
            let Some(collector) = collector.upgrade() else {
                return;
            };
            info!("Retrying source {}", source_id);
            if let Err(e) = collector.collect(source_id).await {
                error!("Retry of source {} failed: {}", source_id, e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CriteriaResult, NotificationKind, SourceStatus};
    use crate::services::testing::{fixture, item, ScriptedRunner};
    use std::time::Duration;

    #[tokio::test]
    async fn test_successful_run_persists_and_notifies() {
        let runner = ScriptedRunner::always(Ok(vec![
            item("Rust 2024 edition", "https://e.com/1"),
            item("Gardening tips", "https://e.com/2")
                .with_criteria_result(Some(CriteriaResult::Invalid)),
        ]));
        let fx = fixture(runner, "rust");
        let collector = fx.collector();

        let result = collector.collect(fx.source_id).await.unwrap();
        assert_eq!(result, CollectResult::collected(2, 0));

        let source = fx.repos.sources.get_by_id(fx.source_id).unwrap().unwrap();
        assert_eq!(source.status, SourceStatus::Active);
        assert_eq!(source.total_runs, 1);
        assert_eq!(source.success_runs, 1);
        assert_eq!(source.items_collected, 2);
        assert!(source.next_run_at.is_some());

        let stored = fx.repos.items.list_for_source(fx.source_id, 10).unwrap();
        let verdict = |title: &str| {
            stored
                .iter()
                .find(|s| s.item.title == title)
                .and_then(|s| s.item.criteria_result)
        };
        assert_eq!(verdict("Rust 2024 edition"), Some(CriteriaResult::Matched));
        assert_eq!(verdict("Gardening tips"), Some(CriteriaResult::Invalid));

        let subscription = fx.repos.subscriptions.get_by_id(fx.subscription_id).unwrap().unwrap();
        assert_eq!(subscription.unread_count, 2);

        let notifications = fx.repos.notifications.recent(10).unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::CardsCollected);
        assert_eq!(collector.last_result(fx.source_id), Some(result));
        assert!(!collector.is_collecting(fx.source_id));
    }

    #[tokio::test]
    async fn test_repeat_run_skips_seen_items() {
        let runner = ScriptedRunner::always(Ok(vec![item("Same", "https://e.com/same")]));
        let fx = fixture(runner, "");
        let collector = fx.collector();

        assert_eq!(collector.collect(fx.source_id).await.unwrap().new_items, 1);
        let second = collector.collect(fx.source_id).await.unwrap();
        assert_eq!(second, CollectResult::collected(0, 1));

        assert_eq!(fx.repos.items.list_for_source(fx.source_id, 10).unwrap().len(), 1);
        assert_eq!(fx.repos.notifications.recent(10).unwrap().len(), 1);

        let source = fx.repos.sources.get_by_id(fx.source_id).unwrap().unwrap();
        assert_eq!(source.total_runs, 2);
        assert_eq!(source.items_collected, 1);
    }

    #[tokio::test]
    async fn test_duplicates_within_one_run_count_as_skipped() {
        let runner = ScriptedRunner::always(Ok(vec![
            item("Dup", "https://e.com/d"),
            item("Dup", "https://e.com/d"),
        ]));
        let fx = fixture(runner, "");

        let result = fx.collector().collect(fx.source_id).await.unwrap();
        assert_eq!(result, CollectResult::collected(1, 1));
    }

    #[tokio::test]
    async fn test_empty_result_is_a_failure() {
        let fx = fixture(ScriptedRunner::always(Ok(vec![])), "");
        let collector = fx.collector();

        let result = collector.collect(fx.source_id).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("[Empty] program returned no items"));

        let source = fx.repos.sources.get_by_id(fx.source_id).unwrap().unwrap();
        assert_eq!(source.status, SourceStatus::Failed);
        assert_eq!(source.total_runs, 1);
        assert_eq!(source.success_runs, 0);
        assert_eq!(source.last_error.as_deref(), Some("[Empty] program returned no items"));

        let notifications = fx.repos.notifications.recent(10).unwrap();
        assert_eq!(notifications[0].kind, NotificationKind::SourceFailed);
        assert_eq!(collector.retry_status(fx.source_id).unwrap().attempt, 1);
    }

    #[tokio::test]
    async fn test_retry_fires_and_success_clears_state() {
        let runner = ScriptedRunner::sequence(vec![
            Err(RunFailure::runtime("Error: upstream 503")),
            Ok(vec![item("Back", "https://e.com/back")]),
        ]);
        let fx = fixture(runner, "");
        let collector = fx.collector();

        let first = collector.collect(fx.source_id).await.unwrap();
        assert_eq!(first.error.as_deref(), Some("[Runtime] Error: upstream 503"));
        assert!(collector.retry_status(fx.source_id).is_some());

        fx.clock.advance(Duration::from_secs(5)).await;

        assert_eq!(fx.runner.calls(), 2);
        assert!(collector.retry_status(fx.source_id).is_none());
        let source = fx.repos.sources.get_by_id(fx.source_id).unwrap().unwrap();
        assert_eq!(source.status, SourceStatus::Active);
        assert_eq!(source.total_runs, 2);
    }

    #[tokio::test]
    async fn test_persistent_failure_exhausts_retries() {
        let fx = fixture(
            ScriptedRunner::always(Err(RunFailure::runtime("Error: down"))),
            "",
        );
        let collector = fx.collector();

        collector.collect(fx.source_id).await.unwrap();
        fx.clock.advance(Duration::from_secs(5)).await;
        fx.clock.advance(Duration::from_secs(30)).await;
        assert_eq!(collector.retry_status(fx.source_id).unwrap().attempt, 3);

        fx.clock.advance(Duration::from_secs(60)).await;
        assert_eq!(fx.runner.calls(), 4);
        assert!(collector.retry_status(fx.source_id).is_none());
        assert_eq!(fx.clock.pending(), 0);
    }

    #[tokio::test]
    async fn test_missing_source() {
        let fx = fixture(ScriptedRunner::always(Ok(vec![])), "");
        let result = fx.collector().collect(999).await;
        assert!(matches!(result, Err(HarvestError::SourceNotFound(999))));
        assert_eq!(fx.runner.calls(), 0);
    }

    #[tokio::test]
    async fn test_disabled_source_failure_is_not_retried() {
        let fx = fixture(ScriptedRunner::always(Err(RunFailure::syntax("bad"))), "");
        fx.repos.sources.set_enabled(fx.source_id, false).unwrap();
        let collector = fx.collector();

        collector.collect(fx.source_id).await.unwrap();
        assert!(collector.retry_status(fx.source_id).is_none());
        assert_eq!(fx.clock.pending(), 0);
    }
}
