pub mod clock;
pub mod collector;
pub mod expression;
pub mod gate;
pub mod harvester;
pub mod matching;
pub mod retry;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock, TimerHandle, TimerTask};
pub use collector::Collector;
pub use gate::ConcurrencyGate;
pub use harvester::{HarvestOptions, Harvester, SourceRunStatus, StartupReport};
pub use retry::{RetryManager, RetryPolicy, RetryRunner, RetryStatus};
pub use scheduler::JobScheduler;

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::clock::ManualClock;
    use super::collector::Collector;
    use super::retry::RetryPolicy;
    use crate::domain::{CollectedItem, NewSource, RunResult};
    use crate::sandbox::ProgramRunner;
    use crate::storage::{Repositories, SqliteStorage};

    /// Replays canned results; the last one repeats once the script runs out.
    pub struct ScriptedRunner {
        script: Mutex<VecDeque<RunResult>>,
        fallback: Option<RunResult>,
        calls: AtomicUsize,
    }

    impl ScriptedRunner {
        pub fn always(result: RunResult) -> Self {
            Self::sequence(vec![result])
        }

        pub fn sequence(results: Vec<RunResult>) -> Self {
            Self {
                fallback: results.last().cloned(),
                script: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ProgramRunner for ScriptedRunner {
        fn run(&self, _program: &str) -> RunResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .or_else(|| self.fallback.clone())
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    pub fn item(title: &str, url: &str) -> CollectedItem {
        CollectedItem::new(title.to_string(), url.to_string())
    }

    pub struct Fixture {
        pub repos: Repositories,
        pub clock: Arc<ManualClock>,
        pub runner: Arc<ScriptedRunner>,
        pub subscription_id: i64,
        pub source_id: i64,
    }

    impl Fixture {
        pub fn collector(&self) -> Arc<Collector> {
            Collector::new(
                self.repos.clone(),
                self.runner.clone(),
                self.clock.clone(),
                RetryPolicy::default(),
            )
        }

        pub fn add_source(&self, name: &str, schedule: &str) -> i64 {
            self.repos
                .sources
                .add(&NewSource::new(
                    self.subscription_id,
                    name.to_string(),
                    "async function collect() { return []; }".to_string(),
                    schedule.to_string(),
                ))
                .unwrap()
        }
    }

    /// In-memory repositories with one subscription and one active source
    /// on `*/5 * * * *`, and a manual clock at 2024-01-01T00:00:00Z.
    pub fn fixture(runner: ScriptedRunner, criteria: &str) -> Fixture {
        let repos = Repositories::sqlite(SqliteStorage::in_memory().unwrap());
        let subscription_id = repos.subscriptions.add("Topic", criteria).unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));

        let mut fixture = Fixture {
            repos,
            clock,
            runner: Arc::new(runner),
            subscription_id,
            source_id: 0,
        };
        fixture.source_id = fixture.add_source("Example", "*/5 * * * *");
        fixture
    }

    /// Poll `condition` in real time until it holds or two seconds pass.
    pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }
}
