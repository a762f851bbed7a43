use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::{debug, error, warn};

use super::clock::{until, Clock, TimerHandle};
use super::collector::Collector;
use super::expression::{next_after, parse_schedule};
use super::gate::ConcurrencyGate;
use crate::domain::Source;

struct ScheduledJob {
    generation: u64,
    schedule: Schedule,
    next_tick: DateTime<Utc>,
    _timer: TimerHandle,
}

struct SchedulerInner {
    clock: Arc<dyn Clock>,
    gate: ConcurrencyGate,
    collector: Arc<Collector>,
    jobs: Mutex<HashMap<i64, ScheduledJob>>,
    generation: AtomicU64,
}

/// Keeps at most one recurring cron timer per source.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    pub fn new(clock: Arc<dyn Clock>, gate: ConcurrencyGate, collector: Arc<Collector>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                clock,
                gate,
                collector,
                jobs: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// (Re)register a source's timer. Any existing timer for the source is
    /// cancelled first; a disabled source or a bad expression leaves it
    /// unscheduled and returns `false`.
    pub fn schedule(&self, source: &Source) -> bool {
        let mut jobs = self.inner.lock();
        jobs.remove(&source.id);

        if !source.enabled {
            debug!("Source {} is disabled, not scheduling", source.id);
            return false;
        }

        let schedule = match parse_schedule(&source.schedule) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!("Not scheduling source {} ({}): {}", source.id, source.name, e);
                return false;
            }
        };

        let now = self.inner.clock.now();
        let Some(next_tick) = next_after(&schedule, now) else {
            warn!("Schedule for source {} has no future occurrence", source.id);
            return false;
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let timer = self.inner.arm_tick(source.id, generation, now, next_tick);
        jobs.insert(
            source.id,
            ScheduledJob {
                generation,
                schedule,
                next_tick,
                _timer: timer,
            },
        );

        debug!("Scheduled source {} next at {}", source.id, next_tick);
        true
    }

    pub fn unschedule(&self, source_id: i64) -> bool {
        self.inner.lock().remove(&source_id).is_some()
    }

    pub fn scheduled_count(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_scheduled(&self, source_id: i64) -> bool {
        self.inner.lock().contains_key(&source_id)
    }

    pub fn next_tick(&self, source_id: i64) -> Option<DateTime<Utc>> {
        self.inner.lock().get(&source_id).map(|job| job.next_tick)
    }
}

impl SchedulerInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<i64, ScheduledJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm_tick(
        self: &Arc<Self>,
        source_id: i64,
        generation: u64,
        now: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> TimerHandle {
        let inner = Arc::downgrade(self);
        self.clock.arm(
            until(now, at),
            Box::pin(async move {
                if let Some(inner) = inner.upgrade() {
                    inner.tick(source_id, generation);
                }
            }),
        )
    }

    /// Hand the run to the gate and immediately arm the next occurrence.
    fn tick(self: &Arc<Self>, source_id: i64, generation: u64) {
        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(&source_id) else {
            return;
        };
        if job.generation != generation {
            return;
        }

        let collector = self.collector.clone();
        self.gate.submit(async move {
            if let Err(e) = collector.collect(source_id).await {
                error!("Scheduled run of source {} failed: {}", source_id, e);
            }
        });

        let now = self.clock.now();
        match next_after(&job.schedule, now) {
            Some(next_tick) => {
                job.next_tick = next_tick;
                job._timer = self.arm_tick(source_id, generation, now, next_tick);
            }
            None => {
                jobs.remove(&source_id);
            }
        }
    }
}
