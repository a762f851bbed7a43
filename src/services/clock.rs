//! Time source and one-shot timers for the scheduler and retry manager.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

pub type TimerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Owning handle to an armed timer. Dropping it cancels the timer.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        self.fire_cancel();
    }

    fn fire_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.fire_cancel();
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Run `task` once after `delay`, unless the returned handle is dropped first.
    fn arm(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

pub fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

/// How long from `now` until `at`, zero if `at` has passed.
pub fn until(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Wall clock backed by tokio timers. Must be used inside a tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn arm(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut cancel_rx => return,
            }
            // Once fired, the handle no longer affects the running task.
            drop(cancel_rx);
            task.await;
        });

        TimerHandle::new(move || {
            let _ = cancel_tx.send(());
        })
    }
}

struct PendingTimer {
    id: u64,
    due: DateTime<Utc>,
    task: TimerTask,
    cancelled: Arc<AtomicBool>,
}

struct ManualState {
    now: DateTime<Utc>,
    next_id: u64,
    pending: Vec<PendingTimer>,
}

/// Virtual clock for tests: time only moves through [`ManualClock::advance`].
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                next_id: 0,
                pending: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of armed, uncancelled timers.
    pub fn pending(&self) -> usize {
        self.lock()
            .pending
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Move time forward, running every timer that falls due on the way in
    /// due order. Timers armed by a running task are honoured if they fall
    /// inside the window.
    pub async fn advance(&self, by: Duration) {
        let target = self.lock().now + to_chrono(by);

        loop {
            let next = {
                let mut state = self.lock();
                state.pending.retain(|t| !t.cancelled.load(Ordering::SeqCst));

                let due = state
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.id))
                    .map(|(index, _)| index);

                match due {
                    Some(index) => {
                        let timer = state.pending.remove(index);
                        if timer.due > state.now {
                            state.now = timer.due;
                        }
                        Some(timer.task)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };

            match next {
                Some(task) => task.await,
                None => break,
            }
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    fn arm(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;
            let due = state.now + to_chrono(delay);
            state.pending.push(PendingTimer {
                id,
                due,
                task,
                cancelled: cancelled.clone(),
            });
        }

        TimerHandle::new(move || cancelled.store(true, Ordering::SeqCst))
    }
}
