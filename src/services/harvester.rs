use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use super::clock::Clock;
use super::collector::Collector;
use super::gate::ConcurrencyGate;
use super::retry::{RetryPolicy, RetryStatus};
use super::scheduler::JobScheduler;
use crate::domain::{CollectResult, Source, SourceStatus};
use crate::errors::HarvestResult;
use crate::sandbox::ProgramRunner;
use crate::storage::Repositories;

pub const DEFAULT_MAX_CONCURRENT: usize = 5;

#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub gate_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            gate_capacity: DEFAULT_MAX_CONCURRENT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything a caller polling a source's progress needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRunStatus {
    pub retry: Option<RetryStatus>,
    pub collecting: bool,
    pub last_result: Option<CollectResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub scheduled: usize,
    pub recovering: Vec<i64>,
}

/// Entry point to the collection core: scheduling, manual runs, retries.
pub struct Harvester {
    repos: Repositories,
    clock: Arc<dyn Clock>,
    collector: Arc<Collector>,
    scheduler: JobScheduler,
    gate: ConcurrencyGate,
}

impl Harvester {
    pub fn new(
        repos: Repositories,
        runner: Arc<dyn ProgramRunner>,
        clock: Arc<dyn Clock>,
        options: HarvestOptions,
    ) -> Self {
        let collector = Collector::new(repos.clone(), runner, clock.clone(), options.retry);
        let gate = ConcurrencyGate::new(options.gate_capacity);
        let scheduler = JobScheduler::new(clock.clone(), gate.clone(), collector.clone());

        Self {
            repos,
            clock,
            collector,
            scheduler,
            gate,
        }
    }

    /// Manual "run now". Does not wait for, or occupy, a gate slot.
    pub async fn collect(&self, source_id: i64) -> HarvestResult<CollectResult> {
        self.collector.collect(source_id).await
    }

    pub fn schedule(&self, source: &Source) -> bool {
        self.scheduler.schedule(source)
    }

    pub fn unschedule(&self, source_id: i64) -> bool {
        self.scheduler.unschedule(source_id)
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduler.scheduled_count()
    }

    pub fn retry_status(&self, source_ids: &[i64]) -> HashMap<i64, SourceRunStatus> {
        source_ids
            .iter()
            .map(|&id| {
                (
                    id,
                    SourceRunStatus {
                        retry: self.collector.retry_status(id),
                        collecting: self.collector.is_collecting(id),
                        last_result: self.collector.last_result(id),
                    },
                )
            })
            .collect()
    }

    /// Schedule every enabled, non-pending source and immediately re-run
    /// failed ones whose next run time already passed while we were down.
    pub fn start(&self) -> HarvestResult<StartupReport> {
        let now = self.clock.now();
        let mut report = StartupReport::default();

        for source in self.repos.sources.get_all()? {
            if !source.enabled || source.status == SourceStatus::Pending {
                continue;
            }

            if self.scheduler.schedule(&source) {
                report.scheduled += 1;
            }

            let overdue = source.next_run_at.is_some_and(|at| at <= now);
            if source.status == SourceStatus::Failed && overdue {
                report.recovering.push(source.id);
                let collector = self.collector.clone();
                let source_id = source.id;
                tokio::spawn(async move {
                    if let Err(e) = collector.collect(source_id).await {
                        error!("Recovery run of source {} failed: {}", source_id, e);
                    }
                });
            }
        }

        info!(
            "Scheduled {} source(s), recovering {}",
            report.scheduled,
            report.recovering.len()
        );
        Ok(report)
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }
}
