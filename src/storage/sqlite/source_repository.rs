use rusqlite::Row;

use crate::domain::{NewSource, RunOutcome, RunUpdate, Source, SourceStatus};
use crate::errors::{HarvestError, HarvestResult};
use crate::storage::sqlite::{from_timestamp, to_timestamp, SqliteStorage};
use crate::storage::traits::SourceRepository;

const SOURCE_COLUMNS: &str = "id, subscription_id, name, program, schedule, enabled, status, \
     last_run_at, last_run_outcome, last_error, next_run_at, total_runs, success_runs, \
     items_collected";

pub struct SqliteSourceRepository {
    storage: SqliteStorage,
}

impl SqliteSourceRepository {
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }
}

fn row_to_source(row: &Row<'_>) -> rusqlite::Result<Source> {
    let status_str: String = row.get(6)?;
    let outcome_str: Option<String> = row.get(8)?;
    let total_runs: i64 = row.get(11)?;
    let success_runs: i64 = row.get(12)?;
    let items_collected: i64 = row.get(13)?;

    Ok(Source {
        id: row.get(0)?,
        subscription_id: row.get(1)?,
        name: row.get(2)?,
        program: row.get(3)?,
        schedule: row.get(4)?,
        enabled: row.get(5)?,
        status: status_str.parse().unwrap_or(SourceStatus::Pending),
        last_run_at: from_timestamp(row.get(7)?),
        last_run_outcome: outcome_str.and_then(|s| s.parse::<RunOutcome>().ok()),
        last_error: row.get(9)?,
        next_run_at: from_timestamp(row.get(10)?),
        total_runs: total_runs.max(0) as u64,
        success_runs: success_runs.max(0) as u64,
        items_collected: items_collected.max(0) as u64,
    })
}

impl SourceRepository for SqliteSourceRepository {
    fn add(&self, source: &NewSource) -> HarvestResult<i64> {
        let conn = self.storage.connection()?;

        // Check the owner within the same connection to avoid deadlock
        let mut stmt = conn.prepare("SELECT EXISTS(SELECT 1 FROM subscriptions WHERE id = ?1)")?;
        let exists: bool = stmt.query_row([source.subscription_id], |row| row.get(0))?;
        drop(stmt);

        if !exists {
            return Err(HarvestError::SubscriptionNotFound(source.subscription_id));
        }

        conn.execute(
            "INSERT INTO sources (subscription_id, name, program, schedule, enabled, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                source.subscription_id,
                &source.name,
                &source.program,
                &source.schedule,
                source.enabled,
                source.status.as_str(),
            ),
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn remove(&self, id: i64) -> HarvestResult<()> {
        let conn = self.storage.connection()?;
        conn.execute("DELETE FROM sources WHERE id = ?1", [id])?;
        Ok(())
    }

    fn get_all(&self) -> HarvestResult<Vec<Source>> {
        let conn = self.storage.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources ORDER BY id ASC"
        ))?;

        let sources = stmt.query_map([], row_to_source)?;

        sources
            .collect::<Result<Vec<_>, _>>()
            .map_err(HarvestError::from)
    }

    fn get_by_id(&self, id: i64) -> HarvestResult<Option<Source>> {
        let conn = self.storage.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?1"
        ))?;

        match stmt.query_row([id], row_to_source) {
            Ok(source) => Ok(Some(source)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(HarvestError::from(e)),
        }
    }

    fn record_run(&self, id: i64, update: &RunUpdate) -> HarvestResult<()> {
        let conn = self.storage.connection()?;
        let success_increment: i64 = match update.outcome {
            RunOutcome::Success => 1,
            RunOutcome::Failed => 0,
        };

        let changed = conn.execute(
            "UPDATE sources SET \
                status = ?1, \
                last_run_at = ?2, \
                last_run_outcome = ?3, \
                last_error = ?4, \
                next_run_at = ?5, \
                total_runs = total_runs + 1, \
                success_runs = success_runs + ?6, \
                items_collected = items_collected + ?7 \
             WHERE id = ?8",
            (
                update.status().as_str(),
                to_timestamp(&update.at),
                update.outcome.as_str(),
                update.error.as_deref(),
                update.next_run_at.as_ref().map(to_timestamp),
                success_increment,
                update.new_items as i64,
                id,
            ),
        )?;

        if changed == 0 {
            return Err(HarvestError::SourceNotFound(id));
        }
        Ok(())
    }

    fn set_enabled(&self, id: i64, enabled: bool) -> HarvestResult<()> {
        let conn = self.storage.connection()?;
        let status = if enabled {
            SourceStatus::Active
        } else {
            SourceStatus::Disabled
        };

        let changed = conn.execute(
            "UPDATE sources SET enabled = ?1, status = ?2 WHERE id = ?3",
            (enabled, status.as_str(), id),
        )?;

        if changed == 0 {
            return Err(HarvestError::SourceNotFound(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sqlite::SqliteSubscriptionRepository;
    use crate::storage::traits::SubscriptionRepository;
    use chrono::{Duration, Utc};

    fn setup_repo() -> (SqliteSourceRepository, i64) {
        let storage = SqliteStorage::in_memory().unwrap();
        let subscriptions = SqliteSubscriptionRepository::new(storage.clone());
        let subscription_id = subscriptions.add("Rust", "rust async").unwrap();
        (SqliteSourceRepository::new(storage), subscription_id)
    }

    fn new_source(subscription_id: i64) -> NewSource {
        NewSource::new(
            subscription_id,
            "Example".to_string(),
            "async function collect() { return []; }".to_string(),
            "*/5 * * * *".to_string(),
        )
    }

    #[test]
    fn test_add_and_get_source() {
        let (repo, subscription_id) = setup_repo();

        let id = repo.add(&new_source(subscription_id)).unwrap();
        assert!(id > 0);

        let source = repo.get_by_id(id).unwrap().unwrap();
        assert_eq!(source.name, "Example");
        assert_eq!(source.schedule, "*/5 * * * *");
        assert!(source.enabled);
        assert_eq!(source.status, SourceStatus::Active);
        assert_eq!(source.total_runs, 0);
        assert!(source.last_run_at.is_none());
    }

    #[test]
    fn test_add_requires_subscription() {
        let (repo, _) = setup_repo();

        let result = repo.add(&new_source(999));
        assert!(matches!(result, Err(HarvestError::SubscriptionNotFound(999))));
    }

    #[test]
    fn test_get_missing_source_is_none() {
        let (repo, _) = setup_repo();
        assert!(repo.get_by_id(42).unwrap().is_none());
    }

    #[test]
    fn test_record_success_updates_stats() {
        let (repo, subscription_id) = setup_repo();
        let id = repo.add(&new_source(subscription_id)).unwrap();
        let now = Utc::now();
        let next = now + Duration::minutes(5);

        repo.record_run(id, &RunUpdate::succeeded(now, 3, Some(next))).unwrap();

        let source = repo.get_by_id(id).unwrap().unwrap();
        assert_eq!(source.status, SourceStatus::Active);
        assert_eq!(source.total_runs, 1);
        assert_eq!(source.success_runs, 1);
        assert_eq!(source.items_collected, 3);
        assert_eq!(source.last_run_outcome, Some(RunOutcome::Success));
        assert!(source.last_error.is_none());
        assert_eq!(source.next_run_at.map(|t| t.timestamp()), Some(next.timestamp()));
    }

    #[test]
    fn test_record_failure_then_success_clears_error() {
        let (repo, subscription_id) = setup_repo();
        let id = repo.add(&new_source(subscription_id)).unwrap();
        let now = Utc::now();

        repo.record_run(id, &RunUpdate::failed(now, "[Runtime] boom".into(), None))
            .unwrap();
        let failed = repo.get_by_id(id).unwrap().unwrap();
        assert_eq!(failed.status, SourceStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("[Runtime] boom"));
        assert_eq!(failed.total_runs, 1);
        assert_eq!(failed.success_runs, 0);

        repo.record_run(id, &RunUpdate::succeeded(now, 1, None)).unwrap();
        let recovered = repo.get_by_id(id).unwrap().unwrap();
        assert_eq!(recovered.status, SourceStatus::Active);
        assert!(recovered.last_error.is_none());
        assert_eq!(recovered.total_runs, 2);
        assert_eq!(recovered.success_runs, 1);
    }

    #[test]
    fn test_record_run_for_missing_source() {
        let (repo, _) = setup_repo();
        let result = repo.record_run(5, &RunUpdate::succeeded(Utc::now(), 0, None));
        assert!(matches!(result, Err(HarvestError::SourceNotFound(5))));
    }

    #[test]
    fn test_set_enabled_toggles_status() {
        let (repo, subscription_id) = setup_repo();
        let id = repo.add(&new_source(subscription_id)).unwrap();

        repo.set_enabled(id, false).unwrap();
        let disabled = repo.get_by_id(id).unwrap().unwrap();
        assert!(!disabled.enabled);
        assert_eq!(disabled.status, SourceStatus::Disabled);

        repo.set_enabled(id, true).unwrap();
        let enabled = repo.get_by_id(id).unwrap().unwrap();
        assert!(enabled.enabled);
        assert_eq!(enabled.status, SourceStatus::Active);
    }

    #[test]
    fn test_remove_and_get_all() {
        let (repo, subscription_id) = setup_repo();
        let first = repo.add(&new_source(subscription_id)).unwrap();
        repo.add(&new_source(subscription_id)).unwrap();

        assert_eq!(repo.get_all().unwrap().len(), 2);
        repo.remove(first).unwrap();

        let all = repo.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_ne!(all[0].id, first);
    }
}
