use crate::domain::Subscription;
use crate::errors::{HarvestError, HarvestResult};
use crate::storage::sqlite::SqliteStorage;
use crate::storage::traits::SubscriptionRepository;

pub struct SqliteSubscriptionRepository {
    storage: SqliteStorage,
}

impl SqliteSubscriptionRepository {
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }
}

impl SubscriptionRepository for SqliteSubscriptionRepository {
    fn add(&self, name: &str, criteria: &str) -> HarvestResult<i64> {
        let conn = self.storage.connection()?;
        conn.execute(
            "INSERT INTO subscriptions (name, criteria) VALUES (?1, ?2)",
            (name, criteria),
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_by_id(&self, id: i64) -> HarvestResult<Option<Subscription>> {
        let conn = self.storage.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, criteria, unread_count, total_count FROM subscriptions WHERE id = ?1",
        )?;

        let subscription = stmt.query_row([id], |row| {
            let unread: i64 = row.get(3)?;
            let total: i64 = row.get(4)?;

            Ok(Subscription {
                id: row.get(0)?,
                name: row.get(1)?,
                criteria: row.get(2)?,
                unread_count: unread.max(0) as u64,
                total_count: total.max(0) as u64,
            })
        });

        match subscription {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(HarvestError::from(e)),
        }
    }

    fn increment_counters(&self, id: i64, new_items: u64) -> HarvestResult<()> {
        let conn = self.storage.connection()?;
        conn.execute(
            "UPDATE subscriptions SET unread_count = unread_count + ?1, \
             total_count = total_count + ?1 WHERE id = ?2",
            (new_items as i64, id),
        )?;
        Ok(())
    }
}
