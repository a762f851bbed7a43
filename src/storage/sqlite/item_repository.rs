use crate::domain::{CollectedItem, CriteriaResult, StoredItem};
use crate::errors::{HarvestError, HarvestResult};
use crate::storage::sqlite::{from_timestamp, to_timestamp, SqliteStorage};
use crate::storage::traits::ItemRepository;

pub struct SqliteItemRepository {
    storage: SqliteStorage,
}

impl SqliteItemRepository {
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }
}

impl ItemRepository for SqliteItemRepository {
    fn contains(&self, content_hash: &str, source_id: i64) -> HarvestResult<bool> {
        let conn = self.storage.connection()?;
        let mut stmt = conn.prepare(
            "SELECT EXISTS(SELECT 1 FROM collected_items WHERE content_hash = ?1 AND source_id = ?2)",
        )?;
        let exists: bool = stmt.query_row((content_hash, source_id), |row| row.get(0))?;
        Ok(exists)
    }

    fn insert_if_absent(&self, stored: &StoredItem) -> HarvestResult<bool> {
        let conn = self.storage.connection()?;
        let item = &stored.item;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO collected_items \
                (content_hash, source_id, subscription_id, title, url, summary, thumbnail_url, \
                 published_at, criteria_result, metric, is_read, collected_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            (
                &stored.content_hash,
                stored.source_id,
                stored.subscription_id,
                &item.title,
                &item.url,
                item.summary.as_deref(),
                item.thumbnail_url.as_deref(),
                item.published_at.as_ref().map(to_timestamp),
                item.criteria_result.map(|r| r.as_str()),
                item.metric.as_deref(),
                stored.is_read,
                to_timestamp(&stored.collected_at),
            ),
        )?;

        Ok(inserted > 0)
    }

    fn list_for_source(&self, source_id: i64, limit: usize) -> HarvestResult<Vec<StoredItem>> {
        let conn = self.storage.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, content_hash, source_id, subscription_id, title, url, summary, \
                    thumbnail_url, published_at, criteria_result, metric, is_read, collected_at \
             FROM collected_items WHERE source_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;

        let items = stmt.query_map((source_id, limit as i64), |row| {
            let criteria: Option<String> = row.get(9)?;
            let collected_at: String = row.get(12)?;

            Ok(StoredItem {
                id: Some(row.get(0)?),
                content_hash: row.get(1)?,
                source_id: row.get(2)?,
                subscription_id: row.get(3)?,
                item: CollectedItem {
                    title: row.get(4)?,
                    url: row.get(5)?,
                    summary: row.get(6)?,
                    thumbnail_url: row.get(7)?,
                    published_at: from_timestamp(row.get(8)?),
                    criteria_result: criteria.and_then(|c| c.parse::<CriteriaResult>().ok()),
                    metric: row.get(10)?,
                },
                is_read: row.get(11)?,
                collected_at: from_timestamp(Some(collected_at)).unwrap_or_default(),
            })
        })?;

        items
            .collect::<Result<Vec<_>, _>>()
            .map_err(HarvestError::from)
    }
}
