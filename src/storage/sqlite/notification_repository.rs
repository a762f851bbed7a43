use crate::domain::{Notification, NotificationKind};
use crate::errors::{HarvestError, HarvestResult};
use crate::storage::sqlite::{from_timestamp, to_timestamp, SqliteStorage};
use crate::storage::traits::NotificationRepository;

pub struct SqliteNotificationRepository {
    storage: SqliteStorage,
}

impl SqliteNotificationRepository {
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }
}

impl NotificationRepository for SqliteNotificationRepository {
    fn insert(&self, notification: &Notification) -> HarvestResult<i64> {
        let conn = self.storage.connection()?;
        conn.execute(
            "INSERT INTO notifications (kind, subscription_id, source_id, message, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                notification.kind.as_str(),
                notification.subscription_id,
                notification.source_id,
                &notification.message,
                to_timestamp(&notification.created_at),
            ),
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn recent(&self, limit: usize) -> HarvestResult<Vec<Notification>> {
        let conn = self.storage.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, subscription_id, source_id, message, created_at \
             FROM notifications ORDER BY id DESC LIMIT ?1",
        )?;

        let notifications = stmt.query_map([limit as i64], |row| {
            let kind: String = row.get(1)?;
            let created_at: String = row.get(5)?;

            Ok(Notification {
                id: Some(row.get(0)?),
                kind: kind.parse().unwrap_or(NotificationKind::SourceFailed),
                subscription_id: row.get(2)?,
                source_id: row.get(3)?,
                message: row.get(4)?,
                created_at: from_timestamp(Some(created_at)).unwrap_or_default(),
            })
        })?;

        notifications
            .collect::<Result<Vec<_>, _>>()
            .map_err(HarvestError::from)
    }
}
