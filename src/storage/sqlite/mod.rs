mod connection;
mod source_repository;
mod item_repository;
mod subscription_repository;
mod notification_repository;

pub use connection::SqliteStorage;
pub use source_repository::SqliteSourceRepository;
pub use item_repository::SqliteItemRepository;
pub use subscription_repository::SqliteSubscriptionRepository;
pub use notification_repository::SqliteNotificationRepository;

use chrono::{DateTime, Utc};

pub(crate) fn to_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub(crate) fn from_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}
