pub mod traits;
pub mod sqlite;

use std::sync::Arc;

pub use traits::{ItemRepository, NotificationRepository, SourceRepository, SubscriptionRepository};
pub use sqlite::{
    SqliteItemRepository, SqliteNotificationRepository, SqliteSourceRepository, SqliteStorage,
    SqliteSubscriptionRepository,
};

/// The persistence surface the collection core needs, as shared trait objects.
#[derive(Clone)]
pub struct Repositories {
    pub sources: Arc<dyn SourceRepository>,
    pub items: Arc<dyn ItemRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
}

impl Repositories {
    pub fn sqlite(storage: SqliteStorage) -> Self {
        Self {
            sources: Arc::new(SqliteSourceRepository::new(storage.clone())),
            items: Arc::new(SqliteItemRepository::new(storage.clone())),
            subscriptions: Arc::new(SqliteSubscriptionRepository::new(storage.clone())),
            notifications: Arc::new(SqliteNotificationRepository::new(storage)),
        }
    }
}
