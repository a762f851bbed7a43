use crate::domain::{NewSource, Notification, RunUpdate, Source, StoredItem, Subscription};
use crate::errors::HarvestResult;

#[cfg_attr(test, mockall::automock)]
pub trait SourceRepository: Send + Sync {
    fn add(&self, source: &NewSource) -> HarvestResult<i64>;
    fn remove(&self, id: i64) -> HarvestResult<()>;
    fn get_all(&self) -> HarvestResult<Vec<Source>>;
    fn get_by_id(&self, id: i64) -> HarvestResult<Option<Source>>;
    /// Writes status, last-run fields, error, next run and bumps the totals.
    fn record_run(&self, id: i64, update: &RunUpdate) -> HarvestResult<()>;
    fn set_enabled(&self, id: i64, enabled: bool) -> HarvestResult<()>;
}

#[cfg_attr(test, mockall::automock)]
pub trait ItemRepository: Send + Sync {
    fn contains(&self, content_hash: &str, source_id: i64) -> HarvestResult<bool>;
    /// Returns `false` when `(content_hash, source_id)` is already stored.
    fn insert_if_absent(&self, item: &StoredItem) -> HarvestResult<bool>;
    fn list_for_source(&self, source_id: i64, limit: usize) -> HarvestResult<Vec<StoredItem>>;
}

#[cfg_attr(test, mockall::automock)]
pub trait SubscriptionRepository: Send + Sync {
    fn add(&self, name: &str, criteria: &str) -> HarvestResult<i64>;
    fn get_by_id(&self, id: i64) -> HarvestResult<Option<Subscription>>;
    fn increment_counters(&self, id: i64, new_items: u64) -> HarvestResult<()>;
}

#[cfg_attr(test, mockall::automock)]
pub trait NotificationRepository: Send + Sync {
    fn insert(&self, notification: &Notification) -> HarvestResult<i64>;
    fn recent(&self, limit: usize) -> HarvestResult<Vec<Notification>>;
}
