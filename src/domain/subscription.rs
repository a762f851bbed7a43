use serde::{Deserialize, Serialize};

/// The owning topic of one or more sources. Only the criteria text and the
/// item counters matter to the collection core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub name: String,
    pub criteria: String,
    pub unread_count: u64,
    pub total_count: u64,
}
