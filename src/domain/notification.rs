use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SourceFailed,
    CardsCollected,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::SourceFailed => "source_failed",
            NotificationKind::CardsCollected => "cards_collected",
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source_failed" => Ok(NotificationKind::SourceFailed),
            "cards_collected" => Ok(NotificationKind::CardsCollected),
            _ => Err(format!("Unknown notification kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Option<i64>,
    pub kind: NotificationKind,
    pub subscription_id: i64,
    pub source_id: i64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn source_failed(source: &Source, error: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            kind: NotificationKind::SourceFailed,
            subscription_id: source.subscription_id,
            source_id: source.id,
            message: format!("{} failed: {}", source.name, error),
            created_at: at,
        }
    }

    pub fn cards_collected(source: &Source, count: usize, at: DateTime<Utc>) -> Self {
        let noun = if count == 1 { "item" } else { "items" };
        Self {
            id: None,
            kind: NotificationKind::CardsCollected,
            subscription_id: source.subscription_id,
            source_id: source.id,
            message: format!("{} collected {} new {}", source.name, count, noun),
            created_at: at,
        }
    }

    /// Format: "[{kind}] {message}"
    pub fn format(&self) -> String {
        format!("[{}] {}", self.kind.as_str(), self.message)
    }
}
