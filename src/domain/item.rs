use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriteriaResult {
    Matched,
    NotMatched,
    Invalid,
}

impl CriteriaResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CriteriaResult::Matched => "matched",
            CriteriaResult::NotMatched => "not_matched",
            CriteriaResult::Invalid => "invalid",
        }
    }
}

impl std::str::FromStr for CriteriaResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "matched" | "match" | "true" => Ok(CriteriaResult::Matched),
            "not_matched" | "not-matched" | "notmatched" | "false" => {
                Ok(CriteriaResult::NotMatched)
            }
            "invalid" => Ok(CriteriaResult::Invalid),
            _ => Err(format!("Unknown criteria result: {}", s)),
        }
    }
}

/// One record produced by a program run, after contract validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedItem {
    pub title: String,
    pub url: String,
    pub summary: Option<String>,
    pub thumbnail_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub criteria_result: Option<CriteriaResult>,
    pub metric: Option<String>,
}

impl CollectedItem {
    pub fn new(title: String, url: String) -> Self {
        Self {
            title,
            url,
            summary: None,
            thumbnail_url: None,
            published_at: None,
            criteria_result: None,
            metric: None,
        }
    }

    pub fn with_summary(mut self, summary: Option<String>) -> Self {
        self.summary = summary;
        self
    }

    pub fn with_criteria_result(mut self, result: Option<CriteriaResult>) -> Self {
        self.criteria_result = result;
        self
    }

    /// Dedup key: hex SHA-256 of title followed by url.
    pub fn content_hash(&self) -> String {
        content_hash(&self.title, &self.url)
    }
}

pub fn content_hash(title: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// A collected item as persisted for one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredItem {
    pub id: Option<i64>,
    pub content_hash: String,
    pub source_id: i64,
    pub subscription_id: i64,
    pub item: CollectedItem,
    pub is_read: bool,
    pub collected_at: DateTime<Utc>,
}

impl StoredItem {
    pub fn unread(
        source_id: i64,
        subscription_id: i64,
        item: CollectedItem,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            content_hash: item.content_hash(),
            source_id,
            subscription_id,
            item,
            is_read: false,
            collected_at,
        }
    }
}
