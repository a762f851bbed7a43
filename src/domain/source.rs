use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Failed,
    Disabled,
    Pending,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Failed => "failed",
            SourceStatus::Disabled => "disabled",
            SourceStatus::Pending => "pending",
        }
    }
}

impl std::str::FromStr for SourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SourceStatus::Active),
            "failed" => Ok(SourceStatus::Failed),
            "disabled" => Ok(SourceStatus::Disabled),
            "pending" => Ok(SourceStatus::Pending),
            _ => Err(format!("Unknown source status: {}", s)),
        }
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RunOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(RunOutcome::Success),
            "failed" => Ok(RunOutcome::Failed),
            _ => Err(format!("Unknown run outcome: {}", s)),
        }
    }
}

/// One scheduled collection unit: an untrusted program plus its run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub subscription_id: i64,
    pub name: String,
    pub program: String,
    pub schedule: String,
    pub enabled: bool,
    pub status: SourceStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_outcome: Option<RunOutcome>,
    pub last_error: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub total_runs: u64,
    pub success_runs: u64,
    pub items_collected: u64,
}

/// Fields needed to register a source; everything else starts zeroed.
#[derive(Debug, Clone)]
pub struct NewSource {
    pub subscription_id: i64,
    pub name: String,
    pub program: String,
    pub schedule: String,
    pub enabled: bool,
    pub status: SourceStatus,
}

impl NewSource {
    pub fn new(subscription_id: i64, name: String, program: String, schedule: String) -> Self {
        Self {
            subscription_id,
            name,
            program,
            schedule,
            enabled: true,
            status: SourceStatus::Active,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        if !enabled {
            self.status = SourceStatus::Disabled;
        }
        self
    }

    pub fn with_status(mut self, status: SourceStatus) -> Self {
        self.status = status;
        self
    }
}

/// Statistics written back after every run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunUpdate {
    pub at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub new_items: u64,
    pub error: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl RunUpdate {
    pub fn succeeded(at: DateTime<Utc>, new_items: u64, next_run_at: Option<DateTime<Utc>>) -> Self {
        Self {
            at,
            outcome: RunOutcome::Success,
            new_items,
            error: None,
            next_run_at,
        }
    }

    pub fn failed(at: DateTime<Utc>, error: String, next_run_at: Option<DateTime<Utc>>) -> Self {
        Self {
            at,
            outcome: RunOutcome::Failed,
            new_items: 0,
            error: Some(error),
            next_run_at,
        }
    }

    pub fn status(&self) -> SourceStatus {
        match self.outcome {
            RunOutcome::Success => SourceStatus::Active,
            RunOutcome::Failed => SourceStatus::Failed,
        }
    }
}
