pub mod source;
pub mod item;
pub mod notification;
pub mod run;
pub mod subscription;

pub use source::{NewSource, RunOutcome, RunUpdate, Source, SourceStatus};
pub use item::{content_hash, CollectedItem, CriteriaResult, StoredItem};
pub use notification::{Notification, NotificationKind};
pub use run::{CollectResult, FailureKind, RunFailure, RunResult};
pub use subscription::Subscription;
