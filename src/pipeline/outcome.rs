//! Finalized run records handed to storage and delivery.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborators::PushReport;
use crate::content::{ContentItem, FinalStatus, ItemId, Script, SourceRef};
use crate::error::{DispatchError, StageError};
use crate::scoring::ScoreRecord;

/// Why a run ended as `Rejected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    UnreachableSource { detail: String },
    EmptyContent,
    Irrelevant { categories: Vec<String> },
    /// Executor fault; the only reason an operator should be paged for.
    Fault { detail: String },
    Cancelled,
}

impl RejectionReason {
    pub fn is_fault(&self) -> bool {
        matches!(self, RejectionReason::Fault { .. })
    }
}

impl From<&StageError> for RejectionReason {
    fn from(err: &StageError) -> Self {
        match err {
            StageError::UnreachableSource(detail) => RejectionReason::UnreachableSource {
                detail: detail.clone(),
            },
            StageError::EmptyContent => RejectionReason::EmptyContent,
            StageError::Irrelevant { categories } => RejectionReason::Irrelevant {
                categories: categories.clone(),
            },
            StageError::Fault(detail) => RejectionReason::Fault {
                detail: detail.clone(),
            },
        }
    }
}

impl From<&DispatchError> for RejectionReason {
    fn from(err: &DispatchError) -> Self {
        match err {
            DispatchError::TaskFailed { source, .. } => source.into(),
            DispatchError::ShutDown => RejectionReason::Cancelled,
            DispatchError::TaskLost(_) => RejectionReason::Fault {
                detail: err.to_string(),
            },
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::UnreachableSource { detail } => {
                write!(f, "source unreachable: {}", detail)
            }
            RejectionReason::EmptyContent => write!(f, "empty content"),
            RejectionReason::Irrelevant { categories } if categories.is_empty() => {
                write!(f, "irrelevant content")
            }
            RejectionReason::Irrelevant { categories } => {
                write!(f, "irrelevant content ({})", categories.join(", "))
            }
            RejectionReason::Fault { detail } => write!(f, "fault: {}", detail),
            RejectionReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What a run emits once its item is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedRecord {
    pub run_id: Uuid,
    pub item_id: ItemId,
    pub source: SourceRef,
    pub title: String,
    pub status: FinalStatus,
    /// Accepted script, or the best attempt's script when degraded.
    pub script: Option<Script>,
    /// Score of `script`.
    pub score: Option<ScoreRecord>,
    /// Correction cycles used.
    pub attempts: u32,
    pub reason: Option<RejectionReason>,
    pub fallback_used: bool,
    pub categories: Vec<String>,
    pub authenticity: Option<f64>,
    pub finalized_at: DateTime<Utc>,
    /// Delivery results, when the record was pushed.
    pub push: Option<PushReport>,
}

impl FinalizedRecord {
    /// Builds the record from a finalized item.
    pub(crate) fn from_item(
        run_id: Uuid,
        item: &ContentItem,
        status: FinalStatus,
        score: Option<ScoreRecord>,
        reason: Option<RejectionReason>,
    ) -> Self {
        Self {
            run_id,
            item_id: item.id,
            source: item.source.clone(),
            title: item.title().to_string(),
            status,
            script: item.script().cloned(),
            score,
            attempts: item.attempts(),
            reason,
            fallback_used: item.fallback_used(),
            categories: item
                .relevance()
                .map(|r| r.categories.clone())
                .unwrap_or_default(),
            authenticity: item.verification().map(|v| v.authenticity),
            finalized_at: Utc::now(),
            push: None,
        }
    }

    pub fn is_deliverable(&self) -> bool {
        matches!(self.status, FinalStatus::Accepted | FinalStatus::Degraded)
    }

    /// Composite reward of the kept script, if one was scored.
    pub fn composite(&self) -> Option<f64> {
        self.score.as_ref().map(|s| s.composite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_from_dispatch_error() {
        let err = DispatchError::TaskFailed {
            task_id: Uuid::new_v4(),
            stage: crate::stages::Stage::Filter,
            source: StageError::Irrelevant {
                categories: vec!["recipes".into()],
            },
        };
        assert_eq!(
            RejectionReason::from(&err),
            RejectionReason::Irrelevant {
                categories: vec!["recipes".into()]
            }
        );
        assert_eq!(
            RejectionReason::from(&DispatchError::ShutDown),
            RejectionReason::Cancelled
        );
        assert!(RejectionReason::from(&DispatchError::TaskLost(Uuid::new_v4())).is_fault());
    }

    #[test]
    fn test_reason_serializes_with_kind_tag() {
        let json = serde_json::to_value(RejectionReason::EmptyContent).unwrap();
        assert_eq!(json["kind"], "empty_content");
        assert_eq!(RejectionReason::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_record_from_fresh_item() {
        let source = SourceRef::parse("https://news.example.com/a").unwrap();
        let item = ContentItem::new(source, 3);
        let record = FinalizedRecord::from_item(
            Uuid::new_v4(),
            &item,
            FinalStatus::Rejected,
            None,
            Some(RejectionReason::Cancelled),
        );

        assert!(!record.is_deliverable());
        assert_eq!(record.title, "");
        assert!(record.categories.is_empty());
        assert!(record.authenticity.is_none());
        assert!(record.composite().is_none());
    }
}
