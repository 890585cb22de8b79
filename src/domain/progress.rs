use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ApplyStatus {
    Pending,
    Processing,
    Success,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApplyErrorKind {
    NotFound,
    AlreadyNamed,
    CreateFailed,
    AssignFailed,
    Network,
    Timeout,
    Other,
    /// Remaining items after a transport collapse.
    Aborted,
}

/// One event in a batch's progress stream. `seq` increases monotonically
/// within the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyProgress {
    pub seq: u64,
    pub batch_id: String,
    pub index: usize,
    pub total: usize,
    pub label: String,
    pub status: ApplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ApplyErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Final state of one batch item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyItemResult {
    pub index: usize,
    pub label: String,
    pub status: ApplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ApplyErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Batch outcome. success + failed + skipped + cancelled_remaining = total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    pub batch_id: String,
    pub dry_run: bool,
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    /// Items never started because the batch was cancelled; they stay
    /// `pending` in `items`.
    pub cancelled_remaining: usize,
    pub items: Vec<ApplyItemResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_error: Option<String>,
}

impl ApplyReport {
    /// HTTP response shape: items grouped by outcome.
    pub fn to_response(&self) -> serde_json::Value {
        let by_status = |status: ApplyStatus| -> Vec<&ApplyItemResult> {
            self.items.iter().filter(|i| i.status == status).collect()
        };
        serde_json::json!({
            "batch_id": self.batch_id,
            "dry_run": self.dry_run,
            "total": self.total,
            "success_count": self.success_count,
            "failed_count": self.failed_count,
            "skipped_count": self.skipped_count,
            "cancelled_remaining": self.cancelled_remaining,
            "terminal_error": self.terminal_error,
            "results": {
                "success": by_status(ApplyStatus::Success),
                "failed": by_status(ApplyStatus::Error),
                "skipped": by_status(ApplyStatus::Skipped),
            },
            "items": self.items,
        })
    }
}
