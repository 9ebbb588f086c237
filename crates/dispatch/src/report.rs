//! Aggregated results of one dispatch invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use waveline_core::types::{AccountId, MessageId, RecipientId};

/// Terminal state of one send job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Sent,
    Failed,
    /// Nothing was attempted: the assigned account lost its handle between
    /// planning and execution, or cancellation interrupted the job's wait.
    Skipped,
}

/// Outcome of one (account, recipient) job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub wave: usize,
    pub account_id: AccountId,
    pub recipient_id: RecipientId,
    pub status: JobStatus,
    /// Provider receipt id, for sent jobs.
    pub provider_message_id: Option<i64>,
    /// Rendered error, for failed and skipped jobs.
    pub error: Option<String>,
    /// Whole seconds this job spent waiting on the account's throttle.
    pub throttle_wait_secs: u64,
    pub retried_after_flood: bool,
    pub completed_at: DateTime<Utc>,
}

/// What one campaign did, per recipient and in aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReport {
    pub dispatch_id: Uuid,
    pub message_id: MessageId,
    pub success_count: u32,
    pub fail_count: u32,
    pub skipped_count: u32,
    /// Waves that started execution. Waves skipped by cancellation are not
    /// counted.
    pub waves_run: usize,
    pub cancelled: bool,
    pub outcomes: Vec<JobOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DispatchReport {
    pub(crate) fn new(dispatch_id: Uuid, message_id: MessageId) -> Self {
        let now = Utc::now();
        Self {
            dispatch_id,
            message_id,
            success_count: 0,
            fail_count: 0,
            skipped_count: 0,
            waves_run: 0,
            cancelled: false,
            outcomes: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub(crate) fn record(&mut self, outcome: JobOutcome) {
        match outcome.status {
            JobStatus::Sent => self.success_count += 1,
            JobStatus::Failed => self.fail_count += 1,
            JobStatus::Skipped => self.skipped_count += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Outcomes for one recipient, in attempt order.
    pub fn outcomes_for(&self, recipient_id: RecipientId) -> Vec<&JobOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.recipient_id == recipient_id)
            .collect()
    }
}
