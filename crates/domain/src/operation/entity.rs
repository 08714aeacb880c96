//! Operation entity.

use chrono::{DateTime, Utc};
use common::{OperationId, TenantId, Version};
use serde::{Deserialize, Serialize};

use super::{OperationError, OperationPolicies, OperationStatus, OperationType};

/// Structured string→value payload used for parameters and results.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Upper bound on stored error messages, in bytes.
pub const MAX_ERROR_MESSAGE_BYTES: usize = 4 * 1024;

const EMPTY_FAILURE_MESSAGE: &str = "failed without an error message";
const EMPTY_CANCEL_REASON: &str = "cancelled";

/// Truncates `message` to at most `max_bytes`, cutting on a char boundary.
pub fn truncate_message(message: &str, max_bytes: usize) -> &str {
    if message.len() <= max_bytes {
        return message;
    }
    let mut end = max_bytes;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

/// An operation that has been requested but not yet persisted.
///
/// The repository turns it into an [`Operation`] by assigning an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub operation_type: OperationType,
    pub tenant_id: Option<TenantId>,
    pub parameters: Payload,
    pub created_at: DateTime<Utc>,
}

impl NewOperation {
    /// Creates a new operation request stamped with `now`.
    pub fn new(
        operation_type: OperationType,
        tenant_id: Option<TenantId>,
        parameters: Payload,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            operation_type,
            tenant_id,
            parameters,
            created_at: now,
        }
    }
}

/// Persistent record of a long-running lifecycle action.
///
/// Fields are only changed through the transition methods, which reject any
/// edge not on the state machine and keep the timestamp and payload
/// invariants. Timestamps passed in are clamped to never run backwards
/// relative to `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    id: OperationId,
    #[serde(rename = "type")]
    operation_type: OperationType,
    status: OperationStatus,
    tenant_id: Option<TenantId>,
    parameters: Payload,
    result: Option<Payload>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,

    /// Optimistic concurrency counter, advanced by the repository.
    version: Version,

    /// Number of `failed → pending` edges taken so far.
    retry_count: u32,

    /// Progress observed when the operation stopped running.
    last_progress: Option<u8>,
}

/// Every column of a stored operation, used by repository adapters to
/// rebuild an [`Operation`] from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: OperationId,
    pub operation_type: OperationType,
    pub status: OperationStatus,
    pub tenant_id: Option<TenantId>,
    pub parameters: Payload,
    pub result: Option<Payload>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: Version,
    pub retry_count: u32,
    pub last_progress: Option<u8>,
}

impl Operation {
    /// Materializes a freshly created operation with its assigned id.
    pub fn create(id: OperationId, new: NewOperation) -> Self {
        Self {
            id,
            operation_type: new.operation_type,
            status: OperationStatus::Pending,
            tenant_id: new.tenant_id,
            parameters: new.parameters,
            result: None,
            error_message: None,
            created_at: new.created_at,
            started_at: None,
            completed_at: None,
            updated_at: new.created_at,
            version: Version::first(),
            retry_count: 0,
            last_progress: None,
        }
    }

    /// Rebuilds an operation from stored columns.
    pub fn restore(record: OperationRecord) -> Self {
        Self {
            id: record.id,
            operation_type: record.operation_type,
            status: record.status,
            tenant_id: record.tenant_id,
            parameters: record.parameters,
            result: record.result,
            error_message: record.error_message,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            updated_at: record.updated_at,
            version: record.version,
            retry_count: record.retry_count,
            last_progress: record.last_progress,
        }
    }

    /// Sets the version after the repository committed a write.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

// Query methods
impl Operation {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn parameters(&self) -> &Payload {
        &self.parameters
    }

    pub fn result(&self) -> Option<&Payload> {
        self.result.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Progress recorded when the operation stopped running, if any.
    pub fn last_progress(&self) -> Option<u8> {
        self.last_progress
    }

    /// Returns true if the operation is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Estimated progress in percent.
    ///
    /// Pending is 0 and completed is 100. A failed or cancelled operation
    /// reports the value last observed while it ran. While in progress the
    /// value is interpolated linearly over the expected duration of the type
    /// and clamped to `1..=99`.
    pub fn progress(
        &self,
        now: DateTime<Utc>,
        policies: &OperationPolicies,
    ) -> Result<u8, OperationError> {
        match self.status {
            OperationStatus::Pending => Ok(0),
            OperationStatus::Completed => Ok(100),
            OperationStatus::Failed | OperationStatus::Cancelled => {
                Ok(self.last_progress.unwrap_or(0))
            }
            OperationStatus::InProgress => {
                let expected = policies.expected_duration(self.operation_type)?;
                let Some(started_at) = self.started_at else {
                    return Ok(1);
                };
                let elapsed_ms = (now - started_at).num_milliseconds().max(0) as u128;
                let expected_ms = expected.as_millis().max(1);
                let percent = (elapsed_ms * 100 / expected_ms).clamp(1, 99);
                Ok(percent as u8)
            }
        }
    }

    /// Expected completion instant while the operation is in progress.
    pub fn estimate_completion_time(
        &self,
        policies: &OperationPolicies,
    ) -> Result<Option<DateTime<Utc>>, OperationError> {
        if self.status != OperationStatus::InProgress {
            return Ok(None);
        }
        let expected = policies.expected_duration(self.operation_type)?;
        let expected = chrono::Duration::from_std(expected).unwrap_or(chrono::Duration::MAX);
        Ok(self
            .started_at
            .and_then(|started_at| started_at.checked_add_signed(expected)))
    }

    /// Returns true if a retry is allowed: the operation failed and has not
    /// used up the retry cap of its type.
    pub fn is_retryable(&self, policies: &OperationPolicies) -> bool {
        self.status.can_retry() && self.retry_count < policies.max_retries(self.operation_type)
    }
}

// Transition methods
impl Operation {
    /// `pending → in_progress`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), OperationError> {
        self.ensure(self.status.can_start(), "start")?;
        let now = self.clamp(now);

        self.status = OperationStatus::InProgress;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `in_progress → completed`, storing `result` verbatim.
    pub fn complete(&mut self, result: Payload, now: DateTime<Utc>) -> Result<(), OperationError> {
        self.ensure(self.status.can_complete(), "complete")?;
        let now = self.clamp(now);

        self.status = OperationStatus::Completed;
        self.result = Some(result);
        self.last_progress = Some(100);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `in_progress → failed`. An empty message is replaced so that a failed
    /// operation always explains itself.
    pub fn fail(&mut self, message: &str, now: DateTime<Utc>) -> Result<(), OperationError> {
        self.ensure(self.status.can_fail(), "fail")?;
        let now = self.clamp(now);

        self.status = OperationStatus::Failed;
        self.error_message = Some(non_empty(message, EMPTY_FAILURE_MESSAGE));
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `pending | in_progress → cancelled`, recording `reason`.
    pub fn cancel(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), OperationError> {
        self.ensure(self.status.can_cancel(), "cancel")?;
        let now = self.clamp(now);

        self.status = OperationStatus::Cancelled;
        self.error_message = Some(non_empty(reason, EMPTY_CANCEL_REASON));
        self.started_at = Some(self.started_at.unwrap_or(now));
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `failed → pending`, as a fresh attempt.
    ///
    /// Clears the error, the run timestamps and the observed progress;
    /// `created_at` and `parameters` are untouched.
    pub fn retry(
        &mut self,
        policies: &OperationPolicies,
        now: DateTime<Utc>,
    ) -> Result<(), OperationError> {
        self.ensure(self.status.can_retry(), "retry")?;
        let limit = policies.max_retries(self.operation_type);
        if self.retry_count >= limit {
            return Err(OperationError::RetryLimitExceeded {
                attempts: self.retry_count,
                limit,
            });
        }
        let now = self.clamp(now);

        self.status = OperationStatus::Pending;
        self.error_message = None;
        self.result = None;
        self.started_at = None;
        self.completed_at = None;
        self.last_progress = None;
        self.retry_count += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Snapshots the current progress so it survives a fail or cancel.
    ///
    /// Only meaningful while in progress; other statuses are left alone.
    pub fn record_progress(
        &mut self,
        now: DateTime<Utc>,
        policies: &OperationPolicies,
    ) -> Result<(), OperationError> {
        if self.status == OperationStatus::InProgress {
            self.last_progress = Some(self.progress(now, policies)?);
        }
        Ok(())
    }

    fn ensure(&self, allowed: bool, action: &'static str) -> Result<(), OperationError> {
        if allowed {
            Ok(())
        } else {
            Err(OperationError::InvalidStateTransition {
                from: self.status,
                action,
            })
        }
    }

    fn clamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.max(self.updated_at)
    }
}

fn non_empty(message: &str, fallback: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        truncate_message(trimmed, MAX_ERROR_MESSAGE_BYTES).to_string()
    }
}
