//! Per-type timing and retry policies.

use std::collections::HashMap;
use std::time::Duration;

use super::{OperationError, OperationType};

/// Timing and retry settings for one operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypePolicy {
    /// How long the work normally takes; drives progress and ETA.
    pub expected_duration: Duration,

    /// Hard limit after which the executor fails the operation with `timeout`.
    pub deadline: Duration,

    /// How many times a failed operation may be sent back to pending.
    pub max_retries: u32,
}

impl TypePolicy {
    /// Creates a policy.
    pub fn new(expected_duration: Duration, deadline: Duration, max_retries: u32) -> Self {
        Self {
            expected_duration,
            deadline,
            max_retries,
        }
    }
}

/// Policy table keyed by operation type.
///
/// Types missing from the table have no expected duration (progress and ETA
/// report [`OperationError::UnknownOperationType`]), run under
/// `fallback_deadline`, and are never retryable.
#[derive(Debug, Clone)]
pub struct OperationPolicies {
    policies: HashMap<OperationType, TypePolicy>,
    fallback_deadline: Duration,
}

impl OperationPolicies {
    /// Deadline applied to types without a policy.
    pub const DEFAULT_FALLBACK_DEADLINE: Duration = Duration::from_secs(60 * 60);

    /// Creates an empty table.
    pub fn empty() -> Self {
        Self {
            policies: HashMap::new(),
            fallback_deadline: Self::DEFAULT_FALLBACK_DEADLINE,
        }
    }

    /// Sets the policy for a type, replacing any existing one.
    pub fn with_policy(mut self, kind: OperationType, policy: TypePolicy) -> Self {
        self.policies.insert(kind, policy);
        self
    }

    /// Overrides only the deadline of a type that already has a policy.
    pub fn with_deadline(mut self, kind: OperationType, deadline: Duration) -> Self {
        if let Some(policy) = self.policies.get_mut(&kind) {
            policy.deadline = deadline;
        }
        self
    }

    /// Overrides only the retry cap of a type that already has a policy.
    pub fn with_max_retries(mut self, kind: OperationType, max_retries: u32) -> Self {
        if let Some(policy) = self.policies.get_mut(&kind) {
            policy.max_retries = max_retries;
        }
        self
    }

    /// Sets the deadline used for types without a policy.
    pub fn with_fallback_deadline(mut self, deadline: Duration) -> Self {
        self.fallback_deadline = deadline;
        self
    }

    /// Returns the policy for a type, if configured.
    pub fn get(&self, kind: OperationType) -> Option<&TypePolicy> {
        self.policies.get(&kind)
    }

    /// Returns the expected duration for a type.
    pub fn expected_duration(&self, kind: OperationType) -> Result<Duration, OperationError> {
        self.get(kind)
            .map(|policy| policy.expected_duration)
            .ok_or(OperationError::UnknownOperationType(kind))
    }

    /// Returns the execution deadline for a type.
    pub fn deadline(&self, kind: OperationType) -> Duration {
        self.get(kind)
            .map_or(self.fallback_deadline, |policy| policy.deadline)
    }

    /// Returns the retry cap for a type; zero when unconfigured.
    pub fn max_retries(&self, kind: OperationType) -> u32 {
        self.get(kind).map_or(0, |policy| policy.max_retries)
    }
}

impl Default for OperationPolicies {
    fn default() -> Self {
        let minutes = |m: u64| Duration::from_secs(m * 60);

        Self::empty()
            .with_policy(
                OperationType::TenantCreate,
                TypePolicy::new(minutes(5), minutes(30), 3),
            )
            .with_policy(
                OperationType::TenantDelete,
                TypePolicy::new(minutes(3), minutes(20), 3),
            )
            .with_policy(
                OperationType::TenantUpdate,
                TypePolicy::new(minutes(1), minutes(10), 3),
            )
            .with_policy(
                OperationType::TenantSuspend,
                TypePolicy::new(Duration::from_secs(30), minutes(5), 5),
            )
            .with_policy(
                OperationType::TenantResume,
                TypePolicy::new(Duration::from_secs(30), minutes(5), 5),
            )
            .with_policy(
                OperationType::TenantMigrateRegion,
                TypePolicy::new(minutes(30), minutes(120), 1),
            )
    }
}
