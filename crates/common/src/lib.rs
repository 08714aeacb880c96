//! Shared identifiers and the clock port used across the operations workspace.

pub mod clock;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use types::{OperationId, TenantId, Version};
