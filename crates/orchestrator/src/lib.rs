//! Lifecycle orchestration for long-running tenant operations.
//!
//! - `OperationService` applies guarded transitions with optimistic concurrency
//! - `OperationExecutor` runs task bodies in the background under per-type
//!   deadlines, honouring operator cancels through the `CancelRegistry`
//! - `OperationDispatcher` is the enqueue entry point for request handlers
//! - `StallMonitor` periodically reports operations that stopped moving

pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod registry;
pub mod service;
pub mod task;

pub use dispatcher::{DISPATCH_REFUSED_MESSAGE, OperationDispatcher};
pub use error::{Result, ServiceError};
pub use executor::{ExecutorConfig, OperationExecutor, SHUTDOWN_MESSAGE, TIMEOUT_MESSAGE};
pub use monitor::{StallMonitor, StallMonitorConfig};
pub use registry::CancelRegistry;
pub use service::OperationService;
pub use task::{TaskCatalog, TaskContext, TaskError, TaskHandler, TaskResult};
