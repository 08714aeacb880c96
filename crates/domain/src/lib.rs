//! Domain layer for the operations control plane.
//!
//! This crate provides the pure operation model:
//! - `Operation` entity with guarded lifecycle transitions
//! - `OperationStatus` state machine and `OperationType` catalogue
//! - `OperationPolicies` with per-type expected durations, deadlines and retry caps
//!
//! Nothing here performs I/O or reads the clock; callers pass timestamps in.

pub mod operation;

pub use operation::{
    MAX_ERROR_MESSAGE_BYTES, NewOperation, Operation, OperationError, OperationPolicies,
    OperationRecord, OperationStatus, OperationType, ParseOperationStatusError,
    ParseOperationTypeError, Payload, TypePolicy, truncate_message,
};
