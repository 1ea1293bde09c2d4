// Core domain models for job card workflows
// Plain data: statuses, instances, audit records, events and material coverage

//! # Domain Models Module
//!
//! These types carry no behaviour beyond construction and small helpers. The rules that
//! move them around (transition tables, the engine, the scheduler) live in `engine/`.

// Workflow kinds, per-kind status enums and priorities
pub mod status;

// WorkflowInstance, TransitionRecord and listing filters
pub mod instance;

// WorkflowEvent wire payload and notification topics
pub mod event;

// Material coverage inputs and results
pub mod material;

pub use status::{JobStatus, PrepressStatus, Priority, WorkflowKind, WorkflowStatus};

pub use instance::{
    HistoryOrder, InstanceFilter, Metadata, TransitionRecord, WorkflowInstance, SYSTEM_ACTOR,
};

pub use event::{EventType, Topic, WorkflowEvent};

pub use material::{
    AllocationStatus, CoverageStatus, MaterialAllocation, MaterialAvailability,
    MaterialCoverageResult, MaterialRequirement,
};
