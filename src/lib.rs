// JobCard Flow
// Workflow engine for manufacturing job cards and their prepress sub-workflow

//! # JobCard Flow Library
//!
//! A job card moves through a fixed production lifecycle (design, pre-production approvals,
//! production, completion) and, in parallel, through a nested prepress sub-workflow. This
//! crate is the engine that keeps both honest.
//!
//! ## Core Components
//!
//! ### Domain Models
//! - [`WorkflowInstance`]: one per `(job, workflow kind)`, carrying the current status
//! - [`TransitionRecord`]: append-only audit entry for every committed transition
//! - [`WorkflowEvent`] / [`Topic`]: what observers receive and where
//!
//! ### Engine
//! - [`TransitionTable`]: static, validated map of allowed moves, stages and progress
//! - [`WorkflowEngine`]: validated, serialised transitions against a [`WorkflowStore`]
//! - [`AutoProgressionScheduler`]: delayed, cancellable follow-up transitions
//! - [`NotificationBroadcaster`]: topic fanout to connected observers
//! - [`MaterialCoverageAnalyzer`]: decides whether stock covers a job's requirements
//!
//! ```text
//! caller ─► WorkflowEngine ─► TransitionTable (validate)
//!                │
//!                ├─► WorkflowStore (CAS status + append history, one unit)
//!                ├─► AutoProgressionScheduler (maybe schedule a follow-up)
//!                └─► NotificationBroadcaster (publish, never fails the call)
//! ```
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use jobcard_flow::{
//!     CreateInstance, InMemoryStore, JobStatus, TopicBroadcaster, TransitionRequest,
//!     WorkflowConfig, WorkflowEngine, WorkflowKind,
//! };
//!
//! # async fn demo() -> jobcard_flow::Result<()> {
//! let engine = WorkflowEngine::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(TopicBroadcaster::new()),
//!     &WorkflowConfig::default(),
//! )?;
//!
//! let job = engine
//!     .create_instance(WorkflowKind::JobLifecycle, CreateInstance::new("JC-1001", "u-7"))
//!     .await?;
//! engine
//!     .transition(job.id, TransitionRequest::new(JobStatus::AssignedToPrepress, "u-7"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Domain models (statuses, instances, records, events, materials)
pub mod models;

// Tables, store contract, engine, scheduler, broadcaster, analyzer
pub mod engine;

// Layered configuration (file + environment)
pub mod config;

pub use models::{
    AllocationStatus, CoverageStatus, EventType, HistoryOrder, InstanceFilter, JobStatus,
    MaterialAllocation, MaterialAvailability, MaterialCoverageResult, MaterialRequirement,
    Metadata, PrepressStatus, Priority, Topic, TransitionRecord, WorkflowEvent, WorkflowInstance,
    WorkflowKind, WorkflowStatus, SYSTEM_ACTOR,
};

pub use engine::{
    events::{
        EventHandler, NotificationBroadcaster, NotificationError, SubscriptionHandle,
        TopicBroadcaster,
    },
    materials::MaterialCoverageAnalyzer,
    reactions::{CrossWorkflowReactor, ReactorHandle},
    scheduler::AutoProgressionScheduler,
    storage::{InMemoryStore, StatusUpdate, WorkflowStore},
    topics::TopicRouter,
    transitions::{auto_follow_up, progress_of, stage_of, TransitionTable, TransitionTables},
    workflow::{CreateInstance, TransitionOutcome, TransitionRequest, WorkflowEngine},
};

pub use crate::config::WorkflowConfig;

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the workflow core
///
/// Notification failures are deliberately absent: they are logged and dropped by the
/// engine and never reach a transition caller (see [`NotificationError`]).
#[derive(Error, Debug)]
pub enum JobCardError {
    /// Malformed input: unknown kind, a status outside the kind's set, bad quantities
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The referenced workflow instance does not exist
    #[error("Workflow instance not found: {id}")]
    NotFound { id: String },

    /// The move is not in the transition table; nothing was changed
    #[error("Invalid {kind} transition from {from} to {to}")]
    InvalidTransition {
        kind: WorkflowKind,
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    /// Another writer changed the instance first and the retry budget ran out
    #[error(
        "Concurrent update on instance {instance_id}: expected {expected}, found {actual} after {attempts} attempt(s)"
    )]
    ConcurrencyConflict {
        instance_id: Uuid,
        expected: WorkflowStatus,
        actual: WorkflowStatus,
        attempts: u32,
    },

    /// Store unavailable or transaction failure. Not retried internally.
    #[error("Persistence error: {0}")]
    Persistence(#[from] anyhow::Error),

    /// Broken transition table or unusable configuration. Raised at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JobCardError {
    /// Whether the caller may retry the whole operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobCardError::ConcurrencyConflict { .. })
    }

    pub(crate) fn not_found(id: Uuid) -> Self {
        JobCardError::NotFound { id: id.to_string() }
    }
}

impl From<::config::ConfigError> for JobCardError {
    fn from(err: ::config::ConfigError) -> Self {
        JobCardError::Configuration(err.to_string())
    }
}

/// Type alias for Results that use the crate error type
pub type Result<T> = std::result::Result<T, JobCardError>;
