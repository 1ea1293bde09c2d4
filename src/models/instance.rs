// Workflow instance domain models - execution state and audit trail

//! # Workflow Instances
//!
//! This module defines the records the engine owns:
//! - `WorkflowInstance`: one per `(job, workflow kind)`, holding the current status
//! - `TransitionRecord`: an immutable audit entry written for every committed transition
//! - `Metadata`: opaque key-value bag carried on records and events
//!
//! The job itself (and everything else about it) belongs to an external collaborator;
//! instances reference it by `job_id` only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use super::status::{Priority, WorkflowKind, WorkflowStatus};

/// Actor name recorded for transitions the engine performs on its own.
pub const SYSTEM_ACTOR: &str = "system";

/// Generic metadata - key-value store attached to transitions and events
pub type Metadata = HashMap<String, serde_json::Value>;

/// One job's position in one workflow kind.
///
/// ## Invariants
/// - `status.kind() == kind`
/// - `stage` is whatever the transition table maps `status` to; it is never set directly
/// - instances are never deleted, terminal statuses only stop further transitions
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub id: Uuid,

    /// Reference to the externally owned job card
    pub job_id: String,

    #[serde(rename = "workflowKind")]
    pub kind: WorkflowKind,

    pub status: WorkflowStatus,

    /// Derived label, e.g. "design" or "production"
    pub stage: String,

    pub priority: Priority,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Create a fresh instance in `initial` status
    ///
    /// The kind is taken from the status so the two can't disagree.
    pub fn new<J: Into<String>, S: Into<String>>(
        job_id: J,
        initial: WorkflowStatus,
        stage: S,
        priority: Priority,
    ) -> Self {
        let now = Utc::now();

        WorkflowInstance {
            id: Uuid::new_v4(),
            job_id: job_id.into(),
            kind: initial.kind(),
            status: initial,
            stage: stage.into(),
            priority,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_in_status(&self, status: WorkflowStatus) -> bool {
        self.status == status
    }
}

/// Audit entry for one committed transition.
///
/// The creation record has `from_status = None` and `sequence = 0`; every later record
/// increments `sequence` by one, so a log is totally ordered even when two records share a
/// timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub id: Uuid,
    pub instance_id: Uuid,

    /// Position in the instance's log, assigned by the store on append
    pub sequence: u64,

    pub from_status: Option<WorkflowStatus>,
    pub to_status: WorkflowStatus,

    /// User id, or [`SYSTEM_ACTOR`] for auto-progression and cross-workflow reactions
    pub actor: String,

    pub notes: Option<String>,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
}

impl TransitionRecord {
    pub fn new<A: Into<String>>(
        instance_id: Uuid,
        from_status: Option<WorkflowStatus>,
        to_status: WorkflowStatus,
        actor: A,
        notes: Option<String>,
        metadata: Metadata,
    ) -> Self {
        TransitionRecord {
            id: Uuid::new_v4(),
            instance_id,
            sequence: 0,
            from_status,
            to_status,
            actor: actor.into(),
            notes,
            metadata,
            occurred_at: Utc::now(),
        }
    }

    pub fn is_creation(&self) -> bool {
        self.from_status.is_none()
    }

    pub fn is_system(&self) -> bool {
        self.actor == SYSTEM_ACTOR
    }

    /// Fold an oldest-first log into the status it leads to.
    ///
    /// Returns `None` for an empty log or one that is not internally consistent (a record
    /// whose `from_status` doesn't match the status the previous record produced).
    pub fn replay<'a, I>(records: I) -> Option<WorkflowStatus>
    where
        I: IntoIterator<Item = &'a TransitionRecord>,
    {
        records.into_iter().try_fold(None, |current, record| {
            match (current, record.from_status) {
                (None, None) => Some(Some(record.to_status)),
                (Some(status), Some(from)) if status == from => Some(Some(record.to_status)),
                _ => None,
            }
        })?
    }
}

/// Order in which history is returned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistoryOrder {
    OldestFirst,
    /// Most recent transition first (the default for audit views)
    #[default]
    NewestFirst,
}

/// Filter for listing instances. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceFilter {
    pub kind: Option<WorkflowKind>,
    pub status: Option<WorkflowStatus>,
    pub priority: Option<Priority>,
    pub job_id: Option<String>,
}

impl InstanceFilter {
    pub fn kind(kind: WorkflowKind) -> Self {
        InstanceFilter {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_job<J: Into<String>>(mut self, job_id: J) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn matches(&self, instance: &WorkflowInstance) -> bool {
        self.kind.map_or(true, |kind| instance.kind == kind)
            && self.status.map_or(true, |status| instance.status == status)
            && self.priority.map_or(true, |priority| instance.priority == priority)
            && self
                .job_id
                .as_deref()
                .map_or(true, |job_id| instance.job_id == job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStatus, PrepressStatus};

    fn record(from: Option<WorkflowStatus>, to: WorkflowStatus) -> TransitionRecord {
        TransitionRecord::new(Uuid::new_v4(), from, to, "u-1", None, Metadata::new())
    }

    #[test]
    fn new_instance_takes_kind_from_status() {
        let instance = WorkflowInstance::new(
            "JC-1001",
            PrepressStatus::Pending.into(),
            "assignment",
            Priority::High,
        );

        assert_eq!(instance.kind, WorkflowKind::Prepress);
        assert!(instance.is_in_status(PrepressStatus::Pending.into()));
        assert_eq!(instance.created_at, instance.updated_at);
    }

    #[test]
    fn replay_follows_the_log() {
        let created = JobStatus::Created.into();
        let assigned = JobStatus::AssignedToPrepress.into();
        let in_progress = JobStatus::PrepressInProgress.into();

        let log = vec![
            record(None, created),
            record(Some(created), assigned),
            record(Some(assigned), in_progress),
        ];

        assert_eq!(TransitionRecord::replay(&log), Some(in_progress));
        assert!(log[0].is_creation());
    }

    #[test]
    fn replay_rejects_broken_logs() {
        let created = JobStatus::Created.into();
        let hold = JobStatus::OnHold.into();
        let review = JobStatus::HodReview.into();

        // gap: second record does not start where the first ended
        let log = vec![record(None, created), record(Some(review), hold)];
        assert_eq!(TransitionRecord::replay(&log), None);

        let empty: Vec<TransitionRecord> = Vec::new();
        assert_eq!(TransitionRecord::replay(&empty), None);
    }

    #[test]
    fn filter_matches_on_every_field() {
        let instance = WorkflowInstance::new(
            "JC-7",
            JobStatus::Created.into(),
            "design",
            Priority::Urgent,
        );

        assert!(InstanceFilter::default().matches(&instance));
        assert!(InstanceFilter::kind(WorkflowKind::JobLifecycle)
            .with_status(JobStatus::Created.into())
            .with_priority(Priority::Urgent)
            .with_job("JC-7")
            .matches(&instance));
        assert!(!InstanceFilter::kind(WorkflowKind::Prepress).matches(&instance));
        assert!(!InstanceFilter::default().with_job("JC-8").matches(&instance));
    }

    #[test]
    fn instance_wire_shape_uses_camel_case() {
        let instance =
            WorkflowInstance::new("JC-2", JobStatus::Created.into(), "design", Priority::Low);
        let value = serde_json::to_value(&instance).unwrap();

        assert_eq!(value["jobId"], "JC-2");
        assert_eq!(value["workflowKind"], "JOB_LIFECYCLE");
        assert_eq!(value["status"], "CREATED");
        assert_eq!(value["priority"], "LOW");
    }
}
