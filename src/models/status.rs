// Workflow kinds and their closed status sets

//! # Workflow Statuses
//!
//! A job card is tracked by two parallel state machines:
//!
//! ```text
//! JOB_LIFECYCLE  CREATED → ASSIGNED_TO_PREPRESS → PREPRESS_IN_PROGRESS → PREPRESS_COMPLETED
//!                → HOD_REVIEW → READY_FOR_PRODUCTION → IN_PRODUCTION → COMPLETED
//!                (ON_HOLD and CANCELLED reachable from every non-terminal status)
//!
//! PREPRESS       PENDING → ASSIGNED → DESIGNING → DESIGNING_COMPLETED → DIE_MAKING → ...
//!                → PLATE_MAKING_COMPLETED → PREPRESS_COMPLETED → HOD_REVIEW → COMPLETED
//! ```
//!
//! Each kind has its own closed enum. [`WorkflowStatus`] is the tagged union of the two,
//! so the kind of a typed status is always known and a status can never drift into the
//! other kind's set. Text coming from callers goes through [`WorkflowStatus::parse`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

use crate::{JobCardError, Result};

/// The two workflow definitions a job card moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowKind {
    /// The overall job card lifecycle, design through completion
    JobLifecycle,
    /// The nested prepress sub-workflow (design, die making, plate making)
    Prepress,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 2] = [WorkflowKind::JobLifecycle, WorkflowKind::Prepress];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::JobLifecycle => "JOB_LIFECYCLE",
            WorkflowKind::Prepress => "PREPRESS",
        }
    }

    /// Every status declared for this kind, in declaration order
    pub fn statuses(&self) -> Vec<WorkflowStatus> {
        match self {
            WorkflowKind::JobLifecycle => JobStatus::ALL.iter().map(|s| (*s).into()).collect(),
            WorkflowKind::Prepress => PrepressStatus::ALL.iter().map(|s| (*s).into()).collect(),
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = JobCardError;

    fn from_str(s: &str) -> Result<Self> {
        WorkflowKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| JobCardError::Validation(format!("unknown workflow kind '{}'", s)))
    }
}

/// Generates a closed status enum with its wire names and an `ALL` table.
macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = JobCardError;

            fn from_str(s: &str) -> Result<Self> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|status| status.as_str() == s)
                    .ok_or_else(|| {
                        JobCardError::Validation(format!(
                            "'{}' is not a {} status",
                            s,
                            stringify!($name)
                        ))
                    })
            }
        }
    };
}

status_enum! {
    /// Statuses of the job card lifecycle.
    JobStatus {
        Created => "CREATED",
        AssignedToPrepress => "ASSIGNED_TO_PREPRESS",
        PrepressInProgress => "PREPRESS_IN_PROGRESS",
        PrepressCompleted => "PREPRESS_COMPLETED",
        HodReview => "HOD_REVIEW",
        ReadyForProduction => "READY_FOR_PRODUCTION",
        InProduction => "IN_PRODUCTION",
        Completed => "COMPLETED",
        OnHold => "ON_HOLD",
        Cancelled => "CANCELLED",
    }
}

status_enum! {
    /// Statuses of the prepress sub-workflow.
    PrepressStatus {
        Pending => "PENDING",
        Assigned => "ASSIGNED",
        Designing => "DESIGNING",
        DesigningCompleted => "DESIGNING_COMPLETED",
        DieMaking => "DIE_MAKING",
        DieMakingCompleted => "DIE_MAKING_COMPLETED",
        PlateMaking => "PLATE_MAKING",
        PlateMakingCompleted => "PLATE_MAKING_COMPLETED",
        PrepressCompleted => "PREPRESS_COMPLETED",
        InProgress => "IN_PROGRESS",
        Paused => "PAUSED",
        HodReview => "HOD_REVIEW",
        Rejected => "REJECTED",
        Completed => "COMPLETED",
    }
}

/// A status of either workflow kind.
///
/// Several wire names (`HOD_REVIEW`, `PREPRESS_COMPLETED`, `COMPLETED`) exist in both kinds,
/// so a bare string is ambiguous; this type always carries its kind. It serializes as the bare
/// wire name because every payload that contains a status also carries the workflow kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkflowStatus {
    Job(JobStatus),
    Prepress(PrepressStatus),
}

impl WorkflowStatus {
    /// Parse caller-provided text into a status of the given kind
    ///
    /// ## Errors
    /// `Validation` when the name is not in that kind's status set.
    pub fn parse(kind: WorkflowKind, name: &str) -> Result<Self> {
        let name = name.trim();
        match kind {
            WorkflowKind::JobLifecycle => name.parse::<JobStatus>().map(WorkflowStatus::Job),
            WorkflowKind::Prepress => name.parse::<PrepressStatus>().map(WorkflowStatus::Prepress),
        }
        .map_err(|_| {
            JobCardError::Validation(format!("'{}' is not a status of workflow kind {}", name, kind))
        })
    }

    pub fn kind(&self) -> WorkflowKind {
        match self {
            WorkflowStatus::Job(_) => WorkflowKind::JobLifecycle,
            WorkflowStatus::Prepress(_) => WorkflowKind::Prepress,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Job(status) => status.as_str(),
            WorkflowStatus::Prepress(status) => status.as_str(),
        }
    }
}

impl From<JobStatus> for WorkflowStatus {
    fn from(status: JobStatus) -> Self {
        WorkflowStatus::Job(status)
    }
}

impl From<PrepressStatus> for WorkflowStatus {
    fn from(status: PrepressStatus) -> Self {
        WorkflowStatus::Prepress(status)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for WorkflowStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Scheduling priority shared by workflow instances and material requirements.
///
/// Ordered so that `Urgent > High > Normal > Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
            Priority::Urgent => "URGENT",
        };
        f.write_str(name)
    }
}
