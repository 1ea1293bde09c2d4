// Notification events and topics

//! # Workflow Events
//!
//! Every committed creation or transition is published as a [`WorkflowEvent`] on a set of
//! [`Topic`]s. Connected observers rely on the JSON field names, so the wire shape is fixed:
//!
//! ```json
//! { "instanceId": "...", "jobId": "JC-1001", "workflowKind": "PREPRESS",
//!   "eventType": "STATUS_CHANGED", "fromStatus": "DESIGNING", "toStatus": "DESIGNING_COMPLETED",
//!   "actor": "u-42", "notes": null, "metadata": {}, "occurredAt": "2026-01-01T00:00:00Z" }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::instance::{Metadata, TransitionRecord, WorkflowInstance};
use super::status::WorkflowKind;
use crate::{JobCardError, Result};

/// What happened to the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    StatusChanged,
}

/// Event payload pushed to subscribers.
///
/// Statuses are carried as wire names; `workflow_kind` disambiguates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    pub instance_id: Uuid,
    pub job_id: String,
    pub workflow_kind: WorkflowKind,
    pub event_type: EventType,
    pub from_status: Option<String>,
    pub to_status: String,
    pub actor: String,
    pub notes: Option<String>,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
}

impl WorkflowEvent {
    /// Build the event for a committed record of `instance`
    pub fn from_record(instance: &WorkflowInstance, record: &TransitionRecord) -> Self {
        let event_type = if record.is_creation() {
            EventType::Created
        } else {
            EventType::StatusChanged
        };

        WorkflowEvent {
            instance_id: instance.id,
            job_id: instance.job_id.clone(),
            workflow_kind: instance.kind,
            event_type,
            from_status: record.from_status.map(|s| s.as_str().to_string()),
            to_status: record.to_status.as_str().to_string(),
            actor: record.actor.clone(),
            notes: record.notes.clone(),
            metadata: record.metadata.clone(),
            occurred_at: record.occurred_at,
        }
    }
}

/// A named channel observers subscribe to.
///
/// Wire forms: `global`, `role:<ROLE>`, `job:<jobId>`, `user:<userId>`, `kind:<KIND>:hod`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    Global,
    Role(String),
    Job(String),
    User(String),
    /// The fixed supervisory (head of department) channel of a workflow kind
    Supervisor(WorkflowKind),
}

impl Topic {
    pub fn role<S: Into<String>>(role: S) -> Self {
        Topic::Role(role.into())
    }

    pub fn job<S: Into<String>>(job_id: S) -> Self {
        Topic::Job(job_id.into())
    }

    pub fn user<S: Into<String>>(user_id: S) -> Self {
        Topic::User(user_id.into())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Global => write!(f, "global"),
            Topic::Role(role) => write!(f, "role:{}", role),
            Topic::Job(job_id) => write!(f, "job:{}", job_id),
            Topic::User(user_id) => write!(f, "user:{}", user_id),
            Topic::Supervisor(kind) => write!(f, "kind:{}:hod", kind),
        }
    }
}

impl FromStr for Topic {
    type Err = JobCardError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || JobCardError::Validation(format!("invalid topic '{}'", s));

        if s == "global" {
            return Ok(Topic::Global);
        }

        let (prefix, rest) = s.split_once(':').ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }

        match prefix {
            "role" => Ok(Topic::role(rest)),
            "job" => Ok(Topic::job(rest)),
            "user" => Ok(Topic::user(rest)),
            "kind" => {
                let kind = rest.strip_suffix(":hod").ok_or_else(invalid)?;
                Ok(Topic::Supervisor(kind.parse()?))
            }
            _ => Err(invalid()),
        }
    }
}

impl Serialize for Topic {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStatus, Priority};

    #[test]
    fn topics_round_trip_through_wire_form() {
        let topics = [
            Topic::Global,
            Topic::role("HOD_PREPRESS"),
            Topic::job("JC-1001"),
            Topic::user("u-42"),
            Topic::Supervisor(WorkflowKind::Prepress),
        ];

        for topic in topics {
            let wire = topic.to_string();
            assert_eq!(wire.parse::<Topic>().unwrap(), topic, "topic {}", wire);
        }

        assert_eq!(
            Topic::Supervisor(WorkflowKind::JobLifecycle).to_string(),
            "kind:JOB_LIFECYCLE:hod"
        );
    }

    #[test]
    fn malformed_topics_are_rejected() {
        for raw in ["", "role:", "team:a", "kind:PREPRESS", "kind:PRINTING:hod", "globalx"] {
            assert!(raw.parse::<Topic>().is_err(), "accepted {:?}", raw);
        }
    }

    #[test]
    fn event_wire_shape_is_stable() {
        let instance =
            WorkflowInstance::new("JC-9", JobStatus::Created.into(), "design", Priority::Normal);
        let record = TransitionRecord::new(
            instance.id,
            Some(JobStatus::Created.into()),
            JobStatus::AssignedToPrepress.into(),
            "u-1",
            Some("handed to prepress".to_string()),
            Metadata::new(),
        );

        let event = WorkflowEvent::from_record(&instance, &record);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["eventType"], "STATUS_CHANGED");
        assert_eq!(value["workflowKind"], "JOB_LIFECYCLE");
        assert_eq!(value["fromStatus"], "CREATED");
        assert_eq!(value["toStatus"], "ASSIGNED_TO_PREPRESS");
        assert_eq!(value["notes"], "handed to prepress");
        for field in ["instanceId", "jobId", "actor", "metadata", "occurredAt"] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }
    }
}
