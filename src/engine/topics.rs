// Topic routing for workflow events

use std::collections::BTreeSet;

use crate::config::NotificationConfig;
use crate::models::{Topic, WorkflowEvent, SYSTEM_ACTOR};

/// Metadata key naming the user a transition hands the work to
pub const ASSIGNED_TO_KEY: &str = "assignedTo";

/// Decides which topics an event is published on
///
/// Every event goes to `global`, its job's topic, the fixed supervisory topic of its kind and
/// the configured supervisory roles of that kind. The acting user and the assignee named in
/// `metadata.assignedTo` are addressed directly.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    config: NotificationConfig,
}

impl TopicRouter {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn topics_for(&self, event: &WorkflowEvent) -> BTreeSet<Topic> {
        let mut topics = BTreeSet::new();

        topics.insert(Topic::Global);
        topics.insert(Topic::job(event.job_id.as_str()));
        topics.insert(Topic::Supervisor(event.workflow_kind));

        for role in self.config.roles_for(event.workflow_kind) {
            topics.insert(Topic::role(role.as_str()));
        }

        if event.actor != SYSTEM_ACTOR {
            topics.insert(Topic::user(event.actor.as_str()));
        }

        if let Some(assignee) = event
            .metadata
            .get(ASSIGNED_TO_KEY)
            .and_then(|value| value.as_str())
            .filter(|assignee| !assignee.is_empty())
        {
            topics.insert(Topic::user(assignee));
        }

        topics
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new(&NotificationConfig::default())
    }
}
