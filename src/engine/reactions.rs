// Cross-workflow reactions: prepress progress drives the job lifecycle

//! # Cross-Workflow Reactor
//!
//! The two workflow kinds are independent instances, but prepress progress means something for
//! the job as a whole. The reactor is an ordinary subscriber on the prepress supervisory topic
//! that turns two prepress events into job lifecycle transitions:
//!
//! | prepress moves to     | job lifecycle move                                   |
//! |-----------------------|------------------------------------------------------|
//! | `DESIGNING`           | `ASSIGNED_TO_PREPRESS` → `PREPRESS_IN_PROGRESS`      |
//! | `PREPRESS_COMPLETED`  | current status → `PREPRESS_COMPLETED`, if allowed    |
//!
//! Reactions run as actor `"system"` on a single worker task, in the order events were
//! published. A reaction that doesn't apply (no lifecycle instance, move not allowed from its
//! current status) is skipped with a debug log; it never touches the prepress instance.

use serde_json::json;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::{NotificationBroadcaster, SubscriptionHandle};
use super::workflow::{TransitionRequest, WorkflowEngine};
use crate::config::ReactionConfig;
use crate::models::{
    EventType, JobStatus, Metadata, PrepressStatus, Topic, WorkflowEvent, WorkflowKind,
    WorkflowStatus, SYSTEM_ACTOR,
};
use crate::{JobCardError, Result};

/// Metadata key pointing back at the prepress instance that caused a reaction
pub const TRIGGERED_BY_KEY: &str = "triggeredBy";

pub struct CrossWorkflowReactor;

impl CrossWorkflowReactor {
    /// Subscribe to prepress events and start the worker task
    ///
    /// Fails with `Configuration` outside a tokio runtime.
    pub fn start(engine: &Arc<WorkflowEngine>) -> Result<ReactorHandle> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|err| {
            JobCardError::Configuration(format!("cross-workflow reactor needs a tokio runtime: {}", err))
        })?;

        let (tx, rx) = mpsc::unbounded_channel::<WorkflowEvent>();
        let broadcaster = Arc::clone(engine.broadcaster());
        let subscription = broadcaster.subscribe(
            Topic::Supervisor(WorkflowKind::Prepress),
            Arc::new(move |event: &WorkflowEvent| {
                // receiver gone means the reactor is shutting down
                let _ = tx.send(event.clone());
            }),
        );

        let shutdown = CancellationToken::new();
        let worker = runtime.spawn(run(Arc::downgrade(engine), rx, shutdown.clone()));

        info!("Cross-workflow reactor started");

        Ok(ReactorHandle {
            broadcaster,
            subscription,
            shutdown,
            worker,
        })
    }

    /// [`start`](Self::start) unless `reactions.link_prepress_to_job` is off
    pub fn start_if_enabled(
        engine: &Arc<WorkflowEngine>,
        config: &ReactionConfig,
    ) -> Result<Option<ReactorHandle>> {
        if !config.link_prepress_to_job {
            debug!("Cross-workflow reactor disabled by configuration");
            return Ok(None);
        }
        Self::start(engine).map(Some)
    }

    /// The job lifecycle move a prepress event calls for, with the status it must start from
    pub fn reaction_for(event: &WorkflowEvent) -> Option<(Option<JobStatus>, JobStatus)> {
        if event.workflow_kind != WorkflowKind::Prepress || event.event_type != EventType::StatusChanged {
            return None;
        }

        match WorkflowStatus::parse(WorkflowKind::Prepress, &event.to_status).ok()? {
            WorkflowStatus::Prepress(PrepressStatus::Designing) => {
                Some((Some(JobStatus::AssignedToPrepress), JobStatus::PrepressInProgress))
            }
            WorkflowStatus::Prepress(PrepressStatus::PrepressCompleted) => {
                Some((None, JobStatus::PrepressCompleted))
            }
            _ => None,
        }
    }
}

/// Running reactor. Dropping the handle does not stop it; call [`shutdown`](Self::shutdown).
pub struct ReactorHandle {
    broadcaster: Arc<dyn NotificationBroadcaster>,
    subscription: SubscriptionHandle,
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
}

impl ReactorHandle {
    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }

    /// Unsubscribe and stop the worker; reactions already running finish first
    pub async fn shutdown(self) {
        self.broadcaster.unsubscribe(&self.subscription);
        self.shutdown.cancel();
        if let Err(err) = self.worker.await {
            error!(error = %err, "Cross-workflow reactor worker failed");
        }
        info!("Cross-workflow reactor stopped");
    }
}

async fn run(
    engine: Weak<WorkflowEngine>,
    mut events: mpsc::UnboundedReceiver<WorkflowEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(engine) = engine.upgrade() else {
            break;
        };
        react(&engine, &event).await;
    }
}

async fn react(engine: &WorkflowEngine, event: &WorkflowEvent) {
    let Some((required, target)) = CrossWorkflowReactor::reaction_for(event) else {
        return;
    };

    let job = match engine.find_instance(&event.job_id, WorkflowKind::JobLifecycle).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            debug!(job_id = %event.job_id, "No job lifecycle instance, reaction skipped");
            return;
        }
        Err(err) => {
            warn!(job_id = %event.job_id, error = %err, "Reaction lookup failed");
            return;
        }
    };

    let mut metadata = Metadata::new();
    metadata.insert(TRIGGERED_BY_KEY.to_string(), json!(event.instance_id.to_string()));
    metadata.insert("prepressStatus".to_string(), json!(event.to_status));

    let mut request = TransitionRequest::new(target, SYSTEM_ACTOR)
        .with_notes(format!("prepress reached {}", event.to_status))
        .with_metadata(metadata);
    if let Some(required) = required {
        request = request.expecting(required);
    }

    match engine.transition(job.id, request).await {
        Ok(outcome) => {
            info!(
                job_id = %event.job_id,
                from = %outcome.from,
                to = %outcome.to,
                "Job lifecycle followed prepress"
            );
        }
        Err(
            err @ (JobCardError::InvalidTransition { .. }
            | JobCardError::ConcurrencyConflict { .. }
            | JobCardError::NotFound { .. }),
        ) => {
            debug!(job_id = %event.job_id, %target, error = %err, "Reaction does not apply");
        }
        Err(err) => {
            warn!(job_id = %event.job_id, %target, error = %err, "Reaction failed");
        }
    }
}
