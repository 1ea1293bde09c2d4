// Delayed, cancellable follow-up transitions

//! # Auto-Progression Scheduler
//!
//! Some statuses are only a waypoint: once design is complete the job should move on to die
//! making without anyone clicking a button. The transition table names these follow-ups; the
//! scheduler fires them after a configurable delay.
//!
//! ## Lifecycle of a follow-up
//!
//! 1. The engine commits a transition into a status that has a follow-up and calls
//!    [`AutoProgressionScheduler::schedule`].
//! 2. A tokio task sleeps for the delay, racing a cancellation token.
//! 3. On wake-up it re-reads the instance. If the status moved on in the meantime the timer is
//!    stale and nothing happens.
//! 4. Otherwise it requests the follow-up through the engine as actor `"system"`, pinned to the
//!    triggering status. A lost race there is also treated as stale.
//!
//! Any later transition of the same instance cancels its pending follow-ups, so step 3 is a
//! second line rather than the only one. Nothing here survives a restart; a follow-up lost to
//! a crash leaves the instance in the triggering status for a human to advance.

use dashmap::DashMap;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::workflow::{TransitionRequest, WorkflowEngine};
use crate::config::AutoProgressionConfig;
use crate::models::{Metadata, WorkflowStatus, SYSTEM_ACTOR};
use crate::JobCardError;

/// Notes recorded on every automatic transition
pub const AUTO_PROGRESS_NOTES: &str = "auto-progressed";

/// Metadata key carrying the status that triggered the follow-up
pub const FROM_STATUS_KEY: &str = "fromStatus";

#[derive(Debug)]
struct PendingFollowUp {
    generation: u64,
    target: WorkflowStatus,
    token: CancellationToken,
}

/// Owns every pending follow-up of one engine
pub struct AutoProgressionScheduler {
    engine: Weak<WorkflowEngine>,
    enabled: bool,
    delay: Duration,
    pending: DashMap<(Uuid, WorkflowStatus), PendingFollowUp>,
    generation: AtomicU64,
    root: CancellationToken,
}

impl AutoProgressionScheduler {
    pub(crate) fn new(engine: Weak<WorkflowEngine>, config: &AutoProgressionConfig) -> Self {
        Self {
            engine,
            enabled: config.enabled,
            delay: config.delay(),
            pending: DashMap::new(),
            generation: AtomicU64::new(0),
            root: CancellationToken::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Fire `target` for `instance_id` after the delay, unless cancelled or stale by then
    ///
    /// Must be called from within a tokio runtime; otherwise the follow-up is dropped with a
    /// warning.
    pub fn schedule(&self, instance_id: Uuid, trigger: WorkflowStatus, target: WorkflowStatus) {
        if !self.enabled || self.root.is_cancelled() {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(%instance_id, %trigger, %target, "No tokio runtime, dropping follow-up");
                return;
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = self.root.child_token();

        let previous = self.pending.insert(
            (instance_id, trigger),
            PendingFollowUp {
                generation,
                target,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        debug!(%instance_id, %trigger, %target, delay_ms = self.delay.as_millis() as u64, "Follow-up scheduled");

        let engine = self.engine.clone();
        let delay = self.delay;

        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(%instance_id, %trigger, "Follow-up cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let Some(engine) = engine.upgrade() else {
                return;
            };

            engine
                .scheduler()
                .pending
                .remove_if(&(instance_id, trigger), |_, pending| pending.generation == generation);

            fire(&engine, instance_id, trigger, target).await;
        });
    }

    /// Cancel every pending follow-up of `instance_id`; returns how many were cancelled
    pub fn cancel_pending(&self, instance_id: Uuid) -> usize {
        let mut cancelled = 0;
        self.pending.retain(|(id, _), pending| {
            if *id != instance_id {
                return true;
            }
            pending.token.cancel();
            cancelled += 1;
            false
        });
        cancelled
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, instance_id: Uuid, trigger: WorkflowStatus) -> bool {
        self.pending.contains_key(&(instance_id, trigger))
    }

    /// Target of the pending follow-up for `(instance_id, trigger)`, if any
    pub fn pending_target(&self, instance_id: Uuid, trigger: WorkflowStatus) -> Option<WorkflowStatus> {
        self.pending
            .get(&(instance_id, trigger))
            .map(|pending| pending.target)
    }

    /// Cancel everything and refuse new follow-ups
    pub fn shutdown(&self) {
        self.root.cancel();
        let dropped = self.pending.len();
        self.pending.clear();
        info!(dropped, "Auto-progression scheduler stopped");
    }
}

async fn fire(
    engine: &WorkflowEngine,
    instance_id: Uuid,
    trigger: WorkflowStatus,
    target: WorkflowStatus,
) {
    // Stale-timer guard: the instance must still be where we left it
    match engine.get_instance(instance_id).await {
        Ok(instance) if instance.status == trigger => {}
        Ok(instance) => {
            debug!(%instance_id, %trigger, current = %instance.status, "Stale follow-up skipped");
            return;
        }
        Err(JobCardError::NotFound { .. }) => {
            debug!(%instance_id, "Follow-up for missing instance skipped");
            return;
        }
        Err(err) => {
            error!(%instance_id, %trigger, error = %err, "Follow-up could not read instance");
            return;
        }
    }

    let mut metadata = Metadata::new();
    metadata.insert(FROM_STATUS_KEY.to_string(), json!(trigger.as_str()));

    let request = TransitionRequest::new(target, SYSTEM_ACTOR)
        .with_notes(AUTO_PROGRESS_NOTES)
        .with_metadata(metadata)
        .expecting(trigger);

    match engine.transition(instance_id, request).await {
        Ok(outcome) => {
            info!(%instance_id, from = %outcome.from, to = %outcome.to, "Auto-progressed");
        }
        Err(
            err @ (JobCardError::ConcurrencyConflict { .. }
            | JobCardError::InvalidTransition { .. }
            | JobCardError::NotFound { .. }),
        ) => {
            debug!(%instance_id, %trigger, %target, error = %err, "Stale follow-up skipped");
        }
        Err(err) => {
            error!(%instance_id, %trigger, %target, error = %err, "Auto-progression failed");
        }
    }
}
