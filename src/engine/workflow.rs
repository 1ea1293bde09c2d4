// Workflow engine - validated, serialised status transitions

//! # Workflow Engine
//!
//! The engine is the only writer of workflow state. Every change goes through the same path:
//!
//! ```text
//! lock(instance) ─► read ─► validate against table ─► CAS status + append record
//!                                                        │
//!                  publish event ◄─ schedule follow-up ◄─┘
//! ```
//!
//! ## Concurrency
//!
//! Calls for the same instance are serialised by an async mutex held from the read until the
//! event is published, so one instance's events go out in commit order. The store write is
//! still a compare-and-set: another process sharing the store can win the race, in which case
//! the engine re-reads and re-validates with jittered backoff, up to
//! `concurrency.max_retries` times, before giving up with `ConcurrencyConflict`.
//!
//! ## Notifications
//!
//! Publishing happens after the commit and can't fail the call. Broadcaster errors are
//! logged at `warn` and dropped.

use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::NotificationBroadcaster;
use super::materials::MaterialCoverageAnalyzer;
use super::scheduler::AutoProgressionScheduler;
use super::storage::{StatusUpdate, WorkflowStore};
use super::topics::TopicRouter;
use super::transitions::{TransitionTable, TransitionTables};
use crate::config::{ConcurrencyConfig, WorkflowConfig};
use crate::models::{
    HistoryOrder, InstanceFilter, MaterialAvailability, MaterialCoverageResult,
    MaterialRequirement, Metadata, Priority, TransitionRecord, WorkflowEvent, WorkflowInstance,
    WorkflowKind, WorkflowStatus,
};
use crate::{JobCardError, Result};

/// Input for [`WorkflowEngine::create_instance`]
#[derive(Debug, Clone, PartialEq)]
pub struct CreateInstance {
    pub job_id: String,
    pub priority: Priority,
    pub actor: String,
    pub notes: Option<String>,
    pub metadata: Metadata,
}

impl CreateInstance {
    pub fn new<J: Into<String>, A: Into<String>>(job_id: J, actor: A) -> Self {
        Self {
            job_id: job_id.into(),
            priority: Priority::default(),
            actor: actor.into(),
            notes: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_notes<S: Into<String>>(mut self, notes: S) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Input for [`WorkflowEngine::transition`]
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    pub to: WorkflowStatus,
    pub actor: String,
    pub notes: Option<String>,
    pub metadata: Metadata,
    /// When set, the call fails with `ConcurrencyConflict` unless the instance is still here
    pub expected_status: Option<WorkflowStatus>,
}

impl TransitionRequest {
    pub fn new<S: Into<WorkflowStatus>, A: Into<String>>(to: S, actor: A) -> Self {
        Self {
            to: to.into(),
            actor: actor.into(),
            notes: None,
            metadata: Metadata::new(),
            expected_status: None,
        }
    }

    pub fn with_notes<S: Into<String>>(mut self, notes: S) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Pin the status the caller observed
    pub fn expecting<S: Into<WorkflowStatus>>(mut self, status: S) -> Self {
        self.expected_status = Some(status.into());
        self
    }
}

/// Result of a committed transition
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    /// The instance after the commit
    pub instance: WorkflowInstance,
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    /// The history entry as stored, with its `sequence`
    pub record: TransitionRecord,
}

pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    broadcaster: Arc<dyn NotificationBroadcaster>,
    tables: TransitionTables,
    router: TopicRouter,
    scheduler: AutoProgressionScheduler,
    analyzer: MaterialCoverageAnalyzer,
    concurrency: ConcurrencyConfig,

    /// In-flight serialisation, one async mutex per instance being transitioned
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl WorkflowEngine {
    /// Engine over the built-in transition tables
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        broadcaster: Arc<dyn NotificationBroadcaster>,
        config: &WorkflowConfig,
    ) -> Result<Arc<Self>> {
        Self::with_tables(store, broadcaster, TransitionTables::standard()?, config)
    }

    /// Engine over custom tables (already validated by [`TransitionTables::new`])
    pub fn with_tables(
        store: Arc<dyn WorkflowStore>,
        broadcaster: Arc<dyn NotificationBroadcaster>,
        tables: TransitionTables,
        config: &WorkflowConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        info!(
            auto_progression = config.auto_progression.enabled,
            delay_ms = config.auto_progression.delay_ms,
            max_retries = config.concurrency.max_retries,
            "Workflow engine starting"
        );

        Ok(Arc::new_cyclic(|engine| WorkflowEngine {
            store,
            broadcaster,
            tables,
            router: TopicRouter::new(&config.notifications),
            scheduler: AutoProgressionScheduler::new(engine.clone(), &config.auto_progression),
            analyzer: MaterialCoverageAnalyzer::new(config.materials.coverage_threshold),
            concurrency: config.concurrency.clone(),
            locks: DashMap::new(),
        }))
    }

    pub fn tables(&self) -> &TransitionTables {
        &self.tables
    }

    pub fn table(&self, kind: WorkflowKind) -> &TransitionTable {
        self.tables.for_kind(kind)
    }

    pub fn broadcaster(&self) -> &Arc<dyn NotificationBroadcaster> {
        &self.broadcaster
    }

    pub fn scheduler(&self) -> &AutoProgressionScheduler {
        &self.scheduler
    }

    /// Start a new instance of `kind` for a job in the kind's initial status
    pub async fn create_instance(
        &self,
        kind: WorkflowKind,
        request: CreateInstance,
    ) -> Result<WorkflowInstance> {
        require_non_empty("job id", &request.job_id)?;
        require_non_empty("actor", &request.actor)?;

        let table = self.tables.for_kind(kind);
        let initial = table.initial();
        let instance = WorkflowInstance::new(
            request.job_id,
            initial,
            table.stage_of(initial),
            request.priority,
        );
        let record = TransitionRecord::new(
            instance.id,
            None,
            initial,
            request.actor,
            request.notes,
            request.metadata,
        );

        let instance = self.store.create(instance, record.clone()).await?;

        info!(
            instance_id = %instance.id,
            job_id = %instance.job_id,
            kind = %kind,
            status = %instance.status,
            "Workflow instance created"
        );

        self.after_commit(&instance, &record);
        Ok(instance)
    }

    /// Move an instance to `request.to`
    ///
    /// ## Errors
    /// - `NotFound` when the instance doesn't exist
    /// - `Validation` for an empty actor or a status of the other kind
    /// - `InvalidTransition` when the table doesn't allow the move from the current status
    /// - `ConcurrencyConflict` when `expected_status` no longer holds, or another writer kept
    ///   winning the compare-and-set
    ///
    /// Nothing is written on error.
    pub async fn transition(&self, id: Uuid, request: TransitionRequest) -> Result<TransitionOutcome> {
        require_non_empty("actor", &request.actor)?;

        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.transition_locked(id, request).await
        };
        drop(lock);
        self.release_lock(id);

        result
    }

    async fn transition_locked(&self, id: Uuid, request: TransitionRequest) -> Result<TransitionOutcome> {
        let attempts_allowed = self.concurrency.max_retries + 1;
        let mut first_seen: Option<WorkflowStatus> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let current = self
                .store
                .get(id)
                .await?
                .ok_or_else(|| JobCardError::not_found(id))?;
            let from = current.status;
            let seen = *first_seen.get_or_insert(from);

            if request.to.kind() != current.kind {
                return Err(JobCardError::Validation(format!(
                    "status {} does not belong to workflow kind {}",
                    request.to, current.kind
                )));
            }

            if let Some(expected) = request.expected_status {
                if expected != from {
                    return Err(JobCardError::ConcurrencyConflict {
                        instance_id: id,
                        expected,
                        actual: from,
                        attempts: attempt,
                    });
                }
            }

            let table = self.tables.for_kind(current.kind);
            if !table.is_allowed(from, request.to) {
                // The move was valid when we first looked; someone else changed the instance
                if attempt > 1 {
                    return Err(JobCardError::ConcurrencyConflict {
                        instance_id: id,
                        expected: seen,
                        actual: from,
                        attempts: attempt,
                    });
                }
                debug!(instance_id = %id, %from, to = %request.to, "Transition rejected");
                return Err(JobCardError::InvalidTransition {
                    kind: current.kind,
                    from,
                    to: request.to,
                });
            }

            let stage = table.stage_of(request.to);
            let update = StatusUpdate::new(request.to, stage);
            let record = TransitionRecord::new(
                id,
                Some(from),
                request.to,
                request.actor.clone(),
                request.notes.clone(),
                request.metadata.clone(),
            );

            if let Some(record) = self.store.compare_and_set(id, from, update.clone(), record).await? {
                let instance = WorkflowInstance {
                    status: update.status,
                    stage: update.stage,
                    updated_at: update.updated_at,
                    ..current
                };

                info!(
                    instance_id = %id,
                    job_id = %instance.job_id,
                    kind = %instance.kind,
                    %from,
                    to = %instance.status,
                    actor = %record.actor,
                    sequence = record.sequence,
                    "Workflow transitioned"
                );

                self.after_commit(&instance, &record);

                return Ok(TransitionOutcome {
                    from,
                    to: instance.status,
                    instance,
                    record,
                });
            }

            if attempt >= attempts_allowed {
                let actual = self
                    .store
                    .get(id)
                    .await?
                    .map_or(from, |instance| instance.status);
                warn!(instance_id = %id, attempts = attempt, "Giving up after repeated write conflicts");
                return Err(JobCardError::ConcurrencyConflict {
                    instance_id: id,
                    expected: from,
                    actual,
                    attempts: attempt,
                });
            }

            let backoff = self.backoff(attempt);
            warn!(instance_id = %id, attempt, backoff_ms = backoff.as_millis() as u64, "Write conflict, retrying");
            tokio::time::sleep(backoff).await;
        }
    }

    /// Schedule the follow-up (if any) and publish; runs once per commit
    fn after_commit(&self, instance: &WorkflowInstance, record: &TransitionRecord) {
        if !record.is_creation() {
            self.scheduler.cancel_pending(instance.id);
        }
        if let Some(target) = self.table(instance.kind).auto_follow_up(instance.status) {
            self.scheduler.schedule(instance.id, instance.status, target);
        }

        let event = WorkflowEvent::from_record(instance, record);
        let topics = self.router.topics_for(&event);

        match self.broadcaster.publish(&topics, &event) {
            Ok(delivered) => {
                debug!(instance_id = %instance.id, topics = topics.len(), delivered, "Event published");
            }
            Err(err) => {
                warn!(instance_id = %instance.id, error = %err, "Event publish failed");
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.concurrency.backoff_base_ms.saturating_mul(u64::from(attempt));
        let jitter = if self.concurrency.backoff_jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.concurrency.backoff_jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }

    fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_lock(&self, id: Uuid) {
        // Only the map itself still holds it: nobody is waiting
        self.locks.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub async fn get_instance(&self, id: Uuid) -> Result<WorkflowInstance> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| JobCardError::not_found(id))
    }

    /// The instance's audit trail; newest first unless asked otherwise
    pub async fn get_history(&self, id: Uuid, order: HistoryOrder) -> Result<Vec<TransitionRecord>> {
        self.store.list_history(id, order).await
    }

    pub async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<WorkflowInstance>> {
        self.store.list(filter).await
    }

    /// The instance of `kind` for a job, if one was created
    pub async fn find_instance(&self, job_id: &str, kind: WorkflowKind) -> Result<Option<WorkflowInstance>> {
        let filter = InstanceFilter::kind(kind).with_job(job_id);
        Ok(self.store.list(&filter).await?.into_iter().next())
    }

    /// Progress percentage of a status under this engine's tables
    pub fn progress_of(&self, status: WorkflowStatus) -> u8 {
        self.table(status.kind()).progress_of(status)
    }

    pub fn analyze_materials(
        &self,
        requirements: &[MaterialRequirement],
        availability: &[MaterialAvailability],
    ) -> Result<MaterialCoverageResult> {
        self.analyzer.analyze(requirements, availability)
    }

    /// Cancel pending follow-ups; committed state is untouched
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

fn require_non_empty(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(JobCardError::Validation(format!("{} must not be empty", what)));
    }
    Ok(())
}
