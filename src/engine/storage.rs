// Storage contract for workflow instances and their history
// The engine never mutates persisted state except through this trait

//! # Storage Abstraction Layer
//!
//! This module defines the contract a persistence backend must satisfy for the engine,
//! and an in-memory implementation used for development, tests and the CLI.
//!
//! ## Contract
//!
//! The store is the single source of truth. Two guarantees matter most:
//!
//! - **Compare-and-set**: a status write only applies if the stored status still equals the
//!   status the caller read. A mismatch returns `Ok(None)`, never an error.
//! - **Atomic history**: the `TransitionRecord` handed to `create` / `compare_and_set` is
//!   appended in the same unit as the instance write. A crash can never leave a status
//!   change without its record, or a record without its status change.
//!
//! The store assigns `TransitionRecord::sequence` on append (0 for the creation record),
//! which totally orders an instance's log.
//!
//! ## Thread Safety
//!
//! All implementations are `Send + Sync` and shared as `Arc<dyn WorkflowStore>`.
//! `InMemoryStore` keeps each instance and its log under one `DashMap` entry, so the
//! entry's shard lock makes the CAS and the append a single step.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::{
    HistoryOrder, InstanceFilter, TransitionRecord, WorkflowInstance, WorkflowKind,
    WorkflowStatus,
};
use crate::{JobCardError, Result};

/// New values written by a successful compare-and-set
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: WorkflowStatus,
    pub stage: String,
    pub updated_at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new<S: Into<String>>(status: WorkflowStatus, stage: S) -> Self {
        StatusUpdate {
            status,
            stage: stage.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Persistence contract for workflow instances and their transition log
///
/// ## Errors
/// Backend failures surface as `JobCardError::Persistence`. Implementations must not retry
/// internally: the engine treats persistence errors as fatal for the current call.
#[async_trait::async_trait]
pub trait WorkflowStore: Send + Sync {
    /// `Ok(None)` when no instance has this id
    async fn get(&self, id: Uuid) -> Result<Option<WorkflowInstance>>;

    /// Insert a new instance together with its creation record
    ///
    /// Fails with `Validation` when an instance already exists for the same
    /// `(job_id, kind)` or when the record doesn't belong to the instance.
    async fn create(
        &self,
        instance: WorkflowInstance,
        record: TransitionRecord,
    ) -> Result<WorkflowInstance>;

    /// Apply `update` and append `record` iff the stored status equals `expected`
    ///
    /// Returns the record as committed (with its `sequence`), or `Ok(None)` on a status
    /// mismatch; nothing is written in that case.
    async fn compare_and_set(
        &self,
        id: Uuid,
        expected: WorkflowStatus,
        update: StatusUpdate,
        record: TransitionRecord,
    ) -> Result<Option<TransitionRecord>>;

    /// The instance's log in the requested order
    async fn list_history(&self, id: Uuid, order: HistoryOrder) -> Result<Vec<TransitionRecord>>;

    /// Instances matching `filter`, oldest first
    async fn list(&self, filter: &InstanceFilter) -> Result<Vec<WorkflowInstance>>;
}

/// An instance and its append-only log, stored together
#[derive(Debug, Clone)]
struct StoredInstance {
    instance: WorkflowInstance,
    history: Vec<TransitionRecord>,
}

impl StoredInstance {
    fn append(&mut self, mut record: TransitionRecord) -> TransitionRecord {
        record.sequence = self.history.len() as u64;
        self.history.push(record.clone());
        record
    }
}

/// In-memory store for development and testing
///
/// ## Limitations
///
/// - **Not persistent**: data is lost when the process exits
/// - **Not distributed**: one process only
#[derive(Debug, Default)]
pub struct InMemoryStore {
    instances: DashMap<Uuid, StoredInstance>,

    /// Uniqueness index: one instance per job and kind
    by_job: DashMap<(String, WorkflowKind), Uuid>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[async_trait::async_trait]
impl WorkflowStore for InMemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<WorkflowInstance>> {
        Ok(self.instances.get(&id).map(|stored| stored.instance.clone()))
    }

    async fn create(
        &self,
        instance: WorkflowInstance,
        record: TransitionRecord,
    ) -> Result<WorkflowInstance> {
        if instance.status.kind() != instance.kind {
            return Err(JobCardError::Validation(format!(
                "status {} does not belong to workflow kind {}",
                instance.status, instance.kind
            )));
        }
        if record.instance_id != instance.id || !record.is_creation() {
            return Err(JobCardError::Validation(
                "creation record does not match the new instance".to_string(),
            ));
        }

        // Claiming the (job, kind) slot first makes duplicate creates lose atomically
        match self.by_job.entry((instance.job_id.clone(), instance.kind)) {
            Entry::Occupied(_) => {
                return Err(JobCardError::Validation(format!(
                    "job {} already has a {} workflow",
                    instance.job_id, instance.kind
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(instance.id);
            }
        }

        let mut stored = StoredInstance {
            instance: instance.clone(),
            history: Vec::new(),
        };
        stored.append(record);
        self.instances.insert(instance.id, stored);

        Ok(instance)
    }

    async fn compare_and_set(
        &self,
        id: Uuid,
        expected: WorkflowStatus,
        update: StatusUpdate,
        record: TransitionRecord,
    ) -> Result<Option<TransitionRecord>> {
        // get_mut holds the shard write lock until `stored` is dropped
        let mut stored = self
            .instances
            .get_mut(&id)
            .ok_or_else(|| JobCardError::not_found(id))?;

        if stored.instance.status != expected {
            return Ok(None);
        }
        if update.status.kind() != stored.instance.kind {
            return Err(JobCardError::Validation(format!(
                "status {} does not belong to workflow kind {}",
                update.status, stored.instance.kind
            )));
        }

        stored.instance.status = update.status;
        stored.instance.stage = update.stage;
        stored.instance.updated_at = update.updated_at;

        Ok(Some(stored.append(record)))
    }

    async fn list_history(&self, id: Uuid, order: HistoryOrder) -> Result<Vec<TransitionRecord>> {
        let stored = self
            .instances
            .get(&id)
            .ok_or_else(|| JobCardError::not_found(id))?;

        let mut history = stored.history.clone();
        if order == HistoryOrder::NewestFirst {
            history.reverse();
        }
        Ok(history)
    }

    async fn list(&self, filter: &InstanceFilter) -> Result<Vec<WorkflowInstance>> {
        let mut instances: Vec<WorkflowInstance> = self
            .instances
            .iter()
            .filter(|stored| filter.matches(&stored.instance))
            .map(|stored| stored.instance.clone())
            .collect();

        instances.sort_by_key(|instance| instance.created_at);
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStatus, Metadata, PrepressStatus, Priority};
    use tokio_test::{assert_err, assert_ok};

    fn new_job(job_id: &str) -> (WorkflowInstance, TransitionRecord) {
        let instance =
            WorkflowInstance::new(job_id, JobStatus::Created.into(), "design", Priority::Normal);
        let record = TransitionRecord::new(
            instance.id,
            None,
            instance.status,
            "u-1",
            None,
            Metadata::new(),
        );
        (instance, record)
    }

    fn step(id: Uuid, from: JobStatus, to: JobStatus) -> (StatusUpdate, TransitionRecord) {
        let to: WorkflowStatus = to.into();
        (
            StatusUpdate::new(to, "design"),
            TransitionRecord::new(id, Some(from.into()), to, "u-1", None, Metadata::new()),
        )
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = InMemoryStore::new();
        let (instance, record) = new_job("JC-1");

        let created = store.create(instance.clone(), record).await.unwrap();
        assert_eq!(created.id, instance.id);

        let fetched = store.get(instance.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Created.into());

        let history = store
            .list_history(instance.id, HistoryOrder::OldestFirst)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sequence, 0);
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_job_and_kind_is_rejected() {
        let store = InMemoryStore::new();
        let (first, first_record) = new_job("JC-1");
        let (second, second_record) = new_job("JC-1");

        assert_ok!(store.create(first, first_record).await);
        let err = assert_err!(store.create(second, second_record).await);
        assert!(matches!(err, JobCardError::Validation(_)));
        assert_eq!(store.len(), 1);

        // same job, other kind is fine
        let prepress =
            WorkflowInstance::new("JC-1", PrepressStatus::Pending.into(), "assignment", Priority::Normal);
        let record =
            TransitionRecord::new(prepress.id, None, prepress.status, "u-1", None, Metadata::new());
        assert_ok!(store.create(prepress, record).await);
    }

    #[tokio::test]
    async fn compare_and_set_applies_only_on_match() {
        let store = InMemoryStore::new();
        let (instance, record) = new_job("JC-2");
        store.create(instance.clone(), record).await.unwrap();

        let (update, record) = step(instance.id, JobStatus::Created, JobStatus::AssignedToPrepress);
        let committed = store
            .compare_and_set(instance.id, JobStatus::Created.into(), update, record)
            .await
            .unwrap()
            .expect("status matched");
        assert_eq!(committed.sequence, 1);

        // stale expectation: nothing written
        let (update, record) = step(instance.id, JobStatus::Created, JobStatus::OnHold);
        assert!(store
            .compare_and_set(instance.id, JobStatus::Created.into(), update, record)
            .await
            .unwrap()
            .is_none());

        let current = store.get(instance.id).await.unwrap().unwrap();
        assert_eq!(current.status, JobStatus::AssignedToPrepress.into());

        let history = store
            .list_history(instance.id, HistoryOrder::NewestFirst)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sequence, 1);
        assert_eq!(history[0].to_status, JobStatus::AssignedToPrepress.into());
    }

    #[tokio::test]
    async fn compare_and_set_on_missing_instance_is_not_found() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        let (update, record) = step(id, JobStatus::Created, JobStatus::OnHold);

        let err = store
            .compare_and_set(id, JobStatus::Created.into(), update, record)
            .await
            .unwrap_err();
        assert!(matches!(err, JobCardError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_applies_filter() {
        let store = InMemoryStore::new();
        for job_id in ["JC-10", "JC-11"] {
            let (instance, record) = new_job(job_id);
            store.create(instance, record).await.unwrap();
        }

        let all = store.list(&InstanceFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let one = store
            .list(&InstanceFilter::default().with_job("JC-11"))
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].job_id, "JC-11");

        let none = store
            .list(&InstanceFilter::kind(WorkflowKind::Prepress))
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
