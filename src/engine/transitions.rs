// Transition tables - the static rules of both workflow kinds

//! # Transition Tables
//!
//! A [`TransitionTable`] is the complete, static definition of one workflow kind:
//! - the initial status new instances start in
//! - for every status, the statuses it may move to
//! - which statuses are terminal
//! - the stage label and progress percentage of every status
//! - the follow-ups the scheduler fires automatically after a delay
//!
//! Tables are built once and checked with [`TransitionTable::validate`] before an engine
//! will accept them. A gap in a table is a configuration error found at startup, never a
//! runtime error caused by user input.
//!
//! [`progress_of`], [`stage_of`] and [`auto_follow_up`] answer questions about the built-in
//! tables without an engine, for dashboards and other read-only callers.

use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};

use crate::models::{JobStatus, PrepressStatus, WorkflowKind, WorkflowStatus};
use crate::{JobCardError, Result};

/// Stage label reported for a status the table doesn't know
pub const UNKNOWN_STAGE: &str = "unknown";

lazy_static! {
    static ref BUILTIN_TABLES: TransitionTables = TransitionTables::builtin();
}

/// Progress percentage of a status in the built-in tables
pub fn progress_of(status: WorkflowStatus) -> u8 {
    BUILTIN_TABLES.for_kind(status.kind()).progress_of(status)
}

/// Stage label of a status in the built-in tables
pub fn stage_of(status: WorkflowStatus) -> &'static str {
    BUILTIN_TABLES.for_kind(status.kind()).stage_of(status)
}

/// Automatic follow-up of a status in the built-in tables, if any
pub fn auto_follow_up(status: WorkflowStatus) -> Option<WorkflowStatus> {
    BUILTIN_TABLES.for_kind(status.kind()).auto_follow_up(status)
}

/// Per-status row of a table
#[derive(Debug, Clone)]
struct StatusRow {
    stage: &'static str,
    progress: u8,
    targets: Vec<WorkflowStatus>,
    terminal: bool,
}

/// Static definition of one workflow kind
#[derive(Debug, Clone)]
pub struct TransitionTable {
    kind: WorkflowKind,
    initial: WorkflowStatus,
    rows: HashMap<WorkflowStatus, StatusRow>,
    follow_ups: HashMap<WorkflowStatus, WorkflowStatus>,
}

impl TransitionTable {
    /// Start an empty table; rows are added with [`status`](Self::status) and
    /// [`terminal`](Self::terminal).
    pub fn builder<S: Into<WorkflowStatus>>(initial: S) -> Self {
        let initial = initial.into();
        TransitionTable {
            kind: initial.kind(),
            initial,
            rows: HashMap::new(),
            follow_ups: HashMap::new(),
        }
    }

    /// Declare a non-terminal status with its stage, progress and allowed targets
    pub fn status<S, T>(mut self, status: S, stage: &'static str, progress: u8, targets: &[T]) -> Self
    where
        S: Into<WorkflowStatus>,
        T: Into<WorkflowStatus> + Copy,
    {
        self.rows.insert(
            status.into(),
            StatusRow {
                stage,
                progress,
                targets: targets.iter().map(|t| (*t).into()).collect(),
                terminal: false,
            },
        );
        self
    }

    /// Declare a terminal status
    pub fn terminal<S: Into<WorkflowStatus>>(mut self, status: S, stage: &'static str, progress: u8) -> Self {
        self.rows.insert(
            status.into(),
            StatusRow {
                stage,
                progress,
                targets: Vec::new(),
                terminal: true,
            },
        );
        self
    }

    /// Declare that reaching `trigger` schedules an automatic move to `target`
    pub fn follow_up<S: Into<WorkflowStatus>>(mut self, trigger: S, target: S) -> Self {
        self.follow_ups.insert(trigger.into(), target.into());
        self
    }

    /// The job card lifecycle: design → pre-production approvals → production → completion
    ///
    /// `ON_HOLD` and `CANCELLED` report progress 0 no matter how far the job had come.
    pub fn job_lifecycle() -> Self {
        use JobStatus::*;

        TransitionTable::builder(Created)
            .status(Created, "design", 10, &[AssignedToPrepress, OnHold, Cancelled])
            .status(AssignedToPrepress, "design", 20, &[PrepressInProgress, OnHold, Cancelled])
            .status(PrepressInProgress, "design", 40, &[PrepressCompleted, OnHold, Cancelled])
            .status(PrepressCompleted, "pre_production", 60, &[HodReview, OnHold, Cancelled])
            .status(
                HodReview,
                "pre_production",
                70,
                &[ReadyForProduction, PrepressInProgress, OnHold, Cancelled],
            )
            .status(ReadyForProduction, "production", 80, &[InProduction, OnHold, Cancelled])
            .status(InProduction, "production", 90, &[Completed, OnHold, Cancelled])
            .status(
                OnHold,
                "on_hold",
                0,
                &[
                    Created,
                    AssignedToPrepress,
                    PrepressInProgress,
                    ReadyForProduction,
                    InProduction,
                    Cancelled,
                ],
            )
            .terminal(Completed, "completion", 100)
            .terminal(Cancelled, "cancelled", 0)
    }

    /// The prepress sub-workflow. Completing design, die making or plate making
    /// auto-progresses to the next step; a rejection at review sends the job back.
    pub fn prepress() -> Self {
        use PrepressStatus::*;

        TransitionTable::builder(Pending)
            .status(Pending, "assignment", 0, &[Assigned, Paused])
            .status(Assigned, "assignment", 10, &[Designing, InProgress, Paused])
            .status(InProgress, "design", 20, &[Designing, HodReview, Paused])
            .status(Designing, "design", 30, &[DesigningCompleted, Paused])
            .status(DesigningCompleted, "design", 40, &[DieMaking, HodReview, Paused])
            .status(DieMaking, "die_making", 50, &[DieMakingCompleted, Paused])
            .status(DieMakingCompleted, "die_making", 60, &[PlateMaking, Paused])
            .status(PlateMaking, "plate_making", 70, &[PlateMakingCompleted, Paused])
            .status(PlateMakingCompleted, "plate_making", 80, &[PrepressCompleted, Paused])
            .status(PrepressCompleted, "review", 90, &[HodReview, Completed])
            .status(HodReview, "review", 95, &[Completed, Rejected])
            .status(Rejected, "assignment", 10, &[Assigned, Designing])
            .status(
                Paused,
                "paused",
                0,
                &[Assigned, InProgress, Designing, DieMaking, PlateMaking],
            )
            .terminal(Completed, "completion", 100)
            .follow_up(DesigningCompleted, DieMaking)
            .follow_up(DieMakingCompleted, PlateMaking)
            .follow_up(PlateMakingCompleted, PrepressCompleted)
    }

    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    pub fn initial(&self) -> WorkflowStatus {
        self.initial
    }

    pub fn is_allowed(&self, from: WorkflowStatus, to: WorkflowStatus) -> bool {
        self.rows
            .get(&from)
            .map_or(false, |row| row.targets.contains(&to))
    }

    /// Statuses reachable in one step, in declaration order
    pub fn allowed_targets(&self, from: WorkflowStatus) -> &[WorkflowStatus] {
        self.rows
            .get(&from)
            .map_or(&[], |row| row.targets.as_slice())
    }

    pub fn is_terminal(&self, status: WorkflowStatus) -> bool {
        self.rows.get(&status).map_or(false, |row| row.terminal)
    }

    pub fn stage_of(&self, status: WorkflowStatus) -> &'static str {
        self.rows.get(&status).map_or(UNKNOWN_STAGE, |row| row.stage)
    }

    pub fn progress_of(&self, status: WorkflowStatus) -> u8 {
        self.rows.get(&status).map_or(0, |row| row.progress)
    }

    pub fn auto_follow_up(&self, status: WorkflowStatus) -> Option<WorkflowStatus> {
        self.follow_ups.get(&status).copied()
    }

    /// Check that the table is total over its kind's status set and internally consistent
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind;
        let declared: HashSet<WorkflowStatus> = kind.statuses().into_iter().collect();
        let fail = |msg: String| Err(JobCardError::Configuration(format!("{} table: {}", kind, msg)));

        for status in kind.statuses() {
            if !self.rows.contains_key(&status) {
                return fail(format!("status {} has no row", status));
            }
        }

        for (status, row) in &self.rows {
            if !declared.contains(status) {
                return fail(format!("row for foreign status {}", status));
            }
            if row.progress > 100 {
                return fail(format!("progress of {} is {}", status, row.progress));
            }
            if row.terminal && !row.targets.is_empty() {
                return fail(format!("terminal status {} has outgoing transitions", status));
            }
            if !row.terminal && row.targets.is_empty() {
                return fail(format!("non-terminal status {} is a dead end", status));
            }
            for target in &row.targets {
                if !declared.contains(target) {
                    return fail(format!("{} -> {} leaves the status set", status, target));
                }
                if target == status {
                    return fail(format!("{} has a self-transition", status));
                }
            }
        }

        if self.is_terminal(self.initial) {
            return fail(format!("initial status {} is terminal", self.initial));
        }

        for (trigger, target) in &self.follow_ups {
            if !self.is_allowed(*trigger, *target) {
                return fail(format!(
                    "follow-up {} -> {} is not an allowed transition",
                    trigger, target
                ));
            }
        }

        Ok(())
    }
}

/// Both tables, one per workflow kind
#[derive(Debug, Clone)]
pub struct TransitionTables {
    job_lifecycle: TransitionTable,
    prepress: TransitionTable,
}

impl TransitionTables {
    /// The built-in tables, validated
    pub fn standard() -> Result<Self> {
        Self::new(TransitionTable::job_lifecycle(), TransitionTable::prepress())
    }

    /// Custom tables; each must validate and belong to the right kind
    pub fn new(job_lifecycle: TransitionTable, prepress: TransitionTable) -> Result<Self> {
        if job_lifecycle.kind() != WorkflowKind::JobLifecycle || prepress.kind() != WorkflowKind::Prepress {
            return Err(JobCardError::Configuration(
                "transition tables supplied for the wrong workflow kinds".to_string(),
            ));
        }
        job_lifecycle.validate()?;
        prepress.validate()?;

        Ok(Self {
            job_lifecycle,
            prepress,
        })
    }

    fn builtin() -> Self {
        Self {
            job_lifecycle: TransitionTable::job_lifecycle(),
            prepress: TransitionTable::prepress(),
        }
    }

    pub fn for_kind(&self, kind: WorkflowKind) -> &TransitionTable {
        match kind {
            WorkflowKind::JobLifecycle => &self.job_lifecycle,
            WorkflowKind::Prepress => &self.prepress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(status: JobStatus) -> WorkflowStatus {
        status.into()
    }

    fn prepress(status: PrepressStatus) -> WorkflowStatus {
        status.into()
    }

    #[test]
    fn builtin_tables_validate() {
        assert!(TransitionTables::standard().is_ok());
    }

    #[test]
    fn happy_path_progress_is_monotonic() {
        use JobStatus::*;

        let table = TransitionTable::job_lifecycle();
        let path = [
            Created,
            AssignedToPrepress,
            PrepressInProgress,
            PrepressCompleted,
            HodReview,
            ReadyForProduction,
            InProduction,
            Completed,
        ];

        let progress: Vec<u8> = path.iter().map(|s| table.progress_of(job(*s))).collect();
        assert_eq!(progress, vec![10, 20, 40, 60, 70, 80, 90, 100]);

        for pair in path.windows(2) {
            assert!(
                table.is_allowed(job(pair[0]), job(pair[1])),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn hold_and_cancel_reset_progress() {
        let table = TransitionTable::job_lifecycle();

        for status in JobStatus::ALL {
            let status = job(*status);
            if table.is_terminal(status) || status == job(JobStatus::OnHold) {
                continue;
            }
            assert!(table.is_allowed(status, job(JobStatus::OnHold)), "{} -> ON_HOLD", status);
            assert!(table.is_allowed(status, job(JobStatus::Cancelled)), "{} -> CANCELLED", status);
        }

        assert_eq!(progress_of(job(JobStatus::OnHold)), 0);
        assert_eq!(progress_of(job(JobStatus::Cancelled)), 0);
    }

    #[test]
    fn terminal_statuses_stop_everything() {
        let table = TransitionTable::job_lifecycle();

        for terminal in [JobStatus::Completed, JobStatus::Cancelled] {
            assert!(table.is_terminal(job(terminal)));
            assert!(table.allowed_targets(job(terminal)).is_empty());
        }
        assert!(!table.is_allowed(job(JobStatus::Completed), job(JobStatus::OnHold)));
    }

    #[test]
    fn rejected_prepress_retries() {
        let table = TransitionTable::prepress();

        assert!(table.is_allowed(prepress(PrepressStatus::Rejected), prepress(PrepressStatus::Assigned)));
        assert!(table.is_allowed(prepress(PrepressStatus::Rejected), prepress(PrepressStatus::Designing)));
        assert!(!table.is_allowed(prepress(PrepressStatus::Rejected), prepress(PrepressStatus::Completed)));
    }

    #[test]
    fn follow_ups_chain_the_production_steps() {
        assert_eq!(
            auto_follow_up(prepress(PrepressStatus::DesigningCompleted)),
            Some(prepress(PrepressStatus::DieMaking))
        );
        assert_eq!(
            auto_follow_up(prepress(PrepressStatus::DieMakingCompleted)),
            Some(prepress(PrepressStatus::PlateMaking))
        );
        assert_eq!(
            auto_follow_up(prepress(PrepressStatus::PlateMakingCompleted)),
            Some(prepress(PrepressStatus::PrepressCompleted))
        );
        assert_eq!(auto_follow_up(prepress(PrepressStatus::DieMaking)), None);
        assert_eq!(auto_follow_up(job(JobStatus::PrepressCompleted)), None);
    }

    #[test]
    fn stages_follow_the_production_phases() {
        assert_eq!(stage_of(job(JobStatus::Created)), "design");
        assert_eq!(stage_of(job(JobStatus::HodReview)), "pre_production");
        assert_eq!(stage_of(job(JobStatus::InProduction)), "production");
        assert_eq!(stage_of(job(JobStatus::Completed)), "completion");
        assert_eq!(stage_of(prepress(PrepressStatus::PlateMaking)), "plate_making");
    }

    #[test]
    fn missing_row_is_a_configuration_error() {
        use JobStatus::*;

        // no rows for most statuses
        let table = TransitionTable::builder(Created).status(Created, "design", 10, &[Cancelled]);
        let err = table.validate().unwrap_err();
        assert!(matches!(err, JobCardError::Configuration(_)));
        assert_eq!(table.stage_of(job(InProduction)), UNKNOWN_STAGE);
    }

    #[test]
    fn follow_up_must_be_an_allowed_move() {
        let table = TransitionTable::prepress()
            .follow_up(PrepressStatus::Pending, PrepressStatus::Completed);

        assert!(matches!(table.validate(), Err(JobCardError::Configuration(_))));
    }

    #[test]
    fn dead_end_is_rejected() {
        let no_targets: &[JobStatus] = &[];
        let table = TransitionTable::job_lifecycle().status(
            JobStatus::InProduction,
            "production",
            90,
            no_targets,
        );

        assert!(table.validate().is_err());
    }

    #[test]
    fn tables_must_match_their_kind() {
        let result = TransitionTables::new(TransitionTable::prepress(), TransitionTable::prepress());
        assert!(matches!(result, Err(JobCardError::Configuration(_))));
    }
}
