// JobCard workflow engine
// Tables, persistence contract, transitions, follow-ups and notifications

//! # Engine Module
//!
//! Everything that moves a workflow instance lives here. The models in `models/` are plain
//! data; this module decides which changes are legal, persists them and tells observers.
//!
//! ## Engine Components
//!
//! ### Transition Tables (`transitions` module)
//! - Allowed moves, terminal statuses, stage and progress per status
//! - Follow-up statuses the scheduler fires on its own
//! - Validated once at startup
//!
//! ### Storage (`storage` module)
//! - `WorkflowStore` contract: compare-and-set status writes, atomic history append
//! - `InMemoryStore` for development, tests and the CLI
//!
//! ### Workflow Engine (`workflow` module)
//! - Creates instances and performs validated, serialised transitions
//! - Runs the scheduler and the broadcaster after each commit
//!
//! ### Auto-Progression (`scheduler` module)
//! - Delayed follow-up transitions with explicit cancellation and a stale-timer guard
//!
//! ### Notifications (`events` and `topics` modules)
//! - `NotificationBroadcaster` trait and the in-process `TopicBroadcaster`
//! - `TopicRouter` decides who hears about an event
//!
//! ### Cross-Workflow Reactions (`reactions` module)
//! - Prepress milestones drive the job lifecycle through an ordinary subscription
//!
//! ### Material Coverage (`materials` module)
//! - Pure stock-vs-requirement analysis used at acceptance

pub mod events;
pub mod materials;
pub mod reactions;
pub mod scheduler;
pub mod storage;
pub mod topics;
pub mod transitions;
pub mod workflow;


pub use events::{EventHandler, NotificationBroadcaster, NotificationError, SubscriptionHandle, TopicBroadcaster};
pub use materials::MaterialCoverageAnalyzer;
pub use reactions::{CrossWorkflowReactor, ReactorHandle};
pub use scheduler::AutoProgressionScheduler;
pub use storage::{InMemoryStore, StatusUpdate, WorkflowStore};
pub use topics::TopicRouter;
pub use transitions::{TransitionTable, TransitionTables};
pub use workflow::{CreateInstance, TransitionOutcome, TransitionRequest, WorkflowEngine};
