//! Refinery - Merge queue processor for rig work branches
//!
//! A refinery owns serialized integration of concurrently-produced worker
//! branches into a rig's integration branch. Workers push branches named
//! `<prefix>/<worker>[/<issue>]`; the refinery discovers them, queues them,
//! and works the queue one merge request at a time.
//!
//! # Architecture
//!
//! - **rig**: Workspace configuration (path, remote, branch conventions)
//! - **state**: Persisted data model (Refinery record, MergeRequest, stats)
//! - **store**: State file persistence with an advisory cross-process lock
//! - **process**: Process liveness probing for stale-record detection
//! - **discovery**: Remote work-branch discovery and parsing
//! - **queue**: Merge queue composition for display
//! - **manager**: Lifecycle state machine and the processing loop
//! - **style**: Terminal colors and age formatting

// Core modules
pub mod discovery;
pub mod error;
pub mod manager;
pub mod process;
pub mod queue;
pub mod rig;
pub mod state;
pub mod store;

// Supporting modules
pub mod logging;
pub mod style;

// Re-exports
pub use error::{RefineryError, Result};
pub use manager::{CommandDriver, Manager, MergeDriver, MergeOutcome, NoopDriver};
pub use rig::Rig;
pub use state::{MergeRequest, MrStatus, QueueItem, Refinery, RefineryState, RefineryStats};
pub use store::StateStore;
