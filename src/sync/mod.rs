//! Bidirectional board <-> tracker reconciliation
//!
//! - **mapping**: column <-> label vocabulary
//! - **diff**: pairs cards with issues and proposes operations
//! - **conflict**: classifies and settles both-sides divergences
//! - **executor**: applies operations against the tracker and the board
//! - **status**: per-engine status store
//! - **decisions**: conflicts and decisions kept between runs
//! - **engine**: the [`SyncEngine`] facade tying the above together
//! - **scheduler**: interval-driven passes

pub mod conflict;
pub mod decisions;
pub mod diff;
pub mod engine;
pub mod executor;
pub mod mapping;
pub mod metrics;
pub mod operation;
pub mod scheduler;
pub mod status;

pub use conflict::{
    ConflictKind, ConflictResolution, FieldValue, ResolutionStrategy, ResolvedBy, SyncConflict,
};
pub use decisions::ConflictFile;
pub use diff::{DiffEngine, DiffOutcome};
pub use engine::{EngineOptions, PassReport, SyncEngine, SyncResult};
pub use executor::{ExecutionReport, PassOutcome};
pub use mapping::{ColumnMatch, MappingResolver};
pub use operation::{OperationKind, OperationPayload, OperationStatus, SyncOperation};
pub use scheduler::{AutoSync, BoardSource, FileBoardSource, SchedulerCommand, SchedulerEvent};
pub use status::{SyncError, SyncErrorKind, SyncPhase, SyncStats, SyncStatus};
