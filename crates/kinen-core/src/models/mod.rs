//! Data models for kinen

mod conflict;
mod mutation;
mod record;
mod sync_log;

pub use conflict::{
    Conflict, ConflictStatus, FieldConflict, ManualChoice, ResolutionRule, ResolutionStrategy,
    ResolvedBy,
};
pub use mutation::{
    MutationAction, MutationId, MutationPayload, NewMutation, PendingMutation, PRIORITY_HIGH,
    PRIORITY_NORMAL,
};
pub use record::{Record, RecordId};
pub use sync_log::{SyncLogEntry, SyncOutcome};
