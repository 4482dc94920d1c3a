//! kinen-core - Offline-first sync engine for kinen
//!
//! This crate contains the durable local store, the pending-mutation queue,
//! conflict detection and resolution, and the sync orchestrator used by the
//! CLI and any UI host.

pub mod config;
pub mod conflict;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod sync;
pub mod util;

pub use config::EngineConfig;
pub use conflict::{ConflictResolver, Resolution, ResolverConfig};
pub use error::{Error, Result};
pub use models::{Conflict, MutationAction, NewMutation, PendingMutation, Record, RecordId};
pub use remote::{HttpRemote, InMemoryRemote, RemoteAuthority, RemoteError};
pub use services::LocalStore;
pub use sync::{SignalState, SyncEvent, SyncOrchestrator, SyncReport, SyncTriggers};
