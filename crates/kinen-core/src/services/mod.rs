//! Async services shared by UI hosts and the sync engine

mod store;

pub use store::{LocalStore, QueueCursor, LAST_SYNC_AT_KEY};
