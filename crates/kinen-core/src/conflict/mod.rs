//! Conflict detection and resolution
//!
//! Detection compares a queued local record with the remote authority's copy
//! field by field. The resolver applies the persisted [`ResolverConfig`] and
//! records every conflict it sees in the local store.

mod detect;
mod policy;
mod resolver;

pub use detect::{auto_resolve, detect};
pub use policy::{merge_text, MergeBehavior, ResolverConfig, MERGE_SEPARATOR, RESOLVER_CONFIG_KEY};
pub use resolver::{ConflictResolver, Resolution};
