pub mod add;
pub mod common;
pub mod completions;
pub mod conflicts;
pub mod delete;
pub mod list;
pub mod set;
pub mod show;
pub mod sync;
