//! Conflict resolution
//!
//! - `ConflictResolver`: delivers brute force aborts to local victims
//! - `rollbacker`: background rollback of idle streaming victims
//! - `reaper`: aborts streaming transactions left idle too long
//!
//! A BF-abort only flips the victim's conflict state and wakes it. The
//! victim observes the new state at its next suspension point and
//! unwinds itself, except for idle streaming victims which the
//! rollbacker thread finishes on their behalf.

mod resolver;
pub mod reaper;
pub mod rollbacker;

pub use resolver::{ConflictResolver, LockConflict};
pub use rollbacker::RollbackQueue;
