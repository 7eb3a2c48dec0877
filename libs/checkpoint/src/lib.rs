//! C6 — content-addressed workspace snapshots, isolated from any VCS the
//! user already has open on the same tree: every checkpoint is a commit in
//! a private git metadata directory pointed at the real work tree.

mod error;
mod store;

pub use error::CheckpointError;
pub use store::CheckpointStore;
