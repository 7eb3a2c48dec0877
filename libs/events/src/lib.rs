//! C4 — per-task ordered event delivery: every event is stamped with a
//! strictly monotonic [`zypher_types::TaskEventId`], retained for the
//! task's lifetime, and broadcast live with synthetic heartbeats filling
//! quiet periods.

mod bus;
mod resume;

pub use bus::{EventSubscription, TaskEventBus};
pub use resume::resume_filter;
