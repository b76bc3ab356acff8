//! Scheduler layer for the session
//!
//! Keeps at most one recurring task per key (a worker's service id, or a
//! training poller name) and tears them all down together.

pub mod poller;

pub use poller::PollingScheduler;
