//! Chiron Session
//!
//! Coordination core of a federated training session: connected workers and
//! their polling, the orchestrator and trainer applications deployed on them,
//! and the training run driven through the selected orchestrator.
//!
//! All remote access goes through the service traits of `chiron-client`, so a
//! [`Session`] can run against HTTP proxies or in-memory fakes alike.

pub mod config;
pub mod confirm;
pub mod controller;
pub mod error;
pub mod info;
pub mod inventory;
pub mod registry;
pub mod scheduler;
pub mod session;

#[cfg(test)]
mod fakes;

pub use config::SessionConfig;
pub use confirm::{AlwaysConfirm, Confirm, DestructiveAction, NeverConfirm};
pub use controller::{RosterDiff, Selection, TrainingParams, TrainingPhase, TrainingSessionController};
pub use error::{Result, SessionError};
pub use info::{AppInfo, InfoTarget, ManagerInfo, OrchestratorInfo, TrainerInfo};
pub use inventory::{ApplicationInventory, derive_from};
pub use registry::{WorkerConnection, WorkerRegistry};
pub use scheduler::PollingScheduler;
pub use session::Session;
