//! Data Transfer Objects for remote service calls
//!
//! Keyword-argument payloads for the manager and orchestrator services.
//! Field names match the remote method signatures.

pub mod manager;
pub mod orchestrator;
