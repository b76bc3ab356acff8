//! Chiron Core
//!
//! Core types and abstractions for the Chiron federated training client.
//!
//! This crate contains:
//! - Domain types: worker snapshots, application records, training status and history
//! - DTOs: request payloads sent to the remote manager and orchestrator services

pub mod domain;
pub mod dto;
