//! Core domain types
//!
//! This module contains the structures reported by remote workers and
//! orchestrators, plus the records the session derives from them. They are
//! read-only snapshots: the session replaces them wholesale, it never edits
//! them in place.

pub mod application;
pub mod dataset;
pub mod training;
pub mod worker;
