//! Core domain types
//!
//! This module contains the structures every Keel component shares: the
//! registry of watched services, the change set of a run, the build matrix
//! derived from both, the per-service build outcome and the run state machine.

pub mod build;
pub mod change;
pub mod image;
pub mod matrix;
pub mod run;
pub mod service;
