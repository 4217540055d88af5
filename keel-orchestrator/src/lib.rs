//! Keel Orchestrator
//!
//! Runs a whole pipeline for one trigger:
//! - Git: computes the change set between base and head
//! - Pipeline: drives the run state machine and aggregates the report
//! - Scheduler: fans the matrix out into parallel, cancellable build units

pub mod config;
pub mod git;
pub mod pipeline;
pub mod scheduler;

pub use config::{Config, Trigger};
pub use git::{ChangeDetector, GitChangeDetector};
pub use pipeline::Orchestrator;
pub use scheduler::{CancelHandle, Scheduler};
