//! Keel Core
//!
//! Core types and abstractions for the Keel selective build pipeline.
//!
//! This crate contains:
//! - Domain types: services, change sets, build matrices, build results, run state
//! - Configuration: the `keel.yaml` pipeline definition
//! - DTOs: serialisable shapes exchanged with CI fan-out and reporting
//! - Errors: the pipeline failure taxonomy shared by every component

pub mod config;
pub mod domain;
pub mod dto;
pub mod error;

pub use error::{FailureKind, PipelineError, Result};
