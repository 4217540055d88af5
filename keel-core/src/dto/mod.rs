//! Data Transfer Objects at the pipeline boundary
//!
//! The matrix is handed to whatever fans build units out (the in-process
//! scheduler, or a CI matrix strategy starting one worker per entry), and run
//! reports are emitted as JSON for downstream tooling. These shapes are
//! serialised structurally, never assembled by string concatenation.

pub mod matrix;
pub mod report;
