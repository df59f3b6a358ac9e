//! Grading and result computation for an academic records system.
//!
//! The pure engine modules (`score`, `grading`, `stats`, `lock`, `course`,
//! `result`, `cgpa`) operate on in-memory aggregates. [`service`] wires them
//! to a [`store::Store`] and serializes concurrent mutations.

pub mod cgpa;
pub mod config;
pub mod course;
pub mod db;
pub mod error;
pub mod grading;
pub mod import;
pub mod lock;
pub mod marksheet;
pub mod models;
pub mod result;
pub mod score;
pub mod service;
pub mod stats;
pub mod store;

pub use error::{EngineError, EngineResult};
pub use service::{GradingService, NewResult};
