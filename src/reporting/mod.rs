//! # Reporting
//!
//! Turns a [`crate::collector::RunReport`] into something a person or a CI
//! job can read, and hands each run to the identity repository.

pub mod console;
pub mod json;
pub mod persistence;

pub use console::write_console_report;
pub use json::{JsonReport, write_json_report};
pub use persistence::{PersistenceOutcome, PersistenceReporter};
