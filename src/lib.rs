//! API test runner with opt-in governance and security inspection of every
//! HTTP exchange, plus a SQLite store that gives tests a durable identity
//! across runs.
//!
//! The usual flow: register suites in a [`registry::Registry`] (in code or
//! from [`collections::Collection`] files), hand it to a
//! [`harness::Harness`], and render the returned report with
//! [`reporting`].

pub mod auth;
pub mod cli;
pub mod clock;
pub mod collections;
pub mod collector;
pub mod config;
pub mod environment;
pub mod error;
pub mod harness;
pub mod http;
pub mod inspection;
pub mod registry;
pub mod reporting;
pub mod runner;
pub mod store;
pub mod testing;
