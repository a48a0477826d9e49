//! Scenario harness for the rtsan runtime.
//!
//! This crate provides:
//! - Scenario catalog: short programs driving the detector through region,
//!   bypass and configuration combinations, each with an expected exit code
//!   and report
//! - Runner: executes every scenario in a child process so terminating
//!   actions can be observed, then classifies the result
//! - Structured logging: JSONL records for each scenario run

#![forbid(unsafe_code)]

pub mod error;
pub mod runner;
pub mod scenarios;
pub mod structured_log;

pub use error::HarnessError;
pub use runner::{ScenarioRun, ScenarioRunner, summary_level};
pub use scenarios::{Expectation, Scenario, find_scenario, scenarios};
