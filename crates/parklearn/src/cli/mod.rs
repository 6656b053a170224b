//! CLI module for parklearn
//!
//! Job commands (`batch`, `live`) drive the detection pipeline; `history`
//! and `session` read stored results back; `config` shows the effective
//! settings.

pub mod config;
pub mod error;
pub mod history;
pub mod job;
pub mod output;
