//! Job parameters and their range checks.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use thiserror::Error;

pub const MIN_ITERATIONS: u32 = 1;
pub const MAX_ITERATIONS: u32 = 10_000;

/// A parameter that failed validation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid {field}: {reason}")]
pub struct InvalidParameter {
    pub field: &'static str,
    pub reason: String,
}

impl InvalidParameter {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Which flavour of job to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum JobMode {
    /// Learn and evaluate against a test-image folder, persisting the results.
    Batch { test_path: String },
    /// Evaluate against the live camera frames. Nothing is persisted.
    Live,
}

impl JobMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Batch { .. } => "batch",
            Self::Live => "live",
        }
    }
}

/// Input of one detection job. Immutable for the duration of the run.
///
/// Folder and file references are relative to the project's upload
/// directories (see [`crate::paths::ProjectLayout`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    pub project_id: String,
    pub learning_rate: f64,
    pub iterations: u32,
    pub var_threshold: f64,
    pub learning_path: String,
    pub roi_path: String,
    #[serde(flatten)]
    pub mode: JobMode,
}

impl JobParameters {
    /// Test-image folder reference, batch mode only.
    pub fn test_path(&self) -> Option<&str> {
        match &self.mode {
            JobMode::Batch { test_path } => Some(test_path),
            JobMode::Live => None,
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self.mode, JobMode::Batch { .. })
    }

    /// Check value ranges and the shape of every reference.
    pub fn validate(&self) -> Result<(), InvalidParameter> {
        validate_segment("project_id", &self.project_id)?;

        if !self.learning_rate.is_finite() || !(0.0..=1.0).contains(&self.learning_rate) {
            return Err(InvalidParameter::new(
                "learning_rate",
                format!("{} is outside 0.0..=1.0", self.learning_rate),
            ));
        }

        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&self.iterations) {
            return Err(InvalidParameter::new(
                "iterations",
                format!(
                    "{} is outside {}..={}",
                    self.iterations, MIN_ITERATIONS, MAX_ITERATIONS
                ),
            ));
        }

        if !self.var_threshold.is_finite() || self.var_threshold <= 0.0 {
            return Err(InvalidParameter::new(
                "var_threshold",
                format!("{} must be greater than zero", self.var_threshold),
            ));
        }

        validate_reference("learning_path", &self.learning_path)?;
        validate_reference("roi_path", &self.roi_path)?;
        if let Some(test_path) = self.test_path() {
            validate_reference("test_path", test_path)?;
        }

        Ok(())
    }
}

/// A project id becomes a directory name, so it must be a single plain segment.
fn validate_segment(field: &'static str, value: &str) -> Result<(), InvalidParameter> {
    if value.trim().is_empty() {
        return Err(InvalidParameter::new(field, "must not be empty"));
    }
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !value.contains(['/', '\\']) => Ok(()),
        _ => Err(InvalidParameter::new(
            field,
            format!("'{}' must be a single path segment", value),
        )),
    }
}

/// References must stay inside the directory they are resolved against.
pub fn validate_reference(field: &'static str, value: &str) -> Result<(), InvalidParameter> {
    if value.trim().is_empty() {
        return Err(InvalidParameter::new(field, "must not be empty"));
    }
    let escapes = Path::new(value)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(InvalidParameter::new(
            field,
            format!("'{}' must be a relative path without '..'", value),
        ));
    }
    Ok(())
}
