//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use parklearn_worker::defaults::CANCELLED_BY_USER_MESSAGE;
use parklearn_worker::{JobError, PathRole};
use std::fmt;
use std::path::Path;

/// Lines of executable output shown with a failed job.
const OUTPUT_TAIL_LINES: usize = 20;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    /// The main error message
    pub message: String,
    /// Additional context about what was happening
    pub context: Option<String>,
    /// Suggestions for how to fix the error
    pub suggestions: Vec<String>,
    /// Tail of the detection executable's output, when there was a run
    pub output: Option<String>,
}

impl HelpfulError {
    /// Create a new helpful error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
            output: None,
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Add a suggestion for fixing the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Add multiple suggestions
    pub fn with_suggestions(
        mut self,
        suggestions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.suggestions
            .extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    /// Attach the last lines of captured executable output
    pub fn with_output(mut self, output: &str) -> Self {
        let tail = tail_lines(output, OUTPUT_TAIL_LINES);
        if !tail.is_empty() {
            self.output = Some(tail);
        }
        self
    }

    // === Common error constructors ===

    /// Path does not exist
    pub fn path_not_found(role: PathRole, path: &Path) -> Self {
        Self::new(format!("{} not found: {}", role, path.display()))
            .with_context("Job inputs are resolved under the shared project root")
            .with_suggestions([
                format!("TRY: Check that the path exists: ls -la {}", path.display()),
                "TRY: Show the configured shared root: parklearn config".to_string(),
                "TRY: Check for typos in the project id or reference".to_string(),
            ])
    }

    /// No session with that name in the project history
    pub fn session_not_found(project_id: &str, name: &str) -> Self {
        Self::new(format!("Session not found: {}", name))
            .with_context(format!("Project '{}' has no session with that name", project_id))
            .with_suggestions([format!(
                "TRY: List the project's sessions: parklearn history {}",
                project_id
            )])
    }

    /// A detection job failed; reports the stage and any captured output
    pub fn job_failed(err: &JobError, job_log_dir: Option<&Path>) -> Self {
        let mut context = format!("Stage: {}", err.stage());
        if let Some(name) = err.session_name() {
            context.push_str(&format!(", session: {}", name));
        }

        let base = match err {
            JobError::PathNotFound { role, path } => Self::path_not_found(*role, path),
            JobError::InvalidParameters(_) => Self::new(err.to_string())
                .with_suggestion("TRY: See the accepted ranges: parklearn batch --help"),
            JobError::LockFailed(_) => Self::new(err.to_string()).with_suggestion(
                "TRY: Wait for the other job on this project to finish, then retry",
            ),
            JobError::DeadlineExceeded { .. } => Self::new(err.to_string()).with_suggestions([
                "TRY: Raise the job deadline: --deadline-secs 1800".to_string(),
                "TRY: Or set deadline_secs in parklearn.toml".to_string(),
            ]),
            JobError::Cancelled { .. } => Self::new(CANCELLED_BY_USER_MESSAGE)
                .with_suggestion("TRY: Re-run the same command to start the job again"),
            JobError::ExecutionFailed { .. } | JobError::MarkerNotFound { .. } => {
                let mut e = Self::new(err.to_string())
                    .with_suggestion("TRY: Check the executable path: parklearn config");
                if let Some(dir) = job_log_dir {
                    e = e.with_suggestion(format!(
                        "TRY: Full executable output is kept in {}",
                        dir.display()
                    ));
                }
                e
            }
            _ => Self::new(err.to_string()),
        };

        let helpful = base.with_context(context);
        match err.output() {
            Some(output) => helpful.with_output(output),
            None => helpful,
        }
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if let Some(output) = &self.output {
            writeln!(f)?;
            writeln!(f, "OUTPUT (last {} lines):", OUTPUT_TAIL_LINES)?;
            for line in output.lines() {
                writeln!(f, "  | {}", line)?;
            }
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

/// Print an error as a JSON object on stdout, for `--json` callers.
pub fn print_json_error(err: &anyhow::Error) {
    let value = match err.downcast_ref::<HelpfulError>() {
        Some(helpful) => serde_json::json!({
            "error": helpful.message,
            "context": helpful.context,
            "suggestions": helpful.suggestions,
            "output": helpful.output,
        }),
        None => serde_json::json!({
            "error": format!("{:#}", err),
        }),
    };
    match serde_json::to_string_pretty(&value) {
        Ok(text) => println!("{}", text),
        Err(_) => eprintln!("{:?}", err),
    }
}

/// Last `n` non-empty lines of `text`.
fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
