//! Output contract of the detection executable.
//!
//! On success the executable prints one line `JSON_FILE:<path>` on stdout or
//! stderr. The artifact lives inside a session folder whose name is the path
//! segment right after an anchor segment (`results` for batch runs,
//! `liveResults` for live runs):
//!
//! ```text
//! JSON_FILE: /srv/shared/lot-7/results/20240309140507/result.json
//!                                      ^^^^^^^^^^^^^^ session name
//! ```

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

pub const MARKER_PREFIX: &str = "JSON_FILE:";

/// Result of looking for the artifact marker in captured output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerScan {
    Found { path: String },
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("no '{}' line in executable output", MARKER_PREFIX)]
    MarkerNotFound,

    #[error("no segment after '{anchor}' in artifact path {path}")]
    AnchorNotFound { path: String, anchor: String },
}

/// Find the first line that starts with the marker.
///
/// The trimmed remainder is the artifact path. A marker line with nothing
/// after it does not count.
pub fn scan_marker(output: &str) -> MarkerScan {
    output
        .lines()
        .filter_map(|line| line.strip_prefix(MARKER_PREFIX))
        .map(str::trim)
        .find(|rest| !rest.is_empty())
        .map(|path| MarkerScan::Found {
            path: path.to_string(),
        })
        .unwrap_or(MarkerScan::NotFound)
}

/// Segment right after the first `anchor` segment of `path`.
pub fn session_name(path: &str, anchor: &str) -> Result<String, ProtocolError> {
    locate_session(Path::new(path), anchor)
        .map(|(name, _)| name)
        .ok_or_else(|| anchor_not_found(path, anchor))
}

/// Everything the pipeline needs from one run's output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    /// Artifact path, made absolute against the executable's working directory.
    pub artifact_path: PathBuf,
    pub session_name: String,
    /// Artifact path cut off right after the session segment.
    pub session_dir: PathBuf,
}

/// Scan for the marker and derive the session from the artifact path.
pub fn parse_output(
    output: &str,
    anchor: &str,
    working_dir: Option<&Path>,
) -> Result<ParsedOutput, ProtocolError> {
    let raw = match scan_marker(output) {
        MarkerScan::Found { path } => path,
        MarkerScan::NotFound => return Err(ProtocolError::MarkerNotFound),
    };

    let artifact_path = match working_dir {
        Some(dir) if Path::new(&raw).is_relative() => dir.join(&raw),
        _ => PathBuf::from(&raw),
    };

    let (session_name, session_dir) =
        locate_session(&artifact_path, anchor).ok_or_else(|| anchor_not_found(&raw, anchor))?;

    Ok(ParsedOutput {
        artifact_path,
        session_name,
        session_dir,
    })
}

fn anchor_not_found(path: &str, anchor: &str) -> ProtocolError {
    ProtocolError::AnchorNotFound {
        path: path.to_string(),
        anchor: anchor.to_string(),
    }
}

fn locate_session(path: &Path, anchor: &str) -> Option<(String, PathBuf)> {
    let mut prefix = PathBuf::new();
    let mut components = path.components();

    while let Some(component) = components.next() {
        prefix.push(component);
        if component.as_os_str() != anchor {
            continue;
        }
        return match components.next() {
            Some(Component::Normal(segment)) => {
                prefix.push(segment);
                Some((segment.to_string_lossy().into_owned(), prefix))
            }
            _ => None,
        };
    }
    None
}
