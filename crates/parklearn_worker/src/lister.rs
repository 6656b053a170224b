//! Camera summaries for live runs, read straight from the output folder.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSummary {
    pub cctv_id: String,
    pub has_images: bool,
}

#[derive(Debug, Error)]
#[error("cannot list {}: {source}", path.display())]
pub struct ListingError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl ListingError {
    fn at(path: &Path) -> impl FnOnce(io::Error) -> ListingError {
        let path = path.to_path_buf();
        move |source| ListingError { path, source }
    }
}

/// One summary per immediate subdirectory of `session_dir`, sorted by id.
///
/// A missing directory is an empty session, not an error.
pub async fn list_cameras(session_dir: &Path) -> Result<Vec<CameraSummary>, ListingError> {
    let mut entries = match tokio::fs::read_dir(session_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ListingError::at(session_dir)(e)),
    };

    let mut cameras = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(ListingError::at(session_dir))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(ListingError::at(&entry.path()))?;
        if !file_type.is_dir() {
            continue;
        }
        let camera_dir = entry.path();
        cameras.push(CameraSummary {
            cctv_id: entry.file_name().to_string_lossy().into_owned(),
            has_images: has_image(&camera_dir).await?,
        });
    }

    cameras.sort_by(|a, b| a.cctv_id.cmp(&b.cctv_id));
    Ok(cameras)
}

async fn has_image(dir: &Path) -> Result<bool, ListingError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(ListingError::at(dir))?;
    while let Some(entry) = entries.next_entry().await.map_err(ListingError::at(dir))? {
        if is_image_name(&entry.file_name().to_string_lossy()) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_image_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}
