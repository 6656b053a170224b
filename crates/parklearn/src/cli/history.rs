//! `history` and `session` commands: read back stored batch results.

use crate::cli::config::ConfigOverrides;
use crate::cli::error::HelpfulError;
use crate::cli::output::{
    color_for_rate, format_param, format_rate, format_timestamp, print_json, print_table,
    print_table_colored,
};
use parklearn_db::{HistoryEntry, ParkDb, SessionDetail};
use parklearn_logging::parklearn_home;
use parklearn_worker::{PipelineConfig, ProjectLayout};
use serde::Serialize;
use std::path::PathBuf;

/// Arguments for the history command
#[derive(Debug, clap::Args)]
pub struct HistoryArgs {
    /// Project id
    pub project: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the session command
#[derive(Debug, clap::Args)]
pub struct SessionArgs {
    /// Project id
    pub project: String,

    /// Session name (the batch result folder name)
    pub name: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// A history line together with where its batch results live on disk.
#[derive(Debug, Serialize)]
struct HistoryRow<'a> {
    #[serde(flatten)]
    entry: &'a HistoryEntry,
    result_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct SessionView<'a> {
    #[serde(flatten)]
    detail: &'a SessionDetail,
    result_dir: PathBuf,
}

/// Open the state store, or `None` when nothing was ever recorded.
async fn open_store(config: &PipelineConfig) -> anyhow::Result<Option<ParkDb>> {
    if !config.state_store.exists() {
        return Ok(None);
    }
    Ok(Some(ParkDb::open(&config.state_store).await?))
}

/// Run the history command
pub async fn run_history(args: HistoryArgs, overrides: &ConfigOverrides) -> anyhow::Result<()> {
    let config = overrides.load(&parklearn_home())?;
    let entries = match open_store(&config).await? {
        Some(db) => {
            let entries = db.list_sessions(&args.project).await;
            db.close().await;
            entries?
        }
        None => Vec::new(),
    };

    let layout = config.layout();
    let rows = history_rows(&layout, &entries);

    if args.json {
        return print_json(&rows);
    }

    if rows.is_empty() {
        println!("No sessions recorded for project '{}'.", args.project);
        return Ok(());
    }

    let table_rows = rows
        .iter()
        .map(|row| {
            let s = &row.entry.session;
            vec![
                s.name.clone(),
                format_timestamp(s.created_at),
                format_param(s.learning_rate),
                s.iterations.to_string(),
                format_param(s.var_threshold),
                row.entry.cctv_ids.join(", "),
                row.result_dir.display().to_string(),
            ]
        })
        .collect();
    print_table(
        &["Session", "Created", "Rate", "Iterations", "Threshold", "CCTVs", "Folder"],
        table_rows,
    );
    println!("{} session(s)", rows.len());
    Ok(())
}

fn history_rows<'a>(layout: &ProjectLayout, entries: &'a [HistoryEntry]) -> Vec<HistoryRow<'a>> {
    entries
        .iter()
        .map(|entry| HistoryRow {
            entry,
            result_dir: layout.batch_session_dir(&entry.session.project_id, &entry.session.name),
        })
        .collect()
}

/// Run the session command
pub async fn run_session(args: SessionArgs, overrides: &ConfigOverrides) -> anyhow::Result<()> {
    let config = overrides.load(&parklearn_home())?;
    let detail = match open_store(&config).await? {
        Some(db) => {
            let detail = db.get_session_by_name(&args.project, &args.name).await;
            db.close().await;
            detail?
        }
        None => None,
    };
    let detail = detail.ok_or_else(|| HelpfulError::session_not_found(&args.project, &args.name))?;

    let view = SessionView {
        result_dir: config
            .layout()
            .batch_session_dir(&detail.session.project_id, &detail.session.name),
        detail: &detail,
    };

    if args.json {
        return print_json(&view);
    }

    let s = &detail.session;
    println!("Session:    {}", s.name);
    println!("Project:    {}", s.project_id);
    println!("Created:    {}", format_timestamp(s.created_at));
    println!(
        "Parameters: rate {}, iterations {}, threshold {}",
        format_param(s.learning_rate),
        s.iterations,
        format_param(s.var_threshold)
    );
    println!(
        "Inputs:     learning {}, test {}, roi {}",
        s.learning_path, s.test_image_path, s.roi_path
    );
    println!("Folder:     {}", view.result_dir.display());
    println!();

    let rows = detail
        .cameras
        .iter()
        .flat_map(|camera| {
            camera.rois.iter().map(move |roi| {
                vec![
                    (camera.result.cctv_id.clone(), None),
                    (camera.result.learning_data_size.to_string(), None),
                    (roi.roi_id.to_string(), None),
                    (format_rate(roi.rate), Some(color_for_rate(roi.rate))),
                ]
            })
        })
        .collect();
    print_table_colored(&["CCTV", "Learning images", "ROI", "Foreground"], rows);
    Ok(())
}
