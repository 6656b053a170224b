//! `batch` and `live` commands: run one detection job and report its outcome.

use crate::cli::config::ConfigOverrides;
use crate::cli::error::HelpfulError;
use crate::cli::output::{print_json, print_table_colored};
use comfy_table::Color;
use parklearn_db::ParkDb;
use parklearn_logging::parklearn_home;
use parklearn_worker::{
    CancellationToken, JobMode, JobOrchestrator, JobParameters, PipelineConfig,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Learning parameters shared by both job modes
#[derive(Debug, Clone, clap::Args)]
pub struct LearningArgs {
    /// Project id (folder under the shared root)
    pub project: String,

    /// Background model learning rate, 0 to 1
    #[arg(long = "rate")]
    pub learning_rate: f64,

    /// Number of learning iterations
    #[arg(long)]
    pub iterations: u32,

    /// Foreground variance threshold
    #[arg(long = "threshold")]
    pub var_threshold: f64,

    /// Learning image folder, relative to the project's learning uploads
    #[arg(long)]
    pub learning: String,

    /// ROI definition file, relative to the project's ROI uploads
    #[arg(long)]
    pub roi: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the batch command
#[derive(Debug, Clone, clap::Args)]
pub struct BatchArgs {
    #[command(flatten)]
    pub learning: LearningArgs,

    /// Test image folder, relative to the project's test uploads
    #[arg(long)]
    pub test: String,
}

/// Arguments for the live command
#[derive(Debug, Clone, clap::Args)]
pub struct LiveArgs {
    #[command(flatten)]
    pub learning: LearningArgs,
}

impl LearningArgs {
    fn into_parameters(self, mode: JobMode) -> JobParameters {
        JobParameters {
            project_id: self.project,
            learning_rate: self.learning_rate,
            iterations: self.iterations,
            var_threshold: self.var_threshold,
            learning_path: self.learning,
            roi_path: self.roi,
            mode,
        }
    }
}

struct JobContext {
    config: PipelineConfig,
    db: ParkDb,
    orchestrator: JobOrchestrator,
    cancel: CancellationToken,
}

async fn prepare(overrides: &ConfigOverrides) -> anyhow::Result<JobContext> {
    let config = overrides.load(&parklearn_home())?;
    let db = ParkDb::open(&config.state_store).await?;
    let orchestrator = JobOrchestrator::from_config(&config, Arc::new(db.clone()));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping the running job");
            on_interrupt.cancel();
        }
    });

    Ok(JobContext {
        config,
        db,
        orchestrator,
        cancel,
    })
}

/// Run the batch command
pub async fn run_batch(args: BatchArgs, overrides: &ConfigOverrides) -> anyhow::Result<()> {
    let ctx = prepare(overrides).await?;
    let json = args.learning.json;
    let params = args.learning.into_parameters(JobMode::Batch {
        test_path: args.test,
    });

    let result = ctx
        .orchestrator
        .run_batch_job_with_cancel(params, &ctx.cancel)
        .await;
    ctx.db.close().await;

    let outcome = result
        .map_err(|e| HelpfulError::job_failed(&e, ctx.config.job_log_dir.as_deref()))?;
    info!(job_id = %outcome.job_id, session = %outcome.session_name, "Batch job finished");

    if json {
        return print_json(&outcome);
    }

    println!("Session:  {}", outcome.session_name);
    println!("Folder:   {}", outcome.session_dir.display());
    println!(
        "Stored:   {} camera(s), {} region(s) (session #{})",
        outcome.camera_count, outcome.region_count, outcome.session_id
    );
    Ok(())
}

/// Run the live command
pub async fn run_live(args: LiveArgs, overrides: &ConfigOverrides) -> anyhow::Result<()> {
    let ctx = prepare(overrides).await?;
    let json = args.learning.json;
    let params = args.learning.into_parameters(JobMode::Live);

    let result = ctx
        .orchestrator
        .run_live_job_with_cancel(params, &ctx.cancel)
        .await;
    ctx.db.close().await;

    let outcome = result
        .map_err(|e| HelpfulError::job_failed(&e, ctx.config.job_log_dir.as_deref()))?;
    info!(job_id = %outcome.job_id, session = %outcome.session_name, "Live job finished");

    if json {
        return print_json(&outcome);
    }

    println!("Session:  {}", outcome.session_name);
    println!("Folder:   {}", outcome.session_dir.display());
    if outcome.cameras.is_empty() {
        println!("No camera folders were produced.");
        return Ok(());
    }
    let rows = outcome
        .cameras
        .iter()
        .map(|camera| {
            let (label, color) = if camera.has_images {
                ("yes", Color::Green)
            } else {
                ("no", Color::Yellow)
            };
            vec![
                (camera.cctv_id.clone(), None),
                (label.to_string(), Some(color)),
            ]
        })
        .collect();
    print_table_colored(&["CCTV", "Images"], rows);
    Ok(())
}
