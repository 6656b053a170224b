//! Configuration for the parklearn CLI
//!
//! Settings come from `<home>/parklearn.toml`, then flags (or their
//! environment variables) on top.

use anyhow::Context;
use parklearn_logging::parklearn_home;
use parklearn_worker::config::ConfigFile;
use parklearn_worker::PipelineConfig;
use std::path::{Path, PathBuf};

/// Flags that override `parklearn.toml` for a single invocation
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigOverrides {
    /// Root holding one folder per project
    #[arg(long, env = "PARKLEARN_SHARED_ROOT", global = true)]
    pub shared_root: Option<PathBuf>,

    /// Detection executable to run
    #[arg(long, env = "PARKLEARN_EXECUTABLE", global = true)]
    pub executable: Option<PathBuf>,

    /// SQLite file holding experiment sessions
    #[arg(long, env = "PARKLEARN_STATE_STORE", global = true)]
    pub state_store: Option<PathBuf>,

    /// Whole-job deadline in seconds
    #[arg(long, env = "PARKLEARN_DEADLINE_SECS", global = true)]
    pub deadline_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Resolve the effective configuration for `home`.
    pub fn load(&self, home: &Path) -> anyhow::Result<PipelineConfig> {
        let path = PipelineConfig::config_path(home);
        let mut file = ConfigFile::read(&path)?;
        self.apply(&mut file);
        PipelineConfig::resolve(home, file)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    fn apply(&self, file: &mut ConfigFile) {
        if let Some(shared_root) = &self.shared_root {
            file.shared_root = Some(shared_root.clone());
        }
        if let Some(executable) = &self.executable {
            file.executable = Some(executable.clone());
        }
        if let Some(state_store) = &self.state_store {
            file.state_store = Some(state_store.clone());
        }
        if let Some(deadline_secs) = self.deadline_secs {
            file.deadline_secs = Some(deadline_secs);
        }
    }
}

/// Arguments for the config command
#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    /// Show resolved settings in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Run the config command - shows the effective settings
pub fn run(args: ConfigArgs, overrides: &ConfigOverrides) -> anyhow::Result<()> {
    let home = parklearn_home();
    let config_file = PipelineConfig::config_path(&home);
    let config = overrides.load(&home)?;

    if args.json {
        let value = serde_json::json!({
            "home": home.to_string_lossy(),
            "config_file": path_entry(&config_file),
            "shared_root": path_entry(&config.shared_root),
            "live_images_dir": path_entry(&config.live_images_dir),
            "executable": path_entry(&config.executable),
            "state_store": path_entry(&config.state_store),
            "deadline_secs": config.deadline.as_secs(),
            "max_output_bytes": config.max_output_bytes,
            "job_log_dir": config.job_log_dir.as_deref().map(path_entry),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("PARKLEARN CONFIGURATION");
        println!("=======================");
        println!();
        println!("Home:        {}", home.display());
        println!("Config file: {} ({})", config_file.display(), exists_label(&config_file));
        println!();
        println!("Shared root: {} ({})", config.shared_root.display(), exists_label(&config.shared_root));
        println!(
            "Live images: {} ({})",
            config.live_images_dir.display(),
            exists_label(&config.live_images_dir)
        );
        println!("Executable:  {} ({})", config.executable.display(), exists_label(&config.executable));
        println!("State store: {} ({})", config.state_store.display(), exists_label(&config.state_store));
        println!();
        println!("Deadline:    {}s", config.deadline.as_secs());
        println!("Output cap:  {} bytes", config.max_output_bytes);
        match &config.job_log_dir {
            Some(dir) => println!("Job logs:    {}", dir.display()),
            None => println!("Job logs:    disabled"),
        }
    }

    Ok(())
}

fn path_entry(path: &Path) -> serde_json::Value {
    serde_json::json!({
        "path": path.to_string_lossy(),
        "exists": path.exists(),
    })
}

fn exists_label(path: &Path) -> &'static str {
    if path.exists() {
        "exists"
    } else {
        "not found"
    }
}
