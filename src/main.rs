use adjacency_pipeline::config::{PipelineConfig, TablesConfig};
use adjacency_pipeline::constants::{DEFAULT_CONFIG_PATH, DEFAULT_DB_ENV_VAR};
use adjacency_pipeline::logging;
use adjacency_pipeline::pipeline::{self, SelfLoopPolicy};
use adjacency_pipeline::schedule::{self, DailySchedule};
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "adjacency_pipeline")]
#[command(about = "Loads an adjacency-matrix workbook into entity and edge tables")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline once
    Run {
        #[command(flatten)]
        config: ConfigArgs,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Extract and transform without writing to the database
    Inspect {
        #[command(flatten)]
        config: ConfigArgs,
        /// Number of edges to print
        #[arg(long, default_value_t = 10)]
        show_edges: usize,
    },
    /// Run the pipeline every day at a fixed local time
    Schedule {
        #[command(flatten)]
        config: ConfigArgs,
        /// Local time of day, HH:MM
        #[arg(long)]
        time: Option<String>,
        /// IANA timezone name
        #[arg(long)]
        timezone: Option<String>,
    },
}

#[derive(Args, Debug, Clone)]
struct ConfigArgs {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Workbook path (overrides workbook.file_path)
    #[arg(long)]
    file: Option<String>,
    #[arg(long)]
    entity_sheet: Option<String>,
    #[arg(long)]
    adjacency_sheet: Option<String>,
    /// Environment variable holding the destination connection string
    #[arg(long)]
    db_env: Option<String>,
    /// drop, keep or error
    #[arg(long)]
    self_loop_policy: Option<SelfLoopPolicy>,
    /// Load into `actors` and `adjacency_list`
    #[arg(long)]
    legacy_table_names: bool,
    #[arg(long)]
    log_dir: Option<String>,
}

impl ConfigArgs {
    fn resolve(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = if self.config.exists() {
            PipelineConfig::load(&self.config)?
        } else if let Some(file) = &self.file {
            PipelineConfig::new(file, DEFAULT_DB_ENV_VAR)
        } else {
            bail!(
                "config file '{}' not found and no --file given",
                self.config.display()
            );
        };

        if let Some(file) = &self.file {
            config.workbook.file_path = file.clone();
        }
        if let Some(sheet) = &self.entity_sheet {
            config.workbook.entity_sheet_name = sheet.clone();
        }
        if let Some(sheet) = &self.adjacency_sheet {
            config.workbook.adjacency_sheet_name = sheet.clone();
        }
        if let Some(var) = &self.db_env {
            config.database.env_var_name = var.clone();
        }
        if let Some(policy) = self.self_loop_policy {
            config.transform.self_loop_policy = policy;
        }
        if self.legacy_table_names {
            config.tables = TablesConfig::legacy();
        }
        if let Some(dir) = &self.log_dir {
            config.logging.directory = dir.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let args = match &cli.command {
        Commands::Run { config, .. }
        | Commands::Inspect { config, .. }
        | Commands::Schedule { config, .. } => config,
    };
    let mut config = args.resolve()?;

    let _guard = logging::init_logging(&config.logging.directory)
        .context("Failed to initialize logging")?;

    match cli.command {
        Commands::Run { json, .. } => {
            let report = match pipeline::run_once(&config).await {
                Ok(report) => report,
                Err(e) => {
                    error!(error_kind = e.kind(), error = %e, "pipeline run did not complete");
                    return Err(e.into());
                }
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Run {} completed", report.run_id);
                for task in &report.tasks {
                    println!("   {:<18} {:>8} rows  {:>6} ms", task.name, task.rows, task.duration_ms);
                }
                if let Some(transform) = &report.transform {
                    println!(
                        "   self-loops dropped/kept: {}, duplicates skipped: {}",
                        transform.self_loops, transform.duplicates_skipped
                    );
                }
            }
        }
        Commands::Inspect { show_edges, .. } => {
            let inspection = pipeline::inspect(&config).await?;
            println!("Entities: {}", inspection.entities.len());
            println!("Edges: {}", inspection.edges.len());
            for edge in inspection.edges.iter().take(show_edges) {
                println!("   {} -> {}", edge.from_node_id, edge.to_node_id);
            }
            if inspection.edges.len() > show_edges {
                println!("   ... {} more", inspection.edges.len() - show_edges);
            }
        }
        Commands::Schedule { time, timezone, .. } => {
            if let Some(time) = time {
                config.schedule.time = time;
            }
            if let Some(timezone) = timezone {
                config.schedule.timezone = timezone;
            }
            config.validate()?;
            let daily = DailySchedule::from_config(&config.schedule)?;
            info!(file = %config.workbook.file_path, "starting scheduler");
            schedule::run_daily(config, daily).await?;
        }
    }

    Ok(())
}
