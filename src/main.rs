use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::style::Stylize;
use dotenv::dotenv;
use indicatif::{ProgressBar, ProgressStyle};
use platform_automation::app::Automation;
use platform_automation::background_jobs::JOB_CATALOG;
use platform_automation::cli_style::{
    colors, get_styles, pad, print_error, print_section_header, print_success,
};
use platform_automation::config::{process_env, AppConfig, CliConfig, FileConfig};
use platform_automation::interactive::run_interactive;
use platform_automation::run_store::RunStatus;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
#[command(styles=get_styles(), version, about = "Platform operations automation")]
struct CliArgs {
    /// Path to a TOML configuration file.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory for run records, logs and temp files. Overrides config and env.
    #[clap(long, value_parser = parse_path)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until SIGINT or SIGTERM.
    Start,

    /// Run one job now and print its run record.
    Task {
        name: String,
        /// Job options as a JSON object.
        #[clap(long)]
        options: Option<String>,
    },

    /// Print scheduler and module status as JSON.
    Status,

    /// Start the scheduler and open an interactive shell.
    Interactive,

    /// List the job catalogue.
    List,
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

fn print_catalog() {
    print_section_header("Job catalogue");
    for entry in JOB_CATALOG {
        let state = if entry.enabled {
            "enabled".with(colors::GREEN)
        } else {
            "disabled".with(colors::DIM)
        };
        println!(
            "  {} {} {}",
            pad(entry.name, 18).with(colors::WHITE).bold(),
            pad(entry.cron, 14).with(colors::CYAN),
            state
        );
    }
}

fn load_config(cli_args: &CliArgs) -> Result<AppConfig> {
    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let cli = CliConfig {
        data_dir: cli_args.data_dir.clone(),
    };
    AppConfig::resolve(&cli, file_config, &process_env())
}

async fn run_start(mut automation: Automation) -> Result<()> {
    let shutdown = automation.shutdown_token();
    let Some(scheduler) = automation.spawn_scheduler() else {
        anyhow::bail!("Scheduler already started");
    };
    info!("Automation running, press Ctrl+C to stop");
    wait_for_shutdown_signal().await;
    shutdown.cancel();
    scheduler.await.context("Scheduler task failed")?;
    info!("Shutdown complete");
    Ok(())
}

async fn run_task(automation: &Automation, name: &str, options: Option<String>) -> Result<bool> {
    let options = options
        .map(|o| serde_json::from_str(&o))
        .transpose()
        .context("--options must be valid JSON")?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Running {}...", name));
    spinner.enable_steady_tick(Duration::from_millis(100));
    let result = automation.run_task(name, options).await;
    spinner.finish_and_clear();

    match result {
        Ok(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            if record.status == RunStatus::Success {
                print_success(&format!("{} completed", name));
                Ok(true)
            } else {
                print_error(&format!("{} did not succeed", name));
                Ok(false)
            }
        }
        Err(e) => {
            print_error(&format!("{} failed: {}", name, e));
            Ok(false)
        }
    }
}

async fn run(cli_args: CliArgs) -> Result<bool> {
    if let Command::List = cli_args.command {
        print_catalog();
        return Ok(true);
    }

    let config = load_config(&cli_args)?;
    info!("Data dir: {:?}", config.data_dir);
    let mut automation = Automation::initialize(config)
        .await
        .context("Failed to initialize automation")?;

    match cli_args.command {
        Command::Start => run_start(automation).await.map(|_| true),
        Command::Task { name, options } => run_task(&automation, &name, options).await,
        Command::Status => {
            let status = automation.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(true)
        }
        Command::Interactive => {
            let shutdown = automation.shutdown_token();
            let scheduler = automation.spawn_scheduler();
            let result = run_interactive(Arc::new(automation)).await;
            shutdown.cancel();
            if let Some(scheduler) = scheduler {
                scheduler.await.context("Scheduler task failed")?;
            }
            result.map(|_| true)
        }
        Command::List => Ok(true),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let cli_args = CliArgs::parse();

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init();

    match run(cli_args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
