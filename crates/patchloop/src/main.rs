mod config;
mod init;
mod settings;
mod tasks;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use patchloop_agent::create_agent;
use patchloop_core::{Cancellation, IterationLoop, LoopOutcome, LoopServices};
use patchloop_db::Database;
use patchloop_generator::{AgentGenerator, GeneratorConfig, RateLimitTable};
use patchloop_git::GitWorkspace;
use patchloop_logging::{init_tracing, EventFanout, EventSink, FsArtifactStore, LogFormat, Logger};
use patchloop_verify::{CommandVerifier, VerifierConfig};

use crate::config::ProjectConfig;
use crate::settings::{RunArgs, RunSettings};
use crate::tasks::TasksAction;

#[derive(Parser, Debug)]
#[command(
    name = "patchloop",
    about = "Generate, apply, verify and diagnose code changes in a bounded loop",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Where the database, artifacts and workspaces live
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    log_format: LogFormatChoice,

    /// Also write diagnostics as JSON lines to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Diagnostic level when RUST_LOG is unset
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the loop for a new task
    Run(RunArgs),

    /// Inspect recorded tasks
    Tasks {
        #[command(subcommand)]
        action: TasksAction,
    },

    /// Write a patchloop.toml with detected defaults
    Init {
        /// Directory to initialize (default: current directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Replace an existing patchloop.toml
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_format: LogFormat = cli.log_format.into();
    let guard = init_tracing(&cli.log_level, log_format, cli.log_file.as_deref())
        .context("Failed to initialize logging")?;

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?
            .join("patchloop"),
    };

    match cli.command {
        Command::Run(args) => {
            let code = run(args, data_dir, log_format).await?;
            // Flush the log file before exiting
            drop(guard);
            std::process::exit(code);
        }
        Command::Tasks { action } => {
            let db = open_database(&data_dir)?;
            tasks::handle_tasks_command(&db, action)
        }
        Command::Init { dir, force } => {
            let dir = match dir {
                Some(dir) => dir,
                None => std::env::current_dir().context("Failed to get current directory")?,
            };
            init::handle_init(&dir, force).await
        }
    }
}

fn open_database(data_dir: &std::path::Path) -> Result<Database> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    let path = data_dir.join("patchloop.db");
    Database::open_at(&path).with_context(|| format!("Failed to open {}", path.display()))
}

async fn run(args: RunArgs, data_dir: PathBuf, log_format: LogFormat) -> Result<i32> {
    let source = match args.source.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let source = source
        .canonicalize()
        .with_context(|| format!("Source directory {} not found", source.display()))?;

    let project = ProjectConfig::load(&source)?.unwrap_or_default();
    let settings = RunSettings::resolve(&args, &project, &source, &data_dir)?;

    if args.dry_run {
        print_dry_run(&args, &settings, &source, &data_dir);
        return Ok(0);
    }

    let agent = create_agent(settings.agent);
    if !agent.is_available().await {
        anyhow::bail!(
            "Agent '{}' is not available. Make sure it's installed and in PATH.",
            agent.name()
        );
    }

    let db = Arc::new(open_database(&data_dir)?);
    let generator = AgentGenerator::new(
        agent,
        GeneratorConfig {
            model: settings.model.clone(),
            timeout: Some(settings.loop_config.generator_timeout),
            retry: settings.retry,
        },
        Arc::new(RateLimitTable::new()),
    );
    let verifier = CommandVerifier::new(
        VerifierConfig::new(settings.verify_command.clone())
            .with_timeout(settings.loop_config.verification_timeout),
    );
    let sink: Arc<dyn EventSink> = Arc::new(
        EventFanout::new()
            .with(Arc::new(Logger::new(log_format)))
            .with(db.clone()),
    );

    let services = LoopServices {
        generator: Arc::new(generator),
        verifier: Arc::new(verifier),
        workspaces: Arc::new(
            GitWorkspace::new(settings.workspace_root.clone())
                .with_branch_prefix(settings.branch_prefix.clone()),
        ),
        store: db,
        sink,
        artifacts: Arc::new(FsArtifactStore::new(data_dir.join("artifacts"))),
    };
    let iteration_loop = IterationLoop::new(services, settings.loop_config);

    let task = iteration_loop
        .submit(&args.description, &source)
        .context("Failed to create task")?;
    let task_id = task.id.clone();

    // Handle Ctrl+C gracefully
    let cancel = Cancellation::new();
    let handle = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted. Stopping the loop...");
        handle.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    let outcome = iteration_loop.run(task, &cancel).await?;

    if args.json_output {
        let json = serde_json::json!({ "task_id": task_id, "outcome": outcome });
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        print_outcome(&task_id, &outcome);
    }

    Ok(outcome.exit_code())
}

fn print_dry_run(
    args: &RunArgs,
    settings: &RunSettings,
    source: &std::path::Path,
    data_dir: &std::path::Path,
) {
    let description: String = args.description.chars().take(100).collect();
    println!("=== Dry Run ===");
    println!("Description: {}", description);
    println!("Source: {}", source.display());
    println!("Data dir: {}", data_dir.display());
    println!("Workspaces: {}", settings.workspace_root.display());
    println!("Agent: {}", settings.agent);
    if let Some(ref model) = settings.model {
        println!("Model: {}", model);
    }
    println!("Verify: {}", settings.verify_command);
    println!("Max iterations: {}", settings.loop_config.max_iterations);
    println!(
        "Timeouts: generator {}s, verification {}s",
        settings.loop_config.generator_timeout.as_secs(),
        settings.loop_config.verification_timeout.as_secs()
    );
}

fn print_outcome(task_id: &str, outcome: &LoopOutcome) {
    eprintln!();
    match outcome {
        LoopOutcome::Completed {
            iterations,
            total_duration_secs,
        } => {
            eprintln!("{}", "=== COMPLETED ===".bright_green().bold());
            eprintln!("Verification passed after {} iteration(s)", iterations);
            eprintln!("Duration: {:.1}s", total_duration_secs);
        }
        LoopOutcome::BudgetExhausted {
            iterations,
            total_duration_secs,
        } => {
            eprintln!("{}", "=== BUDGET EXHAUSTED ===".bright_yellow().bold());
            eprintln!(
                "Verification still failing after {} iteration(s)",
                iterations
            );
            eprintln!("Duration: {:.1}s", total_duration_secs);
        }
        LoopOutcome::Cancelled {
            iterations,
            total_duration_secs,
        } => {
            eprintln!("{}", "=== CANCELLED ===".bright_yellow().bold());
            eprintln!("Stopped during iteration {}", iterations);
            eprintln!("Duration: {:.1}s", total_duration_secs);
        }
        LoopOutcome::Failed {
            iterations,
            error,
            total_duration_secs,
        } => {
            eprintln!("{}", "=== FAILED ===".bright_red().bold());
            eprintln!("Error after {} iteration(s): {}", iterations, error);
            eprintln!("Duration: {:.1}s", total_duration_secs);
        }
    }
    eprintln!(
        "Details: {}",
        format!("patchloop tasks show {}", task_id).bright_cyan()
    );
}
