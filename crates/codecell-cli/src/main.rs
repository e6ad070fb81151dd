//! Codecell CLI
//!
//! A command-line front end for the codecell execution pipeline: run single
//! programs, or serve newline-delimited JSON requests on stdin.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codecell::{
    Config, EXAMPLE_CONFIG, ExecutionOutcome, ExecutionRequest, Janitor, Runner, StageResult,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "codecell")]
#[command(about = "Compile and run untrusted programs in throwaway workspaces")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: codecell.toml)
        #[arg(short, long, default_value = "codecell.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a program (compile if needed, then execute)
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language ID (e.g., python, java, c, cpp)
        #[arg(short, long)]
        language: String,

        /// File fed to the program's stdin (default: empty input)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Print the result as JSON instead of replaying the program output
        #[arg(long)]
        json: bool,
    },

    /// Serve newline-delimited JSON requests from stdin
    Serve,

    /// List available languages
    Languages,

    /// Show effective configuration
    ShowConfig,
}

/// One line of `serve` input
#[derive(Debug, Deserialize)]
struct ServeRequest {
    /// Opaque client identifier echoed back in the response
    #[serde(default)]
    id: Option<serde_json::Value>,

    #[serde(flatten)]
    request: ExecutionRequest,
}

/// One line of `serve` output
#[derive(Debug, Serialize)]
struct ServeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<serde_json::Value>,

    #[serde(flatten)]
    result: StageResult,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    // Logs go to stderr; stdout carries program output and responses
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Init { ref output, force } = cli.command {
        return init_config(output, force).await;
    }

    if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
    } else {
        debug!("using default configuration");
    }
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Run {
            source,
            language,
            input,
            json,
        } => run_program(config, &source, language, input.as_deref(), json).await,
        Commands::Serve => serve(config).await,
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

async fn run_program(
    config: Config,
    source: &Path,
    language: String,
    input: Option<&Path>,
    json: bool,
) -> Result<()> {
    let code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let stdin = match input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .context("failed to read input file")?,
        None => String::new(),
    };

    let runner = Runner::new(config);
    let outcome = runner
        .execute(ExecutionRequest {
            language,
            code,
            stdin,
        })
        .await;
    let kind = outcome.kind();
    let result = outcome.into_result();

    if json {
        let rendered =
            serde_json::to_string_pretty(&result).context("failed to serialize result")?;
        println!("{rendered}");
    } else {
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
    }

    // Log execution info via tracing (stderr), keeping stdout clean for piping
    info!(outcome = kind, exit_code = result.exit_code, "execution result");

    if result.is_success() {
        Ok(())
    } else {
        std::process::exit(result.exit_code);
    }
}

async fn serve(config: Config) -> Result<()> {
    let janitor = config
        .janitor
        .enabled
        .then(|| Janitor::from_config(&config).start());
    let runner = Runner::new(config);

    // Single writer so concurrent responses never interleave within a line
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    info!(
        workspace_root = %runner.config().workspace_root().display(),
        "serving requests from stdin"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read request")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, finishing in-flight requests");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let runner = runner.clone();
        let tx = tx.clone();
        tasks.spawn(async move {
            let response = handle_line(&runner, &line).await;
            match serde_json::to_string(&response) {
                Ok(json) => {
                    let _ = tx.send(json);
                }
                Err(e) => warn!(error = %e, "failed to serialize response"),
            }
        });

        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                warn!(error = %e, "request task failed");
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "request task failed");
        }
    }
    drop(tx);

    writer
        .await
        .context("response writer failed")?
        .context("failed to write response")?;

    if let Some(janitor) = janitor {
        janitor.stop().await;
    }
    Ok(())
}

/// Execute one request line, turning malformed input into an error response
async fn handle_line(runner: &Runner, line: &str) -> ServeResponse {
    match serde_json::from_str::<ServeRequest>(line) {
        Ok(ServeRequest { id, request }) => {
            let outcome = runner.execute(request).await;
            info!(?id, outcome = outcome.kind(), "request complete");
            ServeResponse {
                id,
                result: outcome.into_result(),
            }
        }
        Err(e) => {
            warn!(error = %e, "invalid request");
            ServeResponse {
                id: None,
                result: ExecutionOutcome::InternalError(format!("invalid request: {e}"))
                    .into_result(),
            }
        }
    }
}

fn list_languages(config: &Config) {
    println!("Available languages:\n");

    let mut languages: Vec<_> = config.languages.iter().collect();
    languages.sort_by_key(|(id, _)| *id);

    for (id, lang) in languages {
        let lang_type = if lang.is_compiled() {
            "compiled"
        } else {
            "interpreted"
        };
        println!(
            "  {:<15} {} ({}, {})",
            id, lang.name, lang_type, lang.source_name
        );
    }
}

fn show_config(config: &Config) {
    let limits = &config.default_limits;
    println!("Default resource limits:");
    println!("  Time limit: {:?} s", limits.time_limit);
    println!("  Wall time limit: {:?} s", limits.wall_time_limit);
    println!("  Memory limit: {:?} KB", limits.memory_limit);
    println!("  Stack limit: {:?} KB", limits.stack_limit);
    println!("  Max processes: {:?}", limits.max_processes);
    println!("  Max output: {:?} KB", limits.max_output);
    println!("  Max open files: {:?}", limits.max_open_files);
    println!();
    println!("Workspace root: {}", config.workspace_root().display());
    match config.max_concurrent {
        Some(max) => println!("Max concurrent requests: {max}"),
        None => println!("Max concurrent requests: unbounded"),
    }
    match config.sandbox_user {
        Some(user) => println!("Sandbox user: uid {} gid {}", user.uid, user.gid),
        None => println!("Sandbox user: none (runs as service user)"),
    }
    if config.janitor.enabled {
        println!(
            "Janitor: every {}s, removes workspaces older than {}s",
            config.janitor.interval_secs, config.janitor.max_age_secs
        );
    } else {
        println!("Janitor: disabled");
    }
    println!();
    println!("Languages configured: {}", config.languages.len());
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
