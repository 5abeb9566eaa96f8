//! # deployctl
//!
//! Submits a deployment job to the control plane and, unless told not to,
//! waits for it and prints the decrypted outputs as JSON on stdout.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin deployctl -- deploy --config config/deployctl.toml \
//!   --project shop --env staging --manifest config/deploy.yaml --timeout 300
//!
//! # Read the manifest from stdin and only plan
//! cat deploy.yaml | cargo run --bin deployctl -- deploy --config config/deployctl.toml \
//!   --project shop --env staging --manifest - --mode plan-only
//!
//! cargo run --bin deployctl -- status --config config/deployctl.toml --job-id <id>
//! ```
//!
//! Exit codes: 0 on success, 2 when the job failed, 3 when the wait deadline
//! passed, 1 for everything else.

use std::fmt;
use std::io::{Read, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use env_logger::Builder;
use log::{error, info, LevelFilter};

use sealed_deploy::common::config::ClientConfig;
use sealed_deploy::common::messages::format_timestamp;
use sealed_deploy::{
    ControlPlane, DeployClient, Deployment, Error, HttpControlPlane, Mode, Target, WaitMode,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a job and wait for its outputs
    Deploy(DeployArgs),
    /// Show the current state of a job
    Status(StatusArgs),
}

#[derive(ClapArgs)]
struct ConnectionArgs {
    /// Path to the client configuration file (TOML format)
    #[arg(short, long)]
    config: String,

    /// Bearer token, overriding the one in the config file
    #[arg(long, env = "DEPLOYCTL_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,
}

impl fmt::Debug for ConnectionArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionArgs")
            .field("config", &self.config)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(ClapArgs, Debug)]
struct DeployArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[arg(long)]
    project: String,

    #[arg(long)]
    env: String,

    /// Manifest file (YAML or JSON), or `-` for stdin
    #[arg(short, long)]
    manifest: String,

    /// `deploy` or `plan-only`
    #[arg(long, default_value = "deploy")]
    mode: Mode,

    /// Overall wait deadline in seconds (defaults to the config value)
    #[arg(long)]
    timeout: Option<u64>,

    /// Return right after submission; the outputs will not be retrievable
    #[arg(long)]
    no_wait: bool,

    /// Path to write wait statistics as JSON
    #[arg(long)]
    metrics_output: Option<String>,
}

#[derive(ClapArgs, Debug)]
struct StatusArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[arg(long)]
    job_id: String,
}

/// Initialize the logging system with timestamp, level, and message formatting.
///
/// Logs go to stderr so stdout only carries outputs.
/// Format: `[HH:MM:SS] [LEVEL] message`
fn init_logger() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

fn load_config(connection: &ConnectionArgs) -> anyhow::Result<ClientConfig> {
    let mut config = ClientConfig::from_file(&connection.config)?;
    if let Some(token) = &connection.api_token {
        config.control_plane.api_token = Some(token.clone());
    }
    Ok(config)
}

fn read_manifest(source: &str) -> anyhow::Result<String> {
    if source == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read manifest from stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(source).with_context(|| format!("failed to read manifest {source}"))
    }
}

async fn deploy(args: DeployArgs) -> anyhow::Result<()> {
    let config = load_config(&args.connection)?;
    let manifest = read_manifest(&args.manifest)?;

    let plane = Arc::new(HttpControlPlane::new(&config.control_plane)?);
    let client = DeployClient::new(plane, &config.wait);

    let wait = if args.no_wait {
        WaitMode::Detach
    } else {
        WaitMode::Wait(args.timeout.map(Duration::from_secs))
    };

    let (result, stats) = client
        .deploy_with_stats(Target::new(args.project, args.env), &manifest, args.mode, wait)
        .await;

    if let (Some(stats), Some(path)) = (&stats, &args.metrics_output) {
        stats.export_to_json(path)?;
        info!("📊 Wait statistics exported to {}", path);
    }

    match result? {
        Deployment::Submitted(job) => {
            println!("{}", job.id);
        }
        Deployment::Completed { job_id, outputs } => {
            info!("🎉 Job {} succeeded", job_id);
            match outputs.to_json() {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(_) => println!("{}", String::from_utf8_lossy(outputs.as_bytes())),
            }
        }
    }

    Ok(())
}

async fn status(args: StatusArgs) -> anyhow::Result<()> {
    let config = load_config(&args.connection)?;
    let plane = HttpControlPlane::new(&config.control_plane)?;

    let job = plane.get_job(&args.job_id).await?;

    println!("id:        {}", job.id);
    println!("target:    {}/{}", job.project_id, job.env_id);
    println!("mode:      {}", job.mode);
    println!("status:    {}", job.status);
    if let Some(message) = &job.status_message {
        println!("message:   {}", message);
    }
    println!("created:   {}", format_timestamp(&job.created_at));
    if let Some(completed_at) = &job.completed_at {
        println!("completed: {}", format_timestamp(completed_at));
    }

    Ok(())
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<Error>() {
        Some(Error::JobFailed { .. }) => ExitCode::from(2),
        Some(Error::DeadlineExceeded { .. }) => ExitCode::from(3),
        _ => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logger();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Deploy(args) => deploy(args).await,
        Command::Status(args) => status(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("❌ {:#}", err);
            exit_code(&err)
        }
    }
}
