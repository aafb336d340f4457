//! ciflow - credential-gated fixture verification and test pipeline
//!
//! Runs the pipeline defined in `ciflow.toml`, or computes and validates
//! fixture digests by hand.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use ciflow::config::PipelineConfig;
use ciflow::credentials::RunCredentials;
use ciflow::events::LoggingEventSink;
use ciflow::fixtures::DEFAULT_FILE_FILTER;
use ciflow::integrity::{digest_listing, DigestAlgorithm, IntegrityVerifier};
use ciflow::pipeline::PipelineController;
use ciflow::trigger::{Trigger, TriggerKind};
use clap::{Parser, Subcommand, ValueEnum};
use regex::Regex;
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Exit code for configuration and usage errors.
const EXIT_CONFIG_ERROR: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "ciflow")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Pipeline definition.
    #[arg(short, long, default_value = "ciflow.toml", env = "CIFLOW_CONFIG")]
    config: PathBuf,

    /// Log filter, e.g. `info` or `ciflow=debug`. `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log line format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Override the trigger derived from `GITHUB_EVENT_NAME`.
    #[arg(long, value_enum)]
    trigger: Option<TriggerKind>,

    /// Pull request target branch; defaults to `GITHUB_BASE_REF`.
    #[arg(long)]
    target_branch: Option<String>,

    /// Commit the coverage is reported against.
    #[arg(long, env = "GITHUB_SHA")]
    commit: Option<String>,

    /// Stage fixtures into this (empty) directory instead of a temporary one.
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Leave the staging area on disk after the run.
    #[arg(long)]
    keep_staging: bool,

    /// Result report format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline (default).
    Run,

    /// Compute the aggregate digest of a fixture directory.
    Digest {
        /// Directory to digest.
        dir: PathBuf,

        /// Hash function.
        #[arg(long, value_enum, default_value_t = DigestAlgorithm::Md5)]
        algorithm: DigestAlgorithm,

        /// Regex on file names selecting fixtures.
        #[arg(long, default_value = DEFAULT_FILE_FILTER)]
        filter: String,

        /// Fail unless the aggregate equals this digest.
        #[arg(long)]
        expected: Option<String>,

        /// Print the per-file listing the aggregate is computed over.
        #[arg(long)]
        list: bool,
    },

    /// Load and validate the pipeline definition.
    Validate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    let outcome = match &cli.command {
        None | Some(Commands::Run) => run_pipeline(&cli).await,
        Some(Commands::Digest {
            dir,
            algorithm,
            filter,
            expected,
            list,
        }) => digest(dir, *algorithm, filter, expected.as_deref(), *list),
        Some(Commands::Validate) => validate(&cli.config),
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %format!("{e:#}"), "ciflow failed");
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::from_file(path)
        .with_context(|| format!("failed to load pipeline definition {}", path.display()))
}

async fn run_pipeline(cli: &Cli) -> Result<u8> {
    let args = &cli.run;
    let mut config = load_config(&cli.config)?;
    if let Some(dir) = &args.staging_dir {
        config.fetch.staging_dir = Some(dir.clone());
    }

    let trigger = resolve_trigger(args);
    let credentials = RunCredentials::from_env(&config.credentials);

    let controller = PipelineController::from_config(config, args.commit.as_deref())
        .context("invalid pipeline definition")?
        .with_event_sink(Arc::new(LoggingEventSink::default()))
        .with_keep_staging(args.keep_staging);

    let result = controller.run(&credentials, trigger).await;
    match args.output {
        OutputFormat::Text => print!("{}", result.summary()),
        OutputFormat::Json => println!("{}", result.to_json().context("failed to render result")?),
    }
    Ok(result.exit_code())
}

fn resolve_trigger(args: &RunArgs) -> Trigger {
    let env = |key: &str| std::env::var(key).ok();
    let mut trigger = match args.trigger {
        Some(kind) => Trigger {
            kind,
            target_branch: match kind {
                TriggerKind::PullRequest => env("GITHUB_BASE_REF").filter(|b| !b.is_empty()),
                _ => None,
            },
        },
        None => Trigger::from_github_env(env),
    };
    if let Some(branch) = &args.target_branch {
        trigger.target_branch = Some(branch.clone());
    }
    trigger
}

fn digest(
    dir: &Path,
    algorithm: DigestAlgorithm,
    filter: &str,
    expected: Option<&str>,
    list: bool,
) -> Result<u8> {
    let filter = Regex::new(filter).context("invalid --filter")?;
    let verifier = IntegrityVerifier::new(algorithm, filter);

    let summary = match expected {
        Some(expected) => match verifier.verify_dir(dir, expected) {
            Ok(summary) => summary,
            Err(e) => {
                eprintln!("{e}");
                return Ok(1);
            }
        },
        None => verifier
            .compute(dir)
            .with_context(|| format!("failed to digest {}", dir.display()))?,
    };

    if list {
        print!("{}", digest_listing(&summary.records));
    }
    println!("{}  ({} files, {})", summary.aggregate, summary.records.len(), algorithm);
    Ok(0)
}

fn validate(path: &Path) -> Result<u8> {
    let config = load_config(path)?;
    println!(
        "{}: ok ({} fixture entries, expected {} digest {})",
        path.display(),
        config.manifest.entries.len(),
        config.manifest.algorithm,
        config.manifest.expected_digest
    );
    Ok(0)
}
