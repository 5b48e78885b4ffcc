//! update-fetcher command-line entry point

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;

use cli::{CheckArgs, CleanArgs, Cli, Command, FetchArgs};
use update_fetcher::core::utils::format_file_size;
use update_fetcher::logging::{LogFormat, LogLevel, LoggingConfig, LoggingSystem};
use update_fetcher::transfer::ProgressCallback;
use update_fetcher::{
    ArtifactKey, CommandInstaller, FetcherConfig, FlowOutcome, ManifestClient, UpdateCoordinator,
    UpdateFlow, UpdateSpec, Version,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging_config = LoggingConfig::new()
        .with_level(LogLevel::from_verbosity(cli.verbose))
        .with_format(if cli.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Text
        });
    let _logging = match LoggingSystem::init(logging_config) {
        Ok(system) => Some(system),
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    let config = FetcherConfig::load(cli.config.as_deref()).context("loading configuration")?;
    tracing::debug!(cache_dir = %config.cache_dir.display(), "Configuration loaded");

    match cli.command {
        Command::Fetch(args) => fetch(config, args).await,
        Command::Check(args) => check(config, args).await,
        Command::Clean(args) => clean(config, args).await,
        Command::Config => print_json(&config),
    }
}

async fn fetch(config: FetcherConfig, args: FetchArgs) -> Result<()> {
    let mut builder = UpdateSpec::builder(args.url);
    if let Some(digest) = args.digest {
        builder = builder.digest(digest);
    }
    if let Some(size) = args.size {
        builder = builder.size(size);
    }
    if let Some(key) = args.key {
        builder = builder.destination_key(key);
    }
    if args.allow_unverified {
        builder = builder.allow_unverified();
    }
    let spec = builder.build().context("invalid artifact request")?;

    let coordinator = UpdateCoordinator::new(config)?.with_progress_callback(log_progress());
    let ticket = coordinator.begin_update(spec);

    let handle = tokio::select! {
        result = ticket.clone().wait() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(key = %ticket.key(), "Interrupted, cancelling");
            ticket.cancel();
            ticket.wait().await?
        }
    };

    tracing::info!(
        key = %handle.key,
        size = %format_file_size(handle.size),
        path = %handle.path.display(),
        "Artifact ready"
    );
    print_json(&handle)
}

#[derive(Serialize)]
struct CheckReport {
    current: String,
    available: Option<String>,
    installed: Option<String>,
}

async fn check(config: FetcherConfig, args: CheckArgs) -> Result<()> {
    let current = Version::parse(&args.current)?;
    let client = ManifestClient::new(args.manifest, &config.http)?;

    let Some(program) = args.install_with else {
        let manifest = client.fetch().await?;
        let available = manifest.is_newer_than(&current).then(|| manifest.version.to_string());
        return print_json(&CheckReport {
            current: current.to_string(),
            available,
            installed: None,
        });
    };

    let coordinator = UpdateCoordinator::new(config)?.with_progress_callback(log_progress());
    let installer = CommandInstaller::new(program).args(args.install_args);
    let flow = UpdateFlow::new(client, coordinator.clone(), Arc::new(installer))
        .allow_unverified(args.allow_unverified);

    let outcome = tokio::select! {
        outcome = flow.run(&current) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            for key in coordinator.in_flight() {
                coordinator.cancel(&key);
            }
            anyhow::bail!("interrupted");
        }
    };

    let report = match outcome {
        FlowOutcome::UpToDate => CheckReport {
            current: current.to_string(),
            available: None,
            installed: None,
        },
        FlowOutcome::Installed(handle) => CheckReport {
            current: current.to_string(),
            available: Some(handle.key.to_string()),
            installed: Some(handle.path.display().to_string()),
        },
    };
    print_json(&report)
}

async fn clean(config: FetcherConfig, args: CleanArgs) -> Result<()> {
    let keep = args
        .keep
        .into_iter()
        .map(ArtifactKey::new)
        .collect::<Result<Vec<_>, _>>()?;

    let coordinator = UpdateCoordinator::new(config)?;
    let removed = coordinator.retain_only(&keep).await?;
    tracing::info!(removed = removed.len(), "Cache cleaned");
    print_json(&removed)
}

fn log_progress() -> ProgressCallback {
    Arc::new(|progress| {
        tracing::info!(
            key = %progress.key,
            written = %format_file_size(progress.bytes_written),
            percent = progress.percentage,
            "Downloading"
        );
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
