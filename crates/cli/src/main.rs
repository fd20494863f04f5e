mod metrics;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use podstore_core::{
    load_config, migrate_repository, open_repository, validate_config, Config,
    EpisodeRepository, Repository, SanitizedConfig, Stage, StorageBackend,
};

/// Config file used when neither `--config` nor `PODSTORE_CONFIG` is given.
const DEFAULT_CONFIG: &str = "podstore.toml";

#[derive(Debug, Parser)]
#[command(name = "podstore", version, about = "Inspect and maintain a podcast store")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "PODSTORE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Open the configured store, creating and migrating its schema
    Init,
    /// Print the number of episodes at each stage
    Stats {
        /// Only count episodes of this podcast
        #[arg(long)]
        podcast_id: Option<i64>,
    },
    /// List failed episodes, most recent failure first
    Failed {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Clear the failure recorded on an episode
    ClearFailure {
        /// Internal episode id
        episode_id: i64,
    },
    /// Copy every podcast from the configured store into another one
    Migrate {
        /// Configuration file describing the target store
        #[arg(long)]
        to: PathBuf,
    },
    /// Print Prometheus metrics, including per-stage episode gauges
    Metrics,
    /// Print the effective configuration with secrets redacted
    ShowConfig,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.json_logs);
    if let Err(e) = run(cli) {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Load and validate a config file. A missing default file means defaults.
fn load(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None if Path::new(DEFAULT_CONFIG).exists() => load_config(Path::new(DEFAULT_CONFIG))
            .with_context(|| format!("Failed to load config from {}", DEFAULT_CONFIG))?,
        None => {
            warn!("No {} found, using default configuration", DEFAULT_CONFIG);
            Config::default()
        }
    };
    validate_config(&config).context("Configuration validation failed")?;
    Ok(config)
}

fn open(config: &Config) -> Result<Box<dyn Repository>> {
    open_repository(config).with_context(|| {
        format!(
            "Failed to open {} store",
            config.storage.backend.as_str()
        )
    })
}

fn run(cli: Cli) -> Result<()> {
    let config = load(cli.config.as_deref())?;
    info!(backend = config.storage.backend.as_str(), "Configuration loaded");

    match cli.command {
        Command::Init => {
            let repo = open(&config)?;
            let migrations = match config.storage.backend {
                StorageBackend::File => Vec::new(),
                StorageBackend::Sqlite => podstore_core::sqlite::migration_names(),
                StorageBackend::Postgres => podstore_core::postgres::migration_names(),
            };
            println!("{} store ready", repo.backend_name());
            for name in migrations {
                println!("  schema: {}", name);
            }
        }
        Command::Stats { podcast_id } => {
            let repo = open(&config)?;
            let counts = repo
                .count_by_state(podcast_id)
                .context("Failed to count episodes")?;
            for stage in Stage::ALL {
                println!("{:<12} {:>8}", stage.as_str(), counts.get(stage));
            }
            println!("{:<12} {:>8}", "failed", counts.failed);
            println!("{:<12} {:>8}", "total", counts.total());
        }
        Command::Failed { limit } => {
            let repo = open(&config)?;
            let failed = repo
                .get_failed_episodes(Some(limit))
                .context("Failed to list failed episodes")?;
            if failed.is_empty() {
                println!("No failed episodes");
            }
            for item in failed {
                let Some(failure) = item.episode.failure.as_ref() else {
                    continue;
                };
                println!(
                    "{:>6}  {}  {} / {}  [{} {}] {}",
                    item.episode.id.unwrap_or_default(),
                    failure.failed_at.to_rfc3339(),
                    item.podcast.title,
                    item.episode.title,
                    failure.kind,
                    failure.stage,
                    failure.reason
                );
            }
        }
        Command::ClearFailure { episode_id } => {
            let repo = open(&config)?;
            if repo.get_episode(episode_id)?.is_none() {
                bail!("Episode {} not found", episode_id);
            }
            if repo
                .clear_failure(episode_id)
                .context("Failed to clear failure")?
            {
                println!("Cleared failure on episode {}", episode_id);
            } else {
                println!("Episode {} was not failed", episode_id);
            }
        }
        Command::Migrate { to } => {
            let target_config = load(Some(&to))?;
            if target_config.storage.backend == config.storage.backend
                && same_location(&config, &target_config)
            {
                bail!("Source and target are the same store");
            }
            let source = open(&config)?;
            let target = open(&target_config)?;
            let report = migrate_repository(source.as_ref(), target.as_ref())
                .context("Migration failed")?;
            println!(
                "Copied {} podcasts, {} episodes, {} transcript links from {} to {}",
                report.podcasts,
                report.episodes,
                report.transcript_links,
                source.backend_name(),
                target.backend_name()
            );
        }
        Command::Metrics => {
            let repo = open(&config)?;
            metrics::collect_store_metrics(repo.as_ref())?;
            print!("{}", metrics::encode_metrics()?);
        }
        Command::ShowConfig => {
            let sanitized = SanitizedConfig::from(&config);
            println!("{}", serde_json::to_string_pretty(&sanitized)?);
        }
    }
    Ok(())
}

fn same_location(a: &Config, b: &Config) -> bool {
    match a.storage.backend {
        StorageBackend::File => a.storage.file.path == b.storage.file.path,
        StorageBackend::Sqlite => a.storage.sqlite.path == b.storage.sqlite.path,
        StorageBackend::Postgres => {
            a.storage.postgres.as_ref().map(|p| &p.url) == b.storage.postgres.as_ref().map(|p| &p.url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["podstore", "clear-failure", "42"]).unwrap();
        assert!(matches!(cli.command, Command::ClearFailure { episode_id: 42 }));

        let cli = Cli::try_parse_from(["podstore", "--config", "a.toml", "migrate", "--to", "b.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("a.toml")));
        assert!(matches!(cli.command, Command::Migrate { ref to } if to == Path::new("b.toml")));

        let cli = Cli::try_parse_from(["podstore", "failed"]).unwrap();
        assert!(matches!(cli.command, Command::Failed { limit: 50 }));
    }

    #[test]
    fn test_same_location() {
        let a = Config::default();
        let mut b = Config::default();
        assert!(same_location(&a, &b));
        b.storage.sqlite.path = PathBuf::from("other.db");
        assert!(!same_location(&a, &b));
    }
}
