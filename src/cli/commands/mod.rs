//! CLI command definitions and dispatch.
//!
//! Each group of subcommands lives in its own submodule:
//! - `pipeline`: full runs, the migration pre-pass and verification
//! - `inspect`: store status and filename/fingerprint inspection
//! - `settings`: config file management

mod inspect;
mod pipeline;
mod settings;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio::runtime::Runtime;

use media_reconciler::config::{self, Config};

pub use inspect::{cmd_identify, cmd_status};
pub use pipeline::{cmd_migrate, cmd_run, cmd_verify};
pub use settings::cmd_config;

/// Media Reconciler CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand. They override the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file (defaults to the OS config directory)
    #[arg(long, global = true, env = "MEDIA_RECONCILER_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Library root directory
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Creator whose records are reconciled
    #[arg(long, global = true)]
    pub owner: Option<i64>,

    /// Maximum candidates reconciled at once
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Keep duplicate files instead of deleting them
    #[arg(long, global = true)]
    pub keep_duplicates: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

impl GlobalArgs {
    /// Load the config file and apply command-line overrides.
    ///
    /// An explicit `--config` must exist and parse; the default location
    /// falls back to defaults.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => config::load_from(path)?,
            None => config::load(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut Config) {
        if let Some(db) = &self.db {
            config.database.path = Some(db.clone());
        }
        if let Some(root) = &self.root {
            config.library.root = Some(root.clone());
        }
        if let Some(owner) = self.owner {
            config.library.owner_id = Some(owner);
        }
        if let Some(concurrency) = self.concurrency {
            config.pipeline.max_concurrency = concurrency;
        }
        if self.keep_duplicates {
            config.pipeline.delete_duplicates = false;
        }
    }
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline: migration, reconciliation and verification
    Run {
        /// Skip the legacy marker migration
        #[arg(long)]
        no_migrate: bool,
        /// Skip the verification pass
        #[arg(long)]
        no_verify: bool,
    },
    /// Run only the legacy marker migration
    Migrate,
    /// Mark records whose files are gone as not downloaded
    Verify,
    /// Show record counts in the identity store
    Status,
    /// Print the identity markers and fingerprint of a file
    Identify {
        /// Path to the media file
        path: PathBuf,
    },
    /// Show the config file location, or write one with default values
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let global = &cli.global;

    match &cli.command {
        Commands::Run {
            no_migrate,
            no_verify,
        } => {
            let rt = Runtime::new()?;
            let mut config = global.load_config()?;
            if *no_migrate {
                config.pipeline.migrate_legacy = false;
            }
            if *no_verify {
                config.pipeline.verify_after = false;
            }
            cmd_run(&rt, &config, global.json)
        }
        Commands::Migrate => {
            let rt = Runtime::new()?;
            cmd_migrate(&rt, &global.load_config()?, global.json)
        }
        Commands::Verify => {
            let rt = Runtime::new()?;
            cmd_verify(&rt, &global.load_config()?, global.json)
        }
        Commands::Status => {
            let rt = Runtime::new()?;
            cmd_status(&rt, &global.load_config()?, global.json)
        }
        Commands::Identify { path } => cmd_identify(path, global.json),
        Commands::Config { init } => cmd_config(&global.load_config()?, *init),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "media-reconciler",
            "run",
            "--root",
            "/media",
            "--owner",
            "7",
            "--keep-duplicates",
            "--json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Run { .. }));
        assert_eq!(cli.global.owner, Some(7));
        assert!(cli.global.json);
    }

    #[test]
    fn test_overrides_replace_config_values() {
        let args = GlobalArgs {
            db: Some(PathBuf::from("/tmp/x.db")),
            root: Some(PathBuf::from("/media")),
            owner: Some(3),
            concurrency: Some(4),
            keep_duplicates: true,
            ..Default::default()
        };
        let mut config = Config::default();
        config.library.owner_id = Some(1);
        args.apply(&mut config);

        assert_eq!(config.library.owner_id, Some(3));
        assert_eq!(config.library.root.as_deref(), Some(std::path::Path::new("/media")));
        assert_eq!(config.pipeline.max_concurrency, 4);
        assert!(!config.pipeline.delete_duplicates);
        assert_eq!(config.db_url(), "sqlite:/tmp/x.db");
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let args = GlobalArgs {
            config: Some(PathBuf::from("/nonexistent/media-reconciler.toml")),
            ..Default::default()
        };
        assert!(args.load_config().is_err());
    }
}
