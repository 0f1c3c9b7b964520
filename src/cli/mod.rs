use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ConfigLoader;
use crate::storage::{self, LegacyPreferences, MigrationOutcome};

pub mod commands;

use self::commands::{AdjacentArgs, ListArgs, ShowArgs, WriteArgs};

#[derive(Parser, Debug)]
#[command(
    name = "diary",
    version,
    about = "One rich-text entry per day, kept in a local SQLite store"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over DIARY_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over DIARY_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List dates that have an entry
    List(ListArgs),
    /// Print an entry as plain text (default: today's)
    Show(ShowArgs),
    /// Replace or append to an entry
    Write(WriteArgs),
    /// Find the nearest date with an entry before or after a date
    Adjacent(AdjacentArgs),
    /// Copy the database into the backup directory and rotate old copies
    Backup,
    /// Import entries kept by older releases in the preferences file
    Migrate,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("DIARY_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("DIARY_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = Arc::new(loader.load_or_init()?);
    let store = storage::init(&config.storage)?;
    if store.is_inert() {
        tracing::warn!("running without a usable store, nothing will be saved");
    }

    let command = cli.command.unwrap_or(Commands::Show(ShowArgs { date: None }));
    if !matches!(command, Commands::Migrate) {
        let prefs = LegacyPreferences::new(&paths.legacy_preferences);
        if let MigrationOutcome::Migrated { migrated, skipped } =
            store.migrate_legacy_if_needed(&prefs)
        {
            tracing::info!(migrated, skipped, "imported legacy entries at startup");
        }
    }

    let result = match command {
        Commands::List(args) => commands::list_entries(&store, args),
        Commands::Show(args) => commands::show_entry(&store, args),
        Commands::Write(args) => commands::write_entry(config.clone(), &store, args),
        Commands::Adjacent(args) => commands::adjacent_entry(config.clone(), &store, args),
        Commands::Backup => commands::backup(config.clone(), &store),
        Commands::Migrate => commands::migrate(&store, &paths),
    };
    store.shutdown();
    result
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_dates_and_directions() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "diary",
            "--log-level",
            "debug",
            "adjacent",
            "2024-03-01",
            "--direction",
            "prev",
        ])?;
        assert_eq!(cli.log_level, "debug");
        assert_matches!(
            cli.command,
            Some(Commands::Adjacent(AdjacentArgs { direction, .. }))
                if direction == crate::app::ContentDirection::Previous
        );
        assert!(Cli::try_parse_from(["diary", "show", "2024-13-01"]).is_err());
        Ok(())
    }
}
