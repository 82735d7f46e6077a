use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(about)]
pub struct Cli {
    /// Path to the configuration file.
    ///
    /// Values from the file can be overridden with environment variables prefixed with `GEOEVENT_`, such as
    /// `GEOEVENT_MONGODB_HOST`.
    #[arg(global = true, short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub action: Option<Action>,
}

#[derive(Subcommand)]
pub enum Action {
    /// Reads newline-delimited JSON events from standard input and inserts them into MongoDB.
    #[command(name = "run")]
    Run(RunConfig),

    /// Prints the transport definition, including every configurable property, as JSON.
    #[command(name = "describe")]
    Describe,
}

/// Run configuration.
#[derive(Args, Clone, Debug)]
pub struct RunConfig {
    /// Keep inserted documents in memory instead of connecting to MongoDB.
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum number of events handled concurrently.
    #[arg(short = 'w', long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    pub workers: u32,

    /// Identifier of the transport instance, used to label logs and metrics.
    #[arg(long, default_value = "mongodb_out")]
    pub component_id: String,

    /// Channel identifier attached to every event read from standard input.
    #[arg(long, default_value = "stdin")]
    pub channel_id: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            workers: 4,
            component_id: "mongodb_out".to_string(),
            channel_id: "stdin".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults_match_parser() {
        let cli = Cli::try_parse_from(["mongodb-outbound", "run"]).unwrap();
        let Some(Action::Run(config)) = cli.action else {
            panic!("expected run action");
        };

        let defaults = RunConfig::default();
        assert_eq!(config.dry_run, defaults.dry_run);
        assert_eq!(config.workers, defaults.workers);
        assert_eq!(config.component_id, defaults.component_id);
        assert_eq!(config.channel_id, defaults.channel_id);
    }

    #[test]
    fn rejects_zero_workers() {
        assert!(Cli::try_parse_from(["mongodb-outbound", "run", "--workers", "0"]).is_err());
    }

    #[test]
    fn global_config_flag() {
        let cli = Cli::try_parse_from(["mongodb-outbound", "run", "--dry-run", "-c", "/etc/geoevent.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/geoevent.yaml")));
        assert!(matches!(cli.action, Some(Action::Run(RunConfig { dry_run: true, .. }))));
    }
}
