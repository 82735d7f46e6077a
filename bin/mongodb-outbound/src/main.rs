//! MongoDB outbound transport host.
//!
//! Reads newline-delimited JSON events from standard input and hands each one to a MongoDB outbound transport, which
//! inserts it as a document. The transport's lifecycle is driven from signals: `SIGHUP` reloads the configuration, and
//! `SIGINT`/`SIGTERM` (or the end of input) stop it.

#![deny(warnings)]
#![deny(missing_docs)]

use clap::Parser as _;
use geoevent_app::prelude::*;
use mongodb_transport::service::MongoDbOutboundTransportService;
use tracing::{error, info};

mod config;
use self::config::{Action, Cli, RunConfig};

mod run;
use self::run::{load_configuration, run};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let run_config = match cli.action {
        Some(Action::Describe) => {
            let service = MongoDbOutboundTransportService::new();
            match serde_json::to_string_pretty(service.definition()) {
                Ok(rendered) => println!("{}", rendered),
                Err(e) => fatal_and_exit(format!("failed to render transport definition: {}", e)),
            }
            return;
        }
        Some(Action::Run(run_config)) => run_config,
        // If no subcommand is provided, the run subcommand is executed with the default configuration.
        None => RunConfig::default(),
    };

    let configuration = load_configuration(cli.config)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to load configuration: {:?}", e)));
    let logging_config = LoggingConfiguration::from_configuration(&configuration)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to load logging configuration: {:?}", e)));
    let _guard = initialize_logging(&logging_config)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to initialize logging: {}", e)));

    match run(run_config, configuration).await {
        Ok(()) => info!("MongoDB outbound transport stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}
