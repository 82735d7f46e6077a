use std::{path::PathBuf, sync::Arc};

use bytes::BytesMut;
use geoevent_config::{ConfigurationLoader, ErrorContext as _, GenericConfiguration, GenericError};
use mongodb_transport::{
    service::MongoDbOutboundTransportService,
    store::{DocumentStore, MemoryStore, MongoStore},
    OutboundTransport, RunningState,
};
use tokio::{
    io::{stdin, AsyncBufReadExt as _, BufReader},
    select,
    signal::unix::{signal, SignalKind},
    sync::Semaphore,
    task::spawn_blocking,
};
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "GEOEVENT";

/// Loads the host configuration.
///
/// The configuration file, if given, must exist. Environment variables prefixed with [`ENV_PREFIX`] are layered on
/// top.
pub fn load_configuration(path: Option<PathBuf>) -> Result<GenericConfiguration, GenericError> {
    let mut loader = ConfigurationLoader::default();
    if let Some(path) = path {
        loader = loader.from_yaml(path);
    }

    loader
        .from_environment(ENV_PREFIX)
        .error_context("Failed to configure environment variable source.")?
        .into_generic()
        .error_context("Failed to load configuration.")
}

/// Runs the transport until standard input is exhausted or a shutdown signal is received.
///
/// `SIGHUP` re-reads the configuration and applies it to the transport.
pub async fn run(run_config: RunConfig, configuration: GenericConfiguration) -> Result<(), GenericError> {
    info!(
        component_id = %run_config.component_id,
        dry_run = run_config.dry_run,
        workers = run_config.workers,
        "MongoDB outbound transport starting..."
    );

    let store: Arc<dyn DocumentStore> = if run_config.dry_run {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(MongoStore::new())
    };

    let service = MongoDbOutboundTransportService::new();
    let transport: Arc<dyn OutboundTransport> = Arc::from(
        service
            .create_transport(run_config.component_id.clone(), configuration.clone(), store)
            .error_context("Failed to create transport.")?,
    );

    let started = {
        let transport = Arc::clone(&transport);
        spawn_blocking(move || transport.start())
            .await
            .error_context("Transport start task failed.")?
    };
    if started.is_err() {
        warn!("Transport failed to start. Events will be dropped until the configuration is fixed and reloaded.");
    }

    let mut sigint = signal(SignalKind::interrupt()).error_context("Failed to set up SIGINT handler.")?;
    let mut sigterm = signal(SignalKind::terminate()).error_context("Failed to set up SIGTERM handler.")?;
    let mut sighup = signal(SignalKind::hangup()).error_context("Failed to set up SIGHUP handler.")?;

    let workers = Arc::new(Semaphore::new(run_config.workers as usize));
    let channel_id: Arc<str> = Arc::from(run_config.channel_id.as_str());
    let mut reader = BufReader::new(stdin());
    let mut line = Vec::new();

    loop {
        select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading configuration...");
                let configuration = configuration.clone();
                let transport = Arc::clone(&transport);
                spawn_blocking(move || reload(&configuration, transport.as_ref()))
                    .await
                    .error_context("Configuration reload task failed.")?;
            }
            result = reader.read_until(b'\n', &mut line) => {
                let read = result.error_context("Failed to read from standard input.")?;
                if read == 0 {
                    info!("Reached end of input, shutting down...");
                    break;
                }

                let event = trim_line_ending(&line);
                if !event.is_empty() {
                    let permit = Arc::clone(&workers)
                        .acquire_owned()
                        .await
                        .error_context("Worker pool closed.")?;
                    let mut buffer = BytesMut::from(event);
                    let transport = Arc::clone(&transport);
                    let channel_id = Arc::clone(&channel_id);
                    spawn_blocking(move || {
                        transport.receive(&mut buffer, &channel_id);
                        drop(permit);
                    });
                }
                line.clear();
            }
        }
    }

    // Wait for in-flight events before releasing the connection.
    let _all = workers
        .acquire_many(run_config.workers)
        .await
        .error_context("Worker pool closed.")?;

    let stopped = Arc::clone(&transport);
    spawn_blocking(move || stopped.stop())
        .await
        .error_context("Transport stop task failed.")?;

    let statistics = transport.statistics();
    info!(
        events_received = statistics.events_received,
        documents_inserted = statistics.documents_inserted,
        events_dropped_not_started = statistics.events_dropped_not_started,
        decode_errors = statistics.decode_errors,
        parse_errors = statistics.parse_errors,
        insert_errors = statistics.insert_errors,
        "Transport statistics."
    );

    Ok(())
}

fn reload(configuration: &GenericConfiguration, transport: &dyn OutboundTransport) {
    if let Err(e) = configuration.reload() {
        error!(error = %e, "Failed to reload configuration. Keeping the current configuration.");
        return;
    }

    match transport.apply_configuration() {
        Ok(()) => debug!(state = %transport.running_state(), "Applied reloaded configuration."),
        Err(e) => error!(error = %e, "Failed to apply reloaded configuration."),
    }

    // A transport left in error by an earlier failure only recovers through an explicit start.
    if transport.running_state() == RunningState::Error {
        match transport.start() {
            Ok(()) => debug!(state = %transport.running_state(), "Restarted transport after reload."),
            Err(e) => debug!(error = %e, state = %transport.running_state(), "Transport still failing after reload."),
        }
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
