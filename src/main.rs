use backoffice_client::auth_service::AuthService;
use backoffice_client::cli::{Cli, handle_command};
use backoffice_client::config::{Config, StorageBackend, load_config, load_config_from};
use backoffice_client::credential_store::{
    CredentialStore, MemoryCredentialStore, PersistentCredentialStore,
};
use backoffice_client::dispatch::{Dispatcher, ReqwestTransport, SessionEvent};
use backoffice_client::errors::AppError;
use backoffice_client::logger::setup_logging;
use backoffice_client::token_storage::TokenStorage;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Failed to load config: {}", e);
        std::process::exit(1);
    });
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    // Keep the guard alive so file logs are flushed
    let _guard = setup_logging(&config).unwrap_or_else(|e| {
        eprintln!("Failed to set up logging: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = run(cli, config).await {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: Config) -> Result<(), AppError> {
    let store = open_credential_store(&config)?;
    let transport = ReqwestTransport::from_config(&config).map_err(|e| AppError::Generic {
        message: format!("Failed to create HTTP client: {}", e),
    })?;

    let dispatcher = Dispatcher::new(transport, store, &config.auth).on_session_expired(|error| {
        eprintln!("Your session has expired ({}). Please log in again.", error);
    });
    let events = dispatcher.subscribe();
    let dispatcher = Arc::new(dispatcher);
    let listener = tokio::spawn(log_session_events(events));

    let service = AuthService::new(dispatcher, &config.auth);
    let result = handle_command(cli.command, &service).await;

    listener.abort();
    result
}

fn open_credential_store(config: &Config) -> Result<Arc<dyn CredentialStore>, AppError> {
    let store: Arc<dyn CredentialStore> = match config.session.storage {
        StorageBackend::Keyring => Arc::new(PersistentCredentialStore::open(TokenStorage::new(
            config.session_file_path(),
        )?)),
        StorageBackend::File => Arc::new(PersistentCredentialStore::open(
            TokenStorage::file_only(config.session_file_path())?,
        )),
        StorageBackend::Memory => Arc::new(MemoryCredentialStore::new()),
    };
    Ok(store)
}

async fn log_session_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Renewed) => tracing::debug!("Session renewed"),
            Ok(SessionEvent::Expired { reason }) => {
                tracing::warn!("Session expired: {}", reason)
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Missed {} session events", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
