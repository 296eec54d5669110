pub mod api;
pub mod assignment;
mod auth;
pub mod config;
pub mod credentials;
pub mod firebase;
pub mod identifiers;
pub mod matcher;
pub mod metrics_defs;
pub mod store;
#[cfg(test)]
mod testutils;
pub mod types;
pub mod upload;

use config::{Config, ValidationError};
use firebase::FirebaseStore;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::io;
use std::sync::Arc;
use store::{DocumentStore, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum SponsorshipError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),
    #[error("store setup failed: {0}")]
    Store(#[from] StoreError),
}

/// Runs the public API and the admin listener until either fails.
pub async fn run(config: Config) -> Result<(), SponsorshipError> {
    config.validate()?;

    let firebase = Arc::new(FirebaseStore::new(&config.store)?);
    if let Err(e) = firebase.warm_up().await {
        // Not fatal, the token is fetched again on the first request.
        tracing::error!(error = %e, "Could not obtain store credentials");
    }

    let store: Arc<dyn DocumentStore> = firebase.clone();
    let api_task = api::serve(&config.listener, api::router(&config, store));

    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::<_, SponsorshipError>::new(move || firebase.is_ready()),
    );

    tokio::try_join!(api_task, admin_task)?;
    Ok(())
}
