use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use vigil::auth::CredentialStore;
use vigil::config::Config;
use vigil::server::{Server, signal};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = Config::load(config_path.as_deref())?;

    let creds = match &cfg.credentials {
        Some(path) => {
            let store = CredentialStore::load(path)?;
            tracing::info!(users = store.len(), "credentials loaded");
            store
        }
        None => CredentialStore::empty(),
    };

    let mut server = Server::new(cfg, Arc::new(creds))?;
    signal::install(&server.shutdown_handle())?;
    server.run()
}
