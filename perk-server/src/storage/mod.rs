//! Key store backends
//!
//! PostgreSQL when `DATABASE_URL` is set, otherwise the in-memory store from
//! perk-core (useful for development, but credentials are lost on restart).

mod postgres;

pub use postgres::PostgresKeyStore;

use std::sync::Arc;

use perk_core::{KeyStore, MemoryKeyStore, StoreError};

use crate::config::Config;

/// Open the key store the configuration selects
pub async fn open_store(config: &Config) -> Result<Arc<dyn KeyStore>, StoreError> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresKeyStore::connect(url, config.database_max_connections).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("Using in-memory key store - credentials will be lost on restart!");
            Ok(Arc::new(MemoryKeyStore::new()))
        }
    }
}
