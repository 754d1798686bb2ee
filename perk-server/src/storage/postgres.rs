//! PostgreSQL key store
//!
//! One row per record URI. Create-if-absent relies on the primary key:
//! `INSERT ... ON CONFLICT DO NOTHING` returns no row when the URI exists.

use async_trait::async_trait;
use perk_core::keystore::new_issuer_id;
use perk_core::{KeyStore, StoreError, StoredEntry};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// PostgreSQL-backed key store
pub struct PostgresKeyStore {
    pool: PgPool,
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    uri: String,
    issuer_id: String,
    value: Value,
}

impl EntryRow {
    fn into_entry(self) -> StoredEntry {
        StoredEntry {
            value: self.value,
            issuer_id: self.issuer_id,
        }
    }
}

impl PostgresKeyStore {
    /// Connect with a bounded pool
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(backend)?;

        tracing::info!("Connected to PostgreSQL database");
        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Check database connection health
    pub async fn check_health(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl KeyStore for PostgresKeyStore {
    async fn uris(&self) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar("SELECT uri FROM perk_keystore ORDER BY uri")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)
    }

    async fn get(&self, uri: &str) -> Result<Option<StoredEntry>, StoreError> {
        let row = sqlx::query_as::<_, EntryRow>(
            "SELECT uri, issuer_id, value FROM perk_keystore WHERE uri = $1",
        )
        .bind(uri)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(EntryRow::into_entry))
    }

    async fn get_by_issuer(
        &self,
        issuer_id: &str,
    ) -> Result<Option<(String, StoredEntry)>, StoreError> {
        let row = sqlx::query_as::<_, EntryRow>(
            "SELECT uri, issuer_id, value FROM perk_keystore WHERE issuer_id = $1",
        )
        .bind(issuer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(|row| (row.uri.clone(), row.into_entry())))
    }

    async fn put(&self, uri: &str, value: Value, allow_update: bool) -> Result<String, StoreError> {
        let issuer_id = new_issuer_id();

        let stored: Option<String> = if allow_update {
            // issuer_id of an existing row is kept
            sqlx::query_scalar(
                r#"
                INSERT INTO perk_keystore (uri, issuer_id, value)
                VALUES ($1, $2, $3)
                ON CONFLICT (uri) DO UPDATE SET
                    value = EXCLUDED.value,
                    updated_at = NOW()
                RETURNING issuer_id
                "#,
            )
            .bind(uri)
            .bind(&issuer_id)
            .bind(&value)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
        } else {
            sqlx::query_scalar(
                r#"
                INSERT INTO perk_keystore (uri, issuer_id, value)
                VALUES ($1, $2, $3)
                ON CONFLICT (uri) DO NOTHING
                RETURNING issuer_id
                "#,
            )
            .bind(uri)
            .bind(&issuer_id)
            .bind(&value)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
        };

        stored.ok_or_else(|| StoreError::Conflict(uri.to_string()))
    }

    async fn remove(&self, uri: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM perk_keystore WHERE uri = $1")
            .bind(uri)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_health().await
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}
