//! Database layer for FieldForm
//!
//! Provides:
//! - SeaORM entity models
//! - The `SurveyStore` persistence seam and its Postgres repository
//! - Connection pool management and schema migrations

pub mod models;
mod repository;
mod store;

#[cfg(any(test, feature = "testing"))]
mod memory;

pub use repository::Repository;
pub use store::{
    display_id, AppendOutcome, CreateFormOutcome, EncryptedPostgres, EncryptedService, FormDraft,
    NewResponse, NewTenant, ResponseRecord, StorageUpdateOutcome, SurveyStore,
    TenantStorageUpdate,
};

#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryStore;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

fn connect_options(url: &str, config: &DatabaseConfig) -> ConnectOptions {
    let mut opts = ConnectOptions::new(url);
    opts.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(false);
    opts
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");

        let primary = Database::connect(connect_options(&config.url, config))
            .await
            .map_err(|e| AppError::StorageUnavailable {
                message: format!("Failed to connect to primary: {}", e),
            })?;

        let replica = match config.read_url {
            Some(ref read_url) => {
                info!("Connecting to read replica...");
                let replica = Database::connect(connect_options(read_url, config))
                    .await
                    .map_err(|e| AppError::StorageUnavailable {
                        message: format!("Failed to connect to replica: {}", e),
                    })?;
                Some(replica)
            }
            None => None,
        };

        info!("Database connections established");

        Ok(Self { primary, replica })
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Apply pending migrations from `crates/common/migrations`
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");

        sqlx::migrate!("./migrations")
            .run(self.primary.get_postgres_connection_pool())
            .await
            .map_err(|e| AppError::Configuration {
                message: format!("Migration failed: {}", e),
            })?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::StorageUnavailable {
                message: format!("Primary ping failed: {}", e),
            })?;

        if let Some(ref replica) = self.replica {
            replica
                .execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::StorageUnavailable {
                    message: format!("Replica ping failed: {}", e),
                })?;
        }

        Ok(())
    }
}
