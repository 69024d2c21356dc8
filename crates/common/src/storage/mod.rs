//! Storage router
//!
//! Decides where a new form's responses live. The decision is made once at
//! form creation and persisted on the form row; later credential changes do
//! not move existing forms.

use std::sync::OnceLock;

use rand::Rng;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::models::{StorageClass, StoragePreference, Tenant};
use crate::errors::{AppError, Result};
use crate::vault::CredentialVault;

/// Table receiving responses for every form without a tenant-owned store
pub const SHARED_RESPONSES_TABLE: &str = "responses_shared";

/// Where a form's responses go
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageRoute {
    pub class: StorageClass,
    pub target_table: String,
}

impl StorageRoute {
    pub fn shared() -> Self {
        Self {
            class: StorageClass::Shared,
            target_table: SHARED_RESPONSES_TABLE.to_string(),
        }
    }
}

/// Decrypted external-database parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConnection {
    pub host: String,
    pub port: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

/// Decrypted managed-service parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConnection {
    pub url: String,
    pub key: String,
}

/// Plaintext view of a tenant's storage settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConnectionConfig {
    pub preference: StoragePreference,
    pub postgres: PostgresConnection,
    pub service: ServiceConnection,
}

impl TenantConnectionConfig {
    pub fn has_postgres(&self) -> bool {
        !self.postgres.host.is_empty()
            && !self.postgres.database.is_empty()
            && !self.postgres.username.is_empty()
    }

    pub fn has_service(&self) -> bool {
        !self.service.url.is_empty() && !self.service.key.is_empty()
    }

    /// Class a form created under these settings would receive
    pub fn class(&self) -> StorageClass {
        match self.preference {
            StoragePreference::Postgres if self.has_postgres() => StorageClass::TenantPostgres,
            StoragePreference::Service if self.has_service() => StorageClass::TenantService,
            _ => StorageClass::Shared,
        }
    }
}

fn table_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]{2,63}$").expect("valid table name pattern")
    })
}

/// Whether a client-supplied table name is safe to use verbatim
pub fn is_valid_table_name(name: &str) -> bool {
    table_name_pattern().is_match(name)
}

fn derived_table_name() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..100_000);
    format!("survey_{:05}", suffix)
}

#[derive(Debug, Clone)]
pub struct StorageRouter {
    vault: CredentialVault,
}

impl StorageRouter {
    pub fn new(vault: CredentialVault) -> Self {
        Self { vault }
    }

    /// Decrypt every stored credential of the tenant
    pub fn connection_config(&self, tenant: &Tenant) -> Result<TenantConnectionConfig> {
        let decrypt = |value: &Option<String>| -> Result<String> {
            Ok(self.vault.decrypt_opt(value.as_deref())?.unwrap_or_default())
        };

        Ok(TenantConnectionConfig {
            preference: tenant.preference(),
            postgres: PostgresConnection {
                host: decrypt(&tenant.pg_host)?,
                port: decrypt(&tenant.pg_port)?,
                database: decrypt(&tenant.pg_database)?,
                username: decrypt(&tenant.pg_username)?,
                password: decrypt(&tenant.pg_password)?,
            },
            service: ServiceConnection {
                url: decrypt(&tenant.service_url)?,
                key: decrypt(&tenant.service_key)?,
            },
        })
    }

    /// Class a new form would receive; unreadable credentials mean shared
    pub fn class_for(&self, tenant: &Tenant) -> StorageClass {
        if tenant.preference() == StoragePreference::Shared {
            return StorageClass::Shared;
        }

        match self.connection_config(tenant) {
            Ok(config) => config.class(),
            Err(e) => {
                crate::metrics::record_decrypt_failure();
                warn!(
                    tenant_id = %tenant.id,
                    error_code = ?e.code(),
                    "Stored credentials could not be decrypted, routing to shared store"
                );
                StorageClass::Shared
            }
        }
    }

    /// Choose the destination for a new form.
    ///
    /// Shared forms always target [`SHARED_RESPONSES_TABLE`] and ignore the
    /// hint. Tenant-owned forms use the hint when it is a valid table name,
    /// or a derived `survey_NNNNN` name when none is given.
    pub fn choose(&self, tenant: &Tenant, table_hint: Option<&str>) -> Result<StorageRoute> {
        let class = self.class_for(tenant);

        if !class.is_tenant_owned() {
            return Ok(StorageRoute::shared());
        }

        let target_table = match table_hint.map(str::trim).filter(|h| !h.is_empty()) {
            Some(hint) if is_valid_table_name(hint) => hint.to_string(),
            Some(_) => {
                return Err(AppError::invalid(
                    "table_name",
                    "table name must start with a letter and contain 3-64 letters, digits or underscores",
                ))
            }
            None => derived_table_name(),
        };

        Ok(StorageRoute { class, target_table })
    }
}
