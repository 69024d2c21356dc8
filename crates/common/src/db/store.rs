//! Persistence seam for the engine
//!
//! Every method that touches a usage counter does so in the same atomic
//! unit as the row whose state changed. Implementations must hold an
//! exclusive lock on the tenant row while re-checking the form quota.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{FieldDefinition, Form, Response, StorageClass, StoragePreference, Tenant};
use crate::errors::{AppError, Result};

/// Values needed to register a tenant
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub plan_tier: String,
}

/// Vault ciphertext for a tenant-owned Postgres store
#[derive(Debug, Clone, Default)]
pub struct EncryptedPostgres {
    pub host: Option<String>,
    pub port: Option<String>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Vault ciphertext for a tenant-owned service endpoint
#[derive(Debug, Clone, Default)]
pub struct EncryptedService {
    pub url: Option<String>,
    pub key: Option<String>,
}

/// Storage settings change, merged into the row under its lock.
///
/// A `None` block leaves the stored credentials of that kind untouched.
#[derive(Debug, Clone)]
pub struct TenantStorageUpdate {
    pub preference: StoragePreference,
    pub postgres: Option<EncryptedPostgres>,
    pub service: Option<EncryptedService>,
    /// Tier moves keyed by the current tier, applied to the locked row
    pub tier_upgrades: BTreeMap<String, String>,
}

impl TenantStorageUpdate {
    /// Merge into a tenant row; returns whether the tier was upgraded
    pub fn apply_to(self, tenant: &mut Tenant) -> bool {
        tenant.storage_preference = self.preference.into();

        if let Some(pg) = self.postgres {
            tenant.pg_host = pg.host;
            tenant.pg_port = pg.port;
            tenant.pg_database = pg.database;
            tenant.pg_username = pg.username;
            tenant.pg_password = pg.password;
        }

        if let Some(svc) = self.service {
            tenant.service_url = svc.url;
            tenant.service_key = svc.key;
        }

        match self.tier_upgrades.get(&tenant.plan_tier) {
            Some(target) if *target != tenant.plan_tier => {
                tenant.plan_tier = target.clone();
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageUpdateOutcome {
    pub tenant: Tenant,
    pub upgraded: bool,
}

/// A fully resolved form ready to persist
#[derive(Debug, Clone)]
pub struct FormDraft {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub form_code: String,
    pub fields: Vec<FieldDefinition>,
    pub storage_class: StorageClass,
    pub target_table: String,
    pub max_responses: u32,
}

impl FormDraft {
    /// Ceiling as stored in the `max_responses` column
    pub fn max_responses_column(&self) -> Result<i32> {
        i32::try_from(self.max_responses).map_err(|_| AppError::Configuration {
            message: format!("response ceiling {} does not fit the forms table", self.max_responses),
        })
    }
}

#[derive(Debug)]
pub enum CreateFormOutcome {
    Created(Form),
    /// The locked counter was already at the ceiling
    QuotaExceeded { limit: u32 },
    /// The drawn form code is already reserved
    CodeCollision,
    /// Tenant vanished or was deactivated
    TenantUnavailable,
}

/// One collected submission for the shared store
#[derive(Debug, Clone)]
pub struct NewResponse {
    pub data: serde_json::Value,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
}

#[derive(Debug)]
pub enum AppendOutcome {
    Stored(Response),
    FormNotFound,
    NotShared,
    CeilingReached { limit: u32 },
}

/// A response joined with the metadata of its form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub display_id: String,
    pub form_title: String,
    pub form_code: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub created_at: DateTime<FixedOffset>,
    pub data: serde_json::Value,
}

/// Human-facing response id for the n-th response of a form
pub fn display_id(sequence: i32) -> String {
    format!("AS_{:03}", sequence)
}

#[async_trait]
pub trait SurveyStore: Send + Sync {
    /// Check connectivity
    async fn ping(&self) -> Result<()>;

    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>>;

    async fn find_tenant_by_email(&self, email: &str) -> Result<Option<Tenant>>;

    /// Insert a tenant; a taken email is `AppError::Duplicate`
    async fn insert_tenant(&self, tenant: NewTenant) -> Result<Tenant>;

    /// Merge storage settings into the tenant row while holding its lock
    async fn update_tenant_storage(
        &self,
        tenant_id: Uuid,
        update: TenantStorageUpdate,
    ) -> Result<StorageUpdateOutcome>;

    /// Insert the form and increment the tenant's active-form counter atomically,
    /// re-checking `max_forms` against the locked counter
    async fn create_form(
        &self,
        draft: FormDraft,
        max_forms: Option<u32>,
    ) -> Result<CreateFormOutcome>;

    /// Soft-delete an active form owned by the tenant and decrement the counter
    /// atomically. `None` when no such active form exists.
    async fn soft_delete_form(&self, tenant_id: Uuid, form_id: Uuid) -> Result<Option<Form>>;

    /// Active forms, newest first
    async fn list_active_forms(&self, tenant_id: Uuid) -> Result<Vec<Form>>;

    async fn find_active_form_by_code(&self, form_code: &str) -> Result<Option<Form>>;

    /// Shared-store responses of the tenant's active forms, newest first
    async fn list_responses(
        &self,
        tenant_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<ResponseRecord>>;

    /// Store a response for a shared form, honouring its response ceiling
    async fn append_response(
        &self,
        form_code: &str,
        response: NewResponse,
    ) -> Result<AppendOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_id_padding() {
        assert_eq!(display_id(1), "AS_001");
        assert_eq!(display_id(42), "AS_042");
        assert_eq!(display_id(1234), "AS_1234");
    }
}
