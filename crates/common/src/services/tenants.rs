//! Tenant provisioning: registration, credential-checked configuration and
//! plan usage

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{hash_password, verify_password};
use crate::db::models::{StorageClass, StoragePreference, Tenant, TenantRole};
use crate::db::{
    EncryptedPostgres, EncryptedService, NewTenant, StorageUpdateOutcome, SurveyStore,
    TenantStorageUpdate,
};
use crate::errors::{AppError, Result};
use crate::plans::{PlanCatalog, DEFAULT_TIER};
use crate::storage::{PostgresConnection, ServiceConnection, StorageRouter, TenantConnectionConfig};
use crate::vault::CredentialVault;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RegisterTenantRequest {
    #[validate(email(message = "email must be a valid address"))]
    pub email: String,

    #[validate(length(min = 1, max = 100, message = "name must be 1-100 characters"))]
    pub name: String,

    #[validate(length(min = 8, max = 256, message = "password must be 8-256 characters"))]
    pub password: String,

    #[serde(default)]
    pub plan_tier: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct TenantCredentials {
    #[validate(length(min = 1, message = "email is required"))]
    pub email: String,

    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ConfigureStorageRequest {
    #[validate(length(min = 1, message = "email is required"))]
    pub email: String,

    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,

    pub preference: StoragePreference,

    #[serde(default)]
    pub postgres: Option<PostgresConnection>,

    #[serde(default)]
    pub service: Option<ServiceConnection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantProfile {
    pub tenant_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: TenantRole,
    pub plan_tier: String,
}

impl From<&Tenant> for TenantProfile {
    fn from(tenant: &Tenant) -> Self {
        Self {
            tenant_id: tenant.id,
            email: tenant.email.clone(),
            name: tenant.name.clone(),
            role: tenant.tenant_role(),
            plan_tier: tenant.plan_tier.clone(),
        }
    }
}

/// What the plugin receives after a successful credential check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantConfigView {
    #[serde(flatten)]
    pub profile: TenantProfile,
    pub is_admin: bool,
    pub storage_class: StorageClass,
    pub connection: TenantConnectionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    pub preference: StoragePreference,
    pub storage_class: StorageClass,
    pub plan_tier: String,
    pub upgraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanUsage {
    pub plan_tier: String,
    pub forms_used: u32,
    /// `None` means unlimited
    pub forms_limit: Option<u32>,
    pub fields_limit: u32,
    pub responses_limit: u32,
    pub can_create_form: bool,
    pub storage_class: StorageClass,
}

#[derive(Clone)]
pub struct TenantService {
    store: Arc<dyn SurveyStore>,
    plans: Arc<PlanCatalog>,
    router: StorageRouter,
    vault: CredentialVault,
}

impl TenantService {
    pub fn new(
        store: Arc<dyn SurveyStore>,
        plans: Arc<PlanCatalog>,
        router: StorageRouter,
        vault: CredentialVault,
    ) -> Self {
        Self {
            store,
            plans,
            router,
            vault,
        }
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn register_tenant(&self, request: RegisterTenantRequest) -> Result<TenantProfile> {
        request.validate()?;

        let plan_tier = request.plan_tier.unwrap_or_else(|| DEFAULT_TIER.to_string());
        if !self.plans.is_known_tier(&plan_tier) {
            return Err(AppError::invalid(
                "plan_tier",
                format!("unknown plan tier '{}'", plan_tier),
            ));
        }

        let tenant = self
            .store
            .insert_tenant(NewTenant {
                id: Uuid::new_v4(),
                email: request.email.trim().to_lowercase(),
                name: request.name.trim().to_string(),
                password_hash: hash_password(&request.password)?,
                plan_tier,
            })
            .await?;

        info!(tenant_id = %tenant.id, plan_tier = %tenant.plan_tier, "Tenant registered");
        Ok(TenantProfile::from(&tenant))
    }

    /// Resolve an active tenant from email and password.
    ///
    /// Unknown email, inactive tenant and wrong password are indistinguishable
    /// to the caller.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Tenant> {
        let tenant = self
            .store
            .find_tenant_by_email(&email.trim().to_lowercase())
            .await?;

        match tenant {
            Some(tenant) if tenant.is_active && verify_password(password, &tenant.password_hash) => {
                Ok(tenant)
            }
            _ => {
                warn!("Tenant credential check failed");
                Err(AppError::InvalidCredentials)
            }
        }
    }

    /// Credential-checked view of the tenant's decrypted storage settings
    pub async fn lookup_config(&self, credentials: TenantCredentials) -> Result<TenantConfigView> {
        credentials.validate()?;
        let tenant = self
            .authenticate(&credentials.email, &credentials.password)
            .await?;

        let connection = self.router.connection_config(&tenant).map_err(|e| {
            crate::metrics::record_decrypt_failure();
            warn!(tenant_id = %tenant.id, "Stored credentials could not be decrypted");
            e
        })?;

        Ok(TenantConfigView {
            profile: TenantProfile::from(&tenant),
            is_admin: tenant.is_admin(),
            storage_class: connection.class(),
            connection,
        })
    }

    /// Replace the tenant's storage settings.
    ///
    /// Supplied credential blocks are encrypted and replace the stored ones;
    /// omitted blocks are kept. The merge and any plan upgrade happen in the
    /// store against the locked row. Existing forms keep their routing.
    #[instrument(skip(self, request))]
    pub async fn configure_storage(&self, request: ConfigureStorageRequest) -> Result<StorageSettings> {
        request.validate()?;
        let tenant = self.authenticate(&request.email, &request.password).await?;

        match request.preference {
            StoragePreference::Postgres => {
                let complete = request.postgres.as_ref().is_some_and(|pg| {
                    !pg.host.is_empty() && !pg.database.is_empty() && !pg.username.is_empty()
                });
                if !complete {
                    return Err(AppError::invalid(
                        "postgres",
                        "host, database and username are required for postgres storage",
                    ));
                }
            }
            StoragePreference::Service => {
                let complete = request
                    .service
                    .as_ref()
                    .is_some_and(|svc| !svc.url.is_empty() && !svc.key.is_empty());
                if !complete {
                    return Err(AppError::invalid(
                        "service",
                        "url and key are required for service storage",
                    ));
                }
            }
            StoragePreference::Shared => {}
        }

        let enc = |value: &str| -> Result<Option<String>> {
            self.vault.encrypt_opt(Some(value).filter(|v| !v.is_empty()))
        };

        let postgres = match &request.postgres {
            Some(pg) => Some(EncryptedPostgres {
                host: enc(&pg.host)?,
                port: enc(&pg.port)?,
                database: enc(&pg.database)?,
                username: enc(&pg.username)?,
                password: enc(&pg.password)?,
            }),
            None => None,
        };

        let service = match &request.service {
            Some(svc) => Some(EncryptedService {
                url: enc(&svc.url)?,
                key: enc(&svc.key)?,
            }),
            None => None,
        };

        let storage_class = match request.preference {
            StoragePreference::Postgres => StorageClass::TenantPostgres,
            StoragePreference::Service => StorageClass::TenantService,
            StoragePreference::Shared => StorageClass::Shared,
        };

        // The store picks the move matching the tier it finds under lock
        let tier_upgrades = if storage_class.is_tenant_owned() {
            self.plans.storage_upgrades()
        } else {
            BTreeMap::new()
        };

        let update = TenantStorageUpdate {
            preference: request.preference,
            postgres,
            service,
            tier_upgrades,
        };

        let StorageUpdateOutcome { tenant: updated, upgraded } =
            self.store.update_tenant_storage(tenant.id, update).await?;

        info!(
            tenant_id = %updated.id,
            preference = %updated.storage_preference,
            plan_tier = %updated.plan_tier,
            upgraded,
            "Tenant storage configured"
        );

        Ok(StorageSettings {
            preference: updated.preference(),
            storage_class,
            plan_tier: updated.plan_tier,
            upgraded,
        })
    }

    /// Current usage against the tenant's plan
    pub async fn plan_usage(&self, tenant_id: Uuid) -> Result<PlanUsage> {
        let tenant = self
            .store
            .find_tenant(tenant_id)
            .await?
            .ok_or_else(|| AppError::not_found("tenant", tenant_id))?;

        let tier = tenant.plan_tier.as_str();
        let forms_used = tenant.active_form_count();

        Ok(PlanUsage {
            plan_tier: tenant.plan_tier.clone(),
            forms_used,
            forms_limit: self.plans.max_forms(tier),
            fields_limit: self.plans.max_fields(tier),
            responses_limit: self.plans.max_responses(tier),
            can_create_form: tenant.is_active && self.plans.can_create_form(tier, forms_used),
            storage_class: self.router.class_for(&tenant),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlansConfig;
    use crate::db::MemoryStore;

    const SECRET: &str = "tenants-test";

    fn service(store: Arc<MemoryStore>) -> TenantService {
        let vault = CredentialVault::new(SECRET);
        TenantService::new(
            store,
            Arc::new(PlanCatalog::new(&PlansConfig::default())),
            StorageRouter::new(vault.clone()),
            vault,
        )
    }

    fn registration(email: &str) -> RegisterTenantRequest {
        RegisterTenantRequest {
            email: email.to_string(),
            name: "Field Team".to_string(),
            password: "long-enough-pw".to_string(),
            plan_tier: None,
        }
    }

    fn creds(email: &str, password: &str) -> TenantCredentials {
        TenantCredentials {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    fn postgres_request(email: &str) -> ConfigureStorageRequest {
        ConfigureStorageRequest {
            email: email.to_string(),
            password: "long-enough-pw".to_string(),
            preference: StoragePreference::Postgres,
            postgres: Some(PostgresConnection {
                host: "db.example.org".to_string(),
                port: "5432".to_string(),
                database: "surveys".to_string(),
                username: "collector".to_string(),
                password: "pg-secret".to_string(),
            }),
            service: None,
        }
    }

    #[tokio::test]
    async fn test_register_and_duplicate() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());

        let profile = service.register_tenant(registration("Team@Example.com")).await.unwrap();
        assert_eq!(profile.email, "team@example.com");
        assert_eq!(profile.plan_tier, DEFAULT_TIER);
        assert_eq!(profile.role, TenantRole::Member);

        let stored = store.tenant(profile.tenant_id).await.unwrap();
        assert_ne!(stored.password_hash, "long-enough-pw");
        assert_eq!(stored.active_forms, 0);

        let err = service.register_tenant(registration("team@example.com")).await.unwrap_err();
        assert!(matches!(err, AppError::Duplicate { .. }));
        assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let service = service(Arc::new(MemoryStore::new()));

        let mut bad_email = registration("not-an-email");
        bad_email.email = "not-an-email".to_string();
        assert!(service.register_tenant(bad_email).await.is_err());

        let mut short = registration("a@example.com");
        short.password = "short".to_string();
        assert!(service.register_tenant(short).await.is_err());

        let mut tier = registration("a@example.com");
        tier.plan_tier = Some("platinum".to_string());
        assert!(matches!(
            service.register_tenant(tier).await,
            Err(AppError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_lookup_requires_valid_credentials() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        service.register_tenant(registration("a@example.com")).await.unwrap();

        let view = service.lookup_config(creds("a@example.com", "long-enough-pw")).await.unwrap();
        assert_eq!(view.storage_class, StorageClass::Shared);
        assert!(!view.is_admin);
        assert!(view.connection.postgres.host.is_empty());

        for (email, password) in [
            ("a@example.com", "wrong-password"),
            ("nobody@example.com", "long-enough-pw"),
        ] {
            let err = service.lookup_config(creds(email, password)).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidCredentials));
        }
    }

    #[tokio::test]
    async fn test_configure_storage_encrypts_and_upgrades() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        let profile = service.register_tenant(registration("a@example.com")).await.unwrap();

        let settings = service.configure_storage(postgres_request("a@example.com")).await.unwrap();
        assert_eq!(settings.storage_class, StorageClass::TenantPostgres);
        assert!(settings.upgraded);
        assert_eq!(settings.plan_tier, "basic");

        let stored = store.tenant(profile.tenant_id).await.unwrap();
        let host = stored.pg_host.clone().unwrap();
        assert!(host.starts_with(crate::vault::CIPHERTEXT_PREFIX));
        assert_ne!(host, "db.example.org");

        let view = service.lookup_config(creds("a@example.com", "long-enough-pw")).await.unwrap();
        assert_eq!(view.connection.postgres.host, "db.example.org");
        assert_eq!(view.connection.postgres.password, "pg-secret");
        assert_eq!(view.storage_class, StorageClass::TenantPostgres);

        // basic has no further upgrade target
        let again = service.configure_storage(postgres_request("a@example.com")).await.unwrap();
        assert!(!again.upgraded);
        assert_eq!(again.plan_tier, "basic");
    }

    fn service_request(email: &str) -> ConfigureStorageRequest {
        ConfigureStorageRequest {
            email: email.to_string(),
            password: "long-enough-pw".to_string(),
            preference: StoragePreference::Service,
            postgres: None,
            service: Some(ServiceConnection {
                url: "https://surveys.example.org".to_string(),
                key: "service-key".to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn test_configure_storage_keeps_omitted_block() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        let profile = service.register_tenant(registration("a@example.com")).await.unwrap();

        service.configure_storage(postgres_request("a@example.com")).await.unwrap();
        let settings = service.configure_storage(service_request("a@example.com")).await.unwrap();
        assert_eq!(settings.storage_class, StorageClass::TenantService);

        let stored = store.tenant(profile.tenant_id).await.unwrap();
        assert!(stored.pg_host.is_some());
        assert!(stored.service_url.is_some());

        let view = service.lookup_config(creds("a@example.com", "long-enough-pw")).await.unwrap();
        assert_eq!(view.connection.postgres.host, "db.example.org");
        assert_eq!(view.connection.service.url, "https://surveys.example.org");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_storage_updates_keep_both_blocks() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        let profile = service.register_tenant(registration("a@example.com")).await.unwrap();
        let pristine = store.tenant(profile.tenant_id).await.unwrap();

        for _ in 0..8 {
            store.put_tenant(pristine.clone()).await;

            let pg = tokio::spawn({
                let service = service.clone();
                async move { service.configure_storage(postgres_request("a@example.com")).await }
            });
            let svc = tokio::spawn({
                let service = service.clone();
                async move { service.configure_storage(service_request("a@example.com")).await }
            });

            let pg = pg.await.unwrap().unwrap();
            let svc = svc.await.unwrap().unwrap();

            let stored = store.tenant(profile.tenant_id).await.unwrap();
            assert!(stored.pg_host.is_some());
            assert!(stored.service_url.is_some());
            assert_eq!(stored.plan_tier, "basic");
            // exactly one of the two calls performs the upgrade
            assert!(pg.upgraded ^ svc.upgraded);
        }
    }

    #[tokio::test]
    async fn test_configure_storage_requires_complete_block() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        service.register_tenant(registration("a@example.com")).await.unwrap();

        let mut incomplete = postgres_request("a@example.com");
        if let Some(pg) = incomplete.postgres.as_mut() {
            pg.username.clear();
        }
        assert!(matches!(
            service.configure_storage(incomplete).await,
            Err(AppError::Validation { .. })
        ));

        let mut bad_password = postgres_request("a@example.com");
        bad_password.password = "nope".to_string();
        assert!(matches!(
            service.configure_storage(bad_password).await,
            Err(AppError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_plan_usage() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        let tenant = store.seed_tenant("a@example.com", "free").await;

        let usage = service.plan_usage(tenant.id).await.unwrap();
        assert_eq!(usage.forms_used, 0);
        assert_eq!(usage.forms_limit, Some(2));
        assert_eq!(usage.fields_limit, 5);
        assert_eq!(usage.responses_limit, 40);
        assert!(usage.can_create_form);
        assert_eq!(usage.storage_class, StorageClass::Shared);

        let mut full = tenant.clone();
        full.active_forms = 2;
        store.put_tenant(full).await;
        assert!(!service.plan_usage(tenant.id).await.unwrap().can_create_form);

        assert!(matches!(
            service.plan_usage(Uuid::new_v4()).await,
            Err(AppError::NotFound { .. })
        ));
    }
}
