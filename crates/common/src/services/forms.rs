//! Form lifecycle: creation, soft deletion and listing

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Datelike, FixedOffset, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::models::{FieldDefinition, Form, StorageClass};
use crate::db::{CreateFormOutcome, FormDraft, SurveyStore};
use crate::errors::{AppError, QuotaMetric, Result};
use crate::metrics;
use crate::plans::PlanCatalog;
use crate::storage::StorageRouter;

/// Attempts at drawing an unused form code before giving up
const MAX_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CreateFormRequest {
    pub tenant_id: Uuid,

    #[validate(length(max = 255, message = "title must be at most 255 characters"))]
    pub title: String,

    #[validate(length(max = 2000, message = "description must be at most 2000 characters"))]
    pub description: Option<String>,

    pub fields: Vec<FieldDefinition>,

    /// Table hint, only honoured for tenant-owned stores
    #[serde(default)]
    pub table_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedForm {
    pub form_id: Uuid,
    pub form_code: String,
    pub collection_url: String,
    pub storage_class: StorageClass,
    pub target_table: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSummary {
    pub form_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub form_code: String,
    pub collection_url: String,
    pub storage_class: StorageClass,
    pub target_table: String,
    pub fields: Vec<FieldDefinition>,
    pub response_count: i32,
    pub max_responses: i32,
    pub created_at: DateTime<FixedOffset>,
}

/// Draw a new `FORM-<year>-<12 hex>` code
pub fn generate_form_code() -> String {
    let bytes: [u8; 6] = rand::random();
    format!("FORM-{}-{}", Utc::now().year(), hex::encode_upper(bytes))
}

fn field_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]{0,30}$").expect("valid field name pattern")
    })
}

/// Structural checks on a form definition, independent of the plan
pub fn validate_definition(title: &str, fields: &[FieldDefinition]) -> Result<()> {
    if title.trim().is_empty() {
        return Err(AppError::invalid("title", "title must not be blank"));
    }

    if fields.is_empty() {
        return Err(AppError::invalid("fields", "at least one field is required"));
    }

    let mut seen = HashSet::with_capacity(fields.len());
    for field in fields {
        if field.name.is_empty() {
            return Err(AppError::invalid("fields", "field name must not be empty"));
        }
        if !field_name_pattern().is_match(&field.name) {
            return Err(AppError::invalid(
                "fields",
                format!(
                    "field name '{}' must start with a letter and contain at most 31 letters, digits or underscores",
                    field.name
                ),
            ));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(AppError::invalid(
                "fields",
                format!("duplicate field name '{}'", field.name),
            ));
        }
    }

    Ok(())
}

#[derive(Clone)]
pub struct FormService {
    store: Arc<dyn SurveyStore>,
    plans: Arc<PlanCatalog>,
    router: StorageRouter,
    public_base_url: String,
}

impl FormService {
    pub fn new(
        store: Arc<dyn SurveyStore>,
        plans: Arc<PlanCatalog>,
        router: StorageRouter,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            plans,
            router,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn collection_url(&self, form_code: &str) -> String {
        format!("{}/v1/collect/{}", self.public_base_url, form_code)
    }

    /// Create a form for a tenant.
    ///
    /// Checks run in a fixed order before anything is written: tenant
    /// existence, form quota, definition shape, field quota. The form quota
    /// is re-checked by the store under the tenant row lock.
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id))]
    pub async fn create_form(&self, request: CreateFormRequest) -> Result<CreatedForm> {
        let tenant = self
            .store
            .find_tenant(request.tenant_id)
            .await?
            .filter(|t| t.is_active)
            .ok_or_else(|| AppError::not_found("tenant", request.tenant_id))?;

        let tier = tenant.plan_tier.as_str();
        let max_forms = self.plans.max_forms(tier);

        if !self.plans.can_create_form(tier, tenant.active_form_count()) {
            return Err(quota_exceeded(QuotaMetric::Forms, max_forms.unwrap_or(0)));
        }

        request.validate()?;
        validate_definition(&request.title, &request.fields)?;

        if !self.plans.can_use_field_count(tier, request.fields.len()) {
            return Err(quota_exceeded(
                QuotaMetric::Fields,
                self.plans.max_fields(tier),
            ));
        }

        let route = self.router.choose(&tenant, request.table_name.as_deref())?;
        let ceiling = self.plans.response_ceiling_for(tier);
        let form_id = Uuid::new_v4();

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let draft = FormDraft {
                id: form_id,
                tenant_id: tenant.id,
                title: request.title.trim().to_string(),
                description: request.description.clone(),
                form_code: generate_form_code(),
                fields: request.fields.clone(),
                storage_class: route.class,
                target_table: route.target_table.clone(),
                max_responses: ceiling,
            };

            match self.store.create_form(draft, max_forms).await? {
                CreateFormOutcome::Created(form) => {
                    metrics::record_form_created(route.class.as_str());
                    info!(
                        form_id = %form.id,
                        form_code = %form.form_code,
                        storage_class = route.class.as_str(),
                        "Form created"
                    );

                    return Ok(CreatedForm {
                        form_id: form.id,
                        collection_url: self.collection_url(&form.form_code),
                        form_code: form.form_code,
                        storage_class: route.class,
                        target_table: form.target_table,
                    });
                }
                CreateFormOutcome::QuotaExceeded { limit } => {
                    return Err(quota_exceeded(QuotaMetric::Forms, limit));
                }
                CreateFormOutcome::TenantUnavailable => {
                    return Err(AppError::not_found("tenant", tenant.id));
                }
                CreateFormOutcome::CodeCollision => {
                    debug!(attempt, "Form code collision, drawing a new code");
                }
            }
        }

        warn!("Exhausted form code attempts");
        Err(AppError::Internal {
            message: "could not allocate a unique form code".to_string(),
        })
    }

    /// Soft-delete an active form owned by the tenant
    #[instrument(skip(self))]
    pub async fn delete_form(&self, tenant_id: Uuid, form_id: Uuid) -> Result<Form> {
        let form = self
            .store
            .soft_delete_form(tenant_id, form_id)
            .await?
            .ok_or_else(|| AppError::not_found("form", form_id))?;

        metrics::record_form_deleted();
        info!(form_code = %form.form_code, "Form deleted");

        Ok(form)
    }

    /// Active forms of the tenant, newest first
    pub async fn list_forms(&self, tenant_id: Uuid) -> Result<Vec<FormSummary>> {
        let forms = self.store.list_active_forms(tenant_id).await?;

        forms
            .into_iter()
            .map(|form| {
                Ok(FormSummary {
                    fields: form.field_definitions()?,
                    collection_url: self.collection_url(&form.form_code),
                    storage_class: form.class(),
                    form_id: form.id,
                    title: form.title,
                    description: form.description,
                    form_code: form.form_code,
                    target_table: form.target_table,
                    response_count: form.response_count,
                    max_responses: form.max_responses,
                    created_at: form.created_at,
                })
            })
            .collect()
    }
}

fn quota_exceeded(metric: QuotaMetric, limit: u32) -> AppError {
    metrics::record_quota_rejection(metric);
    AppError::QuotaExceeded { metric, limit }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlansConfig;
    use crate::db::models::FieldType;
    use crate::db::MemoryStore;
    use crate::storage::SHARED_RESPONSES_TABLE;
    use crate::vault::CredentialVault;

    fn field(name: &str) -> FieldDefinition {
        FieldDefinition {
            name: name.to_string(),
            label: name.to_uppercase(),
            field_type: FieldType::Text,
            required: false,
        }
    }

    fn fields(n: usize) -> Vec<FieldDefinition> {
        (0..n).map(|i| field(&format!("field_{i}"))).collect()
    }

    fn request(tenant_id: Uuid, fields: Vec<FieldDefinition>) -> CreateFormRequest {
        CreateFormRequest {
            tenant_id,
            title: "River survey".to_string(),
            description: Some("Water quality points".to_string()),
            fields,
            table_name: None,
        }
    }

    fn service(store: Arc<MemoryStore>) -> FormService {
        FormService::new(
            store,
            Arc::new(PlanCatalog::new(&PlansConfig::default())),
            StorageRouter::new(CredentialVault::new("forms-test")),
            "https://forms.example.org/",
        )
    }

    #[test]
    fn test_form_code_format() {
        let code = generate_form_code();
        let pattern = Regex::new(r"^FORM-\d{4}-[0-9A-F]{12}$").unwrap();
        assert!(pattern.is_match(&code), "{code}");
        assert_ne!(code, generate_form_code());
    }

    #[test]
    fn test_validate_definition() {
        assert!(validate_definition("Title", &fields(3)).is_ok());
        assert!(validate_definition("  ", &fields(3)).is_err());
        assert!(validate_definition("Title", &[]).is_err());
        assert!(validate_definition("Title", &[field("")]).is_err());
        assert!(validate_definition("Title", &[field("9lives")]).is_err());
        assert!(validate_definition("Title", &[field(&"a".repeat(32))]).is_err());
        assert!(validate_definition("Title", &[field(&"a".repeat(31))]).is_ok());
        assert!(validate_definition("Title", &[field("site"), field("site")]).is_err());
    }

    #[tokio::test]
    async fn test_create_form_on_shared_store() {
        let store = Arc::new(MemoryStore::new());
        let tenant = store.seed_tenant("a@example.com", "free").await;
        let service = service(store.clone());

        let mut req = request(tenant.id, fields(3));
        req.table_name = Some("ignored_table".to_string());
        let created = service.create_form(req).await.unwrap();

        assert_eq!(created.storage_class, StorageClass::Shared);
        assert_eq!(created.target_table, SHARED_RESPONSES_TABLE);
        assert_eq!(
            created.collection_url,
            format!("https://forms.example.org/v1/collect/{}", created.form_code)
        );

        let listed = service.list_forms(tenant.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].max_responses, 40);
        assert_eq!(store.tenant(tenant.id).await.unwrap().active_forms, 1);
    }

    #[tokio::test]
    async fn test_form_quota_on_free_tier() {
        let store = Arc::new(MemoryStore::new());
        let tenant = store.seed_tenant("a@example.com", "free").await;
        let service = service(store.clone());

        for _ in 0..2 {
            service.create_form(request(tenant.id, fields(1))).await.unwrap();
        }

        let err = service.create_form(request(tenant.id, fields(1))).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::QuotaExceeded { metric: QuotaMetric::Forms, limit: 2 }
        ));
        assert_eq!(service.list_forms(tenant.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_field_quota_and_ordering() {
        let store = Arc::new(MemoryStore::new());
        let tenant = store.seed_tenant("a@example.com", "free").await;
        let service = service(store.clone());

        let err = service.create_form(request(tenant.id, fields(6))).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::QuotaExceeded { metric: QuotaMetric::Fields, limit: 5 }
        ));

        // Structural errors win over the field quota
        let mut dupes = fields(6);
        dupes[5].name = dupes[0].name.clone();
        let err = service.create_form(request(tenant.id, dupes)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        assert!(store.all_forms().await.is_empty());
        assert_eq!(store.tenant(tenant.id).await.unwrap().active_forms, 0);
    }

    #[tokio::test]
    async fn test_unknown_or_inactive_tenant() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());

        let err = service.create_form(request(Uuid::new_v4(), fields(1))).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));

        let mut tenant = store.seed_tenant("gone@example.com", "basic").await;
        tenant.is_active = false;
        store.put_tenant(tenant.clone()).await;
        let err = service.create_form(request(tenant.id, fields(1))).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_length_limits_checked_after_tenant_and_form_quota() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());

        let long_title = |tenant_id| {
            let mut req = request(tenant_id, fields(1));
            req.title = "t".repeat(256);
            req
        };

        let err = service.create_form(long_title(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));

        let mut full = store.seed_tenant("full@example.com", "free").await;
        full.active_forms = 2;
        store.put_tenant(full.clone()).await;
        let err = service.create_form(long_title(full.id)).await.unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded { metric: QuotaMetric::Forms, .. }));

        let open = store.seed_tenant("open@example.com", "free").await;
        let err = service.create_form(long_title(open.id)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert!(store.all_forms().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_form() {
        let store = Arc::new(MemoryStore::new());
        let owner = store.seed_tenant("owner@example.com", "basic").await;
        let other = store.seed_tenant("other@example.com", "basic").await;
        let service = service(store.clone());

        let created = service.create_form(request(owner.id, fields(2))).await.unwrap();

        let err = service.delete_form(other.id, created.form_id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));

        let deleted = service.delete_form(owner.id, created.form_id).await.unwrap();
        assert!(!deleted.is_active);
        assert!(deleted.deleted_at.is_some());

        let err = service.delete_form(owner.id, created.form_id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));

        assert_eq!(store.tenant(owner.id).await.unwrap().active_forms, 0);
        assert!(service.list_forms(owner.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_code_is_not_reissued_and_slot_is_freed() {
        let store = Arc::new(MemoryStore::new());
        let tenant = store.seed_tenant("a@example.com", "free").await;
        let service = service(store.clone());

        let first = service.create_form(request(tenant.id, fields(1))).await.unwrap();
        service.create_form(request(tenant.id, fields(1))).await.unwrap();
        service.delete_form(tenant.id, first.form_id).await.unwrap();

        let third = service.create_form(request(tenant.id, fields(1))).await.unwrap();
        assert_ne!(third.form_code, first.form_code);
        assert_eq!(store.all_forms().await.len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_creates_respect_quota() {
        let store = Arc::new(MemoryStore::new());
        let tenant = store.seed_tenant("race@example.com", "free").await;
        let service = service(store.clone());

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let service = service.clone();
                let req = request(tenant.id, fields(1));
                tokio::spawn(async move { service.create_form(req).await })
            })
            .collect();

        let mut created = 0;
        for task in futures::future::join_all(tasks).await {
            match task.unwrap() {
                Ok(_) => created += 1,
                Err(AppError::QuotaExceeded { metric: QuotaMetric::Forms, .. }) => {}
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }

        assert_eq!(created, 2);
        assert_eq!(service.list_forms(tenant.id).await.unwrap().len(), 2);
        assert_eq!(store.tenant(tenant.id).await.unwrap().active_forms, 2);
    }

    #[tokio::test]
    async fn test_premium_has_no_form_ceiling() {
        let store = Arc::new(MemoryStore::new());
        let tenant = store.seed_tenant("big@example.com", "premium").await;
        let service = service(store.clone());

        for _ in 0..12 {
            service.create_form(request(tenant.id, fields(15))).await.unwrap();
        }
        assert_eq!(service.list_forms(tenant.id).await.unwrap().len(), 12);
    }
}
