//! In-process `SurveyStore` for tests
//!
//! A single async mutex stands in for the row locks the Postgres repository
//! takes, so concurrent callers observe the same serialization.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::models::{Form, Response, StorageClass, StoragePreference, Tenant, TenantRole};
use crate::db::store::{
    display_id, AppendOutcome, CreateFormOutcome, FormDraft, NewResponse, NewTenant,
    ResponseRecord, StorageUpdateOutcome, SurveyStore, TenantStorageUpdate,
};
use crate::errors::{AppError, Result};
use crate::plans::DEFAULT_TIER;

#[derive(Default)]
struct State {
    tenants: HashMap<Uuid, Tenant>,
    forms: Vec<Form>,
    responses: Vec<Response>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the database were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::StorageUnavailable {
                message: "memory store marked unavailable".to_string(),
            });
        }
        Ok(())
    }

    /// Register an active tenant on the given tier
    pub async fn seed_tenant(&self, email: &str, tier: &str) -> Tenant {
        let now = Utc::now().into();
        let tenant = Tenant {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: email.split('@').next().unwrap_or(email).to_string(),
            password_hash: String::new(),
            role: TenantRole::Member.into(),
            plan_tier: tier.to_string(),
            storage_preference: StoragePreference::Shared.into(),
            pg_host: None,
            pg_port: None,
            pg_database: None,
            pg_username: None,
            pg_password: None,
            service_url: None,
            service_key: None,
            active_forms: 0,
            total_responses: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.put_tenant(tenant.clone()).await;
        tenant
    }

    /// Insert or overwrite a tenant row as-is
    pub async fn put_tenant(&self, tenant: Tenant) {
        self.state.lock().await.tenants.insert(tenant.id, tenant);
    }

    pub async fn tenant(&self, id: Uuid) -> Option<Tenant> {
        self.state.lock().await.tenants.get(&id).cloned()
    }

    /// Every form row, soft-deleted ones included
    pub async fn all_forms(&self) -> Vec<Form> {
        self.state.lock().await.forms.clone()
    }
}

#[async_trait]
impl SurveyStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>> {
        self.check_available()?;
        Ok(self.tenant(id).await)
    }

    async fn find_tenant_by_email(&self, email: &str) -> Result<Option<Tenant>> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.tenants.values().find(|t| t.email == email).cloned())
    }

    async fn insert_tenant(&self, tenant: NewTenant) -> Result<Tenant> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        if state.tenants.values().any(|t| t.email == tenant.email) {
            return Err(AppError::Duplicate {
                message: format!("tenant with email {} already exists", tenant.email),
            });
        }

        let now = Utc::now().into();
        let row = Tenant {
            id: tenant.id,
            email: tenant.email,
            name: tenant.name,
            password_hash: tenant.password_hash,
            role: TenantRole::Member.into(),
            plan_tier: if tenant.plan_tier.is_empty() {
                DEFAULT_TIER.to_string()
            } else {
                tenant.plan_tier
            },
            storage_preference: StoragePreference::Shared.into(),
            pg_host: None,
            pg_port: None,
            pg_database: None,
            pg_username: None,
            pg_password: None,
            service_url: None,
            service_key: None,
            active_forms: 0,
            total_responses: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.tenants.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_tenant_storage(
        &self,
        tenant_id: Uuid,
        update: TenantStorageUpdate,
    ) -> Result<StorageUpdateOutcome> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let tenant = state
            .tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| AppError::not_found("tenant", tenant_id))?;

        let upgraded = update.apply_to(tenant);
        tenant.updated_at = Utc::now().into();

        Ok(StorageUpdateOutcome {
            tenant: tenant.clone(),
            upgraded,
        })
    }

    async fn create_form(
        &self,
        draft: FormDraft,
        max_forms: Option<u32>,
    ) -> Result<CreateFormOutcome> {
        self.check_available()?;
        let max_responses = draft.max_responses_column()?;
        let mut state = self.state.lock().await;

        let active_forms = match state.tenants.get(&draft.tenant_id) {
            Some(tenant) if tenant.is_active => tenant.active_form_count(),
            _ => return Ok(CreateFormOutcome::TenantUnavailable),
        };

        if let Some(limit) = max_forms {
            if active_forms >= limit {
                return Ok(CreateFormOutcome::QuotaExceeded { limit });
            }
        }

        if state.forms.iter().any(|f| f.form_code == draft.form_code) {
            return Ok(CreateFormOutcome::CodeCollision);
        }

        let form = Form {
            id: draft.id,
            tenant_id: draft.tenant_id,
            title: draft.title,
            description: draft.description,
            form_code: draft.form_code,
            fields: serde_json::to_value(&draft.fields)?,
            storage_class: draft.storage_class.into(),
            target_table: draft.target_table,
            response_count: 0,
            max_responses,
            is_active: true,
            created_at: Utc::now().into(),
            deleted_at: None,
        };
        state.forms.push(form.clone());

        if let Some(tenant) = state.tenants.get_mut(&form.tenant_id) {
            tenant.active_forms += 1;
        }

        Ok(CreateFormOutcome::Created(form))
    }

    async fn soft_delete_form(&self, tenant_id: Uuid, form_id: Uuid) -> Result<Option<Form>> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        if !state.tenants.contains_key(&tenant_id) {
            return Ok(None);
        }

        let Some(form) = state
            .forms
            .iter_mut()
            .find(|f| f.id == form_id && f.tenant_id == tenant_id && f.is_active)
        else {
            return Ok(None);
        };

        form.is_active = false;
        form.deleted_at = Some(Utc::now().into());
        let form = form.clone();

        if let Some(tenant) = state.tenants.get_mut(&tenant_id) {
            tenant.active_forms = (tenant.active_forms - 1).max(0);
        }

        Ok(Some(form))
    }

    async fn list_active_forms(&self, tenant_id: Uuid) -> Result<Vec<Form>> {
        self.check_available()?;
        let state = self.state.lock().await;

        // Later insertions win ties on created_at
        let mut forms: Vec<Form> = state
            .forms
            .iter()
            .rev()
            .filter(|f| f.tenant_id == tenant_id && f.is_active)
            .cloned()
            .collect();
        forms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(forms)
    }

    async fn find_active_form_by_code(&self, form_code: &str) -> Result<Option<Form>> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .forms
            .iter()
            .find(|f| f.form_code == form_code && f.is_active)
            .cloned())
    }

    async fn list_responses(
        &self,
        tenant_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<ResponseRecord>> {
        self.check_available()?;
        let state = self.state.lock().await;

        let forms: HashMap<Uuid, &Form> = state
            .forms
            .iter()
            .filter(|f| f.tenant_id == tenant_id && f.is_active)
            .map(|f| (f.id, f))
            .collect();

        let mut records: Vec<ResponseRecord> = state
            .responses
            .iter()
            .rev()
            .filter_map(|r| {
                forms.get(&r.form_id).map(|form| ResponseRecord {
                    display_id: r.display_id.clone(),
                    form_title: form.title.clone(),
                    form_code: form.form_code.clone(),
                    latitude: r.latitude,
                    longitude: r.longitude,
                    accuracy: r.accuracy,
                    created_at: r.created_at,
                    data: r.data.clone(),
                })
            })
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(records
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect())
    }

    async fn append_response(
        &self,
        form_code: &str,
        response: NewResponse,
    ) -> Result<AppendOutcome> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let Some(form) = state
            .forms
            .iter_mut()
            .find(|f| f.form_code == form_code && f.is_active)
        else {
            return Ok(AppendOutcome::FormNotFound);
        };

        if form.class() != StorageClass::Shared {
            return Ok(AppendOutcome::NotShared);
        }

        if !form.has_capacity() {
            return Ok(AppendOutcome::CeilingReached {
                limit: form.max_responses.max(0) as u32,
            });
        }

        form.response_count += 1;
        let stored = Response {
            id: Uuid::new_v4(),
            form_id: form.id,
            display_id: display_id(form.response_count),
            data: response.data,
            latitude: response.latitude,
            longitude: response.longitude,
            accuracy: response.accuracy,
            created_at: Utc::now().into(),
        };
        let tenant_id = form.tenant_id;

        state.responses.push(stored.clone());
        if let Some(tenant) = state.tenants.get_mut(&tenant_id) {
            tenant.total_responses += 1;
        }

        Ok(AppendOutcome::Stored(stored))
    }
}
