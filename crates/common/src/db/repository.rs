//! Repository pattern for database operations
//!
//! Postgres implementation of [`SurveyStore`]. Counter mutations run inside
//! a transaction that holds `FOR UPDATE` on the tenant row; lock order is
//! always tenant first, then form.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, Statement, TransactionTrait,
};
use uuid::Uuid;

use crate::db::models::*;
use crate::db::store::{
    display_id, AppendOutcome, CreateFormOutcome, FormDraft, NewResponse, NewTenant,
    ResponseRecord, StorageUpdateOutcome, SurveyStore, TenantStorageUpdate,
};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::plans::DEFAULT_TIER;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[async_trait]
impl SurveyStore for Repository {
    // ========================================================================
    // Health Check
    // ========================================================================

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Tenant Operations
    // ========================================================================

    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>> {
        TenantEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_tenant_by_email(&self, email: &str) -> Result<Option<Tenant>> {
        TenantEntity::find()
            .filter(TenantColumn::Email.eq(email))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn insert_tenant(&self, tenant: NewTenant) -> Result<Tenant> {
        let now = Utc::now();
        let email = tenant.email.clone();

        let model = TenantActiveModel {
            id: Set(tenant.id),
            email: Set(tenant.email),
            name: Set(tenant.name),
            password_hash: Set(tenant.password_hash),
            role: Set(TenantRole::Member.into()),
            plan_tier: Set(if tenant.plan_tier.is_empty() {
                DEFAULT_TIER.to_string()
            } else {
                tenant.plan_tier
            }),
            storage_preference: Set(StoragePreference::Shared.into()),
            pg_host: Set(None),
            pg_port: Set(None),
            pg_database: Set(None),
            pg_username: Set(None),
            pg_password: Set(None),
            service_url: Set(None),
            service_key: Set(None),
            active_forms: Set(0),
            total_responses: Set(0),
            is_active: Set(true),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        model.insert(self.write_conn()).await.map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Duplicate {
                    message: format!("tenant with email {} already exists", email),
                }
            } else {
                e.into()
            }
        })
    }

    async fn update_tenant_storage(
        &self,
        tenant_id: Uuid,
        update: TenantStorageUpdate,
    ) -> Result<StorageUpdateOutcome> {
        let txn = self.write_conn().begin().await?;

        let tenant = TenantEntity::find_by_id(tenant_id)
            .lock_exclusive()
            .one(&txn)
            .await?;

        let Some(tenant) = tenant else {
            txn.rollback().await?;
            return Err(AppError::not_found("tenant", tenant_id));
        };

        let mut merged = tenant.clone();
        let upgraded = update.apply_to(&mut merged);

        let mut tenant: TenantActiveModel = tenant.into();
        tenant.storage_preference = Set(merged.storage_preference);
        tenant.pg_host = Set(merged.pg_host);
        tenant.pg_port = Set(merged.pg_port);
        tenant.pg_database = Set(merged.pg_database);
        tenant.pg_username = Set(merged.pg_username);
        tenant.pg_password = Set(merged.pg_password);
        tenant.service_url = Set(merged.service_url);
        tenant.service_key = Set(merged.service_key);
        tenant.plan_tier = Set(merged.plan_tier);
        tenant.updated_at = Set(Utc::now().into());

        let tenant = tenant.update(&txn).await?;
        txn.commit().await?;

        Ok(StorageUpdateOutcome { tenant, upgraded })
    }

    // ========================================================================
    // Form Operations
    // ========================================================================

    async fn create_form(
        &self,
        draft: FormDraft,
        max_forms: Option<u32>,
    ) -> Result<CreateFormOutcome> {
        let max_responses = draft.max_responses_column()?;
        let txn = self.write_conn().begin().await?;

        let tenant = TenantEntity::find_by_id(draft.tenant_id)
            .filter(TenantColumn::IsActive.eq(true))
            .lock_exclusive()
            .one(&txn)
            .await?;

        let Some(tenant) = tenant else {
            txn.rollback().await?;
            return Ok(CreateFormOutcome::TenantUnavailable);
        };

        if let Some(limit) = max_forms {
            if tenant.active_form_count() >= limit {
                txn.rollback().await?;
                return Ok(CreateFormOutcome::QuotaExceeded { limit });
            }
        }

        let now = Utc::now();
        let form = FormActiveModel {
            id: Set(draft.id),
            tenant_id: Set(draft.tenant_id),
            title: Set(draft.title),
            description: Set(draft.description),
            form_code: Set(draft.form_code),
            fields: Set(serde_json::to_value(&draft.fields)?),
            storage_class: Set(draft.storage_class.into()),
            target_table: Set(draft.target_table),
            response_count: Set(0),
            max_responses: Set(max_responses),
            is_active: Set(true),
            created_at: Set(now.into()),
            deleted_at: Set(None),
        };

        let form = match form.insert(&txn).await {
            Ok(form) => form,
            Err(e) if is_unique_violation(&e) => {
                txn.rollback().await?;
                return Ok(CreateFormOutcome::CodeCollision);
            }
            Err(e) => return Err(e.into()),
        };

        let active_forms = tenant.active_forms;
        let mut tenant: TenantActiveModel = tenant.into();
        tenant.active_forms = Set(active_forms + 1);
        tenant.updated_at = Set(now.into());
        tenant.update(&txn).await?;

        txn.commit().await?;

        Ok(CreateFormOutcome::Created(form))
    }

    async fn soft_delete_form(&self, tenant_id: Uuid, form_id: Uuid) -> Result<Option<Form>> {
        let txn = self.write_conn().begin().await?;

        let tenant = TenantEntity::find_by_id(tenant_id)
            .lock_exclusive()
            .one(&txn)
            .await?;

        let Some(tenant) = tenant else {
            txn.rollback().await?;
            return Ok(None);
        };

        let form = FormEntity::find_by_id(form_id)
            .filter(FormColumn::TenantId.eq(tenant_id))
            .filter(FormColumn::IsActive.eq(true))
            .lock_exclusive()
            .one(&txn)
            .await?;

        let Some(form) = form else {
            txn.rollback().await?;
            return Ok(None);
        };

        let now = Utc::now();

        let mut form: FormActiveModel = form.into();
        form.is_active = Set(false);
        form.deleted_at = Set(Some(now.into()));
        let form = form.update(&txn).await?;

        let active_forms = tenant.active_forms;
        let mut tenant: TenantActiveModel = tenant.into();
        tenant.active_forms = Set((active_forms - 1).max(0));
        tenant.updated_at = Set(now.into());
        tenant.update(&txn).await?;

        txn.commit().await?;

        Ok(Some(form))
    }

    async fn list_active_forms(&self, tenant_id: Uuid) -> Result<Vec<Form>> {
        FormEntity::find()
            .filter(FormColumn::TenantId.eq(tenant_id))
            .filter(FormColumn::IsActive.eq(true))
            .order_by_desc(FormColumn::CreatedAt)
            .order_by_desc(FormColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_active_form_by_code(&self, form_code: &str) -> Result<Option<Form>> {
        FormEntity::find()
            .filter(FormColumn::FormCode.eq(form_code))
            .filter(FormColumn::IsActive.eq(true))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Response Operations
    // ========================================================================

    async fn list_responses(
        &self,
        tenant_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<ResponseRecord>> {
        let limit =
            i64::try_from(limit).map_err(|_| AppError::invalid("limit", "limit out of range"))?;
        let offset =
            i64::try_from(offset).map_err(|_| AppError::invalid("offset", "offset out of range"))?;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT
                r.display_id,
                f.title,
                f.form_code,
                r.latitude,
                r.longitude,
                r.accuracy,
                r.created_at,
                r.data
            FROM responses_shared r
            JOIN forms f ON r.form_id = f.id
            WHERE f.tenant_id = $1
              AND f.is_active = TRUE
            ORDER BY r.created_at DESC, r.id DESC
            LIMIT $2 OFFSET $3
            "#,
            vec![
                tenant_id.into(),
                limit.into(),
                offset.into(),
            ],
        );

        let rows = self.read_conn().query_all(stmt).await?;

        rows.into_iter()
            .map(|row| {
                Ok(ResponseRecord {
                    display_id: row.try_get_by_index::<String>(0)?,
                    form_title: row.try_get_by_index::<String>(1)?,
                    form_code: row.try_get_by_index::<String>(2)?,
                    latitude: row.try_get_by_index::<Option<f64>>(3)?,
                    longitude: row.try_get_by_index::<Option<f64>>(4)?,
                    accuracy: row.try_get_by_index::<Option<f64>>(5)?,
                    created_at: row.try_get_by_index::<DateTime<FixedOffset>>(6)?,
                    data: row.try_get_by_index::<serde_json::Value>(7)?,
                })
            })
            .collect::<std::result::Result<Vec<_>, DbErr>>()
            .map_err(Into::into)
    }

    async fn append_response(
        &self,
        form_code: &str,
        response: NewResponse,
    ) -> Result<AppendOutcome> {
        let txn = self.write_conn().begin().await?;

        // Unlocked read to learn the owner, so locks can be taken tenant-first
        let form = FormEntity::find()
            .filter(FormColumn::FormCode.eq(form_code))
            .filter(FormColumn::IsActive.eq(true))
            .one(&txn)
            .await?;

        let Some(form) = form else {
            txn.rollback().await?;
            return Ok(AppendOutcome::FormNotFound);
        };

        if form.class() != StorageClass::Shared {
            txn.rollback().await?;
            return Ok(AppendOutcome::NotShared);
        }

        let tenant = TenantEntity::find_by_id(form.tenant_id)
            .lock_exclusive()
            .one(&txn)
            .await?;

        let form = FormEntity::find_by_id(form.id)
            .filter(FormColumn::IsActive.eq(true))
            .lock_exclusive()
            .one(&txn)
            .await?;

        let (Some(tenant), Some(form)) = (tenant, form) else {
            txn.rollback().await?;
            return Ok(AppendOutcome::FormNotFound);
        };

        if !form.has_capacity() {
            txn.rollback().await?;
            return Ok(AppendOutcome::CeilingReached {
                limit: form.max_responses.max(0) as u32,
            });
        }

        let now = Utc::now();
        let sequence = form.response_count + 1;

        let stored = ResponseActiveModel {
            id: Set(Uuid::new_v4()),
            form_id: Set(form.id),
            display_id: Set(display_id(sequence)),
            data: Set(response.data),
            latitude: Set(response.latitude),
            longitude: Set(response.longitude),
            accuracy: Set(response.accuracy),
            created_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;

        let mut form: FormActiveModel = form.into();
        form.response_count = Set(sequence);
        form.update(&txn).await?;

        let total_responses = tenant.total_responses;
        let mut tenant: TenantActiveModel = tenant.into();
        tenant.total_responses = Set(total_responses + 1);
        tenant.updated_at = Set(now.into());
        tenant.update(&txn).await?;

        txn.commit().await?;

        Ok(AppendOutcome::Stored(stored))
    }
}
