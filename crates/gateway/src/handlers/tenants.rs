//! Tenant provisioning handlers

use axum::{extract::State, http::StatusCode, Json};

use super::TenantQuery;
use crate::extract::{ApiJson, ApiQuery};
use crate::AppState;
use fieldform_common::{
    errors::Result,
    services::{
        ConfigureStorageRequest, PlanUsage, RegisterTenantRequest, StorageSettings,
        TenantConfigView, TenantCredentials, TenantProfile,
    },
};

pub async fn register_tenant(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegisterTenantRequest>,
) -> Result<(StatusCode, Json<TenantProfile>)> {
    let profile = state.services.tenants.register_tenant(request).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// Decrypted storage configuration, after a tenant credential check
pub async fn tenant_config(
    State(state): State<AppState>,
    ApiJson(credentials): ApiJson<TenantCredentials>,
) -> Result<Json<TenantConfigView>> {
    let view = state.services.tenants.lookup_config(credentials).await?;
    Ok(Json(view))
}

pub async fn configure_storage(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ConfigureStorageRequest>,
) -> Result<Json<StorageSettings>> {
    let settings = state.services.tenants.configure_storage(request).await?;
    Ok(Json(settings))
}

/// Plan limits and current usage
pub async fn limits(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<TenantQuery>,
) -> Result<Json<PlanUsage>> {
    let usage = state.services.tenants.plan_usage(query.tenant_id).await?;
    Ok(Json(usage))
}
