//! Form management handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TenantQuery;
use crate::extract::{ApiJson, ApiQuery};
use crate::AppState;
use fieldform_common::{
    errors::Result,
    services::{CreateFormRequest, CreatedForm, FormSummary},
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteFormRequest {
    pub tenant_id: Uuid,
    pub form_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct DeleteFormResponse {
    pub message: String,
    pub form_id: Uuid,
}

/// Create a form for a tenant
pub async fn create_form(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateFormRequest>,
) -> Result<(StatusCode, Json<CreatedForm>)> {
    tracing::info!(
        tenant_id = %request.tenant_id,
        fields = request.fields.len(),
        "Creating form"
    );

    let created = state.services.forms.create_form(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Soft-delete a form
pub async fn delete_form(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<DeleteFormRequest>,
) -> Result<Json<DeleteFormResponse>> {
    let form = state
        .services
        .forms
        .delete_form(request.tenant_id, request.form_id)
        .await?;

    Ok(Json(DeleteFormResponse {
        message: "Form deleted".to_string(),
        form_id: form.id,
    }))
}

/// List a tenant's active forms
pub async fn list_forms(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<TenantQuery>,
) -> Result<Json<Vec<FormSummary>>> {
    let forms = state.services.forms.list_forms(query.tenant_id).await?;
    Ok(Json(forms))
}
