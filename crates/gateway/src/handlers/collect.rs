//! Public collection endpoint for shared-store forms

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::extract::ApiJson;
use crate::AppState;
use fieldform_common::{
    errors::Result,
    services::{SubmitResponseRequest, SubmittedResponse},
};

pub async fn submit_response(
    State(state): State<AppState>,
    Path(form_code): Path<String>,
    ApiJson(request): ApiJson<SubmitResponseRequest>,
) -> Result<(StatusCode, Json<SubmittedResponse>)> {
    let submitted = state
        .services
        .responses
        .submit_response(&form_code, request)
        .await?;

    Ok((StatusCode::CREATED, Json(submitted)))
}
