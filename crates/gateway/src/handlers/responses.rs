//! Shared-store response listing

use axum::{extract::State, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::extract::ApiQuery;
use crate::AppState;
use fieldform_common::{db::ResponseRecord, errors::Result, services::ResponsePage};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponsesQuery {
    pub tenant_id: Uuid,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// One page of a tenant's responses, newest first
pub async fn list_responses(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ResponsesQuery>,
) -> Result<Json<Vec<ResponseRecord>>> {
    let records = state
        .services
        .responses
        .list_responses(
            query.tenant_id,
            ResponsePage {
                limit: query.limit,
                offset: query.offset,
            },
        )
        .await?;

    tracing::debug!(tenant_id = %query.tenant_id, count = records.len(), "Listed responses");
    Ok(Json(records))
}
