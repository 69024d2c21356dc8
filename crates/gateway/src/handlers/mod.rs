//! API handlers module

pub mod collect;
pub mod forms;
pub mod health;
pub mod responses;
pub mod tenants;

use serde::Deserialize;
use uuid::Uuid;

/// `?tenant_id=` query shared by the plugin read routes
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantQuery {
    pub tenant_id: Uuid,
}
