//! Tenant entity
//!
//! Credential columns hold vault ciphertext, never plaintext.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Where the tenant would like new forms to collect into
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoragePreference {
    Shared,
    Postgres,
    Service,
}

impl From<&str> for StoragePreference {
    fn from(s: &str) -> Self {
        match s {
            "postgres" => StoragePreference::Postgres,
            "service" => StoragePreference::Service,
            _ => StoragePreference::Shared,
        }
    }
}

impl From<StoragePreference> for String {
    fn from(preference: StoragePreference) -> Self {
        match preference {
            StoragePreference::Shared => "shared".to_string(),
            StoragePreference::Postgres => "postgres".to_string(),
            StoragePreference::Service => "service".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantRole {
    Member,
    Admin,
}

impl From<&str> for TenantRole {
    fn from(s: &str) -> Self {
        match s {
            "admin" => TenantRole::Admin,
            _ => TenantRole::Member,
        }
    }
}

impl From<TenantRole> for String {
    fn from(role: TenantRole) -> Self {
        match role {
            TenantRole::Member => "member".to_string(),
            TenantRole::Admin => "admin".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tenants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text", unique)]
    pub email: String,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    #[serde(skip_serializing)]
    #[sea_orm(column_type = "Text")]
    pub password_hash: String,

    #[sea_orm(column_type = "Text")]
    pub role: String,

    #[sea_orm(column_type = "Text")]
    pub plan_tier: String,

    #[sea_orm(column_type = "Text")]
    pub storage_preference: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub pg_host: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub pg_port: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub pg_database: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub pg_username: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub pg_password: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub service_url: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub service_key: Option<String>,

    pub active_forms: i32,

    pub total_responses: i64,

    pub is_active: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn preference(&self) -> StoragePreference {
        StoragePreference::from(self.storage_preference.as_str())
    }

    pub fn tenant_role(&self) -> TenantRole {
        TenantRole::from(self.role.as_str())
    }

    pub fn is_admin(&self) -> bool {
        self.tenant_role() == TenantRole::Admin
    }

    /// Active-form counter as seen by the quota engine
    pub fn active_form_count(&self) -> u32 {
        self.active_forms.max(0) as u32
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::form::Entity")]
    Forms,
}

impl Related<super::form::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Forms.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
