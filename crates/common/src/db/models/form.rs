//! Form entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Declared type of a form field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Date,
    Email,
    Select,
}

/// One field of a form, persisted inside the `fields` JSON column
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDefinition {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

/// Persisted routing decision for a form's responses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    Shared,
    TenantPostgres,
    TenantService,
}

impl StorageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Shared => "shared",
            StorageClass::TenantPostgres => "tenant_postgres",
            StorageClass::TenantService => "tenant_service",
        }
    }

    pub fn is_tenant_owned(&self) -> bool {
        !matches!(self, StorageClass::Shared)
    }
}

impl From<&str> for StorageClass {
    fn from(s: &str) -> Self {
        match s {
            "tenant_postgres" => StorageClass::TenantPostgres,
            "tenant_service" => StorageClass::TenantService,
            _ => StorageClass::Shared,
        }
    }
}

impl From<StorageClass> for String {
    fn from(class: StorageClass) -> Self {
        class.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "forms")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    /// Shareable code, reserved forever once issued
    #[sea_orm(column_type = "Text", unique)]
    pub form_code: String,

    /// Ordered field definitions as JSONB
    #[sea_orm(column_type = "JsonBinary")]
    pub fields: Json,

    #[sea_orm(column_type = "Text")]
    pub storage_class: String,

    #[sea_orm(column_type = "Text")]
    pub target_table: String,

    pub response_count: i32,

    pub max_responses: i32,

    pub is_active: bool,

    pub created_at: DateTimeWithTimeZone,

    pub deleted_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    pub fn class(&self) -> StorageClass {
        StorageClass::from(self.storage_class.as_str())
    }

    /// Decode the field definitions stored on this form
    pub fn field_definitions(&self) -> crate::errors::Result<Vec<FieldDefinition>> {
        serde_json::from_value(self.fields.clone()).map_err(AppError::from)
    }

    pub fn has_capacity(&self) -> bool {
        self.response_count < self.max_responses
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tenant::Entity",
        from = "Column::TenantId",
        to = "super::tenant::Column::Id"
    )]
    Tenant,

    #[sea_orm(has_many = "super::response::Entity")]
    Responses,
}

impl Related<super::tenant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl Related<super::response::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Responses.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
