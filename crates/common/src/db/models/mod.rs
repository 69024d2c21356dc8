//! SeaORM entity models
//!
//! Database entities for FieldForm

mod form;
mod response;
mod tenant;

pub use tenant::{
    Entity as TenantEntity,
    Model as Tenant,
    ActiveModel as TenantActiveModel,
    Column as TenantColumn,
    StoragePreference,
    TenantRole,
};

pub use form::{
    Entity as FormEntity,
    Model as Form,
    ActiveModel as FormActiveModel,
    Column as FormColumn,
    FieldDefinition,
    FieldType,
    StorageClass,
};

pub use response::{
    Entity as ResponseEntity,
    Model as Response,
    ActiveModel as ResponseActiveModel,
    Column as ResponseColumn,
};
