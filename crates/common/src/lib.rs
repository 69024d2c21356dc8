//! FieldForm Common Library
//!
//! Storage-routing and tenant-provisioning engine behind the FieldForm
//! gateway, including:
//! - Database models, the `SurveyStore` seam and its SeaORM repository
//! - Credential vault for tenant-supplied store credentials
//! - Plan quotas and the storage router
//! - Form, response and tenant services
//! - Error types, configuration, authentication and metrics

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod plans;
pub mod services;
pub mod storage;
pub mod vault;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbPool, Repository, SurveyStore};
pub use errors::{AppError, Result};
pub use services::Services;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
