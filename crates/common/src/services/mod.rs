//! Engine services
//!
//! Each service owns the decision logic for one area and talks to
//! persistence only through [`SurveyStore`](crate::db::SurveyStore).

pub mod forms;
pub mod responses;
pub mod tenants;

pub use forms::{generate_form_code, CreateFormRequest, CreatedForm, FormService, FormSummary};
pub use responses::{ResponsePage, ResponseService, SubmitResponseRequest, SubmittedResponse};
pub use tenants::{
    ConfigureStorageRequest, PlanUsage, RegisterTenantRequest, StorageSettings,
    TenantConfigView, TenantCredentials, TenantProfile, TenantService,
};

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::SurveyStore;
use crate::plans::PlanCatalog;
use crate::storage::StorageRouter;
use crate::vault::CredentialVault;

/// All services wired over one store
#[derive(Clone)]
pub struct Services {
    pub forms: FormService,
    pub responses: ResponseService,
    pub tenants: TenantService,
}

impl Services {
    pub fn new(config: &AppConfig, store: Arc<dyn SurveyStore>) -> Self {
        let vault = CredentialVault::new(&config.vault.encryption_key);
        let plans = Arc::new(PlanCatalog::new(&config.plans));
        let router = StorageRouter::new(vault.clone());

        Self {
            forms: FormService::new(
                store.clone(),
                plans.clone(),
                router.clone(),
                config.server.public_base_url.clone(),
            ),
            responses: ResponseService::new(store.clone(), config.responses.clone()),
            tenants: TenantService::new(store, plans, router, vault),
        }
    }
}
