//! Response access and shared-store collection

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::ResponsesConfig;
use crate::db::models::{FieldDefinition, FieldType, StorageClass};
use crate::db::{AppendOutcome, NewResponse, ResponseRecord, SurveyStore};
use crate::errors::{AppError, QuotaMetric, Result};
use crate::metrics;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsePage {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitResponseRequest {
    pub data: Map<String, Value>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedResponse {
    pub display_id: String,
    pub form_code: String,
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn check_coordinates(request: &SubmitResponseRequest) -> Result<()> {
    if let Some(lat) = request.latitude {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(AppError::invalid("latitude", "latitude must be within -90 and 90"));
        }
    }
    if let Some(lon) = request.longitude {
        if !(-180.0..=180.0).contains(&lon) {
            return Err(AppError::invalid("longitude", "longitude must be within -180 and 180"));
        }
    }
    if let Some(acc) = request.accuracy {
        if !acc.is_finite() || acc < 0.0 {
            return Err(AppError::invalid("accuracy", "accuracy must be a non-negative number"));
        }
    }
    Ok(())
}

/// Check submitted values against the form's field definitions
pub fn check_data(fields: &[FieldDefinition], data: &Map<String, Value>) -> Result<()> {
    if let Some(unknown) = data.keys().find(|k| !fields.iter().any(|f| &f.name == *k)) {
        return Err(AppError::invalid(
            "data",
            format!("'{}' is not a field of this form", unknown),
        ));
    }

    for field in fields {
        let value = data.get(&field.name);

        if field.required && value.map_or(true, is_blank) {
            return Err(AppError::MissingField {
                field: field.name.clone(),
            });
        }

        if let (FieldType::Number, Some(value)) = (field.field_type, value) {
            let numeric = match value {
                Value::Number(_) | Value::Null => true,
                Value::String(s) => s.trim().is_empty() || s.trim().parse::<f64>().is_ok(),
                _ => false,
            };
            if !numeric {
                return Err(AppError::invalid(
                    &field.name,
                    format!("'{}' must be a number", field.name),
                ));
            }
        }
    }

    Ok(())
}

#[derive(Clone)]
pub struct ResponseService {
    store: Arc<dyn SurveyStore>,
    config: ResponsesConfig,
}

impl ResponseService {
    pub fn new(store: Arc<dyn SurveyStore>, config: ResponsesConfig) -> Self {
        Self { store, config }
    }

    /// Page size actually served for a requested limit
    pub fn effective_limit(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.config.default_page_size)
            .min(self.config.max_page_size)
    }

    /// One page of the tenant's shared-store responses, newest first
    pub async fn list_responses(
        &self,
        tenant_id: Uuid,
        page: ResponsePage,
    ) -> Result<Vec<ResponseRecord>> {
        let limit = self.effective_limit(page.limit);
        let offset = page.offset.unwrap_or(0);
        if offset > i64::MAX as u64 {
            return Err(AppError::invalid(
                "offset",
                format!("offset must not exceed {}", i64::MAX),
            ));
        }

        self.store.list_responses(tenant_id, limit, offset).await
    }

    /// Store a submission for a form collecting into the shared store
    #[instrument(skip(self, request))]
    pub async fn submit_response(
        &self,
        form_code: &str,
        request: SubmitResponseRequest,
    ) -> Result<SubmittedResponse> {
        let form = self
            .store
            .find_active_form_by_code(form_code)
            .await?
            .ok_or_else(|| AppError::not_found("form", form_code))?;

        if form.class() != StorageClass::Shared {
            return Err(AppError::invalid(
                "form_code",
                "this form collects into the owner's own store",
            ));
        }

        check_coordinates(&request)?;
        check_data(&form.field_definitions()?, &request.data)?;

        let response = NewResponse {
            data: Value::Object(request.data),
            latitude: request.latitude,
            longitude: request.longitude,
            accuracy: request.accuracy,
        };

        match self.store.append_response(form_code, response).await? {
            AppendOutcome::Stored(stored) => {
                metrics::record_response_collected();
                info!(form_id = %stored.form_id, display_id = %stored.display_id, "Response stored");

                Ok(SubmittedResponse {
                    display_id: stored.display_id,
                    form_code: form_code.to_string(),
                })
            }
            AppendOutcome::CeilingReached { limit } => {
                metrics::record_quota_rejection(QuotaMetric::Responses);
                Err(AppError::QuotaExceeded {
                    metric: QuotaMetric::Responses,
                    limit,
                })
            }
            AppendOutcome::FormNotFound => Err(AppError::not_found("form", form_code)),
            AppendOutcome::NotShared => Err(AppError::invalid(
                "form_code",
                "this form collects into the owner's own store",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlansConfig;
    use crate::db::models::StoragePreference;
    use crate::db::MemoryStore;
    use crate::plans::PlanCatalog;
    use crate::services::forms::{CreateFormRequest, FormService};
    use crate::storage::StorageRouter;
    use crate::vault::CredentialVault;
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryStore>,
        forms: FormService,
        responses: ResponseService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let forms = FormService::new(
            store.clone(),
            Arc::new(PlanCatalog::new(&PlansConfig::default())),
            StorageRouter::new(CredentialVault::new("responses-test")),
            "http://localhost:8080",
        );
        let responses = ResponseService::new(store.clone(), ResponsesConfig::default());
        Fixture { store, forms, responses }
    }

    fn site_fields() -> Vec<FieldDefinition> {
        vec![
            FieldDefinition {
                name: "site".to_string(),
                label: "Site".to_string(),
                field_type: FieldType::Text,
                required: true,
            },
            FieldDefinition {
                name: "depth".to_string(),
                label: "Depth (m)".to_string(),
                field_type: FieldType::Number,
                required: false,
            },
        ]
    }

    fn submission(data: Value) -> SubmitResponseRequest {
        SubmitResponseRequest {
            data: data.as_object().cloned().unwrap_or_default(),
            latitude: Some(4.711),
            longitude: Some(-74.072),
            accuracy: Some(5.0),
        }
    }

    async fn create(fx: &Fixture, tenant_id: Uuid, title: &str) -> String {
        fx.forms
            .create_form(CreateFormRequest {
                tenant_id,
                title: title.to_string(),
                description: None,
                fields: site_fields(),
                table_name: None,
            })
            .await
            .unwrap()
            .form_code
    }

    #[test]
    fn test_effective_limit_clamps() {
        let fx = fixture();
        assert_eq!(fx.responses.effective_limit(None), 1000);
        assert_eq!(fx.responses.effective_limit(Some(10)), 10);
        assert_eq!(fx.responses.effective_limit(Some(999_999)), 5000);
    }

    #[test]
    fn test_check_data() {
        let fields = site_fields();
        let ok = json!({"site": "A1", "depth": "3.5"});
        assert!(check_data(&fields, ok.as_object().unwrap()).is_ok());

        let missing = json!({"depth": 2});
        assert!(matches!(
            check_data(&fields, missing.as_object().unwrap()),
            Err(AppError::MissingField { .. })
        ));

        let blank = json!({"site": "  "});
        assert!(check_data(&fields, blank.as_object().unwrap()).is_err());

        let not_number = json!({"site": "A1", "depth": "deep"});
        assert!(check_data(&fields, not_number.as_object().unwrap()).is_err());

        let unknown = json!({"site": "A1", "colour": "red"});
        assert!(check_data(&fields, unknown.as_object().unwrap()).is_err());
    }

    #[tokio::test]
    async fn test_submit_and_list() {
        let fx = fixture();
        let tenant = fx.store.seed_tenant("a@example.com", "free").await;
        let code = create(&fx, tenant.id, "Wells").await;

        let first = fx
            .responses
            .submit_response(&code, submission(json!({"site": "W1", "depth": 12})))
            .await
            .unwrap();
        assert_eq!(first.display_id, "AS_001");

        let second = fx
            .responses
            .submit_response(&code, submission(json!({"site": "W2"})))
            .await
            .unwrap();
        assert_eq!(second.display_id, "AS_002");

        let page = fx
            .responses
            .list_responses(tenant.id, ResponsePage::default())
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].display_id, "AS_002");
        assert_eq!(page[0].form_title, "Wells");
        assert_eq!(page[0].form_code, code);

        let offset = fx
            .responses
            .list_responses(tenant.id, ResponsePage { limit: Some(1), offset: Some(1) })
            .await
            .unwrap();
        assert_eq!(offset.len(), 1);
        assert_eq!(offset[0].display_id, "AS_001");

        let empty = fx
            .responses
            .list_responses(tenant.id, ResponsePage { limit: Some(0), offset: None })
            .await
            .unwrap();
        assert!(empty.is_empty());

        let beyond = fx
            .responses
            .list_responses(
                tenant.id,
                ResponsePage { limit: None, offset: Some(i64::MAX as u64 + 1) },
            )
            .await;
        assert!(matches!(beyond, Err(AppError::Validation { .. })));

        assert_eq!(fx.store.tenant(tenant.id).await.unwrap().total_responses, 2);
    }

    #[tokio::test]
    async fn test_responses_hidden_after_delete_and_isolated_per_tenant() {
        let fx = fixture();
        let owner = fx.store.seed_tenant("owner@example.com", "basic").await;
        let other = fx.store.seed_tenant("other@example.com", "basic").await;
        let code = create(&fx, owner.id, "Trees").await;

        fx.responses
            .submit_response(&code, submission(json!({"site": "T1"})))
            .await
            .unwrap();

        let none = fx
            .responses
            .list_responses(other.id, ResponsePage::default())
            .await
            .unwrap();
        assert!(none.is_empty());

        let form_id = fx.forms.list_forms(owner.id).await.unwrap()[0].form_id;
        fx.forms.delete_form(owner.id, form_id).await.unwrap();

        let hidden = fx
            .responses
            .list_responses(owner.id, ResponsePage::default())
            .await
            .unwrap();
        assert!(hidden.is_empty());

        let err = fx
            .responses
            .submit_response(&code, submission(json!({"site": "T2"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_response_ceiling() {
        let fx = fixture();
        let tenant = fx.store.seed_tenant("a@example.com", "free").await;
        let code = create(&fx, tenant.id, "Ceiling").await;

        for _ in 0..40 {
            fx.responses
                .submit_response(&code, submission(json!({"site": "x"})))
                .await
                .unwrap();
        }

        let err = fx
            .responses
            .submit_response(&code, submission(json!({"site": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::QuotaExceeded { metric: QuotaMetric::Responses, limit: 40 }
        ));
    }

    #[tokio::test]
    async fn test_rejects_bad_coordinates_and_owned_forms() {
        let fx = fixture();
        let tenant = fx.store.seed_tenant("a@example.com", "basic").await;
        let code = create(&fx, tenant.id, "Coords").await;

        let mut bad = submission(json!({"site": "x"}));
        bad.latitude = Some(91.0);
        assert!(fx.responses.submit_response(&code, bad).await.is_err());

        let vault = CredentialVault::new("responses-test");
        let mut owned = fx.store.seed_tenant("owned@example.com", "basic").await;
        owned.storage_preference = StoragePreference::Service.into();
        owned.service_url = Some(vault.encrypt("https://svc.example.org").unwrap());
        owned.service_key = Some(vault.encrypt("key").unwrap());
        fx.store.put_tenant(owned.clone()).await;

        let owned_code = create(&fx, owned.id, "Owned").await;
        let err = fx
            .responses
            .submit_response(&owned_code, submission(json!({"site": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}
