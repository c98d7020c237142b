//! Advisory validation.
//!
//! Two validators are applied in order: a local structural validator against
//! the canonical schema, returning a list of violations, and an optional
//! remote validation service. Schema violations drop the advisory; remote
//! validator *errors* abort the whole run, because they indicate
//! infrastructure failure rather than document failure.

use crate::config::RemoteValidatorConfig;
use crate::error::{MirrorError, Result};
use async_trait::async_trait;
use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::OnceLock;
use std::time::Duration;

/// The canonical CSAF JSON schema (structural subset).
static CSAF_SCHEMA: &str = include_str!("schema/csaf_json_schema.json");

fn validator() -> Result<&'static jsonschema::Validator> {
    static VALIDATOR: OnceLock<std::result::Result<jsonschema::Validator, String>> =
        OnceLock::new();
    VALIDATOR
        .get_or_init(|| {
            let schema: Value =
                serde_json::from_str(CSAF_SCHEMA).map_err(|e| e.to_string())?;
            jsonschema::options()
                .with_draft(Draft::Draft202012)
                .build(&schema)
                .map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| MirrorError::schema(e.clone()))
}

/// Validate a parsed advisory against the canonical schema.
///
/// Returns the list of violations; an empty list means the document is
/// structurally valid.
///
/// # Errors
///
/// Only fails if the embedded schema itself cannot be compiled.
pub fn validate_csaf(doc: &Value) -> Result<Vec<String>> {
    let validator = validator()?;
    Ok(validator
        .iter_errors(doc)
        .map(|err| format!("{}: {err}", err.instance_path))
        .collect())
}

/// The result reported by a remote validation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteValidationResult {
    /// Overall verdict.
    pub valid: bool,
    /// Per-test details, passed through for logging.
    #[serde(default)]
    pub tests: Vec<Value>,
}

/// A remote validation service.
#[async_trait]
pub trait RemoteValidator: Send + Sync {
    /// Validate an advisory document remotely.
    async fn validate(&self, doc: &Value) -> Result<RemoteValidationResult>;
}

/// The HTTP remote validator speaking the validation service protocol.
pub struct HttpRemoteValidator {
    client: reqwest::Client,
    url: String,
    presets: Vec<String>,
}

impl HttpRemoteValidator {
    pub fn new(config: &RemoteValidatorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| MirrorError::remote_validator(e.to_string()))?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            presets: config.presets.clone(),
        })
    }
}

#[async_trait]
impl RemoteValidator for HttpRemoteValidator {
    async fn validate(&self, doc: &Value) -> Result<RemoteValidationResult> {
        let tests: Vec<Value> = self
            .presets
            .iter()
            .map(|name| json!({"type": "preset", "name": name}))
            .collect();
        let body = json!({"tests": tests, "document": doc});

        let url = format!("{}/api/v1/validate", self.url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MirrorError::remote_validator(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MirrorError::remote_validator(format!(
                "validation service returned status {status}"
            )));
        }

        response
            .json::<RemoteValidationResult>()
            .await
            .map_err(|e| MirrorError::remote_validator(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn minimal_advisory(id: &str) -> Value {
        json!({
            "document": {
                "category": "csaf_base",
                "csaf_version": "2.0",
                "title": "Test advisory",
                "publisher": {
                    "category": "vendor",
                    "name": "ACME",
                    "namespace": "https://acme.example",
                },
                "tracking": {
                    "id": id,
                    "status": "final",
                    "version": "1",
                    "initial_release_date": "2024-01-10T00:00:00Z",
                    "current_release_date": "2024-02-01T00:00:00Z",
                    "revision_history": [{
                        "date": "2024-01-10T00:00:00Z",
                        "number": "1",
                        "summary": "Initial release",
                    }],
                },
            }
        })
    }

    #[test]
    fn test_valid_advisory_passes() {
        let violations = validate_csaf(&minimal_advisory("ACME-2024-01")).unwrap();
        assert!(violations.is_empty(), "unexpected violations: {violations:?}");
    }

    #[test]
    fn test_missing_tracking_is_rejected() {
        let mut doc = minimal_advisory("ACME-2024-01");
        doc["document"]
            .as_object_mut()
            .unwrap()
            .remove("tracking");
        let violations = validate_csaf(&doc).unwrap();
        assert!(!violations.is_empty());
    }

    #[test]
    fn test_wrong_csaf_version_is_rejected() {
        let mut doc = minimal_advisory("ACME-2024-01");
        doc["document"]["csaf_version"] = json!("1.0");
        let violations = validate_csaf(&doc).unwrap();
        assert!(!violations.is_empty());
    }

    #[test]
    fn test_non_object_is_rejected() {
        let violations = validate_csaf(&json!("not an advisory")).unwrap();
        assert!(!violations.is_empty());
    }

    #[test]
    fn test_remote_result_parses() {
        let raw = r#"{"valid": false, "tests": [{"name": "csaf_2_0", "isValid": false}]}"#;
        let result: RemoteValidationResult = serde_json::from_str(raw).unwrap();
        assert!(!result.valid);
        assert_eq!(result.tests.len(), 1);
    }
}
