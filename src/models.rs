//! Core data models of the mirror.
//!
//! This module defines the TLP label, the per-advisory summary extracted
//! during mirroring, the locally written provider metadata, and the
//! aggregator manifest that describes the aggregated view.

use crate::error::{MirrorError, Result};
use crate::pathexpr::PathEval;
use crate::rolie::FeedRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A confidentiality label partitioning advisories (`WHITE`, `GREEN`, …).
///
/// Labels are kept as free-form strings because upstream feeds may carry
/// labels outside the classic set; casing is normalized at the use sites
/// (lowercase on disk, uppercase in display).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TlpLabel(String);

impl TlpLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The label used for directory-based catalogs, which carry no label
    /// metadata.
    pub fn white() -> Self {
        Self("WHITE".to_string())
    }

    /// The directory name form (lowercase).
    pub fn dir_name(&self) -> String {
        self.0.to_lowercase()
    }

    /// The display form (uppercase).
    pub fn display_name(&self) -> String {
        self.0.to_uppercase()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Publisher identity as carried in provider metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publisher {
    pub category: String,
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuing_authority: Option<String>,
}

/// Per-advisory record collected while mirroring.
#[derive(Debug, Clone)]
pub struct AdvisorySummary {
    /// The advisory identifier (`document.tracking.id`).
    pub id: String,
    /// The advisory title.
    pub title: String,
    /// The summary note, if the advisory carries one.
    pub summary: Option<String>,
    pub initial_release_date: DateTime<Utc>,
    pub current_release_date: DateTime<Utc>,
}

impl AdvisorySummary {
    /// Extract the summary fields from an advisory document.
    ///
    /// # Errors
    ///
    /// Returns `MirrorError::PathExpr` if the identifier, title or release
    /// dates are missing or malformed. The summary note is optional.
    pub fn from_document(eval: &mut PathEval, doc: &Value) -> Result<Self> {
        let id = eval
            .extract_string("$.document.tracking.id", doc)?
            .ok_or_else(|| MirrorError::path_expr("advisory has no document.tracking.id"))?;
        let title = eval
            .extract_string("$.document.title", doc)?
            .ok_or_else(|| MirrorError::path_expr("advisory has no document.title"))?;
        let initial_release_date = eval
            .extract_time("$.document.tracking.initial_release_date", doc)?
            .ok_or_else(|| MirrorError::path_expr("advisory has no initial_release_date"))?;
        let current_release_date = eval
            .extract_time("$.document.tracking.current_release_date", doc)?
            .ok_or_else(|| MirrorError::path_expr("advisory has no current_release_date"))?;

        let summary = summary_note(eval, doc)?;

        Ok(Self {
            id,
            title,
            summary,
            initial_release_date,
            current_release_date,
        })
    }
}

/// Find the text of the first `category == "summary"` document note.
fn summary_note(eval: &mut PathEval, doc: &Value) -> Result<Option<String>> {
    for note in eval.eval("$.document.notes[*]", doc)? {
        if note.get("category").and_then(Value::as_str) == Some("summary") {
            if let Some(text) = note.get("text").and_then(Value::as_str) {
                return Ok(Some(text.to_string()));
            }
        }
    }
    Ok(None)
}

/// A PGP key reference inside provider metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgpKeyRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A distribution block inside provider metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distribution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolie: Option<Rolie>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rolie {
    pub feeds: Vec<FeedRef>,
}

/// Metadata roles.
pub const ROLE_PUBLISHER: &str = "csaf_publisher";
pub const ROLE_PROVIDER: &str = "csaf_provider";

/// The locally written copy of a provider's metadata.
///
/// The local copy always points at locally re-anchored key URLs and at the
/// mirror's own feeds, never at the upstream ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub canonical_url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub distributions: Vec<Distribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    pub metadata_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_openpgp_keys: Vec<PgpKeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<Publisher>,
    pub role: String,
}

impl ProviderMetadata {
    /// Create metadata for a mirror rooted at `prefix`, announcing one ROLIE
    /// feed per label.
    pub fn with_prefix(prefix: &str, labels: &[TlpLabel]) -> Self {
        let feeds = labels
            .iter()
            .map(|label| FeedRef {
                summary: Some(format!("TLP:{} advisories", label.display_name())),
                tlp_label: Some(label.display_name()),
                url: Some(format!(
                    "{prefix}/csaf-feed-tlp-{}.json",
                    label.dir_name()
                )),
            })
            .collect::<Vec<_>>();

        let distributions = if feeds.is_empty() {
            Vec::new()
        } else {
            vec![Distribution {
                directory_url: None,
                rolie: Some(Rolie { feeds }),
            }]
        };

        Self {
            canonical_url: format!("{prefix}/provider-metadata.json"),
            distributions,
            last_updated: None,
            metadata_version: "2.0".to_string(),
            public_openpgp_keys: Vec::new(),
            publisher: None,
            role: ROLE_PROVIDER.to_string(),
        }
    }

    /// Announce a directory distribution rooted at `url`.
    pub fn add_directory_distribution(&mut self, url: String) {
        self.distributions.push(Distribution {
            directory_url: Some(url),
            rolie: None,
        });
    }
}

/// The aggregator identity block (configuration and manifest).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregatorInfo {
    /// `aggregator` mirrors; `lister` only lists (not supported here).
    pub category: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuing_authority: Option<String>,
    pub namespace: String,
}

/// The aggregator category that mirrors providers.
pub const CATEGORY_AGGREGATOR: &str = "aggregator";

impl AggregatorInfo {
    /// Validate the identity block.
    pub fn validate(&self) -> Result<()> {
        if self.category != CATEGORY_AGGREGATOR && self.category != "lister" {
            return Err(MirrorError::config(format!(
                "invalid aggregator category '{}'",
                self.category
            )));
        }
        if self.name.is_empty() {
            return Err(MirrorError::config("aggregator name must not be empty"));
        }
        if self.namespace.is_empty() {
            return Err(MirrorError::config(
                "aggregator namespace must not be empty",
            ));
        }
        Ok(())
    }
}

/// The top-level aggregator manifest (`aggregator.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregator {
    pub aggregator: AggregatorInfo,
    pub aggregator_version: String,
    pub canonical_url: String,
    pub csaf_providers: Vec<AggregatorProvider>,
    pub last_updated: DateTime<Utc>,
}

/// The manifest schema version emitted by this aggregator.
pub const AGGREGATOR_VERSION: &str = "2.0";

/// One per-provider fragment of the aggregator manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorProvider {
    pub metadata: AggregatorProviderMetadata,
    /// Exactly one entry: the local `provider-metadata.json` URL.
    pub mirrors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorProviderMetadata {
    pub last_updated: DateTime<Utc>,
    pub publisher: Publisher,
    pub role: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tlp_label_casing() {
        let label = TlpLabel::new("White");
        assert_eq!(label.dir_name(), "white");
        assert_eq!(label.display_name(), "WHITE");
        assert_eq!(TlpLabel::white().as_str(), "WHITE");
    }

    #[test]
    fn test_summary_from_document() {
        let mut eval = PathEval::new();
        let doc = json!({
            "document": {
                "title": "Example advisory",
                "tracking": {
                    "id": "ACME-2024-01",
                    "initial_release_date": "2024-01-10T00:00:00Z",
                    "current_release_date": "2024-02-01T00:00:00Z",
                },
                "notes": [
                    {"category": "legal_disclaimer", "text": "no warranty"},
                    {"category": "summary", "text": "Things were broken."},
                ],
            }
        });
        let summary = AdvisorySummary::from_document(&mut eval, &doc).unwrap();
        assert_eq!(summary.id, "ACME-2024-01");
        assert_eq!(summary.title, "Example advisory");
        assert_eq!(summary.summary.as_deref(), Some("Things were broken."));
        assert_eq!(summary.initial_release_date.to_rfc3339(), "2024-01-10T00:00:00+00:00");
    }

    #[test]
    fn test_summary_requires_tracking_id() {
        let mut eval = PathEval::new();
        let doc = json!({"document": {"title": "x"}});
        assert!(AdvisorySummary::from_document(&mut eval, &doc).is_err());
    }

    #[test]
    fn test_provider_metadata_prefix() {
        let labels = vec![TlpLabel::new("white"), TlpLabel::new("amber")];
        let pm = ProviderMetadata::with_prefix(
            "https://agg.example/.well-known/csaf-aggregator/acme",
            &labels,
        );
        assert_eq!(
            pm.canonical_url,
            "https://agg.example/.well-known/csaf-aggregator/acme/provider-metadata.json"
        );
        let rolie = pm.distributions[0].rolie.as_ref().unwrap();
        assert_eq!(rolie.feeds.len(), 2);
        assert_eq!(
            rolie.feeds[0].url.as_deref(),
            Some("https://agg.example/.well-known/csaf-aggregator/acme/csaf-feed-tlp-white.json")
        );
        assert_eq!(rolie.feeds[0].tlp_label.as_deref(), Some("WHITE"));
    }

    #[test]
    fn test_aggregator_info_validation() {
        let mut info = AggregatorInfo {
            category: "aggregator".to_string(),
            name: "Example".to_string(),
            contact_details: None,
            issuing_authority: None,
            namespace: "https://agg.example".to_string(),
        };
        assert!(info.validate().is_ok());

        info.category = "publisher".to_string();
        assert!(info.validate().is_err());
    }

    #[test]
    fn test_aggregator_manifest_serialization() {
        let manifest = Aggregator {
            aggregator: AggregatorInfo {
                category: "aggregator".to_string(),
                name: "Example".to_string(),
                contact_details: None,
                issuing_authority: None,
                namespace: "https://agg.example".to_string(),
            },
            aggregator_version: AGGREGATOR_VERSION.to_string(),
            canonical_url: "https://agg.example/.well-known/csaf/aggregator.json".to_string(),
            csaf_providers: vec![AggregatorProvider {
                metadata: AggregatorProviderMetadata {
                    last_updated: "2024-02-01T00:00:00Z".parse().unwrap(),
                    publisher: Publisher {
                        category: "vendor".to_string(),
                        name: "ACME".to_string(),
                        namespace: "https://acme.example".to_string(),
                        contact_details: None,
                        issuing_authority: None,
                    },
                    role: ROLE_PUBLISHER.to_string(),
                    url: "https://acme.example/.well-known/csaf/provider-metadata.json"
                        .to_string(),
                },
                mirrors: vec![
                    "https://agg.example/.well-known/csaf-aggregator/acme/provider-metadata.json"
                        .to_string(),
                ],
            }],
            last_updated: "2024-02-02T00:00:00Z".parse().unwrap(),
        };

        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["aggregator_version"], "2.0");
        assert_eq!(value["csaf_providers"][0]["mirrors"].as_array().unwrap().len(), 1);
    }
}
