//! Provider metadata discovery.
//!
//! A provider's metadata document is located by probing a fixed list of
//! well-known paths in order. A not-found response or a malformed JSON body
//! moves on to the next candidate; any other error aborts. When every probe
//! is exhausted, `.well-known/security.txt` is scanned for a
//! provider-metadata pointer as a last resort.

use crate::client::HttpClient;
use crate::error::{MirrorError, Result};
use serde_json::Value;
use tracing::{debug, warn};

/// Well-known metadata locations, probed in this order.
pub const METADATA_LOCATIONS: [&str; 4] = [
    ".well-known/csaf",
    "security/data/csaf",
    "advisories/csaf",
    "security/csaf",
];

/// A located provider metadata document and the URL it was obtained from.
#[derive(Debug, Clone)]
pub struct LocatedMetadata {
    /// The parsed metadata document.
    pub doc: Value,
    /// The URL the document was fetched from.
    pub url: String,
}

/// Locate the provider metadata for a domain.
pub async fn locate_provider_metadata(
    client: &HttpClient,
    domain: &str,
) -> Result<LocatedMetadata> {
    let base = domain_base(domain);

    for location in METADATA_LOCATIONS {
        let url = format!("{base}/{location}");
        match client.get_json(&url).await {
            Ok(doc) => {
                debug!(url = %url, "found provider metadata");
                return Ok(LocatedMetadata { doc, url });
            }
            Err(err) if err.is_not_found() => continue,
            Err(MirrorError::Json(err)) => {
                warn!(url = %url, %err, "ignoring malformed provider metadata");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    // Fall back to the security.txt pointer.
    let security_txt = format!("{base}/.well-known/security.txt");
    let body = match client.get_text(&security_txt).await {
        Ok(body) => body,
        Err(MirrorError::NotFound(_)) | Err(MirrorError::Status { .. }) => {
            return Err(MirrorError::Metadata {
                domain: domain.to_string(),
            });
        }
        Err(err) => return Err(err),
    };

    let url = extract_provider_url(&body).ok_or_else(|| MirrorError::Metadata {
        domain: domain.to_string(),
    })?;

    let doc = client.get_json(&url).await?;
    Ok(LocatedMetadata { doc, url })
}

/// Normalize a configured domain into a probe base URL.
fn domain_base(domain: &str) -> String {
    if domain.starts_with("https://") || domain.starts_with("http://") {
        domain.trim_end_matches('/').to_string()
    } else {
        format!("https://{domain}")
    }
}

/// Scan a security.txt body for the first provider-metadata pointer.
pub fn extract_provider_url(body: &str) -> Option<String> {
    for line in body.lines() {
        let line = line.trim();
        if let Some(value) = strip_field(line, "CSAF:") {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn strip_field<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    if line.len() >= field.len() && line[..field.len()].eq_ignore_ascii_case(field) {
        Some(line[field.len()..].trim())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_base() {
        assert_eq!(domain_base("acme.example"), "https://acme.example");
        assert_eq!(
            domain_base("https://acme.example/"),
            "https://acme.example"
        );
    }

    #[test]
    fn test_extract_provider_url() {
        let body = "\
# Our security policy
Contact: mailto:security@acme.example
CSAF: https://acme.example/.well-known/csaf/provider-metadata.json
CSAF: https://acme.example/other.json
";
        assert_eq!(
            extract_provider_url(body).as_deref(),
            Some("https://acme.example/.well-known/csaf/provider-metadata.json")
        );
    }

    #[test]
    fn test_extract_provider_url_case_insensitive() {
        let body = "csaf: https://acme.example/pmd.json";
        assert_eq!(
            extract_provider_url(body).as_deref(),
            Some("https://acme.example/pmd.json")
        );
    }

    #[test]
    fn test_extract_provider_url_missing() {
        assert_eq!(extract_provider_url("Contact: x@y.z"), None);
        assert_eq!(extract_provider_url("CSAF:"), None);
    }
}
