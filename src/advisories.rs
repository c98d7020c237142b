//! Advisory enumeration.
//!
//! Given a provider's metadata document, this module produces the set of
//! advisory files to mirror, labeled by their TLP tag. Two catalog protocols
//! exist: ROLIE feeds (`$.distributions[*].rolie.feeds`) and directory
//! catalogs discovered through `changes.csv`. Directory entries are emitted
//! under the `WHITE` label because directory catalogs carry no label
//! metadata; that is a documented gap of the protocol, not of this mirror.

use crate::client::HttpClient;
use crate::error::Result;
use crate::models::TlpLabel;
use crate::pathexpr::PathEval;
use crate::rolie::{FeedRef, RolieFeed};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{info, warn};
use url::Url;

/// Predicate deciding whether an advisory timestamp is recent enough.
pub type AgeAccept = Box<dyn Fn(DateTime<Utc>) -> bool + Send + Sync>;

/// A remote advisory file and the URLs of its integrity artifacts.
///
/// The variant matters: a plain entry carries explicit artifact URLs from its
/// feed, and a missing hash there is a fatal content error, while a directory
/// entry always has derivable URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvisoryFile {
    /// An advisory listed in a ROLIE feed with explicit artifact URLs.
    Plain {
        url: String,
        sha256: String,
        sha512: String,
        signature: String,
    },
    /// An advisory listed in a `changes.csv` directory catalog; artifact
    /// URLs are derived by suffixing.
    Directory { url: String },
}

impl AdvisoryFile {
    /// The canonical URL of the advisory.
    pub fn url(&self) -> &str {
        match self {
            Self::Plain { url, .. } | Self::Directory { url } => url,
        }
    }

    /// The URL of the SHA-256 artifact.
    pub fn sha256_url(&self) -> String {
        match self {
            Self::Plain { sha256, .. } => sha256.clone(),
            Self::Directory { url } => format!("{url}.sha256"),
        }
    }

    /// The URL of the SHA-512 artifact.
    pub fn sha512_url(&self) -> String {
        match self {
            Self::Plain { sha512, .. } => sha512.clone(),
            Self::Directory { url } => format!("{url}.sha512"),
        }
    }

    /// The URL of the detached signature.
    pub fn sign_url(&self) -> String {
        match self {
            Self::Plain { signature, .. } => signature.clone(),
            Self::Directory { url } => format!("{url}.asc"),
        }
    }

    /// Whether this entry came from a directory catalog.
    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }
}

/// Advisory files grouped under one TLP label.
#[derive(Debug)]
pub struct LabeledFiles {
    pub label: TlpLabel,
    pub files: Vec<AdvisoryFile>,
}

/// Extracts the advisory files announced by a provider metadata document.
pub struct AdvisoryFileProcessor<'a> {
    client: &'a HttpClient,
    doc: &'a Value,
    base: Url,
    /// Optional age filter applied to both catalog protocols.
    pub age_accept: Option<AgeAccept>,
}

impl<'a> AdvisoryFileProcessor<'a> {
    pub fn new(client: &'a HttpClient, doc: &'a Value, base: Url) -> Self {
        Self {
            client,
            doc,
            base,
            age_accept: None,
        }
    }

    /// Produce the labeled advisory files for this provider.
    pub async fn enumerate(&self) -> Result<Vec<LabeledFiles>> {
        let mut eval = PathEval::new();

        let feed_groups = eval.eval("$.distributions[*].rolie.feeds", self.doc)?;
        if !feed_groups.is_empty() {
            let mut feeds: Vec<FeedRef> = Vec::new();
            for group in feed_groups {
                feeds.extend(serde_json::from_value::<Vec<FeedRef>>(group.clone())?);
            }
            info!(count = feeds.len(), "found ROLIE feeds");

            let mut groups = Vec::new();
            for feed in &feeds {
                if let Some(labeled) = self.process_rolie_feed(feed).await {
                    groups.push(labeled);
                }
            }
            return Ok(groups);
        }

        // No ROLIE feeds: fall back to directory catalogs.
        let mut dir_urls: Vec<String> = eval
            .eval("$.distributions[*].directory_url", self.doc)?
            .into_iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .filter(|u| !u.is_empty())
            .collect();

        if dir_urls.is_empty() {
            dir_urls.push(self.base.as_str().to_string());
        }

        let mut groups = Vec::new();
        for dir_url in dir_urls {
            let files = self.load_changes(&dir_url).await?;
            groups.push(LabeledFiles {
                // Directory catalogs carry no label metadata.
                label: TlpLabel::white(),
                files,
            });
        }
        Ok(groups)
    }

    /// Fetch one ROLIE feed and collect its advisory files.
    ///
    /// Feed-level problems are logged and skip the feed; they never fail the
    /// provider.
    async fn process_rolie_feed(&self, feed: &FeedRef) -> Option<LabeledFiles> {
        let raw_url = feed.url.as_deref()?;
        let feed_url = match self.base.join(raw_url) {
            Ok(u) => u,
            Err(err) => {
                warn!(url = raw_url, %err, "invalid URL in feed");
                return None;
            }
        };
        info!(url = %feed_url, "loading ROLIE feed");

        let body = match self.client.get_text(feed_url.as_str()).await {
            Ok(body) => body,
            Err(err) => {
                warn!(url = %feed_url, %err, "cannot get ROLIE feed");
                return None;
            }
        };
        let rolie: RolieFeed = match serde_json::from_str(&body) {
            Ok(rolie) => rolie,
            Err(err) => {
                warn!(url = %feed_url, %err, "loading ROLIE feed failed");
                return None;
            }
        };

        let files = collect_feed_files(&rolie, &feed_url, &self.age_accept);
        let label = feed
            .tlp_label
            .clone()
            .map(TlpLabel::new)
            .unwrap_or_else(|| TlpLabel::new("unknown"));

        Some(LabeledFiles { label, files })
    }

    /// Load `<base>/changes.csv` and return the advisory files it lists.
    async fn load_changes(&self, base_url: &str) -> Result<Vec<AdvisoryFile>> {
        let base = Url::parse(base_url)?;
        let changes_url = join_url(&base, "changes.csv")?;
        let data = self.client.get_bytes(changes_url.as_str()).await?;
        parse_changes(&data, &base, changes_url.as_str(), &self.age_accept)
    }
}

/// Collect the advisory files of one parsed ROLIE feed.
///
/// Entries without a `self` link are silently skipped; entries missing both
/// hashes or the signature are logged and dropped. One hash is sufficient.
fn collect_feed_files(
    rolie: &RolieFeed,
    feed_url: &Url,
    age_accept: &Option<AgeAccept>,
) -> Vec<AdvisoryFile> {
    let mut files = Vec::new();

    let resolve = |href: &str| -> String {
        if href.is_empty() {
            return String::new();
        }
        match feed_url.join(href) {
            Ok(u) => u.to_string(),
            Err(err) => {
                warn!(url = href, %err, "invalid URL in feed entry");
                String::new()
            }
        }
    };

    for entry in &rolie.feed.entry {
        // Entries without an update timestamp bypass the age filter.
        if let (Some(accept), Some(updated)) = (age_accept, entry.updated) {
            if !accept(updated) {
                continue;
            }
        }

        let mut this = String::new();
        let mut sha256 = String::new();
        let mut sha512 = String::new();
        let mut signature = String::new();

        for link in &entry.link {
            let lower = link.href.to_lowercase();
            match link.rel.as_str() {
                "self" => this = resolve(&link.href),
                "signature" => signature = resolve(&link.href),
                "hash" if lower.ends_with(".sha256") => sha256 = resolve(&link.href),
                "hash" if lower.ends_with(".sha512") => sha512 = resolve(&link.href),
                _ => {}
            }
        }

        if this.is_empty() {
            continue;
        }
        if sha256.is_empty() && sha512.is_empty() {
            warn!(file = %this, "no hash listed on ROLIE feed");
            continue;
        }
        if signature.is_empty() {
            warn!(file = %this, "no signature listed on ROLIE feed");
            continue;
        }

        files.push(AdvisoryFile::Plain {
            url: this,
            sha256,
            sha512,
            signature,
        });
    }
    files
}

/// Parse a `changes.csv` body into directory advisory files.
///
/// Rows with too few columns, unparseable timestamps or invalid URLs are
/// logged and skipped.
fn parse_changes(
    data: &[u8],
    base: &Url,
    changes_url: &str,
    age_accept: &Option<AgeAccept>,
) -> Result<Vec<AdvisoryFile>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut files = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let line = line + 1;
        let record = record?;
        if record.len() < 2 {
            warn!(url = changes_url, line, "row has not enough columns");
            continue;
        }
        let time = match DateTime::parse_from_rfc3339(&record[1]) {
            Ok(t) => t.with_timezone(&Utc),
            Err(err) => {
                warn!(url = changes_url, line, %err, "row has an invalid time stamp");
                continue;
            }
        };
        if let Some(accept) = age_accept {
            if !accept(time) {
                continue;
            }
        }
        let path = &record[0];
        let file_url = match join_url(base, path) {
            Ok(u) => u,
            Err(err) => {
                warn!(url = changes_url, line, path, %err, "row contains an invalid URL");
                continue;
            }
        };
        files.push(AdvisoryFile::Directory {
            url: file_url.to_string(),
        });
    }
    Ok(files)
}

/// Join a path onto a base URL, always appending.
///
/// `Url::join` resolves relative references and would replace the last path
/// segment of a directory URL without a trailing slash.
fn join_url(base: &Url, path: &str) -> Result<Url> {
    let mut joined = base.as_str().trim_end_matches('/').to_string();
    joined.push('/');
    joined.push_str(path.trim_start_matches('/'));
    Ok(Url::parse(&joined)?)
}

/// Canonicalize an advisory filename: lowercase, with every character run
/// outside `[+\-a-z0-9]` collapsed to `_`, ending in `.json`.
pub fn clean_file_name(name: &str) -> String {
    static INVALID: OnceLock<Regex> = OnceLock::new();
    let invalid =
        INVALID.get_or_init(|| Regex::new(r"[^+\-a-z0-9]+").expect("static pattern compiles"));

    let lower = name.to_lowercase();
    let stem = lower.strip_suffix(".json").unwrap_or(&lower);
    format!("{}.json", invalid.replace_all(stem, "_"))
}

/// Whether a filename is already in canonical form.
pub fn conforming_file_name(name: &str) -> bool {
    name == clean_file_name(name)
}
