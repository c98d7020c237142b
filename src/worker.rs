//! The per-provider mirror worker.
//!
//! A worker owns one provider job end to end: locate the metadata, check the
//! mirroring policy, enumerate the catalog, download and verify every
//! advisory into a staging directory, write the index outputs and the local
//! provider metadata, mirror the PGP keys, and finally publish the snapshot
//! with an atomic directory swap. Advisory-level problems are logged and
//! skip the advisory; provider-level problems remove the staging directory
//! and fail the job.

use crate::advisories::{
    AdvisoryFile, AdvisoryFileProcessor, LabeledFiles, clean_file_name, conforming_file_name,
};
use crate::client::HttpClient;
use crate::config::{Config, ProviderConfig};
use crate::error::{MirrorError, Result};
use crate::indices::{self, SummaryEntry};
use crate::keys::{self, Signer};
use crate::metadata;
use crate::models::{
    AdvisorySummary, AggregatorProvider, AggregatorProviderMetadata, PgpKeyRef, ProviderMetadata,
    Publisher, ROLE_PROVIDER, ROLE_PUBLISHER, TlpLabel,
};
use crate::pathexpr::PathEval;
use crate::transaction;
use crate::validation::{self, HttpRemoteValidator, RemoteValidator};
use chrono::Datelike;
use futures_util::StreamExt;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Per-request timeout for upstream downloads.
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Mirrors a single provider into the aggregator's directory tree.
pub struct MirrorWorker {
    config: Arc<Config>,
    provider: ProviderConfig,
    client: HttpClient,
    eval: PathEval,
    remote_validator: Option<HttpRemoteValidator>,
    ignore: Vec<Regex>,
    // The signing key is unlocked at most once, on first use.
    signer: Option<Signer>,
    signer_loaded: bool,
    dir: Option<PathBuf>,
    summaries: BTreeMap<String, Vec<SummaryEntry>>,
    categories: BTreeMap<String, BTreeSet<String>>,
    // Streaming buffer, reset between advisories.
    content: Vec<u8>,
}

impl MirrorWorker {
    pub fn new(config: Arc<Config>, provider: ProviderConfig) -> Result<Self> {
        let client = HttpClient::new(HTTP_TIMEOUT, None)?;
        let remote_validator = config
            .remote_validator
            .as_ref()
            .map(HttpRemoteValidator::new)
            .transpose()?;
        let ignore = provider.ignore_regexes()?;

        Ok(Self {
            config,
            provider,
            client,
            eval: PathEval::new(),
            remote_validator,
            ignore,
            signer: None,
            signer_loaded: false,
            dir: None,
            summaries: BTreeMap::new(),
            categories: BTreeMap::new(),
            content: Vec::new(),
        })
    }

    /// Mirror the provider, returning its aggregator manifest fragment.
    ///
    /// On failure the staging directory is removed before the error is
    /// returned.
    pub async fn run(mut self) -> Result<AggregatorProvider> {
        let result = self.mirror().await;
        if result.is_err() {
            if let Some(dir) = self.dir.take() {
                if let Err(err) = fs::remove_dir_all(&dir) {
                    if err.kind() != ErrorKind::NotFound {
                        error!(path = %dir.display(), %err, "could not remove staging directory");
                    }
                }
            }
        }
        result
    }

    async fn mirror(&mut self) -> Result<AggregatorProvider> {
        let located =
            metadata::locate_provider_metadata(&self.client, &self.provider.domain).await?;
        info!(provider = %self.provider.name, url = %located.url, "located provider metadata");

        if !self.mirror_allowed(&located.doc) {
            return Err(MirrorError::Policy {
                provider: self.provider.name.clone(),
            });
        }

        let mut base = Url::parse(&located.url)?;
        base.set_path("");

        let groups = {
            let mut processor = AdvisoryFileProcessor::new(&self.client, &located.doc, base);
            processor.age_accept = self.provider.age_accept();
            processor.enumerate().await?
        };

        // Stage even when the catalog is empty, so the provider still
        // publishes a consistent (if bare) snapshot.
        self.create_dir()?;

        for group in groups {
            self.mirror_files(group).await?;
        }

        self.write_indices()?;
        self.write_provider_metadata(&located.doc).await?;

        // Build the manifest fragment before publishing, so the commit is
        // the final step and failures never touch a published snapshot.
        let fragment = self.create_aggregator_provider(&located.doc)?;
        self.commit()?;

        Ok(fragment)
    }

    /// Extract `$.mirror_on_CSAF_aggregators`; absence counts as refusal.
    fn mirror_allowed(&mut self, doc: &Value) -> bool {
        matches!(
            self.eval.extract_bool("$.mirror_on_CSAF_aggregators", doc),
            Ok(Some(true))
        )
    }

    fn create_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.dir {
            return Ok(dir.clone());
        }
        let dir = transaction::make_staging_dir(&self.config.folder, &self.provider.name)?;
        self.dir = Some(dir.clone());
        Ok(dir)
    }

    /// The public base URL of this provider's mirror.
    fn provider_base_url(&self) -> String {
        format!(
            "{}/.well-known/csaf-aggregator/{}",
            self.config.domain.trim_end_matches('/'),
            self.provider.name
        )
    }

    /// Mirror one label group of advisory files into the staging directory.
    async fn mirror_files(&mut self, group: LabeledFiles) -> Result<()> {
        let label = group.label.dir_name();
        let dir = self.create_dir()?;

        let mut year_dirs: HashMap<i32, PathBuf> = HashMap::new();
        let mut collected: Vec<SummaryEntry> = Vec::new();

        for file in group.files {
            let url = match Url::parse(file.url()) {
                Ok(url) => url,
                Err(err) => {
                    error!(url = file.url(), %err, "could not parse advisory file URL");
                    continue;
                }
            };

            if self.ignore.iter().any(|re| re.is_match(file.url())) {
                debug!(provider = %self.provider.name, url = file.url(), "ignoring advisory");
                continue;
            }

            let filename = match url.path_segments().and_then(|mut s| s.next_back()) {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => {
                    warn!(url = %url, "advisory URL has no filename");
                    continue;
                }
            };
            if !conforming_file_name(&filename) {
                warn!(
                    filename = %filename,
                    "ignoring advisory because of non-conforming filename"
                );
                continue;
            }

            let (advisory, sha256_hex, sha512_hex) =
                match self.download_advisory(file.url()).await {
                    Ok(parts) => parts,
                    Err(err) => {
                        error!(url = file.url(), %err, "error while downloading advisory");
                        continue;
                    }
                };

            let violations = validation::validate_csaf(&advisory)?;
            if !violations.is_empty() {
                error!(
                    url = file.url(),
                    violations = violations.len(),
                    "advisory has schema validation errors"
                );
                continue;
            }

            if let Some(validator) = &self.remote_validator {
                // Infrastructure failures abort the run, not just this file.
                let verdict = validator.validate(&advisory).await?;
                if !verdict.valid {
                    error!(url = file.url(), "advisory does not validate remotely");
                    continue;
                }
            }

            let summary = match AdvisorySummary::from_document(&mut self.eval, &advisory) {
                Ok(summary) => summary,
                Err(err) => {
                    error!(url = file.url(), %err, "error while creating advisory summary");
                    continue;
                }
            };

            if clean_file_name(&summary.id) != filename {
                error!(id = %summary.id, filename = %filename, "ID mismatch");
            }

            self.extract_categories(&label, &advisory);

            if !self.check_upstream_hashes(&file, &sha256_hex, &sha512_hex).await {
                continue;
            }

            let year = summary.initial_release_date.year();
            let year_dir = match year_dirs.get(&year) {
                Some(path) => path.clone(),
                None => {
                    let path = dir.join(&label).join(year.to_string());
                    fs::create_dir_all(&path)?;
                    year_dirs.insert(year, path.clone());
                    path
                }
            };

            let path = year_dir.join(&filename);
            write_file_hashes(&path, &filename, &self.content, &sha256_hex, &sha512_hex)?;

            self.download_signature_or_sign(&file.sign_url(), &append_ext(&path, "asc"))
                .await?;

            collected.push(SummaryEntry {
                filename,
                summary,
                url: file.url().to_string(),
            });
        }

        self.summaries.entry(label).or_default().extend(collected);
        Ok(())
    }

    /// Download an advisory, teeing the stream into both hashers and the
    /// content buffer, then strictly parse the buffered bytes as JSON.
    async fn download_advisory(&mut self, url: &str) -> Result<(Value, String, String)> {
        let response = self.client.get(url).await?;

        let mut sha256 = Sha256::new();
        let mut sha512 = Sha512::new();
        self.content.clear();

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            sha256.update(&chunk);
            sha512.update(&chunk);
            self.content.extend_from_slice(&chunk);
        }

        let advisory: Value = serde_json::from_slice(&self.content)?;
        Ok((
            advisory,
            hex::encode(sha256.finalize()),
            hex::encode(sha512.finalize()),
        ))
    }

    /// Compare upstream hash files against the locally computed digests.
    ///
    /// Returns `false` if an upstream hash exists and disagrees; the advisory
    /// is then dropped. Missing hash files skip the comparison.
    async fn check_upstream_hashes(
        &self,
        file: &AdvisoryFile,
        sha256_hex: &str,
        sha512_hex: &str,
    ) -> bool {
        let checks = [
            (file.sha256_url(), sha256_hex, "sha256"),
            (file.sha512_url(), sha512_hex, "sha512"),
        ];
        for (url, local, kind) in checks {
            if url.is_empty() {
                continue;
            }
            match self.client.get_text(&url).await {
                Ok(body) => match body.split_whitespace().next() {
                    Some(remote) if remote.eq_ignore_ascii_case(local) => {}
                    Some(_) => {
                        error!(
                            url = %url,
                            kind = kind,
                            "upstream hash does not match mirrored content"
                        );
                        return false;
                    }
                    None => warn!(url = %url, kind = kind, "upstream hash file is empty"),
                },
                Err(err) if err.is_not_found() => {}
                Err(err) => warn!(url = %url, kind = kind, %err, "could not fetch upstream hash"),
            }
        }
        true
    }

    /// Accumulate category values for a label.
    ///
    /// Rules come from the provider or, failing that, the global
    /// configuration. `expr:` rules are compiled first and evaluated against
    /// the advisory; rule-level problems are logged and skip the rule.
    fn extract_categories(&mut self, label: &str, advisory: &Value) {
        const EXPR_PREFIX: &str = "expr:";

        let rules = self.provider.effective_categories(&self.config).to_vec();
        if rules.is_empty() {
            return;
        }

        let mut dynamic: Vec<String> = Vec::new();
        for rule in &rules {
            if let Some(expr) = rule.strip_prefix(EXPR_PREFIX) {
                if let Err(err) = self.eval.compile(expr) {
                    error!(expr = %expr, %err, "compiling category expression failed");
                    continue;
                }
                // Misses are fine here; they just contribute nothing.
                if let Ok(values) = self.eval.extract_string_tree(expr, advisory) {
                    dynamic.extend(values);
                }
            } else {
                dynamic.push(rule.clone());
            }
        }

        let set = self.categories.entry(label.to_string()).or_default();
        for category in dynamic {
            set.insert(category);
        }
    }

    /// Fetch the upstream signature, or sign the content ourselves.
    async fn download_signature_or_sign(&mut self, url: &str, path: &Path) -> Result<()> {
        let signature = match self.download_signature(url).await {
            Ok(signature) => Some(signature),
            Err(err) => {
                if !err.is_not_found() {
                    error!(url = %url, %err, "could not fetch signature");
                }
                self.ensure_signer()?;
                match &self.signer {
                    Some(signer) => Some(signer.sign_detached(&self.content)?),
                    None => {
                        warn!(path = %path.display(), "no signature stored, no signing key configured");
                        None
                    }
                }
            }
        };

        if let Some(signature) = signature {
            fs::write(path, signature)?;
        }
        Ok(())
    }

    /// Download and syntax-check a detached signature.
    async fn download_signature(&self, url: &str) -> Result<String> {
        let body = self.client.get_text(url).await?;
        keys::parse_armored_signature(&body)?;
        Ok(body)
    }

    fn ensure_signer(&mut self) -> Result<()> {
        if self.signer_loaded {
            return Ok(());
        }
        self.signer_loaded = true;
        if let Some(path) = &self.config.openpgp_private_key {
            self.signer = Some(Signer::load(path, self.config.passphrase.as_deref())?);
        }
        Ok(())
    }

    /// Write `changes.csv`, `index.txt` and the ROLIE feed for every label.
    fn write_indices(&mut self) -> Result<()> {
        let Some(dir) = self.dir.clone() else {
            return Ok(());
        };
        for (label, entries) in &self.summaries {
            info!(label = %label, count = entries.len(), "writing indices");
            if let Some(categories) = self.categories.get(label) {
                debug!(label = %label, categories = ?categories, "collected categories");
            }
            indices::write_changes_csv(&dir, label, entries)?;
            indices::write_index_txt(&dir, label, entries)?;
            indices::write_rolie_feed(
                &dir,
                self.config.domain.trim_end_matches('/'),
                &self.provider.name,
                label,
                entries,
            )?;
        }
        Ok(())
    }

    /// Compose and write the local provider metadata, including the
    /// re-anchored PGP keys.
    async fn write_provider_metadata(&mut self, doc: &Value) -> Result<()> {
        let dir = self.create_dir()?;
        let prefix = self.provider_base_url();

        let labels: Vec<TlpLabel> = self.summaries.keys().map(TlpLabel::new).collect();
        let mut pm = ProviderMetadata::with_prefix(&prefix, &labels);
        for label in &labels {
            pm.add_directory_distribution(format!("{prefix}/{}", label.dir_name()));
        }

        pm.role = if self.provider.domain.starts_with("https://") {
            ROLE_PUBLISHER
        } else {
            ROLE_PROVIDER
        }
        .to_string();

        // Extraction problems from the original provider are only logged.
        match self.eval.extract::<Publisher>("$.publisher", doc) {
            Ok(publisher) => pm.publisher = publisher,
            Err(err) => error!(%err, "extracting publisher from original provider failed"),
        }
        match self.eval.extract_time("$.last_updated", doc) {
            Ok(last_updated) => pm.last_updated = last_updated,
            Err(err) => error!(%err, "extracting last_updated from original provider failed"),
        }
        match self.eval.extract::<Vec<PgpKeyRef>>("$.public_openpgp_keys", doc) {
            Ok(Some(pgp_keys)) => pm.public_openpgp_keys = pgp_keys,
            Ok(None) => {}
            Err(err) => error!(%err, "extracting PGP keys from original provider failed"),
        }

        self.mirror_pgp_keys(&dir, &prefix, &mut pm).await?;

        let mut out = BufWriter::new(fs::File::create(dir.join("provider-metadata.json"))?);
        serde_json::to_writer(&mut out, &pm)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }

    /// Re-fetch the provider's public keys into `openpgp/` and re-anchor
    /// their URLs; insert the aggregator's own key as well. Any unrecoverable
    /// error wipes the key directory and fails the worker.
    async fn mirror_pgp_keys(
        &self,
        dir: &Path,
        prefix: &str,
        pm: &mut ProviderMetadata,
    ) -> Result<()> {
        let openpgp = dir.join("openpgp");
        fs::create_dir_all(&openpgp)?;

        let local_key_url = |fingerprint: &str| format!("{prefix}/openpgp/{fingerprint}.asc");

        let result: Result<()> = async {
            for key in &mut pm.public_openpgp_keys {
                let Some(url) = key.url.clone() else {
                    warn!(fingerprint = ?key.fingerprint, "ignoring PGP key without URL");
                    continue;
                };
                let fingerprint = match key
                    .fingerprint
                    .as_deref()
                    .filter(|f| keys::valid_fingerprint(f))
                {
                    Some(fingerprint) => fingerprint.to_uppercase(),
                    None => {
                        warn!(url = %url, "ignoring PGP key with invalid fingerprint");
                        continue;
                    }
                };

                let data = self.client.get_bytes(&url).await?;
                fs::write(openpgp.join(format!("{fingerprint}.asc")), &data)?;
                key.url = Some(local_key_url(&fingerprint));
            }

            // Insert our own public key, keyed by its fingerprint.
            if let Some(public_key) = &self.config.openpgp_public_key {
                let data = fs::read(public_key)?;
                let fingerprint = keys::public_key_fingerprint(&data)?;
                fs::write(openpgp.join(format!("{fingerprint}.asc")), &data)?;
                pm.public_openpgp_keys.push(PgpKeyRef {
                    fingerprint: Some(fingerprint.clone()),
                    url: Some(local_key_url(&fingerprint)),
                });
            }
            Ok(())
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_dir_all(&openpgp);
        }
        result
    }

    /// Publish the staging directory with the atomic swap.
    fn commit(&self) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Err(MirrorError::orchestration(format!(
                "no staging directory for provider '{}'",
                self.provider.name
            )));
        };
        transaction::commit(dir, &self.config.folder, &self.config.web, &self.provider.name)
    }

    /// Build the manifest fragment from the upstream metadata.
    fn create_aggregator_provider(&mut self, doc: &Value) -> Result<AggregatorProvider> {
        let last_updated = self
            .eval
            .extract_time("$.last_updated", doc)?
            .ok_or_else(|| MirrorError::path_expr("provider metadata has no last_updated"))?;
        let publisher: Publisher = self
            .eval
            .extract("$.publisher", doc)?
            .ok_or_else(|| MirrorError::path_expr("provider metadata has no publisher"))?;
        let role = self
            .eval
            .extract_string("$.role", doc)?
            .ok_or_else(|| MirrorError::path_expr("provider metadata has no role"))?;
        let url = self
            .eval
            .extract_string("$.canonical_url", doc)?
            .ok_or_else(|| MirrorError::path_expr("provider metadata has no canonical_url"))?;

        Ok(AggregatorProvider {
            metadata: AggregatorProviderMetadata {
                last_updated,
                publisher,
                role,
                url,
            },
            // Exactly one mirror entry: us.
            mirrors: vec![format!("{}/provider-metadata.json", self.provider_base_url())],
        })
    }
}

/// Write an advisory and its two hash siblings.
///
/// Hash files carry a single line: `<hex-digest> <basename>`.
fn write_file_hashes(
    path: &Path,
    filename: &str,
    data: &[u8],
    sha256_hex: &str,
    sha512_hex: &str,
) -> Result<()> {
    fs::write(path, data)?;
    fs::write(
        append_ext(path, "sha256"),
        format!("{sha256_hex} {filename}\n"),
    )?;
    fs::write(
        append_ext(path, "sha512"),
        format!("{sha512_hex} {filename}\n"),
    )?;
    Ok(())
}

/// Append an extension without replacing the existing one.
fn append_ext(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}
