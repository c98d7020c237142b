//! # CSAF Mirror
//!
//! A Rust library implementing a mirroring aggregator for CSAF security
//! advisory providers. Given a configured set of upstream providers, the
//! aggregator concurrently discovers each provider's advisory catalog,
//! downloads every eligible advisory with its integrity artifacts,
//! republishes them under a locally hosted directory tree, and emits a
//! top-level manifest describing the aggregated view.
//!
//! ## Features
//!
//! - **Metadata discovery**: well-known path probing with a `security.txt`
//!   fallback
//! - **Two catalog protocols**: ROLIE feeds and `changes.csv` directory
//!   catalogs
//! - **Integrity**: SHA-256/SHA-512 sibling files, upstream hash checks, and
//!   OpenPGP signatures (upstream or locally produced)
//! - **Atomic publication**: a snapshot becomes visible through a
//!   symlink-then-rename swap, never as partial state
//! - **Bounded concurrency**: one worker per provider, up to a configurable
//!   pool size
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use csaf_mirror::{Config, MirrorManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load the TOML configuration
//!     let config = Config::from_file("aggregator.toml")?;
//!
//!     // Initialize logging (hold the guard until the end of main!)
//!     let _guard = csaf_mirror::logging::init_logging(&config);
//!
//!     // Mirror all configured providers
//!     MirrorManager::new(config)?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod advisories;
pub mod client;
pub mod config;
pub mod error;
pub mod indices;
pub mod keys;
pub mod logging;
pub mod manager;
pub mod metadata;
pub mod models;
pub mod pathexpr;
pub mod rolie;
pub mod transaction;
pub mod validation;
pub mod worker;

// Re-export main types
pub use config::{Config, ProviderConfig, RemoteValidatorConfig};
pub use error::{MirrorError, Result};
pub use manager::MirrorManager;
pub use worker::MirrorWorker;

// Re-export data model types
pub use models::{
    Aggregator, AggregatorInfo, AggregatorProvider, AggregatorProviderMetadata, AdvisorySummary,
    ProviderMetadata, Publisher, TlpLabel,
};

// Re-export enumeration and discovery types
pub use advisories::{AdvisoryFile, AdvisoryFileProcessor, LabeledFiles};
pub use client::HttpClient;
pub use metadata::{LocatedMetadata, locate_provider_metadata};
pub use pathexpr::{PathEval, PathExpr};
pub use validation::{HttpRemoteValidator, RemoteValidator, validate_csaf};
