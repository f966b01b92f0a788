//! # carscraper-rs
//!
//! Fetch layer for car-marketplace scraping: every request goes out through a
//! randomly chosen proxy with a randomized browser identity, and pages whose
//! plain HTML is a client-side shell are re-fetched in headless Chromium.
//!
//! ## Features
//!
//! - Uniform proxy rotation with per-request header randomization
//! - Seedable randomness for reproducible identity sequences
//! - Pure escalation policy (shell pages, bad statuses, missing markers)
//! - Lazily launched, serialized Chromium session for rendered fetches
//! - Per-proxy user-agent pinning persisted as JSON
//! - Lifecycle events feeding logs and per-domain metrics
//!
//! ## Example
//!
//! ```no_run
//! use carscraper_rs::{FetchOrchestrator, FetchTarget};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = FetchOrchestrator::from_env()?;
//!     let target = FetchTarget::new("/shopping/results/")
//!         .with_query("makes[]", "toyota")
//!         .with_query("page", "1")
//!         .expect_marker("search-basics-area");
//!     let page = orchestrator.fetch(&target).await?;
//!     println!("{} ({} bytes)", page.mode, page.html.len());
//!     orchestrator.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod carscraper;

pub mod config;
pub mod external_deps;
pub mod fetch;
pub mod identity;
pub mod modules;

pub use crate::carscraper::{
    CalibrationReport, FetchError, FetchOrchestrator, FetchOrchestratorBuilder, FetchResult,
};

pub use crate::config::{ConfigError, FetchConfig};

pub use crate::external_deps::{
    ChromiumConfig, ChromiumRenderer, PageRenderer, RenderError, RenderResult,
};

pub use crate::fetch::{
    DEFAULT_MIN_PAGE_LENGTH, DelayRange, Escalation, EscalationPolicy, EscalationReason,
    FetchMode, FetchTarget, FetchedPage, PlainHttpClient, PlainOutcome, PlainRequest,
    PlainResponse, ReqwestPlainClient, TransportError, detect_block_page,
};

pub use crate::identity::{
    CatalogError, HeaderCatalog, HeaderSet, Identity, IdentitySelector, Intermediary,
    IntermediaryPool, REQUIRED_HEADERS, SelectionError,
};

pub use crate::modules::{
    AffinityError, DomainStats, EventDispatcher, EventHandler, FetchEvent, GlobalStats,
    LoggingHandler, MetricsCollector, MetricsHandler, MetricsSnapshot, UserAgentAffinity,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
