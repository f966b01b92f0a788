//! High level fetch orchestration.
//!
//! Wires identity selection, the plain transport, the escalation policy and
//! the optional browser renderer into a single `fetch` call. Callers see either
//! the page HTML or one typed failure; retries are left to them.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;
use url::Url;

use crate::config::{ConfigError, FetchConfig};
use crate::external_deps::{ChromiumConfig, ChromiumRenderer, PageRenderer, RenderError};
use crate::fetch::{
    DelayRange, Escalation, EscalationPolicy, EscalationReason, FetchMode, FetchTarget,
    FetchedPage, PlainHttpClient, PlainOutcome, PlainRequest, PlainResponse, ReqwestPlainClient,
    TransportError,
};
use crate::identity::{HeaderCatalog, IdentitySelector, Intermediary, IntermediaryPool, SelectionError};
use crate::modules::affinity::{AffinityError, UserAgentAffinity};
use crate::modules::events::{
    EscalationEvent, EventDispatcher, EventHandler, FailureEvent, FetchEvent, LoggingHandler,
    MetricsHandler, PlainRequestEvent, PlainResponseEvent, RenderedEvent,
};
use crate::modules::metrics::MetricsCollector;

/// Result alias used across the orchestration layer.
pub type FetchResult<T> = Result<T, FetchError>;

/// Terminal failure of one fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("intermediary pool is empty")]
    EmptyPool,
    #[error("plain fetch of {url} failed: {source}")]
    NetworkFailure { url: Url, source: TransportError },
    #[error("rendered fetch of {url} failed: {source}")]
    RenderFailure { url: Url, source: RenderError },
    #[error("plain result for {url} rejected ({reason}) and rendering is not available")]
    EscalationNotEligible { url: Url, reason: EscalationReason },
    #[error("url parse error: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("header conversion failed: {0}")]
    InvalidHeader(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("user agent cache error: {0}")]
    Affinity(#[from] AffinityError),
}

impl From<SelectionError> for FetchError {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::EmptyPool => FetchError::EmptyPool,
        }
    }
}

/// Outcome of [`FetchOrchestrator::calibrate_user_agents`], by intermediary host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalibrationReport {
    pub pinned: Vec<String>,
    pub already_pinned: Vec<String>,
    pub failed: Vec<String>,
}

/// Fluent builder for [`FetchOrchestrator`].
pub struct FetchOrchestratorBuilder {
    config: FetchConfig,
    http_client: Option<Arc<dyn PlainHttpClient>>,
    renderer: Option<Arc<dyn PageRenderer>>,
    seed: Option<u64>,
    catalog: HeaderCatalog,
    affinity: Option<Arc<UserAgentAffinity>>,
    handlers: Vec<Arc<dyn EventHandler>>,
    metrics: Option<MetricsCollector>,
    logging_events: bool,
}

impl FetchOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: FetchConfig::new(String::new()),
            http_client: None,
            renderer: None,
            seed: None,
            catalog: HeaderCatalog::default(),
            affinity: None,
            handlers: Vec::new(),
            metrics: None,
            logging_events: true,
        }
    }

    pub fn with_config(mut self, config: FetchConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the reqwest transport, e.g. with a test double.
    pub fn with_http_client(mut self, client: Arc<dyn PlainHttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Enable escalation to rendered fetches.
    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_chromium(self, config: ChromiumConfig) -> Self {
        self.with_renderer(Arc::new(ChromiumRenderer::new(config)))
    }

    /// Seed identity selection and delays for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_catalog(mut self, catalog: HeaderCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Share pinned user agents; otherwise they are loaded from the configured
    /// cache file, if any.
    pub fn with_affinity(mut self, affinity: Arc<UserAgentAffinity>) -> Self {
        self.affinity = Some(affinity);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn disable_logging_events(mut self) -> Self {
        self.logging_events = false;
        self
    }

    pub fn build(self) -> FetchResult<FetchOrchestrator> {
        FetchOrchestrator::from_builder(self)
    }
}

impl Default for FetchOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain-first fetcher with rendered fallback.
pub struct FetchOrchestrator {
    config: FetchConfig,
    base_url: Url,
    pool: IntermediaryPool,
    selector: IdentitySelector,
    rng: Mutex<StdRng>,
    delays: DelayRange,
    policy: EscalationPolicy,
    http_client: Arc<dyn PlainHttpClient>,
    renderer: Option<Arc<dyn PageRenderer>>,
    affinity: Arc<UserAgentAffinity>,
    metrics: Option<MetricsCollector>,
    events: EventDispatcher,
}

impl FetchOrchestrator {
    /// Plain-only orchestrator over `config`.
    pub fn new(config: FetchConfig) -> FetchResult<Self> {
        Self::builder().with_config(config).build()
    }

    /// Orchestrator configured from the process environment, rendering with
    /// a default headless Chromium.
    pub fn from_env() -> FetchResult<Self> {
        Self::builder()
            .with_config(FetchConfig::from_env()?)
            .with_chromium(ChromiumConfig::default())
            .build()
    }

    pub fn builder() -> FetchOrchestratorBuilder {
        FetchOrchestratorBuilder::new()
    }

    fn from_builder(builder: FetchOrchestratorBuilder) -> FetchResult<Self> {
        let config = builder.config;
        config.validate()?;
        let base_url = config.parsed_base_url()?;

        let affinity = match (builder.affinity, config.user_agent_cache.as_ref()) {
            (Some(affinity), _) => affinity,
            (None, Some(path)) => Arc::new(UserAgentAffinity::load(path)?),
            (None, None) => Arc::new(UserAgentAffinity::new()),
        };

        let rng = match builder.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut events = EventDispatcher::new();
        if builder.logging_events {
            events.register_handler(Arc::new(LoggingHandler));
        }
        if let Some(ref collector) = builder.metrics {
            events.register_handler(Arc::new(MetricsHandler::new(collector.clone())));
        }
        for handler in builder.handlers {
            events.register_handler(handler);
        }

        let http_client = builder
            .http_client
            .unwrap_or_else(|| Arc::new(ReqwestPlainClient::new()));

        log::debug!(
            "fetch orchestrator ready: {} intermediaries, renderer={}",
            config.intermediaries.len(),
            builder.renderer.is_some()
        );

        Ok(Self {
            pool: config.pool(),
            delays: config.delay_range(),
            policy: config.escalation_policy(),
            selector: IdentitySelector::new(builder.catalog),
            rng: Mutex::new(rng),
            renderer: builder.renderer,
            metrics: builder.metrics,
            http_client,
            affinity,
            base_url,
            config,
            events,
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn pool(&self) -> &IntermediaryPool {
        &self.pool
    }

    pub fn affinity(&self) -> &Arc<UserAgentAffinity> {
        &self.affinity
    }

    pub fn metrics(&self) -> Option<&MetricsCollector> {
        self.metrics.as_ref()
    }

    /// Fetch a page, plain first and rendered when the plain result is
    /// insufficient and the target allows it.
    pub async fn fetch(&self, target: &FetchTarget) -> FetchResult<FetchedPage> {
        let url = target.resolve(Some(&self.base_url))?;

        if target.is_script_dependent() {
            let reason = match self.policy.evaluate(target, PlainOutcome::NotAttempted) {
                Escalation::Escalate(reason) => reason,
                Escalation::Accept => EscalationReason::ScriptDependent,
            };
            return self.escalate(target, url, reason, None).await;
        }

        let attempt = self.plain_fetch(target, &url).await?;
        let outcome = match &attempt {
            Ok(response) => PlainOutcome::Response(response),
            Err(err) => PlainOutcome::Failed(err),
        };
        let decision = self.policy.evaluate(target, outcome);

        match (decision, attempt) {
            (Escalation::Accept, Ok(response)) => Ok(FetchedPage {
                html: response.body,
                mode: FetchMode::Plain,
                url: response.final_url,
                escalation: None,
            }),
            (Escalation::Accept, Err(source)) => {
                self.emit_failure(&url, FetchMode::Plain, &source);
                Err(FetchError::NetworkFailure { url, source })
            }
            (Escalation::Escalate(reason), attempt) => {
                self.escalate(target, url, reason, attempt.err()).await
            }
        }
    }

    /// Fetch `url` and return only the HTML.
    pub async fn fetch_html(&self, url: &str) -> FetchResult<String> {
        self.fetch(&FetchTarget::new(url))
            .await
            .map(FetchedPage::into_html)
    }

    /// Pin a working user agent to every intermediary that lacks one.
    ///
    /// Random user agents are tried against the base URL until one gets an
    /// HTTP 200 through the intermediary, at most `max_attempts` times per
    /// host. Pins are written to the configured cache file when any were added.
    pub async fn calibrate_user_agents(&self, max_attempts: usize) -> FetchResult<CalibrationReport> {
        let mut report = CalibrationReport::default();
        let mut seen = HashSet::new();

        for intermediary in self.pool.iter() {
            let host = intermediary.host().to_string();
            if !seen.insert(host.clone()) {
                continue;
            }
            if self.affinity.contains(&host) {
                report.already_pinned.push(host);
                continue;
            }

            match self.probe_user_agent(intermediary, max_attempts).await {
                Some(user_agent) => {
                    log::info!("pinned user agent for {host}");
                    self.affinity.pin(host.clone(), user_agent);
                    report.pinned.push(host);
                }
                None => {
                    log::warn!("no working user agent for {host} after {max_attempts} attempts");
                    report.failed.push(host);
                }
            }
        }

        if let Some(path) = self.config.user_agent_cache.as_ref()
            && !report.pinned.is_empty()
        {
            self.affinity.save(path)?;
        }

        Ok(report)
    }

    /// Release the browser session, if one was started.
    pub async fn shutdown(&self) -> Result<(), RenderError> {
        match self.renderer {
            Some(ref renderer) => renderer.shutdown().await,
            None => Ok(()),
        }
    }

    async fn plain_fetch(
        &self,
        target: &FetchTarget,
        url: &Url,
    ) -> FetchResult<Result<PlainResponse, TransportError>> {
        let (identity, delay) = {
            let mut rng = self.lock_rng();
            let identity = self
                .selector
                .select_with(
                    &self.pool,
                    &self.base_url,
                    target.referer(),
                    Some(self.affinity.as_ref()),
                    &mut *rng,
                )
                .inspect_err(|err| self.emit_failure(url, FetchMode::Plain, err))?;
            let delay = self.delays.sample(&mut *rng);
            (identity, delay)
        };

        if let Err(name) = identity.headers.to_header_map() {
            let error = FetchError::InvalidHeader(format!("invalid value for {name}"));
            self.emit_failure(url, FetchMode::Plain, &error);
            return Err(error);
        }

        self.events
            .dispatch(FetchEvent::PlainRequest(PlainRequestEvent {
                url: url.clone(),
                intermediary: identity.intermediary.host().to_string(),
                user_agent: identity.headers.user_agent().to_string(),
                delay,
                timestamp: Utc::now(),
            }));

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let request = PlainRequest {
            url: url.clone(),
            headers: identity.headers,
            intermediary: identity.intermediary,
            timeout: self.config.plain_timeout(),
        };

        let started = Instant::now();
        let result = self.http_client.get(&request).await;

        match result {
            Ok(ref response) => {
                self.events
                    .dispatch(FetchEvent::PlainResponse(PlainResponseEvent {
                        url: url.clone(),
                        intermediary: request.intermediary.host().to_string(),
                        status: response.status,
                        body_len: response.body.len(),
                        latency: started.elapsed(),
                        timestamp: Utc::now(),
                    }));
            }
            Err(ref err) => {
                log::debug!("plain fetch of {url} via {} failed: {err}", request.intermediary);
            }
        }

        Ok(result)
    }

    async fn escalate(
        &self,
        target: &FetchTarget,
        url: Url,
        reason: EscalationReason,
        transport: Option<TransportError>,
    ) -> FetchResult<FetchedPage> {
        let renderer = match self.renderer {
            Some(ref renderer) if self.render_eligible(target) => renderer,
            _ => {
                let error = match transport {
                    Some(source) => FetchError::NetworkFailure { url: url.clone(), source },
                    None => FetchError::EscalationNotEligible {
                        url: url.clone(),
                        reason,
                    },
                };
                self.emit_failure(&url, FetchMode::Plain, &error);
                return Err(error);
            }
        };

        self.events.dispatch(FetchEvent::Escalation(EscalationEvent {
            url: url.clone(),
            reason: reason.clone(),
            timestamp: Utc::now(),
        }));

        let started = Instant::now();
        match renderer.render(&url, self.config.render_max_wait()).await {
            Ok(html) => {
                self.events.dispatch(FetchEvent::Rendered(RenderedEvent {
                    url: url.clone(),
                    html_len: html.len(),
                    latency: started.elapsed(),
                    timestamp: Utc::now(),
                }));
                Ok(FetchedPage {
                    html,
                    mode: FetchMode::Rendered,
                    url,
                    escalation: Some(reason),
                })
            }
            Err(source) => {
                self.emit_failure(&url, FetchMode::Rendered, &source);
                Err(FetchError::RenderFailure { url, source })
            }
        }
    }

    fn render_eligible(&self, target: &FetchTarget) -> bool {
        target.is_script_dependent()
            || target
                .render_fallback()
                .unwrap_or(self.config.render_fallback)
    }

    fn emit_failure(&self, url: &Url, mode: FetchMode, error: &dyn std::fmt::Display) {
        self.events.dispatch(FetchEvent::Failure(FailureEvent {
            url: url.clone(),
            mode,
            error: error.to_string(),
            timestamp: Utc::now(),
        }));
    }

    async fn probe_user_agent(&self, intermediary: &Intermediary, max_attempts: usize) -> Option<String> {
        for attempt in 1..=max_attempts {
            let identity = {
                let mut rng = self.lock_rng();
                self.selector
                    .identity_for(intermediary.clone(), &self.base_url, &mut *rng)
            };
            let user_agent = identity.headers.user_agent().to_string();
            let request = PlainRequest {
                url: self.base_url.clone(),
                headers: identity.headers,
                intermediary: identity.intermediary,
                timeout: self.config.plain_timeout(),
            };

            match self.http_client.get(&request).await {
                Ok(response) if response.status == 200 => return Some(user_agent),
                Ok(response) => log::debug!(
                    "calibration attempt {attempt} via {intermediary}: status {}",
                    response.status
                ),
                Err(err) => log::debug!("calibration attempt {attempt} via {intermediary}: {err}"),
            }
        }
        None
    }

    // Guards are dropped before any await.
    fn lock_rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
