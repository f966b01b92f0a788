//! Fetch lifecycle events.
//!
//! Provides hooks for logging, metrics, and custom reactions around each
//! fetch attempt. Events identify intermediaries by host only, never by their
//! credentialed address.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::metrics::MetricsCollector;
use crate::fetch::{EscalationReason, FetchMode};

/// Emitted right before a plain GET is sent.
#[derive(Debug, Clone)]
pub struct PlainRequestEvent {
    pub url: Url,
    pub intermediary: String,
    pub user_agent: String,
    pub delay: Duration,
    pub timestamp: DateTime<Utc>,
}

/// Emitted when a plain GET produced an HTTP response.
#[derive(Debug, Clone)]
pub struct PlainResponseEvent {
    pub url: Url,
    pub intermediary: String,
    pub status: u16,
    pub body_len: usize,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EscalationEvent {
    pub url: Url,
    pub reason: EscalationReason,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RenderedEvent {
    pub url: Url,
    pub html_len: usize,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub url: Url,
    pub mode: FetchMode,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum FetchEvent {
    PlainRequest(PlainRequestEvent),
    PlainResponse(PlainResponseEvent),
    Escalation(EscalationEvent),
    Rendered(RenderedEvent),
    Failure(FailureEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &FetchEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn dispatch(&self, event: FetchEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &FetchEvent) {
        match event {
            FetchEvent::PlainRequest(pre) => {
                log::debug!(
                    "-> GET {} via {} after {:.2}s",
                    pre.url,
                    pre.intermediary,
                    pre.delay.as_secs_f64()
                );
            }
            FetchEvent::PlainResponse(post) => {
                log::debug!(
                    "<- {} via {} -> {} ({} bytes, {:.2}s)",
                    post.url,
                    post.intermediary,
                    post.status,
                    post.body_len,
                    post.latency.as_secs_f64()
                );
            }
            FetchEvent::Escalation(escalation) => {
                log::info!("escalating {} to rendered fetch: {}", escalation.url, escalation.reason);
            }
            FetchEvent::Rendered(rendered) => {
                log::debug!(
                    "rendered {} ({} bytes, {:.2}s)",
                    rendered.url,
                    rendered.html_len,
                    rendered.latency.as_secs_f64()
                );
            }
            FetchEvent::Failure(failure) => {
                log::warn!("{} fetch of {} failed: {}", failure.mode, failure.url, failure.error);
            }
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &FetchEvent) {
        match event {
            FetchEvent::PlainResponse(post) => {
                self.metrics
                    .record_plain(post.url.host_str().unwrap_or(""), post.status, post.latency);
            }
            FetchEvent::Escalation(escalation) => {
                self.metrics
                    .record_escalation(escalation.url.host_str().unwrap_or(""));
            }
            FetchEvent::Rendered(rendered) => {
                self.metrics
                    .record_rendered(rendered.url.host_str().unwrap_or(""));
            }
            FetchEvent::Failure(failure) => {
                self.metrics
                    .record_failure(failure.url.host_str().unwrap_or(""));
            }
            FetchEvent::PlainRequest(_) => {}
        }
    }
}
