//! Headless-browser rendering infrastructure.
//!
//! Provides the trait the orchestrator escalates to, its error type, and the
//! concrete Chromium implementation.

mod chromium;

pub use chromium::{ChromiumConfig, ChromiumRenderer};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Abstraction over browser engines able to execute a page's scripts and
/// return the resulting DOM.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Navigate to `url`, wait until the page has settled (at most
    /// `max_wait`) and return the rendered document source.
    async fn render(&self, url: &Url, max_wait: Duration) -> RenderResult<String>;

    /// Release any browser resources. Rendering again afterwards may start a
    /// new session.
    async fn shutdown(&self) -> RenderResult<()> {
        Ok(())
    }
}

/// Failures produced by renderers.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("page did not settle within {0:?}")]
    Timeout(Duration),
    #[error("failed to read rendered content: {0}")]
    Content(String),
    #[error("browser rendering is not available")]
    Unavailable,
}

/// Convenience alias for renderer results.
pub type RenderResult<T> = Result<T, RenderError>;
