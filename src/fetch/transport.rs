//! Plain HTTP transport abstraction.
//!
//! The orchestrator only needs "GET this URL with these headers through this
//! proxy within this timeout"; anything able to do that can stand in for the
//! reqwest implementation, including test doubles.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::identity::{HeaderSet, Intermediary};

/// One plain GET to perform.
#[derive(Debug, Clone)]
pub struct PlainRequest {
    pub url: Url,
    pub headers: HeaderSet,
    pub intermediary: Intermediary,
    pub timeout: Duration,
}

/// Status and decoded body of a plain GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainResponse {
    pub status: u16,
    pub body: String,
    pub final_url: Url,
}

impl PlainResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("proxy rejected: {0}")]
    Proxy(String),
    #[error("http transport error: {0}")]
    Transport(String),
}

/// Contract for the plain-fetch capability.
#[async_trait]
pub trait PlainHttpClient: Send + Sync {
    async fn get(&self, request: &PlainRequest) -> Result<PlainResponse, TransportError>;
}
