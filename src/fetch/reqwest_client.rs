//! Reqwest-based implementation of the `PlainHttpClient` trait.
//!
//! A proxy is fixed when a `reqwest::Client` is built, so clients are cached
//! per intermediary and reused across requests going through the same proxy.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;

use super::transport::{PlainHttpClient, PlainRequest, PlainResponse, TransportError};
use crate::identity::Intermediary;

/// Reqwest client pool keyed by intermediary address.
pub struct ReqwestPlainClient {
    clients: Mutex<HashMap<String, Client>>,
}

impl ReqwestPlainClient {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Number of proxy-bound clients built so far.
    pub async fn cached_clients(&self) -> usize {
        self.clients.lock().await.len()
    }

    async fn client(&self, intermediary: &Intermediary) -> Result<Client, TransportError> {
        let mut guard = self.clients.lock().await;
        if let Some(client) = guard.get(intermediary.address()) {
            return Ok(client.clone());
        }

        let proxy = reqwest::Proxy::all(intermediary.proxy_url())
            .map_err(|err| TransportError::Proxy(format!("{intermediary}: {err}")))?;
        let client = Client::builder()
            .cookie_store(true)
            .proxy(proxy)
            .build()
            .map_err(|err| TransportError::Transport(err.to_string()))?;

        guard.insert(intermediary.address().to_string(), client.clone());
        Ok(client)
    }
}

impl Default for ReqwestPlainClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlainHttpClient for ReqwestPlainClient {
    async fn get(&self, request: &PlainRequest) -> Result<PlainResponse, TransportError> {
        let client = self.client(&request.intermediary).await?;
        let headers = request
            .headers
            .to_header_map()
            .map_err(|name| TransportError::Transport(format!("invalid header '{name}'")))?;

        let response = client
            .get(request.url.clone())
            .headers(headers)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(map_error)?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let body = response.text().await.map_err(map_error)?;

        Ok(PlainResponse {
            status,
            body,
            final_url,
        })
    }
}

fn map_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Transport(err.to_string())
    }
}
