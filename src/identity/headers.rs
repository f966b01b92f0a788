//! Browser-like request headers.
//!
//! A [`HeaderSet`] always carries the same five headers; only their values
//! vary between requests. The candidate values live in a [`HeaderCatalog`].

use http::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONNECTION, HeaderMap, HeaderName, HeaderValue, REFERER, USER_AGENT,
};
use thiserror::Error;

pub const USER_AGENT_KEY: &str = "User-Agent";
pub const ACCEPT_KEY: &str = "Accept";
pub const ACCEPT_LANGUAGE_KEY: &str = "Accept-Language";
pub const REFERER_KEY: &str = "Referer";
pub const CONNECTION_KEY: &str = "Connection";

/// Header names every [`HeaderSet`] contains, in wire order.
pub const REQUIRED_HEADERS: [&str; 5] = [
    USER_AGENT_KEY,
    ACCEPT_KEY,
    ACCEPT_LANGUAGE_KEY,
    REFERER_KEY,
    CONNECTION_KEY,
];

const KEEP_ALIVE: &str = "keep-alive";

const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36 Edg/125.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:126.0) Gecko/20100101 Firefox/126.0",
];

const DEFAULT_ACCEPT: &[&str] = &[
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
];

const DEFAULT_ACCEPT_LANGUAGE: &[&str] = &[
    "en-US,en;q=0.9",
    "en-US,en;q=0.8",
    "en-GB,en;q=0.9,en-US;q=0.8",
    "en-US,en;q=0.9,es;q=0.7",
];

/// The five request headers sent with a plain fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSet {
    user_agent: String,
    accept: String,
    accept_language: String,
    referer: String,
}

impl HeaderSet {
    pub(crate) fn new(
        user_agent: impl Into<String>,
        accept: impl Into<String>,
        accept_language: impl Into<String>,
        referer: impl Into<String>,
    ) -> Self {
        Self {
            user_agent: user_agent.into(),
            accept: accept.into(),
            accept_language: accept_language.into(),
            referer: referer.into(),
        }
    }

    pub(crate) fn set_user_agent(&mut self, user_agent: impl Into<String>) {
        self.user_agent = user_agent.into();
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn accept(&self) -> &str {
        &self.accept
    }

    pub fn accept_language(&self) -> &str {
        &self.accept_language
    }

    pub fn referer(&self) -> &str {
        &self.referer
    }

    pub fn connection(&self) -> &str {
        KEEP_ALIVE
    }

    /// Case-insensitive lookup by header name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Always five.
    pub fn len(&self) -> usize {
        REQUIRED_HEADERS.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// `(name, value)` pairs in [`REQUIRED_HEADERS`] order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            (USER_AGENT_KEY, self.user_agent.as_str()),
            (ACCEPT_KEY, self.accept.as_str()),
            (ACCEPT_LANGUAGE_KEY, self.accept_language.as_str()),
            (REFERER_KEY, self.referer.as_str()),
            (CONNECTION_KEY, KEEP_ALIVE),
        ]
        .into_iter()
    }

    /// Convert into an `http::HeaderMap`, failing with the offending header
    /// name when a value is not a legal header value.
    pub fn to_header_map(&self) -> Result<HeaderMap, String> {
        let pairs: [(HeaderName, &str); 5] = [
            (USER_AGENT, self.user_agent.as_str()),
            (ACCEPT, self.accept.as_str()),
            (ACCEPT_LANGUAGE, self.accept_language.as_str()),
            (REFERER, self.referer.as_str()),
            (CONNECTION, KEEP_ALIVE),
        ];

        let mut map = HeaderMap::with_capacity(pairs.len());
        for (name, value) in pairs {
            let header_value =
                HeaderValue::from_str(value).map_err(|_| name.as_str().to_string())?;
            map.insert(name, header_value);
        }
        Ok(map)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("header catalog list '{0}' must contain at least one non-empty value")]
    Empty(&'static str),
}

/// Candidate values the identity selector draws from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderCatalog {
    user_agents: Vec<String>,
    accepts: Vec<String>,
    accept_languages: Vec<String>,
}

impl HeaderCatalog {
    /// Custom catalog; every list must contain at least one non-empty value.
    pub fn new(
        user_agents: Vec<String>,
        accepts: Vec<String>,
        accept_languages: Vec<String>,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            user_agents: non_empty(user_agents, USER_AGENT_KEY)?,
            accepts: non_empty(accepts, ACCEPT_KEY)?,
            accept_languages: non_empty(accept_languages, ACCEPT_LANGUAGE_KEY)?,
        })
    }

    pub fn user_agents(&self) -> &[String] {
        &self.user_agents
    }

    pub fn accepts(&self) -> &[String] {
        &self.accepts
    }

    pub fn accept_languages(&self) -> &[String] {
        &self.accept_languages
    }
}

impl Default for HeaderCatalog {
    fn default() -> Self {
        let owned = |values: &[&str]| -> Vec<String> { values.iter().map(|v| v.to_string()).collect() };
        Self {
            user_agents: owned(DEFAULT_USER_AGENTS),
            accepts: owned(DEFAULT_ACCEPT),
            accept_languages: owned(DEFAULT_ACCEPT_LANGUAGE),
        }
    }
}

fn non_empty(values: Vec<String>, list: &'static str) -> Result<Vec<String>, CatalogError> {
    let values: Vec<String> = values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect();
    if values.is_empty() {
        return Err(CatalogError::Empty(list));
    }
    Ok(values)
}
