//! What to fetch and what came back.

use std::fmt;

use url::Url;

use super::escalation::EscalationReason;

/// A page request plus the per-target knobs the orchestrator consults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    url: String,
    query: Vec<(String, String)>,
    script_dependent: bool,
    render_fallback: Option<bool>,
    referer: Option<String>,
    expected_marker: Option<String>,
}

impl FetchTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            script_dependent: false,
            render_fallback: None,
            referer: None,
            expected_marker: None,
        }
    }

    /// Page only produces its content after client-side scripts run; it is
    /// always fetched through the renderer.
    pub fn script_dependent(mut self) -> Self {
        self.script_dependent = true;
        self
    }

    /// Override the configured escalation eligibility for this target.
    pub fn with_render_fallback(mut self, enabled: bool) -> Self {
        self.render_fallback = Some(enabled);
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Append a query parameter; repeated keys such as `makes[]` are kept.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Substring a complete page must contain, e.g. a container id.
    pub fn expect_marker(mut self, marker: impl Into<String>) -> Self {
        self.expected_marker = Some(marker.into());
        self
    }

    pub fn raw_url(&self) -> &str {
        &self.url
    }

    pub fn is_script_dependent(&self) -> bool {
        self.script_dependent
    }

    pub fn render_fallback(&self) -> Option<bool> {
        self.render_fallback
    }

    pub fn referer(&self) -> Option<&str> {
        self.referer.as_deref()
    }

    pub fn expected_marker(&self) -> Option<&str> {
        self.expected_marker.as_deref()
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Resolve the target URL, appending query parameters.
    ///
    /// Relative URLs such as `/vehicledetail/123` are joined onto `base`.
    pub fn resolve(&self, base: Option<&Url>) -> Result<Url, url::ParseError> {
        let mut url = match Url::parse(&self.url) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => match base {
                Some(base) => base.join(&self.url)?,
                None => return Err(url::ParseError::RelativeUrlWithoutBase),
            },
            Err(err) => return Err(err),
        };

        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(
                self.query
                    .iter()
                    .map(|(key, value)| (key.as_str(), value.as_str())),
            );
        }
        Ok(url)
    }
}

impl From<&str> for FetchTarget {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FetchTarget {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchMode {
    Plain,
    Rendered,
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchMode::Plain => f.write_str("plain"),
            FetchMode::Rendered => f.write_str("rendered"),
        }
    }
}

/// Successful fetch result handed to downstream parsers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub html: String,
    pub mode: FetchMode,
    pub url: Url,
    /// Why the plain result was rejected, for rendered pages.
    pub escalation: Option<EscalationReason>,
}

impl FetchedPage {
    pub fn into_html(self) -> String {
        self.html
    }
}
