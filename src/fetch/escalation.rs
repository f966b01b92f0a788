//! Escalation policy.
//!
//! Decides, without doing any I/O, whether a plain-fetch outcome is good
//! enough to hand back or whether the page has to be rendered in a browser.

use std::fmt;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use super::target::FetchTarget;
use super::transport::{PlainResponse, TransportError};

/// Minimum body length, in bytes, of a page that is not a client-side shell.
pub const DEFAULT_MIN_PAGE_LENGTH: usize = 512;

/// Why a plain fetch was judged insufficient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationReason {
    /// The target was flagged as needing script execution.
    ScriptDependent,
    /// Body empty or shorter than the configured threshold.
    ShellPage { length: usize, threshold: usize },
    /// Non-2xx response.
    HttpStatus(u16),
    /// Connection error or timeout.
    Transport(String),
    /// The expected marker was not found in the body.
    MissingMarker(String),
    /// Body matches a known anti-bot interstitial.
    BlockPage(&'static str),
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationReason::ScriptDependent => f.write_str("target is script-dependent"),
            EscalationReason::ShellPage { length, threshold } => {
                write!(f, "body length {length} below threshold {threshold}")
            }
            EscalationReason::HttpStatus(status) => write!(f, "http status {status}"),
            EscalationReason::Transport(err) => write!(f, "transport failure: {err}"),
            EscalationReason::MissingMarker(marker) => {
                write!(f, "expected marker '{marker}' not found")
            }
            EscalationReason::BlockPage(signature) => write!(f, "block page detected ({signature})"),
        }
    }
}

/// Outcome of the decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    Accept,
    Escalate(EscalationReason),
}

impl Escalation {
    pub fn is_accept(&self) -> bool {
        matches!(self, Escalation::Accept)
    }
}

/// What the plain stage produced.
#[derive(Debug, Clone, Copy)]
pub enum PlainOutcome<'a> {
    /// Plain fetch was skipped.
    NotAttempted,
    Response(&'a PlainResponse),
    Failed(&'a TransportError),
}

/// Content heuristics applied to plain responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    pub min_page_length: usize,
    pub detect_block_pages: bool,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            min_page_length: DEFAULT_MIN_PAGE_LENGTH,
            detect_block_pages: false,
        }
    }
}

impl EscalationPolicy {
    /// Pure decision over target metadata and the plain outcome.
    pub fn evaluate(&self, target: &FetchTarget, outcome: PlainOutcome<'_>) -> Escalation {
        if target.is_script_dependent() {
            return Escalation::Escalate(EscalationReason::ScriptDependent);
        }

        let response = match outcome {
            PlainOutcome::NotAttempted => {
                return Escalation::Escalate(EscalationReason::ScriptDependent);
            }
            PlainOutcome::Failed(err) => {
                return Escalation::Escalate(EscalationReason::Transport(err.to_string()));
            }
            PlainOutcome::Response(response) => response,
        };

        if !response.is_success() {
            return Escalation::Escalate(EscalationReason::HttpStatus(response.status));
        }

        let length = response.body.len();
        if length == 0 || length < self.min_page_length {
            return Escalation::Escalate(EscalationReason::ShellPage {
                length,
                threshold: self.min_page_length,
            });
        }

        if let Some(marker) = target.expected_marker()
            && !response.body.contains(marker)
        {
            return Escalation::Escalate(EscalationReason::MissingMarker(marker.to_string()));
        }

        if self.detect_block_pages
            && let Some(signature) = detect_block_page(&response.body)
        {
            return Escalation::Escalate(EscalationReason::BlockPage(signature));
        }

        Escalation::Accept
    }
}

struct BlockSignature {
    name: &'static str,
    pattern: Regex,
}

static BLOCK_SIGNATURES: Lazy<Vec<BlockSignature>> = Lazy::new(|| {
    [
        ("captcha", r#"class=["'][^"']*(?:g-recaptcha|h-captcha|cf-turnstile)"#),
        ("cloudflare_interstitial", r"<title>\s*just a moment\.\.\.\s*</title>|cf-browser-verification|/cdn-cgi/challenge-platform/"),
        ("access_denied", r"<title>\s*access denied\s*</title>"),
        ("perimeterx", r#"id=["']px-captcha["']"#),
        ("javascript_required", r"please enable (?:javascript|js) (?:and cookies )?to continue"),
    ]
    .into_iter()
    .filter_map(|(name, source)| {
        RegexBuilder::new(source)
            .case_insensitive(true)
            .build()
            .map(|pattern| BlockSignature { name, pattern })
            .map_err(|err| log::error!("invalid block signature {name}: {err}"))
            .ok()
    })
    .collect()
});

/// Name of the first anti-bot signature found in `body`.
pub fn detect_block_page(body: &str) -> Option<&'static str> {
    BLOCK_SIGNATURES
        .iter()
        .find(|signature| signature.pattern.is_match(body))
        .map(|signature| signature.name)
}
