//! Per-request identity selection.
//!
//! Picks one intermediary uniformly at random and builds a matching
//! [`HeaderSet`]. All randomness comes from the caller's RNG, so a seeded
//! generator reproduces the same identities.

use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;
use url::Url;

use super::headers::{HeaderCatalog, HeaderSet};
use super::pool::{Intermediary, IntermediaryPool};
use crate::modules::affinity::UserAgentAffinity;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("intermediary pool is empty")]
    EmptyPool,
}

/// Intermediary and headers to use for exactly one fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub intermediary: Intermediary,
    pub headers: HeaderSet,
}

#[derive(Debug, Clone, Default)]
pub struct IdentitySelector {
    catalog: HeaderCatalog,
}

impl IdentitySelector {
    pub fn new(catalog: HeaderCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &HeaderCatalog {
        &self.catalog
    }

    /// Select an identity with `Referer` set to `base_url`.
    pub fn select<R: Rng + ?Sized>(
        &self,
        pool: &IntermediaryPool,
        base_url: &Url,
        rng: &mut R,
    ) -> Result<Identity, SelectionError> {
        self.select_with(pool, base_url, None, None, rng)
    }

    /// Full form of [`select`](Self::select).
    ///
    /// `referer` overrides the base URL in the `Referer` header; a blank
    /// override is ignored. When `affinity` pins a user agent to the chosen
    /// intermediary's host, the pin wins over the random draw. The draw is
    /// made either way so the RNG advances identically.
    pub fn select_with<R: Rng + ?Sized>(
        &self,
        pool: &IntermediaryPool,
        base_url: &Url,
        referer: Option<&str>,
        affinity: Option<&UserAgentAffinity>,
        rng: &mut R,
    ) -> Result<Identity, SelectionError> {
        if pool.is_empty() {
            return Err(SelectionError::EmptyPool);
        }

        let index = rng.gen_range(0..pool.len());
        let intermediary = pool
            .get(index)
            .cloned()
            .ok_or(SelectionError::EmptyPool)?;

        let referer = referer
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(base_url.as_str());
        let mut identity = self.draw(intermediary, referer, rng);

        if let Some(pinned) = affinity
            .and_then(|pins| pins.get(identity.intermediary.host()))
            .filter(|pinned| !pinned.trim().is_empty())
        {
            identity.headers.set_user_agent(pinned);
        }

        Ok(identity)
    }

    /// Fresh headers for a known intermediary, ignoring any pinned agent.
    pub fn identity_for<R: Rng + ?Sized>(
        &self,
        intermediary: Intermediary,
        base_url: &Url,
        rng: &mut R,
    ) -> Identity {
        self.draw(intermediary, base_url.as_str(), rng)
    }

    fn draw<R: Rng + ?Sized>(&self, intermediary: Intermediary, referer: &str, rng: &mut R) -> Identity {
        let user_agent = pick(self.catalog.user_agents(), rng);
        let accept = pick(self.catalog.accepts(), rng);
        let accept_language = pick(self.catalog.accept_languages(), rng);

        Identity {
            intermediary,
            headers: HeaderSet::new(user_agent, accept, accept_language, referer),
        }
    }
}

// Catalog lists are validated non-empty on construction.
fn pick<R: Rng + ?Sized>(values: &[String], rng: &mut R) -> String {
    values.choose(rng).cloned().unwrap_or_default()
}
