//! Integrations that rely on third-party engines.
//!
//! Groups the adapters that bridge the fetch core with software running
//! outside of it, currently the headless browser used for rendered fetches.

pub mod renderers;

pub use renderers::{ChromiumConfig, ChromiumRenderer, PageRenderer, RenderError, RenderResult};
