//! Network identity for plain fetches: which proxy to go through and which
//! browser-like headers to present.

pub mod headers;
pub mod pool;
pub mod selector;

pub use headers::{CatalogError, HeaderCatalog, HeaderSet, REQUIRED_HEADERS};
pub use pool::{Intermediary, IntermediaryPool};
pub use selector::{Identity, IdentitySelector, SelectionError};
