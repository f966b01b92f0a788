//! Plain-fetch building blocks shared by the orchestrator: transport trait
//! and its reqwest implementation, targets, escalation policy and delays.

pub mod escalation;
pub mod reqwest_client;
pub mod target;
pub mod timing;
pub mod transport;

pub use escalation::{
    DEFAULT_MIN_PAGE_LENGTH, Escalation, EscalationPolicy, EscalationReason, PlainOutcome,
    detect_block_page,
};
pub use reqwest_client::ReqwestPlainClient;
pub use target::{FetchMode, FetchTarget, FetchedPage};
pub use timing::DelayRange;
pub use transport::{PlainHttpClient, PlainRequest, PlainResponse, TransportError};
