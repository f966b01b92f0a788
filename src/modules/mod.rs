//! Cross-cutting services module
//!
//! Per-intermediary user-agent pinning, fetch lifecycle events and the
//! metrics they feed.

pub mod affinity;
pub mod events;
pub mod metrics;

// Re-export commonly used types
pub use affinity::{AffinityError, UserAgentAffinity};
pub use events::{
    EscalationEvent, EventDispatcher, EventHandler, FailureEvent, FetchEvent, LoggingHandler,
    MetricsHandler, PlainRequestEvent, PlainResponseEvent, RenderedEvent,
};
pub use metrics::{DomainStats, GlobalStats, MetricsCollector, MetricsSnapshot};
