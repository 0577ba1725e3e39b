//! # fluxbase-realtime
//!
//! The realtime fan-out pipeline: a change-feed worker consumes
//! committed row changes from the database, the subscription registry
//! matches them against per-connection channels, applies row-level
//! visibility through probes under the subscriber's bound role, and
//! delivers frames through per-connection drop-oldest buffers.

pub mod eval;
pub mod feed;
pub mod listener;
pub mod outbound;
pub mod probe;
pub mod rate;
pub mod registry;

#[cfg(test)]
mod tests;

pub use feed::{ChangeFeedSource, FeedStream, NotifyFeedSource, parse_change_payload};
pub use listener::FeedWorker;
pub use outbound::{Outbound, OutboundReceiver};
pub use probe::{AllowAllProber, DbVisibilityProber, VisibilityProber};
pub use rate::{FixedWindowRateLimiter, RateCounter};
pub use registry::{RegistryLimits, SubscriptionRegistry};
