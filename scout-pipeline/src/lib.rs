//! Result aggregation and the discovery-and-extraction run loop.
//!
//! - [`aggregator`]: dedup by normalized domain, cap, status merging
//! - [`pipeline`]: one session, one rate controller, one candidate source,
//!   driven until the cap, exhaustion, or cancellation
pub mod aggregator;
pub mod pipeline;

pub use aggregator::{Aggregator, Offer, OfferStats, RejectReason, StoreTicket};
pub use pipeline::{Pipeline, RunReport, candidate_source};
