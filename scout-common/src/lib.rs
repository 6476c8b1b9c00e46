//! Common types and utilities shared across the scout crates.
//!
//! This crate defines the store data model, the error taxonomy, and the
//! logging initialiser used by every other crate in the workspace. It stays
//! dependency-light so that all crates can depend on it.
//!
//! # Overview
//!
//! - [`domain`]: candidate URLs and the [`domain::NormalizedDomain`] dedup key
//! - [`record`]: [`record::StoreRecord`], contact fields and the bounded
//!   [`record::ResultSet`]
//! - [`observability`]: centralised tracing/logging initialisation
//! - [`NavigationError`], [`ScoutError`] and [`Result`]: shared error handling
//! - [`DiscoveryExhausted`]: the terminal (non-error) discovery signal
//!
//! # Examples
//!
//! ```rust
//! use scout_common::domain::NormalizedDomain;
//!
//! let a = NormalizedDomain::parse("https://Shop.Example.com/").unwrap();
//! let b = NormalizedDomain::parse("shop.example.com").unwrap();
//! assert_eq!(a, b);
//! ```
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod domain;
pub mod observability;
pub mod record;

/// Browser automation stealth level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StealthLevel {
    Lightweight,
    #[default]
    Balanced,
    Maximum,
}

/// What kind of block page a navigation landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSignal {
    Captcha,
    UnusualTraffic,
    TooManyRequests,
    AccessDenied,
}

impl fmt::Display for BlockSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockSignal::Captcha => "captcha",
            BlockSignal::UnusualTraffic => "unusual traffic",
            BlockSignal::TooManyRequests => "too many requests",
            BlockSignal::AccessDenied => "access denied",
        };
        f.write_str(s)
    }
}

/// A single navigation failed. Always transient from the caller's point of
/// view: the rate controller decides whether to retry.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NavigationError {
    #[error("navigation to {url} timed out after {timeout_ms} ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("navigation to {url} hit a block page ({signal})")]
    Blocked { url: String, signal: BlockSignal },

    #[error("webdriver error on {url}: {message}")]
    Driver { url: String, message: String },
}

impl NavigationError {
    /// URL the failed navigation was aimed at.
    pub fn url(&self) -> &str {
        match self {
            NavigationError::Timeout { url, .. }
            | NavigationError::Blocked { url, .. }
            | NavigationError::Driver { url, .. } => url,
        }
    }

    /// Whether the target actively pushed back (CAPTCHA, 429, ...).
    pub fn is_block(&self) -> bool {
        matches!(self, NavigationError::Blocked { .. })
    }
}

/// Error types used across the scout system.
#[derive(thiserror::Error, Debug)]
pub enum ScoutError {
    /// A navigation failed and was not retried.
    #[error(transparent)]
    Navigation(#[from] NavigationError),

    /// Too many consecutive failures against one target. Fatal for that
    /// target only.
    #[error("rate limit exceeded for {target} after {failures} consecutive failures: {last}")]
    RateLimitExceeded {
        target: String,
        failures: u32,
        last: NavigationError,
    },

    /// Discovery gave up before a single store was accepted.
    #[error("discovery failed before any store was found: {0}")]
    DiscoveryFailed(String),

    /// The run could not start (browser engine unavailable, bad flags).
    #[error("startup error: {0}")]
    Startup(String),

    /// Configuration was incomplete or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Writing the result set failed.
    #[error("export error: {0}")]
    Export(String),
}

/// Convenient alias for results that use [`ScoutError`].
pub type Result<T> = std::result::Result<T, ScoutError>;

/// Why a candidate source stopped producing URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum ExhaustionReason {
    /// The pre-dedup candidate budget was spent.
    DesiredCountReached,
    /// A result page parsed to zero usable links.
    EmptyPage,
    /// The result page had no next-page indicator.
    NoNextPage,
    /// The configured page ceiling was hit.
    PageLimit,
    /// Every seed URL was handed out.
    SeedsConsumed,
    /// A result page kept failing; carries the last error message.
    RetriesExhausted(String),
}

/// Terminal signal from a candidate source. Expected, not an error: partial
/// results gathered before it are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryExhausted {
    pub reason: ExhaustionReason,
    pub pages_fetched: u32,
    pub candidates_yielded: usize,
}

impl DiscoveryExhausted {
    /// True when discovery stopped because of failures rather than running
    /// out of results.
    pub fn is_failure(&self) -> bool {
        matches!(self.reason, ExhaustionReason::RetriesExhausted(_))
    }
}
