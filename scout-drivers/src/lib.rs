//! Driver layer for browser automation.
//!
//! This crate exposes the one browser session abstraction the scout pipeline
//! consumes, plus the WebDriver-backed implementation and an in-memory
//! stand-in for offline runs.
//!
//! - [`scout_browser::session::BrowserSession`]: the navigation contract
//! - [`scout_browser::driver::ScoutDriver`]: fantoccini WebDriver client wrapper
//! - [`scout_browser::page::ScoutPage`]: stealth scripts and popup dismissal
//! - [`scout_browser::block::detect_block`]: CAPTCHA / rate-limit page signatures
//! - [`scout_browser::scripted::ScriptedSession`]: pre-registered responses per URL
pub mod scout_browser;
