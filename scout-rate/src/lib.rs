//! Request pacing and backoff in front of a [`BrowserSession`].
//!
//! Every navigation goes through [`RateController::navigate`], which
//!
//! - waits until `min_delay` (plus random jitter) has passed since the
//!   previous navigation finished,
//! - retries failed navigations with exponential backoff capped at the
//!   configured ceiling (block pages back off at least twice the base),
//! - gives up on a target after `max_consecutive_failures` failures in a row
//!   and reports [`ScoutError::RateLimitExceeded`] exactly once.
//!
//! The failure counter belongs to one target: it starts at zero on every
//! `navigate` call, so a flaky store never penalises the next one.
use rand::Rng;
use scout_common::{NavigationError, ScoutError};
use scout_config::RateConfig;
use scout_drivers::scout_browser::session::{BrowserSession, RenderedPage};
use serde::Serialize;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Counters over the controller's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub blocks: u64,
    pub targets_given_up: u64,
}

pub struct RateController {
    min_delay: Duration,
    jitter_ms: u64,
    backoff_base: Duration,
    backoff_ceiling: Duration,
    max_consecutive_failures: u32,
    last_navigation: Option<Instant>,
    stats: RateStats,
}

impl RateController {
    /// ```
    /// use scout_config::RateConfig;
    /// use scout_rate::RateController;
    /// use std::time::Duration;
    ///
    /// let rate = RateController::new(&RateConfig::default());
    /// assert_eq!(rate.backoff_for(1, false), Duration::from_secs(1));
    /// assert_eq!(rate.backoff_for(3, false), Duration::from_secs(4));
    /// assert_eq!(rate.backoff_for(1, true), Duration::from_secs(2));
    /// assert_eq!(rate.backoff_for(12, false), Duration::from_secs(30));
    /// ```
    pub fn new(config: &RateConfig) -> Self {
        Self {
            min_delay: config.min_delay(),
            jitter_ms: config.jitter_ms,
            backoff_base: config.backoff_base(),
            backoff_ceiling: config.backoff_ceiling(),
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            last_navigation: None,
            stats: RateStats::default(),
        }
    }

    pub fn stats(&self) -> RateStats {
        self.stats
    }

    /// Delay after the `failures`-th consecutive failure:
    /// `min(base * 2^(failures-1), ceiling)`, at least `2 * base` for blocks.
    pub fn backoff_for(&self, failures: u32, blocked: bool) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        let mut delay = self.backoff_base.saturating_mul(1u32 << exp);
        if blocked {
            delay = delay.max(self.backoff_base.saturating_mul(2));
        }
        delay.min(self.backoff_ceiling)
    }

    fn jitter(&self) -> Duration {
        if self.jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
    }

    /// Wait out the minimum inter-request gap.
    pub async fn pace(&mut self) {
        let Some(last) = self.last_navigation else {
            return;
        };
        let gap = self.min_delay + self.jitter();
        let elapsed = last.elapsed();
        if elapsed < gap {
            let wait = gap - elapsed;
            debug!(target: "scout.rate", wait_ms = wait.as_millis() as u64, "rate.pacing");
            sleep(wait).await;
        }
    }

    /// One paced attempt with no retry, for optional follow-up pages.
    pub async fn navigate_once<S>(
        &mut self,
        session: &mut S,
        url: &str,
        timeout: Duration,
    ) -> Result<RenderedPage, NavigationError>
    where
        S: BrowserSession + ?Sized,
    {
        self.pace().await;
        self.stats.attempts += 1;
        let result = session.navigate(url, timeout).await;
        self.last_navigation = Some(Instant::now());
        match &result {
            Ok(_) => self.stats.successes += 1,
            Err(err) => {
                self.stats.failures += 1;
                if err.is_block() {
                    self.stats.blocks += 1;
                }
            }
        }
        result
    }

    /// Navigate `session` to `url`, pacing and retrying as configured.
    ///
    /// `target` names what is being fetched (a store domain, a search page)
    /// for logs and for the [`ScoutError::RateLimitExceeded`] it may return.
    pub async fn navigate<S>(
        &mut self,
        session: &mut S,
        url: &str,
        timeout: Duration,
        target: &str,
    ) -> Result<RenderedPage, ScoutError>
    where
        S: BrowserSession + ?Sized,
    {
        let mut failures: u32 = 0;
        loop {
            self.pace().await;
            self.stats.attempts += 1;
            let result = session.navigate(url, timeout).await;
            self.last_navigation = Some(Instant::now());

            let err = match result {
                Ok(page) => {
                    self.stats.successes += 1;
                    if failures > 0 {
                        info!(target: "scout.rate", %target, failures, "rate.recovered");
                    }
                    return Ok(page);
                }
                Err(err) => err,
            };

            failures += 1;
            self.stats.failures += 1;
            if err.is_block() {
                self.stats.blocks += 1;
            }

            if failures >= self.max_consecutive_failures {
                self.stats.targets_given_up += 1;
                warn!(
                    target: "scout.rate",
                    %target,
                    failures,
                    error = %err,
                    "rate.limit_exceeded"
                );
                return Err(ScoutError::RateLimitExceeded {
                    target: target.to_string(),
                    failures,
                    last: err,
                });
            }

            let delay = self.backoff_for(failures, err.is_block()) + self.jitter();
            warn!(
                target: "scout.rate",
                %target,
                attempt = failures,
                max_failures = self.max_consecutive_failures,
                backoff_ms = delay.as_millis() as u64,
                blocked = err.is_block(),
                error = %err,
                "rate.retrying"
            );
            sleep(delay).await;
        }
    }
}

/// The navigation error behind a [`ScoutError`], if any.
pub fn navigation_cause(err: &ScoutError) -> Option<&NavigationError> {
    match err {
        ScoutError::Navigation(e) => Some(e),
        ScoutError::RateLimitExceeded { last, .. } => Some(last),
        _ => None,
    }
}
