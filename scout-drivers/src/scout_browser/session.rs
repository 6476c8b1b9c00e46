//! The navigation contract every component above the browser consumes.
use async_trait::async_trait;
use scout_common::NavigationError;
use std::time::Duration;

/// A rendered page: the final URL after redirects and its HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub url: String,
    pub html: String,
}

/// One automated browser session. Navigations are serialized: a session is
/// owned by exactly one worker and never shared.
///
/// Every call is bounded; implementations report CAPTCHA and rate-limit
/// pages as [`NavigationError::Blocked`] rather than returning their HTML.
#[async_trait]
pub trait BrowserSession: Send {
    /// Load `url` and return the rendered page, failing after `timeout`.
    async fn navigate(&mut self, url: &str, timeout: Duration)
        -> Result<RenderedPage, NavigationError>;

    /// Wait until `selector` matches on the current page.
    async fn wait_for_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), NavigationError>;

    /// Snapshot of the current page.
    async fn rendered_html(&mut self) -> Result<RenderedPage, NavigationError>;

    /// Release the browser. Idempotent.
    async fn close(&mut self) -> Result<(), NavigationError>;
}

#[async_trait]
impl<S: BrowserSession + ?Sized> BrowserSession for Box<S> {
    async fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
    ) -> Result<RenderedPage, NavigationError> {
        (**self).navigate(url, timeout).await
    }

    async fn wait_for_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), NavigationError> {
        (**self).wait_for_element(selector, timeout).await
    }

    async fn rendered_html(&mut self) -> Result<RenderedPage, NavigationError> {
        (**self).rendered_html().await
    }

    async fn close(&mut self) -> Result<(), NavigationError> {
        (**self).close().await
    }
}
