//! In-memory [`BrowserSession`] with pre-registered responses per URL.
//!
//! Used to run discovery, extraction and the whole pipeline offline. Each URL
//! maps to a queue of steps: steps are consumed in order and the last one
//! repeats, so `fail, fail, page` models a target that recovers on the third
//! attempt.
use crate::scout_browser::block::detect_block;
use crate::scout_browser::session::{BrowserSession, RenderedPage};
use async_trait::async_trait;
use scout_common::{BlockSignal, NavigationError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted reaction to a navigation.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    /// Serve `html`, ending on `final_url` (a redirect when it differs).
    Page { final_url: String, html: String },
    /// Fail with a driver error.
    Error(String),
    /// Serve a block page.
    Block(BlockSignal),
    /// Never finish loading; fails with a timeout once `timeout` elapses.
    Hang,
}

#[derive(Debug, Default)]
struct Shared {
    log: Mutex<Vec<String>>,
    closed: AtomicBool,
}

/// Read-only view of a [`ScriptedSession`] that outlives moving the session
/// into a pipeline.
#[derive(Debug, Clone)]
pub struct ScriptedHandle {
    shared: Arc<Shared>,
}

impl ScriptedHandle {
    /// Every URL navigated to, in order, including failed attempts.
    pub fn navigations(&self) -> Vec<String> {
        self.shared
            .log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

/// Scripted browser session.
///
/// ```
/// use scout_drivers::scout_browser::scripted::ScriptedSession;
/// use scout_drivers::scout_browser::session::BrowserSession;
/// use std::time::Duration;
///
/// # tokio_test_block_on(async {
/// let mut session = ScriptedSession::new()
///     .page("https://a.com", "<a href=\"mailto:hi@a.com\">mail</a>");
/// let page = session.navigate("https://a.com", Duration::from_secs(1)).await.unwrap();
/// assert!(page.html.contains("mailto:"));
/// assert!(session.navigate("https://b.com", Duration::from_secs(1)).await.is_err());
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ScriptedSession {
    routes: HashMap<String, VecDeque<ScriptedStep>>,
    current: Option<RenderedPage>,
    shared: Arc<Shared>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step to the queue for `url`.
    pub fn step(mut self, url: impl Into<String>, step: ScriptedStep) -> Self {
        self.routes.entry(url.into()).or_default().push_back(step);
        self
    }

    /// Serve `html` at `url`.
    pub fn page(self, url: impl Into<String>, html: impl Into<String>) -> Self {
        let url = url.into();
        let step = ScriptedStep::Page {
            final_url: url.clone(),
            html: html.into(),
        };
        self.step(url, step)
    }

    /// Serve `html` at `final_url` after navigating to `url`.
    pub fn redirect(
        self,
        url: impl Into<String>,
        final_url: impl Into<String>,
        html: impl Into<String>,
    ) -> Self {
        let step = ScriptedStep::Page {
            final_url: final_url.into(),
            html: html.into(),
        };
        self.step(url, step)
    }

    /// Fail navigations to `url` with a driver error.
    pub fn error(self, url: impl Into<String>, message: impl Into<String>) -> Self {
        self.step(url, ScriptedStep::Error(message.into()))
    }

    pub fn handle(&self) -> ScriptedHandle {
        ScriptedHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn next_step(&mut self, url: &str) -> Option<ScriptedStep> {
        let queue = self.routes.get_mut(url)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
    ) -> Result<RenderedPage, NavigationError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(NavigationError::Driver {
                url: url.to_string(),
                message: "browser session already closed".to_string(),
            });
        }
        self.shared
            .log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(url.to_string());

        match self.next_step(url) {
            None => Err(NavigationError::Driver {
                url: url.to_string(),
                message: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            }),
            Some(ScriptedStep::Error(message)) => Err(NavigationError::Driver {
                url: url.to_string(),
                message,
            }),
            Some(ScriptedStep::Block(signal)) => Err(NavigationError::Blocked {
                url: url.to_string(),
                signal,
            }),
            Some(ScriptedStep::Hang) => {
                tokio::time::sleep(timeout).await;
                Err(NavigationError::Timeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Some(ScriptedStep::Page { final_url, html }) => {
                if let Some(signal) = detect_block(&html) {
                    return Err(NavigationError::Blocked {
                        url: url.to_string(),
                        signal,
                    });
                }
                let page = RenderedPage {
                    url: final_url,
                    html,
                };
                self.current = Some(page.clone());
                Ok(page)
            }
        }
    }

    async fn wait_for_element(
        &mut self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<(), NavigationError> {
        match &self.current {
            Some(_) => Ok(()),
            None => Err(NavigationError::Driver {
                url: String::new(),
                message: format!("no page loaded while waiting for {selector}"),
            }),
        }
    }

    async fn rendered_html(&mut self) -> Result<RenderedPage, NavigationError> {
        self.current.clone().ok_or_else(|| NavigationError::Driver {
            url: String::new(),
            message: "no page loaded".to_string(),
        })
    }

    async fn close(&mut self) -> Result<(), NavigationError> {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn steps_are_consumed_and_last_repeats() {
        let mut session = ScriptedSession::new()
            .error("https://a.com", "connection reset")
            .page("https://a.com", "<p>ok</p>");
        assert!(matches!(
            session.navigate("https://a.com", T).await,
            Err(NavigationError::Driver { .. })
        ));
        assert_eq!(session.navigate("https://a.com", T).await.unwrap().html, "<p>ok</p>");
        assert_eq!(session.navigate("https://a.com", T).await.unwrap().html, "<p>ok</p>");
        assert_eq!(session.handle().navigations().len(), 3);
    }

    #[tokio::test]
    async fn redirects_report_final_url() {
        let mut session =
            ScriptedSession::new().redirect("https://old.com", "https://new.com/", "<p>moved</p>");
        let page = session.navigate("https://old.com", T).await.unwrap();
        assert_eq!(page.url, "https://new.com/");
        assert_eq!(session.rendered_html().await.unwrap(), page);
        session.wait_for_element("body", T).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn block_pages_and_hangs_become_errors() {
        let mut session = ScriptedSession::new()
            .page(
                "https://www.google.com/search?q=x",
                "<div>Our systems have detected unusual traffic</div>",
            )
            .step("https://slow.com", ScriptedStep::Hang);
        let err = session
            .navigate("https://www.google.com/search?q=x", T)
            .await
            .unwrap_err();
        assert!(err.is_block());
        assert_eq!(
            session.navigate("https://slow.com", T).await.unwrap_err(),
            NavigationError::Timeout {
                url: "https://slow.com".into(),
                timeout_ms: 5000
            }
        );
    }

    #[tokio::test]
    async fn close_is_idempotent_and_visible_through_handle() {
        let mut session = ScriptedSession::new().page("https://a.com", "<p/>");
        let handle = session.handle();
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(handle.is_closed());
        assert!(session.navigate("https://a.com", T).await.is_err());
    }
}
