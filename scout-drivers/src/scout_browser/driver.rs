use crate::scout_browser::{
    behavioral::BehavioralEngine,
    block::detect_block,
    fingerprint::UserAgentManager,
    page::ScoutPage,
    session::{BrowserSession, RenderedPage},
    stealth::build_stealth_arguments,
};
use async_trait::async_trait;
use fantoccini::{
    error::{CmdError, ErrorStatus},
    wd::TimeoutConfiguration,
    ClientBuilder,
};
use scout_common::{NavigationError, ScoutError};
use scout_config::BrowserConfig;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webdriver::capabilities::Capabilities;

const SETTLE_JITTER_MS: u64 = 500;

/// [`BrowserSession`] backed by a `fantoccini` WebDriver client, with stealth
/// and behavioral helpers.
pub struct ScoutDriver {
    page: Option<ScoutPage>,
    config: BrowserConfig,
    session_id: Uuid,
}

impl ScoutDriver {
    /// Connect to a running WebDriver service (Chromedriver by default).
    ///
    /// Fails with [`ScoutError::Startup`] when no service answers, which is
    /// fatal for the whole run.
    pub async fn connect(config: &BrowserConfig) -> Result<Self, ScoutError> {
        let mut user_agent_manager = UserAgentManager::new();
        let profile = user_agent_manager.get_session_profile(config.stealth);
        let args = build_stealth_arguments(config.stealth, profile, config.headless);

        let mut chrome_opts = HashMap::new();
        chrome_opts.insert("args".to_string(), json!(args));
        chrome_opts.insert(
            "excludeSwitches".to_string(),
            json!(["enable-automation"]),
        );
        let mut caps = Capabilities::new();
        caps.insert("goog:chromeOptions".to_string(), json!(chrome_opts));

        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(&config.webdriver_url)
            .await
            .map_err(|e| {
                ScoutError::Startup(format!(
                    "cannot start a browser session via {}: {e}",
                    config.webdriver_url
                ))
            })?;

        client
            .update_timeouts(TimeoutConfiguration::new(
                None,
                Some(config.page_load_timeout()),
                None,
            ))
            .await
            .map_err(|e| ScoutError::Startup(format!("cannot set page load timeout: {e}")))?;

        let session_id = Uuid::new_v4();
        info!(
            target: "browser.session",
            %session_id,
            webdriver = %config.webdriver_url,
            headless = config.headless,
            stealth = ?config.stealth,
            "session.opened"
        );

        Ok(Self {
            page: Some(ScoutPage::new(
                client,
                config.stealth,
                user_agent_manager,
                BehavioralEngine::new(),
            )),
            config: config.clone(),
            session_id,
        })
    }

    fn page(&mut self, url: &str) -> Result<&mut ScoutPage, NavigationError> {
        self.page.as_mut().ok_or_else(|| NavigationError::Driver {
            url: url.to_string(),
            message: "browser session already closed".to_string(),
        })
    }

    async fn load(&mut self, url: &str, timeout: Duration) -> Result<RenderedPage, NavigationError> {
        let wait_for = self.config.wait_for.clone();
        let settle = self.config.settle();
        let dismiss = self.config.dismiss_popups;

        let page = self.page(url)?;
        page.goto(url).await.map_err(|e| classify(url, timeout, e))?;
        if !wait_for.is_empty() {
            page.wait_for(&wait_for, timeout)
                .await
                .map_err(|e| classify(url, timeout, e))?;
        }
        page.behavioral_engine.settle(settle, SETTLE_JITTER_MS).await;
        if dismiss {
            let closed = page.dismiss_popups().await;
            if closed > 0 {
                debug!(target: "browser.session", %url, closed, "popups.dismissed");
            }
        }
        snapshot(page, url, timeout).await
    }
}

async fn snapshot(
    page: &ScoutPage,
    url: &str,
    timeout: Duration,
) -> Result<RenderedPage, NavigationError> {
    let html = page.content().await.map_err(|e| classify(url, timeout, e))?;
    let final_url = page
        .current_url()
        .await
        .unwrap_or_else(|_| url.to_string());
    Ok(RenderedPage { url: final_url, html })
}

fn classify(url: &str, timeout: Duration, e: CmdError) -> NavigationError {
    match e {
        CmdError::WaitTimeout => NavigationError::Timeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        },
        CmdError::Standard(ref wd) if matches!(wd.error, ErrorStatus::Timeout) => {
            NavigationError::Timeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
        }
        other => NavigationError::Driver {
            url: url.to_string(),
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl BrowserSession for ScoutDriver {
    async fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
    ) -> Result<RenderedPage, NavigationError> {
        debug!(target: "browser.session", session_id = %self.session_id, %url, "navigate.start");
        // Settle time and popup clicks are bounded too.
        let budget = timeout + self.config.settle() + Duration::from_secs(10);
        let rendered = match tokio::time::timeout(budget, self.load(url, timeout)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(NavigationError::Timeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        };
        if let Some(signal) = detect_block(&rendered.html) {
            warn!(target: "browser.session", %url, %signal, "navigate.blocked");
            return Err(NavigationError::Blocked {
                url: url.to_string(),
                signal,
            });
        }
        Ok(rendered)
    }

    async fn wait_for_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), NavigationError> {
        let page = self.page("")?;
        let url = page.current_url().await.unwrap_or_default();
        page.wait_for(selector, timeout)
            .await
            .map_err(|e| classify(&url, timeout, e))
    }

    async fn rendered_html(&mut self) -> Result<RenderedPage, NavigationError> {
        let timeout = self.config.page_load_timeout();
        let page = self.page("")?;
        let url = page.current_url().await.unwrap_or_default();
        snapshot(page, &url, timeout).await
    }

    async fn close(&mut self) -> Result<(), NavigationError> {
        let Some(page) = self.page.take() else {
            return Ok(());
        };
        info!(target: "browser.session", session_id = %self.session_id, "session.closed");
        page.client.close().await.map_err(|e| NavigationError::Driver {
            url: String::new(),
            message: format!("closing browser session: {e}"),
        })
    }
}

impl Drop for ScoutDriver {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    target: "browser.session",
                    session_id = %self.session_id,
                    "session.dropped_unclosed"
                );
                let client = page.client;
                handle.spawn(async move {
                    let _ = client.close().await;
                });
            }
            Err(_) => warn!(
                target: "browser.session",
                session_id = %self.session_id,
                "session.leaked: no runtime to close it on"
            ),
        }
    }
}
