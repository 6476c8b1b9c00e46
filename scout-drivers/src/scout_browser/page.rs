use crate::scout_browser::{
    behavioral::BehavioralEngine,
    fingerprint::UserAgentManager,
    stealth::StealthScripts,
};
use fantoccini::{error::CmdError, Client, Locator};
use scout_common::StealthLevel;
use std::time::Duration;
use tracing::debug;

/// Close buttons of newsletter modals and cookie banners.
pub const POPUP_CLOSE_SELECTORS: &[&str] = &[
    "button[aria-label*='Close']",
    "button[class*='close']",
    "button[class*='dismiss']",
    "button[id*='close']",
    "a[class*='close']",
    "div[class*='modal'] button",
    ".modal-close",
    ".popup-close",
    "[data-dismiss='modal']",
    "button.cookie-accept",
    "button.cookie-consent",
    "#onetrust-accept-btn-handler",
    ".cookie-banner button",
];

/// Page-level operations on a WebDriver client: navigation with stealth
/// scripts, element waits, popup dismissal and content snapshots.
pub struct ScoutPage {
    pub(crate) client: Client,
    pub(crate) stealth_level: StealthLevel,
    pub(crate) fingerprint_manager: UserAgentManager,
    pub(crate) behavioral_engine: BehavioralEngine,
}

impl ScoutPage {
    pub fn new(
        client: Client,
        stealth_level: StealthLevel,
        fingerprint_manager: UserAgentManager,
        behavioral_engine: BehavioralEngine,
    ) -> Self {
        Self {
            client,
            stealth_level,
            fingerprint_manager,
            behavioral_engine,
        }
    }

    /// Navigate to `url` and apply the stealth scripts for the level.
    pub async fn goto(&mut self, url: &str) -> Result<(), CmdError> {
        if self.stealth_level != StealthLevel::Lightweight {
            self.behavioral_engine.random_delay(100, 600).await;
        }
        self.client.goto(url).await?;
        self.apply_stealth_and_fingerprint().await
    }

    async fn apply_stealth_and_fingerprint(&mut self) -> Result<(), CmdError> {
        for script in StealthScripts::for_level(self.stealth_level) {
            self.client.execute(script, vec![]).await?;
        }
        if self.stealth_level == StealthLevel::Maximum {
            let p = self.fingerprint_manager.get_session_profile(self.stealth_level);
            self.client
                .execute(
                    &format!(
                        "Object.defineProperty(navigator, 'platform', {{ get: () => '{}' }});",
                        p.platform
                    ),
                    vec![],
                )
                .await?;
        }
        Ok(())
    }

    /// Wait for the first element matching `selector`.
    pub async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), CmdError> {
        self.client
            .wait()
            .at_most(timeout)
            .for_element(Locator::Css(selector))
            .await?;
        Ok(())
    }

    /// Click every visible close button. Returns how many were clicked;
    /// individual click failures are ignored.
    pub async fn dismiss_popups(&self) -> usize {
        let mut closed = 0;
        for selector in POPUP_CLOSE_SELECTORS {
            let Ok(elements) = self.client.find_all(Locator::Css(selector)).await else {
                continue;
            };
            for element in elements {
                if !element.is_displayed().await.unwrap_or(false) {
                    continue;
                }
                if element.click().await.is_ok() {
                    closed += 1;
                    debug!(target: "browser.session", %selector, "popup.closed");
                    self.behavioral_engine.random_delay(300, 700).await;
                }
            }
        }
        closed
    }

    /// Return the full page HTML source.
    pub async fn content(&self) -> Result<String, CmdError> {
        self.client.source().await
    }

    /// Return the current page URL.
    pub async fn current_url(&self) -> Result<String, CmdError> {
        self.client.current_url().await.map(|url| url.to_string())
    }
}
