//! One store visit: storefront page, optional contact page, extraction.
use crate::extract::ContactExtractor;
use scout_common::ScoutError;
use scout_common::domain::NormalizedDomain;
use scout_common::record::{ExtractionOutcome, SkipReason};
use scout_drivers::scout_browser::session::BrowserSession;
use scout_rate::{RateController, navigation_cause};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct StoreVisitor {
    extractor: ContactExtractor,
    page_timeout: Duration,
}

impl StoreVisitor {
    pub fn new(extractor: ContactExtractor, page_timeout: Duration) -> Self {
        Self {
            extractor,
            page_timeout,
        }
    }

    /// Visit `url` for `domain` and extract contacts. Never fails: navigation
    /// problems become `Failed` or `Skipped(RateLimited)` outcomes.
    pub async fn visit<S>(
        &self,
        session: &mut S,
        rate: &mut RateController,
        domain: &NormalizedDomain,
        url: &str,
    ) -> ExtractionOutcome
    where
        S: BrowserSession + ?Sized,
    {
        let root = match rate.navigate(session, url, self.page_timeout, domain.as_str()).await {
            Ok(page) => page,
            Err(err) => return self.failed(domain, err),
        };
        let root_scan = self.extractor.scan(&root.html, &root.url);

        let mut contact_scan = None;
        if self.extractor.needs_follow_up(&root_scan) {
            if let Some(contact_url) = root_scan.contact_page.clone() {
                debug!(target: "scout.extract", %domain, %contact_url, "extract.follow_contact_page");
                match rate.navigate_once(session, &contact_url, self.page_timeout).await {
                    Ok(page) => contact_scan = Some(self.extractor.scan(&page.html, &page.url)),
                    Err(err) => warn!(
                        target: "scout.extract",
                        %domain,
                        %contact_url,
                        error = %err,
                        "extract.contact_page_failed"
                    ),
                }
            }
        }

        let contacts = self.extractor.assemble(root_scan, contact_scan);
        info!(
            target: "scout.extract",
            %domain,
            final_url = %root.url,
            emails = contacts.fields.emails.len(),
            phones = contacts.fields.phones.len(),
            social = contacts.fields.social.len(),
            address = contacts.address.is_some(),
            "extract.done"
        );
        ExtractionOutcome::Extracted {
            domain: domain.clone(),
            final_url: root.url,
            contacts,
        }
    }

    fn failed(&self, domain: &NormalizedDomain, err: ScoutError) -> ExtractionOutcome {
        let blocked = navigation_cause(&err).is_some_and(|e| e.is_block());
        warn!(target: "scout.extract", %domain, blocked, error = %err, "extract.store_failed");
        if blocked {
            ExtractionOutcome::Skipped {
                domain: domain.clone(),
                reason: SkipReason::RateLimited,
            }
        } else {
            ExtractionOutcome::Failed {
                domain: domain.clone(),
                reason: err.to_string(),
            }
        }
    }
}
