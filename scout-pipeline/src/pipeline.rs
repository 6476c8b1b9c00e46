//! The run loop.
//!
//! Discovery and extraction are interleaved: each discovery step yields a
//! batch of candidates, every candidate is offered to the aggregator, and an
//! accepted store is visited before the next candidate is considered. The
//! cap and the cancellation token are checked between stores. The session is
//! closed on every exit path.
use crate::aggregator::{Aggregator, Offer, OfferStats, StoreTicket};
use scout_common::record::{Completion, ExtractionStatus, ResultSet, SkipReason};
use scout_common::{DiscoveryExhausted, ExhaustionReason, ScoutError};
use scout_config::ScoutConfig;
use scout_drivers::scout_browser::session::BrowserSession;
use scout_rate::{RateController, RateStats};
use scout_web::extract::ContactExtractor;
use scout_web::search::{CandidateSource, DiscoveryStep, SearchDiscoverer, SeedList};
use scout_web::visit::StoreVisitor;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Everything a finished run produced.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub results: ResultSet,
    /// Set when the candidate source ran dry (as opposed to cap or cancel).
    pub discovery: Option<DiscoveryExhausted>,
    pub rate: RateStats,
    pub offers: OfferStats,
}

/// Build the candidate source for a run: seed URLs when given, otherwise
/// paginated search.
pub fn candidate_source(
    config: &ScoutConfig,
    seeds: Option<Vec<String>>,
) -> Result<CandidateSource, ScoutError> {
    match seeds {
        Some(urls) => Ok(CandidateSource::Seeds(SeedList::new(urls))),
        None => {
            let discoverer = SearchDiscoverer::new(
                &config.search,
                config.desired_candidates(),
                config.browser.page_load_timeout(),
            )?;
            Ok(CandidateSource::Search(Box::new(discoverer)))
        }
    }
}

pub struct Pipeline<S> {
    session: S,
    rate: RateController,
    source: CandidateSource,
    visitor: StoreVisitor,
    aggregator: Aggregator,
    cancel: CancellationToken,
}

impl<S: BrowserSession> Pipeline<S> {
    pub fn new(
        config: &ScoutConfig,
        session: S,
        source: CandidateSource,
        cancel: CancellationToken,
    ) -> Result<Self, ScoutError> {
        let extractor = ContactExtractor::new(&config.extraction)
            .map_err(|e| ScoutError::Config(format!("extraction patterns: {e}")))?;
        Ok(Self {
            session,
            rate: RateController::new(&config.rate),
            source,
            visitor: StoreVisitor::new(extractor, config.browser.page_load_timeout()),
            aggregator: Aggregator::new(config.max_results),
            cancel,
        })
    }

    /// Shared handle on the run's records, usable while the run is going.
    pub fn aggregator(&self) -> Aggregator {
        self.aggregator.clone()
    }

    /// Drive the run to completion.
    ///
    /// Fails only with [`ScoutError::DiscoveryFailed`], when the candidate
    /// source gave up on errors before a single store was accepted. Every
    /// other outcome, including cancellation, is a report with whatever was
    /// collected.
    pub async fn run(mut self) -> Result<RunReport, ScoutError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(target: "scout.pipeline", "run", %run_id);
        info!(
            target: "scout.pipeline",
            parent: &span,
            source = %self.source.describe(),
            cap = self.aggregator.cap(),
            "pipeline.started"
        );

        let (completion, discovery) = self.drive().instrument(span.clone()).await;

        if let Err(err) = self.session.close().await {
            warn!(target: "scout.pipeline", parent: &span, error = %err, "pipeline.session_close_failed");
        }

        let results = self.aggregator.finalize(completion);
        let counts = results.status_counts();
        info!(
            target: "scout.pipeline",
            parent: &span,
            records = results.len(),
            extracted = counts.get("extracted").copied().unwrap_or(0),
            failed = counts.get("failed").copied().unwrap_or(0),
            skipped = counts.get("skipped").copied().unwrap_or(0),
            completion = ?results.completion(),
            "pipeline.finished"
        );

        if let Some(done) = discovery.as_ref().filter(|d| d.is_failure()) {
            if results.is_empty() {
                let detail = match &done.reason {
                    ExhaustionReason::RetriesExhausted(last) => last.clone(),
                    other => format!("{other:?}"),
                };
                return Err(ScoutError::DiscoveryFailed(detail));
            }
        }

        Ok(RunReport {
            run_id,
            results,
            discovery,
            rate: self.rate.stats(),
            offers: self.aggregator.stats(),
        })
    }

    async fn drive(&mut self) -> (Completion, Option<DiscoveryExhausted>) {
        let Self {
            session,
            rate,
            source,
            visitor,
            aggregator,
            cancel,
        } = self;

        let completion = 'run: loop {
            if cancel.is_cancelled() {
                break 'run Completion::Cancelled;
            }
            if aggregator.is_full() {
                break 'run Completion::CapReached;
            }

            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                step = source.next_batch(&mut *session, &mut *rate) => Some(step),
            };
            let batch = match step {
                None => break 'run Completion::Cancelled,
                Some(DiscoveryStep::Exhausted(done)) => {
                    return (Completion::Exhausted(done.clone()), Some(done));
                }
                Some(DiscoveryStep::Candidates(batch)) => batch,
            };

            for candidate in batch {
                if cancel.is_cancelled() {
                    break 'run Completion::Cancelled;
                }
                if aggregator.is_full() {
                    break 'run Completion::CapReached;
                }
                let ticket = match aggregator.offer(&candidate) {
                    Offer::Accepted(ticket) => ticket,
                    Offer::Rejected(reason) => {
                        debug!(target: "scout.pipeline", %candidate, ?reason, "pipeline.candidate_rejected");
                        continue;
                    }
                };
                if !visit(&mut *session, rate, visitor, aggregator, cancel, ticket).await {
                    break 'run Completion::Cancelled;
                }
            }
        };
        if completion == Completion::Cancelled {
            info!(target: "scout.pipeline", records = aggregator.len(), "pipeline.cancelled");
        }
        (completion, None)
    }
}

/// Visit one accepted store and record the outcome. `false` when the run
/// was cancelled mid-visit; the store is then marked skipped.
async fn visit<S>(
    session: &mut S,
    rate: &mut RateController,
    visitor: &StoreVisitor,
    aggregator: &Aggregator,
    cancel: &CancellationToken,
    ticket: StoreTicket,
) -> bool
where
    S: BrowserSession + ?Sized,
{
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        outcome = visitor.visit(session, rate, &ticket.domain, &ticket.url) => Some(outcome),
    };
    match outcome {
        Some(outcome) => {
            let status = aggregator.record(outcome);
            debug!(target: "scout.pipeline", domain = %ticket.domain, ?status, "pipeline.store_done");
            true
        }
        None => {
            aggregator.mark(&ticket.domain, ExtractionStatus::Skipped(SkipReason::Cancelled));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_config::RateConfig;
    use scout_drivers::scout_browser::scripted::ScriptedSession;

    fn config(cap: usize) -> ScoutConfig {
        ScoutConfig {
            max_results: cap,
            rate: RateConfig {
                min_delay_ms: 0,
                jitter_ms: 0,
                ..RateConfig::default()
            },
            ..ScoutConfig::default()
        }
    }

    #[test]
    fn seeds_take_precedence_over_search() {
        let cfg = config(3);
        let seeds = candidate_source(&cfg, Some(vec!["a.com".into()])).unwrap();
        assert_eq!(seeds.describe(), "1 seed URLs");
        let search = candidate_source(&cfg, None).unwrap();
        assert!(search.describe().starts_with("search: site:myshopify.com"));
    }

    #[test]
    fn bad_engine_url_is_a_config_error() {
        let mut cfg = config(3);
        cfg.search.engine_url = "not a url".into();
        assert!(matches!(candidate_source(&cfg, None), Err(ScoutError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_visits_nothing() {
        let cfg = config(3);
        let session = ScriptedSession::new().page("https://a.com", "<p>hi</p>");
        let handle = session.handle();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let source = candidate_source(&cfg, Some(vec!["a.com".into()])).unwrap();
        let report = Pipeline::new(&cfg, session, source, cancel).unwrap().run().await.unwrap();
        assert_eq!(report.results.completion(), &Completion::Cancelled);
        assert!(report.results.is_empty());
        assert!(handle.navigations().is_empty());
        assert!(handle.is_closed());
    }
}
