//! The single dedup authority of a run.
//!
//! Every candidate URL goes through [`Aggregator::offer`], which normalizes
//! it and inserts a `Pending` record when the domain is new and the cap
//! leaves room. Visit outcomes come back through [`Aggregator::record`].
//! Both take the same lock, so concurrent workers sharing a clone see a
//! consistent compare-and-insert on the domain.
use scout_common::domain::{CandidateUrl, NormalizedDomain, canonical_url};
use scout_common::record::{
    Completion, ExtractionOutcome, ExtractionStatus, ResultSet, SkipReason, StoreRecord,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Identity of an accepted store, handed to whoever visits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreTicket {
    pub domain: NormalizedDomain,
    pub url: String,
    pub ordinal: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Duplicate,
    CapReached,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer {
    Accepted(StoreTicket),
    Rejected(RejectReason),
}

/// Offer counters for the run report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OfferStats {
    pub offered: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub invalid: usize,
    pub over_cap: usize,
}

#[derive(Debug, Default)]
struct State {
    records: Vec<StoreRecord>,
    /// Domain to record position. Redirect targets are aliased to the record
    /// that reached them.
    index: HashMap<NormalizedDomain, usize>,
    stats: OfferStats,
}

/// Shared handle; clones see the same records.
#[derive(Debug, Clone)]
pub struct Aggregator {
    cap: usize,
    state: Arc<Mutex<State>>,
}

impl Aggregator {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Normalize `candidate` and accept it if its domain is new and the cap
    /// has room.
    ///
    /// ```
    /// use scout_pipeline::aggregator::{Aggregator, Offer, RejectReason};
    ///
    /// let agg = Aggregator::new(2);
    /// assert!(matches!(agg.offer(&"a.com".into()), Offer::Accepted(_)));
    /// assert_eq!(agg.offer(&"https://A.COM/".into()), Offer::Rejected(RejectReason::Duplicate));
    /// assert_eq!(agg.offer(&"not a url".into()), Offer::Rejected(RejectReason::Invalid));
    /// assert!(matches!(agg.offer(&"b.com".into()), Offer::Accepted(_)));
    /// assert_eq!(agg.offer(&"c.com".into()), Offer::Rejected(RejectReason::CapReached));
    /// ```
    pub fn offer(&self, candidate: &CandidateUrl) -> Offer {
        let mut state = self.state();
        state.stats.offered += 1;

        let parsed = NormalizedDomain::parse(candidate.as_str())
            .zip(canonical_url(candidate.as_str()));
        let Some((domain, url)) = parsed else {
            state.stats.invalid += 1;
            debug!(target: "scout.pipeline", candidate = %candidate, "aggregator.rejected_invalid");
            return Offer::Rejected(RejectReason::Invalid);
        };
        if state.index.contains_key(&domain) {
            state.stats.duplicates += 1;
            debug!(target: "scout.pipeline", %domain, "aggregator.rejected_duplicate");
            return Offer::Rejected(RejectReason::Duplicate);
        }
        if state.records.len() >= self.cap {
            state.stats.over_cap += 1;
            return Offer::Rejected(RejectReason::CapReached);
        }

        let ordinal = state.records.len();
        state.index.insert(domain.clone(), ordinal);
        state
            .records
            .push(StoreRecord::pending(domain.clone(), url.clone(), ordinal));
        state.stats.accepted += 1;
        info!(target: "scout.pipeline", %domain, ordinal, %url, "aggregator.accepted");
        Offer::Accepted(StoreTicket {
            domain,
            url,
            ordinal,
        })
    }

    /// Fold a visit outcome into its record and return the resulting status.
    /// `None` when the domain was never accepted.
    pub fn record(&self, outcome: ExtractionOutcome) -> Option<ExtractionStatus> {
        let mut state = self.state();
        let Some(&pos) = state.index.get(outcome.domain()) else {
            warn!(target: "scout.pipeline", domain = %outcome.domain(), "aggregator.unknown_domain");
            return None;
        };

        let status = match outcome {
            ExtractionOutcome::Extracted {
                domain,
                final_url,
                contacts,
            } => {
                let landed = NormalizedDomain::parse(&final_url).filter(|d| *d != domain);
                let owner = landed.as_ref().and_then(|d| state.index.get(d).copied());
                match (landed, owner) {
                    (Some(target), Some(other)) if other != pos => {
                        info!(
                            target: "scout.pipeline",
                            %domain,
                            redirected_to = %target,
                            "aggregator.redirect_duplicate"
                        );
                        ExtractionStatus::Skipped(SkipReason::Duplicate)
                    }
                    (landed, _) => {
                        if let Some(target) = landed {
                            state.index.entry(target).or_insert(pos);
                        }
                        state.records[pos].merge_contacts(contacts);
                        ExtractionStatus::Extracted
                    }
                }
            }
            ExtractionOutcome::Failed { reason, .. } => ExtractionStatus::Failed(reason),
            ExtractionOutcome::Skipped { reason, .. } => ExtractionStatus::Skipped(reason),
        };

        let record = &mut state.records[pos];
        record.status = record.status.clone().merge(status);
        Some(record.status.clone())
    }

    /// Set the status of an accepted record without touching its fields.
    pub fn mark(&self, domain: &NormalizedDomain, status: ExtractionStatus) -> Option<ExtractionStatus> {
        let mut state = self.state();
        let pos = *state.index.get(domain)?;
        let record = &mut state.records[pos];
        record.status = record.status.clone().merge(status);
        Some(record.status.clone())
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.cap
    }

    pub fn stats(&self) -> OfferStats {
        self.state().stats
    }

    /// Snapshot the records, in acceptance order, as the final result set.
    pub fn finalize(&self, completion: Completion) -> ResultSet {
        let records = self.state().records.clone();
        ResultSet::new(records, self.cap, completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_common::record::{ChainStep, ExtractedContacts};
    use std::collections::HashSet;
    use std::thread;

    fn domain(s: &str) -> NormalizedDomain {
        NormalizedDomain::parse(s).unwrap()
    }

    fn contacts(email: &str) -> ExtractedContacts {
        let mut c = ExtractedContacts::default();
        c.fields.emails.insert(email.to_string());
        c.provenance.emails = Some(ChainStep::Markup);
        c
    }

    fn accept(agg: &Aggregator, url: &str) -> StoreTicket {
        match agg.offer(&url.into()) {
            Offer::Accepted(ticket) => ticket,
            other => panic!("{url} not accepted: {other:?}"),
        }
    }

    #[test]
    fn ticket_carries_canonical_url_and_ordinal() {
        let agg = Aggregator::new(5);
        let a = accept(&agg, "https://www.Mugs.example/?utm_source=google#top");
        assert_eq!(a.domain.as_str(), "mugs.example");
        assert_eq!(a.url, "https://www.mugs.example");
        assert_eq!(a.ordinal, 0);
        assert_eq!(accept(&agg, "knits.example").ordinal, 1);
    }

    #[test]
    fn cap_is_never_exceeded() {
        let agg = Aggregator::new(3);
        for i in 0..20 {
            agg.offer(&format!("store{i}.example").as_str().into());
        }
        assert_eq!(agg.len(), 3);
        assert!(agg.is_full());
        let stats = agg.stats();
        assert_eq!(stats.offered, 20);
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.over_cap, 17);
        assert_eq!(agg.finalize(Completion::CapReached).len(), 3);
    }

    #[test]
    fn extraction_merges_fields_and_sets_status() {
        let agg = Aggregator::new(2);
        let t = accept(&agg, "a.com");
        let status = agg.record(ExtractionOutcome::Extracted {
            domain: t.domain.clone(),
            final_url: "https://a.com/".into(),
            contacts: contacts("hi@a.com"),
        });
        assert_eq!(status, Some(ExtractionStatus::Extracted));

        let set = agg.finalize(Completion::CapReached);
        let rec = &set.records()[0];
        assert!(rec.emails.contains("hi@a.com"));
        assert_eq!(rec.provenance.emails, Some(ChainStep::Markup));
        assert_eq!(rec.url, "https://a.com");
    }

    #[test]
    fn redirect_to_known_domain_is_skipped_without_merge() {
        let agg = Aggregator::new(5);
        let a = accept(&agg, "a.com");
        let b = accept(&agg, "b.com");
        agg.record(ExtractionOutcome::Extracted {
            domain: a.domain,
            final_url: "https://a.com".into(),
            contacts: contacts("hi@a.com"),
        });
        let status = agg.record(ExtractionOutcome::Extracted {
            domain: b.domain,
            final_url: "https://www.a.com/pages/home".into(),
            contacts: contacts("hi@a.com"),
        });
        assert_eq!(status, Some(ExtractionStatus::Skipped(SkipReason::Duplicate)));

        let set = agg.finalize(Completion::CapReached);
        assert!(set.records()[1].emails.is_empty());
        assert_eq!(set.records()[0].emails.len(), 1);
    }

    #[test]
    fn redirect_target_becomes_a_duplicate_for_later_offers() {
        let agg = Aggregator::new(5);
        let old = accept(&agg, "old-mugs.myshopify.com");
        agg.record(ExtractionOutcome::Extracted {
            domain: old.domain,
            final_url: "https://mugs.example/".into(),
            contacts: ExtractedContacts::default(),
        });
        assert_eq!(
            agg.offer(&"https://mugs.example/pages/contact".into()),
            Offer::Rejected(RejectReason::Duplicate)
        );
        assert_eq!(agg.len(), 1);
    }

    #[test]
    fn extracted_wins_over_later_failure() {
        let agg = Aggregator::new(1);
        let t = accept(&agg, "a.com");
        agg.record(ExtractionOutcome::Extracted {
            domain: t.domain.clone(),
            final_url: t.url.clone(),
            contacts: ExtractedContacts::default(),
        });
        let status = agg.record(ExtractionOutcome::Failed {
            domain: t.domain.clone(),
            reason: "late timeout".into(),
        });
        assert_eq!(status, Some(ExtractionStatus::Extracted));
        assert_eq!(
            agg.mark(&t.domain, ExtractionStatus::Skipped(SkipReason::Cancelled)),
            Some(ExtractionStatus::Extracted)
        );
    }

    #[test]
    fn unknown_domains_are_ignored() {
        let agg = Aggregator::new(1);
        assert_eq!(
            agg.record(ExtractionOutcome::Failed {
                domain: domain("ghost.example"),
                reason: "x".into(),
            }),
            None
        );
        assert_eq!(agg.mark(&domain("ghost.example"), ExtractionStatus::Extracted), None);
        assert!(agg.is_empty());
    }

    #[test]
    fn concurrent_offers_keep_domains_unique() {
        let agg = Aggregator::new(50);
        let workers: Vec<_> = (0..8)
            .map(|w| {
                let agg = agg.clone();
                thread::spawn(move || {
                    for i in 0..40 {
                        // Every worker offers the same 40 stores in varying spellings.
                        let raw = if w % 2 == 0 {
                            format!("https://www.store{i}.example/")
                        } else {
                            format!("STORE{i}.example")
                        };
                        agg.offer(&raw.as_str().into());
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let set = agg.finalize(Completion::CapReached);
        assert_eq!(set.len(), 40);
        let domains: HashSet<_> = set.iter().map(|r| r.domain.clone()).collect();
        assert_eq!(domains.len(), 40);
        let ordinals: Vec<_> = set.iter().map(|r| r.ordinal).collect();
        assert_eq!(ordinals, (0..40).collect::<Vec<_>>());
        assert_eq!(agg.stats().duplicates, 8 * 40 - 40);
    }
}
