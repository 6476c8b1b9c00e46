//! Store records and the bounded, insertion-ordered result set.
use crate::domain::NormalizedDomain;
use crate::DiscoveryExhausted;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Social platforms we collect one profile link for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialPlatform {
    Facebook,
    Instagram,
    TwitterX,
    Tiktok,
    Youtube,
    Linkedin,
}

impl SocialPlatform {
    /// Every platform, in export column order.
    pub const ALL: [SocialPlatform; 6] = [
        SocialPlatform::Facebook,
        SocialPlatform::Instagram,
        SocialPlatform::TwitterX,
        SocialPlatform::Tiktok,
        SocialPlatform::Youtube,
        SocialPlatform::Linkedin,
    ];

    /// Export column name.
    pub fn column(self) -> &'static str {
        match self {
            SocialPlatform::Facebook => "facebook",
            SocialPlatform::Instagram => "instagram",
            SocialPlatform::TwitterX => "twitter_x",
            SocialPlatform::Tiktok => "tiktok",
            SocialPlatform::Youtube => "youtube",
            SocialPlatform::Linkedin => "linkedin",
        }
    }

    /// Registrable domains that identify the platform.
    pub fn domains(self) -> &'static [&'static str] {
        match self {
            SocialPlatform::Facebook => &["facebook.com", "fb.com"],
            SocialPlatform::Instagram => &["instagram.com"],
            SocialPlatform::TwitterX => &["twitter.com", "x.com"],
            SocialPlatform::Tiktok => &["tiktok.com"],
            SocialPlatform::Youtube => &["youtube.com", "youtu.be"],
            SocialPlatform::Linkedin => &["linkedin.com"],
        }
    }

    /// Match a lower-case host against the platform domains (exact or
    /// subdomain, so `box.com` never counts as `x.com`).
    pub fn from_host(host: &str) -> Option<Self> {
        let host = host.trim_end_matches('.');
        Self::ALL.into_iter().find(|p| {
            p.domains()
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{d}")))
        })
    }
}

/// Which step of the extraction chain produced a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStep {
    /// Structured markup on the storefront page (`mailto:`, `tel:`, schema.org).
    Markup,
    /// Structured markup on the followed contact page.
    ContactPage,
    /// Pattern matching over visible text.
    FreeText,
}

/// Contact fields as sets, so a record never carries the same value twice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactFields {
    pub emails: BTreeSet<String>,
    pub phones: BTreeSet<String>,
    pub social: BTreeMap<SocialPlatform, String>,
}

impl ContactFields {
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.phones.is_empty() && self.social.is_empty()
    }

    /// Union emails and phones; social links keep the first value seen per
    /// platform.
    pub fn absorb(&mut self, other: ContactFields) {
        self.emails.extend(other.emails);
        self.phones.extend(other.phones);
        for (platform, link) in other.social {
            self.social.entry(platform).or_insert(link);
        }
    }
}

/// Where the emails and phones of a record came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub emails: Option<ChainStep>,
    pub phones: Option<ChainStep>,
}

/// Everything the extractor learned about one store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedContacts {
    pub fields: ContactFields,
    pub address: Option<String>,
    pub contact_page: Option<String>,
    pub provenance: Provenance,
}

/// Why a record was skipped rather than extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The store redirected to a domain that is already in the result set.
    Duplicate,
    /// The rate controller gave up on this store.
    RateLimited,
    /// The run was cancelled before the store was visited.
    Cancelled,
}

/// Extraction lifecycle of a record.
///
/// `Pending -> Extracted | Failed | Skipped`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ExtractionStatus {
    Pending,
    Extracted,
    Failed(String),
    Skipped(SkipReason),
}

impl ExtractionStatus {
    fn rank(&self) -> u8 {
        match self {
            ExtractionStatus::Pending => 0,
            ExtractionStatus::Skipped(_) => 1,
            ExtractionStatus::Failed(_) => 2,
            ExtractionStatus::Extracted => 3,
        }
    }

    /// Combine with a later status for the same record: `Extracted` wins
    /// over failures and skips, `Pending` yields to anything.
    pub fn merge(self, incoming: ExtractionStatus) -> ExtractionStatus {
        if incoming.rank() >= self.rank() {
            incoming
        } else {
            self
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExtractionStatus::Pending)
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionStatus::Pending => f.write_str("pending"),
            ExtractionStatus::Extracted => f.write_str("extracted"),
            ExtractionStatus::Failed(reason) => write!(f, "failed: {reason}"),
            ExtractionStatus::Skipped(SkipReason::Duplicate) => f.write_str("skipped: duplicate"),
            ExtractionStatus::Skipped(SkipReason::RateLimited) => f.write_str("skipped: rate limited"),
            ExtractionStatus::Skipped(SkipReason::Cancelled) => f.write_str("skipped: cancelled"),
        }
    }
}

/// One discovered store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub domain: NormalizedDomain,
    /// Landing URL visited for this store.
    pub url: String,
    /// Zero-based discovery order.
    pub ordinal: usize,
    pub emails: BTreeSet<String>,
    pub phones: BTreeSet<String>,
    pub social: BTreeMap<SocialPlatform, String>,
    pub address: Option<String>,
    pub contact_page: Option<String>,
    pub provenance: Provenance,
    pub status: ExtractionStatus,
}

impl StoreRecord {
    pub fn pending(domain: NormalizedDomain, url: impl Into<String>, ordinal: usize) -> Self {
        Self {
            domain,
            url: url.into(),
            ordinal,
            emails: BTreeSet::new(),
            phones: BTreeSet::new(),
            social: BTreeMap::new(),
            address: None,
            contact_page: None,
            provenance: Provenance::default(),
            status: ExtractionStatus::Pending,
        }
    }

    /// Fold extracted contacts into the record. Identity (domain, url,
    /// ordinal) is never touched; contact fields are unioned and the first
    /// value wins for single-valued fields.
    pub fn merge_contacts(&mut self, contacts: ExtractedContacts) {
        let ExtractedContacts {
            fields,
            address,
            contact_page,
            provenance,
        } = contacts;
        self.emails.extend(fields.emails);
        self.phones.extend(fields.phones);
        for (platform, link) in fields.social {
            self.social.entry(platform).or_insert(link);
        }
        if self.address.is_none() {
            self.address = address;
        }
        if self.contact_page.is_none() {
            self.contact_page = contact_page;
        }
        self.provenance.emails = self.provenance.emails.or(provenance.emails);
        self.provenance.phones = self.provenance.phones.or(provenance.phones);
    }

    pub fn has_contacts(&self) -> bool {
        !self.emails.is_empty() || !self.phones.is_empty() || !self.social.is_empty()
    }
}

/// Result of visiting one store, handed to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Extracted {
        domain: NormalizedDomain,
        /// URL the browser ended on, after redirects.
        final_url: String,
        contacts: ExtractedContacts,
    },
    Failed {
        domain: NormalizedDomain,
        reason: String,
    },
    Skipped {
        domain: NormalizedDomain,
        reason: SkipReason,
    },
}

impl ExtractionOutcome {
    pub fn domain(&self) -> &NormalizedDomain {
        match self {
            ExtractionOutcome::Extracted { domain, .. }
            | ExtractionOutcome::Failed { domain, .. }
            | ExtractionOutcome::Skipped { domain, .. } => domain,
        }
    }
}

/// Why the result set was finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    CapReached,
    Exhausted(DiscoveryExhausted),
    Cancelled,
}

/// Insertion-ordered, capped collection of store records. No two records
/// share a domain.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSet {
    records: Vec<StoreRecord>,
    cap: usize,
    completion: Completion,
}

impl ResultSet {
    /// Assemble a finalized set. Callers guarantee the invariants; the
    /// constructor truncates to `cap` regardless.
    pub fn new(mut records: Vec<StoreRecord>, cap: usize, completion: Completion) -> Self {
        records.truncate(cap);
        Self {
            records,
            cap,
            completion,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    pub fn records(&self) -> &[StoreRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoreRecord> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<StoreRecord> {
        self.records
    }

    /// Number of records per final status label (`extracted`, `failed`, ...).
    pub fn status_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for r in &self.records {
            let key = match r.status {
                ExtractionStatus::Pending => "pending",
                ExtractionStatus::Extracted => "extracted",
                ExtractionStatus::Failed(_) => "failed",
                ExtractionStatus::Skipped(_) => "skipped",
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(s: &str) -> NormalizedDomain {
        NormalizedDomain::parse(s).unwrap()
    }

    #[test]
    fn social_host_matching_is_suffix_based() {
        assert_eq!(SocialPlatform::from_host("www.facebook.com"), Some(SocialPlatform::Facebook));
        assert_eq!(SocialPlatform::from_host("x.com"), Some(SocialPlatform::TwitterX));
        assert_eq!(SocialPlatform::from_host("youtu.be"), Some(SocialPlatform::Youtube));
        assert_eq!(SocialPlatform::from_host("box.com"), None);
        assert_eq!(SocialPlatform::from_host("notfacebook.com"), None);
    }

    #[test]
    fn status_merge_prefers_extracted() {
        use ExtractionStatus::*;
        assert_eq!(Pending.merge(Failed("x".into())), Failed("x".into()));
        assert_eq!(Extracted.merge(Failed("x".into())), Extracted);
        assert_eq!(Failed("x".into()).merge(Extracted), Extracted);
        assert_eq!(Extracted.merge(Skipped(SkipReason::Duplicate)), Extracted);
        assert_eq!(Skipped(SkipReason::RateLimited).merge(Pending), Skipped(SkipReason::RateLimited));
    }

    #[test]
    fn merge_contacts_unions_and_keeps_identity() {
        let mut r = StoreRecord::pending(domain("a.com"), "https://a.com", 0);
        let mut first = ExtractedContacts::default();
        first.fields.emails.insert("hi@a.com".into());
        first.fields.social.insert(SocialPlatform::Instagram, "https://instagram.com/a".into());
        first.provenance.emails = Some(ChainStep::Markup);
        r.merge_contacts(first);

        let mut second = ExtractedContacts::default();
        second.fields.emails.insert("hi@a.com".into());
        second.fields.emails.insert("sales@a.com".into());
        second.fields.social.insert(SocialPlatform::Instagram, "https://instagram.com/other".into());
        second.provenance.emails = Some(ChainStep::FreeText);
        second.address = Some("1 Main St".into());
        r.merge_contacts(second);

        assert_eq!(r.url, "https://a.com");
        assert_eq!(r.ordinal, 0);
        assert_eq!(r.emails.len(), 2);
        assert_eq!(r.social[&SocialPlatform::Instagram], "https://instagram.com/a");
        assert_eq!(r.provenance.emails, Some(ChainStep::Markup));
        assert_eq!(r.address.as_deref(), Some("1 Main St"));
    }

    #[test]
    fn result_set_truncates_to_cap() {
        let records = (0..5)
            .map(|i| StoreRecord::pending(domain(&format!("s{i}.com")), format!("https://s{i}.com"), i))
            .collect();
        let set = ResultSet::new(records, 3, Completion::CapReached);
        assert_eq!(set.len(), 3);
        assert_eq!(set.status_counts().get("pending"), Some(&3));
    }
}
