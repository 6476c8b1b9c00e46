//! Store identity: raw candidate URLs and their normalized forms.
//!
//! Two normalizations live here:
//!
//! - [`NormalizedDomain`] is the dedup key: the lower-cased host with a
//!   leading `www.` removed (non-default ports are kept).
//! - [`canonical_url`] is the landing URL we actually visit: fragment and
//!   tracking parameters dropped, trailing slash removed.
//!
//! Both are idempotent, and both reject anything that does not look like a
//! public http(s) storefront.
use serde::{Deserialize, Serialize};
use std::fmt;
use url::{Host, Url};

/// Query parameters that identify a click or a search session, not a page.
const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "msclkid", "dclid", "yclid", "srsltid", "ref", "ref_src", "_pos", "_sid",
    "_ss", "_psq", "mc_cid", "mc_eid",
];

/// A raw URL as found in a search result or a seed list. Not validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateUrl(String);

impl CandidateUrl {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CandidateUrl {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Canonical store identity used as the dedup key.
///
/// ```
/// use scout_common::domain::NormalizedDomain;
///
/// let d = NormalizedDomain::parse("HTTPS://www.Store.example.com/pages/contact?utm_source=x").unwrap();
/// assert_eq!(d.as_str(), "store.example.com");
/// assert!(NormalizedDomain::parse("not a url").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedDomain(String);

impl NormalizedDomain {
    /// Normalize a raw URL (scheme optional). `None` when the input fails
    /// basic shape validation.
    pub fn parse(raw: &str) -> Option<Self> {
        let url = parse_loose(raw)?;
        Self::from_url(&url)
    }

    /// Normalize an already parsed URL.
    pub fn from_url(url: &Url) -> Option<Self> {
        let host = match url.host()? {
            Host::Domain(d) => d.trim_end_matches('.').to_ascii_lowercase(),
            Host::Ipv4(_) | Host::Ipv6(_) => return None,
        };
        let host = host.strip_prefix("www.").unwrap_or(&host);
        if !is_plausible_host(host) {
            return None;
        }
        Some(match url.port() {
            Some(port) => Self(format!("{host}:{port}")),
            None => Self(host.to_string()),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host part without any port suffix.
    pub fn host(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for NormalizedDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical landing URL for a candidate.
///
/// Lower-cases the host, drops the fragment and tracking parameters
/// (`utm_*`, `gclid`, `srsltid`, ...), and removes the trailing slash.
///
/// ```
/// use scout_common::domain::canonical_url;
///
/// let u = canonical_url("shop.example.com/pages/contact/?utm_medium=cpc&lang=en#top").unwrap();
/// assert_eq!(u, "https://shop.example.com/pages/contact?lang=en");
/// assert_eq!(canonical_url(&u).as_deref(), Some(u.as_str()));
/// ```
pub fn canonical_url(raw: &str) -> Option<String> {
    let mut url = parse_loose(raw)?;
    NormalizedDomain::from_url(&url)?;

    url.set_fragment(None);
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);

    let mut out = url.to_string();
    if url.query().is_none() {
        while out.ends_with('/') {
            out.pop();
        }
    }
    Some(out)
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Parse with an implied `https://` when the scheme is missing.
pub fn parse_loose(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.chars().any(char::is_whitespace) {
        return None;
    }
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else if let Some(rest) = raw.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!("https://{raw}")
    };
    let url = Url::parse(&with_scheme).ok()?;
    if !url.username().is_empty() || url.password().is_some() {
        return None;
    }
    match url.scheme() {
        "http" | "https" => Some(url),
        _ => None,
    }
}

fn is_plausible_host(host: &str) -> bool {
    let Some((_, tld)) = host.rsplit_once('.') else {
        return false;
    };
    tld.len() >= 2
        && !host.starts_with(|c| c == '.' || c == '-')
        && host
            .split('.')
            .all(|label| !label.is_empty() && !label.starts_with('-') && !label.ends_with('-'))
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}
