//! Candidate discovery: paginated search-engine queries and static seeds.
use crate::page::ParsedPage;
use scout_common::domain::{CandidateUrl, parse_loose};
use scout_common::{DiscoveryExhausted, ExhaustionReason, ScoutError};
use scout_config::SearchConfig;
use scout_drivers::scout_browser::session::BrowserSession;
use scout_rate::RateController;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Containers of organic results; the first link inside each is the result.
const RESULT_CONTAINERS: &str = "div.g, div[data-hveid]";
/// Fallback when no container matched: every link in the results column.
const RESULT_FALLBACK: &str = "#search";
const NEXT_PAGE_SELECTORS: &[&str] = &["#pnnext", "a[aria-label*='Next']"];

/// One search request: the query text and the result offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub offset: u32,
}

/// Query text for a search configuration.
///
/// ```
/// use scout_config::SearchConfig;
/// use scout_web::search::build_query;
///
/// let cfg = SearchConfig { country: Some("USA".into()), ..SearchConfig::default() };
/// assert_eq!(build_query(&cfg), r#"site:myshopify.com "USA" intitle:"contact""#);
///
/// let raw = SearchConfig { query: Some("ceramics store".into()), ..cfg };
/// assert_eq!(build_query(&raw), "ceramics store");
/// ```
pub fn build_query(search: &SearchConfig) -> String {
    if let Some(raw) = search.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        return raw.to_string();
    }
    let mut parts = vec![format!("site:{}", search.platform.site.trim())];
    if let Some(country) = search.country.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        parts.push(format!("\"{country}\""));
    }
    if let Some(hint) = search.title_hint.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
        parts.push(format!("intitle:\"{hint}\""));
    }
    parts.join(" ")
}

/// Links kept from one result page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultPage {
    /// Candidate URLs, page order, deduplicated within the page.
    pub links: Vec<String>,
    pub has_next: bool,
}

/// Which result links count as candidates.
#[derive(Debug, Clone)]
pub struct ResultFilter {
    engine_host: Option<String>,
    excluded_hosts: Vec<String>,
    signatures: Vec<String>,
}

impl ResultFilter {
    pub fn new(search: &SearchConfig) -> Self {
        Self {
            engine_host: Url::parse(&search.engine_url)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_ascii_lowercase())),
            excluded_hosts: search
                .excluded_hosts
                .iter()
                .map(|h| h.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            signatures: search
                .platform
                .signatures
                .iter()
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Decode a result `href` and apply the host and signature filters.
    pub fn accept(&self, page: &ParsedPage, href: &str) -> Option<String> {
        let mut url = page.resolve(href)?;
        if url.path() == "/url" {
            let target = url
                .query_pairs()
                .find(|(k, _)| k == "q" || k == "url")
                .map(|(_, v)| v.into_owned())?;
            url = Url::parse(&target).ok()?;
        }
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = url.host_str()?.to_ascii_lowercase();
        if self.is_search_engine(&host) || self.is_excluded(&host) {
            return None;
        }
        let lower = url.as_str().to_ascii_lowercase();
        if !self.signatures.is_empty() && !self.signatures.iter().any(|s| lower.contains(s)) {
            return None;
        }
        Some(url.to_string())
    }

    fn is_search_engine(&self, host: &str) -> bool {
        let bare = host.trim_start_matches("www.");
        host.contains("google.")
            || self.engine_host.as_deref().is_some_and(|engine| bare == engine)
    }

    fn is_excluded(&self, host: &str) -> bool {
        self.excluded_hosts
            .iter()
            .any(|h| host == h || host.ends_with(&format!(".{h}")))
    }
}

/// Parse a search result page into candidate links and a next-page flag.
pub fn parse_result_page(html: &str, page_url: &str, filter: &ResultFilter) -> ResultPage {
    let page = ParsedPage::parse(html, page_url);

    let mut raw = page.first_href_per(RESULT_CONTAINERS);
    let mut links = accept_all(&page, &raw, filter);
    if links.is_empty() {
        raw = page.hrefs_within(RESULT_FALLBACK);
        links = accept_all(&page, &raw, filter);
    }

    let has_next = NEXT_PAGE_SELECTORS.iter().any(|s| page.exists(s))
        || page
            .links()
            .iter()
            .any(|l| l.text.eq_ignore_ascii_case("next") || l.text.eq_ignore_ascii_case("next >"));

    ResultPage { links, has_next }
}

fn accept_all(page: &ParsedPage, hrefs: &[String], filter: &ResultFilter) -> Vec<String> {
    let mut seen = HashSet::new();
    hrefs
        .iter()
        .filter_map(|h| filter.accept(page, h))
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

/// Output of one discovery step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryStep {
    /// More candidates (possibly none, when a page held only repeats).
    Candidates(Vec<CandidateUrl>),
    /// Nothing more will come.
    Exhausted(DiscoveryExhausted),
}

/// Lazy, page-by-page candidate sequence over a search engine.
#[derive(Debug)]
pub struct SearchDiscoverer {
    query: String,
    base: Url,
    query_param: String,
    offset_param: String,
    page_size: u32,
    max_pages: u32,
    desired: usize,
    page_timeout: Duration,
    filter: ResultFilter,
    next_offset: u32,
    pages_fetched: u32,
    yielded: usize,
    seen: HashSet<String>,
    pending: Option<ExhaustionReason>,
    finished: Option<DiscoveryExhausted>,
}

impl SearchDiscoverer {
    /// `desired` is the pre-dedup candidate budget.
    pub fn new(search: &SearchConfig, desired: usize, page_timeout: Duration) -> Result<Self, ScoutError> {
        let base = Url::parse(&search.engine_url)
            .map_err(|e| ScoutError::Config(format!("search.engine_url {:?}: {e}", search.engine_url)))?;
        Ok(Self {
            query: build_query(search),
            base,
            query_param: search.query_param.clone(),
            offset_param: search.offset_param.clone(),
            page_size: search.page_size.max(1),
            max_pages: search.max_pages,
            desired,
            page_timeout,
            filter: ResultFilter::new(search),
            next_offset: 0,
            pages_fetched: 0,
            yielded: 0,
            seen: HashSet::new(),
            pending: None,
            finished: None,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// The request for the page at `offset`.
    pub fn search_query(&self, offset: u32) -> SearchQuery {
        SearchQuery {
            text: self.query.clone(),
            offset,
        }
    }

    /// Result page URL for a request.
    ///
    /// ```
    /// use scout_config::SearchConfig;
    /// use scout_web::search::SearchDiscoverer;
    /// use std::time::Duration;
    ///
    /// let cfg = SearchConfig { country: Some("USA".into()), ..SearchConfig::default() };
    /// let d = SearchDiscoverer::new(&cfg, 20, Duration::from_secs(30)).unwrap();
    /// assert_eq!(
    ///     d.page_url(&d.search_query(10)),
    ///     "https://www.google.com/search?q=site%3Amyshopify.com+%22USA%22+intitle%3A%22contact%22&start=10"
    /// );
    /// ```
    pub fn page_url(&self, query: &SearchQuery) -> String {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair(&self.query_param, &query.text)
            .append_pair(&self.offset_param, &query.offset.to_string());
        url.to_string()
    }

    fn exhaust(&mut self, reason: ExhaustionReason) -> DiscoveryStep {
        let done = DiscoveryExhausted {
            reason,
            pages_fetched: self.pages_fetched,
            candidates_yielded: self.yielded,
        };
        info!(
            target: "scout.search",
            reason = ?done.reason,
            pages = done.pages_fetched,
            candidates = done.candidates_yielded,
            "search.exhausted"
        );
        self.finished = Some(done.clone());
        DiscoveryStep::Exhausted(done)
    }

    /// Fetch and parse the next result page.
    pub async fn next_batch<S>(&mut self, session: &mut S, rate: &mut RateController) -> DiscoveryStep
    where
        S: BrowserSession + ?Sized,
    {
        if let Some(done) = &self.finished {
            return DiscoveryStep::Exhausted(done.clone());
        }
        if self.yielded >= self.desired {
            return self.exhaust(ExhaustionReason::DesiredCountReached);
        }
        if let Some(reason) = self.pending.take() {
            return self.exhaust(reason);
        }
        if self.pages_fetched >= self.max_pages {
            return self.exhaust(ExhaustionReason::PageLimit);
        }

        let request = self.search_query(self.next_offset);
        let url = self.page_url(&request);
        let target = format!("search page {}", self.pages_fetched + 1);
        let rendered = match rate.navigate(session, &url, self.page_timeout, &target).await {
            Ok(page) => page,
            Err(err) => {
                warn!(target: "scout.search", offset = request.offset, error = %err, "search.page_failed");
                return self.exhaust(ExhaustionReason::RetriesExhausted(err.to_string()));
            }
        };
        self.pages_fetched += 1;
        self.next_offset += self.page_size;

        let parsed = parse_result_page(&rendered.html, &rendered.url, &self.filter);
        if parsed.links.is_empty() {
            return self.exhaust(ExhaustionReason::EmptyPage);
        }

        let budget = self.desired - self.yielded;
        let fresh: Vec<CandidateUrl> = parsed
            .links
            .into_iter()
            .filter(|u| self.seen.insert(u.clone()))
            .take(budget)
            .map(CandidateUrl::new)
            .collect();
        self.yielded += fresh.len();
        if !parsed.has_next {
            self.pending = Some(ExhaustionReason::NoNextPage);
        }
        info!(
            target: "scout.search",
            page = self.pages_fetched,
            offset = request.offset,
            new = fresh.len(),
            total = self.yielded,
            has_next = parsed.has_next,
            "search.page_parsed"
        );
        DiscoveryStep::Candidates(fresh)
    }
}

/// Static candidate list, consumed through the same pipeline as search
/// results.
#[derive(Debug, Clone, Default)]
pub struct SeedList {
    seeds: Vec<CandidateUrl>,
    handed_out: bool,
}

impl SeedList {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seeds: urls
                .into_iter()
                .map(Into::into)
                .map(|u: String| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .map(CandidateUrl::new)
                .collect(),
            handed_out: false,
        }
    }

    /// Read one URL per line; blank lines and `#` comments are skipped.
    pub fn parse_lines(text: &str) -> Vec<String> {
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect()
    }

    pub fn from_file(path: &Path) -> Result<Vec<String>, ScoutError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ScoutError::Startup(format!("cannot read URL file {}: {e}", path.display())))?;
        Ok(Self::parse_lines(&text))
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    pub fn next_batch(&mut self) -> DiscoveryStep {
        if self.handed_out {
            return DiscoveryStep::Exhausted(DiscoveryExhausted {
                reason: ExhaustionReason::SeedsConsumed,
                pages_fetched: 0,
                candidates_yielded: self.seeds.len(),
            });
        }
        self.handed_out = true;
        let valid = self
            .seeds
            .iter()
            .filter(|s| parse_loose(s.as_str()).is_some())
            .count();
        info!(target: "scout.search", seeds = self.seeds.len(), valid, "seeds.loaded");
        DiscoveryStep::Candidates(self.seeds.clone())
    }
}

/// Where candidates come from for a run.
#[derive(Debug)]
pub enum CandidateSource {
    Search(Box<SearchDiscoverer>),
    Seeds(SeedList),
}

impl CandidateSource {
    pub async fn next_batch<S>(&mut self, session: &mut S, rate: &mut RateController) -> DiscoveryStep
    where
        S: BrowserSession + ?Sized,
    {
        match self {
            CandidateSource::Search(discoverer) => discoverer.next_batch(session, rate).await,
            CandidateSource::Seeds(seeds) => seeds.next_batch(),
        }
    }

    /// Short label for logs and reports.
    pub fn describe(&self) -> String {
        match self {
            CandidateSource::Search(d) => format!("search: {}", d.query()),
            CandidateSource::Seeds(s) => format!("{} seed URLs", s.len()),
        }
    }
}
