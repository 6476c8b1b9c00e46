//! Layered contact extraction.
//!
//! Per field, the first chain step that yields anything wins:
//!
//! 1. structured markup on the storefront page (`mailto:`/`tel:` links,
//!    microdata, JSON-LD, meta tags, social profile links);
//! 2. structured markup on the contact page, when one was followed;
//! 3. regular expressions over visible text of both pages.
//!
//! Social links only come from markup: the storefront first, then the
//! contact page fills platforms still missing. Finding nothing is a valid
//! result, never an error.
use crate::page::{ParsedPage, collapse_whitespace};
use percent_encoding::percent_decode_str;
use regex::Regex;
use scout_common::domain::NormalizedDomain;
use scout_common::record::{
    ChainStep, ContactFields, ExtractedContacts, Provenance, SocialPlatform,
};
use scout_config::ExtractionConfig;
use serde_json::Value;
use std::collections::BTreeSet;
use url::Url;

const EMAIL_PATTERN: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b";
const PHONE_PATTERN: &str = concat!(
    r"(?:(?:\+?1\s*(?:[.-]\s*)?)?(?:\(?\s*(?:[2-9]1[02-9]|[2-9][02-8]1|[2-9][02-8][02-9])\s*\)?\s*(?:[.-]\s*)?)?",
    r"(?:[2-9]1[02-9]|[2-9][02-9]1|[2-9][02-9]{2})\s*(?:[.-]\s*)?[0-9]{4}(?:\s*(?:#|x\.?|ext\.?|extension)\s*\d+)?)",
    r"|(?:\+\d{1,3}[\s.-]?)?\(?\d{2,4}\)?[\s.-]?\d{2,4}[\s.-]?\d{2,4}[\s.-]?\d{0,4}",
);
const PHONE_HINT_PATTERN: &str = r"(?i)phone|call|contact|tel";
/// Below this many phones from hinted elements the whole text is scanned too.
const MIN_HINTED_PHONES: usize = 2;
const ADDRESS_KEYWORDS: &[&str] = &["address", "location", "visit us", "our office", "headquarters"];
const PLACEHOLDER_PHONES: &[&str] = &["1234567890", "0000000000"];
/// Paths of share buttons, which point at the platform rather than the store.
const SHARE_PATH_MARKERS: &[&str] = &["sharer", "/share", "intent/tweet", "/intent/", "shareArticle"];

/// Owned findings from one page, before the chain is resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageScan {
    /// Final URL the page was rendered at.
    pub url: String,
    /// Step 1: structured markup.
    pub structured: ContactFields,
    /// Step 3 candidates: emails and phones matched in visible text.
    pub free_text: ContactFields,
    /// Absolute URL of a linked contact page, if any.
    pub contact_page: Option<String>,
    pub address: Option<String>,
}

pub struct ContactExtractor {
    config: ExtractionConfig,
    email_re: Regex,
    phone_re: Regex,
    phone_hint_re: Regex,
}

impl ContactExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            config: config.clone(),
            email_re: Regex::new(EMAIL_PATTERN)?,
            phone_re: Regex::new(PHONE_PATTERN)?,
            phone_hint_re: Regex::new(PHONE_HINT_PATTERN)?,
        })
    }

    /// Scan one rendered page.
    pub fn scan(&self, html: &str, page_url: &str) -> PageScan {
        let page = ParsedPage::parse(html, page_url);
        PageScan {
            url: page_url.to_string(),
            structured: self.structured(&page),
            free_text: self.free_text(&page),
            contact_page: self.contact_page(&page, page_url),
            address: if self.config.extract_address {
                self.address(&page)
            } else {
                None
            },
        }
    }

    /// Whether the storefront scan warrants visiting its contact page: a
    /// contact link exists, differs from the page itself, and markup left
    /// emails or phones empty.
    pub fn needs_follow_up(&self, root: &PageScan) -> bool {
        self.config.follow_contact_page
            && (root.structured.emails.is_empty() || root.structured.phones.is_empty())
            && root
                .contact_page
                .as_deref()
                .is_some_and(|c| !same_page(c, &root.url))
    }

    /// Resolve the chain over the storefront scan and an optional contact
    /// page scan.
    pub fn assemble(&self, root: PageScan, contact: Option<PageScan>) -> ExtractedContacts {
        let mut provenance = Provenance::default();
        let mut fields = ContactFields::default();

        let contact_structured = contact.as_ref().map(|c| &c.structured);
        let mut free_emails = root.free_text.emails.clone();
        let mut free_phones = root.free_text.phones.clone();
        if let Some(c) = &contact {
            free_emails.extend(c.free_text.emails.iter().cloned());
            free_phones.extend(c.free_text.phones.iter().cloned());
        }

        (fields.emails, provenance.emails) = first_non_empty(
            &root.structured.emails,
            contact_structured.map(|c| &c.emails),
            free_emails,
        );
        (fields.phones, provenance.phones) = first_non_empty(
            &root.structured.phones,
            contact_structured.map(|c| &c.phones),
            free_phones,
        );

        fields.social = root.structured.social.clone();
        let mut address = root.address;
        if let Some(c) = contact {
            for (platform, link) in c.structured.social {
                fields.social.entry(platform).or_insert(link);
            }
            if address.is_none() {
                address = c.address;
            }
        }

        ExtractedContacts {
            fields,
            address,
            contact_page: root.contact_page,
            provenance,
        }
    }

    /// Single-page extraction: scan and resolve without a follow-up.
    ///
    /// ```
    /// use scout_config::ExtractionConfig;
    /// use scout_web::extract::ContactExtractor;
    ///
    /// let extractor = ContactExtractor::new(&ExtractionConfig::default()).unwrap();
    /// let found = extractor.extract(r#"<a href="mailto:jane@store.com">Mail</a>"#, "https://store.com");
    /// assert_eq!(found.fields.emails.iter().collect::<Vec<_>>(), ["jane@store.com"]);
    /// ```
    pub fn extract(&self, html: &str, page_url: &str) -> ExtractedContacts {
        self.assemble(self.scan(html, page_url), None)
    }

    fn structured(&self, page: &ParsedPage) -> ContactFields {
        let mut fields = ContactFields::default();

        let mut raw_emails: Vec<String> = page
            .hrefs_with_scheme("mailto")
            .iter()
            .flat_map(|target| {
                let addresses = target.split('?').next().unwrap_or_default();
                addresses.split([',', ';']).map(str::to_string).collect::<Vec<_>>()
            })
            .collect();
        raw_emails.extend(page.itemprop_values("email"));

        let mut raw_phones = page.hrefs_with_scheme("tel");
        raw_phones.extend(page.itemprop_values("telephone"));

        let mut same_as = Vec::new();
        for value in page.json_ld_values() {
            collect_json_ld_strings(&value, "email", &mut raw_emails);
            collect_json_ld_strings(&value, "telephone", &mut raw_phones);
            collect_json_ld_strings(&value, "sameAs", &mut same_as);
        }

        for content in page.meta_contents() {
            if content.contains('@') {
                raw_emails.extend(self.email_re.find_iter(&content).map(|m| m.as_str().to_string()));
            }
        }

        fields.emails = raw_emails.iter().filter_map(|e| normalize_email(e)).collect();
        fields.phones = raw_phones
            .iter()
            .filter_map(|p| self.normalize_phone(p))
            .collect();

        let profile_links = page
            .hrefs()
            .into_iter()
            .chain(same_as)
            .filter_map(|href| page.resolve(&href));
        for url in profile_links {
            if let Some(platform) = social_platform(&url) {
                fields.social.entry(platform).or_insert_with(|| url.to_string());
            }
        }
        fields
    }

    fn free_text(&self, page: &ParsedPage) -> ContactFields {
        let text = page.visible_text();
        let mut fields = ContactFields::default();

        fields.emails = self
            .email_re
            .find_iter(&text)
            .filter_map(|m| normalize_email(m.as_str()))
            .filter(|e| !self.denied(e))
            .collect();

        fields.phones = page
            .elements_with_text(&["p", "div", "span", "li", "td", "address"], &self.phone_hint_re, 300)
            .iter()
            .flat_map(|t| self.phones_in(t))
            .collect();
        if fields.phones.len() < MIN_HINTED_PHONES {
            fields.phones.extend(self.phones_in(&text));
        }
        fields
    }

    fn phones_in(&self, text: &str) -> BTreeSet<String> {
        self.phone_re
            .find_iter(text)
            .filter_map(|m| self.normalize_phone(m.as_str()))
            .collect()
    }

    fn denied(&self, email: &str) -> bool {
        self.config
            .email_denylist
            .iter()
            .any(|d| email.contains(&d.to_ascii_lowercase()))
    }

    /// Optional leading `+` followed by digits, digit count within bounds,
    /// placeholders rejected.
    fn normalize_phone(&self, raw: &str) -> Option<String> {
        let raw = percent_decode_str(raw.trim()).decode_utf8_lossy();
        let raw = raw.trim();
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.len() < self.config.min_phone_digits || digits.len() > self.config.max_phone_digits {
            return None;
        }
        if PLACEHOLDER_PHONES.iter().any(|p| digits.contains(p)) {
            return None;
        }
        Some(if raw.starts_with('+') {
            format!("+{digits}")
        } else {
            digits
        })
    }

    fn contact_page(&self, page: &ParsedPage, page_url: &str) -> Option<String> {
        let keywords: Vec<String> = self
            .config
            .contact_keywords
            .iter()
            .map(|k| k.to_ascii_lowercase())
            .collect();
        // Apex and www. spellings of the store are the same site.
        let home = Url::parse(page_url).ok().and_then(|u| NormalizedDomain::from_url(&u));
        page.links().into_iter().find_map(|link| {
            let href = link.href.to_ascii_lowercase();
            if href.starts_with("mailto:") || href.starts_with("tel:") || href.starts_with("javascript:") {
                return None;
            }
            let text = link.text.to_ascii_lowercase();
            if !keywords.iter().any(|k| href.contains(k) || text.contains(k)) {
                return None;
            }
            let resolved = page.resolve(&link.href)?;
            let same_site = home
                .as_ref()
                .is_none_or(|home| NormalizedDomain::from_url(&resolved).as_ref() == Some(home));
            (matches!(resolved.scheme(), "http" | "https") && same_site).then(|| resolved.to_string())
        })
    }

    fn address(&self, page: &ParsedPage) -> Option<String> {
        if let Some(block) = page.postal_address_blocks().into_iter().next() {
            return Some(block);
        }
        page.texts_of(&["address", "div", "p"])
            .into_iter()
            .find(|text| {
                let lower = text.to_lowercase();
                let len = text.chars().count();
                ADDRESS_KEYWORDS.iter().any(|k| lower.contains(k)) && len > 20 && len < 500
            })
            .map(|text| text.chars().take(200).collect::<String>().trim().to_string())
    }
}

fn first_non_empty(
    markup: &BTreeSet<String>,
    contact_page: Option<&BTreeSet<String>>,
    free_text: BTreeSet<String>,
) -> (BTreeSet<String>, Option<ChainStep>) {
    if !markup.is_empty() {
        return (markup.clone(), Some(ChainStep::Markup));
    }
    if let Some(found) = contact_page.filter(|c| !c.is_empty()) {
        return (found.clone(), Some(ChainStep::ContactPage));
    }
    if !free_text.is_empty() {
        return (free_text, Some(ChainStep::FreeText));
    }
    (BTreeSet::new(), None)
}

/// Trimmed, lower-cased, `mailto:` and query removed, percent-decoded.
/// `None` unless the result looks like `local@domain.tld`.
///
/// ```
/// use scout_web::extract::normalize_email;
///
/// assert_eq!(normalize_email(" MAILTO:Jane%40Store.com?subject=Hi ").as_deref(), Some("jane@store.com"));
/// assert_eq!(normalize_email("not-an-email"), None);
/// ```
pub fn normalize_email(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    if s.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("mailto:")) {
        s = &s[7..];
    }
    let s = s.split('?').next().unwrap_or_default();
    let decoded = percent_decode_str(s).decode_utf8_lossy();
    let email = collapse_whitespace(&decoded).to_lowercase();
    let (local, domain) = email.split_once('@')?;
    let valid = !local.is_empty()
        && !domain.contains('@')
        && !email.contains(' ')
        && domain
            .rsplit_once('.')
            .is_some_and(|(name, tld)| !name.is_empty() && tld.len() >= 2);
    valid.then_some(email)
}

fn social_platform(url: &Url) -> Option<SocialPlatform> {
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    let platform = SocialPlatform::from_host(&host)?;
    let path = url.path();
    if path.trim_matches('/').is_empty() || SHARE_PATH_MARKERS.iter().any(|m| path.contains(m)) {
        return None;
    }
    Some(platform)
}

fn collect_json_ld_strings(value: &Value, key: &str, out: &mut Vec<String>) {
    match value {
        Value::Object(obj) => {
            for (k, v) in obj {
                if k == key {
                    match v {
                        Value::String(s) => out.push(s.clone()),
                        Value::Array(items) => out.extend(
                            items.iter().filter_map(Value::as_str).map(str::to_string),
                        ),
                        _ => {}
                    }
                } else {
                    collect_json_ld_strings(v, key, out);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_json_ld_strings(v, key, out)),
        _ => {}
    }
}

/// Same document, ignoring fragment and trailing slash.
fn same_page(a: &str, b: &str) -> bool {
    let strip = |s: &str| {
        let s = s.split('#').next().unwrap_or_default();
        s.trim_end_matches('/').to_ascii_lowercase()
    };
    strip(a) == strip(b)
}
