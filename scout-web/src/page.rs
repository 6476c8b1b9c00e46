//! Typed queries over one parsed HTML document.
//!
//! [`ParsedPage`] owns a `scraper::Html`, which is not `Send`; build it,
//! query it and drop it without crossing an `.await`.
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::Value;
use url::Url;

/// Elements whose text never renders.
const INVISIBLE_TAGS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// A link: raw `href` plus its collapsed visible text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub href: String,
    pub text: String,
}

pub struct ParsedPage {
    document: Html,
    base: Option<Url>,
}

impl ParsedPage {
    /// Parse `html`; relative links resolve against `base_url` when it parses.
    pub fn parse(html: &str, base_url: &str) -> Self {
        Self {
            document: Html::parse_document(html),
            base: Url::parse(base_url).ok(),
        }
    }

    fn select(&self, css: &str) -> Vec<ElementRef<'_>> {
        match Selector::parse(css) {
            Ok(selector) => self.document.select(&selector).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Whether anything matches `css`.
    pub fn exists(&self, css: &str) -> bool {
        !self.select(css).is_empty()
    }

    /// Resolve `href` against the page URL.
    pub fn resolve(&self, href: &str) -> Option<Url> {
        let href = href.trim();
        match &self.base {
            Some(base) => base.join(href).ok(),
            None => Url::parse(href).ok(),
        }
    }

    pub fn title(&self) -> Option<String> {
        self.select("title")
            .first()
            .map(|t| collapse_whitespace(&t.text().collect::<String>()))
            .filter(|t| !t.is_empty())
    }

    /// Every `href` attribute of an anchor, in document order.
    pub fn hrefs(&self) -> Vec<String> {
        self.select("a[href]")
            .into_iter()
            .filter_map(|a| a.value().attr("href"))
            .map(|h| h.trim().to_string())
            .collect()
    }

    /// Targets of `scheme:` links (`mailto`, `tel`), scheme removed.
    pub fn hrefs_with_scheme(&self, scheme: &str) -> Vec<String> {
        let prefix = format!("{}:", scheme.to_ascii_lowercase());
        self.hrefs()
            .into_iter()
            .filter_map(|h| {
                let head = h.get(..prefix.len())?;
                head.eq_ignore_ascii_case(&prefix)
                    .then(|| h[prefix.len()..].to_string())
            })
            .collect()
    }

    pub fn links(&self) -> Vec<Link> {
        self.select("a[href]")
            .into_iter()
            .filter_map(|a| {
                let href = a.value().attr("href")?.trim().to_string();
                let text = collapse_whitespace(&a.text().collect::<String>());
                Some(Link { href, text })
            })
            .collect()
    }

    /// `href` of the first link inside each element matching `container_css`.
    pub fn first_href_per(&self, container_css: &str) -> Vec<String> {
        let Ok(anchor) = Selector::parse("a[href]") else {
            return Vec::new();
        };
        self.select(container_css)
            .into_iter()
            .filter_map(|c| c.select(&anchor).next())
            .filter_map(|a| a.value().attr("href"))
            .map(|h| h.trim().to_string())
            .collect()
    }

    /// Every `href` inside elements matching `container_css`.
    pub fn hrefs_within(&self, container_css: &str) -> Vec<String> {
        let Ok(anchor) = Selector::parse("a[href]") else {
            return Vec::new();
        };
        self.select(container_css)
            .into_iter()
            .flat_map(|c| c.select(&anchor).collect::<Vec<_>>())
            .filter_map(|a| a.value().attr("href"))
            .map(|h| h.trim().to_string())
            .collect()
    }

    /// `content` attributes of every `<meta>`.
    pub fn meta_contents(&self) -> Vec<String> {
        self.select("meta[content]")
            .into_iter()
            .filter_map(|m| m.value().attr("content"))
            .map(str::to_string)
            .collect()
    }

    /// Microdata values for `itemprop="<name>"`: `content`, then `href`, then
    /// the element text.
    pub fn itemprop_values(&self, name: &str) -> Vec<String> {
        self.select("[itemprop]")
            .into_iter()
            .filter(|el| {
                el.value()
                    .attr("itemprop")
                    .is_some_and(|p| p.split_whitespace().any(|p| p.eq_ignore_ascii_case(name)))
            })
            .map(itemprop_value)
            .filter(|v| !v.is_empty())
            .collect()
    }

    /// Parsed JSON-LD blocks; top-level arrays and `@graph` are flattened.
    pub fn json_ld_values(&self) -> Vec<Value> {
        let mut items = Vec::new();
        for script in self.select("script[type='application/ld+json']") {
            let text = script.text().collect::<String>();
            let Ok(value) = serde_json::from_str::<Value>(text.trim()) else {
                continue;
            };
            match value {
                Value::Array(arr) => items.extend(arr),
                Value::Object(mut obj) => match obj.remove("@graph") {
                    Some(Value::Array(graph)) => {
                        items.push(Value::Object(obj));
                        items.extend(graph);
                    }
                    Some(other) => {
                        obj.insert("@graph".into(), other);
                        items.push(Value::Object(obj));
                    }
                    None => items.push(Value::Object(obj)),
                },
                _ => {}
            }
        }
        items
    }

    /// Collapsed text of `tags` elements whose text matches `pattern`, at
    /// most `max_len` characters long (so whole-page wrappers are skipped).
    pub fn elements_with_text(&self, tags: &[&str], pattern: &Regex, max_len: usize) -> Vec<String> {
        self.select(&tags.join(", "))
            .into_iter()
            .map(|el| {
                let mut text = String::new();
                push_visible_text(el, &mut text);
                collapse_whitespace(&text)
            })
            .filter(|t| !t.is_empty() && t.chars().count() <= max_len && pattern.is_match(t))
            .collect()
    }

    /// schema.org `PostalAddress` items, each rendered as its parts joined
    /// with ", ". Microdata first, then JSON-LD.
    pub fn postal_address_blocks(&self) -> Vec<String> {
        let mut blocks: Vec<String> = self
            .select("[itemtype*='PostalAddress']")
            .into_iter()
            .filter_map(|item| {
                let prop = Selector::parse("[itemprop]").ok()?;
                let parts: Vec<String> = item
                    .select(&prop)
                    .map(itemprop_value)
                    .filter(|v| !v.is_empty())
                    .collect();
                (!parts.is_empty()).then(|| parts.join(", "))
            })
            .collect();

        let mut ld = Vec::new();
        for value in self.json_ld_values() {
            collect_json_ld_addresses(&value, &mut ld);
        }
        blocks.extend(ld);
        blocks
    }

    /// Rendered text of `tags` elements, document order, collapsed.
    pub fn texts_of(&self, tags: &[&str]) -> Vec<String> {
        self.select(&tags.join(", "))
            .into_iter()
            .map(|el| {
                let mut text = String::new();
                push_visible_text(el, &mut text);
                collapse_whitespace(&text)
            })
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Visible text of the whole document; script, style and similar
    /// elements are skipped.
    pub fn visible_text(&self) -> String {
        let mut out = String::new();
        push_visible_text(self.document.root_element(), &mut out);
        collapse_whitespace(&out)
    }
}

fn itemprop_value(el: ElementRef<'_>) -> String {
    let attrs = el.value();
    attrs
        .attr("content")
        .or_else(|| attrs.attr("href"))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| collapse_whitespace(&el.text().collect::<String>()))
}

fn push_visible_text(el: ElementRef<'_>, out: &mut String) {
    if INVISIBLE_TAGS.contains(&el.value().name()) {
        return;
    }
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    push_visible_text(child, out);
                }
            }
            _ => {}
        }
    }
}

fn collect_json_ld_addresses(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(obj) => {
            let is_postal = obj
                .get("@type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.eq_ignore_ascii_case("PostalAddress"));
            if is_postal {
                let parts: Vec<String> = [
                    "streetAddress",
                    "addressLocality",
                    "addressRegion",
                    "postalCode",
                    "addressCountry",
                ]
                .iter()
                .filter_map(|k| match obj.get(*k)? {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Object(country) => country
                        .get("name")
                        .and_then(Value::as_str)
                        .map(|s| s.trim().to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect();
                if !parts.is_empty() {
                    out.push(parts.join(", "));
                }
                return;
            }
            obj.values().for_each(|v| collect_json_ld_addresses(v, out));
        }
        Value::Array(arr) => arr.iter().for_each(|v| collect_json_ld_addresses(v, out)),
        _ => {}
    }
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORE: &str = r#"<!doctype html>
<html><head><title> Contact  us </title>
<meta name="description" content="Write to hello@mugs.test">
<script type="application/ld+json">
{"@context":"https://schema.org","@graph":[
  {"@type":"Organization","email":"ld@mugs.test","sameAs":["https://instagram.com/mugs"],
   "address":{"@type":"PostalAddress","streetAddress":"1 Clay Rd","addressLocality":"Leeds","postalCode":"LS1 1AA"}}
]}
</script>
<style>.x{color:red}</style></head>
<body>
<a href="/pages/contact">Get in touch</a>
<a href="MAILTO:Sales@Mugs.test?subject=hi">Mail</a>
<a href="tel:+44 113 496 0000">Call</a>
<span itemprop="telephone">0113 496 0001</span>
<script>var trap = "js@trap.test";</script>
<p>Visit our shop</p>
</body></html>"#;

    fn page() -> ParsedPage {
        ParsedPage::parse(STORE, "https://mugs.test/")
    }

    #[test]
    fn scheme_links_are_case_insensitive() {
        let p = page();
        assert_eq!(p.hrefs_with_scheme("mailto"), vec!["Sales@Mugs.test?subject=hi"]);
        assert_eq!(p.hrefs_with_scheme("tel"), vec!["+44 113 496 0000"]);
    }

    #[test]
    fn links_resolve_against_base() {
        let p = page();
        let contact = p.links().into_iter().find(|l| l.text == "Get in touch").unwrap();
        assert_eq!(
            p.resolve(&contact.href).unwrap().as_str(),
            "https://mugs.test/pages/contact"
        );
    }

    #[test]
    fn json_ld_graph_is_flattened() {
        let p = page();
        let values = p.json_ld_values();
        assert!(values.iter().any(|v| v["email"] == "ld@mugs.test"));
        assert_eq!(p.postal_address_blocks(), vec!["1 Clay Rd, Leeds, LS1 1AA"]);
    }

    #[test]
    fn visible_text_skips_scripts_and_styles() {
        let text = page().visible_text();
        assert!(text.contains("Visit our shop"));
        assert!(!text.contains("js@trap.test"));
        assert!(!text.contains("color:red"));
        assert!(!text.contains("Contact us"));
    }

    #[test]
    fn itemprop_and_meta_queries() {
        let p = page();
        assert_eq!(p.itemprop_values("telephone"), vec!["0113 496 0001"]);
        assert!(p.meta_contents().iter().any(|c| c.contains("hello@mugs.test")));
        assert_eq!(p.title().as_deref(), Some("Contact us"));
    }

    #[test]
    fn first_href_per_container() {
        let html = r#"<div id="search">
            <div class="g"><a href="https://a.myshopify.com/">A</a><a href="https://ignored.test">x</a></div>
            <div class="g"><a href="https://b.myshopify.com/pages/contact">B</a></div>
            <div class="g"><span>no link</span></div>
        </div>"#;
        let p = ParsedPage::parse(html, "https://www.google.com/search?q=x");
        assert_eq!(
            p.first_href_per("div.g"),
            vec!["https://a.myshopify.com/", "https://b.myshopify.com/pages/contact"]
        );
        assert_eq!(p.hrefs_within("#search").len(), 3);
        assert!(p.exists("#search"));
        assert!(!p.exists("#pnnext"));
    }

    #[test]
    fn elements_with_text_respects_length() {
        let html = "<div><p>Call us: 555-201-3344</p><p>Nothing here</p></div>";
        let p = ParsedPage::parse(html, "https://x.test");
        let re = Regex::new("(?i)call").unwrap();
        let hits = p.elements_with_text(&["p", "div"], &re, 300);
        assert_eq!(hits, vec!["Call us: 555-201-3344 Nothing here", "Call us: 555-201-3344"]);
        assert_eq!(p.elements_with_text(&["p", "div"], &re, 25), vec!["Call us: 555-201-3344"]);
    }
}
