//! Signatures of pages that mean "you are being blocked", not content.
use scout_common::BlockSignal;

const UNUSUAL_TRAFFIC: &[&str] = &[
    "our systems have detected unusual traffic",
    "unusual traffic from your computer network",
];

const CAPTCHA: &[&str] = &[
    "id=\"captcha-form\"",
    "id='captcha-form'",
    "www.google.com/sorry/",
    "/sorry/index?continue=",
    "please verify you are a human",
];

const CAPTCHA_TITLES: &[&str] = &["just a moment...", "attention required! | cloudflare"];
const TOO_MANY_TITLES: &[&str] = &["429 too many requests", "too many requests"];
const DENIED_TITLES: &[&str] = &["access denied", "403 forbidden"];

/// Classify `html` as a block page, if it is one.
///
/// Body signatures are matched anywhere; status-like signals only in the
/// `<title>`, since storefront copy can mention them legitimately.
///
/// ```
/// use scout_drivers::scout_browser::block::detect_block;
/// use scout_common::BlockSignal;
///
/// let page = "<html><body>Our systems have detected unusual traffic from your computer network.</body></html>";
/// assert_eq!(detect_block(page), Some(BlockSignal::UnusualTraffic));
/// assert_eq!(detect_block("<html><title>Mugs</title></html>"), None);
/// ```
pub fn detect_block(html: &str) -> Option<BlockSignal> {
    let lower = html.to_ascii_lowercase();
    if UNUSUAL_TRAFFIC.iter().any(|s| lower.contains(s)) {
        return Some(BlockSignal::UnusualTraffic);
    }
    if CAPTCHA.iter().any(|s| lower.contains(s)) {
        return Some(BlockSignal::Captcha);
    }
    let title = title_of(&lower)?;
    if CAPTCHA_TITLES.iter().any(|t| title == *t) {
        Some(BlockSignal::Captcha)
    } else if TOO_MANY_TITLES.iter().any(|t| title.starts_with(t)) {
        Some(BlockSignal::TooManyRequests)
    } else if DENIED_TITLES.iter().any(|t| title.starts_with(t)) {
        Some(BlockSignal::AccessDenied)
    } else {
        None
    }
}

fn title_of(lower: &str) -> Option<&str> {
    let open = lower.find("<title")?;
    let after_tag = open + lower[open..].find('>')? + 1;
    let close = after_tag + lower[after_tag..].find("</title>")?;
    Some(lower[after_tag..close].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn google_sorry_page_is_captcha() {
        let html = r#"<html><body><form id="captcha-form" action="index"></form></body></html>"#;
        assert_eq!(detect_block(html), Some(BlockSignal::Captcha));
    }

    #[test]
    fn status_titles_are_classified() {
        assert_eq!(
            detect_block("<html><head><title>429 Too Many Requests</title></head></html>"),
            Some(BlockSignal::TooManyRequests)
        );
        assert_eq!(
            detect_block("<html><head><title lang=\"en\">Access Denied</title></head></html>"),
            Some(BlockSignal::AccessDenied)
        );
        assert_eq!(
            detect_block("<title>Just a moment...</title>"),
            Some(BlockSignal::Captcha)
        );
    }

    #[test]
    fn storefront_mentions_do_not_trigger() {
        let html = r#"<html><head><title>Contact us | Too Many Mugs</title></head>
            <body><p>Access denied to the staff room, sorry!</p>
            <div class="g-recaptcha" data-sitekey="x"></div></body></html>"#;
        assert_eq!(detect_block(html), None);
    }
}
