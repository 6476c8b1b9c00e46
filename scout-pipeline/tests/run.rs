use scout_common::record::{Completion, ExtractionStatus, SkipReason};
use scout_common::{ExhaustionReason, ScoutError};
use scout_config::{RateConfig, ScoutConfig, SearchConfig};
use scout_drivers::scout_browser::scripted::{ScriptedSession, ScriptedStep};
use scout_pipeline::{Pipeline, candidate_source};
use scout_web::search::SearchDiscoverer;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

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

fn seeds(urls: &[&str]) -> Option<Vec<String>> {
    Some(urls.iter().map(|u| u.to_string()).collect())
}

#[tokio::test(start_paused = true)]
async fn duplicate_spellings_collapse_and_cap_holds() {
    let cfg = config(2);
    let session = ScriptedSession::new()
        .page("https://a.com", r#"<a href="mailto:jane@a.com">Mail</a>"#)
        .page("https://b.com", "<p>Handmade soap.</p>");
    let handle = session.handle();

    let source = candidate_source(&cfg, seeds(&["a.com", "A.COM/", "b.com"])).unwrap();
    let report = Pipeline::new(&cfg, session, source, CancellationToken::new())
        .unwrap()
        .run()
        .await
        .unwrap();

    let domains: Vec<_> = report.results.iter().map(|r| r.domain.to_string()).collect();
    assert_eq!(domains, vec!["a.com", "b.com"]);
    assert_eq!(report.results.completion(), &Completion::CapReached);
    assert_eq!(report.offers.duplicates, 1);

    let a = &report.results.records()[0];
    assert_eq!(a.status, ExtractionStatus::Extracted);
    assert_eq!(a.emails.iter().collect::<Vec<_>>(), vec!["jane@a.com"]);
    // No contacts is still a successful extraction.
    let b = &report.results.records()[1];
    assert_eq!(b.status, ExtractionStatus::Extracted);
    assert!(!b.has_contacts());

    assert!(handle.is_closed());
}

#[tokio::test(start_paused = true)]
async fn stops_visiting_once_the_cap_is_reached() {
    let cfg = config(3);
    let stores: Vec<String> = (0..10).map(|i| format!("https://store{i}.example")).collect();
    let mut session = ScriptedSession::new();
    for s in &stores {
        session = session.page(s.as_str(), "<p>shop</p>");
    }
    let handle = session.handle();

    let source = candidate_source(&cfg, Some(stores.clone())).unwrap();
    let report = Pipeline::new(&cfg, session, source, CancellationToken::new())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.results.len(), 3);
    assert_eq!(handle.navigations(), stores[..3].to_vec());
    assert_eq!(report.rate.attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn failures_are_recorded_and_the_run_continues() {
    let cfg = config(5);
    let session = ScriptedSession::new()
        .error("https://gone.example", "net::ERR_NAME_NOT_RESOLVED")
        .step("https://walled.example", ScriptedStep::Block(scout_common::BlockSignal::Captcha))
        .page("https://ok.example", r#"<a href="tel:+1 415 555 0172">Call</a>"#);

    let source = candidate_source(
        &cfg,
        seeds(&["gone.example", "walled.example", "not a url", "ok.example"]),
    )
    .unwrap();
    let report = Pipeline::new(&cfg, session, source, CancellationToken::new())
        .unwrap()
        .run()
        .await
        .unwrap();

    let statuses: Vec<_> = report.results.iter().map(|r| r.status.clone()).collect();
    assert!(matches!(statuses[0], ExtractionStatus::Failed(_)));
    assert_eq!(statuses[1], ExtractionStatus::Skipped(SkipReason::RateLimited));
    assert_eq!(statuses[2], ExtractionStatus::Extracted);
    assert_eq!(report.offers.invalid, 1);
    assert_eq!(
        report.discovery.map(|d| d.reason),
        Some(ExhaustionReason::SeedsConsumed)
    );
    assert_eq!(report.rate.targets_given_up, 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_visit_keeps_partial_results() {
    let cfg = config(5);
    let session = ScriptedSession::new()
        .page("https://a.com", "<p>first</p>")
        .step("https://slow.com", ScriptedStep::Hang)
        .page("https://c.com", "<p>never</p>");
    let handle = session.handle();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let source = candidate_source(&cfg, seeds(&["a.com", "slow.com", "c.com"])).unwrap();
    let report = Pipeline::new(&cfg, session, source, cancel)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.results.completion(), &Completion::Cancelled);
    let statuses: Vec<_> = report.results.iter().map(|r| r.status.clone()).collect();
    assert_eq!(
        statuses,
        vec![
            ExtractionStatus::Extracted,
            ExtractionStatus::Skipped(SkipReason::Cancelled)
        ]
    );
    assert!(!handle.navigations().contains(&"https://c.com".to_string()));
    assert!(handle.is_closed());
}

fn search_config(cap: usize) -> ScoutConfig {
    ScoutConfig {
        search: SearchConfig {
            country: Some("USA".into()),
            ..SearchConfig::default()
        },
        ..config(cap)
    }
}

#[tokio::test(start_paused = true)]
async fn search_results_feed_store_visits() {
    let cfg = search_config(5);
    let discoverer = SearchDiscoverer::new(&cfg.search, cfg.desired_candidates(), Duration::from_secs(30)).unwrap();
    let serp = discoverer.page_url(&discoverer.search_query(0));
    let session = ScriptedSession::new()
        .page(
            serp.as_str(),
            r#"<div id="search">
                <div class="g"><a href="https://maple-mugs.myshopify.com/pages/contact">Maple</a></div>
                <div class="g"><a href="https://maple-mugs.myshopify.com/">Maple again</a></div>
            </div>"#,
        )
        .page(
            "https://maple-mugs.myshopify.com/pages/contact",
            r#"<a href="mailto:hello@maplemugs.ca">Email</a><a href="https://instagram.com/maplemugs">IG</a>"#,
        );
    let handle = session.handle();

    let source = candidate_source(&cfg, None).unwrap();
    let report = Pipeline::new(&cfg, session, source, CancellationToken::new())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.results.len(), 1);
    let rec = &report.results.records()[0];
    assert_eq!(rec.domain.as_str(), "maple-mugs.myshopify.com");
    assert!(rec.emails.contains("hello@maplemugs.ca"));
    assert_eq!(rec.social.len(), 1);
    assert_eq!(
        report.discovery.map(|d| d.reason),
        Some(ExhaustionReason::NoNextPage)
    );
    assert_eq!(handle.navigations()[0], serp);
}

#[tokio::test(start_paused = true)]
async fn blocked_search_with_no_results_fails_the_run() {
    let cfg = search_config(5);
    let discoverer = SearchDiscoverer::new(&cfg.search, cfg.desired_candidates(), Duration::from_secs(30)).unwrap();
    let serp = discoverer.page_url(&discoverer.search_query(0));
    let session = ScriptedSession::new().page(
        serp.as_str(),
        "<html><body>Our systems have detected unusual traffic from your computer network.</body></html>",
    );
    let handle = session.handle();

    let source = candidate_source(&cfg, None).unwrap();
    let err = Pipeline::new(&cfg, session, source, CancellationToken::new())
        .unwrap()
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, ScoutError::DiscoveryFailed(ref m) if m.contains("unusual traffic")));
    assert!(handle.is_closed());
}

#[tokio::test(start_paused = true)]
async fn blocked_second_page_keeps_stores_already_found() {
    let cfg = search_config(5);
    let discoverer = SearchDiscoverer::new(&cfg.search, cfg.desired_candidates(), Duration::from_secs(30)).unwrap();
    let first = discoverer.page_url(&discoverer.search_query(0));
    let second = discoverer.page_url(&discoverer.search_query(cfg.search.page_size));
    let session = ScriptedSession::new()
        .page(
            first.as_str(),
            r#"<div id="search">
                <div class="g"><a href="https://maple-mugs.myshopify.com/pages/contact">Maple</a></div>
            </div>
            <a id="pnnext" href="/search?start=10">Next</a>"#,
        )
        .page(
            "https://maple-mugs.myshopify.com/pages/contact",
            r#"<a href="mailto:hello@maplemugs.ca">Email</a>"#,
        )
        .step(second.as_str(), ScriptedStep::Block(scout_common::BlockSignal::Captcha));
    let handle = session.handle();

    let source = candidate_source(&cfg, None).unwrap();
    let report = Pipeline::new(&cfg, session, source, CancellationToken::new())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.results.len(), 1);
    assert!(report.results.records()[0].emails.contains("hello@maplemugs.ca"));
    assert!(matches!(
        report.results.completion(),
        Completion::Exhausted(done) if matches!(done.reason, ExhaustionReason::RetriesExhausted(_))
    ));
    assert!(handle.navigations().contains(&second));
    assert!(handle.is_closed());
}
