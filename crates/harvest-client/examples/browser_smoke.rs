/// Smoke-test for `BrowserFetcher` behind a `PageExtractor`.
///
/// Launches headless Chromium, renders <https://example.com> and extracts its
/// heading through a one-rule selector set.
///
/// Run with:
///   cargo run -p harvest-client --example browser_smoke --features browser
use harvest_client::{BrowserFetcher, ExtractionRules, FieldRule, PageExtractor, SelectorExtractor};
use harvest_core::traits::Extractor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let fetcher = BrowserFetcher::new().await?.wait_for("h1");
    let rules = ExtractionRules {
        fields: vec![FieldRule::new("title", "h1")],
        not_found_markers: vec!["Page not found".into()],
    };
    let extractor = PageExtractor::new(fetcher, SelectorExtractor::new(rules)?);

    let url = "https://example.com";
    let record = extractor.extract(url).await?;

    anyhow::ensure!(
        record.get("title") == Some("Example Domain"),
        "unexpected title: {:?}",
        record.get("title")
    );
    println!("OK, extracted {} fields from {url}", record.len());
    Ok(())
}
