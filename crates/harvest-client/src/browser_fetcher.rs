use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use harvest_core::error::AppError;
use harvest_core::traits::Fetcher;

/// Fetcher for JavaScript-rendered pages, driving headless Chromium over CDP.
///
/// One Chromium process is shared by all clones; each fetch opens a tab,
/// waits for `wait_for` to match, returns the rendered DOM and closes the tab.
///
/// ```rust,no_run
/// use harvest_client::BrowserFetcher;
/// use harvest_core::traits::Fetcher;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = BrowserFetcher::new().await?.wait_for("h1");
/// let html = fetcher.fetch("https://example.com").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BrowserFetcher {
    browser: Arc<Browser>,
    timeout: Duration,
    wait_for: String,
}

impl BrowserFetcher {
    /// Launch headless Chromium with a 30 s page timeout.
    pub async fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30)).await
    }

    pub async fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        if let Some(bin) = find_chrome_binary() {
            tracing::info!(path = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::Generic(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::Generic(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled for the connection to make progress.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser handler stopped");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            timeout,
            wait_for: "body".to_string(),
        })
    }

    /// CSS selector that must be present before the page counts as rendered.
    pub fn wait_for(mut self, selector: impl Into<String>) -> Self {
        self.wait_for = selector.into();
        self
    }
}

/// `CHROME_BIN` first, then well-known install locations. `None` lets
/// chromiumoxide do its own lookup.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        // the snap wrapper strips headless flags, use the real binary
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

impl Fetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let rendered = tokio::time::timeout(self.timeout, async {
            let page = self
                .browser
                .new_page(url)
                .await
                .map_err(|e| AppError::HttpError(format!("Failed to navigate to {url}: {e}")))?;

            let html = match page.find_element(self.wait_for.as_str()).await {
                Ok(_) => page.content().await.map_err(|e| {
                    AppError::HttpError(format!("Failed to read page content: {e}"))
                }),
                Err(e) => Err(AppError::ExtractionFailed(format!(
                    "'{}' never appeared: {e}",
                    self.wait_for
                ))),
            };

            let _ = page.close().await;
            html
        })
        .await;

        rendered.unwrap_or_else(|_| Err(AppError::Timeout(self.timeout.as_secs())))
    }
}
