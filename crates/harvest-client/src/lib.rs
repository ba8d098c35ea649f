#[cfg(feature = "browser")]
pub mod browser_fetcher;
pub mod fetcher;
pub mod selector;

#[cfg(feature = "browser")]
pub use browser_fetcher::BrowserFetcher;
pub use fetcher::ReqwestFetcher;
pub use selector::{ExtractionRules, FieldNotFound, FieldRule, PageExtractor, SelectorExtractor};
