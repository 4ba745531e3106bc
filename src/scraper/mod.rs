pub mod extract;
pub mod http_client;
pub mod normalize;

use crate::config::ScraperConfig;
use crate::error::FetchError;
use crate::models::{OfferRecord, OfferSummary};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

use self::http_client::HttpClient;

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable listing-site abstraction. The reconciler only ever talks to the
/// site through this seam.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// All offer summaries for the configured city, across every search page.
    /// An unfetchable first page is an error; later pages degrade per page.
    async fn fetch_summaries(&self) -> Result<Vec<OfferSummary>>;

    /// Full detail record from an offer's canonical link.
    async fn fetch_detail(&self, link: &str) -> Result<OfferRecord>;

    /// The status a detail page reports for itself. `Err` means the page is
    /// unreachable; `Ok(None)` means it loaded but carries no readable status.
    async fn fetch_status(&self, link: &str) -> Result<Option<String>, FetchError>;

    /// One photo as raw bytes.
    async fn fetch_photo(&self, url: &str) -> Result<Vec<u8>>;
}

// ── Otodom scraper ────────────────────────────────────────────────────────────

pub struct OtodomScraper {
    client: HttpClient,
    search_url: String,
    offer_base: Url,
    max_pages: u32,
}

impl OtodomScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let offer_base = Url::parse(&config.offer_base_url)
            .with_context(|| format!("Bad offer base URL {:?}", config.offer_base_url))?;
        Ok(Self {
            client: HttpClient::new(config)?,
            search_url: config.search_url.clone(),
            offer_base,
            max_pages: config.max_pages,
        })
    }

    /// URL for one search-results page. Page 1 is the bare search URL.
    fn search_page_url(&self, page: u32) -> String {
        if page <= 1 {
            self.search_url.clone()
        } else {
            format!("{}&page={}", self.search_url, page)
        }
    }
}

#[async_trait]
impl ListingSource for OtodomScraper {
    async fn fetch_summaries(&self) -> Result<Vec<OfferSummary>> {
        // First page is a whole-run precondition: it carries the page count.
        let url = self.search_page_url(1);
        info!("Fetching search page 1 ({})", url);
        let html = self
            .client
            .get_text(&url)
            .await
            .context("Failed to fetch first search page")?;
        let doc = extract::next_data(&html).context("First search page unparseable")?;

        let mut pages = extract::page_count(&doc).unwrap_or(1);
        if pages > self.max_pages {
            warn!("Search reports {} pages, capping at {}", pages, self.max_pages);
            pages = self.max_pages;
        }
        debug!("Search reports {} result pages", pages);

        let mut all = extract::summaries(&doc, &self.offer_base)
            .context("First search page has no offer items")?;

        for page in 2..=pages {
            let url = self.search_page_url(page);
            info!("Fetching search page {} of {} ({})", page, pages, url);

            let html = match self.client.get_text(&url).await {
                Ok(html) => html,
                Err(e) => {
                    warn!("Search page {} skipped: {}", page, e);
                    continue;
                }
            };

            match extract::next_data(&html)
                .and_then(|doc| extract::summaries(&doc, &self.offer_base))
            {
                Ok(items) => {
                    debug!("  Page {}: {} offers", page, items.len());
                    all.extend(items);
                }
                Err(e) => warn!("Search page {} unparseable: {}", page, e),
            }
        }

        info!("Total offers observed: {}", all.len());
        Ok(all)
    }

    async fn fetch_detail(&self, link: &str) -> Result<OfferRecord> {
        debug!("Fetching detail page: {}", link);
        let html = self
            .client
            .get_text(link)
            .await
            .with_context(|| format!("Failed to fetch detail page {}", link))?;
        let doc = extract::next_data(&html)
            .with_context(|| format!("Detail page {} unparseable", link))?;
        let record = extract::detail(&doc, &self.offer_base)
            .with_context(|| format!("Detail page {} has no offer data", link))?;
        Ok(record)
    }

    async fn fetch_status(&self, link: &str) -> Result<Option<String>, FetchError> {
        let html = self.client.get_text(link).await?;
        match extract::next_data(&html) {
            Ok(doc) => Ok(extract::status(&doc)),
            Err(e) => {
                // Page loaded but the data blob is gone or broken; that is a
                // parse signal, not removal evidence.
                warn!("Status unreadable on {}: {}", link, e);
                Ok(None)
            }
        }
    }

    async fn fetch_photo(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .client
            .get_bytes(url)
            .await
            .with_context(|| format!("Failed to fetch photo {}", url))?;
        Ok(bytes)
    }
}
