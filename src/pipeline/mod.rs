//! Reconciliation driver: one full run, end to end.
//!
//! Flow: search summaries → per-item classification → {insert | price
//! update | no-op} → closure scan over the whole city batch. Items fail
//! individually; the batch keeps going and the next scheduled run re-polls
//! whatever was skipped. Only whole-run preconditions (store unopenable,
//! first search page unfetchable) abort.

use crate::config::AppConfig;
use crate::models::Classification;
use crate::models::OfferSummary;
use crate::reconcile::closure::{confirm, find_candidates, ClosureVerdict};
use crate::reconcile::classify;
use crate::scraper::normalize::normalize;
use crate::scraper::{ListingSource, OtodomScraper};
use crate::storage::Repository;
use anyhow::{Context, Result};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Outcome of one reconciliation run, returned to the caller — there is no
/// process-global accumulation anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub summaries_seen: usize,
    pub new_listings: usize,
    pub price_changes: usize,
    pub unchanged: usize,
    pub closures: usize,
    pub errors: usize,
}

pub struct Reconciler {
    config: AppConfig,
}

impl Reconciler {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Open the store, build the live scraper, run once.
    pub async fn run(&self) -> Result<RunStats> {
        let repo = Repository::open(&self.config.storage.db_path)
            .context("Failed to open store")?;
        if self.config.storage.run_migrations {
            repo.run_migrations()?;
        }

        let source = OtodomScraper::new(&self.config.scraper)
            .context("Failed to build scraper")?;

        self.reconcile(&repo, &source).await
    }

    /// One run against an already-open store and an arbitrary source.
    pub async fn reconcile(
        &self,
        repo: &Repository,
        source: &dyn ListingSource,
    ) -> Result<RunStats> {
        let run_id = repo.begin_run().unwrap_or(0);
        let mut stats = RunStats::default();

        // ── 1. Observe ────────────────────────────────────────────────────────
        let summaries = match source.fetch_summaries().await {
            Ok(s) => s,
            Err(e) => {
                let msg = format!("{:#}", e);
                repo.finish_run(run_id, 0, 0, 0, 0, 1, Some(&msg)).ok();
                return Err(e.context("Search-results fetch failed"));
            }
        };
        stats.summaries_seen = summaries.len();
        info!("=== Step 1: {} offers observed ===", summaries.len());

        // ── 2. Classify and resolve, item by item ─────────────────────────────
        let mut observed = HashSet::with_capacity(summaries.len());
        for summary in &summaries {
            observed.insert(summary.identity());

            match classify(repo, summary) {
                Ok(Classification::New) => match self.ingest(repo, source, summary).await {
                    Ok(id) => {
                        stats.new_listings += 1;
                        info!(
                            "New listing {} (site {} / {} m²) at {}",
                            id, summary.site_id, summary.area, summary.price
                        );
                    }
                    Err(e) => {
                        warn!(
                            "Insert failed for site {} / {} m² ({}): {:#}",
                            summary.site_id, summary.area, summary.link, e
                        );
                        stats.errors += 1;
                    }
                },
                Ok(Classification::PriceChanged {
                    id,
                    new_price,
                    new_price_per_m,
                }) => match repo.apply_price_change(id, new_price, new_price_per_m) {
                    Ok(()) => {
                        stats.price_changes += 1;
                        info!("Listing {} price changed to {}", id, new_price);
                    }
                    Err(e) => {
                        warn!(
                            "Price update failed for listing {} (site {} / {} m²): {:#}",
                            id, summary.site_id, summary.area, e
                        );
                        stats.errors += 1;
                    }
                },
                Ok(Classification::Unchanged { id }) => {
                    debug!("Listing {} unchanged", id);
                    stats.unchanged += 1;
                }
                Err(e) => {
                    // Includes ambiguous existence checks: never coerced to
                    // New, since that risks duplicate insertion.
                    warn!(
                        "Classification failed for site {} / {} m² ({}): {:#}",
                        summary.site_id, summary.area, summary.link, e
                    );
                    stats.errors += 1;
                }
            }
        }

        // ── 3. Closure scan over the full city batch ──────────────────────────
        let active = repo
            .list_active_by_city(&self.config.reconciler.city)
            .context("Active-listing scan failed")?;
        let candidates = find_candidates(&active, &observed);
        info!(
            "=== Step 2: closure scan — {} active, {} candidates ===",
            active.len(),
            candidates.len()
        );

        for candidate in candidates {
            let link = match repo.link_by_id(candidate.id) {
                Ok(link) => link,
                Err(e) => {
                    warn!("No link for candidate {}: {:#}", candidate.id, e);
                    stats.errors += 1;
                    continue;
                }
            };

            match confirm(source.fetch_status(&link).await) {
                ClosureVerdict::Closed(status) => match repo.set_closed(candidate.id) {
                    Ok(()) => {
                        stats.closures += 1;
                        info!(
                            "Listing {} (site {} / {} m²) closed: {}",
                            candidate.id, candidate.site_id, candidate.area, status
                        );
                    }
                    Err(e) => {
                        warn!("Closure apply failed for {}: {:#}", candidate.id, e);
                        stats.errors += 1;
                    }
                },
                ClosureVerdict::StillActive => {
                    debug!(
                        "Candidate {} still active on its page — pagination miss",
                        candidate.id
                    );
                }
                ClosureVerdict::Unconfirmed => {
                    warn!(
                        "Candidate {} page gave no status; leaving untouched",
                        candidate.id
                    );
                }
            }
        }

        let error_note = (stats.errors > 0).then(|| format!("{} item errors", stats.errors));
        repo.finish_run(
            run_id,
            stats.summaries_seen,
            stats.new_listings,
            stats.price_changes,
            stats.closures,
            stats.errors,
            error_note.as_deref(),
        )
        .ok();

        info!(
            "=== Done: {} seen | {} new | {} price changes | {} unchanged | {} closed | {} errors ===",
            stats.summaries_seen,
            stats.new_listings,
            stats.price_changes,
            stats.unchanged,
            stats.closures,
            stats.errors
        );
        Ok(stats)
    }

    /// New listing: detail fetch → normalize → photo fetches → one insert
    /// transaction.
    async fn ingest(
        &self,
        repo: &Repository,
        source: &dyn ListingSource,
        summary: &OfferSummary,
    ) -> Result<i64> {
        let record = source.fetch_detail(&summary.link).await?;
        let offer = normalize(&record)?;

        let mut photos = Vec::new();
        if self.config.reconciler.fetch_photos {
            for url in &record.image_urls {
                match source.fetch_photo(url).await {
                    Ok(bytes) => photos.push(bytes),
                    Err(e) => warn!("Photo skipped for site {}: {:#}", offer.site_id, e),
                }
            }
        }

        repo.insert_listing_bundle(&offer, &photos)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::models::OfferRecord;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn link(site_id: i64, area: f64) -> String {
        format!("https://www.otodom.pl/pl/oferta/ID{}-{}", site_id, area)
    }

    fn summary(site_id: i64, area: f64, price: i64) -> OfferSummary {
        OfferSummary {
            site_id,
            area,
            price,
            price_per_m: Some((price as f64 / area).round() as i64),
            link: link(site_id, area),
        }
    }

    fn record(site_id: i64, area: f64, price: i64) -> OfferRecord {
        OfferRecord {
            site_id: Some(site_id),
            title: Some(format!("Mieszkanie {} m²", area)),
            area: Some(area),
            price: Some(price),
            link: Some(link(site_id, area)),
            voivodeship: Some("slaskie".into()),
            city: Some("katowice".into()),
            extras_types: Some("balcony lift".into()),
            image_urls: vec![format!("https://img.example/{}.jpg", site_id)],
            status: Some("active".into()),
            ..Default::default()
        }
    }

    /// What a stub detail page answers to a status probe.
    enum StubStatus {
        Reports(&'static str),
        NoStatus,
        Unreachable,
    }

    struct StubSource {
        summaries: Vec<OfferSummary>,
        details: HashMap<String, OfferRecord>,
        statuses: HashMap<String, StubStatus>,
    }

    impl StubSource {
        fn new(summaries: Vec<OfferSummary>) -> Self {
            let details = summaries
                .iter()
                .map(|s| (s.link.clone(), record(s.site_id, s.area, s.price)))
                .collect();
            Self {
                summaries,
                details,
                statuses: HashMap::new(),
            }
        }

        fn with_status(mut self, link: String, status: StubStatus) -> Self {
            self.statuses.insert(link, status);
            self
        }

        fn without_detail(mut self, link: &str) -> Self {
            self.details.remove(link);
            self
        }
    }

    #[async_trait]
    impl ListingSource for StubSource {
        async fn fetch_summaries(&self) -> Result<Vec<OfferSummary>> {
            Ok(self.summaries.clone())
        }

        async fn fetch_detail(&self, link: &str) -> Result<OfferRecord> {
            self.details
                .get(link)
                .cloned()
                .with_context(|| format!("no detail page at {}", link))
        }

        async fn fetch_status(&self, link: &str) -> Result<Option<String>, FetchError> {
            match self.statuses.get(link) {
                Some(StubStatus::Reports(s)) => Ok(Some(s.to_string())),
                Some(StubStatus::NoStatus) => Ok(None),
                Some(StubStatus::Unreachable) | None => Err(FetchError::Status {
                    status: 404,
                    url: link.to_string(),
                }),
            }
        }

        async fn fetch_photo(&self, _url: &str) -> Result<Vec<u8>> {
            Ok(vec![0xff, 0xd8, 0xff])
        }
    }

    fn setup() -> (Reconciler, Repository) {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        (Reconciler::new(AppConfig::default()), repo)
    }

    #[tokio::test]
    async fn first_run_inserts_everything() {
        let (driver, repo) = setup();
        let source = StubSource::new(vec![summary(100, 48.0, 450_000), summary(200, 52.5, 520_000)]);

        let stats = driver.reconcile(&repo, &source).await.unwrap();
        assert_eq!(stats.summaries_seen, 2);
        assert_eq!(stats.new_listings, 2);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.closures, 0);

        let store = repo.stats().unwrap();
        assert_eq!(store.listings, 2);
        assert_eq!(store.active, 2);
        // One stub photo per inserted listing.
        assert_eq!(store.photos, 2);
    }

    #[tokio::test]
    async fn repeat_run_is_all_unchanged() {
        let (driver, repo) = setup();
        let source = StubSource::new(vec![summary(100, 48.0, 450_000)]);

        driver.reconcile(&repo, &source).await.unwrap();
        let stats = driver.reconcile(&repo, &source).await.unwrap();

        assert_eq!(stats.new_listings, 0);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.price_changes, 0);

        let id = repo
            .find_listing_by_identity(&summary(100, 48.0, 450_000).identity())
            .unwrap()
            .unwrap();
        assert!(repo.price_history(id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn price_drop_updates_and_appends_history() {
        let (driver, repo) = setup();
        driver
            .reconcile(&repo, &StubSource::new(vec![summary(100, 48.0, 450_000)]))
            .await
            .unwrap();

        let stats = driver
            .reconcile(&repo, &StubSource::new(vec![summary(100, 48.0, 460_000)]))
            .await
            .unwrap();
        assert_eq!(stats.price_changes, 1);
        assert_eq!(stats.new_listings, 0);

        let id = repo
            .find_listing_by_identity(&summary(100, 48.0, 0).identity())
            .unwrap()
            .unwrap();
        assert_eq!(repo.updated_price(id).unwrap(), 460_000);
        let history = repo.price_history(id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_price, 450_000);
        assert_eq!(history[0].new_price, 460_000);
    }

    #[tokio::test]
    async fn vanished_listing_closes_only_with_confirmation() {
        let (driver, repo) = setup();
        let both = vec![summary(100, 48.0, 450_000), summary(200, 52.5, 520_000)];
        driver
            .reconcile(&repo, &StubSource::new(both))
            .await
            .unwrap();

        // Next run: 200 vanished; its page answers with a non-active status.
        let source = StubSource::new(vec![summary(100, 48.0, 450_000)]).with_status(
            link(200, 52.5),
            StubStatus::Reports("removed_by_user"),
        );
        let stats = driver.reconcile(&repo, &source).await.unwrap();
        assert_eq!(stats.closures, 1);

        let closed = repo
            .find_listing_by_identity(&summary(200, 52.5, 0).identity())
            .unwrap()
            .unwrap();
        assert!(!repo.is_active(closed).unwrap());
        let open = repo
            .find_listing_by_identity(&summary(100, 48.0, 0).identity())
            .unwrap()
            .unwrap();
        assert!(repo.is_active(open).unwrap());
    }

    #[tokio::test]
    async fn pagination_miss_is_not_closed() {
        let (driver, repo) = setup();
        driver
            .reconcile(
                &repo,
                &StubSource::new(vec![summary(100, 48.0, 450_000), summary(200, 52.5, 520_000)]),
            )
            .await
            .unwrap();

        // 200 missing from results but its page still says active.
        let source = StubSource::new(vec![summary(100, 48.0, 450_000)])
            .with_status(link(200, 52.5), StubStatus::Reports("active"));
        let stats = driver.reconcile(&repo, &source).await.unwrap();
        assert_eq!(stats.closures, 0);

        let id = repo
            .find_listing_by_identity(&summary(200, 52.5, 0).identity())
            .unwrap()
            .unwrap();
        assert!(repo.is_active(id).unwrap());
    }

    #[tokio::test]
    async fn unreachable_page_confirms_closure() {
        let (driver, repo) = setup();
        driver
            .reconcile(
                &repo,
                &StubSource::new(vec![summary(100, 48.0, 450_000), summary(200, 52.5, 520_000)]),
            )
            .await
            .unwrap();

        // 200 vanished and its link 404s: removal evidence.
        let source = StubSource::new(vec![summary(100, 48.0, 450_000)])
            .with_status(link(200, 52.5), StubStatus::Unreachable);
        let stats = driver.reconcile(&repo, &source).await.unwrap();
        assert_eq!(stats.closures, 1);
    }

    #[tokio::test]
    async fn statusless_page_defers_the_decision() {
        let (driver, repo) = setup();
        driver
            .reconcile(
                &repo,
                &StubSource::new(vec![summary(100, 48.0, 450_000), summary(200, 52.5, 520_000)]),
            )
            .await
            .unwrap();

        let source = StubSource::new(vec![summary(100, 48.0, 450_000)])
            .with_status(link(200, 52.5), StubStatus::NoStatus);
        let stats = driver.reconcile(&repo, &source).await.unwrap();
        assert_eq!(stats.closures, 0);

        let id = repo
            .find_listing_by_identity(&summary(200, 52.5, 0).identity())
            .unwrap()
            .unwrap();
        assert!(repo.is_active(id).unwrap());
    }

    #[tokio::test]
    async fn closed_listing_never_reactivates() {
        let (driver, repo) = setup();
        driver
            .reconcile(&repo, &StubSource::new(vec![summary(100, 48.0, 450_000)]))
            .await
            .unwrap();

        // Vanish + 404 → closed.
        let gone = StubSource::new(vec![]).with_status(link(100, 48.0), StubStatus::Unreachable);
        driver.reconcile(&repo, &gone).await.unwrap();

        let id = repo
            .find_listing_by_identity(&summary(100, 48.0, 0).identity())
            .unwrap()
            .unwrap();
        assert!(!repo.is_active(id).unwrap());

        // The identical offer reappears at the same price: classified against
        // the existing row, no mutation, still closed.
        let back = StubSource::new(vec![summary(100, 48.0, 450_000)]);
        let stats = driver.reconcile(&repo, &back).await.unwrap();
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.new_listings, 0);
        assert!(!repo.is_active(id).unwrap());
    }

    #[tokio::test]
    async fn broken_store_never_coerces_to_inserts() {
        // No migrations: every identity lookup errors. Each item is counted
        // and skipped rather than treated as new, then the closure scan
        // aborts the run. Nothing may have been inserted along the way.
        let repo = Repository::open_in_memory().unwrap();
        let driver = Reconciler::new(AppConfig::default());
        let source = StubSource::new(vec![summary(100, 48.0, 450_000)]);

        assert!(driver.reconcile(&repo, &source).await.is_err());

        repo.run_migrations().unwrap();
        assert_eq!(repo.stats().unwrap().listings, 0);
    }

    #[tokio::test]
    async fn detail_failure_skips_item_not_batch() {
        let (driver, repo) = setup();
        let bad = link(200, 52.5);
        let source =
            StubSource::new(vec![summary(100, 48.0, 450_000), summary(200, 52.5, 520_000)])
                .without_detail(&bad);

        let stats = driver.reconcile(&repo, &source).await.unwrap();
        assert_eq!(stats.new_listings, 1);
        assert_eq!(stats.errors, 1);
        // The failed item stays absent and will be retried next run.
        assert_eq!(
            repo.find_listing_by_identity(&summary(200, 52.5, 0).identity())
                .unwrap(),
            None
        );
    }
}
