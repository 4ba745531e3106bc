use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub storage: StorageConfig,
    pub reconciler: ReconcilerConfig,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    /// Search-results URL for the mirrored city; `&page=N` is appended.
    #[serde(default = "default_search_url")]
    pub search_url: String,

    /// Base for building detail links from slugs.
    #[serde(default = "default_offer_base_url")]
    pub offer_base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Reconciler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcilerConfig {
    /// City the run is scoped to; the closure scan only considers
    /// active listings in this city.
    #[serde(default = "default_city")]
    pub city: String,

    /// Download photo binaries on insert. Off keeps runs light.
    #[serde(default = "default_true")]
    pub fetch_photos: bool,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_search_url() -> String {
    "https://www.otodom.pl/pl/wyniki/sprzedaz/mieszkanie/slaskie/katowice?by=LATEST&direction=DESC"
        .to_string()
}
fn default_offer_base_url() -> String {
    "https://www.otodom.pl/pl/oferta/".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    1000
}
fn default_jitter_ms() -> u64 {
    2000
}
fn default_max_pages() -> u32 {
    50
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
        .to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/apartments.duckdb")
}
fn default_city() -> String {
    "katowice".to_string()
}
fn default_true() -> bool {
    true
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("OTODOM").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|_| AppConfig::default());
        Ok(app_cfg)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scraper: ScraperConfig::default(),
            storage: StorageConfig {
                db_path: default_db_path(),
                run_migrations: true,
            },
            reconciler: ReconcilerConfig {
                city: default_city(),
                fetch_photos: true,
            },
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            offer_base_url: default_offer_base_url(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_pages: default_max_pages(),
            user_agent: default_user_agent(),
        }
    }
}
