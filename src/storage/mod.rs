use crate::models::{ActiveListing, IdentityKey, NormalizedOffer, FEATURE_FLAGS};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, Utc};
use duckdb::{params, Connection};
use std::path::Path;
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS seq_locations START 1;
CREATE SEQUENCE IF NOT EXISTS seq_listings START 1;
CREATE SEQUENCE IF NOT EXISTS seq_price_history START 1;
CREATE SEQUENCE IF NOT EXISTS seq_runs START 1;

CREATE TABLE IF NOT EXISTS locations (
    id          BIGINT PRIMARY KEY DEFAULT nextval('seq_locations'),
    voivodeship VARCHAR NOT NULL,
    city        VARCHAR NOT NULL,
    -- NULL district is a matching dimension: it pairs only with NULL.
    district    VARCHAR,
    UNIQUE (voivodeship, city, district)
);

CREATE TABLE IF NOT EXISTS listings (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('seq_listings'),
    site_id             BIGINT  NOT NULL,
    title               VARCHAR NOT NULL,
    market              VARCHAR,
    advert_type         VARCHAR,
    creation_date       DATE,
    creation_time       VARCHAR,
    pushed_up_at        VARCHAR,
    exclusive_offer     BOOLEAN,
    creation_source     VARCHAR,
    description         VARCHAR,
    area                DOUBLE  NOT NULL,
    -- price/price_per_m are the at-creation values; the updated_ pair tracks
    -- the latest observation and is the comparison target for change detection.
    price               BIGINT  NOT NULL,
    updated_price       BIGINT  NOT NULL,
    price_per_m         BIGINT,
    updated_price_per_m BIGINT,
    location_id         BIGINT  NOT NULL,
    street              VARCHAR,
    rent_amount         VARCHAR,
    rooms               BIGINT,
    floor               VARCHAR,
    heating             VARCHAR,
    ownership           VARCHAR,
    property_type       VARCHAR,
    construction_status VARCHAR,
    energy_certificate  VARCHAR,
    build_year          BIGINT,
    building_floors     BIGINT,
    building_material   VARCHAR,
    building_type       VARCHAR,
    windows_type        VARCHAR,
    local_plan_url      VARCHAR,
    video_url           VARCHAR,
    view3d_url          VARCHAR,
    walkaround_url      VARCHAR,
    owner_id            BIGINT,
    owner_name          VARCHAR,
    agency_id           BIGINT,
    agency_name         VARCHAR,
    link                VARCHAR NOT NULL,
    active              BOOLEAN NOT NULL DEFAULT TRUE,
    closing_date        DATE,
    scraped_at          TIMESTAMP NOT NULL,
    -- Backstop for the check-then-insert race between concurrent runs.
    UNIQUE (site_id, area)
);

CREATE TABLE IF NOT EXISTS price_history (
    id          BIGINT PRIMARY KEY DEFAULT nextval('seq_price_history'),
    listing_id  BIGINT NOT NULL,
    old_price   BIGINT NOT NULL,
    new_price   BIGINT NOT NULL,
    change_date DATE   NOT NULL
);

CREATE TABLE IF NOT EXISTS photos (
    listing_id  BIGINT NOT NULL,
    photo       BLOB   NOT NULL
);

CREATE TABLE IF NOT EXISTS reconcile_runs (
    id              BIGINT PRIMARY KEY DEFAULT nextval('seq_runs'),
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    summaries_seen  INTEGER DEFAULT 0,
    new_listings    INTEGER DEFAULT 0,
    price_changes   INTEGER DEFAULT 0,
    closures        INTEGER DEFAULT 0,
    errors          INTEGER DEFAULT 0,
    error_msg       VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_listings_site    ON listings (site_id);
CREATE INDEX IF NOT EXISTS idx_listings_active  ON listings (active);
CREATE INDEX IF NOT EXISTS idx_history_listing  ON price_history (listing_id);
CREATE INDEX IF NOT EXISTS idx_photos_listing   ON photos (listing_id);
"#;

/// The features table has one boolean column per flag, in [`FEATURE_FLAGS`]
/// order; the DDL is generated so schema and model cannot drift.
fn features_ddl() -> String {
    let cols = FEATURE_FLAGS
        .iter()
        .map(|f| format!("    {:<18} BOOLEAN NOT NULL DEFAULT FALSE", f))
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        "CREATE TABLE IF NOT EXISTS features (\n    listing_id BIGINT PRIMARY KEY,\n{}\n);",
        cols
    )
}

// ── Row types ─────────────────────────────────────────────────────────────────

/// One appended price-history row.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceChange {
    pub listing_id: i64,
    pub old_price: i64,
    pub new_price: i64,
    pub change_date: NaiveDate,
}

/// Aggregates for the `stats` command.
#[derive(Debug, Default)]
pub struct StoreStats {
    pub listings: i64,
    pub active: i64,
    pub locations: i64,
    pub price_changes: i64,
    pub photos: i64,
    pub last_closing: Option<NaiveDate>,
}

/// Row for the `listings` command printout.
#[derive(Debug)]
pub struct ListingRow {
    pub id: i64,
    pub site_id: i64,
    pub area: f64,
    pub updated_price: i64,
    pub link: String,
}

// ── Repository ────────────────────────────────────────────────────────────────

/// Single scoped connection per run; every multi-statement mutation goes
/// through one transaction on it.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn
            .execute_batch(&features_ddl())
            .context("Features DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Identity / lookups ────────────────────────────────────────────────────

    /// Sole existence predicate: (site_id, area) compound key.
    ///
    /// `Ok(None)` strictly means "no such row". Query failures stay `Err` —
    /// coercing them to absence would invite duplicate inserts.
    pub fn find_listing_by_identity(&self, key: &IdentityKey) -> Result<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, area FROM listings WHERE site_id = ?")?;
        let rows = stmt.query_map(params![key.site_id], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, f64>(1)?))
        })?;

        for row in rows {
            let (id, area) = row.context("identity lookup failed mid-scan")?;
            if IdentityKey::new(key.site_id, area) == *key {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Latest known price for a listing. The comparison target for change
    /// detection is always this column, never the creation-time price.
    pub fn updated_price(&self, id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT updated_price FROM listings WHERE id = ?",
                params![id],
                |r| r.get(0),
            )
            .with_context(|| format!("No listing with internal id {}", id))
    }

    pub fn link_by_id(&self, id: i64) -> Result<String> {
        self.conn
            .query_row("SELECT link FROM listings WHERE id = ?", params![id], |r| {
                r.get(0)
            })
            .with_context(|| format!("No link stored for listing {}", id))
    }

    pub fn is_active(&self, id: i64) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT active FROM listings WHERE id = ?",
                params![id],
                |r| r.get(0),
            )
            .with_context(|| format!("No listing with internal id {}", id))
    }

    /// Every active listing in one city, for closure candidate detection.
    pub fn list_active_by_city(&self, city: &str) -> Result<Vec<ActiveListing>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT l.id, l.site_id, l.area
               FROM listings l
               JOIN locations loc ON loc.id = l.location_id
               WHERE l.active AND lower(loc.city) = lower(?)
               ORDER BY l.id"#,
        )?;
        let rows = stmt.query_map(params![city], |r| {
            Ok(ActiveListing {
                id: r.get(0)?,
                site_id: r.get(1)?,
                area: r.get(2)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("active-listing scan failed")?);
        }
        Ok(out)
    }

    // ── Insertion ─────────────────────────────────────────────────────────────

    /// Insert listing + features + photos (and the location, if unseen) as
    /// one transaction. Returns the new internal ID.
    pub fn insert_listing_bundle(
        &self,
        offer: &NormalizedOffer,
        photos: &[Vec<u8>],
    ) -> Result<i64> {
        let tx = self.conn.unchecked_transaction()?;

        let location_id = find_or_create_location(
            &tx,
            &offer.voivodeship,
            &offer.city,
            offer.district.as_deref(),
        )?;

        let listing_id: i64 = tx
            .query_row(
                r#"INSERT INTO listings (
                    site_id, title, market, advert_type, creation_date,
                    creation_time, pushed_up_at, exclusive_offer, creation_source,
                    description, area, price, updated_price, price_per_m,
                    updated_price_per_m, location_id, street, rent_amount, rooms,
                    floor, heating, ownership, property_type, construction_status,
                    energy_certificate, build_year, building_floors,
                    building_material, building_type, windows_type, local_plan_url,
                    video_url, view3d_url, walkaround_url, owner_id, owner_name,
                    agency_id, agency_name, link, active, closing_date, scraped_at
                ) VALUES (
                    ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                    ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, TRUE,
                    NULL, ?
                ) RETURNING id"#,
                params![
                    offer.site_id,
                    offer.title,
                    offer.market,
                    offer.advert_type,
                    offer.creation_date,
                    offer.creation_time,
                    offer.pushed_up_at,
                    offer.exclusive_offer,
                    offer.creation_source,
                    offer.description,
                    offer.area,
                    // First sight: original and updated price are the same.
                    offer.price,
                    offer.price,
                    offer.price_per_m,
                    offer.price_per_m,
                    location_id,
                    offer.street,
                    offer.rent_amount,
                    offer.rooms,
                    offer.floor,
                    offer.heating,
                    offer.ownership,
                    offer.property_type,
                    offer.construction_status,
                    offer.energy_certificate,
                    offer.build_year,
                    offer.building_floors,
                    offer.building_material,
                    offer.building_type,
                    offer.windows_type,
                    offer.local_plan_url,
                    offer.video_url,
                    offer.view3d_url,
                    offer.walkaround_url,
                    offer.owner_id,
                    offer.owner_name,
                    offer.agency_id,
                    offer.agency_name,
                    offer.link,
                    Utc::now().naive_utc(),
                ],
                |r| r.get(0),
            )
            .with_context(|| {
                format!(
                    "insert listing site_id={} area={}",
                    offer.site_id, offer.area
                )
            })?;

        // Flag values come from the program, not the page; inline literals
        // keep the statement a compile-time shape.
        let flag_values = offer
            .features
            .flags()
            .iter()
            .map(|b| if *b { "TRUE" } else { "FALSE" })
            .collect::<Vec<_>>()
            .join(", ");
        tx.execute(
            &format!(
                "INSERT INTO features (listing_id, {}) VALUES (?, {})",
                FEATURE_FLAGS.join(", "),
                flag_values
            ),
            params![listing_id],
        )
        .with_context(|| format!("insert features for listing {}", listing_id))?;

        for photo in photos {
            tx.execute(
                "INSERT INTO photos (listing_id, photo) VALUES (?, ?)",
                params![listing_id, photo],
            )
            .with_context(|| format!("insert photo for listing {}", listing_id))?;
        }

        tx.commit()?;
        Ok(listing_id)
    }

    // ── Price change ──────────────────────────────────────────────────────────

    /// Overwrite the updated-price pair and append the history row, atomically.
    /// The old price is read from `updated_price` before the overwrite so the
    /// ledger chains: each row's old_price equals the prior row's new_price.
    pub fn apply_price_change(
        &self,
        id: i64,
        new_price: i64,
        new_price_per_m: Option<i64>,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        let old_price: i64 = tx
            .query_row(
                "SELECT updated_price FROM listings WHERE id = ?",
                params![id],
                |r| r.get(0),
            )
            .with_context(|| format!("price read for listing {}", id))?;

        tx.execute(
            r#"UPDATE listings
               SET updated_price = ?,
                   updated_price_per_m = COALESCE(?, updated_price_per_m)
               WHERE id = ?"#,
            params![new_price, new_price_per_m, id],
        )
        .with_context(|| format!("price update for listing {}", id))?;

        tx.execute(
            "INSERT INTO price_history (listing_id, old_price, new_price, change_date)
             VALUES (?, ?, ?, ?)",
            params![id, old_price, new_price, Local::now().date_naive()],
        )
        .with_context(|| format!("history append for listing {}", id))?;

        tx.commit()?;
        Ok(())
    }

    pub fn price_history(&self, id: i64) -> Result<Vec<PriceChange>> {
        let mut stmt = self.conn.prepare(
            "SELECT listing_id, old_price, new_price, change_date
             FROM price_history WHERE listing_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![id], |r| {
            Ok(PriceChange {
                listing_id: r.get(0)?,
                old_price: r.get(1)?,
                new_price: r.get(2)?,
                change_date: r.get(3)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ── Closure ───────────────────────────────────────────────────────────────

    /// Terminal transition: active → false, closing date = today. The guard
    /// keeps the closing date from being rewritten by a repeated apply.
    pub fn set_closed(&self, id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE listings SET active = FALSE, closing_date = ?
                 WHERE id = ? AND active",
                params![Local::now().date_naive(), id],
            )
            .with_context(|| format!("closure update for listing {}", id))?;
        Ok(())
    }

    // ── Run log ───────────────────────────────────────────────────────────────

    pub fn begin_run(&self) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO reconcile_runs (started_at, status) VALUES (?, 'running') RETURNING id",
            params![Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn finish_run(
        &self,
        run_id: i64,
        summaries: usize,
        new_listings: usize,
        price_changes: usize,
        closures: usize,
        errors: usize,
        error_msg: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"UPDATE reconcile_runs SET
               finished_at = ?, status = ?,
               summaries_seen = ?, new_listings = ?, price_changes = ?,
               closures = ?, errors = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error_msg.is_none() { "success" } else { "error" },
                summaries as i64,
                new_listings as i64,
                price_changes as i64,
                closures as i64,
                errors as i64,
                error_msg,
                run_id,
            ],
        )?;
        Ok(())
    }

    // ── Stats / listings printouts ────────────────────────────────────────────

    pub fn stats(&self) -> Result<StoreStats> {
        let one = |sql: &str| -> Result<i64> {
            Ok(self.conn.query_row(sql, [], |r| r.get(0))?)
        };
        Ok(StoreStats {
            listings: one("SELECT COUNT(*) FROM listings")?,
            active: one("SELECT COUNT(*) FROM listings WHERE active")?,
            locations: one("SELECT COUNT(*) FROM locations")?,
            price_changes: one("SELECT COUNT(*) FROM price_history")?,
            photos: one("SELECT COUNT(*) FROM photos")?,
            last_closing: self
                .conn
                .query_row("SELECT MAX(closing_date) FROM listings", [], |r| {
                    r.get::<_, Option<NaiveDate>>(0)
                })
                .ok()
                .flatten(),
        })
    }

    pub fn list_active(&self) -> Result<Vec<ListingRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, site_id, area, updated_price, link
             FROM listings WHERE active ORDER BY id",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(ListingRow {
                id: r.get(0)?,
                site_id: r.get(1)?,
                area: r.get(2)?,
                updated_price: r.get(3)?,
                link: r.get(4)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Lazy location creation inside the caller's transaction. NULL district only
/// matches NULL district (`IS NOT DISTINCT FROM`), per the uniqueness rule.
fn find_or_create_location(
    conn: &Connection,
    voivodeship: &str,
    city: &str,
    district: Option<&str>,
) -> Result<i64> {
    let found = conn.query_row(
        "SELECT id FROM locations
         WHERE voivodeship = ? AND city = ? AND district IS NOT DISTINCT FROM ?",
        params![voivodeship, city, district],
        |r| r.get::<_, i64>(0),
    );

    match found {
        Ok(id) => Ok(id),
        Err(duckdb::Error::QueryReturnedNoRows) => conn
            .query_row(
                "INSERT INTO locations (voivodeship, city, district)
                 VALUES (?, ?, ?) RETURNING id",
                params![voivodeship, city, district],
                |r| r.get(0),
            )
            .with_context(|| format!("insert location {}/{}", voivodeship, city)),
        Err(e) => Err(e).context("location lookup failed"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
