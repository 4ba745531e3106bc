use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ── Identity ──────────────────────────────────────────────────────────────────

/// Compound natural key for a listing: the site reuses its own listing IDs
/// across relistings with different areas, so the area is part of identity.
///
/// Area is quantized to centi-m² so the key is `Hash + Eq`; identity matching
/// always happens in Rust on rows fetched by `site_id`, never through float
/// equality in SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub site_id: i64,
    pub area_cm2: i64,
}

impl IdentityKey {
    pub fn new(site_id: i64, area: f64) -> Self {
        Self {
            site_id,
            area_cm2: (area * 100.0).round() as i64,
        }
    }
}

// ── Search-result summary ─────────────────────────────────────────────────────

/// Lightweight offer as it appears on a paginated search-result page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferSummary {
    pub site_id: i64,
    pub area: f64,
    /// Integer currency units; comparisons are exact.
    pub price: i64,
    pub price_per_m: Option<i64>,
    pub link: String,
}

impl OfferSummary {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(self.site_id, self.area)
    }
}

// ── Raw detail record ─────────────────────────────────────────────────────────

/// Field-for-field extraction of a detail page's embedded data blob.
/// Everything the site may omit is an explicit `Option` — no sentinel strings.
/// Raw values keep the site's own vocabulary; normalization maps them.
#[derive(Debug, Clone, Default)]
pub struct OfferRecord {
    pub site_id: Option<i64>,
    pub title: Option<String>,
    pub market: Option<String>,
    pub advert_type: Option<String>,
    pub created_at: Option<String>,
    pub pushed_up_at: Option<String>,
    pub exclusive_offer: Option<bool>,
    pub creation_source: Option<String>,
    pub description: Option<String>,
    pub heating: Option<String>,
    pub ownership: Option<String>,
    pub area: Option<f64>,
    pub price: Option<i64>,
    pub price_per_m: Option<i64>,
    pub rent_amount: Option<String>,
    pub rooms: Option<String>,
    pub floor: Option<String>,
    pub property_type: Option<String>,
    pub construction_status: Option<String>,
    pub energy_certificate: Option<String>,
    pub build_year: Option<i64>,
    pub building_floors: Option<i64>,
    pub building_material: Option<String>,
    pub building_type: Option<String>,
    pub windows_type: Option<String>,
    pub security_types: Option<String>,
    pub equipment_types: Option<String>,
    pub extras_types: Option<String>,
    pub media_types: Option<String>,
    pub voivodeship: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub street: Option<String>,
    pub local_plan_url: Option<String>,
    pub video_url: Option<String>,
    pub view3d_url: Option<String>,
    pub walkaround_url: Option<String>,
    pub owner_id: Option<i64>,
    pub owner_name: Option<String>,
    pub agency_id: Option<i64>,
    pub agency_name: Option<String>,
    pub link: Option<String>,
    pub image_urls: Vec<String>,
    pub status: Option<String>,
}

// ── Normalized offer ──────────────────────────────────────────────────────────

/// A detail record after field mapping and cleanup, ready for insertion.
/// Required fields are non-optional here; a record that cannot satisfy them
/// fails normalization and the item is skipped for the run.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedOffer {
    pub site_id: i64,
    pub title: String,
    pub market: Option<String>,
    pub advert_type: Option<String>,
    pub creation_date: Option<NaiveDate>,
    pub creation_time: Option<String>,
    pub pushed_up_at: Option<String>,
    pub exclusive_offer: Option<bool>,
    pub creation_source: Option<String>,
    pub description: Option<String>,
    pub area: f64,
    pub price: i64,
    pub price_per_m: Option<i64>,
    pub rent_amount: Option<String>,
    pub rooms: Option<i64>,
    /// "0" (ground) through "10", or "10+".
    pub floor: Option<String>,
    pub heating: Option<String>,
    pub ownership: Option<String>,
    pub property_type: Option<String>,
    pub construction_status: Option<String>,
    pub energy_certificate: Option<String>,
    pub build_year: Option<i64>,
    pub building_floors: Option<i64>,
    pub building_material: Option<String>,
    pub building_type: Option<String>,
    pub windows_type: Option<String>,
    pub voivodeship: String,
    pub city: String,
    pub district: Option<String>,
    pub street: Option<String>,
    pub local_plan_url: Option<String>,
    pub video_url: Option<String>,
    pub view3d_url: Option<String>,
    pub walkaround_url: Option<String>,
    pub owner_id: Option<i64>,
    pub owner_name: Option<String>,
    pub agency_id: Option<i64>,
    pub agency_name: Option<String>,
    pub link: String,
    pub features: FeatureSet,
}

// ── Features ──────────────────────────────────────────────────────────────────

/// Closed enumeration of amenity flags, in schema column order.
pub const FEATURE_FLAGS: [&str; 26] = [
    "internet",
    "cable_television",
    "phone",
    "roller_shutters",
    "anti_burglary_door",
    "entryphone",
    "monitoring",
    "alarm",
    "closed_area",
    "furniture",
    "washing_machine",
    "dishwasher",
    "fridge",
    "stove",
    "oven",
    "tv",
    "balcony",
    "usable_room",
    "garage",
    "basement",
    "garden",
    "terrace",
    "lift",
    "two_storey",
    "separate_kitchen",
    "air_conditioning",
];

/// Fixed-width boolean vector over [`FEATURE_FLAGS`], derived once at
/// insertion from the space-delimited token set scraped off the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSet([bool; FEATURE_FLAGS.len()]);

impl FeatureSet {
    pub fn from_tokens(tokens: &str) -> Self {
        let present: std::collections::HashSet<&str> = tokens.split_whitespace().collect();
        Self(std::array::from_fn(|i| present.contains(FEATURE_FLAGS[i])))
    }

    pub fn flags(&self) -> &[bool; FEATURE_FLAGS.len()] {
        &self.0
    }

    pub fn contains(&self, flag: &str) -> bool {
        FEATURE_FLAGS
            .iter()
            .position(|f| *f == flag)
            .map(|i| self.0[i])
            .unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.0.iter().filter(|b| **b).count()
    }
}

// ── Reconciliation outcomes ───────────────────────────────────────────────────

/// Verdict for one observed summary against stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// No listing with this (site_id, area) exists yet.
    New,
    /// Exists and the stored updated price differs from the observed one.
    PriceChanged {
        id: i64,
        new_price: i64,
        new_price_per_m: Option<i64>,
    },
    /// Exists and the price matches; nothing to do.
    Unchanged { id: i64 },
}

/// An `active = true` row as pulled for the closure scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveListing {
    pub id: i64,
    pub site_id: i64,
    pub area: f64,
}

impl ActiveListing {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(self.site_id, self.area)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_price_and_link() {
        let a = OfferSummary {
            site_id: 12345,
            area: 48.0,
            price: 450_000,
            price_per_m: Some(9_375),
            link: "https://example.com/a".into(),
        };
        let b = OfferSummary {
            site_id: 12345,
            area: 48.0,
            price: 460_000,
            price_per_m: None,
            link: "https://example.com/b".into(),
        };
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn identity_distinguishes_area() {
        assert_ne!(IdentityKey::new(12345, 48.0), IdentityKey::new(12345, 52.5));
        // Sub-centi differences collapse; anything coarser does not.
        assert_eq!(IdentityKey::new(7, 48.004), IdentityKey::new(7, 48.0));
        assert_ne!(IdentityKey::new(7, 48.01), IdentityKey::new(7, 48.0));
    }

    #[test]
    fn feature_set_from_tokens() {
        let fs = FeatureSet::from_tokens("balcony lift internet unknown_token");
        assert!(fs.contains("balcony"));
        assert!(fs.contains("lift"));
        assert!(fs.contains("internet"));
        assert!(!fs.contains("garage"));
        assert_eq!(fs.count(), 3);
    }

    #[test]
    fn feature_set_empty() {
        assert_eq!(FeatureSet::from_tokens("").count(), 0);
        assert_eq!(FeatureSet::default().count(), 0);
    }
}
