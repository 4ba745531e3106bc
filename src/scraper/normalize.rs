//! Field normalization: maps the site's raw vocabulary onto the fixed schema.
//! Pure functions, no I/O.

use crate::models::{FeatureSet, NormalizedOffer, OfferRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};

/// Floor codes → schema labels. Anything unrecognized stays NULL.
pub fn floor_label(code: &str) -> Option<String> {
    let label = match code.trim() {
        "ground_floor" => "0",
        "floor_1" => "1",
        "floor_2" => "2",
        "floor_3" => "3",
        "floor_4" => "4",
        "floor_5" => "5",
        "floor_6" => "6",
        "floor_7" => "7",
        "floor_8" => "8",
        "floor_9" => "9",
        "floor_10" => "10",
        "floor_higher_10" => "10+",
        _ => return None,
    };
    Some(label.to_string())
}

/// Ownership strings as the site localizes them → schema codes.
pub fn simplify_ownership(raw: &str) -> Option<String> {
    match raw.trim().to_lowercase().as_str() {
        "pełna własność" => Some("full_ownership".to_string()),
        "spółdzielcze wł. prawo do lokalu" => Some("cooperative_ownership".to_string()),
        _ => None,
    }
}

/// First integer in a raw rooms value ("2", "2 pokoje", "more").
pub fn rooms_count(raw: &str) -> Option<i64> {
    let digits: String = raw
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Collapse whitespace runs, newlines and non-breaking spaces.
pub fn clean_text(raw: &str) -> String {
    raw.replace('\n', " ")
        .replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Join the four raw feature sources into one lowercase token set matching
/// the schema's flag names.
pub fn feature_tokens(record: &OfferRecord) -> String {
    let mut joined = [
        record.extras_types.as_deref(),
        record.equipment_types.as_deref(),
        record.media_types.as_deref(),
        record.security_types.as_deref(),
    ]
    .iter()
    .flatten()
    .map(|s| s.to_lowercase())
    .collect::<Vec<_>>()
    .join(" ");

    joined = joined.replace(',', " ").replace('\'', "");
    joined.replace("cable-television", "cable_television")
}

/// Parse the site's creation timestamp into a date + "HH:MM" pair.
fn split_creation(raw: &str) -> Option<(NaiveDate, String)> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()?;
    Some((parsed.date_naive(), parsed.format("%H:%M").to_string()))
}

/// Normalize a raw detail record. Fails (and the item is skipped for this
/// run) when a field the schema requires is missing.
pub fn normalize(record: &OfferRecord) -> Result<NormalizedOffer> {
    let site_id = record.site_id.context("offer has no site listing ID")?;
    let title = record
        .title
        .as_deref()
        .map(clean_text)
        .filter(|t| !t.is_empty())
        .context("offer has no title")?;
    let area = record.area.context("offer has no area")?;
    let price = record.price.context("offer has no price")?;
    let link = record.link.clone().context("offer has no link")?;
    let voivodeship = record
        .voivodeship
        .clone()
        .context("offer has no voivodeship")?;
    let city = record.city.clone().context("offer has no city")?;

    let (creation_date, creation_time) = match record.created_at.as_deref() {
        Some(raw) => match split_creation(raw) {
            Some((d, t)) => (Some(d), Some(t)),
            None => (None, None),
        },
        None => (None, None),
    };

    Ok(NormalizedOffer {
        site_id,
        title,
        market: record.market.clone(),
        advert_type: record.advert_type.clone(),
        creation_date,
        creation_time,
        pushed_up_at: record.pushed_up_at.clone(),
        exclusive_offer: record.exclusive_offer,
        creation_source: record.creation_source.clone(),
        description: record.description.as_deref().map(clean_text),
        area,
        price,
        price_per_m: record.price_per_m,
        rent_amount: record.rent_amount.clone(),
        rooms: record.rooms.as_deref().and_then(rooms_count),
        floor: record.floor.as_deref().and_then(floor_label),
        heating: record.heating.clone(),
        ownership: record.ownership.as_deref().and_then(simplify_ownership),
        property_type: record.property_type.clone(),
        construction_status: record.construction_status.clone(),
        energy_certificate: record.energy_certificate.clone(),
        build_year: record.build_year,
        building_floors: record.building_floors,
        building_material: record.building_material.clone(),
        building_type: record.building_type.clone(),
        windows_type: record.windows_type.clone(),
        voivodeship,
        city,
        district: record.district.clone(),
        street: record.street.clone(),
        local_plan_url: record.local_plan_url.clone(),
        video_url: record.video_url.clone(),
        view3d_url: record.view3d_url.clone(),
        walkaround_url: record.walkaround_url.clone(),
        owner_id: record.owner_id,
        owner_name: record.owner_name.clone(),
        agency_id: record.agency_id,
        agency_name: record.agency_name.clone(),
        link,
        features: FeatureSet::from_tokens(&feature_tokens(record)),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
