//! Change detection: one freshly observed summary against stored state.

pub mod closure;

use crate::models::{Classification, OfferSummary};
use crate::storage::Repository;
use anyhow::Result;

/// Classify an observed summary as new, price-changed or unchanged.
///
/// Identity is the (site_id, area) compound key and nothing else. The price
/// comparison is exact integer equality against the stored *updated* price,
/// so an unchanged offer stays `Unchanged` run after run. A lookup failure
/// propagates; the caller skips the item and the next run retries it.
pub fn classify(repo: &Repository, summary: &OfferSummary) -> Result<Classification> {
    let Some(id) = repo.find_listing_by_identity(&summary.identity())? else {
        return Ok(Classification::New);
    };

    let current = repo.updated_price(id)?;
    if current == summary.price {
        Ok(Classification::Unchanged { id })
    } else {
        Ok(Classification::PriceChanged {
            id,
            new_price: summary.price,
            new_price_per_m: summary.price_per_m,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
