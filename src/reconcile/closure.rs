//! Two-phase closure scan.
//!
//! The site paginates, and a listing can miss a page of one run without
//! having been removed — absence from search results alone never closes
//! anything. Phase 1 computes cheap city-scoped candidates by set
//! difference; phase 2 confirms each candidate against its own detail page,
//! the only authoritative place the offer status lives.

use crate::error::FetchError;
use crate::models::{ActiveListing, IdentityKey};
use std::collections::HashSet;

/// Phase 1: stored active listings whose (site_id, area) key was not
/// observed anywhere in this run. Pure set difference, no I/O.
pub fn find_candidates(
    active: &[ActiveListing],
    observed: &HashSet<IdentityKey>,
) -> Vec<ActiveListing> {
    active
        .iter()
        .filter(|listing| !observed.contains(&listing.identity()))
        .cloned()
        .collect()
}

/// Outcome of one phase-2 confirmation fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosureVerdict {
    /// Confirmed closed; carries the observed status string, or the fetch
    /// failure for a link that stopped resolving.
    Closed(String),
    /// The page still reports an active offer: a pagination miss. The
    /// listing is left untouched and will reappear as observed.
    StillActive,
    /// Page loaded but carried no readable status; left untouched and
    /// re-examined next run.
    Unconfirmed,
}

/// Phase 2 decision rule over the detail-page fetch.
///
/// An unreachable previously-known-good link counts as removal evidence,
/// same as an explicit non-active status.
pub fn confirm(status: Result<Option<String>, FetchError>) -> ClosureVerdict {
    match status {
        Err(e) => ClosureVerdict::Closed(format!("unreachable: {}", e)),
        Ok(Some(s)) if s.eq_ignore_ascii_case("active") => ClosureVerdict::StillActive,
        Ok(Some(s)) => ClosureVerdict::Closed(s),
        Ok(None) => ClosureVerdict::Unconfirmed,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
