//! Extraction of the `__NEXT_DATA__` JSON blob the site embeds in every page,
//! and the field-level pulls for search summaries, detail records and the
//! offer status.

use crate::error::ExtractError;
use crate::models::{OfferRecord, OfferSummary};
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::warn;
use url::Url;

/// Locate and parse the embedded data block.
pub fn next_data(html: &str) -> Result<Value, ExtractError> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse(r#"script#__NEXT_DATA__"#)
        .expect("static selector");

    let script = doc
        .select(&sel)
        .next()
        .ok_or(ExtractError::MissingDataBlock)?;

    let raw: String = script.text().collect();
    Ok(serde_json::from_str(&raw)?)
}

/// Total number of search-result pages, as reported by the first page.
pub fn page_count(doc: &Value) -> Option<u32> {
    doc.pointer("/props/pageProps/tracking/listing/page_count")
        .and_then(Value::as_u64)
        .map(|n| n as u32)
}

/// Offer summaries from one search-results page. Items without an ID, area
/// or price are logged and dropped; they cannot participate in identity.
pub fn summaries(doc: &Value, offer_base: &Url) -> Result<Vec<OfferSummary>, ExtractError> {
    let items = doc
        .pointer("/props/pageProps/data/searchAds/items")
        .and_then(Value::as_array)
        .ok_or(ExtractError::MissingField("searchAds.items"))?;

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let site_id = item.get("id").and_then(as_i64);
        let area = item.get("area").and_then(as_f64);
        let price = item.pointer("/totalPrice/value").and_then(as_i64);
        let slug = item.get("slug").and_then(Value::as_str);

        let (Some(site_id), Some(area), Some(price), Some(slug)) =
            (site_id, area, price, slug)
        else {
            warn!("Skipping incomplete search item: {}", item);
            continue;
        };

        let price_per_m = item
            .pointer("/pricePerSquareMeter/value")
            .and_then(as_i64)
            .or_else(|| per_area(price, area));

        let Some(link) = offer_link(offer_base, slug) else {
            warn!("Unbuildable offer link for slug {:?}", slug);
            continue;
        };

        out.push(OfferSummary {
            site_id,
            area,
            price,
            price_per_m,
            link,
        });
    }
    Ok(out)
}

/// The full detail record under `props.pageProps.ad`.
pub fn detail(doc: &Value, offer_base: &Url) -> Result<OfferRecord, ExtractError> {
    let ad = doc
        .pointer("/props/pageProps/ad")
        .filter(|v| v.is_object())
        .ok_or(ExtractError::MissingField("ad"))?;

    let target = ad.get("target").cloned().unwrap_or(Value::Null);

    let ownership = ad
        .get("characteristics")
        .and_then(Value::as_array)
        .and_then(|chars| {
            chars.iter().find(|c| {
                c.get("key").and_then(Value::as_str) == Some("building_ownership")
            })
        })
        .and_then(|c| c.get("localizedValue"))
        .and_then(as_text);

    let district = ad
        .pointer("/location/reverseGeocoding/locations")
        .and_then(Value::as_array)
        .and_then(|locs| {
            locs.iter().find(|l| {
                l.get("locationLevel").and_then(Value::as_str) == Some("district")
            })
        })
        .and_then(|l| l.get("name"))
        .and_then(as_text);

    let image_urls = ad
        .get("images")
        .and_then(Value::as_array)
        .map(|imgs| {
            imgs.iter()
                .filter_map(|i| i.get("medium").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let link = ad
        .get("slug")
        .and_then(Value::as_str)
        .and_then(|slug| offer_link(offer_base, slug));

    Ok(OfferRecord {
        site_id: ad.get("id").and_then(as_i64),
        title: ad.get("title").and_then(as_text).map(|t| strip_html(&t)),
        market: ad.get("market").and_then(as_text).map(lower),
        advert_type: ad.get("advertType").and_then(as_text).map(lower),
        created_at: ad.get("createdAt").and_then(as_text),
        pushed_up_at: ad.get("pushedUpAt").and_then(as_text),
        exclusive_offer: ad.get("exclusiveOffer").and_then(Value::as_bool),
        creation_source: ad.get("creationSource").and_then(as_text),
        description: ad
            .get("description")
            .and_then(as_text)
            .map(|d| strip_html(&d)),
        heating: ad
            .pointer("/property/buildingProperties/heating")
            .and_then(as_text)
            .map(lower),
        ownership,
        area: target.get("Area").and_then(as_f64),
        price: target.get("Price").and_then(as_i64),
        price_per_m: target.get("Price_per_m").and_then(as_i64),
        rent_amount: target.get("Rent").and_then(as_text),
        rooms: target.get("Rooms_num").and_then(as_text),
        floor: target.get("Floor_no").and_then(as_text),
        property_type: target.get("ProperType").and_then(as_text),
        construction_status: target.get("Construction_status").and_then(as_text),
        energy_certificate: target.get("Energy_certificate").and_then(as_text),
        build_year: target.get("Build_year").and_then(as_i64),
        building_floors: target.get("Building_floors_num").and_then(as_i64),
        building_material: target.get("Building_material").and_then(as_text),
        building_type: target.get("Building_type").and_then(as_text),
        windows_type: target.get("Windows_type").and_then(as_text),
        security_types: target.get("Security_types").and_then(as_text),
        equipment_types: target.get("Equipment_types").and_then(as_text),
        extras_types: target.get("Extras_types").and_then(as_text),
        media_types: target.get("Media_types").and_then(as_text),
        voivodeship: target.get("Province").and_then(as_text),
        city: target.get("City").and_then(as_text),
        district,
        street: ad
            .pointer("/location/address/street/name")
            .and_then(as_text),
        local_plan_url: ad.pointer("/links/localPlanUrl").and_then(as_text),
        video_url: ad.pointer("/links/videoUrl").and_then(as_text),
        view3d_url: ad.pointer("/links/view3dUrl").and_then(as_text),
        walkaround_url: ad.pointer("/links/walkaroundUrl").and_then(as_text),
        owner_id: ad.pointer("/owner/id").and_then(as_i64),
        owner_name: ad.pointer("/owner/name").and_then(as_text),
        agency_id: ad.pointer("/agency/id").and_then(as_i64),
        agency_name: ad.pointer("/agency/name").and_then(as_text),
        link,
        image_urls,
        status: ad.get("status").and_then(as_text).map(lower),
    })
}

/// Offer status from a detail page, if the page carries one.
pub fn status(doc: &Value) -> Option<String> {
    doc.pointer("/props/pageProps/ad/status")
        .and_then(as_text)
        .map(lower)
}

/// Build a canonical detail link from a search-result slug.
pub fn offer_link(base: &Url, slug: &str) -> Option<String> {
    base.join(slug).ok().map(Into::into)
}

// ── Value coercion helpers ────────────────────────────────────────────────────
// The blob is inconsistent about scalar shapes: numbers arrive as numbers or
// strings, enumerated codes as bare strings or single-element arrays.

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(_) => v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(_) => v.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

/// Scalar-or-array to plain text; arrays join space-separated.
fn as_text(v: &Value) -> Option<String> {
    let text = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(as_text)
            .collect::<Vec<_>>()
            .join(" "),
        _ => return None,
    };
    if text.is_empty() { None } else { Some(text) }
}

fn lower(s: String) -> String {
    s.to_lowercase()
}

fn per_area(price: i64, area: f64) -> Option<i64> {
    if area > 0.0 {
        Some((price as f64 / area).round() as i64)
    } else {
        None
    }
}

/// Titles and descriptions arrive with markup; keep text only.
fn strip_html(html: &str) -> String {
    Html::parse_fragment(html)
        .root_element()
        .text()
        .collect::<String>()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.otodom.pl/pl/oferta/").unwrap()
    }

    fn page(json: &str) -> String {
        format!(
            r#"<html><body><script id="__NEXT_DATA__" type="application/json">{}</script></body></html>"#,
            json
        )
    }

    #[test]
    fn missing_block_is_distinct_error() {
        let err = next_data("<html><body>nothing here</body></html>").unwrap_err();
        assert!(matches!(err, ExtractError::MissingDataBlock));
    }

    #[test]
    fn malformed_json_is_distinct_error() {
        let err = next_data(&page("{not json")).unwrap_err();
        assert!(matches!(err, ExtractError::MalformedJson(_)));
    }

    #[test]
    fn reads_page_count() {
        let doc = next_data(&page(
            r#"{"props":{"pageProps":{"tracking":{"listing":{"page_count":7}}}}}"#,
        ))
        .unwrap();
        assert_eq!(page_count(&doc), Some(7));
    }

    #[test]
    fn extracts_summaries_and_skips_incomplete() {
        let doc = next_data(&page(
            r#"{"props":{"pageProps":{"data":{"searchAds":{"items":[
                {"id":12345,"area":48.0,"totalPrice":{"value":450000},
                 "pricePerSquareMeter":{"value":9375},"slug":"mieszkanie-ID12345"},
                {"id":99,"slug":"no-area-or-price"},
                {"id":777,"area":"52,5","totalPrice":{"value":520000},"slug":"comma-area"}
            ]}}}}}"#,
        ))
        .unwrap();

        let out = summaries(&doc, &base()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].site_id, 12345);
        assert_eq!(out[0].price, 450_000);
        assert_eq!(out[0].price_per_m, Some(9_375));
        assert_eq!(
            out[0].link,
            "https://www.otodom.pl/pl/oferta/mieszkanie-ID12345"
        );
        // comma decimal + derived price-per-m
        assert_eq!(out[1].area, 52.5);
        assert_eq!(out[1].price_per_m, Some(9_905));
    }

    #[test]
    fn summaries_missing_items_is_error() {
        let doc = next_data(&page(r#"{"props":{"pageProps":{}}}"#)).unwrap();
        assert!(matches!(
            summaries(&doc, &base()),
            Err(ExtractError::MissingField("searchAds.items"))
        ));
    }

    #[test]
    fn extracts_detail_record() {
        let doc = next_data(&page(
            r#"{"props":{"pageProps":{"ad":{
                "id":12345,
                "title":"Mieszkanie <b>2-pokojowe</b> 48m2",
                "market":"SECONDARY",
                "advertType":"AGENCY",
                "createdAt":"2024-03-01T09:30:00+01:00",
                "exclusiveOffer":false,
                "description":"<p>Przytulne mieszkanie</p>",
                "status":"ACTIVE",
                "slug":"mieszkanie-ID12345",
                "property":{"buildingProperties":{"heating":"URBAN"}},
                "characteristics":[
                    {"key":"price","localizedValue":"450 000"},
                    {"key":"building_ownership","localizedValue":"pełna własność"}
                ],
                "target":{
                    "Area":"48","Price":450000,"Price_per_m":9375,
                    "City":"katowice","Province":"slaskie",
                    "Floor_no":["floor_3"],"Rooms_num":["2"],
                    "Building_type":["block"],"Build_year":1978,
                    "Extras_types":["balcony","lift"]
                },
                "location":{
                    "address":{"street":{"name":"Kościuszki"}},
                    "reverseGeocoding":{"locations":[
                        {"locationLevel":"city","name":"Katowice"},
                        {"locationLevel":"district","name":"Koszutka"}
                    ]}
                },
                "images":[{"medium":"https://img.example/1.jpg"}],
                "links":{"videoUrl":"https://video.example/v"},
                "owner":{"id":42,"name":"Jan"},
                "agency":{"id":9,"name":"Biuro"}
            }}}}"#,
        ))
        .unwrap();

        let rec = detail(&doc, &base()).unwrap();
        assert_eq!(rec.site_id, Some(12345));
        assert_eq!(rec.title.as_deref(), Some("Mieszkanie 2-pokojowe 48m2"));
        assert_eq!(rec.market.as_deref(), Some("secondary"));
        assert_eq!(rec.heating.as_deref(), Some("urban"));
        assert_eq!(rec.ownership.as_deref(), Some("pełna własność"));
        assert_eq!(rec.area, Some(48.0));
        assert_eq!(rec.price, Some(450_000));
        assert_eq!(rec.floor.as_deref(), Some("floor_3"));
        assert_eq!(rec.rooms.as_deref(), Some("2"));
        assert_eq!(rec.extras_types.as_deref(), Some("balcony lift"));
        assert_eq!(rec.city.as_deref(), Some("katowice"));
        assert_eq!(rec.district.as_deref(), Some("Koszutka"));
        assert_eq!(rec.street.as_deref(), Some("Kościuszki"));
        assert_eq!(rec.description.as_deref(), Some("Przytulne mieszkanie"));
        assert_eq!(rec.image_urls, vec!["https://img.example/1.jpg"]);
        assert_eq!(rec.video_url.as_deref(), Some("https://video.example/v"));
        assert_eq!(rec.owner_id, Some(42));
        assert_eq!(rec.agency_name.as_deref(), Some("Biuro"));
        assert_eq!(rec.status.as_deref(), Some("active"));
        assert_eq!(
            rec.link.as_deref(),
            Some("https://www.otodom.pl/pl/oferta/mieszkanie-ID12345")
        );
    }

    #[test]
    fn status_absent_when_ad_has_none() {
        let doc = next_data(&page(r#"{"props":{"pageProps":{"ad":{"id":1}}}}"#)).unwrap();
        assert_eq!(status(&doc), None);

        let doc = next_data(&page(
            r#"{"props":{"pageProps":{"ad":{"id":1,"status":"removed_by_user"}}}}"#,
        ))
        .unwrap();
        assert_eq!(status(&doc).as_deref(), Some("removed_by_user"));
    }
}
