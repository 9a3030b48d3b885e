//! Schema-agnostic feed item normalization.
//!
//! Feeds disagree on shape: some carry vendor-namespaced `job_listing:*`
//! fields, some are Atom entries, some are barely RSS. Instead of runtime
//! type inspection, normalization is an ordered list of
//! (structural predicate, extractor) pairs — the first shape that matches
//! wins, and a generic fallback always matches last. `normalize` is pure
//! and total: it never fails and never touches network or storage.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value;
use url::Url;

use crate::models::JobRecord;

type SchemaPredicate = fn(&Value) -> bool;
type SchemaExtractor = fn(&Value, &str) -> JobRecord;

/// Matchers in priority order; the generic fallback matches anything.
const SCHEMAS: &[(SchemaPredicate, SchemaExtractor)] = &[
    (is_listing_item, extract_listing),
    (is_atom_entry, extract_atom_entry),
    (|_| true, extract_generic),
];

/// Convert one raw feed item into a canonical [`JobRecord`].
pub fn normalize(item: &Value, source_url: &str) -> JobRecord {
    for (matches, extract) in SCHEMAS {
        if matches(item) {
            return extract(item, source_url);
        }
    }
    unreachable!("generic fallback always matches")
}

// ---------------------------------------------------------------------------
// Schema predicates
// ---------------------------------------------------------------------------

fn is_listing_item(item: &Value) -> bool {
    !field_text(item, "title").is_empty() && !field_text(item, "description").is_empty()
}

fn is_atom_entry(item: &Value) -> bool {
    !field_text(item, "id").is_empty() && !field_text(item, "summary").is_empty()
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// Vendor job-listing RSS item: namespaced fields with plain-field and
/// literal-default fallbacks.
fn extract_listing(item: &Value, source_url: &str) -> JobRecord {
    JobRecord {
        title: field_text(item, "title"),
        company: first_text(item, &["job_listing:company", "company"])
            .unwrap_or_else(|| "Unknown".into()),
        location: first_text(item, &["job_listing:location", "location"])
            .unwrap_or_else(|| "Remote".into()),
        description: first_text(item, &["description", "content:encoded"]).unwrap_or_default(),
        salary: first_text(item, &["job_listing:salary", "salary"]),
        job_type: first_text(item, &["job_listing:job_type", "job_type"])
            .or_else(|| Some("full-time".into())),
        category: first_text(item, &["category"])
            .or_else(|| Some(category_from_url(source_url))),
        url: first_text(item, &["link", "guid"]).unwrap_or_default(),
        company_url: first_text(item, &["job_listing:company_website", "company_website"]),
        posted_date: first_date(item, &["pubDate", "published"]),
        expiry_date: first_date(item, &["job_listing:application_deadline"]),
        source: source_url.to_string(),
        source_id: first_text(item, &["guid", "id"]),
    }
}

/// Atom entry: author name becomes the company, location is scraped out of
/// the summary text when not explicit.
fn extract_atom_entry(item: &Value, source_url: &str) -> JobRecord {
    let description = first_text(item, &["summary", "content"]).unwrap_or_default();
    JobRecord {
        title: field_text(item, "title"),
        company: author_name(item).unwrap_or_else(|| "Unknown".into()),
        location: atom_location(item),
        description,
        salary: None,
        job_type: Some("full-time".into()),
        category: Some("higher-education".into()),
        url: extract_link(item.get("link")),
        company_url: None,
        posted_date: first_date(item, &["published", "updated"]),
        expiry_date: None,
        source: source_url.to_string(),
        source_id: first_text(item, &["id"]),
    }
}

/// Best-effort fallback for anything that matched neither known shape.
fn extract_generic(item: &Value, source_url: &str) -> JobRecord {
    let title = field_text(item, "title");
    JobRecord {
        title: if title.is_empty() { "Untitled".into() } else { title },
        company: "Unknown".into(),
        location: "Unknown".into(),
        description: field_text(item, "description"),
        salary: None,
        job_type: Some("full-time".into()),
        category: None,
        url: field_text(item, "link"),
        company_url: None,
        posted_date: None,
        expiry_date: None,
        source: source_url.to_string(),
        source_id: None,
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Unwrap the text payload of a raw value, whatever its representation:
/// plain string, `{"_": text}` / `{"#text": text}` wrappers produced by
/// XML-to-tree conversion, or any other stringifiable scalar. Always
/// trimmed; anything else yields an empty string.
pub fn extract_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Object(map) => {
            for key in ["_", "#text"] {
                if let Some(Value::String(s)) = map.get(key) {
                    return s.trim().to_string();
                }
            }
            String::new()
        }
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn field_text(item: &Value, key: &str) -> String {
    item.get(key).map(extract_text).unwrap_or_default()
}

/// First non-empty text among the given keys.
fn first_text(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .map(|k| field_text(item, k))
        .find(|t| !t.is_empty())
}

fn first_date(item: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter().find_map(|k| item.get(k).and_then(parse_date))
}

fn author_name(item: &Value) -> Option<String> {
    let name = item.get("author").and_then(|a| a.get("name"))?;
    let text = extract_text(name);
    (!text.is_empty()).then_some(text)
}

static LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Location[:\s]+([^<\n]+)").expect("valid regex"));

/// Atom feeds rarely carry a location field; scan the entry text for a
/// `Location:` marker as a best effort.
fn atom_location(item: &Value) -> String {
    if let Some(loc) = first_text(item, &["location"]) {
        return loc;
    }
    let text = first_text(item, &["summary", "content"]).unwrap_or_default();
    LOCATION_RE
        .captures(&text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| "Unknown".into())
}

/// Atom `link` comes as a bare string, a `{"$": {"href": ...}}` object, or
/// an array of those (prefer `rel="alternate"`).
fn extract_link(link: Option<&Value>) -> String {
    let Some(link) = link else {
        return String::new();
    };
    match link {
        Value::String(s) => s.trim().to_string(),
        Value::Array(links) => links
            .iter()
            .find(|l| link_rel(l) == Some("alternate"))
            .or_else(|| links.first())
            .map(|l| link_href(l))
            .unwrap_or_default(),
        _ => link_href(link),
    }
}

fn link_rel(link: &Value) -> Option<&str> {
    link.get("$")?.get("rel")?.as_str()
}

fn link_href(link: &Value) -> String {
    link.get("$")
        .and_then(|attrs| attrs.get("href"))
        .and_then(|h| h.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Derive a category from the feed URL's query string
/// (`job_categories=<v>` or `categories=<v>`), defaulting to "general".
pub fn category_from_url(source_url: &str) -> String {
    Url::parse(source_url)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == "job_categories" || k == "categories")
                .map(|(_, v)| v.into_owned())
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "general".into())
}

/// Display name for a feed URL: `<host> - <category>` when the URL carries
/// a category parameter, else the host, else the URL itself.
pub fn feed_name_from_url(source_url: &str) -> String {
    match Url::parse(source_url) {
        Ok(url) => {
            let host = url.host_str().unwrap_or(source_url).to_string();
            let category = category_from_url(source_url);
            if category == "general" {
                host
            } else {
                format!("{host} - {category}")
            }
        }
        Err(_) => source_url.to_string(),
    }
}

/// Permissive date parsing: RFC 2822 (RSS pubDate), RFC 3339 (Atom), then
/// common bare formats. An unparsable date is absent, not an error.
pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    let text = extract_text(value);
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(&text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    None
}
