//! Canonical news-item payload (v1) validation.
//!
//! Every fetcher, whatever it scrapes, hands the pipeline this one payload
//! shape. Validation here is purely structural: it checks presence and types
//! and reports the offending field path, but never canonicalizes URLs or
//! hashes content. That happens downstream.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ValidationError;

pub const PAYLOAD_VERSION: &str = "v1";

/// Body fields probed, in order, when the normalizer extracts article text.
const BODY_FIELDS: &[&str] = &["body_text", "text", "content", "summary", "description"];

/// A validated canonical news item. Borrowless view of the interesting
/// fields; the raw JSON is what the ledger persists.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalItem {
    pub source: String,
    pub source_item_id: String,
    pub title: String,
    pub collection: String,
    pub canonical_url: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub job_name: Option<String>,
    pub job_run_id: Option<String>,
    pub scraped_at: Option<DateTime<Utc>>,
    pub kind: Option<String>,
    pub item_uuid: Option<Uuid>,
    pub scrape_run_uuid: Option<Uuid>,
}

impl CanonicalItem {
    /// Validate a raw payload. Returns the typed item or the first violation
    /// with its field path.
    pub fn validate(payload: &Value) -> Result<Self, ValidationError> {
        let obj = payload
            .as_object()
            .ok_or_else(|| ValidationError::new("", "payload must be a JSON object"))?;

        let version = required_string(obj, "payload_version")?;
        if version != PAYLOAD_VERSION {
            return Err(ValidationError::new(
                "payload_version",
                format!("expected \"{PAYLOAD_VERSION}\", got \"{version}\""),
            ));
        }

        let source = required_string(obj, "source")?;
        let source_item_id = required_string(obj, "source_item_id")?;
        let title = required_string(obj, "title")?;

        let meta = obj
            .get("source_metadata")
            .ok_or_else(|| ValidationError::new("source_metadata", "missing required field"))?
            .as_object()
            .ok_or_else(|| ValidationError::new("source_metadata", "must be an object"))?;

        let collection = match meta.get("collection") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_lowercase(),
            Some(Value::String(_)) => {
                return Err(ValidationError::new(
                    "source_metadata.collection",
                    "must be non-empty",
                ))
            }
            Some(_) => {
                return Err(ValidationError::new(
                    "source_metadata.collection",
                    "must be a string",
                ))
            }
            None => {
                return Err(ValidationError::new(
                    "source_metadata.collection",
                    "missing required field",
                ))
            }
        };

        Ok(Self {
            source,
            source_item_id,
            title,
            collection,
            canonical_url: optional_string(obj, "canonical_url")?,
            url: optional_string(obj, "url")?,
            published_at: optional_timestamp(obj, "published_at")?,
            job_name: optional_string_in(meta, "source_metadata", "job_name")?,
            job_run_id: optional_string_in(meta, "source_metadata", "job_run_id")?,
            scraped_at: optional_timestamp_in(meta, "source_metadata", "scraped_at")?,
            kind: optional_string_in(meta, "source_metadata", "kind")?,
            item_uuid: optional_uuid_in(meta, "source_metadata", "item_uuid")?,
            scrape_run_uuid: optional_uuid_in(meta, "source_metadata", "scrape_run_uuid")?,
        })
    }

    /// The URL to fall back to when the payload carries no `canonical_url`.
    pub fn source_item_url(&self) -> Option<&str> {
        self.canonical_url.as_deref().or(self.url.as_deref())
    }

    /// Extract the article body from the raw payload, probing the known body
    /// fields in order. `None` when no body field is present.
    pub fn body_text(payload: &Value) -> Option<&str> {
        let obj = payload.as_object()?;
        BODY_FIELDS
            .iter()
            .find_map(|field| obj.get(*field).and_then(Value::as_str))
            .filter(|s| !s.trim().is_empty())
    }
}

fn required_string(
    obj: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<String, ValidationError> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(ValidationError::new(field, "must be non-empty")),
        Some(_) => Err(ValidationError::new(field, "must be a string")),
        None => Err(ValidationError::new(field, "missing required field")),
    }
}

fn optional_string(
    obj: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Option<String>, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ValidationError::new(field, "must be a string")),
    }
}

fn optional_string_in(
    obj: &serde_json::Map<String, Value>,
    parent: &str,
    field: &str,
) -> Result<Option<String>, ValidationError> {
    optional_string(obj, field).map_err(|e| ValidationError {
        path: format!("{parent}.{field}"),
        reason: e.reason,
    })
}

fn optional_timestamp(
    obj: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| ValidationError::new(field, "must be an RFC 3339 timestamp")),
        Some(_) => Err(ValidationError::new(field, "must be an RFC 3339 timestamp")),
    }
}

fn optional_timestamp_in(
    obj: &serde_json::Map<String, Value>,
    parent: &str,
    field: &str,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    optional_timestamp(obj, field).map_err(|e| ValidationError {
        path: format!("{parent}.{field}"),
        reason: e.reason,
    })
}

fn optional_uuid_in(
    obj: &serde_json::Map<String, Value>,
    parent: &str,
    field: &str,
) -> Result<Option<Uuid>, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Uuid::parse_str(s)
            .map(Some)
            .map_err(|_| ValidationError::new(format!("{parent}.{field}"), "must be a UUID")),
        Some(_) => Err(ValidationError::new(
            format!("{parent}.{field}"),
            "must be a UUID",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_payload() -> Value {
        json!({
            "payload_version": "v1",
            "source": "hn",
            "source_item_id": "12345",
            "title": "Acme buys Widget Co",
            "canonical_url": "https://example.com/post",
            "published_at": "2026-07-01T12:00:00Z",
            "body_text": "Acme announced the acquisition today.",
            "source_metadata": {
                "collection": "Tech",
                "job_name": "hn-front",
                "kind": "story"
            }
        })
    }

    #[test]
    fn valid_payload_passes() {
        let item = CanonicalItem::validate(&valid_payload()).unwrap();
        assert_eq!(item.source, "hn");
        assert_eq!(item.source_item_id, "12345");
        assert_eq!(item.title, "Acme buys Widget Co");
        assert_eq!(item.collection, "tech", "collection is lowercased");
        assert_eq!(item.canonical_url.as_deref(), Some("https://example.com/post"));
        assert!(item.published_at.is_some());
        assert_eq!(item.job_name.as_deref(), Some("hn-front"));
    }

    #[test]
    fn missing_source_fails_with_path() {
        let mut p = valid_payload();
        p.as_object_mut().unwrap().remove("source");
        let err = CanonicalItem::validate(&p).unwrap_err();
        assert_eq!(err.path, "source");
    }

    #[test]
    fn empty_title_fails() {
        let mut p = valid_payload();
        p["title"] = json!("   ");
        let err = CanonicalItem::validate(&p).unwrap_err();
        assert_eq!(err.path, "title");
    }

    #[test]
    fn wrong_version_fails() {
        let mut p = valid_payload();
        p["payload_version"] = json!("v2");
        let err = CanonicalItem::validate(&p).unwrap_err();
        assert_eq!(err.path, "payload_version");
    }

    #[test]
    fn missing_collection_fails_with_nested_path() {
        let mut p = valid_payload();
        p["source_metadata"].as_object_mut().unwrap().remove("collection");
        let err = CanonicalItem::validate(&p).unwrap_err();
        assert_eq!(err.path, "source_metadata.collection");
    }

    #[test]
    fn missing_source_metadata_fails() {
        let mut p = valid_payload();
        p.as_object_mut().unwrap().remove("source_metadata");
        let err = CanonicalItem::validate(&p).unwrap_err();
        assert_eq!(err.path, "source_metadata");
    }

    #[test]
    fn bad_published_at_fails() {
        let mut p = valid_payload();
        p["published_at"] = json!("yesterday");
        let err = CanonicalItem::validate(&p).unwrap_err();
        assert_eq!(err.path, "published_at");
    }

    #[test]
    fn published_at_normalized_to_utc() {
        let mut p = valid_payload();
        p["published_at"] = json!("2026-07-01T14:00:00+02:00");
        let item = CanonicalItem::validate(&p).unwrap();
        assert_eq!(
            item.published_at.unwrap(),
            "2026-07-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn non_object_payload_fails() {
        let err = CanonicalItem::validate(&json!([1, 2, 3])).unwrap_err();
        assert!(err.reason.contains("object"));
    }

    #[test]
    fn body_text_probes_fields_in_order() {
        let p = json!({"text": "from text", "content": "from content"});
        assert_eq!(CanonicalItem::body_text(&p), Some("from text"));
        let p = json!({"description": "only description"});
        assert_eq!(CanonicalItem::body_text(&p), Some("only description"));
        let p = json!({"other": "x"});
        assert_eq!(CanonicalItem::body_text(&p), None);
    }

    #[test]
    fn blank_body_field_skipped() {
        let p = json!({"body_text": "  ", "content": "real body"});
        assert_eq!(CanonicalItem::body_text(&p), Some("real body"));
    }

    #[test]
    fn validation_is_structural_only() {
        // A messy URL passes validation untouched; canonicalization is not
        // the validator's job.
        let mut p = valid_payload();
        p["canonical_url"] = json!("HTTPS://Example.COM/Post/?utm_source=x");
        let item = CanonicalItem::validate(&p).unwrap();
        assert_eq!(
            item.canonical_url.as_deref(),
            Some("HTTPS://Example.COM/Post/?utm_source=x")
        );
    }
}
