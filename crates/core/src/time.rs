use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Parse RFC 3339, or a naive ISO-8601 timestamp read as UTC.  Blank or
/// unrecognised input yields `None`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Serde adapter for optional timestamps written by other tools.  Accepts
/// null, empty strings and naive timestamps; an unparsable value loads as
/// `None` instead of failing the whole document.
///
/// ```ignore
/// #[serde(default, deserialize_with = "lenient_timestamp")]
/// last_run: Option<DateTime<Utc>>,
/// ```
pub fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Doc {
        #[serde(default, deserialize_with = "lenient_timestamp")]
        at: Option<DateTime<Utc>>,
    }

    #[test]
    fn parses_offset_and_naive_forms() {
        let offset = parse_timestamp("2025-06-01T12:00:00+02:00").unwrap();
        let naive = parse_timestamp("2025-06-01T10:00:00.000001").unwrap();
        assert_eq!(offset.to_rfc3339(), "2025-06-01T10:00:00+00:00");
        assert_eq!((naive - offset).num_microseconds(), Some(1));
        assert!(parse_timestamp("  ").is_none());
        assert!(parse_timestamp("last tuesday").is_none());
    }

    #[test]
    fn lenient_field_tolerates_junk() {
        let doc: Doc = serde_json::from_str(r#"{"at": "2025-06-01T10:00:00"}"#).unwrap();
        assert!(doc.at.is_some());
        let doc: Doc = serde_json::from_str(r#"{"at": ""}"#).unwrap();
        assert!(doc.at.is_none());
        let doc: Doc = serde_json::from_str(r#"{"at": null}"#).unwrap();
        assert!(doc.at.is_none());
        let doc: Doc = serde_json::from_str(r#"{}"#).unwrap();
        assert!(doc.at.is_none());
    }
}
