//! Record normalization
//!
//! Strips fields from fetched item records that are server-only, duplicated by
//! the cache key, or unused when citations are rendered, and moves each item's
//! tags into a separate map so they can be stored on their own.

use serde_json::{Map, Value};

/// Top-level record fields that are dropped
const DROPPED_RECORD_FIELDS: [&str; 2] = ["version", "links"];

/// Fields of the nested library descriptor that are dropped
const DROPPED_LIBRARY_FIELDS: [&str; 3] = ["type", "name", "links"];

/// Fields of the nested `data` object that are dropped
pub const DROPPED_DATA_FIELDS: [&str; 31] = [
    "key",
    "version",
    "series",
    "seriesNumber",
    "seriesTitle",
    "seriesText",
    "publicationTitle",
    "journalAbbreviation",
    "issue",
    "volume",
    "numberOfVolumes",
    "edition",
    "place",
    "publisher",
    "pages",
    "numPages",
    "shortTitle",
    "accessDate",
    "archive",
    "archiveLocation",
    "libraryCatalog",
    "callNumber",
    "rights",
    "extra",
    "relations",
    "dateAdded",
    "websiteTitle",
    "websiteType",
    "inPublications",
    "presentationType",
    "meetingName",
];

/// Records with volatile fields removed, plus their tags keyed by item key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub records: Vec<Value>,
    pub tags: Map<String, Value>,
}

/// Parses an API body and normalizes the records in it
///
/// A body holding a single object is treated as a one-record array.
pub fn normalize(body: &[u8]) -> Result<Normalized, serde_json::Error> {
    let parsed: Value = serde_json::from_slice(body)?;
    let records = match parsed {
        Value::Array(records) => records,
        single => vec![single],
    };
    Ok(normalize_records(records))
}

/// Normalizes already-parsed records
pub fn normalize_records(mut records: Vec<Value>) -> Normalized {
    let mut tags = Map::new();
    for record in &mut records {
        if let Value::Object(fields) = record {
            strip_record(fields, &mut tags);
        }
    }
    Normalized { records, tags }
}

fn strip_record(record: &mut Map<String, Value>, tags: &mut Map<String, Value>) {
    for field in DROPPED_RECORD_FIELDS {
        record.remove(field);
    }

    if let Some(Value::Object(library)) = record.get_mut("library") {
        for field in DROPPED_LIBRARY_FIELDS {
            library.remove(field);
        }
    }

    let item_key = record
        .get("key")
        .and_then(Value::as_str)
        .map(str::to_string);
    if let Some(key) = &item_key {
        tags.insert(key.clone(), Value::String(String::new()));
    }

    if let Some(Value::Object(data)) = record.get_mut("data") {
        for field in DROPPED_DATA_FIELDS {
            data.remove(field);
        }
        if let Some(item_tags) = data.remove("tags") {
            tags.insert(item_key.unwrap_or_default(), item_tags);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_item() -> Value {
        json!({
            "key": "ABCD2345",
            "version": 1203,
            "links": {"self": {"href": "https://api.example.org/users/1/items/ABCD2345"}},
            "library": {
                "type": "user",
                "id": 1,
                "name": "someone",
                "links": {"alternate": {"href": "https://example.org/someone"}}
            },
            "meta": {"creatorSummary": "Smith", "parsedDate": "2019"},
            "data": {
                "key": "ABCD2345",
                "version": 1203,
                "itemType": "journalArticle",
                "title": "On Caching",
                "creators": [{"creatorType": "author", "lastName": "Smith"}],
                "publicationTitle": "Journal of Caches",
                "volume": "4",
                "pages": "1-10",
                "extra": "notes",
                "dateAdded": "2019-01-01T00:00:00Z",
                "date": "2019",
                "url": "https://example.org/article",
                "tags": [{"tag": "caching"}, {"tag": "http", "type": 1}]
            }
        })
    }

    #[test]
    fn test_drops_volatile_top_level_fields() {
        let normalized = normalize_records(vec![sample_item()]);
        let record = &normalized.records[0];

        assert!(record.get("version").is_none());
        assert!(record.get("links").is_none());
        assert_eq!(record["key"], "ABCD2345");
        assert_eq!(record["meta"]["creatorSummary"], "Smith");
    }

    #[test]
    fn test_drops_library_descriptor_fields() {
        let normalized = normalize_records(vec![sample_item()]);
        let library = normalized.records[0]["library"].as_object().unwrap();

        assert_eq!(library.len(), 1);
        assert_eq!(library["id"], 1);
    }

    #[test]
    fn test_drops_named_data_fields_and_keeps_the_rest() {
        let normalized = normalize_records(vec![sample_item()]);
        let data = normalized.records[0]["data"].as_object().unwrap();

        for field in DROPPED_DATA_FIELDS {
            assert!(!data.contains_key(field), "{} should be dropped", field);
        }
        assert_eq!(data["title"], "On Caching");
        assert_eq!(data["date"], "2019");
        assert_eq!(data["url"], "https://example.org/article");
        assert!(data.contains_key("creators"));
    }

    #[test]
    fn test_tags_are_moved_into_tag_map() {
        let normalized = normalize_records(vec![sample_item()]);

        assert!(normalized.records[0]["data"].get("tags").is_none());
        assert_eq!(
            normalized.tags["ABCD2345"],
            json!([{"tag": "caching"}, {"tag": "http", "type": 1}])
        );
    }

    #[test]
    fn test_item_without_tags_gets_empty_entry() {
        let item = json!({"key": "NOTAGS11", "data": {"title": "Untagged"}});
        let normalized = normalize_records(vec![item]);

        assert_eq!(normalized.tags["NOTAGS11"], json!(""));
    }

    #[test]
    fn test_tags_without_item_key_use_empty_key() {
        let item = json!({"data": {"title": "Keyless", "tags": [{"tag": "orphan"}]}});
        let normalized = normalize_records(vec![item]);

        assert_eq!(normalized.tags[""], json!([{"tag": "orphan"}]));
    }

    #[test]
    fn test_single_object_body_becomes_array() {
        let body = serde_json::to_vec(&sample_item()).unwrap();
        let normalized = normalize(&body).unwrap();

        assert_eq!(normalized.records.len(), 1);
        assert_eq!(normalized.records[0]["key"], "ABCD2345");
    }

    #[test]
    fn test_array_body_keeps_order() {
        let body = br#"[{"key":"A","data":{}},{"key":"B","data":{}},{"key":"C","data":{}}]"#;
        let normalized = normalize(body).unwrap();

        let keys: Vec<&str> = normalized
            .records
            .iter()
            .map(|r| r["key"].as_str().unwrap())
            .collect();
        assert_eq!(keys, vec!["A", "B", "C"]);
        assert_eq!(normalized.tags.len(), 3);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(normalize(b"TY  - JOUR\nER  -").is_err());
    }
}
