//! Core data models shared by every stage of the pipeline.
//!
//! ```text
//! DocumentContent ──▶ Document ──▶ Chunk[] ──▶ Chunk.embedding ──▶ SearchResult
//!  (raw input)       (persisted)   (split)      (vectorised)        (ranked)
//! ```
//!
//! [`DocumentContent`] is the tagged shape of an ingested record: a closed
//! set of recognised text fields plus an ordered bag of everything else.
//! It serialises flat, so the persisted `content` object is the object that
//! was ingested.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields whose text is preferred for chunking and embedding, in order.
pub const PREFERRED_TEXT_FIELDS: [&str; 4] = ["description", "summary", "abstract", "text"];

/// Keys copied from a document's extra fields onto every chunk.
pub const CHUNK_ATTRIBUTE_KEYS: [&str; 6] = ["source", "date", "author", "url", "cve_id", "attack_id"];

/// Content of an ingested document.
///
/// Recognised fields are only lifted out of the raw object when they hold a
/// string; any other value stays in [`extra`](Self::extra) under its
/// original key so nothing is lost.
///
/// Content parsed from an object serialises back with the keys in their
/// input order. Fields set afterwards follow: recognised fields first, then
/// extra fields in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct DocumentContent {
    pub title: Option<String>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub r#abstract: Option<String>,
    pub text: Option<String>,
    /// Every other field, in insertion order.
    pub extra: IndexMap<String, Value>,
    /// Key order of the object this content was parsed from.
    order: Vec<String>,
}

const RECOGNISED_FIELDS: [&str; 5] = ["title", "description", "summary", "abstract", "text"];

impl DocumentContent {
    /// Build content from an arbitrary JSON value.
    ///
    /// Objects map field by field. Any other value is kept whole under the
    /// `text` slot (strings) or the `value` extra key.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::from(map),
            Value::String(s) => Self {
                text: Some(s),
                ..Default::default()
            },
            other => {
                let mut extra = IndexMap::new();
                extra.insert("value".to_string(), other);
                Self {
                    extra,
                    ..Default::default()
                }
            }
        }
    }

    /// Convenience constructor for plain titled text.
    pub fn titled(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// The flat JSON object this content serialises to.
    pub fn to_value(&self) -> Value {
        Value::Object(self.clone().into())
    }

    /// Field names in the order they serialise.
    pub fn keys(&self) -> Vec<&str> {
        let present = |k: &str| {
            self.extra.contains_key(k) || (RECOGNISED_FIELDS.contains(&k) && self.field(k).is_some())
        };
        let mut keys: Vec<&str> = Vec::new();
        let candidates = self
            .order
            .iter()
            .map(String::as_str)
            .chain(RECOGNISED_FIELDS)
            .chain(self.extra.keys().map(String::as_str));
        for key in candidates {
            if present(key) && !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Look up a recognised field by name.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "title" => self.title.as_deref(),
            "description" => self.description.as_deref(),
            "summary" => self.summary.as_deref(),
            "abstract" => self.r#abstract.as_deref(),
            "text" => self.text.as_deref(),
            _ => self.extra.get(name).and_then(Value::as_str),
        }
    }

    /// Extract the text used for chunking and embedding.
    ///
    /// Joins the non-empty preferred fields (`description`, `summary`,
    /// `abstract`, `text`) with blank lines. When none of them carries
    /// text, falls back to every other string field: the title first,
    /// then extra fields in insertion order. May return an empty string.
    pub fn extract_text(&self) -> String {
        let preferred: Vec<&str> = PREFERRED_TEXT_FIELDS
            .iter()
            .filter_map(|f| self.field(f))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if !preferred.is_empty() {
            return preferred.join("\n\n");
        }

        self.title
            .as_deref()
            .into_iter()
            .chain(self.extra.values().filter_map(Value::as_str))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Every string-valued field as `(name, value)`, recognised fields first.
    pub fn string_fields(&self) -> Vec<(&str, &str)> {
        let mut out = Vec::new();
        for name in RECOGNISED_FIELDS {
            if let Some(v) = self.field(name) {
                out.push((name, v));
            }
        }
        for (k, v) in &self.extra {
            if let Some(s) = v.as_str() {
                out.push((k.as_str(), s));
            }
        }
        out
    }
}

impl From<Map<String, Value>> for DocumentContent {
    fn from(map: Map<String, Value>) -> Self {
        let mut content = DocumentContent {
            order: map.keys().cloned().collect(),
            ..Default::default()
        };
        for (key, value) in map {
            let slot = match key.as_str() {
                "title" => Some(&mut content.title),
                "description" => Some(&mut content.description),
                "summary" => Some(&mut content.summary),
                "abstract" => Some(&mut content.r#abstract),
                "text" => Some(&mut content.text),
                _ => None,
            };
            match (slot, value) {
                (Some(slot), Value::String(s)) => *slot = Some(s),
                (_, value) => {
                    content.extra.insert(key, value);
                }
            }
        }
        content
    }
}

impl From<DocumentContent> for Map<String, Value> {
    fn from(content: DocumentContent) -> Self {
        let mut map = Map::new();
        for key in content.keys() {
            let value = match content.field(key) {
                Some(s) if RECOGNISED_FIELDS.contains(&key) => Value::String(s.to_string()),
                _ => content.extra.get(key).cloned().unwrap_or(Value::Null),
            };
            map.insert(key.to_string(), value);
        }
        map
    }
}

impl PartialEq for DocumentContent {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title
            && self.description == other.description
            && self.summary == other.summary
            && self.r#abstract == other.r#abstract
            && self.text == other.text
            && self.extra == other.extra
            && self.keys() == other.keys()
    }
}

/// A persisted document.
///
/// Immutable once stored; replacing one means delete and re-add.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_type: String,
    pub source_name: String,
    pub ingested_at: DateTime<Utc>,
    pub content: DocumentContent,
    /// Where the backing record lives (a file path or `memory://<id>`).
    pub storage_path: String,
}

/// Title and text of a chunk, plus attributes carried over from the parent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkContent {
    pub title: String,
    pub text: String,
    #[serde(flatten)]
    pub attributes: IndexMap<String, Value>,
}

/// A bounded-size fragment of a document's text.
///
/// Chunk ids are `"<doc_id>-<index>"`. Only `embedding` is ever attached
/// after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub original_doc_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub content: ChunkContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub original_document_path: String,
    pub source_type: String,
    pub source_name: String,
    pub ingested_at: DateTime<Utc>,
    /// SHA-256 of `content.text`.
    pub hash: String,
}

impl Chunk {
    pub fn text(&self) -> &str {
        &self.content.text
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }
}

/// A ranked vector search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    /// Cosine similarity in `[-1, 1]`.
    pub similarity: f32,
    pub chunk: Chunk,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_roundtrip_preserves_object() {
        let raw = json!({
            "cve_id": "CVE-2024-1234",
            "title": "SQL injection in login form",
            "description": "Unsanitised input reaches the query builder.",
            "severity": 9.8,
            "tags": ["web", "sqli"]
        });
        let content = DocumentContent::from_value(raw.clone());
        assert_eq!(content.title.as_deref(), Some("SQL injection in login form"));
        assert_eq!(content.extra.len(), 3);
        assert_eq!(
            serde_json::to_string(&content).unwrap(),
            serde_json::to_string(&raw).unwrap()
        );

        let encoded = serde_json::to_string(&content).unwrap();
        let decoded: DocumentContent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, content);
        assert_eq!(serde_json::to_string(&decoded).unwrap(), encoded);
    }

    #[test]
    fn test_key_order_follows_input() {
        let raw = r#"{"cve_id":"CVE-2024-1234","title":"t","severity":9.8}"#;
        let content: DocumentContent = serde_json::from_str(raw).unwrap();
        assert_eq!(content.keys(), vec!["cve_id", "title", "severity"]);
        assert_eq!(serde_json::to_string(&content).unwrap(), raw);
    }

    #[test]
    fn test_fields_set_later_follow_parsed_keys() {
        let mut content = DocumentContent::from_value(json!({"severity": 5, "title": "t"}));
        content.extra.insert("source".into(), json!("NVD"));
        content.description = Some("d".into());
        assert_eq!(content.keys(), vec!["severity", "title", "description", "source"]);

        let titled = DocumentContent::titled("a", "b");
        assert_eq!(serde_json::to_string(&titled).unwrap(), r#"{"title":"a","text":"b"}"#);
    }

    #[test]
    fn test_non_string_recognised_field_stays_in_extra() {
        let content = DocumentContent::from_value(json!({"title": 42, "text": "body"}));
        assert!(content.title.is_none());
        assert_eq!(content.extra.get("title"), Some(&json!(42)));
        assert_eq!(
            serde_json::to_string(&content).unwrap(),
            r#"{"title":42,"text":"body"}"#
        );
    }

    #[test]
    fn test_extract_text_prefers_fields_in_order() {
        let content = DocumentContent::from_value(json!({
            "text": "Body.",
            "title": "Ignored title",
            "summary": "Summary.",
            "description": "Description."
        }));
        assert_eq!(content.extract_text(), "Description.\n\nSummary.\n\nBody.");
    }

    #[test]
    fn test_extract_text_falls_back_to_string_fields() {
        let content = DocumentContent::from_value(json!({
            "title": "APT29 profile",
            "actor": "Cozy Bear",
            "confidence": 0.7,
            "description": "   "
        }));
        assert_eq!(content.extract_text(), "APT29 profile\n\nCozy Bear");
    }

    #[test]
    fn test_extract_text_empty() {
        let content = DocumentContent::from_value(json!({"score": 3}));
        assert_eq!(content.extract_text(), "");
    }

    #[test]
    fn test_string_content_becomes_text() {
        let content = DocumentContent::from_value(json!("plain report"));
        assert_eq!(content.text.as_deref(), Some("plain report"));
    }
}
