//! 📦 Common data structures: the building blocks of couchload
//!
//! 🎬 COLD OPEN. INT. TERMINAL, 2:13 AM
//!
//! Somebody piped a 40GB file into stdin. The file has one JSON object per line.
//! Most lines are fine. Some lines are `not json`. Nobody knows who wrote those.
//! The `Document`s don't care. They just want to go home to the couch. 🛋️
//!
//! 🧠 Knowledge graph:
//! - `Document`: one parsed line. A JSON object, key order preserved, immutable.
//! - `Batch`: 1..=B documents, sealed by the `Batcher`, owned by whichever worker pulled it.
//! - `DocResult`: what the store said about one document in a bulk call.
//! - `BulkWriteReply`: what the client hands back for one call (status + per-doc results).
//! - `WriteOutcome`: a reply plus the latency the worker measured. Consumed once by the aggregator.
//!
//! 🦆

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 📄 One document, freshly hatched from exactly one input line.
///
/// A thin wrapper around a JSON object. `serde_json` is built with `preserve_order`,
/// so keys come out in the same order they went in. The couch appreciates consistency.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// 🔑 The `_id`, if the line brought one along. CouchDB mints one otherwise.
    pub fn id(&self) -> Option<&str> {
        self.0.get("_id").and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// 📦 A sealed batch: the unit of one `_bulk_docs` call.
///
/// Once sealed it is never touched again. The `Batcher` hands over owned storage,
/// not a view into its working buffer, so the producer can scribble on the next
/// batch while this one is still in flight.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    docs: Vec<Document>,
}

impl Batch {
    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs }
    }

    pub fn docs(&self) -> &[Document] {
        &self.docs
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// 🧾 The store's verdict on a single document.
///
/// CouchDB answers `{"ok":true,"id":"..","rev":".."}` for the winners and
/// `{"id":"..","error":"conflict","reason":".."}` for the rest. One struct covers both moods.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct DocResult {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub rev: Option<String>,
    /// 💀 The error category (`conflict`, `forbidden`, ...). `None` means the doc landed.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl DocResult {
    pub fn success(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn failure(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            error: Some(category.into()),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// 📡 What a `BulkWriteClient` returns for one successful call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkWriteReply {
    pub status_code: u16,
    pub results: Vec<DocResult>,
}

/// 📊 One bulk call, fully accounted for: status, wall-clock latency, per-doc results.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub status_code: u16,
    pub latency: Duration,
    pub results: Vec<DocResult>,
}

impl WriteOutcome {
    pub fn from_reply(reply: BulkWriteReply, latency: Duration) -> Self {
        Self {
            status_code: reply.status_code,
            latency,
            results: reply.results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_a_conflict_item_deserializes_as_a_failure() {
        let results: Vec<DocResult> = serde_json::from_value(json!([
            {"ok": true, "id": "a", "rev": "1-abc"},
            {"id": "b", "error": "conflict", "reason": "Document update conflict."}
        ]))
        .expect("💀 CouchDB bulk reply should deserialize");

        assert!(results[0].is_success());
        assert!(!results[1].is_success());
        assert_eq!(results[1].error.as_deref(), Some("conflict"));
    }

    #[test]
    fn the_one_where_documents_keep_their_key_order() {
        let fields = match json!({"zebra": 1, "apple": 2, "_id": "x"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let doc = Document::new(fields);
        assert_eq!(doc.id(), Some("x"));
        assert_eq!(
            serde_json::to_string(&doc).expect("💀 serialize"),
            r#"{"zebra":1,"apple":2,"_id":"x"}"#
        );
    }
}
