//! 🔍 RecordParser: one line in, zero or one `Document` out.
//!
//! 🧠 Knowledge graph:
//! - Input: raw bytes of one line, possibly still wearing its `\n` / `\r\n`.
//! - Empty line → nothing. Not an error, just a pause for breath.
//! - Not a JSON object → nothing. Dropped silently. Never counted anywhere.
//!   Not in the summary, not in a failure counter, not on anyone's conscience.
//! - JSON object → `Document`.
//!
//! 🦆 (the duck also ignores lines it does not understand. role model.)

use serde_json::Value;
use tracing::trace;

use crate::common::Document;

/// 📄 Decode one input line into a [`Document`].
///
/// Strips one trailing `\n`, then one trailing `\r`, the same way the line reader
/// left them. Invalid UTF-8 and non-object JSON (`[1,2]`, `"hi"`, `42`) are unusable.
pub fn parse_line(line: &[u8]) -> Option<Document> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    if line.is_empty() {
        return None;
    }

    // -- 🔍 serde_json validates UTF-8 on the way in, so garbage bytes fail here too
    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(fields)) => Some(Document::new(fields)),
        Ok(_) => {
            trace!("🗑️ line is valid JSON but not an object, skipping it");
            None
        }
        Err(err) => {
            trace!("🗑️ line is not JSON ({err}), skipping it");
            None
        }
    }
}
