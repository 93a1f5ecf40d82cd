//! Line-delimited JSON reading.

use serde_json::{Map, Value};

/// Lines longer than this are skipped instead of parsed.
pub const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/// JSON object records read from a JSONL buffer.
#[derive(Debug, Default)]
pub struct JsonLines {
    pub records: Vec<Map<String, Value>>,
    /// Non-blank lines that were not a JSON object (including a truncated
    /// final line from a file still being written).
    pub malformed: usize,
}

/// Split `bytes` on newlines and parse every non-blank line as a JSON object.
pub fn read_json_lines(bytes: &[u8]) -> JsonLines {
    let mut out = JsonLines::default();

    for line in bytes.split(|b| *b == b'\n') {
        let line = line.trim_ascii();
        if line.is_empty() {
            continue;
        }
        if line.len() > MAX_LINE_BYTES {
            out.malformed += 1;
            continue;
        }
        match serde_json::from_slice::<Value>(line) {
            Ok(Value::Object(map)) => out.records.push(map),
            _ => out.malformed += 1,
        }
    }

    out
}
