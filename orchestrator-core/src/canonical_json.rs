//! Canonical JSON encoding: sorted keys, ASCII escaping, compact separators.
//!
//! Used for request-hash computation (user-task / callback idempotency)
//! and for outbound service-task request bodies, so that two logically
//! identical payloads always produce byte-identical bytes.

use serde_json::Value;
use std::collections::BTreeMap;

/// Encode a `Value` as canonical JSON bytes: object keys sorted
/// lexicographically, non-ASCII characters `\uXXXX`-escaped, no
/// insignificant whitespace.
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out.into_bytes()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_escaped_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, val)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped_string(key, out);
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
    }
}

fn write_escaped_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || (c as u32) > 0x7e => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{:04x}", unit));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys() {
        let v = json!({"b": 1, "a": 2});
        assert_eq!(to_canonical_bytes(&v), br#"{"a":2,"b":1}"#);
    }

    #[test]
    fn escapes_non_ascii() {
        let v = json!({"name": "caf\u{e9}"});
        assert_eq!(to_canonical_bytes(&v), br#"{"name":"caf\u00e9"}"#);
    }

    #[test]
    fn is_deterministic() {
        let v = json!({"z": [1, 2, {"y": true, "x": null}], "a": "hi"});
        assert_eq!(to_canonical_bytes(&v), to_canonical_bytes(&v));
    }

    #[test]
    fn nested_objects_sort_recursively() {
        let v = json!({"outer": {"z": 1, "a": 2}});
        assert_eq!(to_canonical_bytes(&v), br#"{"outer":{"a":2,"z":1}}"#);
    }
}
