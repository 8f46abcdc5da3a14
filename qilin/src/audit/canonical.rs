use serde_json::Value;

/// Render a JSON value to its canonical byte representation.
///
/// Canonical form: object keys sorted lexicographically, all non-ASCII and control characters
/// escaped as `\uXXXX`, no insignificant whitespace. Decimal-valued fields serialise as JSON
/// strings upstream (rust_decimal default), so no float formatting variance can reach the hash.
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Sort explicitly rather than relying on the map implementation
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key]);
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c if c.is_ascii() => out.push(c),
            c => {
                let mut buffer = [0u16; 2];
                for unit in c.encode_utf16(&mut buffer) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted_and_compact() {
        let value = json!({"b": 1, "a": {"d": [1, 2], "c": null}});
        assert_eq!(
            to_canonical_string(&value),
            r#"{"a":{"c":null,"d":[1,2]},"b":1}"#
        );
    }

    #[test]
    fn test_non_ascii_escaped() {
        let value = json!({"symbol": "螺纹钢"});
        assert_eq!(
            to_canonical_string(&value),
            "{\"symbol\":\"\\u87ba\\u7eb9\\u94a2\"}"
        );
    }

    #[test]
    fn test_control_and_quote_escapes() {
        let value = json!({"m": "a\"b\\c\nd"});
        assert_eq!(to_canonical_string(&value), r#"{"m":"a\"b\\c\nd"}"#);
    }

    #[test]
    fn test_identical_values_identical_bytes() {
        let a = json!({"x": "1.50", "y": ["p", "q"]});
        let b = serde_json::from_str::<Value>(r#"{"y": ["p", "q"], "x": "1.50"}"#).unwrap();
        assert_eq!(to_canonical_string(&a), to_canonical_string(&b));
    }
}
