//! Query string decoding into a nested parameter bag.
//!
//! `filter[books][title]=foo&filter[id][]=1&filter[id][]=2&sort=-id` becomes
//!
//! ```json
//! { "filter": { "books": { "title": "foo" }, "id": ["1", "2"] }, "sort": "-id" }
//! ```

use serde_json::{Map, Value};

/// Decode a URL query string into nested JSON parameters.
///
/// `key[a][b]` nests into maps, a trailing `[]` appends to an array. Later
/// assignments to the same scalar key win. Malformed percent escapes are kept
/// as literal text.
pub fn parse_query_string(query: &str) -> Value {
    let mut root = Map::new();
    let query = query.strip_prefix('?').unwrap_or(query);

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode(raw_key);
        let value = decode(raw_value);

        let path = key_path(&key);
        if path.first().is_some_and(|p| !p.is_empty()) {
            insert(&mut root, &path, value);
        }
    }

    Value::Object(root)
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|v| v.into_owned())
        .unwrap_or(spaced)
}

/// Split `filter[books][title]` into `["filter", "books", "title"]`.
fn key_path(key: &str) -> Vec<&str> {
    let Some(open) = key.find('[') else {
        return vec![key];
    };

    let mut path = vec![&key[..open]];
    let mut rest = &key[open..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let Some(close) = stripped.find(']') else {
            break;
        };
        path.push(&stripped[..close]);
        rest = &stripped[close + 1..];
    }
    path
}

fn insert(target: &mut Map<String, Value>, path: &[&str], value: String) {
    let Some((head, tail)) = path.split_first() else {
        return;
    };

    match tail.first() {
        None => {
            target.insert((*head).to_string(), Value::String(value));
        }
        Some(&"") => {
            let entry = target
                .entry((*head).to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !entry.is_array() {
                *entry = Value::Array(Vec::new());
            }
            if let Value::Array(items) = entry {
                items.push(Value::String(value));
            }
        }
        Some(_) => {
            let entry = target
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(nested) = entry {
                insert(nested, tail, value);
            }
        }
    }
}
