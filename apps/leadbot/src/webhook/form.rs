//! Flattening of webhook bodies into key-path/value pairs.
//!
//! The CRM posts `application/x-www-form-urlencoded` bodies with bracketed keys
//! (`message[add][0][author][name]=Ana`). JSON senders use the same nested
//! shape. Both reduce to a `FieldBag` so one set of mapping tables serves both.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::webhook::normalizer::NormalizeError;

pub type KeyPath = Vec<String>;

/// Flat bag of `path -> value`. Later duplicates of a key win.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FieldBag {
    entries: BTreeMap<KeyPath, String>,
}

impl FieldBag {
    pub fn from_form(body: &[u8]) -> Result<Self, NormalizeError> {
        let mut bag = FieldBag::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            let path = parse_key_path(&key)?;
            bag.entries.insert(path, value.into_owned());
        }
        Ok(bag)
    }

    pub fn from_json(body: &[u8]) -> Result<Self, NormalizeError> {
        let root: Value = serde_json::from_slice(body)
            .map_err(|e| NormalizeError::InvalidJson(e.to_string()))?;
        if !root.is_object() {
            return Err(NormalizeError::InvalidJson(
                "top-level value must be an object".to_string(),
            ));
        }
        let mut bag = FieldBag::default();
        flatten_json(&root, &mut Vec::new(), &mut bag.entries);
        Ok(bag)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeyPath, &String)> {
        self.entries.iter()
    }

    #[cfg(test)]
    pub fn get(&self, path: &[&str]) -> Option<&str> {
        let key: KeyPath = path.iter().map(|s| s.to_string()).collect();
        self.entries.get(&key).map(String::as_str)
    }
}

/// Splits `leads[status][0][id]` into `["leads", "status", "0", "id"]`.
pub fn parse_key_path(key: &str) -> Result<KeyPath, NormalizeError> {
    let malformed = || NormalizeError::MalformedKey(key.to_string());

    let (head, mut rest) = match key.find('[') {
        Some(i) => (&key[..i], &key[i..]),
        None => (key, ""),
    };
    if head.is_empty() {
        return Err(malformed());
    }

    let mut segments = vec![head.to_string()];
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[').ok_or_else(malformed)?;
        let end = inner.find(']').ok_or_else(malformed)?;
        let segment = &inner[..end];
        if segment.is_empty() || segment.contains('[') {
            return Err(malformed());
        }
        segments.push(segment.to_string());
        rest = &inner[end + 1..];
    }
    Ok(segments)
}

fn flatten_json(value: &Value, prefix: &mut KeyPath, out: &mut BTreeMap<KeyPath, String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                prefix.push(k.clone());
                flatten_json(v, prefix, out);
                prefix.pop();
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                prefix.push(i.to_string());
                flatten_json(v, prefix, out);
                prefix.pop();
            }
        }
        Value::String(s) => {
            out.insert(prefix.clone(), s.clone());
        }
        Value::Number(n) => {
            out.insert(prefix.clone(), n.to_string());
        }
        Value::Bool(b) => {
            out.insert(prefix.clone(), b.to_string());
        }
        Value::Null => {}
    }
}
