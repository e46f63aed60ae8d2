//! `FormData` bodies and the clonable mapping they travel as.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Field mapping sent in the `formData` slot of a `fetch` message.
///
/// Keeps insertion order so the rebuilt form lists fields as the caller
/// appended them.
pub type FormFields = IndexMap<String, FormValue>;

/// File part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBlob {
    pub name: String,
    #[serde(rename = "type", default)]
    pub content_type: String,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub data: Vec<u8>,
}

impl FileBlob {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }
}

/// Value of one form entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormValue {
    Text(String),
    File(FileBlob),
}

impl From<&str> for FormValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FormValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<FileBlob> for FormValue {
    fn from(value: FileBlob) -> Self {
        Self::File(value)
    }
}

/// Ordered multipart form body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    entries: Vec<(String, FormValue)>,
}

impl FormData {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry, keeping earlier entries with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<FormValue>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Builder form of [`append`](Self::append).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FormValue>) -> Self {
        self.append(name, value);
        self
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &FormValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// First value appended under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain into the clonable mapping, preserving entry order.
    ///
    /// A repeated name collapses to one field at its first position,
    /// holding the last value appended under it.
    #[must_use]
    pub fn to_fields(&self) -> FormFields {
        self.entries.iter().cloned().collect()
    }

    /// Rebuild a form from a received mapping, one entry per field.
    #[must_use]
    pub fn from_fields(fields: FormFields) -> Self {
        Self {
            entries: fields.into_iter().collect(),
        }
    }
}

impl<K: Into<String>, V: Into<FormValue>> FromIterator<(K, V)> for FormData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_fields_carry_text_and_files() {
        let form = FormData::new()
            .with("purpose", "upload")
            .with("file", FileBlob::new("a.txt", "text/plain", b"hello".to_vec()));

        let value = serde_json::to_value(form.to_fields()).unwrap();

        assert_eq!(
            value,
            json!({
                "purpose": "upload",
                "file": { "name": "a.txt", "type": "text/plain", "data": "aGVsbG8=" }
            })
        );
    }

    #[test]
    fn test_from_fields_reconstructs_entries() {
        let form = FormData::new()
            .with("a", "1")
            .with("b", FileBlob::new("b.bin", "application/octet-stream", vec![0, 1, 2]));

        let wire = serde_json::to_value(form.to_fields()).unwrap();
        let fields: FormFields = serde_json::from_value(wire).unwrap();
        let rebuilt = FormData::from_fields(fields);

        assert_eq!(rebuilt, form);
    }

    #[test]
    fn test_repeated_name_keeps_last_value() {
        let form = FormData::new().with("tag", "first").with("tag", "second");

        assert_eq!(form.len(), 2);
        assert_eq!(form.get("tag"), Some(&FormValue::from("first")));
        assert_eq!(
            form.to_fields().get("tag"),
            Some(&FormValue::from("second"))
        );
    }

    #[test]
    fn test_fields_keep_insertion_order() {
        let form = FormData::new()
            .with("key", "uploads/a.txt")
            .with("policy", "eyJ9")
            .with("file", FileBlob::new("a.txt", "text/plain", b"hi".to_vec()));

        let wire = serde_json::to_string(&form.to_fields()).unwrap();
        let fields: FormFields = serde_json::from_str(&wire).unwrap();
        let names: Vec<&str> = fields.keys().map(String::as_str).collect();

        assert_eq!(names, vec!["key", "policy", "file"]);
        assert!(wire.find("\"policy\"").unwrap() < wire.find("\"file\"").unwrap());
    }

    #[test]
    fn test_repeated_name_keeps_first_position() {
        let form = FormData::new()
            .with("tag", "first")
            .with("file", "x")
            .with("tag", "second");

        let rebuilt = FormData::from_fields(form.to_fields());
        let entries: Vec<(&str, &FormValue)> = rebuilt.entries().collect();

        assert_eq!(
            entries,
            vec![("tag", &FormValue::from("second")), ("file", &FormValue::from("x"))]
        );
    }
}
