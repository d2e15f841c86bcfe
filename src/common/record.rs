//! Records: flat field-name to field-value maps, one blob per key.

use std::collections::BTreeMap;
use std::iter::FromIterator;

use serde::{Deserialize, Serialize};

/// A flat mapping from field names to field values, stored as a single
/// value blob under one key.
///
/// Field names within a record are unique. The stored form is a bencoded
/// dictionary, which is canonical (dictionary keys are sorted), so
/// `Record::from_bytes(&record.to_bytes()?)` returns the exact record that
/// was encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, String>,
}

#[derive(thiserror::Error, Debug)]
/// The bytes under a key are not a validly encoded record.
#[error("Failed to decode record bytes: {0}")]
pub struct MalformedRecord(#[from] serde_bencode::Error);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a stored value blob back into a record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Record, MalformedRecord> {
        Ok(serde_bencode::from_bytes(bytes)?)
    }

    /// Encode this record into its stored value blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }

    /// Set a field, replacing any previous value under the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|value| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Restrict this record to the given field names.
    ///
    /// An empty `fields` slice means "all fields". Requested names that the
    /// record doesn't have are simply not present in the result.
    pub fn project(&self, fields: &[&str]) -> Record {
        if fields.is_empty() {
            return self.clone();
        }

        Record {
            fields: self
                .fields
                .iter()
                .filter(|(name, _)| fields.contains(&name.as_str()))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Record {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Record {
            fields: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let record: Record = vec![("name", "Alice"), ("age", "30")].into_iter().collect();

        let bytes = record.to_bytes().unwrap();
        let decoded = Record::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, record);
    }

    #[test]
    fn round_trip_empty_value_and_unicode() {
        let record: Record = vec![("empty", ""), ("greeting", "مرحبا")]
            .into_iter()
            .collect();

        let bytes = record.to_bytes().unwrap();

        assert_eq!(Record::from_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn canonical_encoding() {
        let mut a = Record::new();
        a.set("x", "1").set("y", "2");

        let mut b = Record::new();
        b.set("y", "2").set("x", "1");

        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }

    #[test]
    fn stored_form() {
        let mut record = Record::new();
        record.set("age", "30").set("name", "Alice");

        assert_eq!(
            record.to_bytes().unwrap(),
            b"d3:age2:304:name5:Alicee".to_vec()
        );
    }

    #[test]
    fn malformed_bytes() {
        assert!(Record::from_bytes(b"not a record").is_err());
        assert!(Record::from_bytes(b"").is_err());
        // A bencoded list is structurally valid bencode but not a record.
        assert!(Record::from_bytes(b"l4:spame").is_err());
    }

    #[test]
    fn project() {
        let record: Record = vec![("name", "Alice"), ("age", "30")].into_iter().collect();

        let age_only = record.project(&["age"]);
        assert_eq!(age_only.len(), 1);
        assert_eq!(age_only.get("age"), Some("30"));
        assert_eq!(age_only.get("name"), None);

        // Empty projection means all fields.
        assert_eq!(record.project(&[]), record);

        // Unknown fields are dropped from the result.
        assert!(record.project(&["missing"]).is_empty());
    }
}
