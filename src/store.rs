//! CRUD record store over a [DhtClient] session.

use crate::common::{MalformedRecord, Record};
use crate::dht::{DhtClient, Error};

#[derive(thiserror::Error, Debug)]
/// Record store error enum.
pub enum StoreError {
    /// No record is stored under the requested key.
    #[error("Record not found")]
    NotFound,

    /// The stored record decoded (or projected) to zero fields.
    #[error("Record has no fields to return")]
    EmptyRecord,

    #[error(transparent)]
    /// The bytes under the key are not a validly encoded record.
    MalformedRecord(#[from] MalformedRecord),

    /// The record could not be encoded into a value blob.
    #[error("Failed to encode record: {0}")]
    EncodeRecord(#[from] serde_bencode::Error),

    #[error(transparent)]
    /// Transparent client error, carrying any backend code and message verbatim.
    Client(#[from] Error),

    /// Range scans need an ordered iteration primitive the hash table
    /// doesn't have.
    #[error("Scan is not supported")]
    Unsupported,
}

/// The CRUD contract over one [DhtClient] session: read with field
/// projection, insert, delete, and update as delete-then-insert.
///
/// The keyspace is flat; there are no tables or namespaces. The store holds
/// no cache: every operation is a round trip to the backend.
#[derive(Debug, Clone)]
pub struct RecordStore {
    client: DhtClient,
}

impl RecordStore {
    pub fn new(client: DhtClient) -> Self {
        Self { client }
    }

    /// Read the record stored under `key`, restricted to `fields` when
    /// non-empty.
    ///
    /// A record that decodes, or projects, down to zero fields is
    /// [StoreError::EmptyRecord], distinct from [StoreError::NotFound].
    pub fn read(&self, key: &[u8], fields: &[&str]) -> Result<Record, StoreError> {
        let blob = self.client.get(key)?.ok_or(StoreError::NotFound)?;

        let record = Record::from_bytes(&blob)?;
        let projected = record.project(fields);

        if projected.is_empty() {
            return Err(StoreError::EmptyRecord);
        }

        Ok(projected)
    }

    /// Store `record` under `key`, silently overwriting any previous record.
    pub fn insert(&self, key: &[u8], record: &Record) -> Result<(), StoreError> {
        let blob = record.to_bytes()?;

        self.client.put(key, blob.into())?;

        Ok(())
    }

    /// Remove the record under `key`. Removing an absent key succeeds.
    pub fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.client.remove(key)?;

        Ok(())
    }

    /// Replace the record under `key` with `record`, as a delete followed
    /// by an insert.
    ///
    /// Not atomic: a concurrent reader can observe the key absent between
    /// the two halves, and if the insert half fails the key stays deleted
    /// with the insert's error surfaced as-is.
    pub fn update(&self, key: &[u8], record: &Record) -> Result<(), StoreError> {
        self.delete(key)?;

        self.insert(key, record)
    }

    /// Range scans always fail with [StoreError::Unsupported]: the hash
    /// table has no ordered iteration primitive, and a secondary index is
    /// out of scope.
    pub fn scan(
        &self,
        _start_key: &[u8],
        _count: usize,
        _fields: &[&str],
    ) -> Result<Vec<Record>, StoreError> {
        Err(StoreError::Unsupported)
    }
}
