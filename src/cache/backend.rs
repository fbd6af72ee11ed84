//! Storage contract for cache rows
//!
//! A [`CacheBackend`] persists [`CacheRow`]s keyed by `(request_id, api_user_id)`.
//! Backends must upsert (insert or replace on conflict) and are expected to make
//! each individual call atomic; no multi-call transactions are used.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::CacheError;

/// One stored response, bodies still compressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRow {
    /// Hash of the canonical address
    pub request_id: String,
    /// Library the address belongs to
    pub api_user_id: String,
    /// Compressed record JSON
    #[serde(with = "hex_bytes")]
    pub json: Vec<u8>,
    /// Compressed tag JSON
    #[serde(with = "hex_bytes")]
    pub tags: Vec<u8>,
    /// Serialized response headers
    pub headers: Option<String>,
    /// Library version reported with the response
    pub libver: Option<u64>,
    /// When the row was last confirmed against upstream
    pub retrieved: Option<DateTime<Utc>>,
}

impl CacheRow {
    /// A row that only records a retrieval time
    pub fn touched(request_id: &str, api_user_id: &str, retrieved: DateTime<Utc>) -> Self {
        Self {
            request_id: request_id.to_string(),
            api_user_id: api_user_id.to_string(),
            json: Vec::new(),
            tags: Vec::new(),
            headers: None,
            libver: None,
            retrieved: Some(retrieved),
        }
    }
}

/// Read/write contract of the record store
pub trait CacheBackend: Send + Sync {
    /// All rows stored under the key; callers treat the first as authoritative
    fn find(&self, request_id: &str, api_user_id: &str) -> Result<Vec<CacheRow>, CacheError>;

    /// Inserts the row or replaces every field of an existing one
    fn upsert(&self, row: CacheRow) -> Result<(), CacheError>;

    /// Inserts a bare row or updates only `retrieved` of an existing one
    fn touch(
        &self,
        request_id: &str,
        api_user_id: &str,
        retrieved: DateTime<Utc>,
    ) -> Result<(), CacheError>;

    /// Removes every row of a library, returning how many were removed
    fn clear_account(&self, api_user_id: &str) -> Result<usize, CacheError>;
}

impl<B: CacheBackend + ?Sized> CacheBackend for Arc<B> {
    fn find(&self, request_id: &str, api_user_id: &str) -> Result<Vec<CacheRow>, CacheError> {
        (**self).find(request_id, api_user_id)
    }

    fn upsert(&self, row: CacheRow) -> Result<(), CacheError> {
        (**self).upsert(row)
    }

    fn touch(
        &self,
        request_id: &str,
        api_user_id: &str,
        retrieved: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        (**self).touch(request_id, api_user_id, retrieved)
    }

    fn clear_account(&self, api_user_id: &str) -> Result<usize, CacheError> {
        (**self).clear_account(api_user_id)
    }
}

/// Process-local backend, mainly for tests and short-lived tools
#[derive(Debug, Default)]
pub struct MemoryBackend {
    rows: Mutex<HashMap<(String, String), CacheRow>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), CacheRow>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CacheBackend for MemoryBackend {
    fn find(&self, request_id: &str, api_user_id: &str) -> Result<Vec<CacheRow>, CacheError> {
        let key = (request_id.to_string(), api_user_id.to_string());
        Ok(self.lock().get(&key).cloned().into_iter().collect())
    }

    fn upsert(&self, row: CacheRow) -> Result<(), CacheError> {
        let key = (row.request_id.clone(), row.api_user_id.clone());
        self.lock().insert(key, row);
        Ok(())
    }

    fn touch(
        &self,
        request_id: &str,
        api_user_id: &str,
        retrieved: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let key = (request_id.to_string(), api_user_id.to_string());
        self.lock()
            .entry(key)
            .and_modify(|row| row.retrieved = Some(retrieved))
            .or_insert_with(|| CacheRow::touched(request_id, api_user_id, retrieved));
        Ok(())
    }

    fn clear_account(&self, api_user_id: &str) -> Result<usize, CacheError> {
        let mut rows = self.lock();
        let before = rows.len();
        rows.retain(|(_, user), _| user != api_user_id);
        Ok(before - rows.len())
    }
}

/// Hex encoding for compressed bodies inside JSON row files
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(bytes: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}
