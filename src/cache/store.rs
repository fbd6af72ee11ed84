//! Compressed cache entries on top of a [`CacheBackend`]

use chrono::{DateTime, Utc};

use super::backend::{CacheBackend, CacheRow};
use super::{codec, CacheError};

/// Placeholder body handed out when nothing is cached
pub const NO_CACHE_BODY: &str = r#"{"status":"No Cache"}"#;

/// A cached response with its bodies decompressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub request_id: String,
    pub account_id: String,
    /// Normalized record JSON
    pub json_body: String,
    /// Tag JSON keyed by item key
    pub tag_body: String,
    pub header_snapshot: Option<String>,
    pub library_version: Option<u64>,
    pub retrieved_at: Option<DateTime<Utc>>,
}

/// Reads and writes [`CacheEntry`]s, compressing bodies at rest
#[derive(Debug, Clone)]
pub struct CacheStore<B> {
    backend: B,
}

impl<B: CacheBackend> CacheStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Looks up the entry for a key; `None` is a cache miss, not an error
    pub fn get(&self, request_id: &str, account_id: &str) -> Result<Option<CacheEntry>, CacheError> {
        let Some(row) = self.backend.find(request_id, account_id)?.into_iter().next() else {
            return Ok(None);
        };

        Ok(Some(CacheEntry {
            json_body: decode_body(&row.json)?,
            tag_body: decode_body(&row.tags)?,
            request_id: row.request_id,
            account_id: row.api_user_id,
            header_snapshot: row.headers,
            library_version: row.libver,
            retrieved_at: row.retrieved,
        }))
    }

    /// Inserts or replaces the entry, overwriting every field
    pub fn upsert(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        self.backend.upsert(CacheRow {
            request_id: entry.request_id.clone(),
            api_user_id: entry.account_id.clone(),
            json: codec::compress(entry.json_body.as_bytes())?,
            tags: codec::compress(entry.tag_body.as_bytes())?,
            headers: entry.header_snapshot.clone(),
            libver: entry.library_version,
            retrieved: entry.retrieved_at,
        })
    }

    /// Records that upstream confirmed the entry unchanged at `retrieved_at`
    pub fn touch(
        &self,
        request_id: &str,
        account_id: &str,
        retrieved_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        self.backend.touch(request_id, account_id, retrieved_at)
    }

    /// Drops every entry cached for a library, returning how many were removed
    pub fn clear_account(&self, account_id: &str) -> Result<usize, CacheError> {
        self.backend.clear_account(account_id)
    }
}

fn decode_body(stored: &[u8]) -> Result<String, CacheError> {
    let bytes = codec::decompress(stored)?;
    String::from_utf8(bytes).map_err(|e| CacheError::Corrupt(format!("body is not UTF-8: {}", e)))
}
