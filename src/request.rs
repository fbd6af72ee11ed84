//! Request orchestration
//!
//! [`LibraryClient`] serves one library request end to end:
//!
//! ```text
//! Resolve -> CacheCheck -> {Fresh | Stale | Miss} -> Fetch -> Normalize -> Persist -> Return
//! ```
//!
//! Any state can end in a [`RequestError`]. Errors never touch existing cache
//! rows, so a failed refresh leaves the previous copy in place.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::accounts::AccountLookup;
use crate::address::{self, LibraryAddress};
use crate::cache::{CacheBackend, CacheEntry, CacheStore};
use crate::config::Config;
use crate::error::{MissingResource, RequestError};
use crate::freshness::{self, DEFAULT_INTERVAL_MINUTES};
use crate::normalize;
use crate::remote::{
    rewrite_for_missing_tag, FetchOutcome, FetchRequest, HttpTransport, RemoteFetcher,
};

/// How a request treats the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Cache only, never contacts upstream
    Snapshot,
    /// Always contacts upstream
    ForceUpdate,
    /// Serves a fresh cached copy, otherwise fetches
    #[default]
    CacheOrFetch,
}

impl RequestMode {
    pub fn from_name(s: &str) -> Option<RequestMode> {
        match s.to_lowercase().trim() {
            "snapshot" | "cache" => Some(RequestMode::Snapshot),
            "update" | "force" => Some(RequestMode::ForceUpdate),
            "auto" | "default" => Some(RequestMode::CacheOrFetch),
            _ => None,
        }
    }
}

/// What kind of resource the address returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceKind {
    /// JSON item records; normalized and cached
    #[default]
    Item,
    /// RIS export text, passed through
    Ris,
    /// Attachment file bytes, passed through
    Attachment,
}

impl ResourceKind {
    pub fn from_name(s: &str) -> Option<ResourceKind> {
        match s.to_lowercase().trim() {
            "item" | "items" | "json" => Some(ResourceKind::Item),
            "ris" => Some(ResourceKind::Ris),
            "attachment" | "file" => Some(ResourceKind::Attachment),
            _ => None,
        }
    }
}

/// Body of a request result
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Items(Vec<Value>),
    Ris(String),
    Binary(Vec<u8>),
    /// Nothing cached; rendered as `{"status":"No Cache"}`
    NoCache,
}

impl Payload {
    /// JSON rendering; binary bodies are hex encoded
    pub fn to_json(&self) -> Value {
        match self {
            Payload::Items(records) => Value::Array(records.clone()),
            Payload::Ris(text) => Value::String(text.clone()),
            Payload::Binary(bytes) => Value::String(hex::encode(bytes)),
            Payload::NoCache => json!({"status": "No Cache"}),
        }
    }
}

/// Result of a library request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutput {
    pub payload: Payload,
    /// Tags keyed by item key, for item payloads
    pub tags: Option<Map<String, Value>>,
    /// Upstream response headers as a JSON object string
    pub headers: Option<String>,
    /// The cached copy was older than the freshness interval when the request
    /// was decided, whether or not it was then refreshed
    pub stale: bool,
}

impl RequestOutput {
    fn no_cache() -> Self {
        Self {
            payload: Payload::NoCache,
            tags: None,
            headers: None,
            stale: false,
        }
    }

    pub fn to_json(&self) -> Value {
        let headers = self
            .headers
            .as_deref()
            .and_then(|h| serde_json::from_str::<Value>(h).ok())
            .unwrap_or(Value::Null);
        json!({
            "json": self.payload.to_json(),
            "tags": self.tags,
            "headers": headers,
            "stale": self.stale,
        })
    }
}

/// Everything fixed for the duration of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub address: LibraryAddress,
    pub token: Option<String>,
    pub resource: ResourceKind,
    /// Cache key derived from the canonical address
    pub request_id: String,
}

impl RequestContext {
    pub fn new(address: LibraryAddress, token: Option<String>, resource: ResourceKind) -> Self {
        let request_id = address.request_id();
        Self {
            address,
            token,
            resource,
            request_id,
        }
    }

    /// Same request without credentials
    pub fn without_token(&self) -> Self {
        Self {
            token: None,
            ..self.clone()
        }
    }

    pub fn account_id(&self) -> &str {
        &self.address.account_id
    }
}

/// A cached entry whose body parsed as a record array
#[derive(Debug, Clone)]
struct CachedCopy {
    entry: CacheEntry,
    records: Vec<Value>,
    tags: Map<String, Value>,
}

impl CachedCopy {
    /// `None` for rows that cannot be served, such as touch-only rows
    fn from_entry(entry: CacheEntry) -> Option<Self> {
        let records = match serde_json::from_str::<Value>(&entry.json_body) {
            Ok(Value::Array(records)) => records,
            _ => return None,
        };
        let tags = match serde_json::from_str::<Value>(&entry.tag_body) {
            Ok(Value::Object(tags)) => tags,
            _ => Map::new(),
        };
        Some(Self {
            entry,
            records,
            tags,
        })
    }

    fn is_stale(&self, now: DateTime<Utc>, interval_minutes: u32) -> bool {
        match self.entry.retrieved_at {
            Some(retrieved_at) => freshness::is_stale(retrieved_at, now, interval_minutes),
            None => true,
        }
    }

    fn into_output(self, stale: bool) -> RequestOutput {
        RequestOutput {
            payload: Payload::Items(self.records),
            tags: Some(self.tags),
            headers: self.entry.header_snapshot,
            stale,
        }
    }
}

#[derive(Debug)]
enum CacheState {
    Fresh(CachedCopy),
    Stale(CachedCopy),
    Miss,
}

/// Serves library requests from cache or upstream
pub struct LibraryClient<T, B, A> {
    fetcher: RemoteFetcher<T>,
    store: CacheStore<B>,
    accounts: A,
    freshness_minutes: u32,
    serve_stale_on_error: bool,
}

impl<T, B, A> LibraryClient<T, B, A>
where
    T: HttpTransport,
    B: CacheBackend,
    A: AccountLookup,
{
    pub fn new(transport: T, backend: B, accounts: A) -> Self {
        Self {
            fetcher: RemoteFetcher::new(transport),
            store: CacheStore::new(backend),
            accounts,
            freshness_minutes: DEFAULT_INTERVAL_MINUTES,
            serve_stale_on_error: false,
        }
    }

    /// Builds a client with API versions and cache policy taken from `config`
    pub fn with_config(transport: T, backend: B, accounts: A, config: &Config) -> Self {
        Self {
            fetcher: RemoteFetcher::new(transport)
                .with_api_versions(config.api_version, config.fallback_api_version),
            store: CacheStore::new(backend),
            accounts,
            freshness_minutes: config.freshness_minutes,
            serve_stale_on_error: config.serve_stale_on_error,
        }
    }

    pub fn with_freshness_minutes(mut self, minutes: u32) -> Self {
        self.freshness_minutes = minutes;
        self
    }

    pub fn with_serve_stale_on_error(mut self, enabled: bool) -> Self {
        self.serve_stale_on_error = enabled;
        self
    }

    pub fn store(&self) -> &CacheStore<B> {
        &self.store
    }

    pub fn fetcher(&self) -> &RemoteFetcher<T> {
        &self.fetcher
    }

    /// Drops every cached response for a library
    pub fn clear_cache(&self, account_id: &str) -> Result<usize, RequestError> {
        let removed = self.store.clear_account(account_id)?;
        info!(account_id, removed, "Cleared library cache");
        Ok(removed)
    }

    pub async fn request(
        &self,
        raw_address: &str,
        mode: RequestMode,
        resource: ResourceKind,
    ) -> Result<RequestOutput, RequestError> {
        self.request_at(raw_address, mode, resource, Utc::now()).await
    }

    /// Serves a request as if the current time were `now`
    pub async fn request_at(
        &self,
        raw_address: &str,
        mode: RequestMode,
        resource: ResourceKind,
        now: DateTime<Utc>,
    ) -> Result<RequestOutput, RequestError> {
        let context = self.resolve_context(raw_address, resource)?;

        let cached = match resource {
            ResourceKind::Item => self.load_cached(&context),
            ResourceKind::Ris | ResourceKind::Attachment => None,
        };
        let was_stale = cached
            .as_ref()
            .is_some_and(|copy| copy.is_stale(now, self.freshness_minutes));

        match mode {
            RequestMode::Snapshot => {
                debug!(request_id = %context.request_id, hit = cached.is_some(), "Serving snapshot");
                Ok(match cached {
                    Some(copy) => {
                        let stale = copy.is_stale(now, self.freshness_minutes);
                        copy.into_output(stale)
                    }
                    None => RequestOutput::no_cache(),
                })
            }
            RequestMode::ForceUpdate => {
                debug!(request_id = %context.request_id, "Forcing update");
                self.refresh(&context, cached, now, was_stale).await
            }
            RequestMode::CacheOrFetch => match self.cache_state(cached, now) {
                CacheState::Fresh(copy) => {
                    debug!(request_id = %context.request_id, "Cache is fresh");
                    Ok(copy.into_output(false))
                }
                CacheState::Stale(copy) => {
                    debug!(request_id = %context.request_id, "Cache is stale");
                    let fallback = self.serve_stale_on_error.then(|| copy.clone());
                    match (self.refresh(&context, Some(copy), now, true).await, fallback) {
                        (Err(err), Some(stale_copy)) => {
                            warn!(
                                request_id = %context.request_id,
                                error = %err,
                                "Refresh failed, serving stale cache"
                            );
                            Ok(stale_copy.into_output(true))
                        }
                        (result, _) => result,
                    }
                }
                CacheState::Miss => {
                    debug!(request_id = %context.request_id, "Cache miss");
                    self.refresh(&context, None, now, false).await
                }
            },
        }
    }

    fn resolve_context(
        &self,
        raw_address: &str,
        resource: ResourceKind,
    ) -> Result<RequestContext, RequestError> {
        let address = address::resolve(raw_address)?;
        if !address.has_account_id() {
            return Err(RequestError::Resolve(format!(
                "{}: no library id found",
                raw_address
            )));
        }

        let token = address
            .embedded_token
            .clone()
            .or_else(|| self.accounts.default_token(&address.account_id));

        Ok(RequestContext::new(address, token, resource))
    }

    /// Cached copy for the request; rows that cannot be read count as a miss
    fn load_cached(&self, context: &RequestContext) -> Option<CachedCopy> {
        match self.store.get(&context.request_id, context.account_id()) {
            Ok(entry) => entry.and_then(CachedCopy::from_entry),
            Err(err) => {
                warn!(
                    request_id = %context.request_id,
                    error = %err,
                    "Unreadable cache row, treating as miss"
                );
                None
            }
        }
    }

    fn cache_state(&self, cached: Option<CachedCopy>, now: DateTime<Utc>) -> CacheState {
        match cached {
            Some(copy) if copy.is_stale(now, self.freshness_minutes) => CacheState::Stale(copy),
            Some(copy) => CacheState::Fresh(copy),
            None => CacheState::Miss,
        }
    }

    /// Fetches upstream and persists the result
    ///
    /// `was_stale` is the staleness of the cached copy that led to this fetch
    /// and is reported on the output.
    async fn refresh(
        &self,
        context: &RequestContext,
        cached: Option<CachedCopy>,
        now: DateTime<Utc>,
        was_stale: bool,
    ) -> Result<RequestOutput, RequestError> {
        let mut output = self.fetch_and_persist(context, cached, now).await?;
        output.stale = was_stale;
        Ok(output)
    }

    async fn fetch_and_persist(
        &self,
        context: &RequestContext,
        cached: Option<CachedCopy>,
        now: DateTime<Utc>,
    ) -> Result<RequestOutput, RequestError> {
        let prior_version = cached.as_ref().and_then(|copy| copy.entry.library_version);
        let outcome = self.fetch_with_tag_recovery(context, prior_version).await?;

        let downgraded;
        let context = if outcome.token_cleared {
            downgraded = context.without_token();
            debug!(request_id = %context.request_id, "Continuing without API key");
            &downgraded
        } else {
            context
        };

        match context.resource {
            ResourceKind::Item => self.persist_items(context, outcome, cached, now),
            ResourceKind::Ris => Ok(RequestOutput {
                headers: Some(outcome.header_snapshot()),
                payload: Payload::Ris(outcome.body_text().into_owned()),
                tags: None,
                stale: false,
            }),
            ResourceKind::Attachment => Ok(RequestOutput {
                headers: Some(outcome.header_snapshot()),
                payload: Payload::Binary(outcome.body),
                tags: None,
                stale: false,
            }),
        }
    }

    /// Issues the fetch, retrying once with a broader address on "Tag not found"
    async fn fetch_with_tag_recovery(
        &self,
        context: &RequestContext,
        prior_version: Option<u64>,
    ) -> Result<FetchOutcome, RequestError> {
        let request = FetchRequest {
            url: context.address.canonical(),
            account_kind: context.address.account_kind,
            token: context.token.as_deref(),
            prior_version,
        };

        match self.fetcher.fetch(&request).await {
            Err(RequestError::MissingResource(MissingResource::Tag)) => {
                let Some(rewritten) = rewrite_for_missing_tag(request.url) else {
                    return Err(RequestError::MissingResource(MissingResource::Tag));
                };
                info!(from = request.url, to = %rewritten, "Tag not found, retrying without tag filter");
                let retry = FetchRequest {
                    url: &rewritten,
                    ..request
                };
                self.fetcher.fetch(&retry).await
            }
            result => result,
        }
    }

    fn persist_items(
        &self,
        context: &RequestContext,
        outcome: FetchOutcome,
        cached: Option<CachedCopy>,
        now: DateTime<Utc>,
    ) -> Result<RequestOutput, RequestError> {
        if outcome.is_not_modified() {
            let Some(copy) = cached else {
                return Err(RequestError::http(
                    outcome.status,
                    "Not modified, but nothing is cached",
                ));
            };
            self.store
                .touch(&context.request_id, context.account_id(), now)?;
            debug!(request_id = %context.request_id, "Not modified, refreshed timestamp");
            return Ok(copy.into_output(false));
        }

        let normalized = normalize::normalize(&outcome.body)?;
        let header_snapshot = outcome.header_snapshot();
        let entry = CacheEntry {
            request_id: context.request_id.clone(),
            account_id: context.account_id().to_string(),
            json_body: serde_json::to_string(&normalized.records)?,
            tag_body: serde_json::to_string(&normalized.tags)?,
            header_snapshot: Some(header_snapshot.clone()),
            library_version: outcome.library_version(),
            retrieved_at: Some(now),
        };
        self.store.upsert(&entry)?;

        debug!(
            request_id = %context.request_id,
            records = normalized.records.len(),
            library_version = ?entry.library_version,
            "Stored fetched records"
        );

        Ok(RequestOutput {
            payload: Payload::Items(normalized.records),
            tags: Some(normalized.tags),
            headers: Some(header_snapshot),
            stale: false,
        })
    }
}
