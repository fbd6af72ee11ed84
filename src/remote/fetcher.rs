//! Remote fetch protocol
//!
//! [`RemoteFetcher::fetch`] issues one GET and classifies the answer. Two
//! recoverable conditions lead to exactly one extra attempt, modelled as a
//! [`RetryReason`]:
//!
//! - a 403 from a group library is retried without the API key, since public
//!   groups allow anonymous reads;
//! - a request that failed before any response is retried with relaxed TLS
//!   verification and the fallback API version.
//!
//! The retried attempt is classified without any further recovery edges.

use std::borrow::Cow;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::transport::{
    HttpResponse, HttpTransport, TransportError, TransportErrorKind, TransportSecurity,
};
use crate::address::AccountKind;
use crate::error::{AuthorizationReason, MissingResource, RequestError};

pub const API_VERSION_HEADER: &str = "Zotero-API-Version";
pub const API_KEY_HEADER: &str = "Zotero-API-Key";
pub const IF_MODIFIED_SINCE_VERSION_HEADER: &str = "If-Modified-Since-Version";
pub const LAST_MODIFIED_VERSION_HEADER: &str = "last-modified-version";

pub const DEFAULT_API_VERSION: u8 = 3;
pub const DEFAULT_FALLBACK_API_VERSION: u8 = 2;

/// Body the API sends for unexplained failures, usually a bad style name
const GENERIC_ERROR_BODY: &str = "An error occurred";

const STATUS_NOT_MODIFIED: u16 = 304;
const STATUS_FORBIDDEN: u16 = 403;
const STATUS_NOT_FOUND: u16 = 404;

/// Parameters of a single fetch
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    pub account_kind: AccountKind,
    pub token: Option<&'a str>,
    /// Library version of the cached copy, sent as a conditional header
    pub prior_version: Option<u64>,
}

/// Why a fetch was attempted a second time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Group library answered 403; retried without the key
    AnonymousGroupAccess,
    /// No response at all; retried with relaxed TLS and the fallback API version
    RelaxedTransport,
}

/// A successful fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// The key was dropped by the anonymous retry and must not be reused
    pub token_cleared: bool,
    pub retried: Option<RetryReason>,
}

impl FetchOutcome {
    /// Upstream confirmed the cached copy is current
    pub fn is_not_modified(&self) -> bool {
        self.status == STATUS_NOT_MODIFIED
    }

    /// Library version reported by upstream, if any
    pub fn library_version(&self) -> Option<u64> {
        self.headers
            .get(LAST_MODIFIED_VERSION_HEADER)
            .and_then(|v| v.trim().parse().ok())
    }

    /// Response headers serialized as a JSON object
    pub fn header_snapshot(&self) -> String {
        serde_json::to_string(&self.headers).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Result of classifying one attempt
enum Step {
    Done(Result<FetchOutcome, RequestError>),
    Retry(RetryReason),
}

/// Fetches library resources through an [`HttpTransport`]
#[derive(Debug, Clone)]
pub struct RemoteFetcher<T> {
    transport: T,
    api_version: u8,
    fallback_api_version: u8,
}

impl<T: HttpTransport> RemoteFetcher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            api_version: DEFAULT_API_VERSION,
            fallback_api_version: DEFAULT_FALLBACK_API_VERSION,
        }
    }

    /// Overrides the primary and fallback API version headers
    pub fn with_api_versions(mut self, primary: u8, fallback: u8) -> Self {
        self.api_version = primary;
        self.fallback_api_version = fallback;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetches `request.url`, recovering at most once
    pub async fn fetch(&self, request: &FetchRequest<'_>) -> Result<FetchOutcome, RequestError> {
        let mut retried = None;
        loop {
            let attempt = self.send(request, retried).await;
            match self.classify(request, attempt, retried) {
                Step::Done(result) => return result,
                Step::Retry(reason) => {
                    warn!(url = request.url, reason = ?reason, "Retrying library request");
                    retried = Some(reason);
                }
            }
        }
    }

    async fn send(
        &self,
        request: &FetchRequest<'_>,
        retried: Option<RetryReason>,
    ) -> Result<HttpResponse, TransportError> {
        let (headers, security) = match retried {
            None => (
                build_headers(self.api_version, request.token, request.prior_version),
                TransportSecurity::Strict,
            ),
            Some(RetryReason::AnonymousGroupAccess) => (
                build_headers(self.api_version, None, request.prior_version),
                TransportSecurity::Strict,
            ),
            Some(RetryReason::RelaxedTransport) => (
                build_headers(self.fallback_api_version, request.token, None),
                TransportSecurity::Relaxed,
            ),
        };

        debug!(
            url = request.url,
            authenticated = headers.iter().any(|(name, _)| name == API_KEY_HEADER),
            conditional = headers.iter().any(|(name, _)| name == IF_MODIFIED_SINCE_VERSION_HEADER),
            security = ?security,
            "Fetching library resource"
        );

        self.transport.get(request.url, &headers, security).await
    }

    fn classify(
        &self,
        request: &FetchRequest<'_>,
        attempt: Result<HttpResponse, TransportError>,
        retried: Option<RetryReason>,
    ) -> Step {
        let response = match attempt {
            Ok(response) => response,
            Err(err) => return classify_transport_error(request, err, retried),
        };

        let status = response.status;
        let is_group = request.account_kind == AccountKind::Group;

        if status == STATUS_FORBIDDEN {
            return match retried {
                None if is_group => Step::Retry(RetryReason::AnonymousGroupAccess),
                Some(RetryReason::AnonymousGroupAccess) => Step::Done(Err(
                    RequestError::Authorization(AuthorizationReason::PrivateGroup),
                )),
                _ => Step::Done(Err(RequestError::Authorization(
                    AuthorizationReason::Generic,
                ))),
            };
        }

        if retried == Some(RetryReason::AnonymousGroupAccess) && status >= 400 {
            return Step::Done(Err(RequestError::http(status, &response.body_text())));
        }
        if status == STATUS_NOT_FOUND {
            return Step::Done(Err(RequestError::NotFound));
        }
        if status >= 400 {
            return Step::Done(Err(RequestError::http(status, &response.body_text())));
        }

        let body = response.body_text();
        if let Some(missing) = MissingResource::from_body(&body) {
            return Step::Done(Err(RequestError::MissingResource(missing)));
        }
        if body == GENERIC_ERROR_BODY {
            return Step::Done(Err(RequestError::ConfigurationHint));
        }

        let token_cleared =
            retried == Some(RetryReason::AnonymousGroupAccess) && request.token.is_some();
        if retried.is_some() {
            info!(url = request.url, status, reason = ?retried, "Retry succeeded");
        }

        Step::Done(Ok(FetchOutcome {
            status,
            headers: response.headers,
            body: response.body,
            token_cleared,
            retried,
        }))
    }
}

fn classify_transport_error(
    request: &FetchRequest<'_>,
    err: TransportError,
    retried: Option<RetryReason>,
) -> Step {
    match retried {
        None if err.kind == TransportErrorKind::RequestFailed => {
            Step::Retry(RetryReason::RelaxedTransport)
        }
        Some(RetryReason::AnonymousGroupAccess) => {
            let reason = if request.token.is_some() {
                AuthorizationReason::GroupPermissions
            } else {
                AuthorizationReason::PrivateGroup
            };
            warn!(url = request.url, error = %err, "Anonymous group retry failed");
            Step::Done(Err(RequestError::Authorization(reason)))
        }
        _ => Step::Done(Err(RequestError::Transport(err.message))),
    }
}

fn build_headers(
    api_version: u8,
    token: Option<&str>,
    prior_version: Option<u64>,
) -> Vec<(String, String)> {
    let mut headers = vec![(API_VERSION_HEADER.to_string(), api_version.to_string())];
    if let Some(token) = token {
        headers.push((API_KEY_HEADER.to_string(), token.to_string()));
    }
    if let Some(version) = prior_version {
        headers.push((IF_MODIFIED_SINCE_VERSION_HEADER.to_string(), version.to_string()));
    }
    headers
}

/// Rewrites an address that produced "Tag not found" into a broader one
///
/// The two path segments following the library id (the tag filter) are dropped
/// and the `limit` parameter is divided by ten. Returns `None` when the address
/// has nothing left to drop.
pub fn rewrite_for_missing_tag(url: &str) -> Option<String> {
    let mut parsed = reqwest::Url::parse(url).ok()?;

    let segments: Vec<String> = parsed.path_segments()?.map(str::to_string).collect();
    let divider = segments
        .iter()
        .position(|s| s == "groups")
        .or_else(|| segments.iter().position(|s| s == "users"))?;
    let id_index = divider + 1;
    if segments.len() < id_index + 4 {
        return None;
    }

    let kept: Vec<&str> = segments[..=id_index]
        .iter()
        .chain(segments[id_index + 3..].iter())
        .map(String::as_str)
        .collect();
    parsed.set_path(&format!("/{}", kept.join("/")));

    let query: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(name, value)| {
            let value = if name == "limit" {
                value
                    .parse::<u32>()
                    .map(|limit| (limit / 10).max(1).to_string())
                    .unwrap_or_else(|_| value.into_owned())
            } else {
                value.into_owned()
            };
            (name.into_owned(), value)
        })
        .collect();
    parsed.set_query(None);
    if !query.is_empty() {
        parsed.query_pairs_mut().extend_pairs(query.iter());
    }

    Some(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    struct Call {
        headers: Vec<(String, String)>,
        security: TransportSecurity,
    }

    impl Call {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str())
        }
    }

    /// Replays canned responses in order and records every call
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for Scripted {
        async fn get(
            &self,
            _url: &str,
            headers: &[(String, String)],
            security: TransportSecurity,
        ) -> Result<HttpResponse, TransportError> {
            self.calls.lock().unwrap().push(Call {
                headers: headers.to_vec(),
                security,
            });
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected extra request")
        }
    }

    fn request<'a>(kind: AccountKind, token: Option<&'a str>) -> FetchRequest<'a> {
        FetchRequest {
            url: "https://api.example.org/groups/999/items",
            account_kind: kind,
            token,
            prior_version: None,
        }
    }

    fn ok(body: &str) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::new(200, body).with_header("Last-Modified-Version", "77"))
    }

    fn status(code: u16) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::new(code, ""))
    }

    #[tokio::test]
    async fn test_headers_include_version_key_and_condition() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![ok("[]")]));
        let mut req = request(AccountKind::Group, Some("ABC"));
        req.prior_version = Some(41);

        let outcome = fetcher.fetch(&req).await.unwrap();
        assert_eq!(outcome.library_version(), Some(77));

        let calls = fetcher.transport().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].header(API_VERSION_HEADER), Some("3"));
        assert_eq!(calls[0].header(API_KEY_HEADER), Some("ABC"));
        assert_eq!(calls[0].header(IF_MODIFIED_SINCE_VERSION_HEADER), Some("41"));
        assert_eq!(calls[0].security, TransportSecurity::Strict);
    }

    #[tokio::test]
    async fn test_no_key_header_without_token() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![ok("[]")]));
        fetcher.fetch(&request(AccountKind::Personal, None)).await.unwrap();

        let calls = fetcher.transport().calls();
        assert_eq!(calls[0].header(API_KEY_HEADER), None);
        assert_eq!(calls[0].header(IF_MODIFIED_SINCE_VERSION_HEADER), None);
    }

    #[tokio::test]
    async fn test_group_403_with_key_retries_anonymously() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![status(403), ok("[]")]));
        let outcome = fetcher
            .fetch(&request(AccountKind::Group, Some("ABC")))
            .await
            .unwrap();

        assert!(outcome.token_cleared);
        assert_eq!(outcome.retried, Some(RetryReason::AnonymousGroupAccess));

        let calls = fetcher.transport().calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].header(API_KEY_HEADER), None);
        assert_eq!(calls[1].header(API_VERSION_HEADER), Some("3"));
    }

    #[tokio::test]
    async fn test_group_403_twice_is_private_group() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![status(403), status(403)]));
        let result = fetcher.fetch(&request(AccountKind::Group, Some("ABC"))).await;

        assert!(matches!(
            result,
            Err(RequestError::Authorization(AuthorizationReason::PrivateGroup))
        ));
        assert_eq!(fetcher.transport().calls().len(), 2);
    }

    #[tokio::test]
    async fn test_group_403_without_key_confirms_once() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![status(403), status(403)]));
        let result = fetcher.fetch(&request(AccountKind::Group, None)).await;

        assert!(matches!(
            result,
            Err(RequestError::Authorization(AuthorizationReason::PrivateGroup))
        ));
        assert_eq!(fetcher.transport().calls().len(), 2);
    }

    #[tokio::test]
    async fn test_anonymous_success_without_key_does_not_flag_cleared() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![status(403), ok("[]")]));
        let outcome = fetcher.fetch(&request(AccountKind::Group, None)).await.unwrap();
        assert!(!outcome.token_cleared);
    }

    #[tokio::test]
    async fn test_group_retry_with_other_error_is_http_error() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![
            status(403),
            Ok(HttpResponse::new(500, "boom")),
        ]));
        let result = fetcher.fetch(&request(AccountKind::Group, Some("ABC"))).await;

        match result {
            Err(RequestError::Http { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected HTTP error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_group_retry_without_response_is_permissions_hint() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![
            status(403),
            Err(TransportError::timeout("slow")),
        ]));
        let result = fetcher.fetch(&request(AccountKind::Group, Some("ABC"))).await;

        assert!(matches!(
            result,
            Err(RequestError::Authorization(AuthorizationReason::GroupPermissions))
        ));
    }

    #[tokio::test]
    async fn test_personal_403_is_generic_and_not_retried() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![status(403)]));
        let result = fetcher.fetch(&request(AccountKind::Personal, Some("ABC"))).await;

        assert!(matches!(
            result,
            Err(RequestError::Authorization(AuthorizationReason::Generic))
        ));
        assert_eq!(fetcher.transport().calls().len(), 1);
    }

    #[tokio::test]
    async fn test_404_is_not_found() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![status(404)]));
        let result = fetcher.fetch(&request(AccountKind::Personal, None)).await;
        assert!(matches!(result, Err(RequestError::NotFound)));
    }

    #[tokio::test]
    async fn test_other_client_error_carries_status_and_body() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![Ok(HttpResponse::new(
            429,
            "Too many requests",
        ))]));
        let result = fetcher.fetch(&request(AccountKind::Personal, None)).await;

        assert_eq!(
            result.unwrap_err().to_string(),
            "HTTP Error 429: Too many requests"
        );
    }

    #[tokio::test]
    async fn test_missing_collection_and_tag_bodies() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![
            Ok(HttpResponse::new(200, "Collection not found")),
            Ok(HttpResponse::new(200, "Tag not found")),
        ]));
        let req = request(AccountKind::Personal, None);

        assert!(matches!(
            fetcher.fetch(&req).await,
            Err(RequestError::MissingResource(MissingResource::Collection))
        ));
        assert!(matches!(
            fetcher.fetch(&req).await,
            Err(RequestError::MissingResource(MissingResource::Tag))
        ));
    }

    #[tokio::test]
    async fn test_generic_error_body_is_configuration_hint() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![Ok(HttpResponse::new(
            200,
            "An error occurred",
        ))]));
        let result = fetcher.fetch(&request(AccountKind::Personal, None)).await;
        assert!(matches!(result, Err(RequestError::ConfigurationHint)));
    }

    #[tokio::test]
    async fn test_request_failure_retries_relaxed_with_fallback_version() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![
            Err(TransportError::request_failed("certificate verify failed")),
            ok("[]"),
        ]));
        let mut req = request(AccountKind::Personal, Some("ABC"));
        req.prior_version = Some(5);

        let outcome = fetcher.fetch(&req).await.unwrap();
        assert_eq!(outcome.retried, Some(RetryReason::RelaxedTransport));
        assert!(!outcome.token_cleared);

        let calls = fetcher.transport().calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].security, TransportSecurity::Relaxed);
        assert_eq!(calls[1].header(API_VERSION_HEADER), Some("2"));
        assert_eq!(calls[1].header(API_KEY_HEADER), Some("ABC"));
        assert_eq!(calls[1].header(IF_MODIFIED_SINCE_VERSION_HEADER), None);
    }

    #[tokio::test]
    async fn test_relaxed_retry_failure_is_transport_error() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![
            Err(TransportError::request_failed("refused")),
            Err(TransportError::request_failed("still refused")),
        ]));
        let result = fetcher.fetch(&request(AccountKind::Personal, None)).await;

        match result {
            Err(RequestError::Transport(message)) => assert_eq!(message, "still refused"),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_relaxed_retry_generic_body_is_configuration_hint() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![
            Err(TransportError::request_failed("refused")),
            Ok(HttpResponse::new(200, "An error occurred")),
        ]));
        let result = fetcher.fetch(&request(AccountKind::Personal, None)).await;
        assert!(matches!(result, Err(RequestError::ConfigurationHint)));
    }

    #[tokio::test]
    async fn test_relaxed_retry_403_on_group_is_not_retried_again() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![
            Err(TransportError::request_failed("refused")),
            status(403),
        ]));
        let result = fetcher.fetch(&request(AccountKind::Group, Some("ABC"))).await;

        assert!(matches!(
            result,
            Err(RequestError::Authorization(AuthorizationReason::Generic))
        ));
        assert_eq!(fetcher.transport().calls().len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![Err(TransportError::timeout(
            "operation timed out",
        ))]));
        let result = fetcher.fetch(&request(AccountKind::Personal, None)).await;

        assert!(matches!(result, Err(RequestError::Transport(_))));
        assert_eq!(fetcher.transport().calls().len(), 1);
    }

    #[tokio::test]
    async fn test_not_modified_is_success() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![status(304)]));
        let mut req = request(AccountKind::Personal, None);
        req.prior_version = Some(12);

        let outcome = fetcher.fetch(&req).await.unwrap();
        assert!(outcome.is_not_modified());
        assert!(outcome.body.is_empty());
    }

    #[tokio::test]
    async fn test_custom_api_versions() {
        let fetcher = RemoteFetcher::new(Scripted::new(vec![ok("[]")])).with_api_versions(4, 3);
        fetcher.fetch(&request(AccountKind::Personal, None)).await.unwrap();
        assert_eq!(
            fetcher.transport().calls()[0].header(API_VERSION_HEADER),
            Some("4")
        );
    }

    #[test]
    fn test_header_snapshot_is_json_object() {
        let outcome = FetchOutcome {
            status: 200,
            headers: BTreeMap::from([
                ("content-type".to_string(), "application/json".to_string()),
                ("last-modified-version".to_string(), "12".to_string()),
            ]),
            body: Vec::new(),
            token_cleared: false,
            retried: None,
        };
        let snapshot: serde_json::Value = serde_json::from_str(&outcome.header_snapshot()).unwrap();
        assert_eq!(snapshot["last-modified-version"], "12");
        assert_eq!(outcome.library_version(), Some(12));
    }

    #[test]
    fn test_rewrite_for_missing_tag_drops_filter_and_shrinks_page() {
        let rewritten = rewrite_for_missing_tag(
            "https://api.example.org/users/123/tags/history/items?limit=50&format=json",
        )
        .unwrap();
        assert_eq!(
            rewritten,
            "https://api.example.org/users/123/items?limit=5&format=json"
        );
    }

    #[test]
    fn test_rewrite_for_missing_tag_on_group_keeps_tail() {
        let rewritten =
            rewrite_for_missing_tag("https://api.example.org/groups/9/tags/a%20b/items/top?limit=25")
                .unwrap();
        assert_eq!(rewritten, "https://api.example.org/groups/9/items/top?limit=2");
    }

    #[test]
    fn test_rewrite_for_missing_tag_limit_never_zero() {
        let rewritten =
            rewrite_for_missing_tag("https://api.example.org/users/1/tags/x/items?limit=5").unwrap();
        assert!(rewritten.ends_with("limit=1"));
    }

    #[test]
    fn test_rewrite_for_missing_tag_needs_something_to_drop() {
        assert!(rewrite_for_missing_tag("https://api.example.org/users/1/items").is_none());
        assert!(rewrite_for_missing_tag("https://api.example.org/items").is_none());
    }
}
