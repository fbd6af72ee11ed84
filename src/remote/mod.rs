//! Remote library API access
//!
//! [`RemoteFetcher`] speaks the library API protocol on top of an
//! [`HttpTransport`].

mod fetcher;
mod transport;

pub use fetcher::{
    rewrite_for_missing_tag, FetchOutcome, FetchRequest, RemoteFetcher, RetryReason,
    API_KEY_HEADER, API_VERSION_HEADER, DEFAULT_API_VERSION, DEFAULT_FALLBACK_API_VERSION,
    IF_MODIFIED_SINCE_VERSION_HEADER, LAST_MODIFIED_VERSION_HEADER,
};
pub use transport::{
    HttpResponse, HttpTransport, ReqwestTransport, TransportError, TransportErrorKind,
    TransportSecurity,
};
