//! HTTP transport used by the fetcher
//!
//! [`HttpTransport`] is the seam between the fetch protocol and the network; the
//! crate ships [`ReqwestTransport`] and tests substitute scripted doubles.

use async_trait::async_trait;
use reqwest::Client;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

/// TLS verification level for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSecurity {
    /// Certificates are verified
    Strict,
    /// Certificate verification is skipped; only used for the recovery retry
    Relaxed,
}

/// A received HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercase
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Adds a header, lowercasing its name
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// How a request failed without producing a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connect, DNS, TLS or protocol failure
    RequestFailed,
    /// The configured timeout elapsed
    Timeout,
}

/// A request that produced no HTTP response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn request_failed(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::RequestFailed,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::timeout(err.to_string())
        } else {
            TransportError::request_failed(err.to_string())
        }
    }
}

/// Issues GET requests on behalf of the fetcher
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        security: TransportSecurity,
    ) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for std::sync::Arc<T> {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        security: TransportSecurity,
    ) -> Result<HttpResponse, TransportError> {
        (**self).get(url, headers, security).await
    }
}

/// [`HttpTransport`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    strict: Client,
    relaxed: Client,
}

impl ReqwestTransport {
    /// Builds strict and relaxed clients sharing the configured timeout
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let strict = Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        let relaxed = Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { strict, relaxed })
    }

    fn client(&self, security: TransportSecurity) -> &Client {
        match security {
            TransportSecurity::Strict => &self.strict,
            TransportSecurity::Relaxed => &self.relaxed,
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        security: TransportSecurity,
    ) -> Result<HttpResponse, TransportError> {
        let mut request = self.client(security).get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();

        let mut received: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            received
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            headers: received,
            body,
        })
    }
}
