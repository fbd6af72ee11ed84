//! Error types returned by the request engine
//!
//! Every failure a request can hit is captured as a [`RequestError`] and handed
//! back to the caller as a value. Existing cache rows are never invalidated by
//! any of these.

use thiserror::Error;

use crate::cache::CacheError;

/// Body the API returns when the requested collection does not exist
pub const COLLECTION_NOT_FOUND_BODY: &str = "Collection not found";

/// Body the API returns when the requested tag does not exist
pub const TAG_NOT_FOUND_BODY: &str = "Tag not found";

/// Why the remote API refused access to a library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationReason {
    /// Group library rejected both the keyed and the anonymous request
    PrivateGroup,
    /// Group library rejected the key and the anonymous retry got no response
    GroupPermissions,
    /// Any other 403
    Generic,
}

impl AuthorizationReason {
    /// Human-readable hint pointing at the likely permissions problem
    pub fn hint(&self) -> &'static str {
        match self {
            AuthorizationReason::PrivateGroup => {
                "Access forbidden. This group is private and requires an API key with 'Read' or \
                 'Read/Write' permissions. Check the key settings and the group's permissions."
            }
            AuthorizationReason::GroupPermissions => {
                "Access forbidden. For group libraries, ensure the API key has 'Read' or \
                 'Read/Write' permissions for this group, or that the group is public."
            }
            AuthorizationReason::Generic => {
                "Access forbidden. Check that the API key has proper permissions."
            }
        }
    }
}

/// Domain-level "not found" answers delivered with a success status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingResource {
    Collection,
    Tag,
}

impl MissingResource {
    /// Recognizes the literal bodies the API uses for missing collections and tags
    pub fn from_body(body: &str) -> Option<Self> {
        match body {
            COLLECTION_NOT_FOUND_BODY => Some(MissingResource::Collection),
            TAG_NOT_FOUND_BODY => Some(MissingResource::Tag),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MissingResource::Collection => COLLECTION_NOT_FOUND_BODY,
            MissingResource::Tag => TAG_NOT_FOUND_BODY,
        }
    }
}

/// Errors that can occur while serving a library request
#[derive(Debug, Error)]
pub enum RequestError {
    /// The address could not be parsed or carries no library id
    #[error("Invalid library address: {0}")]
    Resolve(String),

    /// No HTTP response was received (DNS, connect, TLS, timeout)
    #[error("Request failed before a response was received: {0}")]
    Transport(String),

    /// The API answered 403
    #[error("{}", .0.hint())]
    Authorization(AuthorizationReason),

    /// The API answered 404
    #[error("Resource not found. Verify the group/user ID and that the resource exists.")]
    NotFound,

    /// The API reported a missing collection or tag in the body
    #[error("{}", .0.as_str())]
    MissingResource(MissingResource),

    /// Any other status of 400 or above
    #[error("HTTP Error {status}: {body}")]
    Http { status: u16, body: String },

    /// The API answered with its generic error body, usually a renamed style id
    #[error(
        "Unable to import from the library API. This is likely caused by an incorrect citation \
         style name; for example, 'mla' is now 'modern-language-association'. Use the name found \
         in the style's URL at the style repository."
    )]
    ConfigurationHint,

    /// Reading or writing the local cache failed
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// The API returned a body that is not the expected JSON
    #[error("Failed to parse API response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RequestError {
    /// Builds an [`RequestError::Http`] from a status and a raw body
    pub fn http(status: u16, body: &str) -> Self {
        let body = if body.is_empty() {
            "Unknown error".to_string()
        } else {
            body.to_string()
        };
        RequestError::Http { status, body }
    }
}
