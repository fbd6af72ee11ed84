//! Library address resolution
//!
//! Turns a raw API address into a [`LibraryAddress`]: the embedded `key` token is
//! split out, the target is classified as a personal or group library, and a
//! canonical form (token removed) is produced for use as the cache key.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::RequestError;

/// Query parameter that carries an embedded API key
pub const TOKEN_PARAM: &str = "key";

const GROUP_DIVIDER: &str = "groups/";
const USER_DIVIDER: &str = "users/";

/// Whether an address targets a personal or a group library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Personal,
    Group,
}

impl AccountKind {
    /// Path literal that precedes the account id
    pub fn divider(&self) -> &'static str {
        match self {
            AccountKind::Personal => USER_DIVIDER,
            AccountKind::Group => GROUP_DIVIDER,
        }
    }
}

/// A resolved library-resource address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryAddress {
    /// Address with the token parameter removed
    url: Url,
    /// Personal or group library
    pub account_kind: AccountKind,
    /// Path segment following the divider; empty when none was found
    pub account_id: String,
    /// Token taken from the `key` query parameter, if any
    pub embedded_token: Option<String>,
}

impl LibraryAddress {
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Canonical address: token removed, other query parameters in original order
    pub fn canonical(&self) -> &str {
        self.url.as_str()
    }

    /// Stable storage id for this address, independent of token placement
    pub fn request_id(&self) -> String {
        hex::encode(Sha256::digest(self.canonical().as_bytes()))
    }

    pub fn has_account_id(&self) -> bool {
        !self.account_id.is_empty()
    }
}

/// Parses a raw address into a [`LibraryAddress`]
///
/// Addresses that name neither a user nor a group library are accepted as
/// personal libraries and logged. A missing account id yields an empty id;
/// rejecting that is left to the caller.
pub fn resolve(raw: &str) -> Result<LibraryAddress, RequestError> {
    let parsed = Url::parse(raw.trim())
        .map_err(|e| RequestError::Resolve(format!("{}: {}", raw, e)))?;

    if parsed.cannot_be_a_base() || parsed.host_str().is_none() {
        return Err(RequestError::Resolve(format!("{}: not a web address", raw)));
    }

    let mut embedded_token = None;
    let mut found_token = false;
    let mut kept: Vec<(String, String)> = Vec::new();
    for (name, value) in parsed.query_pairs() {
        if name == TOKEN_PARAM {
            found_token = true;
            embedded_token = Some(value.into_owned()).filter(|token| !token.is_empty());
        } else {
            kept.push((name.into_owned(), value.into_owned()));
        }
    }

    // Re-encoding normalizes the query, so addresses without a token stay verbatim
    let mut url = parsed;
    if found_token {
        url.set_query(None);
        if !kept.is_empty() {
            url.query_pairs_mut().extend_pairs(kept.iter());
        }
    }

    let account_kind = classify(url.as_str());
    let account_id = extract_account_id(url.as_str(), account_kind);
    if account_id.is_empty() {
        warn!(address = %url, "Could not extract library id from address");
    }

    debug!(
        address = %url,
        kind = ?account_kind,
        account_id = %account_id,
        has_token = embedded_token.is_some(),
        "Resolved library address"
    );

    Ok(LibraryAddress {
        url,
        account_kind,
        account_id,
        embedded_token,
    })
}

/// Group markers take precedence; anything unrecognized is a personal library
fn classify(address: &str) -> AccountKind {
    if address.contains(GROUP_DIVIDER) {
        AccountKind::Group
    } else if address.contains(USER_DIVIDER) {
        AccountKind::Personal
    } else {
        warn!(address = %address, "Could not determine library type, assuming personal");
        AccountKind::Personal
    }
}

fn extract_account_id(address: &str, kind: AccountKind) -> String {
    address
        .split_once(kind.divider())
        .map(|(_, rest)| {
            rest.split(['/', '?', '#'])
                .next()
                .unwrap_or_default()
                .to_string()
        })
        .unwrap_or_default()
}
