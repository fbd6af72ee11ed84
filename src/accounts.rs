//! Library account lookup
//!
//! Accounts are registered out of band and listed in a JSON file. The request
//! engine only needs one thing from them: the stored key used when an address
//! does not embed its own.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::address::AccountKind;
use crate::config::ConfigError;

/// A registered library account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub api_user_id: String,
    #[serde(default)]
    pub account_type: Option<AccountKind>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
}

/// Finds registered accounts by library id
pub trait AccountLookup: Send + Sync {
    fn find(&self, api_user_id: &str) -> Option<Account>;

    /// Stored key for the account, ignoring blank keys
    fn default_token(&self, api_user_id: &str) -> Option<String> {
        self.find(api_user_id)?
            .public_key
            .filter(|key| !key.trim().is_empty())
    }
}

impl<L: AccountLookup + ?Sized> AccountLookup for std::sync::Arc<L> {
    fn find(&self, api_user_id: &str) -> Option<Account> {
        (**self).find(api_user_id)
    }
}

/// In-memory account table
#[derive(Debug, Clone, Default)]
pub struct AccountRegistry {
    accounts: HashMap<String, Account>,
}

impl AccountRegistry {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self {
            accounts: accounts
                .into_iter()
                .map(|account| (account.api_user_id.clone(), account))
                .collect(),
        }
    }

    /// Reads a JSON array of accounts; a missing file is an empty registry
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Accounts file not found");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let accounts: Vec<Account> =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(accounts))
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl AccountLookup for AccountRegistry {
    fn find(&self, api_user_id: &str) -> Option<Account> {
        self.accounts.get(api_user_id).cloned()
    }
}
