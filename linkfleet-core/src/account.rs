//! Account identifiers and opaque credential state

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while constructing an [`AccountId`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountIdError {
    #[error("account identifier must not be empty")]
    Empty,
}

/// External account key (a phone number for most senders)
///
/// The core only requires it to be non-empty. Stricter formatting rules
/// belong to whoever parses operator input.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Create an identifier, trimming surrounding whitespace
    pub fn new(raw: impl AsRef<str>) -> Result<Self, AccountIdError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(AccountIdError::Empty);
        }
        Ok(AccountId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccountId {
    type Error = AccountIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AccountId::new(value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl std::str::FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountId::new(s)
    }
}

/// Protocol-defined credential state, persisted verbatim
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBlob(Vec<u8>);

impl CredentialBlob {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        CredentialBlob(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Never print credential contents.
impl fmt::Debug for CredentialBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialBlob({} bytes)", self.0.len())
    }
}

/// Authentication state handed to the protocol layer when opening a connection
#[derive(Debug, Clone)]
pub struct AuthState {
    pub account: AccountId,
    /// Last persisted credentials, `None` when the account has never paired
    pub credentials: Option<CredentialBlob>,
}

impl AuthState {
    pub fn is_registered(&self) -> bool {
        self.credentials.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_trims_whitespace() {
        let id = AccountId::new("  628123  ").unwrap();
        assert_eq!(id.as_str(), "628123");
    }

    #[test]
    fn test_account_id_rejects_empty() {
        assert_eq!(AccountId::new(""), Err(AccountIdError::Empty));
        assert_eq!(AccountId::new("   "), Err(AccountIdError::Empty));
    }

    #[test]
    fn test_account_id_serde_as_plain_string() {
        let id = AccountId::new("111").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"111\"");

        let parsed: AccountId = serde_json::from_str("\"222\"").unwrap();
        assert_eq!(parsed.as_str(), "222");

        assert!(serde_json::from_str::<AccountId>("\"\"").is_err());
    }

    #[test]
    fn test_credential_blob_debug_hides_contents() {
        let blob = CredentialBlob::new(b"{\"secret\":1}".to_vec());
        let rendered = format!("{:?}", blob);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("12 bytes"));
    }
}
