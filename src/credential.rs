//! Credential resolution and in-memory secret handling.
//!
//! The kernel never persists or encrypts secrets itself. A
//! [`CredentialProvider`] hands over decrypted material scoped to one user;
//! the handles live inside a single execution context and are zeroed when
//! the execution reaches a terminal state.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Credential not found: {reference}")]
    NotFound { reference: String },
    #[error("Credential access denied: {reference}")]
    AccessDenied { reference: String },
    #[error("Credential provider error: {0}")]
    Provider(String),
}

/// Decrypted credential material held in memory for one execution.
#[derive(Debug, Clone)]
pub struct CredentialHandle {
    pub reference: String,
    pub credential_type: String,
    pub user_id: i64,
    secrets: HashMap<String, String>,
}

impl CredentialHandle {
    pub fn new(
        reference: impl Into<String>,
        credential_type: impl Into<String>,
        user_id: i64,
        secrets: HashMap<String, String>,
    ) -> Self {
        CredentialHandle {
            reference: reference.into(),
            credential_type: credential_type.into(),
            user_id,
            secrets,
        }
    }

    pub fn secret(&self, key: &str) -> Option<&str> {
        self.secrets.get(key).map(|s| s.as_str())
    }

    pub fn secrets(&self) -> &HashMap<String, String> {
        &self.secrets
    }

    /// Overwrite all secret material in place.
    pub fn zero(&mut self) {
        for value in self.secrets.values_mut() {
            let len = value.len();
            value.clear();
            value.push_str(&"0".repeat(len));
            value.clear();
        }
        self.secrets.clear();
    }
}

/// Source of decrypted credentials, scoped by owner.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Load the given references for `user_id`. References owned by another
    /// user must yield [`CredentialError::AccessDenied`].
    async fn load(
        &self,
        user_id: i64,
        refs: &[String],
    ) -> Result<Vec<CredentialHandle>, CredentialError>;
}

/// Provider with no credentials. Any lookup fails.
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn load(
        &self,
        _user_id: i64,
        refs: &[String],
    ) -> Result<Vec<CredentialHandle>, CredentialError> {
        match refs.first() {
            None => Ok(Vec::new()),
            Some(reference) => Err(CredentialError::NotFound {
                reference: reference.clone(),
            }),
        }
    }
}

/// In-memory provider used by tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryCredentials {
    entries: HashMap<String, CredentialHandle>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: CredentialHandle) {
        self.entries.insert(handle.reference.clone(), handle);
    }

    pub fn with(mut self, handle: CredentialHandle) -> Self {
        self.insert(handle);
        self
    }
}

#[async_trait]
impl CredentialProvider for InMemoryCredentials {
    async fn load(
        &self,
        user_id: i64,
        refs: &[String],
    ) -> Result<Vec<CredentialHandle>, CredentialError> {
        let mut out = Vec::with_capacity(refs.len());
        for reference in refs {
            let entry = self
                .entries
                .get(reference)
                .ok_or_else(|| CredentialError::NotFound {
                    reference: reference.clone(),
                })?;
            if entry.user_id != user_id {
                return Err(CredentialError::AccessDenied {
                    reference: reference.clone(),
                });
            }
            out.push(entry.clone());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(reference: &str, user_id: i64) -> CredentialHandle {
        let mut secrets = HashMap::new();
        secrets.insert("api_key".to_string(), "s3cret".to_string());
        CredentialHandle::new(reference, "slack", user_id, secrets)
    }

    #[tokio::test]
    async fn test_in_memory_load() {
        let provider = InMemoryCredentials::new().with(handle("cred-a", 1));
        let loaded = provider.load(1, &["cred-a".to_string()]).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].secret("api_key"), Some("s3cret"));
    }

    #[tokio::test]
    async fn test_in_memory_access_denied_for_other_user() {
        let provider = InMemoryCredentials::new().with(handle("cred-a", 1));
        let err = provider.load(2, &["cred-a".to_string()]).await.unwrap_err();
        assert!(matches!(err, CredentialError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn test_in_memory_not_found() {
        let provider = InMemoryCredentials::new();
        let err = provider.load(1, &["nope".to_string()]).await.unwrap_err();
        assert!(matches!(err, CredentialError::NotFound { .. }));
    }

    #[test]
    fn test_zero_clears_material() {
        let mut h = handle("cred-a", 1);
        h.zero();
        assert!(h.secret("api_key").is_none());
        assert!(h.secrets().is_empty());
    }
}
