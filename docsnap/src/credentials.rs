use std::env;
use std::fmt;

/// Opaque API secret. Never printed in cleartext.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Read-only source of the cloud credential. Implementations must read fresh
/// on every call.
pub trait CredentialStore: Send + Sync {
    fn fetch(&self) -> Option<ApiKey>;
}

/// Looks the key up in an environment variable each time it is asked.
#[derive(Debug, Clone)]
pub struct EnvCredentialStore {
    var: String,
}

impl EnvCredentialStore {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

impl CredentialStore for EnvCredentialStore {
    fn fetch(&self) -> Option<ApiKey> {
        env::var(&self.var)
            .ok()
            .map(ApiKey::new)
            .filter(|key| !key.is_blank())
    }
}

/// Fixed credential, mostly useful for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(Option<ApiKey>);

impl StaticCredential {
    pub fn new(key: Option<ApiKey>) -> Self {
        Self(key)
    }
}

impl CredentialStore for StaticCredential {
    fn fetch(&self) -> Option<ApiKey> {
        self.0.clone()
    }
}
