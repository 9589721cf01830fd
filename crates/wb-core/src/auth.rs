//! Single-user token authentication.

use std::fmt;

use subtle::ConstantTimeEq;

use crate::error::{Result, WbError};

/// Shared secret configured at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(WbError::InvalidRequest("access token must not be empty".into()));
        }
        Ok(Self(token))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a presented credential.
    fn matches(&self, candidate: &str) -> bool {
        bool::from(self.0.as_bytes().ct_eq(candidate.as_bytes()))
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Proof that a caller presented the access token. Only
/// [`Authenticator::authenticate`] creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    _private: (),
}

#[derive(Debug, Clone)]
pub struct Authenticator {
    token: AccessToken,
}

impl Authenticator {
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }

    pub fn authenticate(&self, candidate: &str) -> Result<Identity> {
        if self.token.matches(candidate) {
            Ok(Identity { _private: () })
        } else {
            Err(WbError::NotAuthenticated)
        }
    }

    /// Authenticate an optional credential, as captured from a handshake.
    pub fn authenticate_opt(&self, candidate: Option<&str>) -> Option<Identity> {
        candidate.and_then(|c| self.authenticate(c).ok())
    }
}
