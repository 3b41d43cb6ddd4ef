//! Bearer-token authentication.
//!
//! Two static tokens are recognized: the write token may call every
//! endpoint, the optional read token only the read-only ones.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use secrecy::{ExposeSecret, SecretString};

use super::AppState;
use super::error::ApiError;
use crate::error::Error;

/// Tokens accepted by the server.
#[derive(Clone)]
pub struct AuthConfig {
    pub write_token: SecretString,
    pub read_token: Option<SecretString>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Authenticated caller, extracted from the `Authorization` header.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub access: Access,
}

impl Caller {
    /// The "may I mutate this task" decision.
    pub fn require_write(&self) -> Result<(), ApiError> {
        match self.access {
            Access::Write => Ok(()),
            Access::Read => Err(Error::Forbidden("read-only token cannot modify tasks".into()).into()),
        }
    }
}

impl AuthConfig {
    fn access_for(&self, token: &str) -> Option<Access> {
        if token == self.write_token.expose_secret() {
            return Some(Access::Write);
        }
        match &self.read_token {
            Some(read) if token == read.expose_secret() => Some(Access::Read),
            _ => None,
        }
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Unauthorized("missing Authorization header".into()))?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            Error::Unauthorized("expected Authorization: Bearer <token>".into())
        })?;

        let access = state
            .auth
            .access_for(token.trim())
            .ok_or_else(|| Error::Unauthorized("invalid token".into()))?;

        Ok(Caller { access })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(read: Option<&str>) -> AuthConfig {
        AuthConfig {
            write_token: SecretString::from("w".to_string()),
            read_token: read.map(|t| SecretString::from(t.to_string())),
        }
    }

    #[test]
    fn tokens_map_to_access() {
        let auth = config(Some("r"));
        assert_eq!(auth.access_for("w"), Some(Access::Write));
        assert_eq!(auth.access_for("r"), Some(Access::Read));
        assert_eq!(auth.access_for("x"), None);
        assert_eq!(config(None).access_for("r"), None);
    }

    #[test]
    fn read_access_cannot_write() {
        assert!(Caller { access: Access::Read }.require_write().is_err());
        assert!(Caller { access: Access::Write }.require_write().is_ok());
    }
}
