//! Auth lives at the HTTP boundary only: the engine never sees a
//! credential. `AuthProvider`/`NoopAuth` split so a real deployment swaps in
//! its own provider (JWT verification, API keys, ...) without touching the
//! engine or routes.

use http::{HeaderMap, StatusCode};

#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub subject: Option<String>,
}

#[derive(Debug)]
pub struct AuthError {
    pub status: StatusCode,
    pub message: String,
}

impl AuthError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

pub trait AuthProvider: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError>;
}

#[derive(Debug, Default)]
pub struct NoopAuth;

impl AuthProvider for NoopAuth {
    fn authenticate(&self, _headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        Ok(AuthContext::default())
    }
}
