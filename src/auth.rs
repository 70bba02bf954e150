use crate::errors::{AppError, AppResult};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

/// Decides whether a caller may trigger a reload. Runs before any store access.
pub trait ReloadAuthorizer: Send + Sync {
    fn authorize(&self, headers: &HeaderMap) -> AppResult<()>;
}

/// `Authorization: Bearer <token>` against a configured shared secret.
/// Without a configured secret every request is refused.
#[derive(Clone, Default)]
pub struct SharedSecretAuthorizer {
    token: Option<String>,
}

impl SharedSecretAuthorizer {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|value| !value.is_empty()),
        }
    }
}

impl std::fmt::Debug for SharedSecretAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecretAuthorizer")
            .field("configured", &self.token.is_some())
            .finish()
    }
}

impl ReloadAuthorizer for SharedSecretAuthorizer {
    fn authorize(&self, headers: &HeaderMap) -> AppResult<()> {
        let Some(expected) = self.token.as_deref() else {
            return Err(AppError::Forbidden("reload is disabled: no reload token configured".to_string()));
        };

        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

        if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            Err(AppError::Unauthorized("invalid bearer token".to_string()))
        }
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter().zip(right).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}
