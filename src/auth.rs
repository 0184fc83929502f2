use std::sync::Arc;

use axum::{
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;

pub const ADMIN_ROLE: &str = "admin";

/// Authenticated caller identity, available to handlers via request extensions.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub name: String,
    pub role: String,
}

impl CallerIdentity {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

#[derive(Serialize)]
struct AuthError {
    success: bool,
    error: String,
}

fn reject(status: StatusCode, error: &str) -> Response {
    (status, Json(AuthError {
        success: false,
        error: error.to_string(),
    })).into_response()
}

/// Resolves the caller from `X-API-Key` or `Authorization: Bearer`.
pub fn authenticate(config: &AuthConfig, presented: Option<&str>) -> Option<CallerIdentity> {
    if !config.enabled {
        return Some(CallerIdentity {
            name: "anonymous".to_string(),
            role: ADMIN_ROLE.to_string(),
        });
    }

    let key = presented?;
    config
        .api_keys
        .iter()
        .find(|entry| entry.key.as_bytes().ct_eq(key.as_bytes()).into())
        .map(|entry| CallerIdentity {
            name: entry.name.clone(),
            role: entry.role.clone(),
        })
}

pub async fn auth_middleware<B>(
    Extension(config): Extension<Arc<AuthConfig>>,
    mut req: Request<B>,
    next: Next<B>,
) -> Response {
    let api_key = req.headers()
        .get("X-API-Key")
        .or_else(|| req.headers().get(header::AUTHORIZATION))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s));

    if config.enabled && api_key.is_none() {
        return reject(
            StatusCode::UNAUTHORIZED,
            "Missing API key. Provide X-API-Key header or Authorization: Bearer <key>",
        );
    }

    match authenticate(&config, api_key) {
        Some(identity) => {
            tracing::debug!(caller = %identity.name, role = %identity.role, "Authenticated request");
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        None => {
            tracing::warn!("Invalid API key presented");
            reject(StatusCode::UNAUTHORIZED, "Invalid API key")
        }
    }
}
