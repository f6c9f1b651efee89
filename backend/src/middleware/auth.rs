//! Authentication middleware
//!
//! Verifies bearer tokens issued by the external auth service and exposes the
//! caller's branch and permissions to handlers.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::AppState;

/// Authenticated caller extracted from the JWT
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: String,
    /// Home branch of a branch-bound terminal or user.
    pub branch_id: Option<i64>,
    pub permissions: Vec<String>,
}

impl AuthUser {
    /// Check for a `resource:action` permission
    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        let permission = format!("{}:{}", resource, action);
        self.permissions.contains(&permission)
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub branch_id: Option<i64>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

/// Reject requests without a valid bearer token
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    {
        Some(token) => token,
        None => {
            return AppError::Unauthorized("Missing or invalid Authorization header".to_string())
                .into_response()
        }
    };

    let claims = match decode_jwt(token, &state.config.jwt.secret) {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };

    request.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
        branch_id: claims.branch_id,
        permissions: claims.permissions,
    });

    next.run(request).await
}

fn decode_jwt(token: &str, secret: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))
}

/// Extractor for the authenticated caller
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthUser);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

/// Permission guard for use in handlers
pub fn check_permission(user: &AuthUser, resource: &str, action: &str) -> AppResult<()> {
    if user.has_permission(resource, action) {
        Ok(())
    } else {
        tracing::debug!(
            "User {} lacks permission {}:{}",
            user.user_id,
            resource,
            action
        );
        Err(AppError::InsufficientPermissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn decodes_tokens_signed_with_shared_secret() {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: "cashier-7".to_string(),
            branch_id: Some(3),
            permissions: vec!["sales:create".to_string()],
            exp: now + 600,
            iat: now,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        let decoded = decode_jwt(&token, "secret").unwrap();
        assert_eq!(decoded.sub, "cashier-7");
        assert_eq!(decoded.branch_id, Some(3));
        assert!(matches!(
            decode_jwt(&token, "other"),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn permission_check() {
        let user = AuthUser {
            user_id: "u".to_string(),
            branch_id: None,
            permissions: vec!["stock:write".to_string()],
        };
        assert!(check_permission(&user, "stock", "write").is_ok());
        assert!(matches!(
            check_permission(&user, "disposals", "execute"),
            Err(AppError::InsufficientPermissions)
        ));
    }
}
