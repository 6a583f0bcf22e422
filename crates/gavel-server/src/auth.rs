use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use constant_time_eq::constant_time_eq;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppState;

pub const ADMIN_ROLE: &str = "admin";

/// Lifetime of an issued admin token.
const TOKEN_LIFETIME_SECS: i64 = 12 * 3600;

/// Claims carried by a bearer credential. Created at login, consumed once per
/// request, never persisted server-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Subject identity (admin email).
    pub sub: String,
    pub role: String,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
}

/// Terminal outcomes of the gate, in check order. Authentication failures
/// (401) are distinct from authorization failure (403).
#[derive(Debug, PartialEq)]
pub enum AuthError {
    /// `Authorization` header absent or not `Bearer `-prefixed.
    MissingCredential,
    /// Signature verification failed or the token is past expiry.
    InvalidCredential,
    /// Valid token, but the role claim is not the required role.
    InsufficientRole,
}

impl AuthError {
    fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::InvalidCredential => "invalid_credential",
            Self::InsufficientRole => "insufficient_role",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::MissingCredential => (StatusCode::UNAUTHORIZED, "missing bearer credential"),
            Self::InvalidCredential => (StatusCode::UNAUTHORIZED, "invalid or expired credential"),
            Self::InsufficientRole => (StatusCode::FORBIDDEN, "insufficient role"),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

/// Verifies bearer credentials and issues admin tokens.
pub struct Authenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    /// Whether `POST /login` may issue admin credentials at all. The observed
    /// deployment runs with issuance disabled; the capability stays restorable
    /// through configuration rather than a code change.
    pub admin_issuance_enabled: bool,
    admin_email: Option<String>,
    admin_password: Option<String>,
}

impl Authenticator {
    pub fn new(
        secret: &str,
        admin_issuance_enabled: bool,
        admin_email: Option<String>,
        admin_password: Option<String>,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            admin_issuance_enabled,
            admin_email,
            admin_password,
        }
    }

    /// Check an `Authorization` header value against the gate's three
    /// preconditions, in order. Returns the decoded claims on success.
    pub fn verify_bearer(&self, header: Option<&str>) -> Result<Claims, AuthError> {
        let token = header
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AuthError::MissingCredential)?;

        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|_| AuthError::InvalidCredential)?;

        if data.claims.role != ADMIN_ROLE {
            return Err(AuthError::InsufficientRole);
        }
        Ok(data.claims)
    }

    /// Constant-time comparison of the configured admin login. Unconfigured
    /// credentials never match.
    pub fn check_admin_login(&self, email: &str, password: &str) -> bool {
        match (&self.admin_email, &self.admin_password) {
            (Some(e), Some(p)) => {
                // Non-short-circuiting so both comparisons always run.
                constant_time_eq(e.as_bytes(), email.as_bytes())
                    & constant_time_eq(p.as_bytes(), password.as_bytes())
            }
            _ => false,
        }
    }

    /// Sign a fresh admin token for `subject`.
    pub fn issue_admin_token(&self, subject: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        let claims = Claims {
            sub: subject.to_owned(),
            role: ADMIN_ROLE.to_owned(),
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }
}

/// Axum middleware gating administrative routes. On success the decoded
/// claims are attached as a request extension; on failure the handler never
/// runs. The raw token is never logged.
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match state.auth.verify_bearer(header.as_deref()) {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(err) => {
            metrics::counter!("gavel_auth_rejections_total", "kind" => err.kind()).increment(1);
            tracing::debug!(kind = err.kind(), "rejected admin request");
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> Authenticator {
        Authenticator::new("test-secret", true, Some("admin@example.com".into()), Some("hunter2".into()))
    }

    #[test]
    fn missing_header_is_missing_credential() {
        assert_eq!(
            auth().verify_bearer(None).unwrap_err(),
            AuthError::MissingCredential
        );
    }

    #[test]
    fn malformed_bearer_syntax_is_missing_credential() {
        let a = auth();
        for header in ["Token abc", "Bearer", "bearer abc", ""] {
            assert_eq!(
                a.verify_bearer(Some(header)).unwrap_err(),
                AuthError::MissingCredential,
                "header: {header:?}"
            );
        }
    }

    #[test]
    fn garbage_token_is_invalid_credential() {
        assert_eq!(
            auth().verify_bearer(Some("Bearer not.a.jwt")).unwrap_err(),
            AuthError::InvalidCredential
        );
    }

    #[test]
    fn wrong_secret_is_invalid_credential() {
        let other = Authenticator::new("other-secret", true, None, None);
        let token = other.issue_admin_token("admin@example.com").unwrap();
        assert_eq!(
            auth()
                .verify_bearer(Some(&format!("Bearer {token}")))
                .unwrap_err(),
            AuthError::InvalidCredential
        );
    }

    #[test]
    fn expired_token_is_invalid_even_with_valid_signature() {
        let a = auth();
        let claims = Claims {
            sub: "admin@example.com".into(),
            role: ADMIN_ROLE.into(),
            iat: 1_000,
            exp: 2_000, // long past
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &a.encoding).unwrap();
        assert_eq!(
            a.verify_bearer(Some(&format!("Bearer {token}"))).unwrap_err(),
            AuthError::InvalidCredential
        );
    }

    #[test]
    fn wrong_role_is_insufficient_not_invalid() {
        let a = auth();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let claims = Claims {
            sub: "visitor@example.com".into(),
            role: "viewer".into(),
            iat: now,
            exp: now + 3600,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &a.encoding).unwrap();
        assert_eq!(
            a.verify_bearer(Some(&format!("Bearer {token}"))).unwrap_err(),
            AuthError::InsufficientRole
        );
    }

    #[test]
    fn issued_token_verifies_with_admin_role() {
        let a = auth();
        let token = a.issue_admin_token("admin@example.com").unwrap();
        let claims = a.verify_bearer(Some(&format!("Bearer {token}"))).unwrap();
        assert_eq!(claims.sub, "admin@example.com");
        assert_eq!(claims.role, ADMIN_ROLE);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn admin_login_check() {
        let a = auth();
        assert!(a.check_admin_login("admin@example.com", "hunter2"));
        assert!(!a.check_admin_login("admin@example.com", "wrong"));
        assert!(!a.check_admin_login("other@example.com", "hunter2"));

        let unconfigured = Authenticator::new("s", true, None, None);
        assert!(!unconfigured.check_admin_login("", ""));
    }
}
