use std::net::SocketAddr;

use axum::Json;
use axum::extract::ConnectInfo;
use axum::extract::Request;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use jsonwebtoken::Algorithm;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::Header;
use jsonwebtoken::Validation;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

use crate::AppState;
use crate::error::ApiError;

/// Lifetime of tokens minted by `/jwt/create`.
const MINTED_TOKEN_TTL_SECS: i64 = 86_400;

/// Sign a claims object as an HS256 compact token. The payload must carry
/// `sub` and `exp`; extra claims pass through untouched.
pub fn issue(secret: &str, claims: &Value) -> Result<String, ApiError> {
    if claims.get("sub").and_then(Value::as_str).is_none() {
        return Err(ApiError::InvalidInput("missing `sub` claim".to_string()));
    }
    if claims.get("exp").and_then(Value::as_i64).is_none() {
        return Err(ApiError::InvalidInput("missing `exp` claim".to_string()));
    }
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|err| ApiError::Internal(format!("failed to sign token: {err}")))
}

/// Verify signature and expiry; the decoded payload on success.
pub fn verify(secret: &str, token: &str) -> Result<Value, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp", "sub"]);
    jsonwebtoken::decode::<Value>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthorized)
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Gate for the whole `/admin-api/v2` surface.
pub(crate) async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let secret = state.jwt_secret().await?;
    let token = bearer_token(request.headers()).ok_or(ApiError::Unauthorized)?;
    verify(&secret, token)?;
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct MintRequest {
    #[serde(default)]
    sub: Option<String>,
}

/// `POST /jwt/create` — only reachable from the local machine.
pub(crate) async fn mint_token(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: bytes::Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if !peer.ip().is_loopback() {
        return Err(ApiError::Unauthorized);
    }
    let secret = state.jwt_secret().await?;
    let request: MintRequest = if body.is_empty() {
        MintRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| ApiError::InvalidInput(format!("body is not valid JSON: {err}")))?
    };
    let sub = request.sub.unwrap_or_else(|| "admin".to_string());

    let now = Utc::now().timestamp();
    let exp = now + MINTED_TOKEN_TTL_SECS;
    let payload = json!({
        "sub": sub,
        "exp": exp,
        "iat": now,
        "type": "access",
        "scope": "full",
    });
    let token = issue(&secret, &payload)?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "token": token,
            "payload": payload,
            "expires_in": MINTED_TOKEN_TTL_SECS,
            "expires_at": exp,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn issue_then_verify_round_trips_extra_claims() -> anyhow::Result<()> {
        let claims = json!({
            "sub": "admin",
            "exp": Utc::now().timestamp() + 60,
            "scope": "full",
        });
        let token = issue("secret", &claims)?;
        let decoded = verify("secret", &token)?;
        assert_eq!(decoded.get("scope"), Some(&json!("full")));
        assert_eq!(decoded.get("sub"), Some(&json!("admin")));
        Ok(())
    }

    #[test]
    fn wrong_secret_is_rejected() -> anyhow::Result<()> {
        let claims = json!({"sub": "admin", "exp": Utc::now().timestamp() + 60});
        let token = issue("secret", &claims)?;
        assert!(matches!(
            verify("other", &token),
            Err(ApiError::Unauthorized)
        ));
        Ok(())
    }

    #[test]
    fn expired_token_is_rejected() -> anyhow::Result<()> {
        let claims = json!({"sub": "admin", "exp": Utc::now().timestamp() - 120});
        let token = issue("secret", &claims)?;
        assert!(matches!(
            verify("secret", &token),
            Err(ApiError::Unauthorized)
        ));
        Ok(())
    }

    #[test]
    fn issue_requires_sub_and_exp() {
        assert!(issue("secret", &json!({"exp": 1})).is_err());
        assert!(issue("secret", &json!({"sub": "x"})).is_err());
    }

    #[test]
    fn bearer_extraction_requires_the_scheme() -> anyhow::Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, "Bearer abc".parse()?);
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(http::header::AUTHORIZATION, "Basic abc".parse()?);
        assert_eq!(bearer_token(&headers), None);
        Ok(())
    }
}
