use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::errors::{ApiError, ApiErrorKind};

/// Authenticated principal extracted from a verified bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: String,
}

#[derive(Debug)]
pub enum AuthFailure {
    Missing,
    Expired,
    Malformed,
}

impl AuthFailure {
    pub fn to_api_error(&self, request_id: Uuid) -> ApiError {
        let (code, message) = match self {
            AuthFailure::Missing => ("UNAUTHORIZED", "Authentication required"),
            AuthFailure::Expired => ("TOKEN_EXPIRED", "Token has expired. Please sign in again."),
            AuthFailure::Malformed => ("INVALID_TOKEN", "Invalid token"),
        };
        ApiError::with_request_id(
            ApiErrorKind::Unauthorized {
                code,
                message: message.to_string(),
            },
            request_id,
        )
    }
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: Option<String>,
    #[serde(default)]
    email: String,
}

struct CachedKeys {
    fetched_at: Instant,
    keys: JwkSet,
}

/// Verifies bearer JWTs against a JWKS endpoint.
///
/// The key set is fetched over HTTP and cached with a TTL; the issuer
/// rotates keys rarely enough that a short cache removes the JWKS endpoint
/// from the request hot path. When no JWKS URL is configured, verification
/// is disabled and every request runs as an anonymous local user.
pub struct AuthVerifier {
    jwks_url: Option<String>,
    cache_ttl: Duration,
    client: reqwest::Client,
    cache: RwLock<Option<CachedKeys>>,
}

impl AuthVerifier {
    pub fn new(jwks_url: Option<String>, cache_ttl_secs: u64) -> Self {
        Self {
            jwks_url,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            client: reqwest::Client::new(),
            cache: RwLock::new(None),
        }
    }

    pub fn enabled(&self) -> bool {
        self.jwks_url.is_some()
    }

    pub async fn verify_bearer(
        &self,
        headers: &HeaderMap,
    ) -> Result<AuthenticatedUser, AuthFailure> {
        let Some(jwks_url) = self.jwks_url.as_deref() else {
            return Ok(AuthenticatedUser {
                user_id: "local".to_string(),
                email: String::new(),
            });
        };

        let token = bearer_token(headers).ok_or(AuthFailure::Missing)?;

        let header = decode_header(token).map_err(|_| AuthFailure::Malformed)?;
        let kid = header.kid.clone().ok_or(AuthFailure::Malformed)?;

        let jwk = self.signing_key(jwks_url, &kid).await?;
        let decoding_key = DecodingKey::from_jwk(&jwk).map_err(|_| AuthFailure::Malformed)?;

        let mut validation = Validation::new(header.alg);
        // The issuer does not reliably set an audience claim.
        validation.validate_aud = false;

        let data = decode::<TokenClaims>(token, &decoding_key, &validation).map_err(|err| {
            match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthFailure::Expired,
                _ => AuthFailure::Malformed,
            }
        })?;

        let user_id = data.claims.sub.filter(|s| !s.is_empty()).ok_or_else(|| {
            tracing::warn!("token accepted by signature check but missing sub claim");
            AuthFailure::Malformed
        })?;

        Ok(AuthenticatedUser {
            user_id,
            email: data.claims.email,
        })
    }

    async fn signing_key(
        &self,
        jwks_url: &str,
        kid: &str,
    ) -> Result<jsonwebtoken::jwk::Jwk, AuthFailure> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.cache_ttl {
                    if let Some(jwk) = cached.keys.find(kid) {
                        return Ok(jwk.clone());
                    }
                }
            }
        }

        // Cache miss or unknown kid (possible rotation): refetch.
        let keys = self.fetch_jwks(jwks_url).await?;
        let jwk = keys.find(kid).cloned();

        let mut cache = self.cache.write().await;
        *cache = Some(CachedKeys {
            fetched_at: Instant::now(),
            keys,
        });

        jwk.ok_or(AuthFailure::Malformed)
    }

    async fn fetch_jwks(&self, jwks_url: &str) -> Result<JwkSet, AuthFailure> {
        let response = self
            .client
            .get(jwks_url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "failed to fetch JWKS");
                AuthFailure::Malformed
            })?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "JWKS endpoint returned error");
            return Err(AuthFailure::Malformed);
        }

        response.json::<JwkSet>().await.map_err(|err| {
            tracing::warn!(error = %err, "failed to parse JWKS");
            AuthFailure::Malformed
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_verifier_admits_anonymous_user() {
        let verifier = AuthVerifier::new(None, 300);
        assert!(!verifier.enabled());

        let user = verifier.verify_bearer(&HeaderMap::new()).await.unwrap();
        assert_eq!(user.user_id, "local");
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let verifier = AuthVerifier::new(Some("http://localhost:3000/jwks".into()), 300);
        let result = verifier.verify_bearer(&HeaderMap::new()).await;
        assert!(matches!(result, Err(AuthFailure::Missing)));
    }

    #[tokio::test]
    async fn garbage_token_is_malformed() {
        let verifier = AuthVerifier::new(Some("http://localhost:3000/jwks".into()), 300);
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer not-a-jwt".parse().unwrap());
        let result = verifier.verify_bearer(&headers).await;
        assert!(matches!(result, Err(AuthFailure::Malformed)));
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic dXNlcg==".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
