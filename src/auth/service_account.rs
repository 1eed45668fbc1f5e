//! Identity tokens minted from a service account key.
//!
//! A JWT assertion carrying a `target_audience` private claim is signed with
//! the account's RSA key and exchanged at the key's `token_uri` for a
//! Google-signed identity token. The identity token is reused until shortly
//! before the `exp` claim it carries.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{CredentialError, TokenError, TokenSource};

/// Token endpoint used when the key file does not name one.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// The grant type for JWT bearer assertions (RFC 7523).
const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

const SERVICE_ACCOUNT_TYPE: &str = "service_account";

/// Lifetime requested for the signed assertion.
const ASSERTION_LIFETIME: i64 = 3600;

/// Backdate `iat` to tolerate clock skew with the token endpoint.
const ISSUED_AT_SKEW: i64 = 10;

/// Tokens are refreshed this many seconds before they expire.
const EXPIRY_DELTA: i64 = 10;

/// Subset of the JSON key file needed to sign assertions.
#[derive(Debug, Deserialize)]
struct KeyFile {
    #[serde(rename = "type", default)]
    key_type: String,
    #[serde(default)]
    client_email: String,
    #[serde(default)]
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

/// A parsed service account key with its signing key ready for use.
pub struct ServiceAccountKey {
    client_email: String,
    private_key_id: Option<String>,
    token_uri: String,
    encoding_key: EncodingKey,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Parse a JSON key document.
    pub fn from_json(document: &[u8]) -> Result<Self, CredentialError> {
        let file: KeyFile = serde_json::from_slice(document)?;

        if file.key_type != SERVICE_ACCOUNT_TYPE {
            return Err(CredentialError::WrongType(file.key_type));
        }
        if file.client_email.is_empty() {
            return Err(CredentialError::MissingField("client_email"));
        }
        if file.private_key.is_empty() {
            return Err(CredentialError::MissingField("private_key"));
        }

        let encoding_key = EncodingKey::from_rsa_pem(file.private_key.as_bytes())
            .map_err(CredentialError::PrivateKey)?;

        Ok(Self {
            client_email: file.client_email,
            private_key_id: file.private_key_id.filter(|id| !id.is_empty()),
            token_uri: file
                .token_uri
                .filter(|uri| !uri.is_empty())
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            encoding_key,
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    pub fn token_uri(&self) -> &str {
        &self.token_uri
    }
}

/// Claims of the assertion sent to the token endpoint.
#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    aud: String,
    iat: i64,
    exp: i64,
    target_audience: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: String,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    exp: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expiry: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_DELTA) < self.expiry
    }
}

/// Token source that exchanges signed assertions for identity tokens.
pub struct ServiceAccountTokenSource {
    key: ServiceAccountKey,
    audience: String,
    http: reqwest::Client,
    /// Last token; the lock also serializes refreshes.
    cache: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    pub fn new(key: ServiceAccountKey, audience: String, http: reqwest::Client) -> Self {
        Self {
            key,
            audience,
            http,
            cache: Mutex::new(None),
        }
    }

    /// Sign the assertion JWT.
    fn assertion(&self, now: DateTime<Utc>) -> Result<String, TokenError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        let iat = now.timestamp() - ISSUED_AT_SKEW;
        let claims = AssertionClaims {
            iss: self.key.client_email.clone(),
            aud: self.key.token_uri.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME,
            target_audience: self.audience.clone(),
        };

        Ok(encode(&header, &claims, &self.key.encoding_key)?)
    }

    async fn exchange(&self) -> Result<CachedToken, TokenError> {
        let assertion = self.assertion(Utc::now())?;

        tracing::debug!(
            client_email = %self.key.client_email,
            token_uri = %self.key.token_uri,
            "Exchanging service account assertion for identity token"
        );

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT_TYPE),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(TokenError::Request)?;

        let status = response.status();
        let body = response.bytes().await.map_err(TokenError::Request)?;
        if !status.is_success() {
            return Err(TokenError::Exchange {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let parsed: TokenResponse = serde_json::from_slice(&body).map_err(TokenError::Decode)?;
        if parsed.id_token.is_empty() {
            return Err(TokenError::MissingIdToken);
        }

        let expiry = id_token_expiry(&parsed.id_token)?;
        Ok(CachedToken {
            token: parsed.id_token,
            expiry,
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn token(&self) -> Result<String, TokenError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.is_fresh(Utc::now()) {
                return Ok(cached.token.clone());
            }
        }

        let fresh = self.exchange().await?;
        tracing::debug!(expiry = %fresh.expiry, "Identity token refreshed");

        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }

    fn kind(&self) -> &'static str {
        "service_account"
    }
}

/// Read the `exp` claim of an identity token without verifying it.
fn id_token_expiry(id_token: &str) -> Result<DateTime<Utc>, TokenError> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| TokenError::MalformedIdToken("expected three segments".into()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| TokenError::MalformedIdToken(e.to_string()))?;

    let claims: IdTokenClaims =
        serde_json::from_slice(&bytes).map_err(|e| TokenError::MalformedIdToken(e.to_string()))?;

    DateTime::from_timestamp(claims.exp, 0)
        .ok_or_else(|| TokenError::MalformedIdToken(format!("exp {} out of range", claims.exp)))
}
