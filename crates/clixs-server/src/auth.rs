//! Credential verification for chat connections and REST calls.
//!
//! Tokens are HS256 JWTs whose `sub` is the user id. Every connection verifies its own token;
//! nothing is cached between connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderMap};
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use clixs_core::{AccountLookup, ChatError, Identity, UserId};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credentials")]
    Missing,
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("unknown account")]
    UnknownAccount,
    #[error("account is inactive")]
    InactiveAccount,
    #[error("account lookup failed: {0}")]
    Lookup(String),
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<AuthError> for ChatError {
    fn from(e: AuthError) -> Self {
        ChatError::Unauthenticated(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Resolves a bearer token to an identity.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// HS256 verifier, optionally cross-checking the subject against the account mirror.
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: Option<String>,
    accounts: Option<Arc<dyn AccountLookup>>,
}

impl JwtVerifier {
    pub fn new(secret: &SecretString, issuer: Option<String>) -> Self {
        let bytes = secret.expose_secret().as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(iss) = &issuer {
            validation.set_issuer(&[iss.as_str()]);
        }

        Self {
            encoding_key: EncodingKey::from_secret(bytes),
            decoding_key: DecodingKey::from_secret(bytes),
            validation,
            issuer,
            accounts: None,
        }
    }

    /// Reject subjects that are unknown to, or inactive in, `accounts`.
    pub fn with_accounts(mut self, accounts: Arc<dyn AccountLookup>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    /// Mint a token for `user_id` valid for `ttl`.
    pub fn issue(&self, user_id: &UserId, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: user_id.to_string(),
            exp: now.saturating_add(ttl),
            iat: now,
            iss: self.issuer.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Missing);
        }

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                other => AuthError::Invalid(format!("{other:?}")),
            }
        })?;

        if data.claims.sub.is_empty() {
            return Err(AuthError::Invalid("empty subject".into()));
        }
        let user_id = UserId::from_raw(data.claims.sub);

        if let Some(accounts) = &self.accounts {
            match accounts.account(&user_id) {
                Ok(Some(account)) if account.is_active => {}
                Ok(Some(_)) => return Err(AuthError::InactiveAccount),
                Ok(None) => return Err(AuthError::UnknownAccount),
                Err(e) => return Err(AuthError::Lookup(e.to_string())),
            }
        }

        debug!(user_id = %user_id, "token verified");
        Ok(Identity::new(user_id))
    }
}

/// Pull a bearer token from `?token=`, falling back to `Authorization: Bearer`.
pub fn extract_token(query: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.get("token").filter(|t| !t.is_empty()) {
        return Some(token.clone());
    }
    bearer_token(headers)
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use clixs_core::Account;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Accounts(Mutex<HashMap<UserId, bool>>);

    impl AccountLookup for Accounts {
        fn account(&self, id: &UserId) -> Result<Option<Account>, ChatError> {
            Ok(self.0.lock().unwrap().get(id).map(|active| Account {
                id: id.clone(),
                is_active: *active,
            }))
        }
    }

    fn secret() -> SecretString {
        SecretString::from("test-secret")
    }

    #[test]
    fn issue_then_verify() {
        let verifier = JwtVerifier::new(&secret(), None);
        let token = verifier
            .issue(&UserId::from_raw("usr_a"), Duration::from_secs(60))
            .unwrap();
        let identity = verifier.verify(&token).unwrap();
        assert_eq!(identity.user_id, UserId::from_raw("usr_a"));
    }

    #[test]
    fn expired_token_rejected() {
        let verifier = JwtVerifier::new(&secret(), None);
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "usr_a".into(),
            exp: now - 10,
            iat: now - 100,
            iss: None,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert_eq!(verifier.verify(&token).unwrap_err(), AuthError::Expired);
    }

    #[test]
    fn wrong_secret_rejected() {
        let other = JwtVerifier::new(&SecretString::from("other"), None);
        let token = other
            .issue(&UserId::from_raw("usr_a"), Duration::from_secs(60))
            .unwrap();
        let verifier = JwtVerifier::new(&secret(), None);
        assert!(matches!(verifier.verify(&token), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn garbage_and_empty_tokens_rejected() {
        let verifier = JwtVerifier::new(&secret(), None);
        assert_eq!(verifier.verify("").unwrap_err(), AuthError::Missing);
        assert!(matches!(verifier.verify("not.a.jwt"), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn issuer_is_enforced() {
        let minted_elsewhere = JwtVerifier::new(&secret(), Some("elsewhere".into()));
        let token = minted_elsewhere
            .issue(&UserId::from_raw("usr_a"), Duration::from_secs(60))
            .unwrap();

        let verifier = JwtVerifier::new(&secret(), Some("clixs".into()));
        assert!(matches!(verifier.verify(&token), Err(AuthError::Invalid(_))));

        let own = verifier
            .issue(&UserId::from_raw("usr_a"), Duration::from_secs(60))
            .unwrap();
        assert!(verifier.verify(&own).is_ok());
    }

    #[test]
    fn account_activity_is_checked() {
        let accounts = Arc::new(Accounts::default());
        accounts.0.lock().unwrap().insert(UserId::from_raw("usr_on"), true);
        accounts.0.lock().unwrap().insert(UserId::from_raw("usr_off"), false);
        let verifier = JwtVerifier::new(&secret(), None).with_accounts(accounts);

        let ttl = Duration::from_secs(60);
        let on = verifier.issue(&UserId::from_raw("usr_on"), ttl).unwrap();
        let off = verifier.issue(&UserId::from_raw("usr_off"), ttl).unwrap();
        let ghost = verifier.issue(&UserId::from_raw("usr_ghost"), ttl).unwrap();

        assert!(verifier.verify(&on).is_ok());
        assert_eq!(verifier.verify(&off).unwrap_err(), AuthError::InactiveAccount);
        assert_eq!(verifier.verify(&ghost).unwrap_err(), AuthError::UnknownAccount);
    }

    #[test]
    fn auth_errors_are_unauthenticated() {
        assert_eq!(ChatError::from(AuthError::Expired).kind(), "unauthenticated");
    }

    #[test]
    fn token_extraction_prefers_query() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));

        let mut query = HashMap::new();
        assert_eq!(extract_token(&query, &headers).as_deref(), Some("from-header"));

        query.insert("token".to_string(), "from-query".to_string());
        assert_eq!(extract_token(&query, &headers).as_deref(), Some("from-query"));

        query.insert("token".to_string(), String::new());
        assert_eq!(extract_token(&query, &headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn bearer_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer  tok "));
        assert_eq!(bearer_token(&headers).as_deref(), Some("tok"));
    }
}
