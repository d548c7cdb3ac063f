use crate::{
    Cache, Config, Error, Result,
    config::CALENDAR_SCOPE,
    credentials::{Credentials, OAuthCredentials, ServiceAccountKey},
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for service account assertions.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Cached tokens are dropped this long before Google says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Turns parsed credentials into bearer tokens, performing refresh and
/// service account grants against the OAuth token endpoint.
#[derive(Clone)]
pub struct Authorizer {
    http: reqwest::Client,
    token_uri: String,
    tokens: Cache<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<&'a str>,
}

impl Authorizer {
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        Self {
            http,
            token_uri: config.token_uri.clone(),
            tokens: Cache::new(config.token_cache_size),
        }
    }

    /// Returns a bearer token for `credentials`. `subject` is only honored
    /// by service accounts (domain-wide delegation).
    pub async fn authorize(&self, credentials: &Credentials, subject: Option<&str>) -> Result<String> {
        match credentials {
            Credentials::AccessToken(token) => Ok(token.clone()),
            Credentials::OAuth(oauth) if !oauth.can_refresh() => Ok(oauth.token.clone()),
            Credentials::OAuth(oauth) => {
                let key = oauth_cache_key(oauth);
                if let Some(token) = self.tokens.get(&key).await {
                    return Ok(token);
                }
                if oauth.is_expired(Utc::now()) {
                    tracing::debug!("access token expired, refreshing");
                    self.refresh(oauth, key).await
                } else {
                    Ok(oauth.token.clone())
                }
            }
            Credentials::ServiceAccount(account) => {
                let key = service_account_cache_key(account, subject);
                if let Some(token) = self.tokens.get(&key).await {
                    return Ok(token);
                }
                self.grant(account, subject, key).await
            }
        }
    }

    /// Obtains a fresh token after the API rejected the current one.
    /// Returns `None` if the credentials carry no way to renew themselves.
    pub async fn reauthorize(
        &self,
        credentials: &Credentials,
        subject: Option<&str>,
    ) -> Result<Option<String>> {
        match credentials {
            Credentials::AccessToken(_) => Ok(None),
            Credentials::OAuth(oauth) if !oauth.can_refresh() => Ok(None),
            Credentials::OAuth(oauth) => {
                let key = oauth_cache_key(oauth);
                self.tokens.remove(&key).await;
                self.refresh(oauth, key).await.map(Some)
            }
            Credentials::ServiceAccount(account) => {
                let key = service_account_cache_key(account, subject);
                self.tokens.remove(&key).await;
                self.grant(account, subject, key).await.map(Some)
            }
        }
    }

    async fn refresh(&self, oauth: &OAuthCredentials, cache_key: String) -> Result<String> {
        let token_uri = oauth.token_uri.as_deref().unwrap_or(&self.token_uri);
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", oauth.refresh_token.as_deref().unwrap_or_default()),
            ("client_id", oauth.client_id.as_deref().unwrap_or_default()),
            ("client_secret", oauth.client_secret.as_deref().unwrap_or_default()),
        ];

        let response = self
            .request_token(token_uri, &form)
            .await
            .map_err(|err| Error::TokenRefresh(err.to_string()))?;

        self.remember(cache_key, &response).await;
        Ok(response.access_token)
    }

    async fn grant(
        &self,
        account: &ServiceAccountKey,
        subject: Option<&str>,
        cache_key: String,
    ) -> Result<String> {
        let token_uri = account.token_uri.as_deref().unwrap_or(&self.token_uri);

        let response = async {
            let assertion = sign_assertion(account, subject, token_uri)?;
            let form = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())];
            let response = self.request_token(token_uri, &form).await?;
            Ok::<_, Error>(response)
        }
        .await
        .map_err(|err| match err {
            Error::ServiceAccountAuth(_) => err,
            other => Error::ServiceAccountAuth(other.to_string()),
        })?;

        tracing::debug!(
            client_email = %account.client_email,
            subject = subject.unwrap_or("-"),
            "obtained service account token"
        );
        self.remember(cache_key, &response).await;
        Ok(response.access_token)
    }

    async fn request_token(&self, token_uri: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self.http.post(token_uri).form(form).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<TokenError>(&body) {
                Ok(TokenError {
                    error,
                    error_description: Some(description),
                }) => format!("{error}: {description}"),
                Ok(TokenError { error, .. }) => error,
                Err(_) => body,
            };
            return Err(Error::TokenEndpoint {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    async fn remember(&self, key: String, response: &TokenResponse) {
        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(3600));
        let ttl = lifetime.saturating_sub(EXPIRY_MARGIN);
        self.tokens.cleanup().await;
        if !ttl.is_zero() {
            self.tokens.insert(key, response.access_token.clone(), ttl).await;
        }
    }
}

fn sign_assertion(account: &ServiceAccountKey, subject: Option<&str>, audience: &str) -> Result<String> {
    let iat = Utc::now().timestamp();
    let claims = AssertionClaims {
        iss: &account.client_email,
        scope: CALENDAR_SCOPE,
        aud: audience,
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
        sub: subject,
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = account.private_key_id.clone();

    let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())?;
    Ok(jsonwebtoken::encode(&header, &claims, &key)?)
}

/// Cache keys are digests over the secret half of the credentials, so only a
/// caller holding the same secrets can be handed a cached token.
fn oauth_cache_key(oauth: &OAuthCredentials) -> String {
    format!(
        "oauth:{}",
        fingerprint(&[
            oauth.client_id.as_deref().unwrap_or_default(),
            oauth.client_secret.as_deref().unwrap_or_default(),
            oauth.refresh_token.as_deref().unwrap_or_default(),
            oauth.token_uri.as_deref().unwrap_or_default(),
        ])
    )
}

fn service_account_cache_key(account: &ServiceAccountKey, subject: Option<&str>) -> String {
    format!(
        "sa:{}",
        fingerprint(&[
            account.client_email.as_str(),
            account.private_key_id.as_deref().unwrap_or_default(),
            account.private_key.as_str(),
            account.token_uri.as_deref().unwrap_or_default(),
            subject.unwrap_or_default(),
        ])
    )
}

fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        // Length prefix keeps ("ab", "c") and ("a", "bc") apart
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
