use crate::config::{GroupSyncConfig, RetryConfig};
use crate::error::{GroupSyncError, GroupSyncResult};
use crate::model::{DirectoryGroup, DirectoryMember};
use crate::pagination::{FetchResult, PartialFetch, TokenPage, fetch_token_pages};
use crate::retry::retry_transient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub const DIRECTORY_SCOPES: [&str; 3] = [
    "https://www.googleapis.com/auth/admin.directory.group.readonly",
    "https://www.googleapis.com/auth/admin.directory.group.member.readonly",
    "https://www.googleapis.com/auth/admin.directory.user.readonly"
];

const MAX_RESULTS: u32 = 200;

/// Read access to the directory's groups and group members.
#[async_trait]
pub trait DirectoryApi: Send + Sync {
    async fn list_groups(
        &self,
        domain: &str,
        page_token: Option<&str>
    ) -> GroupSyncResult<TokenPage<DirectoryGroup>>;

    async fn list_members(
        &self,
        group_email: &str,
        page_token: Option<&str>
    ) -> GroupSyncResult<TokenPage<DirectoryMember>>;
}

/// Lists every group of `domain` and keeps the ones named with `prefix`.
pub async fn fetch_prefixed_groups(
    api: &dyn DirectoryApi,
    domain: &str,
    prefix: &str,
    max_pages: u32
) -> FetchResult<DirectoryGroup> {
    let keep = |groups: Vec<DirectoryGroup>| -> Vec<DirectoryGroup> {
        groups
            .into_iter()
            .filter(|g| g.name.starts_with(prefix))
            .collect()
    };

    match fetch_token_pages("directory groups", max_pages, |token| async move {
        api.list_groups(domain, token.as_deref()).await
    })
    .await
    {
        Ok(groups) => Ok(keep(groups)),
        Err(partial) => Err(PartialFetch {
            items: keep(partial.items),
            error: partial.error
        })
    }
}

pub async fn fetch_group_members(
    api: &dyn DirectoryApi,
    group_email: &str,
    max_pages: u32
) -> FetchResult<DirectoryMember> {
    fetch_token_pages("directory members", max_pages, |token| async move {
        api.list_members(group_email, token.as_deref()).await
    })
    .await
}

/// Supplies bearer tokens for the directory API.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> GroupSyncResult<String>;

    /// Drops any cached token after the API rejected it.
    async fn invalidate(&self) {}
}

pub struct StaticTokenSource(String);

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn access_token(&self) -> GroupSyncResult<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> GroupSyncResult<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GroupSyncError::decode("service account key", b"<redacted>", e))
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64
}

#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    expires_in: u64
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>
}

fn fresh_token(cached: Option<&CachedToken>) -> Option<String> {
    cached
        .filter(|t| t.expires_at > Utc::now() + chrono::Duration::minutes(5))
        .map(|t| t.token.clone())
}

/// Exchanges a signed service-account assertion for an access token,
/// impersonating `subject` through domain-wide delegation.
pub struct ServiceAccountTokenSource {
    http_client: Client,
    key: ServiceAccountKey,
    subject: String,
    cached: Arc<RwLock<Option<CachedToken>>>
}

impl ServiceAccountTokenSource {
    pub fn new(http_client: Client, key: ServiceAccountKey, subject: impl Into<String>) -> Self {
        Self {
            http_client,
            key,
            subject: subject.into(),
            cached: Arc::new(RwLock::new(None))
        }
    }

    async fn exchange_assertion(&self) -> GroupSyncResult<CachedToken> {
        let now = Utc::now();
        let assertion = self.signed_assertion(now)?;
        let body = format!(
            "grant_type={}&assertion={}",
            urlencoding::encode("urn:ietf:params:oauth:grant-type:jwt-bearer"),
            urlencoding::encode(&assertion)
        );

        debug!(subject = %self.subject, "Exchanging service account assertion");
        let response = self
            .http_client
            .post(&self.key.token_uri)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_body = response.text().await.unwrap_or_default();
            return Err(GroupSyncError::AuthenticationError(format!(
                "Token request failed: {} - {}",
                status, error_body
            )));
        }

        let bytes = response.bytes().await?;
        let token_response: OAuthTokenResponse = serde_json::from_slice(&bytes)
            .map_err(|e| GroupSyncError::decode("service account token", &bytes, e))?;

        Ok(CachedToken {
            token: token_response.access_token,
            expires_at: now + chrono::Duration::seconds(token_response.expires_in as i64)
        })
    }

    fn signed_assertion(&self, now: DateTime<Utc>) -> GroupSyncResult<String> {
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            sub: &self.subject,
            scope: DIRECTORY_SCOPES.join(" "),
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: (now + chrono::Duration::hours(1)).timestamp()
        };
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?;
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &key
        )?)
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokenSource {
    async fn access_token(&self) -> GroupSyncResult<String> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = fresh_token(Option::as_ref(&*cached)) {
                return Ok(token);
            }
        }

        // Concurrent callers queue on the write lock; only the first exchanges.
        let mut cached = self.cached.write().await;
        if let Some(token) = fresh_token(Option::as_ref(&*cached)) {
            return Ok(token);
        }

        let fetched = self.exchange_assertion().await?;
        let token = fetched.token.clone();
        *cached = Some(fetched);
        Ok(token)
    }

    async fn invalidate(&self) {
        let mut cached = self.cached.write().await;
        *cached = None;
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupsResponse {
    #[serde(default)]
    groups: Vec<DirectoryGroup>,
    next_page_token: Option<String>
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembersResponse {
    #[serde(default)]
    members: Vec<DirectoryMember>,
    next_page_token: Option<String>
}

/// Google Workspace Admin SDK directory client.
pub struct GoogleDirectoryClient {
    http_client: Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenSource>,
    retry: RetryConfig
}

impl GoogleDirectoryClient {
    pub fn new(base_url: &str, tokens: Arc<dyn AccessTokenSource>) -> GroupSyncResult<Self> {
        Self::with_timeout(base_url, tokens, std::time::Duration::from_secs(10))
    }

    pub fn with_timeout(
        base_url: &str,
        tokens: Arc<dyn AccessTokenSource>,
        timeout: std::time::Duration
    ) -> GroupSyncResult<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GroupSyncError::HttpError)?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            retry: RetryConfig::default()
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Builds a client authenticated with the service-account key named in
    /// the configuration, impersonating the configured admin.
    pub fn from_config(config: &GroupSyncConfig) -> GroupSyncResult<Self> {
        let path = config.directory.credentials_path.as_deref().ok_or_else(|| {
            GroupSyncError::ConfigError("GOOGLE_APPLICATION_CREDENTIALS not set".to_string())
        })?;
        let key = ServiceAccountKey::from_file(path)?;

        let token_client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(GroupSyncError::HttpError)?;
        let tokens = Arc::new(ServiceAccountTokenSource::new(
            token_client,
            key,
            config.directory.admin_email.clone()
        ));

        Ok(
            Self::with_timeout(&config.directory.base_url, tokens, config.request_timeout())?
                .with_retry(config.retry.clone())
        )
    }

    async fn get<T: DeserializeOwned>(&self, context: &str, url: &str) -> GroupSyncResult<T> {
        retry_transient(&self.retry, url, || self.get_once(context, url)).await
    }

    async fn get_once<T: DeserializeOwned>(&self, context: &str, url: &str) -> GroupSyncResult<T> {
        let token = self.tokens.access_token().await?;
        debug!(url = %url, "Making directory API request");

        let response = self
            .http_client
            .get(url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/json")
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let bytes = response.bytes().await?;
                serde_json::from_slice(&bytes).map_err(|e| GroupSyncError::decode(context, &bytes, e))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(1);
                Err(GroupSyncError::RateLimited {
                    retry_after_seconds: retry_after
                })
            }
            StatusCode::UNAUTHORIZED => {
                self.tokens.invalidate().await;
                Err(GroupSyncError::AuthenticationError(
                    "Directory authentication failed".to_string()
                ))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(GroupSyncError::ApiError {
                    status: status.as_u16(),
                    url: url.to_string(),
                    body
                })
            }
        }
    }
}

fn with_page_token(mut url: String, page_token: Option<&str>) -> String {
    if let Some(token) = page_token {
        url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
    }
    url
}

#[async_trait]
impl DirectoryApi for GoogleDirectoryClient {
    async fn list_groups(
        &self,
        domain: &str,
        page_token: Option<&str>
    ) -> GroupSyncResult<TokenPage<DirectoryGroup>> {
        let url = with_page_token(
            format!(
                "{}/admin/directory/v1/groups?domain={}&maxResults={}",
                self.base_url,
                urlencoding::encode(domain),
                MAX_RESULTS
            ),
            page_token
        );

        let response: GroupsResponse = self.get("list directory groups", &url).await?;
        Ok(TokenPage {
            items: response.groups,
            next_page_token: response.next_page_token
        })
    }

    async fn list_members(
        &self,
        group_email: &str,
        page_token: Option<&str>
    ) -> GroupSyncResult<TokenPage<DirectoryMember>> {
        let url = with_page_token(
            format!(
                "{}/admin/directory/v1/groups/{}/members?maxResults={}",
                self.base_url,
                urlencoding::encode(group_email),
                MAX_RESULTS
            ),
            page_token
        );

        let response: MembersResponse = self.get("list directory members", &url).await?;
        Ok(TokenPage {
            items: response.members,
            next_page_token: response.next_page_token
        })
    }
}
