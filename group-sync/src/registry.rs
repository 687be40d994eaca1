use crate::config::{GroupSyncConfig, RetryConfig};
use crate::error::{GroupSyncError, GroupSyncResult};
use crate::model::{ListResponse, RegistryGroup, RegistryOrganization, RegistryUser};
use crate::pagination::{FetchResult, Page, fetch_numbered_pages};
use crate::retry::retry_transient;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error};

/// Operations the sync needs from the CI registry.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    async fn list_groups(&self, page: u32, size: u32) -> GroupSyncResult<Page<RegistryGroup>>;
    async fn list_users(&self, page: u32, size: u32) -> GroupSyncResult<Page<RegistryUser>>;
    async fn list_organizations(
        &self,
        page: u32,
        size: u32
    ) -> GroupSyncResult<Page<RegistryOrganization>>;
    async fn create_group(&self, group: &RegistryGroup) -> GroupSyncResult<()>;
    async fn update_group(&self, group_id: &str, group: &RegistryGroup) -> GroupSyncResult<()>;
}

pub async fn fetch_all_groups(
    api: &dyn RegistryApi,
    page_size: u32,
    max_pages: u32
) -> FetchResult<RegistryGroup> {
    fetch_numbered_pages("registry groups", page_size, max_pages, |page, size| {
        api.list_groups(page, size)
    })
    .await
}

pub async fn fetch_all_users(
    api: &dyn RegistryApi,
    page_size: u32,
    max_pages: u32
) -> FetchResult<RegistryUser> {
    fetch_numbered_pages("registry users", page_size, max_pages, |page, size| {
        api.list_users(page, size)
    })
    .await
}

pub async fn fetch_all_organizations(
    api: &dyn RegistryApi,
    page_size: u32,
    max_pages: u32
) -> FetchResult<RegistryOrganization> {
    fetch_numbered_pages("registry organizations", page_size, max_pages, |page, size| {
        api.list_organizations(page, size)
    })
    .await
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "clientID")]
    client_id: &'a str,
    #[serde(rename = "clientSecret")]
    client_secret: &'a str
}

#[derive(serde::Deserialize)]
struct LoginResponse {
    token: String
}

/// HTTP client for the registry API, authenticated with a bearer token.
pub struct RegistryClient {
    client: Client,
    base_url: String,
    token: String,
    retry: RetryConfig
}

impl RegistryClient {
    /// Builds the client and exchanges the configured client credentials for a
    /// bearer token.
    pub async fn connect(config: &GroupSyncConfig) -> GroupSyncResult<Self> {
        let mut client = Self::with_token(
            &config.registry.base_url,
            String::new(),
            config.request_timeout(),
            config.retry.clone()
        )?;
        client.token = client
            .login(&config.registry.client_id, &config.registry.client_secret)
            .await?;
        Ok(client)
    }

    pub fn with_token(
        base_url: &str,
        token: String,
        timeout: Duration,
        retry: RetryConfig
    ) -> GroupSyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GroupSyncError::HttpError)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            retry
        })
    }

    async fn login(&self, client_id: &str, client_secret: &str) -> GroupSyncResult<String> {
        let url = format!("{}/api/auth/client/login", self.base_url);
        let body = serde_json::to_value(LoginRequest {
            client_id,
            client_secret
        })?;

        let bytes = self
            .send_with_retry(Method::POST, &url, Some(&body), StatusCode::OK, false)
            .await?;
        let response: LoginResponse = decode("get token", &bytes)?;

        if response.token.is_empty() {
            return Err(GroupSyncError::AuthenticationError(
                "registry returned an empty token".to_string()
            ));
        }
        Ok(response.token)
    }

    async fn list<T: DeserializeOwned>(
        &self,
        resource: &str,
        page: u32,
        size: u32
    ) -> GroupSyncResult<Page<T>> {
        let url = format!(
            "{}/api/{}?{}={}&{}={}",
            self.base_url,
            resource,
            urlencoding::encode("page[number]"),
            page,
            urlencoding::encode("page[size]"),
            size
        );

        let bytes = self
            .send_with_retry(Method::GET, &url, None, StatusCode::OK, true)
            .await?;
        let response: ListResponse<T> = decode(&format!("list {resource}"), &bytes)?;

        Ok(Page {
            items: response.items,
            total_pages: response.pagination.total_pages
        })
    }

    async fn send_with_retry(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        expected: StatusCode,
        authorized: bool
    ) -> GroupSyncResult<Vec<u8>> {
        retry_transient(&self.retry, url, || {
            self.send(method.clone(), url, body, expected, authorized)
        })
        .await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        expected: StatusCode,
        authorized: bool
    ) -> GroupSyncResult<Vec<u8>> {
        debug!(method = %method, url = %url, "Making registry API request");

        let mut request = self
            .client
            .request(method, url)
            .header("Content-Type", "application/json");
        if authorized {
            request = request.header("Authorization", format!("Bearer {}", self.token));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == expected {
            return Ok(response.bytes().await?.to_vec());
        }

        match status {
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
            StatusCode::UNAUTHORIZED => Err(GroupSyncError::AuthenticationError(format!(
                "{url} rejected the registry credentials"
            ))),
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

fn decode<T: DeserializeOwned>(context: &str, bytes: &[u8]) -> GroupSyncResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        error!(
            error = %e,
            body = %String::from_utf8_lossy(bytes),
            "Failed decoding {} response",
            context
        );
        GroupSyncError::decode(context, bytes, e)
    })
}

#[async_trait]
impl RegistryApi for RegistryClient {
    async fn list_groups(&self, page: u32, size: u32) -> GroupSyncResult<Page<RegistryGroup>> {
        self.list("groups", page, size).await
    }

    async fn list_users(&self, page: u32, size: u32) -> GroupSyncResult<Page<RegistryUser>> {
        self.list("users", page, size).await
    }

    async fn list_organizations(
        &self,
        page: u32,
        size: u32
    ) -> GroupSyncResult<Page<RegistryOrganization>> {
        self.list("organizations", page, size).await
    }

    async fn create_group(&self, group: &RegistryGroup) -> GroupSyncResult<()> {
        debug!(group_name = %group.name, "Creating registry group");
        let url = format!("{}/api/groups", self.base_url);
        let body = serde_json::to_value(group)?;
        self.send_with_retry(Method::POST, &url, Some(&body), StatusCode::CREATED, true)
            .await?;
        Ok(())
    }

    async fn update_group(&self, group_id: &str, group: &RegistryGroup) -> GroupSyncResult<()> {
        debug!(group_id, group_name = %group.name, "Updating registry group");
        let url = format!(
            "{}/api/groups/{}",
            self.base_url,
            urlencoding::encode(group_id)
        );
        let body = serde_json::to_value(group)?;
        self.send_with_retry(Method::PUT, &url, Some(&body), StatusCode::OK, true)
            .await?;
        Ok(())
    }
}
