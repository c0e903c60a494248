//! Shared Azure credential and HTTP context
//!
//! `ArmContext` resolves credentials once and is cloned into every client
//! that talks to Azure Resource Manager.

use super::error::{ArmError, ArmResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Public-cloud Resource Manager endpoint
pub const MANAGEMENT_URL: &str = "https://management.azure.com";

/// Public-cloud Entra ID login endpoint
pub const LOGIN_URL: &str = "https://login.microsoftonline.com";

/// Token audience for Resource Manager
const ARM_SCOPE: &str = "https://management.azure.com/.default";
const ARM_RESOURCE: &str = "https://management.azure.com/";

/// Tokens are refreshed this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Where bearer tokens come from
#[derive(Clone)]
enum TokenSource {
    /// Client-credentials flow for a service principal
    ServicePrincipal {
        tenant_id: String,
        client_id: String,
        client_secret: String,
        login_url: String,
    },
    /// App Service / Container Apps identity endpoint, or IMDS when unset
    ManagedIdentity {
        endpoint: Option<String>,
        header: Option<String>,
        client_id: Option<String>,
    },
    /// `az account get-access-token`
    AzureCli { tenant_id: Option<String> },
    /// Fixed token, for tests against a mock server
    Static(String),
}

impl TokenSource {
    fn describe(&self) -> &'static str {
        match self {
            TokenSource::ServicePrincipal { .. } => "service principal",
            TokenSource::ManagedIdentity { .. } => "managed identity",
            TokenSource::AzureCli { .. } => "Azure CLI",
            TokenSource::Static(_) => "static token",
        }
    }
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

struct ContextInner {
    http: reqwest::Client,
    source: TokenSource,
    cache: Mutex<Option<CachedToken>>,
    management_url: String,
}

/// Shared Azure context for creating ARM clients.
///
/// # Example
/// ```ignore
/// let ctx = ArmContext::from_env(None)?;
/// let arm = ArmClient::from_context(&ctx);
/// ```
#[derive(Clone)]
pub struct ArmContext {
    inner: Arc<ContextInner>,
}

impl ArmContext {
    /// Resolve credentials from the environment.
    ///
    /// Selection order:
    /// 1. `AZURE_CLIENT_ID` + `AZURE_CLIENT_SECRET` + `AZURE_TENANT_ID` → service principal
    /// 2. `IDENTITY_ENDPOINT` or `AZURE_USE_MANAGED_IDENTITY` → managed identity
    /// 3. Otherwise → Azure CLI
    pub fn from_env(tenant_id: Option<&str>) -> ArmResult<Self> {
        let tenant_id = tenant_id
            .map(str::to_string)
            .or_else(|| std::env::var("AZURE_TENANT_ID").ok());

        let source = match (
            std::env::var("AZURE_CLIENT_ID").ok(),
            std::env::var("AZURE_CLIENT_SECRET").ok(),
            tenant_id.clone(),
        ) {
            (Some(client_id), Some(client_secret), Some(tenant_id)) => {
                TokenSource::ServicePrincipal {
                    tenant_id,
                    client_id,
                    client_secret,
                    login_url: LOGIN_URL.to_string(),
                }
            }
            (client_id, _, _)
                if std::env::var("IDENTITY_ENDPOINT").is_ok()
                    || std::env::var("AZURE_USE_MANAGED_IDENTITY").is_ok() =>
            {
                TokenSource::ManagedIdentity {
                    endpoint: std::env::var("IDENTITY_ENDPOINT").ok(),
                    header: std::env::var("IDENTITY_HEADER").ok(),
                    client_id,
                }
            }
            _ => TokenSource::AzureCli { tenant_id },
        };

        Self::build(source, MANAGEMENT_URL)
    }

    /// Context with a fixed bearer token and a custom management URL.
    ///
    /// Used by tests that point the client at a mock server.
    pub fn with_static_token(management_url: &str, token: &str) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                http: reqwest::Client::new(),
                source: TokenSource::Static(token.to_string()),
                cache: Mutex::new(None),
                management_url: management_url.trim_end_matches('/').to_string(),
            }),
        }
    }

    fn build(source: TokenSource, management_url: &str) -> ArmResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(concat!("km-provision/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ArmError::Auth(format!("failed to build HTTP client: {e}")))?;

        debug!(source = source.describe(), "Resolved Azure credential source");

        Ok(Self {
            inner: Arc::new(ContextInner {
                http,
                source,
                cache: Mutex::new(None),
                management_url: management_url.to_string(),
            }),
        })
    }

    /// HTTP client shared by every ARM call
    pub fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    /// Base URL of Resource Manager
    pub fn management_url(&self) -> &str {
        &self.inner.management_url
    }

    /// Human-readable name of the credential source
    pub fn credential_source(&self) -> &'static str {
        self.inner.source.describe()
    }

    /// Current bearer token, refreshed when close to expiry
    pub async fn bearer(&self) -> ArmResult<String> {
        if let TokenSource::Static(token) = &self.inner.source {
            return Ok(token.clone());
        }

        let mut cache = self.inner.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.token.clone());
            }
        }

        let (token, expires_in) = self.fetch_token().await?;
        let lifetime = expires_in.saturating_sub(TOKEN_REFRESH_MARGIN);
        *cache = Some(CachedToken {
            token: token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token)
    }

    async fn fetch_token(&self) -> ArmResult<(String, Duration)> {
        match &self.inner.source {
            TokenSource::ServicePrincipal {
                tenant_id,
                client_id,
                client_secret,
                login_url,
            } => {
                let url = format!("{login_url}/{tenant_id}/oauth2/v2.0/token");
                let params = [
                    ("grant_type", "client_credentials"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("scope", ARM_SCOPE),
                ];
                let resp: Value = self
                    .inner
                    .http
                    .post(&url)
                    .form(&params)
                    .send()
                    .await
                    .map_err(|e| ArmError::Auth(format!("service principal token request: {e}")))?
                    .json()
                    .await
                    .map_err(|e| ArmError::Auth(format!("service principal token decode: {e}")))?;
                token_from_response(&resp, "access_token")
            }
            TokenSource::ManagedIdentity {
                endpoint,
                header,
                client_id,
            } => {
                let mut request = match endpoint {
                    Some(endpoint) => {
                        let req = self
                            .inner
                            .http
                            .get(endpoint)
                            .query(&[("api-version", "2019-08-01"), ("resource", ARM_RESOURCE)]);
                        match header {
                            Some(h) => req.header("X-IDENTITY-HEADER", h),
                            None => req,
                        }
                    }
                    None => self
                        .inner
                        .http
                        .get("http://169.254.169.254/metadata/identity/oauth2/token")
                        .header("Metadata", "true")
                        .query(&[("api-version", "2018-02-01"), ("resource", ARM_RESOURCE)]),
                };
                if let Some(client_id) = client_id {
                    request = request.query(&[("client_id", client_id)]);
                }
                let resp: Value = request
                    .send()
                    .await
                    .map_err(|e| ArmError::Auth(format!("managed identity token request: {e}")))?
                    .json()
                    .await
                    .map_err(|e| ArmError::Auth(format!("managed identity token decode: {e}")))?;
                token_from_response(&resp, "access_token")
            }
            TokenSource::AzureCli { tenant_id } => {
                let mut cmd = tokio::process::Command::new("az");
                cmd.args([
                    "account",
                    "get-access-token",
                    "--resource",
                    ARM_RESOURCE,
                    "--output",
                    "json",
                ]);
                if let Some(tenant_id) = tenant_id {
                    cmd.args(["--tenant", tenant_id]);
                }
                let output = cmd.output().await.map_err(|e| {
                    ArmError::Auth(format!(
                        "az CLI not found: {e}. Install the Azure CLI or configure service principal credentials"
                    ))
                })?;
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(ArmError::Auth(format!(
                        "az account get-access-token failed: {}",
                        stderr.trim()
                    )));
                }
                let resp: Value = serde_json::from_slice(&output.stdout)
                    .map_err(|e| ArmError::Auth(format!("az CLI output parse: {e}")))?;
                token_from_response(&resp, "accessToken")
            }
            TokenSource::Static(token) => Ok((token.clone(), Duration::from_secs(3600))),
        }
    }
}

/// Extract the token and its remaining lifetime from a token response.
///
/// `expires_in` arrives as a number from Entra ID and as a string from the
/// identity endpoints; the CLI only reports an absolute `expires_on`.
fn token_from_response(resp: &Value, field: &str) -> ArmResult<(String, Duration)> {
    let token = resp[field]
        .as_str()
        .ok_or_else(|| ArmError::Auth(format!("no {field} in token response")))?
        .to_string();

    let expires_in = resp["expires_in"]
        .as_u64()
        .or_else(|| resp["expires_in"].as_str().and_then(|s| s.parse().ok()))
        .or_else(|| {
            let expires_on = resp["expires_on"]
                .as_i64()
                .or_else(|| resp["expires_on"].as_str().and_then(|s| s.parse().ok()))?;
            let remaining = expires_on - chrono::Utc::now().timestamp();
            u64::try_from(remaining).ok()
        })
        .unwrap_or(300);

    Ok((token, Duration::from_secs(expires_in)))
}

impl std::fmt::Debug for ArmContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmContext")
            .field("credential_source", &self.credential_source())
            .field("management_url", &self.inner.management_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_static_token() {
        let ctx = ArmContext::with_static_token("http://localhost:1234/", "fake");
        assert_eq!(ctx.bearer().await.unwrap(), "fake");
        assert_eq!(ctx.management_url(), "http://localhost:1234");
        assert_eq!(ctx.credential_source(), "static token");
    }

    #[test]
    fn test_token_expiry_formats() {
        let (tok, ttl) = token_from_response(
            &json!({"access_token": "a", "expires_in": 3599}),
            "access_token",
        )
        .unwrap();
        assert_eq!(tok, "a");
        assert_eq!(ttl, Duration::from_secs(3599));

        let (_, ttl) = token_from_response(
            &json!({"access_token": "b", "expires_in": "600"}),
            "access_token",
        )
        .unwrap();
        assert_eq!(ttl, Duration::from_secs(600));

        let expires_on = chrono::Utc::now().timestamp() + 1000;
        let (_, ttl) = token_from_response(
            &json!({"accessToken": "c", "expires_on": expires_on}),
            "accessToken",
        )
        .unwrap();
        assert!(ttl <= Duration::from_secs(1000) && ttl >= Duration::from_secs(990));
    }

    #[test]
    fn test_missing_token_is_auth_error() {
        let err = token_from_response(&json!({"error": "nope"}), "access_token").unwrap_err();
        assert!(matches!(err, ArmError::Auth(_)));
    }
}
