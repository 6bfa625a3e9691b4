// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Compute Engine REST client.
//!
//! Talks to the v1 REST API with `reqwest`. Access tokens come from a JSON
//! key file (refresh token grant for authorized users, signed JWT bearer
//! grant for service accounts) or, without credentials, from the instance
//! metadata server. Tokens are cached until shortly before they expire.
//!
//! Transient failures (429, 5xx, connection errors) are retried with
//! [`cloud_backoff`]. A 404 on an instance lookup is reported as `None`.

use super::{ComputeClient, ComputeProvider, Image, Instance, Operation, Subnetwork};
use crate::constants::{
    COMPUTE_API_BASE_URL, COMPUTE_OAUTH_SCOPE, JWT_BEARER_GRANT_TYPE, METADATA_TOKEN_URL,
    OAUTH_TOKEN_URL, SERVICE_ACCOUNT_ASSERTION_LIFETIME_SECS,
};
use crate::reconcilers::retry::{cloud_backoff, is_retryable_http_status};
use anyhow::{anyhow, bail, Context as _, Result};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// Tokens are refreshed this long before their reported expiry
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// HTTP error with status code for retry and not-found handling.
#[derive(Debug)]
struct HttpError {
    status: StatusCode,
    message: String,
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {}: {}", self.status, self.message)
    }
}

impl std::error::Error for HttpError {}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<HttpError>()
        .is_some_and(|e| e.status == StatusCode::NOT_FOUND)
}

/// API endpoints, overridable for tests and private endpoints.
#[derive(Clone, Debug)]
pub struct GceEndpoints {
    pub compute: Url,
    pub token: Url,
    pub metadata_token: Url,
}

impl GceEndpoints {
    /// The public Google endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in URL fails to parse.
    pub fn google() -> Result<Self> {
        Ok(Self {
            compute: Url::parse(COMPUTE_API_BASE_URL)?,
            token: Url::parse(OAUTH_TOKEN_URL)?,
            metadata_token: Url::parse(METADATA_TOKEN_URL)?,
        })
    }

    /// Every endpoint rooted at `base`, as served by a local emulator.
    ///
    /// # Errors
    ///
    /// Returns an error if `base` is not a valid URL.
    pub fn rooted_at(base: &str) -> Result<Self> {
        let base = Url::parse(base)?;
        Ok(Self {
            compute: base.clone(),
            token: base.join("/token")?,
            metadata_token: base.join("/computeMetadata/v1/token")?,
        })
    }
}

/// A JSON key file, either an authorized user or a service account.
#[derive(Clone, Debug, Deserialize)]
struct CredentialsFile {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    client_email: String,
    #[serde(default)]
    private_key: String,
    #[serde(default)]
    token_uri: String,
}

/// Where access tokens come from.
#[derive(Clone, Debug)]
pub enum TokenSource {
    /// OAuth2 refresh token grant against the token endpoint.
    RefreshToken {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    /// JWT bearer grant signed with a service account key.
    ServiceAccount {
        client_email: String,
        private_key: String,
        /// Token endpoint from the key file; the configured endpoint when `None`
        token_uri: Option<Url>,
    },
    /// The default service account of the instance the operator runs on.
    Metadata,
    /// A pre-issued access token.
    Static(String),
}

impl TokenSource {
    /// Token source for an optional JSON key file.
    ///
    /// # Errors
    ///
    /// Returns an error if the key file is malformed or of an unsupported type.
    pub fn from_credentials(credentials: Option<&str>) -> Result<Self> {
        let Some(raw) = credentials.filter(|c| !c.trim().is_empty()) else {
            return Ok(Self::Metadata);
        };
        let file: CredentialsFile =
            serde_json::from_str(raw).context("failed to parse cloud credentials")?;
        match file.type_.as_str() {
            "authorized_user" => Ok(Self::RefreshToken {
                client_id: file.client_id,
                client_secret: file.client_secret,
                refresh_token: file.refresh_token,
            }),
            "service_account" => {
                if file.client_email.is_empty() {
                    bail!("service account credentials are missing client_email");
                }
                EncodingKey::from_rsa_pem(file.private_key.as_bytes())
                    .context("service account credentials carry an invalid private_key")?;
                let token_uri = match file.token_uri.trim() {
                    "" => None,
                    uri => Some(
                        Url::parse(uri).with_context(|| format!("invalid token_uri {uri}"))?,
                    ),
                };
                Ok(Self::ServiceAccount {
                    client_email: file.client_email,
                    private_key: file.private_key,
                    token_uri,
                })
            }
            other => bail!("unsupported cloud credentials type {other}"),
        }
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

/// Signs the RS256 assertion exchanged for an access token at `audience`.
///
/// # Errors
///
/// Returns an error if the key is not an RSA PEM key or signing fails.
pub(crate) fn service_account_assertion(
    client_email: &str,
    private_key: &str,
    audience: &str,
) -> Result<String> {
    let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
        .context("invalid service account private key")?;
    let iat = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the Unix epoch")?
        .as_secs();
    let claims = AssertionClaims {
        iss: client_email,
        scope: COMPUTE_OAUTH_SCOPE,
        aud: audience,
        iat,
        exp: iat + SERVICE_ACCOUNT_ASSERTION_LIFETIME_SECS,
    };
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
        .context("failed to sign service account assertion")
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Long-running operation resource.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResource {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<OperationErrors>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct OperationErrors {
    #[serde(default)]
    errors: Vec<OperationError>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

struct Inner {
    http: reqwest::Client,
    endpoints: GceEndpoints,
    source: TokenSource,
    token: Mutex<Option<CachedToken>>,
}

/// Compute Engine client. Cheap to clone.
#[derive(Clone)]
pub struct GceClient {
    inner: Arc<Inner>,
}

impl GceClient {
    #[must_use]
    pub fn new(http: reqwest::Client, endpoints: GceEndpoints, source: TokenSource) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                endpoints,
                source,
                token: Mutex::new(None),
            }),
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.inner.endpoints.compute.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("{} cannot be a base URL", self.inner.endpoints.compute))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.inner.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let response = match &self.inner.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::RefreshToken {
                client_id,
                client_secret,
                refresh_token,
            } => {
                let form = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("grant_type", "refresh_token")
                    .append_pair("client_id", client_id)
                    .append_pair("client_secret", client_secret)
                    .append_pair("refresh_token", refresh_token)
                    .finish();
                self.post_token_form(self.inner.endpoints.token.clone(), form)
                    .await?
            }
            TokenSource::ServiceAccount {
                client_email,
                private_key,
                token_uri,
            } => {
                let token_url = token_uri
                    .clone()
                    .unwrap_or_else(|| self.inner.endpoints.token.clone());
                let assertion =
                    service_account_assertion(client_email, private_key, token_url.as_str())?;
                let form = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("grant_type", JWT_BEARER_GRANT_TYPE)
                    .append_pair("assertion", &assertion)
                    .finish();
                debug!(account = %client_email, "Exchanging service account assertion");
                self.post_token_form(token_url, form).await?
            }
            TokenSource::Metadata => self
                .inner
                .http
                .get(self.inner.endpoints.metadata_token.clone())
                .header("Metadata-Flavor", "Google")
                .send()
                .await
                .context("failed to request access token from metadata server")?,
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(HttpError { status, message }).context("access token request rejected");
        }
        let token: TokenResponse = response
            .json()
            .await
            .context("failed to decode access token")?;
        debug!(expires_in = token.expires_in, "Obtained compute access token");

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn post_token_form(&self, url: Url, form: String) -> Result<reqwest::Response> {
        self.inner
            .http
            .post(url)
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            )
            .body(form)
            .send()
            .await
            .context("failed to request access token")
    }

    /// One authenticated round trip. Non-success statuses become [`HttpError`].
    async fn send_once<B: Serialize + Sync>(
        &self,
        method: Method,
        url: &Url,
        body: Option<&B>,
    ) -> Result<String> {
        let token = self.access_token().await?;
        let mut request = self
            .inner
            .http
            .request(method.clone(), url.clone())
            .header(AUTHORIZATION, format!("Bearer {token}"));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send {method} request to {url}"))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(HttpError {
                status,
                message: text,
            }
            .into());
        }
        Ok(text)
    }

    /// [`Self::send_once`] with retries on transient failures.
    async fn send<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<T> {
        let mut backoff = cloud_backoff();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.send_once(method.clone(), &url, body).await {
                Ok(text) => {
                    return serde_json::from_str(&text)
                        .with_context(|| format!("failed to decode response from {url}"));
                }
                Err(err) => err,
            };

            let retryable = match err.downcast_ref::<HttpError>() {
                Some(http_err) => is_retryable_http_status(http_err.status),
                None => err
                    .downcast_ref::<reqwest::Error>()
                    .is_some_and(|e| e.is_connect() || e.is_timeout()),
            };
            if !retryable {
                return Err(err);
            }
            let Some(duration) = backoff.next_backoff() else {
                return Err(err.context(format!("{method} {url} failed after {attempt} attempts")));
            };
            warn!(
                method = %method,
                url = %url,
                attempt,
                retry_after = ?duration,
                error = %err,
                "Retryable compute API error, will retry"
            );
            tokio::time::sleep(duration).await;
        }
    }

    fn operation(&self, project: &str, zone: &str, resource: OperationResource) -> Box<dyn Operation> {
        Box::new(GceOperation {
            client: self.clone(),
            project: project.to_string(),
            zone: zone.to_string(),
            resource,
        })
    }
}

#[async_trait]
impl ComputeClient for GceClient {
    async fn get_image(&self, project: &str, family: &str) -> Result<Image> {
        let url = self.endpoint(&["projects", project, "global", "images", "family", family])?;
        self.send::<Image, ()>(Method::GET, url, None)
            .await
            .with_context(|| format!("failed to get image family {project}/{family}"))
    }

    async fn get_subnetwork(&self, project: &str, region: &str, name: &str) -> Result<Subnetwork> {
        let url = self.endpoint(&["projects", project, "regions", region, "subnetworks", name])?;
        self.send::<Subnetwork, ()>(Method::GET, url, None)
            .await
            .with_context(|| format!("failed to get subnetwork {region}/{name}"))
    }

    async fn get_instance(&self, project: &str, zone: &str, name: &str) -> Result<Option<Instance>> {
        let url = self.endpoint(&["projects", project, "zones", zone, "instances", name])?;
        match self.send::<Instance, ()>(Method::GET, url, None).await {
            Ok(instance) => Ok(Some(instance)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err.context(format!("failed to get instance {zone}/{name}"))),
        }
    }

    async fn insert_instance(
        &self,
        project: &str,
        zone: &str,
        instance: &Instance,
    ) -> Result<Box<dyn Operation>> {
        let url = self.endpoint(&["projects", project, "zones", zone, "instances"])?;
        let op: OperationResource = self
            .send(Method::POST, url, Some(instance))
            .await
            .with_context(|| format!("failed to insert instance {zone}/{}", instance.name))?;
        info!(instance = %instance.name, zone = %zone, operation = %op.name, "Inserting instance");
        Ok(self.operation(project, zone, op))
    }

    async fn delete_instance(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<Box<dyn Operation>> {
        let url = self.endpoint(&["projects", project, "zones", zone, "instances", name])?;
        let op: OperationResource = self
            .send::<_, ()>(Method::DELETE, url, None)
            .await
            .with_context(|| format!("failed to delete instance {zone}/{name}"))?;
        info!(instance = %name, zone = %zone, operation = %op.name, "Deleting instance");
        Ok(self.operation(project, zone, op))
    }
}

/// A zonal operation, polled through the `wait` method of the API.
struct GceOperation {
    client: GceClient,
    project: String,
    zone: String,
    resource: OperationResource,
}

#[async_trait]
impl Operation for GceOperation {
    async fn wait(self: Box<Self>) -> Result<()> {
        let mut resource = self.resource;
        while resource.status != "DONE" {
            let url = self.client.endpoint(&[
                "projects",
                &self.project,
                "zones",
                &self.zone,
                "operations",
                &resource.name,
                "wait",
            ])?;
            resource = self
                .client
                .send::<_, ()>(Method::POST, url, None)
                .await
                .with_context(|| format!("failed to wait on operation {}", resource.name))?;
            debug!(operation = %resource.name, status = %resource.status, "Polled operation");
        }

        if let Some(first) = resource.error.and_then(|e| e.errors.into_iter().next()) {
            bail!(
                "operation {} failed: {} {}",
                resource.name,
                first.code,
                first.message
            );
        }
        Ok(())
    }
}

/// Builds [`GceClient`]s sharing one HTTP connection pool.
#[derive(Clone)]
pub struct GceProvider {
    http: reqwest::Client,
    endpoints: GceEndpoints,
}

impl GceProvider {
    #[must_use]
    pub fn new(http: reqwest::Client, endpoints: GceEndpoints) -> Self {
        Self { http, endpoints }
    }
}

#[async_trait]
impl ComputeProvider for GceProvider {
    async fn client(&self, credentials: Option<&str>) -> Result<Arc<dyn ComputeClient>> {
        let source = TokenSource::from_credentials(credentials)?;
        Ok(Arc::new(GceClient::new(
            self.http.clone(),
            self.endpoints.clone(),
            source,
        )))
    }
}

#[cfg(test)]
#[path = "gce_tests.rs"]
mod gce_tests;
