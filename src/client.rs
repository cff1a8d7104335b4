//! REST client for the SDN controller
//!
//! Every request logs in first and reuses the session cookie for the actual
//! call; no session outlives a single request. Mutating calls are addressed
//! under `{url}/{domain}/...`, job status polls directly under `{url}/...`.

use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ControllerConfig;
use crate::db::Operation;
use crate::error::ClientError;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Status and body of a controller response.
#[derive(Debug, Clone)]
pub struct SdnResponse {
    pub status: StatusCode,
    pub body: String,
}

impl SdnResponse {
    /// The controller has no asynchronous tracking for this call.
    pub fn is_not_implemented(&self) -> bool {
        self.status == StatusCode::NOT_IMPLEMENTED
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Authenticated client for the controller REST API.
#[derive(Debug, Clone)]
pub struct SdnClient {
    base_url: String,
    domain: String,
    username: String,
    password: String,
    timeout: Duration,
}

impl SdnClient {
    /// Build a client. `url`, `username` and `password` are mandatory.
    pub fn new(config: &ControllerConfig) -> Result<Self, ClientError> {
        if config.url.trim().is_empty() {
            return Err(ClientError::MissingOption("url"));
        }
        if config.username.is_empty() {
            return Err(ClientError::MissingOption("username"));
        }
        if config.password.is_empty() {
            return Err(ClientError::MissingOption("password"));
        }

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            domain: config.domain.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Log in and return an HTTP client carrying the session cookie.
    ///
    /// A controller that cannot be reached is a [`ClientError::Connection`];
    /// only a rejected login is a [`ClientError::Login`].
    pub async fn create_session(&self) -> Result<reqwest::Client, ClientError> {
        let login_url = strings_to_url(&[&self.base_url, "login"]);
        let login_error = |reason: String| ClientError::Login {
            login_url: login_url.clone(),
            reason,
        };

        let session = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(self.timeout)
            .build()
            .map_err(|e| login_error(e.to_string()))?;

        debug!(url = %login_url, "Logging in to SDN controller");
        let response = session
            .post(&login_url)
            .form(&[("username", self.username.as_str()), ("password", self.password.as_str())])
            .send()
            .await
            .map_err(|e| ClientError::Connection {
                url: login_url.clone(),
                reason: e.to_string(),
            })?;

        debug!(status = %response.status(), "Login response");
        if !response.status().is_success() {
            return Err(login_error(format!("HTTP {}", response.status())));
        }

        Ok(session)
    }

    /// Poll a resource that lives outside the domain (job status).
    pub async fn get(&self, path: &str) -> Result<SdnResponse, ClientError> {
        let url = strings_to_url(&[&self.base_url, path]);
        let response = self.send(Method::GET, &url, None).await?;
        check_response(&url, response)
    }

    pub async fn post(&self, path: &str, data: Option<&serde_json::Value>) -> Result<SdnResponse, ClientError> {
        self.request(Method::POST, path, data).await
    }

    pub async fn put(&self, path: &str, data: Option<&serde_json::Value>) -> Result<SdnResponse, ClientError> {
        self.request(Method::PUT, path, data).await
    }

    pub async fn delete(&self, path: &str, data: Option<&serde_json::Value>) -> Result<SdnResponse, ClientError> {
        self.request(Method::DELETE, path, data).await
    }

    /// Issue the HTTP call matching a journal operation.
    pub async fn send_operation(
        &self,
        operation: Operation,
        path: &str,
        data: Option<&serde_json::Value>,
    ) -> Result<SdnResponse, ClientError> {
        self.request(operation_method(operation), path, data).await
    }

    /// Domain-scoped request. Client and server error statuses become
    /// [`ClientError::Connection`], except 501 which is a valid answer.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        data: Option<&serde_json::Value>,
    ) -> Result<SdnResponse, ClientError> {
        let url = self.domain_url(path);
        let response = self.send(method, &url, data).await?;
        check_response(&url, response)
    }

    /// DELETE that treats "not found" as already done. Returns whether the
    /// controller actually removed something.
    pub async fn try_delete(&self, path: &str) -> Result<bool, ClientError> {
        let url = self.domain_url(path);
        let response = self.send(Method::DELETE, &url, None).await?;

        if response.status == StatusCode::NOT_FOUND {
            debug!(path, "Resource already absent on controller");
            return Ok(false);
        }
        check_response(&url, response)?;
        Ok(true)
    }

    fn domain_url(&self, path: &str) -> String {
        strings_to_url(&[&self.base_url, &self.domain, path])
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        data: Option<&serde_json::Value>,
    ) -> Result<SdnResponse, ClientError> {
        let body = match data {
            Some(value) if !value.is_null() => Some(serde_json::to_string_pretty(value)?),
            _ => None,
        };

        let session = self.create_session().await?;

        debug!(%method, %url, body = body.as_deref().unwrap_or(""), "Sending request");
        let mut request = session
            .request(method, url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(ACCEPT, JSON_CONTENT_TYPE);
        if let Some(body) = body {
            request = request.body(body);
        }

        let connection_error = |e: reqwest::Error| ClientError::Connection {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let response = request.send().await.map_err(connection_error)?;
        let status = response.status();
        let body = response.text().await.map_err(connection_error)?;

        debug!(%status, body = %body, "Response received");
        Ok(SdnResponse { status, body })
    }
}

fn operation_method(operation: Operation) -> Method {
    match operation {
        Operation::Create => Method::POST,
        Operation::Update => Method::PUT,
        Operation::Delete => Method::DELETE,
    }
}

fn check_response(url: &str, response: SdnResponse) -> Result<SdnResponse, ClientError> {
    let status = response.status;
    if status != StatusCode::NOT_IMPLEMENTED && (status.is_client_error() || status.is_server_error()) {
        return Err(ClientError::Connection {
            url: url.to_string(),
            reason: format!("HTTP {}", status),
        });
    }
    Ok(response)
}

/// Join URL segments with single slashes, skipping empty ones. The first
/// segment keeps its scheme.
pub fn strings_to_url(parts: &[&str]) -> String {
    let mut url = String::new();
    for (i, part) in parts.iter().enumerate() {
        let part = if i == 0 {
            part.trim_end_matches('/')
        } else {
            part.trim_matches('/')
        };
        if part.is_empty() {
            continue;
        }
        if !url.is_empty() {
            url.push('/');
        }
        url.push_str(part);
    }
    url
}
