//! Docker Engine API client over the local control socket.
//!
//! Requests are plain HTTP/1.1 sent through a Unix socket with hyperlocal;
//! no Docker SDK is involved.

use crate::error::{Result, RuntimeError};
use crate::models::{
    ContainerInspect, ContainerSpec, ContainerStats, ContainerSummary, CreateResponse,
    ExecConfig, ExecInspect, IdResponse, ListOptions,
};
use crate::runtime::{ContainerRuntime, OutputStream};
use async_trait::async_trait;
use futures::StreamExt;
use hyper::body::HttpBody;
use hyper::{Body, Client, Method, Request, Response, StatusCode};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::form_urlencoded;

/// Default location of the Docker control socket.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Client for the Docker Engine API.
#[derive(Clone)]
pub struct DockerClient {
    socket_path: PathBuf,
    api_version: Option<String>,
    client: Client<UnixConnector, Body>,
}

impl std::fmt::Debug for DockerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerClient")
            .field("socket_path", &self.socket_path)
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl Default for DockerClient {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_PATH)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl DockerClient {
    /// Create a client for the socket at `socket_path`.
    ///
    /// No connection is made until the first request.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            api_version: None,
            client: Client::unix(),
        }
    }

    /// Pin requests to an API version, e.g. `"1.43"`.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Path to the control socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Check that the daemon answers on the socket.
    pub async fn ping(&self) -> Result<()> {
        let response = self.send(Method::GET, "/_ping", None).await?;
        self.check(response, "ping").await?;
        Ok(())
    }

    fn uri(&self, path_and_query: &str) -> hyper::Uri {
        let full = match &self.api_version {
            Some(v) => format!("/v{v}{path_and_query}"),
            None => path_and_query.to_string(),
        };
        Uri::new(&self.socket_path, &full).into()
    }

    async fn send(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<String>,
    ) -> Result<Response<Body>> {
        tracing::debug!(method = %method, path = %path_and_query, "Docker API request");

        let mut builder = Request::builder()
            .method(method)
            .uri(self.uri(path_and_query));
        let body = match body {
            Some(json) => {
                tracing::trace!(body = %json, "Docker API request body");
                builder = builder.header("Content-Type", "application/json");
                Body::from(json)
            }
            None => Body::empty(),
        };
        let request = builder
            .body(body)
            .map_err(|e| RuntimeError::Request(e.to_string()))?;

        self.client
            .request(request)
            .await
            .map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, error: hyper::Error) -> RuntimeError {
        if error.is_connect() {
            tracing::warn!(socket = %self.socket_path.display(), error = %error, "Docker socket unreachable");
            RuntimeError::Unavailable {
                endpoint: self.socket_path.display().to_string(),
                message: error.to_string(),
            }
        } else {
            RuntimeError::Stream(error.to_string())
        }
    }

    /// Map a non-2xx response onto a [`RuntimeError`].
    async fn check(&self, response: Response<Body>, context: &str) -> Result<Response<Body>> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = hyper::body::to_bytes(response.into_body())
            .await
            .unwrap_or_default();
        let message = serde_json::from_slice::<ApiErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_string());
        let message = if message.is_empty() {
            format!("{context}: {status}")
        } else {
            message
        };
        tracing::debug!(status = %status, context, message = %message, "Docker API error response");

        Err(match status {
            StatusCode::NOT_MODIFIED => RuntimeError::NotModified(context.to_string()),
            StatusCode::NOT_FOUND => RuntimeError::NotFound(message),
            StatusCode::CONFLICT => RuntimeError::Conflict(message),
            _ => RuntimeError::Api {
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn json<T: DeserializeOwned>(&self, response: Response<Body>) -> Result<T> {
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| RuntimeError::Stream(e.to_string()))?;
        tracing::trace!(body = %String::from_utf8_lossy(&body), "Docker API response body");
        Ok(serde_json::from_slice(&body)?)
    }
}

fn query(pairs: &[(&str, &str)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Encode list options as the API's `filters` JSON object.
fn list_filters(options: &ListOptions) -> Result<Option<String>> {
    let mut filters: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    if let Some(name) = &options.name {
        filters.entry("name").or_default().push(name);
    }
    for label in &options.labels {
        filters.entry("label").or_default().push(label);
    }
    if filters.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(&filters)?))
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String> {
        let body = serde_json::to_string(spec)?;
        let path = format!("/containers/create?{}", query(&[("name", name)]));
        let response = self.send(Method::POST, &path, Some(body)).await?;
        let response = self.check(response, "create container").await?;
        let created: CreateResponse = self.json(response).await?;
        for warning in created.warnings.iter().flatten() {
            tracing::warn!(container = %name, warning = %warning, "Docker create warning");
        }
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let response = self
            .send(Method::POST, &format!("/containers/{id}/start"), None)
            .await?;
        self.check(response, "start container").await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()> {
        let secs = grace.as_secs().to_string();
        let path = format!("/containers/{id}/stop?{}", query(&[("t", secs.as_str())]));
        let response = self.send(Method::POST, &path, None).await?;
        self.check(response, "stop container").await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let force = if force { "true" } else { "false" };
        let path = format!(
            "/containers/{id}?{}",
            query(&[("force", force), ("v", "true")])
        );
        let response = self.send(Method::DELETE, &path, None).await?;
        self.check(response, "remove container").await?;
        Ok(())
    }

    async fn list_containers(&self, options: &ListOptions) -> Result<Vec<ContainerSummary>> {
        let all = if options.all { "true" } else { "false" };
        let filters = list_filters(options)?;
        let mut pairs = vec![("all", all)];
        if let Some(filters) = filters.as_deref() {
            pairs.push(("filters", filters));
        }
        let path = format!("/containers/json?{}", query(&pairs));
        let response = self.send(Method::GET, &path, None).await?;
        let response = self.check(response, "list containers").await?;
        self.json(response).await
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect> {
        let response = self
            .send(Method::GET, &format!("/containers/{id}/json"), None)
            .await?;
        let response = self.check(response, "inspect container").await?;
        self.json(response).await
    }

    async fn create_exec(&self, container_id: &str, config: &ExecConfig) -> Result<String> {
        let body = serde_json::to_string(config)?;
        let response = self
            .send(
                Method::POST,
                &format!("/containers/{container_id}/exec"),
                Some(body),
            )
            .await?;
        let response = self.check(response, "create exec").await?;
        let created: IdResponse = self.json(response).await?;
        Ok(created.id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<OutputStream> {
        let body = serde_json::json!({ "Detach": false, "Tty": false }).to_string();
        let response = self
            .send(Method::POST, &format!("/exec/{exec_id}/start"), Some(body))
            .await?;
        let response = self.check(response, "start exec").await?;

        let stream = futures::stream::unfold(response.into_body(), |mut body| async move {
            match body.data().await {
                Some(Ok(chunk)) => Some((Ok(chunk), body)),
                Some(Err(e)) => Some((Err(RuntimeError::Stream(e.to_string())), body)),
                None => None,
            }
        });
        Ok(stream.boxed())
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecInspect> {
        let response = self
            .send(Method::GET, &format!("/exec/{exec_id}/json"), None)
            .await?;
        let response = self.check(response, "inspect exec").await?;
        self.json(response).await
    }

    async fn stats(&self, id: &str) -> Result<ContainerStats> {
        let path = format!(
            "/containers/{id}/stats?{}",
            query(&[("stream", "false"), ("one-shot", "true")])
        );
        let response = self.send(Method::GET, &path, None).await?;
        let response = self.check(response, "container stats").await?;
        self.json(response).await
    }
}
