//! HTTP client for one attested peer
//!
//! An [`AttestedClient`] sends every request through its transport stack, so the
//! pinned validation, renewal and retry behavior configured at construction
//! applies to all calls. Clients are normally obtained from a
//! [`ClientRegistry`](crate::registry::ClientRegistry).

use std::sync::Arc;

use reqwest::{Method, Request, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::tls::{PinnedTlsValidator, TrustedRoots};
use crate::transport::{self, Transport};

pub struct AttestedClient {
    endpoint: Url,

    /// Builds requests; sending goes through `stack`
    http: reqwest::Client,

    stack: Arc<dyn Transport>,

    validator: Arc<PinnedTlsValidator>,
}

impl AttestedClient {
    pub fn new(
        endpoint: Url,
        http: reqwest::Client,
        stack: Arc<dyn Transport>,
        validator: Arc<PinnedTlsValidator>,
    ) -> Self {
        Self {
            endpoint,
            http,
            stack,
            validator,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Certificates currently pinned for this peer
    pub fn trusted_roots(&self) -> Arc<TrustedRoots> {
        self.validator.snapshot()
    }

    /// Resolve `path` against the client endpoint
    pub fn url(&self, path: &str) -> Result<Url> {
        self.endpoint
            .join(path)
            .map_err(|e| Error::Configuration(format!("Invalid request path {}: {}", path, e)))
    }

    /// Start a request to `path`; finish it with [`AttestedClient::send`]
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(self.http.request(method, self.url(path)?))
    }

    pub async fn send(&self, request: Request) -> Result<Response> {
        self.stack.send(request).await
    }

    /// Send, giving up with [`Error::DeadlineExceeded`] once `deadline` passes
    ///
    /// The deadline covers retries and any certificate renewal on the way.
    pub async fn send_with_deadline(
        &self,
        request: Request,
        deadline: Instant,
    ) -> Result<Response> {
        transport::until(Some(deadline), self.stack.send(request)).await
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        let request = self.request(Method::GET, path)?.build()?;
        self.send(request).await
    }

    /// GET `path` and decode a JSON body, mapping non-success statuses to [`Error::Api`]
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.get(path).await?;
        read_json(response).await
    }

    /// POST a JSON body and decode the JSON reply, mapping non-success statuses to [`Error::Api`]
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.request(Method::POST, path)?.json(body).build()?;
        let response = self.send(request).await?;
        read_json(response).await
    }
}

/// Decode a JSON response body, or surface the upstream status as [`Error::Api`]
pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(Error::Api {
            status: status.as_u16(),
            message,
        });
    }
    let body = response.bytes().await.map_err(transport::classify)?;
    Ok(serde_json::from_slice(&body)?)
}
