//! Base transport over a reqwest client

use std::error::Error as StdError;

use async_trait::async_trait;
use reqwest::{Request, Response};

use super::Transport;
use crate::error::{Error, Result};

/// Sends requests on a (usually pinned) reqwest client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        self.client.execute(request).await.map_err(classify)
    }
}

/// Map a reqwest failure onto the transport error taxonomy
///
/// A certificate rejected during the handshake becomes [`Error::TlsTrustFailure`];
/// connect failures and timeouts become [`Error::TransientNetwork`].
pub fn classify(err: reqwest::Error) -> Error {
    if let Some(reason) = certificate_rejection(&err) {
        return Error::TlsTrustFailure(reason);
    }
    if err.is_connect() || err.is_timeout() {
        return Error::TransientNetwork(error_chain(&err));
    }
    Error::Http(err)
}

fn certificate_rejection(err: &(dyn StdError + 'static)) -> Option<String> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(reason) = as_certificate_error(e) {
            return Some(reason);
        }
        // io::Error::source skips the wrapped error itself
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if let Some(reason) = io.get_ref().and_then(|inner| as_certificate_error(inner)) {
                return Some(reason);
            }
        }
        current = e.source();
    }
    None
}

fn as_certificate_error(e: &(dyn StdError + 'static)) -> Option<String> {
    match e.downcast_ref::<rustls::Error>()? {
        tls @ (rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented) => {
            Some(tls.to_string())
        }
        _ => None,
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(e) = current {
        message.push_str(": ");
        message.push_str(&e.to_string());
        current = e.source();
    }
    message
}
