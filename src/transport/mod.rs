//! Outbound HTTP as a chain of transport decorators
//!
//! ```text
//! RetryingTransport -> RenewingTransport -> HttpTransport (PinnedTlsValidator)
//! ```
//!
//! Every stage returns the crate [`Error`], where a failed trust check during the
//! handshake is the distinct [`Error::TlsTrustFailure`] variant. The renewal stage
//! matches on that variant; the retry stage only acts on [`Error::TransientNetwork`]
//! and retryable status codes.
//!
//! Resends issued by the retry stage belong to one logical request. That request
//! may trigger at most one renewal, however many resends follow it.

pub mod http;
pub mod renew;
pub mod retry;

pub use http::{classify, HttpTransport};
pub use renew::{RenewalHook, RenewingTransport};
pub use retry::{RetryPolicy, RetryingTransport};

use std::cell::Cell;
use std::future::Future;

use async_trait::async_trait;
use reqwest::{Request, Response};
use tokio::time::Instant;

use crate::error::{Error, Result};

/// One stage of the outbound request pipeline
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response>;
}

tokio::task_local! {
    static RENEWAL_SPENT: Cell<bool>;
}

/// Run `fut` as one logical request whose resends share a single renewal
pub(crate) async fn logical_request<F: Future>(fut: F) -> F::Output {
    if RENEWAL_SPENT.try_with(|_| ()).is_ok() {
        return fut.await;
    }
    RENEWAL_SPENT.scope(Cell::new(false), fut).await
}

/// Take the renewal of the current logical request
///
/// Returns false once it has been taken. Outside [`logical_request`] every send is
/// its own logical request.
pub(crate) fn claim_renewal() -> bool {
    RENEWAL_SPENT
        .try_with(|spent| !spent.replace(true))
        .unwrap_or(true)
}

/// Run `fut` to completion or until `deadline` passes
pub async fn until<T, F>(deadline: Option<Instant>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| Error::DeadlineExceeded)?,
        None => fut.await,
    }
}
