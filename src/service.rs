//! Wiring the authenticator into an outbound request path
//!
//! The [`NetworkService`] routes every outgoing request through
//! [`Authenticator::authorize`] and drives the refresh-and-resend recovery
//! loop when a response reports an authorization failure. The HTTP client
//! itself stays behind the [`Transport`] seam, so the recovery logic is
//! testable without a real network.

use std::error;

use aliri_clock::{Clock, System};
use async_trait::async_trait;
use thiserror::Error;

use crate::{
    authenticator::{AuthError, Authenticator, Credentialed, Disposition},
    refresh::RefreshExecutor,
    store::TokenStore,
};

/// The terminal result of one exchange with the backend, as classified by
/// the transport
///
/// The transport decides what counts as an authorization failure for its
/// protocol (typically HTTP 401 with an invalid-token error code); the
/// service only acts on the classification.
#[derive(Debug)]
pub enum Exchange<R> {
    /// The request was accepted; authorization succeeded
    Accepted(R),
    /// The presented access token was rejected
    Unauthorized {
        /// The response status reported by the backend
        status: u16,
        /// The backend's error code, if one was provided
        error_code: Option<String>,
    },
}

/// Sends authorized requests to the backend
#[async_trait]
pub trait Transport: Send + Sync {
    /// The outgoing request type
    ///
    /// Requests are cloned so the original can be re-authorized and resent
    /// after a successful refresh.
    type Request: Credentialed + Clone + Send;

    /// The response type for accepted requests
    type Response: Send;

    /// The error type for failures that never produced a classification
    type Error: error::Error + Send + Sync + 'static;

    /// Performs one round trip
    async fn execute(&self, request: Self::Request)
        -> Result<Exchange<Self::Response>, Self::Error>;
}

/// An error while sending a request through the service
#[derive(Debug, Error)]
pub enum ServiceError<E> {
    /// The request could not be authorized
    #[error("request could not be authorized")]
    Auth(#[from] AuthError),

    /// The transport failed before the backend classified the request
    #[error("transport error")]
    Transport(#[source] E),

    /// The backend rejected the request as unauthorized and recovery gave up
    #[error("request was rejected as unauthorized (status {status})")]
    Unauthorized {
        /// The response status reported by the backend
        status: u16,
        /// The backend's error code, if one was provided
        error_code: Option<String>,
    },
}

/// Routes outbound requests through the credential lifecycle
///
/// Each [`send`][Self::send] authorizes the request, executes it, and on an
/// authorization failure asks the authenticator whether to refresh and
/// resend or to give up. The resend loop is bounded by the authenticator's
/// retry ceiling; a resend that fails again re-enters the same
/// classification, driving the failure counter upward until the ceiling is
/// hit.
#[derive(Debug)]
pub struct NetworkService<T, S, X, C = System> {
    transport: T,
    authenticator: Authenticator<S, X, C>,
}

impl<T, S, X, C> NetworkService<T, S, X, C> {
    /// Constructs a service from a transport and an authenticator
    pub fn new(transport: T, authenticator: Authenticator<S, X, C>) -> Self {
        Self {
            transport,
            authenticator,
        }
    }

    /// The authenticator driving this service's credential decisions
    pub fn authenticator(&self) -> &Authenticator<S, X, C> {
        &self.authenticator
    }
}

impl<T, S, X, C> NetworkService<T, S, X, C>
where
    T: Transport,
    S: TokenStore,
    X: RefreshExecutor,
    C: Clock,
{
    /// Sends a request, recovering from authorization failures by
    /// refreshing and resending
    ///
    /// Any response that is not an authorization failure resets the
    /// consecutive-failure counter.
    pub async fn send(
        &self,
        request: T::Request,
    ) -> Result<T::Response, ServiceError<T::Error>> {
        loop {
            let authorized = self.authenticator.authorize(request.clone()).await?;
            match self
                .transport
                .execute(authorized)
                .await
                .map_err(ServiceError::Transport)?
            {
                Exchange::Accepted(response) => {
                    self.authenticator.report_success();
                    return Ok(response);
                }
                Exchange::Unauthorized { status, error_code } => {
                    match self
                        .authenticator
                        .handle_unauthorized(status, error_code.as_deref())
                        .await
                    {
                        Disposition::Retry => {
                            tracing::debug!(
                                response.status = status,
                                "resending request with refreshed credentials"
                            );
                        }
                        Disposition::GiveUp => {
                            return Err(ServiceError::Unauthorized { status, error_code });
                        }
                    }
                }
            }
        }
    }

    /// Whether the store holds a non-expired access token
    pub async fn has_valid_session(&self) -> bool {
        self.authenticator.has_valid_session().await
    }

    /// Clears the stored credentials and all retry state
    pub async fn reset(&self) -> Result<(), AuthError> {
        self.authenticator.reset().await
    }
}
