//! Exchanging a refresh token for a fresh token pair

use std::{error, sync::Arc};

use aliri_clock::DurationSecs;
use async_trait::async_trait;
use thiserror::Error;

use crate::{AccessToken, RefreshToken, RefreshTokenRef};

#[cfg(feature = "oauth2")]
#[cfg_attr(docsrs, doc(cfg(feature = "oauth2")))]
pub mod oauth2;

/// Performs one network round trip against the token authority
///
/// An executor only talks to the network: it neither reads nor writes the
/// token store. The coordinated refresh inside the
/// [`Authenticator`][crate::Authenticator] owns the store side effects so
/// that a session reset racing an in-flight refresh can discard the result
/// before it is persisted.
#[async_trait]
pub trait RefreshExecutor: Send + Sync {
    /// Exchanges the given refresh token for a fresh token pair
    async fn exchange(&self, refresh_token: &RefreshTokenRef)
        -> Result<FreshTokens, RefreshError>;
}

/// A token pair as minted by the authority
#[derive(Debug)]
pub struct FreshTokens {
    /// The new access token
    pub access_token: AccessToken,

    /// A rotated refresh token, if the authority issued one
    ///
    /// When absent, the refresh token used for the exchange remains valid
    /// and is carried over.
    pub refresh_token: Option<RefreshToken>,

    /// How long the new access token will be valid
    pub expires_in: DurationSecs,
}

/// The ways a coordinated refresh can fail
///
/// Outcomes are shared with every caller waiting on the same refresh, so the
/// error is cheaply cloneable and underlying causes are held behind an
/// [`Arc`].
#[derive(Clone, Debug, Error)]
pub enum RefreshError {
    /// No refresh token is stored; the session cannot be renewed
    #[error("no refresh token is available")]
    NoRefreshToken,

    /// The authority rejected the refresh token; the session is unrecoverable
    #[error("the refresh token was rejected by the authority")]
    InvalidRefreshToken,

    /// A transient transport failure; the stored tokens are left untouched
    #[error("error communicating with the authority")]
    Network(#[source] Arc<dyn error::Error + Send + Sync + 'static>),

    /// A session reset raced the refresh, so its result was discarded
    #[error("the refresh was superseded by a session reset")]
    Superseded,

    /// Any other failure to obtain or persist a token pair
    #[error("token refresh failed")]
    Other(#[source] Arc<dyn error::Error + Send + Sync + 'static>),
}

impl RefreshError {
    /// Wraps a transient transport failure
    pub fn network(err: impl error::Error + Send + Sync + 'static) -> Self {
        Self::Network(Arc::new(err))
    }

    /// Wraps a failure that is neither transient nor a rejection of the
    /// refresh token
    pub fn other(err: impl error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Arc::new(err))
    }

    /// Whether the failure dooms the current session
    ///
    /// Unrecoverable failures clear the stored credentials and notify the
    /// logout sink.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::NoRefreshToken | Self::InvalidRefreshToken)
    }
}
