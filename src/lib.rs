//! Client-side management, renewal, and recovery of OAuth2 session credentials
//!
//! This library owns the decision procedure and concurrency contract around a
//! single question: _is this outgoing request authorized, and if not, how do
//! we get it authorized without corrupting shared token state?_
//!
//! The [`Authenticator`] holds an access/refresh token pair behind a
//! [`TokenStore`][store::TokenStore], refreshes the access token preemptively
//! once it comes within a configurable window of expiry, and serializes
//! refresh attempts so that any number of concurrently in-flight requests
//! trigger at most one round trip to the token authority. Every caller that
//! was waiting on that round trip observes the identical outcome, success or
//! failure.
//!
//! The [`NetworkService`][service::NetworkService] wires the authenticator
//! into an outbound request path: requests are authorized before being handed
//! to a [`Transport`][service::Transport], and an authorization failure on
//! the way back drives a bounded refresh-and-resend recovery loop. When the
//! refresh token itself is rejected, the session is cleared and a logout
//! sink is notified so the surrounding application can react.
//!
//! # Example
//!
//! ```no_run
//! use seanco::{
//!     refresh::oauth2::OAuth2RefreshExecutor, store::MemoryTokenStore, Authenticator, ClientId,
//!     RefreshPolicy,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryTokenStore::new();
//!
//! let executor = OAuth2RefreshExecutor::new(
//!     reqwest::Client::new(),
//!     reqwest::Url::parse("https://example.com/oauth/token")?,
//!     ClientId::from_static("my-client"),
//! );
//!
//! let authenticator = Authenticator::new(store, executor, RefreshPolicy::default());
//! # let _ = authenticator;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are
//! enabled by default:
//!
//! * `oauth2`: Provides a refresh executor implementing the OAuth2 _refresh
//!   token_ flow against a token authority.
//! * `file`: Provides a token store backed by a local file.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod authenticator;
mod braids;
pub mod refresh;
pub mod service;
pub mod store;
mod tokens;

pub use authenticator::{AuthError, Authenticator, Credentialed, Disposition, LogoutSink};
pub use braids::*;
pub use tokens::{RefreshPolicy, TokenRecord, TokenStatus};
