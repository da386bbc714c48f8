//! A refresh executor that uses an OAuth2 server as an authority

use std::marker::PhantomData;

use async_trait::async_trait;

use super::{FreshTokens, RefreshError, RefreshExecutor};
use crate::{ClientId, ClientSecret, RefreshTokenRef};

pub mod dto;

/// A refresh executor implementing the OAuth2 _refresh token_ flow
///
/// Sends `grant_type=refresh_token` credentials to the authority's token
/// endpoint and parses the response into a fresh token pair. By default the
/// credentials are sent as a JSON body; use
/// [`using_form_data()`][Self::using_form_data] for authorities that expect
/// URL-encoded form data.
#[derive(Debug)]
pub struct OAuth2RefreshExecutor<T = JsonBody> {
    client: reqwest::Client,
    token_url: reqwest::Url,
    client_id: ClientId,
    client_secret: Option<ClientSecret>,
    content_type: PhantomData<fn() -> T>,
}

impl OAuth2RefreshExecutor<JsonBody> {
    /// Constructs a new executor for a public client
    pub fn new(client: reqwest::Client, token_url: reqwest::Url, client_id: ClientId) -> Self {
        Self {
            client,
            token_url,
            client_id,
            client_secret: None,
            content_type: PhantomData,
        }
    }
}

impl<T> OAuth2RefreshExecutor<T> {
    /// Adds a client secret for confidential clients
    pub fn with_client_secret(mut self, client_secret: ClientSecret) -> Self {
        self.client_secret = Some(client_secret);
        self
    }

    /// Configures the executor to send credentials to the authority as
    /// form data
    pub fn using_form_data(self) -> OAuth2RefreshExecutor<FormBody> {
        OAuth2RefreshExecutor {
            client: self.client,
            token_url: self.token_url,
            client_id: self.client_id,
            client_secret: self.client_secret,
            content_type: PhantomData,
        }
    }
}

#[async_trait]
impl<T: RequestType> RefreshExecutor for OAuth2RefreshExecutor<T> {
    async fn exchange(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<FreshTokens, RefreshError> {
        request_fresh_tokens::<T>(
            &self.client,
            self.token_url.clone(),
            dto::RefreshTokenCredentials {
                client_id: &self.client_id,
                client_secret: self.client_secret.as_deref(),
                refresh_token,
            },
        )
        .await
    }
}

#[tracing::instrument(
    err,
    skip(client, token_url, credentials),
    fields(
        token_url = %token_url,
        credentials.grant_type = "refresh_token",
        credentials.client_id = %credentials.client_id,
    ),
)]
async fn request_fresh_tokens<T: RequestType>(
    client: &reqwest::Client,
    token_url: reqwest::Url,
    credentials: dto::RefreshTokenCredentials<'_>,
) -> Result<FreshTokens, RefreshError> {
    tracing::trace!("requesting fresh tokens from authority");

    let req = T::attach_payload(client.post(token_url), &credentials);
    let resp = req.send().await.map_err(RefreshError::network)?;

    let status = resp.status();
    tracing::debug!(
        response.status = status.as_u16(),
        "received token response from issuing authority"
    );

    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(classify_rejection(status, &body));
    }

    let body = resp.bytes().await.map_err(RefreshError::network)?;
    let resp: dto::TokenResponse = serde_json::from_slice(&body).map_err(RefreshError::other)?;

    tracing::info!(
        has_refresh_token = resp.refresh_token.is_some(),
        expires_in = resp.expires_in.0,
        "received fresh tokens"
    );

    Ok(FreshTokens {
        access_token: (*resp.access_token).to_owned(),
        refresh_token: resp.refresh_token.map(|rt| (*rt).to_owned()),
        expires_in: resp.expires_in,
    })
}

/// Distinguishes a rejected refresh token from other authority errors
///
/// Per RFC 6749 §5.2, a revoked or expired refresh token is reported as
/// `invalid_grant` with status 400 (some authorities use 401).
fn classify_rejection(status: reqwest::StatusCode, body: &str) -> RefreshError {
    if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED {
        let error_code = serde_json::from_str::<dto::ErrorResponse>(body)
            .map(|e| e.error)
            .unwrap_or_default();
        if error_code == "invalid_grant" {
            return RefreshError::InvalidRefreshToken;
        }
    }

    if status.is_server_error() {
        RefreshError::network(AuthorityError {
            status: status.as_u16(),
            body: body.to_owned(),
        })
    } else {
        RefreshError::other(AuthorityError {
            status: status.as_u16(),
            body: body.to_owned(),
        })
    }
}

/// An error response from the authority with its body preserved
#[derive(Debug, thiserror::Error)]
#[error("authority returned status {status}: {body}")]
struct AuthorityError {
    status: u16,
    body: String,
}

/// A manner of attaching a serializable payload to a request
pub trait RequestType: Send + Sync {
    /// Attaches the serializable payload to the request body
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder;
}

/// Attaches credentials to the request body as JSON
#[derive(Debug)]
pub struct JsonBody;

/// Attaches credentials to the request body as URL-encoded form data
#[derive(Debug)]
pub struct FormBody;

impl RequestType for JsonBody {
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.json(payload)
    }
}

impl RequestType for FormBody {
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.form(payload)
    }
}
