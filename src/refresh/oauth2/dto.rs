//! DTOs for interacting with OAuth2 token authorities

use aliri_clock::DurationSecs;
use serde::{Deserialize, Serialize, Serializer};

use crate::{AccessTokenRef, ClientIdRef, ClientSecretRef, RefreshTokenRef};

/// Credentials for the refresh token flow
#[derive(Debug)]
pub struct RefreshTokenCredentials<'a> {
    /// The client ID
    pub client_id: &'a ClientIdRef,

    /// The client secret, if required by the authority
    pub client_secret: Option<&'a ClientSecretRef>,

    /// The refresh token being exchanged
    pub refresh_token: &'a RefreshTokenRef,
}

impl Serialize for RefreshTokenCredentials<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("RefreshTokenCredentials", 4)?;
        ser.serialize_field("grant_type", "refresh_token")?;
        ser.serialize_field("client_id", self.client_id)?;
        if let Some(secret) = self.client_secret {
            ser.serialize_field("client_secret", secret)?;
        } else {
            ser.skip_field("client_secret")?;
        }
        ser.serialize_field("refresh_token", self.refresh_token)?;
        ser.end()
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse<'a> {
    #[serde(borrow)]
    pub access_token: &'a AccessTokenRef,
    #[serde(borrow, default)]
    pub refresh_token: Option<&'a RefreshTokenRef>,
    pub expires_in: DurationSecs,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ErrorResponse {
    #[serde(default)]
    pub error: String,
}
