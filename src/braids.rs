use aliri_braid::braid;
use std::fmt;

macro_rules! redacted {
    ($ty:ty: $hidden:literal, $reveal:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    reveal_prefix(&self.0, f, $reveal)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    reveal_prefix(&self.0, f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn reveal_prefix(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len >= unprotected.len() {
        f.write_str(unprotected)
    } else {
        let cut = unprotected
            .char_indices()
            .nth(max_len - 1)
            .map(|(idx, _)| idx)
            .unwrap_or(unprotected.len());
        f.write_str(&unprotected[..cut])?;
        f.write_str("…")
    }
}

/// A client ID
#[braid(serde)]
pub struct ClientId;

/// A client secret
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

redacted!(ClientSecretRef: "CLIENT SECRET", 5);

/// An access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted!(AccessTokenRef: "ACCESS TOKEN", 15);

/// A refresh token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

redacted!(RefreshTokenRef: "REFRESH TOKEN", 5);
