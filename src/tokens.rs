use aliri_clock::{Clock, DurationSecs, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef};

/// The durable credential state for a session
///
/// An absent access token means "logged out" or "never authenticated". The
/// access token and its expiry are always set and cleared together; a refresh
/// token may outlive its access token, but never the other way around for a
/// session created through this crate. An expiry of [`UnixTime::default()`]
/// is the "never set" sentinel, distinct from "already expired".
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TokenRecord {
    access_token: Option<Box<AccessTokenRef>>,
    refresh_token: Option<Box<RefreshTokenRef>>,
    expiry: UnixTime,
}

impl TokenRecord {
    /// An empty record, representing a logged-out session
    pub fn empty() -> Self {
        Self::default()
    }

    /// Constructs a record for a session with the given credentials
    pub fn new(
        access_token: AccessToken,
        refresh_token: Option<RefreshToken>,
        expiry: UnixTime,
    ) -> Self {
        Self {
            access_token: Some(access_token.into_boxed_ref()),
            refresh_token: refresh_token.map(RefreshToken::into_boxed_ref),
            expiry,
        }
    }

    /// Gets the current access token, if present
    #[inline]
    pub fn access_token(&self) -> Option<&AccessTokenRef> {
        self.access_token.as_deref()
    }

    /// Gets the current refresh token, if present
    #[inline]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// Gets the access token's expiry
    ///
    /// [`UnixTime::default()`] indicates the expiry was never recorded.
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    pub(crate) fn clone_it(&self) -> Self {
        Self {
            access_token: self
                .access_token
                .as_deref()
                .map(|t| t.to_owned().into_boxed_ref()),
            refresh_token: self
                .refresh_token
                .as_deref()
                .map(|t| t.to_owned().into_boxed_ref()),
            expiry: self.expiry,
        }
    }
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid and outside the preemptive-refresh window
    Fresh,
    /// The token is still valid, but close enough to expiry that it should
    /// be refreshed before use
    Stale,
    /// The token is no longer valid (or its expiry was never recorded)
    Expired,
}

/// Decides when an access token must be refreshed
///
/// A token becomes [`Stale`][TokenStatus::Stale] once the current time is
/// within `preemptive_window` of its expiry, and
/// [`Expired`][TokenStatus::Expired] at the expiry itself. A record whose
/// expiry was never set is treated as expired: a token of unknown age cannot
/// be trusted and is refreshed before use.
#[derive(Clone, Debug)]
pub struct RefreshPolicy<C = System> {
    preemptive_window: DurationSecs,
    clock: C,
}

impl Default for RefreshPolicy {
    /// Default policy, refreshing preemptively within 5 minutes of expiry
    fn default() -> Self {
        Self {
            preemptive_window: DurationSecs(300),
            clock: System,
        }
    }
}

impl RefreshPolicy {
    /// Constructs a policy with the given preemptive-refresh window
    pub fn new(preemptive_window: DurationSecs) -> Self {
        Self {
            preemptive_window,
            clock: System,
        }
    }
}

impl<C> RefreshPolicy<C> {
    /// Replaces the clock used to evaluate token status
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> RefreshPolicy<D> {
        RefreshPolicy {
            preemptive_window: self.preemptive_window,
            clock,
        }
    }

    /// Evaluates a record's status as of the provided time
    pub fn status_at(&self, record: &TokenRecord, time: UnixTime) -> TokenStatus {
        let expiry = record.expiry();
        if expiry == UnixTime::default() || time >= expiry {
            TokenStatus::Expired
        } else if time + self.preemptive_window >= expiry {
            TokenStatus::Stale
        } else {
            TokenStatus::Fresh
        }
    }
}

impl<C: Clock> RefreshPolicy<C> {
    /// Evaluates a record's status at the current time
    pub fn status(&self, record: &TokenRecord) -> TokenStatus {
        self.status_at(record, self.clock.now())
    }

    /// Gets the current time according to the policy's clock
    pub(crate) fn now(&self) -> UnixTime {
        self.clock.now()
    }
}
