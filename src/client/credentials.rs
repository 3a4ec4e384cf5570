use std::{
    fmt,
    sync::RwLock,
    time::{Duration, Instant},
};

/// How long an access token is assumed to be valid after it was acquired. The refresh flow doesn't reliably report a
/// lifetime, so the client never trusts one from the issuer.
pub(crate) const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// An access token together with the instant after which it must be treated as expired.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct AccessToken {
    pub value: String,
    pub expires_at: Instant,
}

/// Holds the application and user credentials for a single client.
///
/// The client ID, client secret and refresh token are fixed at construction. The access token is only ever written by
/// the [TokenManager](super::token::TokenManager).
pub(crate) struct Credentials {
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    access_token: RwLock<Option<AccessToken>>,
}

/// Which grant the credentials allow to acquire a new access token with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GrantFlow {
    RefreshToken,
    ClientCredentials,
}

impl AccessToken {
    pub fn new(value: String, lifetime: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + lifetime,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

impl Credentials {
    pub fn new(
        client_id: Option<String>,
        client_secret: Option<String>,
        refresh_token: Option<String>,
        access_token: Option<AccessToken>,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            refresh_token,
            access_token: RwLock::new(access_token),
        }
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Returns the grant flow these credentials support, preferring the refresh token flow when a refresh token is
    /// present.
    pub fn grant_flow(&self) -> Option<GrantFlow> {
        match (&self.client_id, &self.client_secret, &self.refresh_token) {
            (Some(_), Some(_), Some(_)) => Some(GrantFlow::RefreshToken),
            (Some(_), Some(_), None) => Some(GrantFlow::ClientCredentials),
            _ => None,
        }
    }

    /// Returns the current access token if it hasn't expired yet. An expired token is cleared.
    pub fn valid_access_token(&self) -> Option<String> {
        {
            let access_token = self.access_token.read().expect("access token rwlock poisoned");

            match access_token.as_ref() {
                Some(token) if !token.is_expired() => return Some(token.value.clone()),
                Some(_) => (),
                None => return None,
            }
        }

        // reset the token to force acquiring a new one
        self.clear_access_token();
        None
    }

    pub fn set_access_token(&self, access_token: AccessToken) {
        *self.access_token.write().expect("access token rwlock poisoned") = Some(access_token);
    }

    pub fn clear_access_token(&self) {
        *self.access_token.write().expect("access token rwlock poisoned") = None;
    }

    #[cfg(test)]
    pub fn access_token(&self) -> Option<AccessToken> {
        self.access_token.read().expect("access token rwlock poisoned").clone()
    }
}

// the secrets stay out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("has_client_secret", &self.client_secret.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
