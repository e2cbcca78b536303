//! Logic for getting credentials to log into chat with.

use async_trait::async_trait;
use rand::Rng;
use std::convert::Infallible;
use std::fmt::{Debug, Display};

/// A pair of login name and OAuth token.
#[derive(Debug, Clone)]
pub struct CredentialsPair {
    /// Login name of the user that the library should log into chat as.
    pub login: String,
    /// OAuth access token, with or without the leading `oauth:` prefix
    /// (the prefix is added before sending if absent). If `None`, the
    /// login is anonymous and `PASS SCHMOOPIIE` is sent instead.
    pub token: Option<String>,
}

/// Encapsulates logic for getting the credentials to log into chat, whenever
/// a new connection is made.
///
/// Implement this to e.g. fetch a fresh token from storage on every
/// (re)connect.
#[async_trait]
pub trait LoginCredentials: Debug + Send + Sync + 'static {
    /// Error type that can occur when trying to fetch the credentials.
    type Error: Send + Sync + Debug + Display;

    /// Get a fresh set of credentials to be used right-away.
    async fn get_credentials(&self) -> Result<CredentialsPair, Self::Error>;
}

/// Simple `LoginCredentials` implementation that always returns the same
/// `CredentialsPair` and never fails.
#[derive(Debug, Clone)]
pub struct StaticLoginCredentials {
    /// The credentials that are always returned.
    pub credentials: CredentialsPair,
}

impl StaticLoginCredentials {
    /// Create new static login credentials from the given Twitch login name
    /// and OAuth access token.
    pub fn new(login: String, token: Option<String>) -> StaticLoginCredentials {
        StaticLoginCredentials {
            credentials: CredentialsPair { login, token },
        }
    }

    /// Creates login credentials for logging into chat as a random
    /// anonymous `justinfan` user.
    pub fn anonymous() -> StaticLoginCredentials {
        let login = format!("justinfan{}", rand::thread_rng().gen_range(1000..81000));
        StaticLoginCredentials::new(login, None)
    }
}

#[async_trait]
impl LoginCredentials for StaticLoginCredentials {
    type Error = Infallible;

    async fn get_credentials(&self) -> Result<CredentialsPair, Infallible> {
        Ok(self.credentials.clone())
    }
}
