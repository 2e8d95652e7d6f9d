use thiserror::Error;

use crate::domain::LocalUserId;

/// Failures from either authentication strategy. Never retried automatically.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("could not resolve team '{0}'")]
    TeamNotFound(String),
    #[error("teams that use single sign-on are not supported")]
    SsoUnsupported,
    #[error("could not resolve user '{0}' in team")]
    UserNotFound(String),
    #[error("incorrect password")]
    BadCredentials,
    #[error("token rejected by the remote identity endpoint")]
    TokenRejected,
    #[error("unexpected response from the remote network, please try again later")]
    UnexpectedResponse,
    #[error("auth request failed: {0}")]
    Transport(String),
}

/// Failures from the remote network client capability.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The operation is not available for this account/token type. Callers
    /// treat this as an empty result, not a failure.
    #[error("capability unsupported: {0}")]
    Unsupported(&'static str),
    #[error("remote api error: {0}")]
    Api(String),
    #[error("remote transport error: {0}")]
    Transport(String),
}

/// Core bridge failures surfaced synchronously to callers.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{local_id} is already logged into team {team_name} with {email}")]
    AlreadyLoggedIn {
        local_id: LocalUserId,
        team_name: String,
        email: String,
    },
    #[error("not logged in")]
    NotLoggedIn,
    #[error("not connected")]
    NotConnected,
    #[error("no portal found for {0}")]
    PortalNotFound(String),
    #[error("persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl BridgeError {
    pub fn persistence(err: anyhow::Error) -> Self {
        BridgeError::Persistence(err)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            BridgeError::AlreadyLoggedIn { .. } | BridgeError::NotLoggedIn
        )
    }
}
