use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use shared::{
    domain::{RemoteUserId, TeamId},
    error::RemoteError,
    protocol::{ConversationInfo, RemoteEvent, TeamProfile, UserProfile},
};

pub mod auth;

pub use auth::{AuthClient, AuthInfo};

/// Identity facts returned when a token is checked against the remote
/// network's identity endpoint.
#[derive(Debug, Clone)]
pub struct RemoteIdentity {
    pub email: String,
    pub remote_user_id: RemoteUserId,
    pub team_id: TeamId,
    pub team_name: String,
}

/// Receiving half of one account's realtime connection.
///
/// The stream ends when the publisher side is dropped; consumers observe
/// closure as `None` and exit cooperatively. There is no forced-cancel path.
pub struct EventStream {
    rx: mpsc::Receiver<RemoteEvent>,
}

impl EventStream {
    pub fn channel(buffer: usize) -> (EventPublisher, EventStream) {
        let (tx, rx) = mpsc::channel(buffer);
        (EventPublisher { tx }, EventStream { rx })
    }

    pub async fn next(&mut self) -> Option<RemoteEvent> {
        self.rx.recv().await
    }
}

/// Publishing half of a realtime connection, held by the wire client.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<RemoteEvent>,
}

impl EventPublisher {
    /// Delivers one event, returning false once the consumer is gone.
    pub async fn publish(&self, event: RemoteEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Capability surface of one authenticated remote-network client.
///
/// Implementations wrap the actual wire SDK; the bridge core only ever talks
/// through this trait.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn verify_token(&self) -> Result<RemoteIdentity, RemoteError>;
    async fn open_realtime(&self) -> Result<EventStream, RemoteError>;
    /// Closes the realtime link so the event stream terminates. Must be a
    /// no-op when no link is open.
    async fn close_realtime(&self);
    async fn list_conversations(&self) -> Result<Vec<ConversationInfo>, RemoteError>;
    async fn get_user_info(&self, remote_user_id: &RemoteUserId) -> Result<UserProfile, RemoteError>;
    async fn get_team_info(&self) -> Result<TeamProfile, RemoteError>;
    /// Downloads the raw bytes behind a remote avatar URL for re-upload.
    async fn fetch_avatar(&self, url: &str) -> Result<Vec<u8>, RemoteError>;
}

/// Builds clients from stored credentials.
pub trait RemoteConnector: Send + Sync {
    fn client(&self, token: &str, cookie: Option<&str>) -> Arc<dyn RemoteClient>;
}

/// Placeholder used when no wire SDK is linked into the process.
pub struct MissingRemoteClient;

#[async_trait]
impl RemoteClient for MissingRemoteClient {
    async fn verify_token(&self) -> Result<RemoteIdentity, RemoteError> {
        Err(RemoteError::Transport(
            "remote network client is unavailable".into(),
        ))
    }

    async fn open_realtime(&self) -> Result<EventStream, RemoteError> {
        Err(RemoteError::Transport(
            "remote network client is unavailable".into(),
        ))
    }

    async fn close_realtime(&self) {}

    async fn list_conversations(&self) -> Result<Vec<ConversationInfo>, RemoteError> {
        Err(RemoteError::Transport(
            "remote network client is unavailable".into(),
        ))
    }

    async fn get_user_info(
        &self,
        _remote_user_id: &RemoteUserId,
    ) -> Result<UserProfile, RemoteError> {
        Err(RemoteError::Transport(
            "remote network client is unavailable".into(),
        ))
    }

    async fn get_team_info(&self) -> Result<TeamProfile, RemoteError> {
        Err(RemoteError::Transport(
            "remote network client is unavailable".into(),
        ))
    }

    async fn fetch_avatar(&self, _url: &str) -> Result<Vec<u8>, RemoteError> {
        Err(RemoteError::Transport(
            "remote network client is unavailable".into(),
        ))
    }
}

pub struct MissingRemoteConnector;

impl RemoteConnector for MissingRemoteConnector {
    fn client(&self, _token: &str, _cookie: Option<&str>) -> Arc<dyn RemoteClient> {
        Arc::new(MissingRemoteClient)
    }
}

#[cfg(test)]
#[path = "tests/stream_tests.rs"]
mod stream_tests;
