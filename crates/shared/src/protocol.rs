use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AccountKey, ChannelId, RemoteUserId, TeamId};

/// Identity facts reported by the remote network once a realtime link is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectInfo {
    pub remote_user_id: RemoteUserId,
    pub team_id: TeamId,
    pub team_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub channel_id: ChannelId,
    pub sender_id: RemoteUserId,
    pub event_id: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub channel_id: ChannelId,
    pub sender_id: RemoteUserId,
    pub target_event_id: String,
    pub reaction: String,
}

/// Closed set of realtime event kinds delivered on an account's stream.
///
/// Unknown kinds must be carried as [`RemoteEvent::Unknown`] so the dispatch
/// loop can log and skip them instead of failing the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RemoteEvent {
    Connecting { attempt: u32 },
    Connected(ConnectInfo),
    Hello,
    InvalidAuth,
    LatencyReport { millis: u64 },
    Message(MessageEvent),
    ReactionAdded(ReactionEvent),
    StreamError { message: String },
    Unknown { kind: String },
}

/// Externally observable connectivity status for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum BridgeState {
    Connecting,
    Connected,
    BadCredentials,
    UnknownError(String),
    Unconfigured,
}

/// A state transition, tagged with the account it belongs to.
///
/// `account` is `None` only for the process-wide `Unconfigured` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateNotification {
    pub account: Option<AccountKey>,
    pub state: BridgeState,
}

impl StateNotification {
    pub fn for_account(account: AccountKey, state: BridgeState) -> Self {
        Self {
            account: Some(account),
            state,
        }
    }

    pub fn global(state: BridgeState) -> Self {
        Self {
            account: None,
            state,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub remote_user_id: RemoteUserId,
    pub display_name: String,
    pub real_name: String,
    /// Source URL of the profile image on the remote network, empty if unset.
    pub avatar_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamProfile {
    pub team_id: TeamId,
    pub name: String,
    pub domain: String,
    pub url: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    PublicChannel,
    PrivateChannel,
    GroupMessage,
    DirectMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationInfo {
    pub channel_id: ChannelId,
    pub name: String,
    pub topic: String,
    pub kind: ConversationKind,
}
