use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(LocalUserId);
id_newtype!(TeamId);
id_newtype!(RemoteUserId);
id_newtype!(ChannelId);
id_newtype!(RoomId);
id_newtype!(EventId);

/// Reference to a media object already uploaded to the local network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef(pub String);

impl MediaRef {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Blocked,
    User,
    Admin,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::Blocked => "blocked",
            PermissionLevel::User => "user",
            PermissionLevel::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "admin" => PermissionLevel::Admin,
            "blocked" => PermissionLevel::Blocked,
            _ => PermissionLevel::User,
        }
    }
}

/// One linked remote credential set, owned by exactly one local user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    pub local_id: LocalUserId,
    pub team_id: TeamId,
    pub remote_user_id: RemoteUserId,
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}-{}",
            self.local_id, self.team_id, self.remote_user_id
        )
    }
}

/// One remote identity, shared by every account that can see it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GhostKey {
    pub team_id: TeamId,
    pub remote_user_id: RemoteUserId,
}

impl GhostKey {
    pub fn new(team_id: TeamId, remote_user_id: RemoteUserId) -> Self {
        Self {
            team_id,
            remote_user_id,
        }
    }
}

impl fmt::Display for GhostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.team_id, self.remote_user_id)
    }
}

/// One remote conversation as seen by one account ("receiver").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortalKey {
    pub team_id: TeamId,
    pub receiver_id: RemoteUserId,
    pub channel_id: ChannelId,
}

impl PortalKey {
    pub fn new(team_id: TeamId, receiver_id: RemoteUserId, channel_id: ChannelId) -> Self {
        Self {
            team_id,
            receiver_id,
            channel_id,
        }
    }
}

impl fmt::Display for PortalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.team_id, self.receiver_id, self.channel_id
        )
    }
}
