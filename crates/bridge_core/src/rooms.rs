use anyhow::{bail, Result};
use async_trait::async_trait;

use shared::domain::{EventId, LocalUserId, MediaRef, RoomId};

/// Everything needed to materialize a room for a conversation.
#[derive(Debug, Clone, Default)]
pub struct CreateRoomRequest {
    pub name: String,
    pub topic: String,
    pub avatar: Option<MediaRef>,
    pub invite: Vec<LocalUserId>,
    pub is_direct: bool,
}

/// Capability surface of the local chat network, as seen by the bridge core.
///
/// Implementations wrap the homeserver client; identity-mapping code only
/// ever talks through this trait so tests can substitute a recording fake.
#[async_trait]
pub trait RoomTransport: Send + Sync {
    async fn create_room(&self, request: CreateRoomRequest) -> Result<RoomId>;
    async fn set_room_name(&self, room_id: &RoomId, name: &str) -> Result<()>;
    async fn set_room_topic(&self, room_id: &RoomId, topic: &str) -> Result<()>;
    async fn set_room_avatar(&self, room_id: &RoomId, avatar: &MediaRef) -> Result<()>;
    async fn send_state_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        state_key: &str,
        content: serde_json::Value,
    ) -> Result<EventId>;
    /// Ensures the ghost account exists on the local network. Idempotent.
    async fn ensure_registered(&self, ghost_id: &LocalUserId) -> Result<()>;
    async fn set_display_name(&self, ghost_id: &LocalUserId, name: &str) -> Result<()>;
    async fn set_avatar(&self, ghost_id: &LocalUserId, avatar: &MediaRef) -> Result<()>;
    async fn invite_or_join(&self, user_id: &LocalUserId, room_id: &RoomId) -> Result<()>;
    async fn upload_media(&self, bytes: Vec<u8>, content_type: &str) -> Result<MediaRef>;
    /// Obtains an access token for a real local user via the homeserver's
    /// shared-secret login, for double puppeting.
    async fn login_with_shared_secret(
        &self,
        local_id: &LocalUserId,
        secret: &str,
    ) -> Result<String>;
}

/// Placeholder used when no homeserver client is linked into the process.
pub struct MissingRoomTransport;

#[async_trait]
impl RoomTransport for MissingRoomTransport {
    async fn create_room(&self, _request: CreateRoomRequest) -> Result<RoomId> {
        bail!("room transport is unavailable")
    }

    async fn set_room_name(&self, _room_id: &RoomId, _name: &str) -> Result<()> {
        bail!("room transport is unavailable")
    }

    async fn set_room_topic(&self, _room_id: &RoomId, _topic: &str) -> Result<()> {
        bail!("room transport is unavailable")
    }

    async fn set_room_avatar(&self, _room_id: &RoomId, _avatar: &MediaRef) -> Result<()> {
        bail!("room transport is unavailable")
    }

    async fn send_state_event(
        &self,
        _room_id: &RoomId,
        _event_type: &str,
        _state_key: &str,
        _content: serde_json::Value,
    ) -> Result<EventId> {
        bail!("room transport is unavailable")
    }

    async fn ensure_registered(&self, _ghost_id: &LocalUserId) -> Result<()> {
        bail!("room transport is unavailable")
    }

    async fn set_display_name(&self, _ghost_id: &LocalUserId, _name: &str) -> Result<()> {
        bail!("room transport is unavailable")
    }

    async fn set_avatar(&self, _ghost_id: &LocalUserId, _avatar: &MediaRef) -> Result<()> {
        bail!("room transport is unavailable")
    }

    async fn invite_or_join(&self, _user_id: &LocalUserId, _room_id: &RoomId) -> Result<()> {
        bail!("room transport is unavailable")
    }

    async fn upload_media(&self, _bytes: Vec<u8>, _content_type: &str) -> Result<MediaRef> {
        bail!("room transport is unavailable")
    }

    async fn login_with_shared_secret(
        &self,
        _local_id: &LocalUserId,
        _secret: &str,
    ) -> Result<String> {
        bail!("room transport is unavailable")
    }
}
