use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use shared::{
    domain::{GhostKey, MediaRef, PortalKey, RoomId},
    error::BridgeError,
    protocol::{ConversationInfo, ConversationKind, MessageEvent, ReactionEvent},
};
use storage::{MessageRecord, PortalRecord};

use crate::{
    registry::Registry,
    rooms::CreateRoomRequest,
    user::{Account, User},
    Shared,
};

/// A ghost profile change being fanned out into that ghost's rooms.
pub(crate) enum GhostMetaUpdate {
    Name(String),
    Avatar(Option<MediaRef>),
}

/// One remote conversation and, once materialized, its local room.
///
/// `room_lock` serializes room creation and room-level metadata writes, so
/// concurrent triggers produce exactly one room per conversation.
pub struct Portal {
    pub key: PortalKey,
    record: Mutex<PortalRecord>,
    room_lock: Mutex<()>,
    shared: Arc<Shared>,
    registry: Arc<Registry>,
}

impl Portal {
    pub(crate) fn new(record: PortalRecord, shared: Arc<Shared>, registry: Arc<Registry>) -> Arc<Self> {
        Arc::new(Self {
            key: record.key.clone(),
            record: Mutex::new(record),
            room_lock: Mutex::new(()),
            shared,
            registry,
        })
    }

    pub async fn record(&self) -> PortalRecord {
        self.record.lock().await.clone()
    }

    pub async fn room_id(&self) -> Option<RoomId> {
        self.record.lock().await.room_id.clone()
    }

    pub(crate) async fn sync(
        self: &Arc<Self>,
        user: &Arc<User>,
        account: &Arc<Account>,
        info: Option<&ConversationInfo>,
        force: bool,
    ) -> Result<()> {
        if self.room_id().await.is_some() {
            self.update_info(account, info, force).await
        } else {
            self.create_room(user, account, info).await.map(|_| ())
        }
    }

    /// Materializes the local room for this conversation. Idempotent: a
    /// concurrent or repeated call observes the room id written by the first
    /// one and returns it unchanged.
    pub async fn create_room(
        self: &Arc<Self>,
        user: &Arc<User>,
        account: &Arc<Account>,
        info: Option<&ConversationInfo>,
    ) -> Result<RoomId> {
        let _create = self.room_lock.lock().await;
        if let Some(room_id) = self.room_id().await {
            return Ok(room_id);
        }

        let team_name = account.record().await.team_name;
        let (mut name, topic, is_direct) = match info {
            Some(info) => {
                let is_direct = matches!(info.kind, ConversationKind::DirectMessage);
                let name = if is_direct {
                    // direct rooms take the peer ghost's name instead
                    String::new()
                } else {
                    self.shared.config.format_channel_name(info, &team_name)
                };
                (name, info.topic.clone(), is_direct)
            }
            None => (String::new(), String::new(), false),
        };
        if name.is_empty() && !is_direct {
            name = self.key.channel_id.to_string();
        }

        let avatar = {
            let mut record = self.record.lock().await;
            record.name = name.clone();
            record.topic = topic.clone();
            record.avatar_ref.clone()
        };
        let request = CreateRoomRequest {
            name: name.clone(),
            topic,
            avatar,
            invite: vec![user.local_id.clone()],
            is_direct,
        };
        let room_id = self.shared.rooms.create_room(request).await?;
        {
            let mut record = self.record.lock().await;
            record.room_id = Some(room_id.clone());
            record.name_applied = !name.is_empty();
            self.shared.storage.upsert_portal(&record).await?;
        }

        if let Err(err) = self.shared.rooms.invite_or_join(&user.local_id, &room_id).await {
            warn!(portal = %self.key, user = %user.local_id, error = %err, "failed to invite user to new room");
        }
        if let Err(err) = self.publish_bridge_info(&room_id).await {
            warn!(portal = %self.key, error = %err, "failed to publish bridge info");
        }
        info!(portal = %self.key, room = %room_id, "created room");
        Ok(room_id)
    }

    /// Applies conversation metadata to an already-materialized room.
    /// `force` rewrites unchanged fields too.
    pub async fn update_info(
        self: &Arc<Self>,
        account: &Arc<Account>,
        info: Option<&ConversationInfo>,
        force: bool,
    ) -> Result<()> {
        let Some(room_id) = self.room_id().await else {
            return Ok(());
        };
        let Some(info) = info else {
            return Ok(());
        };

        let team_name = account.record().await.team_name;
        let is_direct = matches!(info.kind, ConversationKind::DirectMessage);
        let new_name = if is_direct {
            String::new()
        } else {
            self.shared.config.format_channel_name(info, &team_name)
        };

        let (name_stale, topic_stale) = {
            let record = self.record.lock().await;
            (
                !new_name.is_empty() && (record.name != new_name || !record.name_applied),
                record.topic != info.topic,
            )
        };

        let mut changed = false;
        if name_stale || (force && !new_name.is_empty()) {
            let applied = match self.shared.rooms.set_room_name(&room_id, &new_name).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(portal = %self.key, error = %err, "failed to set room name");
                    false
                }
            };
            let mut record = self.record.lock().await;
            record.name = new_name.clone();
            record.name_applied = applied;
            changed = true;
        }
        if topic_stale || force {
            match self.shared.rooms.set_room_topic(&room_id, &info.topic).await {
                Ok(()) => {
                    self.record.lock().await.topic = info.topic.clone();
                    changed = true;
                }
                Err(err) => warn!(portal = %self.key, error = %err, "failed to set room topic"),
            }
        }

        if changed {
            let record = self.record().await;
            if let Err(err) = self.shared.storage.upsert_portal(&record).await {
                warn!(portal = %self.key, error = %err, "failed to save portal");
            }
            if let Err(err) = self.publish_bridge_info(&room_id).await {
                warn!(portal = %self.key, error = %err, "failed to refresh bridge info");
            }
        }
        Ok(())
    }

    async fn publish_bridge_info(&self, room_id: &RoomId) -> Result<()> {
        let record = self.record().await;
        let content = serde_json::json!({
            "protocol": { "id": "slack", "displayname": "Slack" },
            "network": { "id": self.key.team_id.as_str() },
            "channel": {
                "id": self.key.channel_id.as_str(),
                "displayname": record.name,
            },
        });
        let state_key = format!("{}/{}", self.key.team_id, self.key.channel_id);
        self.shared
            .rooms
            .send_state_event(room_id, "m.bridge", &state_key, content)
            .await?;
        Ok(())
    }

    /// Applies a ghost profile change to this room. Only unnamed rooms
    /// follow the peer's profile; named channels keep their own metadata.
    pub(crate) async fn apply_ghost_meta(&self, update: &GhostMetaUpdate) -> Result<()> {
        let _create = self.room_lock.lock().await;
        let record = self.record().await;
        let Some(room_id) = record.room_id else {
            return Ok(());
        };
        if !record.name.is_empty() {
            return Ok(());
        }
        match update {
            GhostMetaUpdate::Name(name) => self.shared.rooms.set_room_name(&room_id, name).await,
            GhostMetaUpdate::Avatar(avatar) => {
                let avatar = avatar.clone().unwrap_or_default();
                self.shared.rooms.set_room_avatar(&room_id, &avatar).await
            }
        }
    }

    /// Records an incoming message, materializing the room and syncing the
    /// sender's ghost on the way. Duplicate remote event ids are dropped.
    pub async fn handle_remote_message(
        self: &Arc<Self>,
        user: &Arc<User>,
        account: &Arc<Account>,
        event: &MessageEvent,
    ) -> Result<()> {
        let room_id = match self.room_id().await {
            Some(room_id) => room_id,
            None => self.create_room(user, account, None).await?,
        };

        if self
            .shared
            .storage
            .get_message_by_remote_id(&self.key, &event.event_id)
            .await?
            .is_some()
        {
            debug!(portal = %self.key, event = %event.event_id, "ignoring duplicate message");
            return Ok(());
        }

        let sender = GhostKey::new(self.key.team_id.clone(), event.sender_id.clone());
        let ghost = self.registry.ghost(&sender).await?;
        if let Err(err) = ghost.update_info(user, None).await {
            warn!(ghost = %ghost.key, error = %err, "failed to sync sender profile");
        }
        if let Err(err) = self.shared.rooms.invite_or_join(&ghost.local_id, &room_id).await {
            warn!(portal = %self.key, ghost = %ghost.local_id, error = %err, "failed to join ghost to room");
        }

        let record = MessageRecord {
            portal: self.key.clone(),
            remote_event_id: event.event_id.clone(),
            local_event_id: String::new(),
            author_id: event.sender_id.clone(),
            sent_at: event.sent_at,
        };
        self.shared.storage.insert_message(&record).await?;
        debug!(portal = %self.key, event = %event.event_id, "recorded remote message");
        Ok(())
    }

    /// Observes a reaction. Reactions to messages the bridge never saw are
    /// skipped silently.
    pub async fn handle_remote_reaction(
        self: &Arc<Self>,
        user: &Arc<User>,
        account: &Arc<Account>,
        event: &ReactionEvent,
    ) -> Result<()> {
        let room_id = match self.room_id().await {
            Some(room_id) => room_id,
            None => self.create_room(user, account, None).await?,
        };

        if self
            .shared
            .storage
            .get_message_by_remote_id(&self.key, &event.target_event_id)
            .await?
            .is_none()
        {
            debug!(portal = %self.key, target = %event.target_event_id, "reaction to unknown message, skipping");
            return Ok(());
        }

        let sender = GhostKey::new(self.key.team_id.clone(), event.sender_id.clone());
        let ghost = self.registry.ghost(&sender).await?;
        if let Err(err) = ghost.update_info(user, None).await {
            warn!(ghost = %ghost.key, error = %err, "failed to sync sender profile");
        }
        if let Err(err) = self.shared.rooms.invite_or_join(&ghost.local_id, &room_id).await {
            warn!(portal = %self.key, ghost = %ghost.local_id, error = %err, "failed to join ghost to room");
        }
        debug!(
            portal = %self.key,
            target = %event.target_event_id,
            reaction = %event.reaction,
            "observed remote reaction"
        );
        Ok(())
    }

    /// Drops the portal and its message index. The room itself is left to
    /// the operator.
    pub async fn delete(self: &Arc<Self>) -> Result<(), BridgeError> {
        self.shared
            .storage
            .delete_portal(&self.key)
            .await
            .map_err(BridgeError::persistence)?;
        self.registry.remove_portal(&self.key).await;
        info!(portal = %self.key, "portal deleted");
        Ok(())
    }
}
