use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use shared::{
    domain::{GhostKey, LocalUserId, MediaRef},
    protocol::UserProfile,
};
use storage::GhostRecord;

use crate::{portal::GhostMetaUpdate, registry::Registry, user::User, Shared};

/// The bridge-owned local identity standing in for one remote user.
///
/// `sync_lock` serializes profile synchronization so concurrent triggers
/// (message events, portal syncs, admin commands) collapse into one remote
/// write per actual change. Name and avatar each carry an applied flag:
/// cleared when the local write fails, so the next sync retries it.
pub struct Ghost {
    pub key: GhostKey,
    pub local_id: LocalUserId,
    record: Mutex<GhostRecord>,
    sync_lock: Mutex<()>,
    shared: Arc<Shared>,
    registry: Arc<Registry>,
}

impl Ghost {
    pub(crate) fn new(record: GhostRecord, shared: Arc<Shared>, registry: Arc<Registry>) -> Arc<Self> {
        let local_id = shared.config.format_ghost_id(&record.key);
        Arc::new(Self {
            key: record.key.clone(),
            local_id,
            record: Mutex::new(record),
            sync_lock: Mutex::new(()),
            shared,
            registry,
        })
    }

    pub async fn record(&self) -> GhostRecord {
        self.record.lock().await.clone()
    }

    pub async fn custom_local_id(&self) -> Option<LocalUserId> {
        self.record.lock().await.custom_local_id.clone()
    }

    /// Brings the ghost's profile up to date. When no profile is supplied it
    /// is fetched from the remote network, but only if nothing is cached yet.
    pub async fn update_info(
        self: &Arc<Self>,
        source: &Arc<User>,
        info: Option<UserProfile>,
    ) -> Result<()> {
        let _sync = self.sync_lock.lock().await;
        let info = match info {
            Some(info) => info,
            None => {
                if !self.record.lock().await.display_name.is_empty() {
                    return Ok(());
                }
                self.fetch_profile(source).await?
            }
        };
        self.apply_profile(source, &info).await
    }

    /// Like [`Ghost::update_info`] but always refetches, for explicit
    /// resync paths.
    pub async fn sync_contact(self: &Arc<Self>, source: &Arc<User>) -> Result<()> {
        let _sync = self.sync_lock.lock().await;
        let info = self.fetch_profile(source).await?;
        self.apply_profile(source, &info).await
    }

    async fn fetch_profile(&self, source: &Arc<User>) -> Result<UserProfile> {
        let client = source
            .client_for_team(&self.key.team_id)
            .await
            .context("no connected account for this team")?;
        Ok(client.get_user_info(&self.key.remote_user_id).await?)
    }

    async fn apply_profile(self: &Arc<Self>, source: &Arc<User>, info: &UserProfile) -> Result<()> {
        if let Err(err) = self.shared.rooms.ensure_registered(&self.local_id).await {
            warn!(ghost = %self.local_id, error = %err, "failed to ensure ghost registration");
        }
        let name_changed = self.update_name(info).await;
        let avatar_changed = self.update_avatar(source, info).await;
        if name_changed || avatar_changed {
            let record = self.record().await;
            if let Err(err) = self.shared.storage.upsert_ghost(&record).await {
                warn!(ghost = %self.key, error = %err, "failed to save ghost");
            }
        }
        Ok(())
    }

    async fn update_name(self: &Arc<Self>, info: &UserProfile) -> bool {
        let name = self.shared.config.format_display_name(info);
        {
            let record = self.record.lock().await;
            if record.display_name == name && record.name_applied {
                return false;
            }
        }
        match self.shared.rooms.set_display_name(&self.local_id, &name).await {
            Ok(()) => {
                let mut record = self.record.lock().await;
                record.display_name = name.clone();
                record.name_applied = true;
                drop(record);
                self.spawn_portal_meta(GhostMetaUpdate::Name(name));
            }
            Err(err) => {
                warn!(ghost = %self.local_id, error = %err, "failed to set ghost display name");
                let mut record = self.record.lock().await;
                record.display_name = name;
                record.name_applied = false;
            }
        }
        true
    }

    async fn update_avatar(self: &Arc<Self>, source: &Arc<User>, info: &UserProfile) -> bool {
        let reusable = {
            let record = self.record.lock().await;
            if record.avatar_source == info.avatar_url && record.avatar_applied {
                return false;
            }
            if record.avatar_source == info.avatar_url {
                record.avatar_ref.clone()
            } else {
                None
            }
        };

        let mut avatar_ref = None;
        if !info.avatar_url.is_empty() {
            avatar_ref = match reusable {
                Some(media) => Some(media),
                None => match self.reupload_avatar(source, &info.avatar_url).await {
                    Ok(media) => Some(media),
                    Err(err) => {
                        warn!(ghost = %self.local_id, error = %err, "failed to reupload ghost avatar");
                        let mut record = self.record.lock().await;
                        record.avatar_source = info.avatar_url.clone();
                        record.avatar_ref = None;
                        record.avatar_applied = false;
                        return true;
                    }
                },
            };
        }

        let target = avatar_ref.clone().unwrap_or_default();
        match self.shared.rooms.set_avatar(&self.local_id, &target).await {
            Ok(()) => {
                let mut record = self.record.lock().await;
                record.avatar_source = info.avatar_url.clone();
                record.avatar_ref = avatar_ref.clone();
                record.avatar_applied = true;
                drop(record);
                self.spawn_portal_meta(GhostMetaUpdate::Avatar(avatar_ref));
            }
            Err(err) => {
                warn!(ghost = %self.local_id, error = %err, "failed to set ghost avatar");
                let mut record = self.record.lock().await;
                record.avatar_source = info.avatar_url.clone();
                record.avatar_ref = avatar_ref;
                record.avatar_applied = false;
            }
        }
        true
    }

    async fn reupload_avatar(&self, source: &Arc<User>, url: &str) -> Result<MediaRef> {
        let client = source
            .client_for_team(&self.key.team_id)
            .await
            .context("no connected account for this team")?;
        let bytes = client.fetch_avatar(url).await?;
        self.shared.rooms.upload_media(bytes, "image/png").await
    }

    /// Pushes a profile change into the rooms this ghost anchors, without
    /// blocking the sync that triggered it.
    fn spawn_portal_meta(self: &Arc<Self>, update: GhostMetaUpdate) {
        let ghost = self.clone();
        tokio::spawn(async move {
            let portals = match ghost
                .registry
                .portals_for_account(&ghost.key.team_id, &ghost.key.remote_user_id)
                .await
            {
                Ok(portals) => portals,
                Err(err) => {
                    warn!(ghost = %ghost.key, error = %err, "failed to list portals for profile fan-out");
                    return;
                }
            };
            for portal in portals {
                if let Err(err) = portal.apply_ghost_meta(&update).await {
                    warn!(portal = %portal.key, error = %err, "failed to apply profile change to room");
                }
            }
        });
    }

    /// Binds this ghost to a real local user through the homeserver's
    /// shared-secret login, so the user's own remote messages come from
    /// their real account.
    pub async fn enable_double_puppet(self: &Arc<Self>, user: &Arc<User>) -> Result<()> {
        let secret = self
            .shared
            .config
            .shared_secret_for(&user.local_id)
            .context("no shared secret configured for this homeserver")?
            .to_string();
        if self.custom_local_id().await.as_ref() == Some(&user.local_id) {
            debug!(ghost = %self.key, user = %user.local_id, "double puppeting already active");
            return Ok(());
        }
        let token = self
            .shared
            .rooms
            .login_with_shared_secret(&user.local_id, &secret)
            .await?;
        self.switch_custom(Some(user.local_id.clone()), token).await
    }

    pub async fn disable_double_puppet(self: &Arc<Self>) -> Result<()> {
        self.switch_custom(None, String::new()).await
    }

    async fn switch_custom(
        self: &Arc<Self>,
        local_id: Option<LocalUserId>,
        token: String,
    ) -> Result<()> {
        let previous = {
            let mut record = self.record.lock().await;
            let previous = record.custom_local_id.take();
            record.custom_local_id = local_id.clone();
            record.custom_access_token = token;
            self.shared.storage.upsert_ghost(&record).await?;
            previous
        };
        self.registry
            .reindex_custom(previous, local_id.clone().map(|id| (id, self.clone())))
            .await;
        match local_id {
            Some(local_id) => {
                info!(ghost = %self.key, user = %local_id, "double puppeting enabled")
            }
            None => debug!(ghost = %self.key, "double puppeting disabled"),
        }
        Ok(())
    }
}
