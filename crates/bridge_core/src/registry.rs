use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use shared::{
    domain::{GhostKey, LocalUserId, PortalKey, RemoteUserId, TeamId},
    error::BridgeError,
};
use storage::{GhostRecord, PortalRecord, UserRecord};

use crate::{ghost::Ghost, portal::Portal, user::User, Shared};

/// Process-wide identity maps. Each local user, ghost, and portal has exactly
/// one live instance; lookups insert a fresh row on first use so callers never
/// observe "not found" for identities the bridge is allowed to know about.
///
/// Map locks are short lived and are never held across remote-network or
/// room-transport calls.
pub struct Registry {
    shared: Arc<Shared>,
    users: Mutex<HashMap<LocalUserId, Arc<User>>>,
    users_by_account: Mutex<HashMap<GhostKey, Arc<User>>>,
    ghosts: Mutex<HashMap<GhostKey, Arc<Ghost>>>,
    ghosts_by_custom: Mutex<HashMap<LocalUserId, Arc<Ghost>>>,
    portals: Mutex<HashMap<PortalKey, Arc<Portal>>>,
}

impl Registry {
    pub(crate) fn new(shared: Arc<Shared>) -> Arc<Self> {
        Arc::new(Self {
            shared,
            users: Mutex::new(HashMap::new()),
            users_by_account: Mutex::new(HashMap::new()),
            ghosts: Mutex::new(HashMap::new()),
            ghosts_by_custom: Mutex::new(HashMap::new()),
            portals: Mutex::new(HashMap::new()),
        })
    }

    pub async fn user(self: &Arc<Self>, local_id: &LocalUserId) -> Result<Arc<User>, BridgeError> {
        if let Some(user) = self.users.lock().await.get(local_id) {
            return Ok(user.clone());
        }

        let record = match self
            .shared
            .storage
            .get_user(local_id)
            .await
            .map_err(BridgeError::persistence)?
        {
            Some(record) => record,
            None => {
                let mut record = UserRecord::new(local_id.clone());
                record.permission = self.shared.config.permission_for(local_id);
                self.shared
                    .storage
                    .upsert_user(&record)
                    .await
                    .map_err(BridgeError::persistence)?;
                record
            }
        };
        let accounts = self
            .shared
            .storage
            .accounts_for_user(local_id)
            .await
            .map_err(BridgeError::persistence)?;

        let user = {
            let mut users = self.users.lock().await;
            // another task may have loaded the same user meanwhile
            if let Some(user) = users.get(local_id) {
                return Ok(user.clone());
            }
            let user = User::new(record, accounts, self.shared.clone(), self.clone());
            users.insert(local_id.clone(), user.clone());
            user
        };

        let keys = user.account_ghost_keys().await;
        let mut by_account = self.users_by_account.lock().await;
        for key in keys {
            by_account.insert(key, user.clone());
        }
        Ok(user)
    }

    pub async fn user_by_remote_id(
        self: &Arc<Self>,
        team_id: &TeamId,
        remote_user_id: &RemoteUserId,
    ) -> Result<Option<Arc<User>>, BridgeError> {
        let key = GhostKey::new(team_id.clone(), remote_user_id.clone());
        if let Some(user) = self.users_by_account.lock().await.get(&key) {
            return Ok(Some(user.clone()));
        }
        match self
            .shared
            .storage
            .get_user_by_remote_id(team_id, remote_user_id)
            .await
            .map_err(BridgeError::persistence)?
        {
            Some(record) => Ok(Some(self.user(&record.local_id).await?)),
            None => Ok(None),
        }
    }

    pub async fn all_users(self: &Arc<Self>) -> Result<Vec<Arc<User>>, BridgeError> {
        let records = self
            .shared
            .storage
            .get_all_users()
            .await
            .map_err(BridgeError::persistence)?;
        let mut users = Vec::with_capacity(records.len());
        for record in records {
            users.push(self.user(&record.local_id).await?);
        }
        Ok(users)
    }

    pub(crate) async fn index_account(&self, key: GhostKey, user: Arc<User>) {
        self.users_by_account.lock().await.insert(key, user);
    }

    pub(crate) async fn unindex_account(&self, key: &GhostKey) {
        self.users_by_account.lock().await.remove(key);
    }

    pub async fn ghost(self: &Arc<Self>, key: &GhostKey) -> Result<Arc<Ghost>, BridgeError> {
        if let Some(ghost) = self.ghosts.lock().await.get(key) {
            return Ok(ghost.clone());
        }

        let record = match self
            .shared
            .storage
            .get_ghost(key)
            .await
            .map_err(BridgeError::persistence)?
        {
            Some(record) => record,
            None => {
                let record = GhostRecord::new(key.clone());
                self.shared
                    .storage
                    .upsert_ghost(&record)
                    .await
                    .map_err(BridgeError::persistence)?;
                record
            }
        };

        let custom = record.custom_local_id.clone();
        let ghost = {
            let mut ghosts = self.ghosts.lock().await;
            if let Some(ghost) = ghosts.get(key) {
                return Ok(ghost.clone());
            }
            let ghost = Ghost::new(record, self.shared.clone(), self.clone());
            ghosts.insert(key.clone(), ghost.clone());
            ghost
        };
        if let Some(custom) = custom {
            self.ghosts_by_custom.lock().await.insert(custom, ghost.clone());
        }
        Ok(ghost)
    }

    /// Finds the ghost a real local user is double-puppeted through, if any.
    pub async fn ghost_by_custom_local_id(
        self: &Arc<Self>,
        local_id: &LocalUserId,
    ) -> Result<Option<Arc<Ghost>>, BridgeError> {
        if let Some(ghost) = self.ghosts_by_custom.lock().await.get(local_id) {
            return Ok(Some(ghost.clone()));
        }
        match self
            .shared
            .storage
            .get_ghost_by_custom_local_id(local_id)
            .await
            .map_err(BridgeError::persistence)?
        {
            Some(record) => Ok(Some(self.ghost(&record.key).await?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn reindex_custom(
        &self,
        previous: Option<LocalUserId>,
        current: Option<(LocalUserId, Arc<Ghost>)>,
    ) {
        let mut by_custom = self.ghosts_by_custom.lock().await;
        if let Some(previous) = previous {
            by_custom.remove(&previous);
        }
        if let Some((local_id, ghost)) = current {
            by_custom.insert(local_id, ghost);
        }
    }

    pub async fn portal(self: &Arc<Self>, key: &PortalKey) -> Result<Arc<Portal>, BridgeError> {
        if let Some(portal) = self.portals.lock().await.get(key) {
            return Ok(portal.clone());
        }

        let record = match self
            .shared
            .storage
            .get_portal(key)
            .await
            .map_err(BridgeError::persistence)?
        {
            Some(record) => record,
            None => {
                let record = PortalRecord::new(key.clone());
                self.shared
                    .storage
                    .upsert_portal(&record)
                    .await
                    .map_err(BridgeError::persistence)?;
                record
            }
        };
        Ok(self.insert_portal(record).await)
    }

    /// Like [`Registry::portal`] but never creates a row, for admin paths
    /// that must not materialize anything.
    pub async fn portal_if_exists(
        self: &Arc<Self>,
        key: &PortalKey,
    ) -> Result<Option<Arc<Portal>>, BridgeError> {
        if let Some(portal) = self.portals.lock().await.get(key) {
            return Ok(Some(portal.clone()));
        }
        match self
            .shared
            .storage
            .get_portal(key)
            .await
            .map_err(BridgeError::persistence)?
        {
            Some(record) => Ok(Some(self.insert_portal(record).await)),
            None => Ok(None),
        }
    }

    pub async fn portals_for_account(
        self: &Arc<Self>,
        team_id: &TeamId,
        receiver_id: &RemoteUserId,
    ) -> Result<Vec<Arc<Portal>>, BridgeError> {
        let records = self
            .shared
            .storage
            .portals_for_account(team_id, receiver_id)
            .await
            .map_err(BridgeError::persistence)?;
        let mut portals = Vec::with_capacity(records.len());
        for record in records {
            portals.push(self.insert_portal(record).await);
        }
        Ok(portals)
    }

    async fn insert_portal(self: &Arc<Self>, record: PortalRecord) -> Arc<Portal> {
        let mut portals = self.portals.lock().await;
        if let Some(portal) = portals.get(&record.key) {
            return portal.clone();
        }
        let key = record.key.clone();
        let portal = Portal::new(record, self.shared.clone(), self.clone());
        portals.insert(key, portal.clone());
        portal
    }

    pub(crate) async fn remove_portal(&self, key: &PortalKey) {
        self.portals.lock().await.remove(key);
    }
}
