use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use remote_api::{AuthInfo, EventStream, RemoteClient};
use shared::{
    domain::{AccountKey, GhostKey, LocalUserId, PermissionLevel, PortalKey, RemoteUserId, RoomId, TeamId},
    error::{BridgeError, RemoteError},
    protocol::{
        BridgeState, ConnectInfo, ConversationInfo, MessageEvent, ReactionEvent, RemoteEvent,
        StateNotification,
    },
};
use storage::{AccountRecord, TeamInfoRecord, UserRecord};

use crate::{registry::Registry, Shared};

/// Connectivity of one account's realtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Connected,
}

struct LiveSession {
    client: Arc<dyn RemoteClient>,
}

/// One (local user, remote team) login. Credentials live in the record;
/// `live` holds the wire client while a realtime session is up.
pub struct Account {
    pub key: AccountKey,
    record: Mutex<AccountRecord>,
    phase: Mutex<SessionPhase>,
    live: Mutex<Option<LiveSession>>,
}

impl Account {
    fn new(record: AccountRecord) -> Arc<Self> {
        Arc::new(Self {
            key: record.key.clone(),
            record: Mutex::new(record),
            phase: Mutex::new(SessionPhase::Disconnected),
            live: Mutex::new(None),
        })
    }

    pub async fn record(&self) -> AccountRecord {
        self.record.lock().await.clone()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.record.lock().await.is_logged_in()
    }

    pub async fn phase(&self) -> SessionPhase {
        *self.phase.lock().await
    }

    async fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock().await = phase;
    }

    pub async fn client(&self) -> Option<Arc<dyn RemoteClient>> {
        self.live.lock().await.as_ref().map(|live| live.client.clone())
    }

    /// Identity of this account's own ghost on the remote team.
    pub fn ghost_key(&self) -> GhostKey {
        GhostKey::new(self.key.team_id.clone(), self.key.remote_user_id.clone())
    }
}

/// A real local-network user and their remote accounts.
///
/// `lifecycle` serializes whole-user connect/disconnect sweeps; individual
/// account operations only take the narrower per-account locks.
pub struct User {
    pub local_id: LocalUserId,
    record: Mutex<UserRecord>,
    accounts: Mutex<HashMap<AccountKey, Arc<Account>>>,
    lifecycle: Mutex<()>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) registry: Arc<Registry>,
}

impl User {
    pub(crate) fn new(
        record: UserRecord,
        accounts: Vec<AccountRecord>,
        shared: Arc<Shared>,
        registry: Arc<Registry>,
    ) -> Arc<Self> {
        let accounts = accounts
            .into_iter()
            .map(|record| (record.key.clone(), Account::new(record)))
            .collect();
        Arc::new(Self {
            local_id: record.local_id.clone(),
            record: Mutex::new(record),
            accounts: Mutex::new(accounts),
            lifecycle: Mutex::new(()),
            shared,
            registry,
        })
    }

    pub async fn permission(&self) -> PermissionLevel {
        self.record.lock().await.permission
    }

    pub async fn management_room(&self) -> Option<RoomId> {
        self.record.lock().await.management_room.clone()
    }

    pub async fn set_management_room(&self, room_id: RoomId) -> Result<(), BridgeError> {
        let mut record = self.record.lock().await;
        record.management_room = Some(room_id);
        self.shared
            .storage
            .upsert_user(&record)
            .await
            .map_err(BridgeError::persistence)
    }

    pub async fn accounts(&self) -> Vec<Arc<Account>> {
        self.accounts.lock().await.values().cloned().collect()
    }

    pub async fn account(
        &self,
        team_id: &TeamId,
        remote_user_id: &RemoteUserId,
    ) -> Option<Arc<Account>> {
        let key = AccountKey {
            local_id: self.local_id.clone(),
            team_id: team_id.clone(),
            remote_user_id: remote_user_id.clone(),
        };
        self.accounts.lock().await.get(&key).cloned()
    }

    pub async fn logged_in_accounts(&self) -> Vec<Arc<Account>> {
        let mut logged_in = Vec::new();
        for account in self.accounts().await {
            if account.is_logged_in().await {
                logged_in.push(account);
            }
        }
        logged_in
    }

    pub async fn is_logged_in(&self) -> bool {
        !self.logged_in_accounts().await.is_empty()
    }

    pub(crate) async fn account_ghost_keys(&self) -> Vec<GhostKey> {
        self.accounts
            .lock()
            .await
            .values()
            .map(|account| account.ghost_key())
            .collect()
    }

    /// True when this user already has a live login matching the given
    /// email/team pair.
    pub async fn team_logged_in(&self, email: &str, team_name: &str) -> bool {
        for account in self.accounts().await {
            let record = account.record().await;
            if record.email == email && record.team_name == team_name && record.is_logged_in() {
                return true;
            }
        }
        false
    }

    /// Registers credentials for a remote team and immediately attempts the
    /// initial connection. A duplicate login is rejected before anything is
    /// persisted.
    pub async fn login(self: &Arc<Self>, info: AuthInfo) -> Result<Arc<Account>, BridgeError> {
        if self.team_logged_in(&info.email, &info.team_name).await {
            return Err(BridgeError::AlreadyLoggedIn {
                local_id: self.local_id.clone(),
                team_name: info.team_name,
                email: info.email,
            });
        }

        let key = AccountKey {
            local_id: self.local_id.clone(),
            team_id: info.team_id,
            remote_user_id: info.remote_user_id,
        };
        let record = AccountRecord {
            key: key.clone(),
            email: info.email,
            team_name: info.team_name,
            token: info.token,
            cookie: info.cookie,
        };
        self.shared
            .storage
            .upsert_account(&record)
            .await
            .map_err(BridgeError::persistence)?;

        let account = {
            let mut accounts = self.accounts.lock().await;
            match accounts.get(&key) {
                Some(existing) => {
                    *existing.record.lock().await = record;
                    existing.clone()
                }
                None => {
                    let account = Account::new(record);
                    accounts.insert(key.clone(), account.clone());
                    account
                }
            }
        };
        self.registry
            .index_account(account.ghost_key(), self.clone())
            .await;
        info!(user = %self.local_id, account = %key, "logged into remote team");

        self.connect_account(&account).await?;
        Ok(account)
    }

    /// Tears down the session and removes the stored account, releasing the
    /// remote identity so another local user may claim it.
    pub async fn logout(self: &Arc<Self>, account: &Arc<Account>) -> Result<(), BridgeError> {
        if !account.is_logged_in().await {
            return Err(BridgeError::NotLoggedIn);
        }

        match self.registry.ghost_by_custom_local_id(&self.local_id).await {
            Ok(Some(ghost)) => {
                if let Err(err) = ghost.disable_double_puppet().await {
                    warn!(user = %self.local_id, error = %err, "failed to disable double puppeting");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(user = %self.local_id, error = %err, "failed to look up double puppet")
            }
        }

        self.disconnect_account(account).await;

        // the row must go so the uniqueness index frees the identity
        self.shared
            .storage
            .delete_account(&account.key)
            .await
            .map_err(BridgeError::persistence)?;
        {
            let mut record = account.record.lock().await;
            record.token.clear();
            record.cookie = None;
        }
        self.accounts.lock().await.remove(&account.key);
        self.registry.unindex_account(&account.ghost_key()).await;
        info!(user = %self.local_id, account = %account.key, "logged out of remote team");
        Ok(())
    }

    /// Connects every logged-in account. A failure on one account is reported
    /// as a state transition and does not stop the sweep.
    pub async fn connect(self: &Arc<Self>) -> Result<(), BridgeError> {
        let _lifecycle = self.lifecycle.lock().await;
        let accounts = self.logged_in_accounts().await;
        if accounts.is_empty() {
            info!(user = %self.local_id, "no remote accounts to connect");
            self.shared
                .notify(StateNotification::global(BridgeState::Unconfigured));
            return Ok(());
        }
        for account in accounts {
            if let Err(err) = self.connect_account(&account).await {
                warn!(user = %self.local_id, account = %account.key, error = %err, "failed to connect account");
                self.shared.notify(StateNotification::for_account(
                    account.key.clone(),
                    BridgeState::UnknownError(err.to_string()),
                ));
            }
        }
        Ok(())
    }

    pub async fn disconnect(self: &Arc<Self>) {
        let _lifecycle = self.lifecycle.lock().await;
        for account in self.accounts().await {
            self.disconnect_account(&account).await;
        }
    }

    /// Opens the realtime link for one account and spawns its event loop.
    /// A no-op while a session is already connecting or connected.
    pub async fn connect_account(
        self: &Arc<Self>,
        account: &Arc<Account>,
    ) -> Result<(), BridgeError> {
        {
            let mut phase = account.phase.lock().await;
            match *phase {
                SessionPhase::Connecting | SessionPhase::Connected => {
                    debug!(account = %account.key, "session already active");
                    return Ok(());
                }
                SessionPhase::Disconnected => *phase = SessionPhase::Connecting,
            }
        }

        let record = account.record().await;
        if !record.is_logged_in() {
            account.set_phase(SessionPhase::Disconnected).await;
            return Err(BridgeError::NotLoggedIn);
        }

        let client = self
            .shared
            .connector
            .client(&record.token, record.cookie.as_deref());
        let stream = match client.open_realtime().await {
            Ok(stream) => stream,
            Err(err) => {
                account.set_phase(SessionPhase::Disconnected).await;
                return Err(err.into());
            }
        };
        *account.live.lock().await = Some(LiveSession { client });
        tokio::spawn(run_event_loop(self.clone(), account.clone(), stream));
        Ok(())
    }

    /// Closes the realtime link. Safe to call on an idle account.
    pub async fn disconnect_account(&self, account: &Arc<Account>) {
        let live = account.live.lock().await.take();
        if let Some(live) = live {
            live.client.close_realtime().await;
            debug!(account = %account.key, "realtime link closed");
        }
        account.set_phase(SessionPhase::Disconnected).await;
    }

    /// First connected client for the given team, used when syncing ghosts
    /// and portals that belong to it.
    pub(crate) async fn client_for_team(&self, team_id: &TeamId) -> Option<Arc<dyn RemoteClient>> {
        for account in self.accounts().await {
            if &account.key.team_id == team_id {
                if let Some(client) = account.client().await {
                    return Some(client);
                }
            }
        }
        None
    }

    /// Refreshes stored team metadata from the remote network, then
    /// reconciles portals. Portal sync runs in force mode when any team
    /// field changed.
    pub async fn update_team(
        self: &Arc<Self>,
        account: &Arc<Account>,
        force: bool,
    ) -> Result<(), BridgeError> {
        let client = account.client().await.ok_or(BridgeError::NotConnected)?;
        let profile = client.get_team_info().await?;

        let mut info = self
            .shared
            .storage
            .get_team_info(&account.key.team_id)
            .await
            .map_err(BridgeError::persistence)?
            .unwrap_or_else(|| TeamInfoRecord::new(account.key.team_id.clone()));

        let mut changed = false;
        if info.name != profile.name {
            info.name = profile.name.clone();
            changed = true;
        }
        if info.domain != profile.domain {
            info.domain = profile.domain.clone();
            changed = true;
        }
        if info.url != profile.url {
            info.url = profile.url.clone();
            changed = true;
        }
        if info.avatar_source != profile.avatar_url {
            info.avatar_source = profile.avatar_url.clone();
            info.avatar_ref = None;
            changed = true;
            if !profile.avatar_url.is_empty() {
                match client.fetch_avatar(&profile.avatar_url).await {
                    Ok(bytes) => match self.shared.rooms.upload_media(bytes, "image/png").await {
                        Ok(media) => info.avatar_ref = Some(media),
                        Err(err) => {
                            warn!(team = %account.key.team_id, error = %err, "failed to upload team avatar")
                        }
                    },
                    Err(err) => {
                        warn!(team = %account.key.team_id, error = %err, "failed to fetch team avatar")
                    }
                }
            }
        }
        if changed {
            if let Err(err) = self.shared.storage.upsert_team_info(&info).await {
                warn!(team = %account.key.team_id, error = %err, "failed to save team info");
            }
        }

        self.sync_portals(account, changed || force).await
    }

    /// Reconciles this account's portals against the remote conversation
    /// list. Tokens that cannot list conversations degrade to syncing only
    /// already-known portals; portals are never removed here.
    pub async fn sync_portals(
        self: &Arc<Self>,
        account: &Arc<Account>,
        force: bool,
    ) -> Result<(), BridgeError> {
        let client = account.client().await.ok_or(BridgeError::NotConnected)?;

        let mut conversations: HashMap<_, ConversationInfo> =
            match client.list_conversations().await {
                Ok(list) => list
                    .into_iter()
                    .map(|info| (info.channel_id.clone(), info))
                    .collect(),
                Err(RemoteError::Unsupported(what)) => {
                    info!(account = %account.key, what, "conversation listing unavailable for this token, syncing known portals only");
                    HashMap::new()
                }
                Err(err) => {
                    warn!(account = %account.key, error = %err, "failed to list conversations");
                    HashMap::new()
                }
            };

        let portals = self
            .registry
            .portals_for_account(&account.key.team_id, &account.key.remote_user_id)
            .await?;
        for portal in portals {
            let info = conversations.remove(&portal.key.channel_id);
            if let Err(err) = portal.sync(self, account, info.as_ref(), force).await {
                warn!(portal = %portal.key, error = %err, "portal sync failed");
            }
        }
        for info in conversations.into_values() {
            let key = PortalKey::new(
                account.key.team_id.clone(),
                account.key.remote_user_id.clone(),
                info.channel_id.clone(),
            );
            let portal = self.registry.portal(&key).await?;
            if let Err(err) = portal.sync(self, account, Some(&info), force).await {
                warn!(portal = %portal.key, error = %err, "portal sync failed");
            }
        }
        Ok(())
    }

    async fn on_connected(self: &Arc<Self>, account: &Arc<Account>, info: ConnectInfo) {
        if info.team_id != account.key.team_id || info.remote_user_id != account.key.remote_user_id
        {
            warn!(
                account = %account.key,
                reported_team = %info.team_id,
                reported_user = %info.remote_user_id,
                "remote network reported a different identity than the stored login"
            );
        }
        {
            let mut record = account.record.lock().await;
            if record.team_name != info.team_name && !info.team_name.is_empty() {
                record.team_name = info.team_name.clone();
                if let Err(err) = self.shared.storage.upsert_account(&record).await {
                    warn!(account = %account.key, error = %err, "failed to save account");
                }
            }
        }
        info!(account = %account.key, team = %info.team_name, "connected to remote team");
        self.shared.notify(StateNotification::for_account(
            account.key.clone(),
            BridgeState::Connected,
        ));

        self.enable_double_puppet(account).await;
        if let Err(err) = self.update_team(account, false).await {
            warn!(account = %account.key, error = %err, "post-connect team sync failed");
        }
    }

    /// Binds this user's own ghost to their real account when a shared
    /// secret is configured for their homeserver. Quiet no-op otherwise.
    async fn enable_double_puppet(self: &Arc<Self>, account: &Arc<Account>) {
        if self.shared.config.shared_secret_for(&self.local_id).is_none() {
            return;
        }
        let ghost = match self.registry.ghost(&account.ghost_key()).await {
            Ok(ghost) => ghost,
            Err(err) => {
                warn!(account = %account.key, error = %err, "failed to load own ghost");
                return;
            }
        };
        if let Err(err) = ghost.enable_double_puppet(self).await {
            warn!(user = %self.local_id, error = %err, "automatic double puppeting failed");
        }
    }

    async fn dispatch_message(self: &Arc<Self>, account: &Arc<Account>, event: MessageEvent) {
        let key = PortalKey::new(
            account.key.team_id.clone(),
            account.key.remote_user_id.clone(),
            event.channel_id.clone(),
        );
        match self.registry.portal(&key).await {
            Ok(portal) => {
                if let Err(err) = portal.handle_remote_message(self, account, &event).await {
                    warn!(portal = %portal.key, error = %err, "failed to handle remote message");
                }
            }
            Err(err) => warn!(portal = %key, error = %err, "failed to load portal for message"),
        }
    }

    async fn dispatch_reaction(self: &Arc<Self>, account: &Arc<Account>, event: ReactionEvent) {
        let key = PortalKey::new(
            account.key.team_id.clone(),
            account.key.remote_user_id.clone(),
            event.channel_id.clone(),
        );
        match self.registry.portal(&key).await {
            Ok(portal) => {
                if let Err(err) = portal.handle_remote_reaction(self, account, &event).await {
                    warn!(portal = %portal.key, error = %err, "failed to handle remote reaction");
                }
            }
            Err(err) => warn!(portal = %key, error = %err, "failed to load portal for reaction"),
        }
    }
}

/// Consumes one account's realtime stream until it closes. Invalid
/// credentials end the loop immediately after cleanup; every other event
/// kind is handled in place.
async fn run_event_loop(user: Arc<User>, account: Arc<Account>, mut stream: EventStream) {
    while let Some(event) = stream.next().await {
        match event {
            RemoteEvent::Connecting { attempt } => {
                debug!(account = %account.key, attempt, "realtime link connecting");
                account.set_phase(SessionPhase::Connecting).await;
                user.shared.notify(StateNotification::for_account(
                    account.key.clone(),
                    BridgeState::Connecting,
                ));
            }
            RemoteEvent::Connected(info) => {
                account.set_phase(SessionPhase::Connected).await;
                user.on_connected(&account, info).await;
            }
            RemoteEvent::Hello => {}
            RemoteEvent::InvalidAuth => {
                error!(account = %account.key, "remote token is no longer valid, logging out");
                if let Err(err) = user.logout(&account).await {
                    warn!(account = %account.key, error = %err, "cleanup after invalid auth failed");
                }
                user.shared.notify(StateNotification::for_account(
                    account.key.clone(),
                    BridgeState::BadCredentials,
                ));
                return;
            }
            RemoteEvent::LatencyReport { millis } => {
                debug!(account = %account.key, millis, "latency report")
            }
            RemoteEvent::Message(event) => user.dispatch_message(&account, event).await,
            RemoteEvent::ReactionAdded(event) => user.dispatch_reaction(&account, event).await,
            RemoteEvent::StreamError { message } => {
                error!(account = %account.key, message, "realtime stream error");
                user.shared.notify(StateNotification::for_account(
                    account.key.clone(),
                    BridgeState::UnknownError(message),
                ));
            }
            RemoteEvent::Unknown { kind } => {
                warn!(account = %account.key, kind, "unhandled remote event")
            }
        }
    }
    account.set_phase(SessionPhase::Disconnected).await;
    debug!(account = %account.key, "event stream closed");
}
