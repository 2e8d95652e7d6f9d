use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use remote_api::RemoteConnector;
use shared::{
    domain::LocalUserId,
    error::BridgeError,
    protocol::{BridgeState, StateNotification},
};
use storage::Storage;

pub mod config;
pub mod ghost;
pub mod portal;
pub mod registry;
pub mod rooms;
pub mod user;

pub use config::BridgeConfig;
pub use ghost::Ghost;
pub use portal::Portal;
pub use registry::Registry;
pub use rooms::{CreateRoomRequest, MissingRoomTransport, RoomTransport};
pub use user::{Account, SessionPhase, User};

/// Dependencies every live object needs, wired once at startup.
pub(crate) struct Shared {
    pub(crate) storage: Storage,
    pub(crate) config: BridgeConfig,
    pub(crate) connector: Arc<dyn RemoteConnector>,
    pub(crate) rooms: Arc<dyn RoomTransport>,
    states: broadcast::Sender<StateNotification>,
}

impl Shared {
    /// Broadcasts a state transition to whoever is listening. Dropped when
    /// there are no subscribers.
    pub(crate) fn notify(&self, notification: StateNotification) {
        debug!(state = ?notification.state, account = ?notification.account, "bridge state changed");
        let _ = self.states.send(notification);
    }
}

/// The per-account connection and identity-mapping core.
pub struct Bridge {
    shared: Arc<Shared>,
    registry: Arc<Registry>,
}

impl Bridge {
    pub fn new(
        config: BridgeConfig,
        storage: Storage,
        connector: Arc<dyn RemoteConnector>,
        rooms: Arc<dyn RoomTransport>,
    ) -> Self {
        let (states, _) = broadcast::channel(256);
        let shared = Arc::new(Shared {
            storage,
            config,
            connector,
            rooms,
            states,
        });
        let registry = Registry::new(shared.clone());
        Self { shared, registry }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn subscribe_states(&self) -> broadcast::Receiver<StateNotification> {
        self.shared.states.subscribe()
    }

    pub async fn user(&self, local_id: &LocalUserId) -> Result<Arc<User>, BridgeError> {
        self.registry.user(local_id).await
    }

    /// Loads every known user and brings their accounts online, each user in
    /// its own task. Restores double-puppet bindings from storage.
    pub async fn start(&self) -> Result<(), BridgeError> {
        let users = self.registry.all_users().await?;
        if users.is_empty() {
            info!("no bridge users yet, waiting for logins");
            self.shared
                .notify(StateNotification::global(BridgeState::Unconfigured));
        }
        for user in users {
            tokio::spawn(async move {
                if let Err(err) = user.connect().await {
                    warn!(user = %user.local_id, error = %err, "initial connect failed");
                }
            });
        }

        let customs = self
            .shared
            .storage
            .ghosts_with_custom_local_id()
            .await
            .map_err(BridgeError::persistence)?;
        for record in customs {
            match self.registry.ghost(&record.key).await {
                Ok(ghost) => debug!(ghost = %ghost.local_id, "double puppet binding restored"),
                Err(err) => warn!(ghost = %record.key, error = %err, "failed to restore double puppet"),
            }
        }
        Ok(())
    }

    /// Forces a team metadata and portal resync for every connected account.
    pub async fn sync_all_teams(&self) -> Result<(), BridgeError> {
        for user in self.registry.all_users().await? {
            for account in user.logged_in_accounts().await {
                if let Err(err) = user.update_team(&account, true).await {
                    warn!(account = %account.key, error = %err, "team sync failed");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/core_tests.rs"]
mod core_tests;
