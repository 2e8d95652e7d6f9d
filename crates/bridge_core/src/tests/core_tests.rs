use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use remote_api::{
    AuthInfo, EventPublisher, EventStream, RemoteClient, RemoteConnector, RemoteIdentity,
};
use shared::{
    domain::{
        ChannelId, EventId, GhostKey, LocalUserId, MediaRef, PortalKey, RemoteUserId, RoomId,
        TeamId,
    },
    error::{BridgeError, RemoteError},
    protocol::{
        BridgeState, ConnectInfo, ConversationInfo, ConversationKind, MessageEvent, RemoteEvent,
        StateNotification, TeamProfile, UserProfile,
    },
};
use storage::Storage;

use super::*;

#[derive(Default)]
struct RecordingTransport {
    calls: StdMutex<Vec<String>>,
    rooms_created: AtomicUsize,
}

impl RecordingTransport {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl RoomTransport for RecordingTransport {
    async fn create_room(&self, request: CreateRoomRequest) -> Result<RoomId> {
        let n = self.rooms_created.fetch_add(1, Ordering::SeqCst);
        self.record(format!("create_room {}", request.name));
        Ok(RoomId::new(format!("!room-{n}:localhost")))
    }

    async fn set_room_name(&self, room_id: &RoomId, name: &str) -> Result<()> {
        self.record(format!("set_room_name {room_id} {name}"));
        Ok(())
    }

    async fn set_room_topic(&self, room_id: &RoomId, topic: &str) -> Result<()> {
        self.record(format!("set_room_topic {room_id} {topic}"));
        Ok(())
    }

    async fn set_room_avatar(&self, room_id: &RoomId, avatar: &MediaRef) -> Result<()> {
        self.record(format!("set_room_avatar {room_id} {avatar}"));
        Ok(())
    }

    async fn send_state_event(
        &self,
        _room_id: &RoomId,
        event_type: &str,
        _state_key: &str,
        _content: serde_json::Value,
    ) -> Result<EventId> {
        self.record(format!("send_state_event {event_type}"));
        Ok(EventId::new("$state:localhost"))
    }

    async fn ensure_registered(&self, ghost_id: &LocalUserId) -> Result<()> {
        self.record(format!("ensure_registered {ghost_id}"));
        Ok(())
    }

    async fn set_display_name(&self, ghost_id: &LocalUserId, name: &str) -> Result<()> {
        self.record(format!("set_display_name {ghost_id} {name}"));
        Ok(())
    }

    async fn set_avatar(&self, ghost_id: &LocalUserId, avatar: &MediaRef) -> Result<()> {
        self.record(format!("set_avatar {ghost_id} {avatar}"));
        Ok(())
    }

    async fn invite_or_join(&self, user_id: &LocalUserId, room_id: &RoomId) -> Result<()> {
        self.record(format!("invite_or_join {user_id} {room_id}"));
        Ok(())
    }

    async fn upload_media(&self, _bytes: Vec<u8>, _content_type: &str) -> Result<MediaRef> {
        self.record("upload_media");
        Ok(MediaRef("mxc://localhost/media".into()))
    }

    async fn login_with_shared_secret(
        &self,
        local_id: &LocalUserId,
        _secret: &str,
    ) -> Result<String> {
        self.record(format!("shared_secret_login {local_id}"));
        Ok("syt_custom_token".into())
    }
}

struct ScriptedClient {
    identity: RemoteIdentity,
    team: TeamProfile,
    conversations: Vec<ConversationInfo>,
    conversations_unsupported: bool,
    profiles: HashMap<RemoteUserId, UserProfile>,
    stream: StdMutex<Option<EventStream>>,
    publishers: StdMutex<Vec<EventPublisher>>,
}

impl ScriptedClient {
    fn new() -> Self {
        Self {
            identity: RemoteIdentity {
                email: "alice@acme.example".into(),
                remote_user_id: RemoteUserId::from("U1"),
                team_id: TeamId::from("T1"),
                team_name: "acme".into(),
            },
            team: TeamProfile {
                team_id: TeamId::from("T1"),
                name: "Acme".into(),
                domain: "acme".into(),
                url: "https://acme.example".into(),
                avatar_url: String::new(),
            },
            conversations: Vec::new(),
            conversations_unsupported: false,
            profiles: HashMap::new(),
            stream: StdMutex::new(None),
            publishers: StdMutex::new(Vec::new()),
        }
    }

    fn script_stream(&self) -> EventPublisher {
        let (publisher, stream) = EventStream::channel(16);
        *self.stream.lock().unwrap() = Some(stream);
        publisher
    }
}

#[async_trait]
impl RemoteClient for ScriptedClient {
    async fn verify_token(&self) -> Result<RemoteIdentity, RemoteError> {
        Ok(self.identity.clone())
    }

    async fn open_realtime(&self) -> Result<EventStream, RemoteError> {
        if let Some(stream) = self.stream.lock().unwrap().take() {
            return Ok(stream);
        }
        // dormant stream: kept open so the session stays up
        let (publisher, stream) = EventStream::channel(16);
        self.publishers.lock().unwrap().push(publisher);
        Ok(stream)
    }

    async fn close_realtime(&self) {
        self.publishers.lock().unwrap().clear();
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationInfo>, RemoteError> {
        if self.conversations_unsupported {
            return Err(RemoteError::Unsupported("conversation listing"));
        }
        Ok(self.conversations.clone())
    }

    async fn get_user_info(&self, remote_user_id: &RemoteUserId) -> Result<UserProfile, RemoteError> {
        self.profiles
            .get(remote_user_id)
            .cloned()
            .ok_or_else(|| RemoteError::Api("user_not_found".into()))
    }

    async fn get_team_info(&self) -> Result<TeamProfile, RemoteError> {
        Ok(self.team.clone())
    }

    async fn fetch_avatar(&self, _url: &str) -> Result<Vec<u8>, RemoteError> {
        Ok(b"png".to_vec())
    }
}

struct ScriptedConnector {
    client: Arc<ScriptedClient>,
}

impl RemoteConnector for ScriptedConnector {
    fn client(&self, _token: &str, _cookie: Option<&str>) -> Arc<dyn RemoteClient> {
        self.client.clone() as Arc<dyn RemoteClient>
    }
}

async fn build_bridge(
    client: Arc<ScriptedClient>,
    transport: Arc<RecordingTransport>,
    config: BridgeConfig,
) -> (Bridge, Storage) {
    let storage = Storage::new("sqlite::memory:").await.expect("storage");
    let bridge = Bridge::new(
        config,
        storage.clone(),
        Arc::new(ScriptedConnector { client }),
        transport,
    );
    (bridge, storage)
}

fn alice() -> LocalUserId {
    LocalUserId::from("@alice:localhost")
}

fn auth_info() -> AuthInfo {
    AuthInfo {
        email: "alice@acme.example".into(),
        remote_user_id: RemoteUserId::from("U1"),
        team_name: "acme".into(),
        team_id: TeamId::from("T1"),
        token: "xoxc-token".into(),
        cookie: None,
    }
}

async fn expect_state(states: &mut broadcast::Receiver<StateNotification>, want: BridgeState) {
    loop {
        let notification = tokio::time::timeout(Duration::from_secs(5), states.recv())
            .await
            .expect("timed out waiting for bridge state")
            .expect("state channel closed");
        if notification.state == want {
            return;
        }
    }
}

#[tokio::test]
async fn registry_caches_live_instances() {
    let client = Arc::new(ScriptedClient::new());
    let (bridge, storage) = build_bridge(
        client,
        Arc::new(RecordingTransport::default()),
        BridgeConfig::default(),
    )
    .await;
    let registry = bridge.registry();

    let user_a = registry.user(&alice()).await.expect("user");
    let user_b = registry.user(&alice()).await.expect("user");
    assert!(Arc::ptr_eq(&user_a, &user_b));
    assert!(storage.get_user(&alice()).await.expect("get").is_some());

    let ghost_key = GhostKey::new(TeamId::from("T1"), RemoteUserId::from("U2"));
    let ghost_a = registry.ghost(&ghost_key).await.expect("ghost");
    let ghost_b = registry.ghost(&ghost_key).await.expect("ghost");
    assert!(Arc::ptr_eq(&ghost_a, &ghost_b));
    assert_eq!(ghost_a.local_id.as_str(), "@slack_t1-u2:localhost");

    let portal_key = PortalKey::new(
        TeamId::from("T1"),
        RemoteUserId::from("U1"),
        ChannelId::from("C1"),
    );
    let portal_a = registry.portal(&portal_key).await.expect("portal");
    let portal_b = registry.portal(&portal_key).await.expect("portal");
    assert!(Arc::ptr_eq(&portal_a, &portal_b));
}

#[tokio::test]
async fn login_persists_token_and_indexes_remote_identity() {
    let client = Arc::new(ScriptedClient::new());
    let (bridge, storage) = build_bridge(
        client,
        Arc::new(RecordingTransport::default()),
        BridgeConfig::default(),
    )
    .await;

    let user = bridge.user(&alice()).await.expect("user");
    let account = user.login(auth_info()).await.expect("login");

    let stored = storage
        .get_account(&account.key)
        .await
        .expect("get")
        .expect("account row");
    assert_eq!(stored.token, "xoxc-token");
    assert!(stored.is_logged_in());

    let found = bridge
        .registry()
        .user_by_remote_id(&TeamId::from("T1"), &RemoteUserId::from("U1"))
        .await
        .expect("lookup")
        .expect("owner");
    assert!(Arc::ptr_eq(&found, &user));
}

#[tokio::test]
async fn duplicate_login_is_rejected_without_changes() {
    let client = Arc::new(ScriptedClient::new());
    let (bridge, storage) = build_bridge(
        client,
        Arc::new(RecordingTransport::default()),
        BridgeConfig::default(),
    )
    .await;

    let user = bridge.user(&alice()).await.expect("user");
    let account = user.login(auth_info()).await.expect("login");

    let err = user.login(auth_info()).await.err().expect("duplicate");
    assert!(matches!(err, BridgeError::AlreadyLoggedIn { .. }));
    assert!(err.is_conflict());

    assert_eq!(user.accounts().await.len(), 1);
    let stored = storage
        .get_account(&account.key)
        .await
        .expect("get")
        .expect("account row");
    assert_eq!(stored.token, "xoxc-token");
}

#[tokio::test]
async fn logout_removes_the_account_and_forgets_it() {
    let client = Arc::new(ScriptedClient::new());
    let (bridge, storage) = build_bridge(
        client,
        Arc::new(RecordingTransport::default()),
        BridgeConfig::default(),
    )
    .await;

    let user = bridge.user(&alice()).await.expect("user");
    let account = user.login(auth_info()).await.expect("login");

    user.logout(&account).await.expect("logout");

    assert!(storage
        .get_account(&account.key)
        .await
        .expect("get")
        .is_none());
    assert!(user.accounts().await.is_empty());
    assert!(!user.is_logged_in().await);

    let err = user.logout(&account).await.expect_err("double logout");
    assert!(matches!(err, BridgeError::NotLoggedIn));
}

#[tokio::test]
async fn remote_identity_can_be_reclaimed_after_logout() {
    let client = Arc::new(ScriptedClient::new());
    let (bridge, _storage) = build_bridge(
        client,
        Arc::new(RecordingTransport::default()),
        BridgeConfig::default(),
    )
    .await;

    let user = bridge.user(&alice()).await.expect("user");
    let account = user.login(auth_info()).await.expect("login");
    user.logout(&account).await.expect("logout");

    let bob = LocalUserId::from("@bob:localhost");
    let successor = bridge.user(&bob).await.expect("user");
    successor.login(auth_info()).await.expect("reclaim");

    let owner = bridge
        .registry()
        .user_by_remote_id(&TeamId::from("T1"), &RemoteUserId::from("U1"))
        .await
        .expect("lookup")
        .expect("owner");
    assert!(Arc::ptr_eq(&owner, &successor));
}

#[tokio::test]
async fn connect_with_no_accounts_reports_unconfigured() {
    let client = Arc::new(ScriptedClient::new());
    let (bridge, _storage) = build_bridge(
        client,
        Arc::new(RecordingTransport::default()),
        BridgeConfig::default(),
    )
    .await;

    let mut states = bridge.subscribe_states();
    let user = bridge.user(&alice()).await.expect("user");
    user.connect().await.expect("connect");

    let notification = states.recv().await.expect("state");
    assert_eq!(notification.state, BridgeState::Unconfigured);
    assert!(notification.account.is_none());
}

#[tokio::test]
async fn start_with_no_users_reports_unconfigured() {
    let client = Arc::new(ScriptedClient::new());
    let (bridge, _storage) = build_bridge(
        client,
        Arc::new(RecordingTransport::default()),
        BridgeConfig::default(),
    )
    .await;

    let mut states = bridge.subscribe_states();
    bridge.start().await.expect("start");

    let notification = states.recv().await.expect("state");
    assert_eq!(notification.state, BridgeState::Unconfigured);
}

#[tokio::test]
async fn invalid_auth_logs_out_and_reports_bad_credentials() {
    let client = Arc::new(ScriptedClient::new());
    let publisher = client.script_stream();
    let (bridge, storage) = build_bridge(
        client,
        Arc::new(RecordingTransport::default()),
        BridgeConfig::default(),
    )
    .await;

    let mut states = bridge.subscribe_states();
    let user = bridge.user(&alice()).await.expect("user");
    let account = user.login(auth_info()).await.expect("login");

    assert!(publisher.publish(RemoteEvent::InvalidAuth).await);
    expect_state(&mut states, BridgeState::BadCredentials).await;

    assert!(storage
        .get_account(&account.key)
        .await
        .expect("get")
        .is_none());
    assert!(!user.is_logged_in().await);
}

#[tokio::test]
async fn connected_event_syncs_team_and_enables_double_puppet() {
    let mut client = ScriptedClient::new();
    client.conversations.push(ConversationInfo {
        channel_id: ChannelId::from("C1"),
        name: "general".into(),
        topic: "company wide".into(),
        kind: ConversationKind::PublicChannel,
    });
    let client = Arc::new(client);
    let publisher = client.script_stream();

    let mut config = BridgeConfig::default();
    config
        .login_shared_secrets
        .insert("localhost".into(), "secret".into());
    let transport = Arc::new(RecordingTransport::default());
    let (bridge, storage) = build_bridge(client, transport.clone(), config).await;

    let mut states = bridge.subscribe_states();
    let user = bridge.user(&alice()).await.expect("user");
    user.login(auth_info()).await.expect("login");

    assert!(
        publisher
            .publish(RemoteEvent::Connected(ConnectInfo {
                remote_user_id: RemoteUserId::from("U1"),
                team_id: TeamId::from("T1"),
                team_name: "acme".into(),
            }))
            .await
    );
    expect_state(&mut states, BridgeState::Connected).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let team_synced = storage
            .get_team_info(&TeamId::from("T1"))
            .await
            .expect("team info")
            .map(|info| info.name == "Acme")
            .unwrap_or(false);
        let puppet_bound = bridge
            .registry()
            .ghost_by_custom_local_id(&alice())
            .await
            .expect("custom lookup")
            .is_some();
        if team_synced && puppet_bound && transport.count("create_room") == 1 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "post-connect sync never completed"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let ghost = bridge
        .registry()
        .ghost(&GhostKey::new(TeamId::from("T1"), RemoteUserId::from("U1")))
        .await
        .expect("ghost");
    let record = ghost.record().await;
    assert_eq!(record.custom_local_id, Some(alice()));
    assert_eq!(record.custom_access_token, "syt_custom_token");
}

#[tokio::test]
async fn concurrent_room_creation_yields_one_room() {
    let client = Arc::new(ScriptedClient::new());
    let transport = Arc::new(RecordingTransport::default());
    let (bridge, _storage) = build_bridge(client, transport.clone(), BridgeConfig::default()).await;

    let user = bridge.user(&alice()).await.expect("user");
    let account = user.login(auth_info()).await.expect("login");

    let key = PortalKey::new(
        TeamId::from("T1"),
        RemoteUserId::from("U1"),
        ChannelId::from("C1"),
    );
    let portal = bridge.registry().portal(&key).await.expect("portal");
    let info = ConversationInfo {
        channel_id: ChannelId::from("C1"),
        name: "general".into(),
        topic: String::new(),
        kind: ConversationKind::PublicChannel,
    };

    let (first, second) = tokio::join!(
        portal.create_room(&user, &account, Some(&info)),
        portal.create_room(&user, &account, Some(&info)),
    );
    assert_eq!(first.expect("room"), second.expect("room"));
    assert_eq!(transport.count("create_room"), 1);
}

#[tokio::test]
async fn ghost_profile_sync_is_idempotent() {
    let client = Arc::new(ScriptedClient::new());
    let transport = Arc::new(RecordingTransport::default());
    let (bridge, storage) = build_bridge(client, transport.clone(), BridgeConfig::default()).await;

    let user = bridge.user(&alice()).await.expect("user");
    let key = GhostKey::new(TeamId::from("T1"), RemoteUserId::from("U2"));
    let ghost = bridge.registry().ghost(&key).await.expect("ghost");

    let profile = UserProfile {
        remote_user_id: RemoteUserId::from("U2"),
        display_name: "Bob".into(),
        real_name: "Robert".into(),
        avatar_url: String::new(),
    };
    ghost
        .update_info(&user, Some(profile.clone()))
        .await
        .expect("first sync");
    ghost
        .update_info(&user, Some(profile))
        .await
        .expect("second sync");

    assert_eq!(transport.count("set_display_name"), 1);
    assert_eq!(transport.count("set_avatar"), 1);

    let stored = storage
        .get_ghost(&key)
        .await
        .expect("get")
        .expect("ghost row");
    assert_eq!(stored.display_name, "Bob (S)");
    assert!(stored.name_applied);
}

#[tokio::test]
async fn message_events_materialize_rooms_and_dedupe() {
    let mut client = ScriptedClient::new();
    client.profiles.insert(
        RemoteUserId::from("U2"),
        UserProfile {
            remote_user_id: RemoteUserId::from("U2"),
            display_name: "Bob".into(),
            real_name: "Robert".into(),
            avatar_url: String::new(),
        },
    );
    let client = Arc::new(client);
    let publisher = client.script_stream();
    let transport = Arc::new(RecordingTransport::default());
    let (bridge, storage) = build_bridge(client, transport.clone(), BridgeConfig::default()).await;

    let user = bridge.user(&alice()).await.expect("user");
    user.login(auth_info()).await.expect("login");

    let event = MessageEvent {
        channel_id: ChannelId::from("C9"),
        sender_id: RemoteUserId::from("U2"),
        event_id: "1700000000.000100".into(),
        sent_at: Utc::now(),
    };
    assert!(publisher.publish(RemoteEvent::Message(event.clone())).await);
    assert!(publisher.publish(RemoteEvent::Message(event)).await);

    let key = PortalKey::new(
        TeamId::from("T1"),
        RemoteUserId::from("U1"),
        ChannelId::from("C9"),
    );
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let recorded = storage
            .get_message_by_remote_id(&key, "1700000000.000100")
            .await
            .expect("lookup")
            .is_some();
        if recorded {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "message never recorded"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // drain the duplicate before asserting nothing else was created
    assert!(publisher.publish(RemoteEvent::Hello).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(transport.count("create_room"), 1);
    let portal = storage
        .get_portal(&key)
        .await
        .expect("get")
        .expect("portal row");
    assert!(portal.room_id.is_some());
}

#[tokio::test]
async fn sync_contact_refetches_profiles() {
    let mut client = ScriptedClient::new();
    client.profiles.insert(
        RemoteUserId::from("U2"),
        UserProfile {
            remote_user_id: RemoteUserId::from("U2"),
            display_name: "Bob".into(),
            real_name: "Robert".into(),
            avatar_url: String::new(),
        },
    );
    let client = Arc::new(client);
    let transport = Arc::new(RecordingTransport::default());
    let (bridge, storage) = build_bridge(client, transport.clone(), BridgeConfig::default()).await;

    let user = bridge.user(&alice()).await.expect("user");
    user.login(auth_info()).await.expect("login");

    let key = GhostKey::new(TeamId::from("T1"), RemoteUserId::from("U2"));
    let ghost = bridge.registry().ghost(&key).await.expect("ghost");

    ghost.update_info(&user, None).await.expect("first sync");
    // the cached name short-circuits lazy syncs, but not explicit ones
    ghost.update_info(&user, None).await.expect("lazy resync");
    ghost.sync_contact(&user).await.expect("explicit resync");

    assert_eq!(transport.count("set_display_name"), 1);
    let stored = storage
        .get_ghost(&key)
        .await
        .expect("get")
        .expect("ghost row");
    assert_eq!(stored.display_name, "Bob (S)");
}

#[tokio::test]
async fn session_phase_tracks_the_stream() {
    let client = Arc::new(ScriptedClient::new());
    let publisher = client.script_stream();
    let (bridge, _storage) = build_bridge(
        client,
        Arc::new(RecordingTransport::default()),
        BridgeConfig::default(),
    )
    .await;

    let user = bridge.user(&alice()).await.expect("user");
    let account = user.login(auth_info()).await.expect("login");
    assert_eq!(account.phase().await, SessionPhase::Connecting);

    assert!(
        publisher
            .publish(RemoteEvent::Connected(ConnectInfo {
                remote_user_id: RemoteUserId::from("U1"),
                team_id: TeamId::from("T1"),
                team_name: "acme".into(),
            }))
            .await
    );
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while account.phase().await != SessionPhase::Connected {
        assert!(tokio::time::Instant::now() < deadline, "never connected");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    drop(publisher);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while account.phase().await != SessionPhase::Disconnected {
        assert!(tokio::time::Instant::now() < deadline, "never disconnected");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn user_metadata_comes_from_config_and_persists() {
    let client = Arc::new(ScriptedClient::new());
    let mut config = BridgeConfig::default();
    config
        .permissions
        .insert("@alice:localhost".into(), shared::domain::PermissionLevel::Admin);
    let (bridge, storage) = build_bridge(
        client,
        Arc::new(RecordingTransport::default()),
        config,
    )
    .await;

    let user = bridge.user(&alice()).await.expect("user");
    assert_eq!(user.permission().await, shared::domain::PermissionLevel::Admin);

    user.set_management_room(RoomId::from("!mgmt:localhost"))
        .await
        .expect("set room");
    let stored = storage
        .get_user(&alice())
        .await
        .expect("get")
        .expect("user row");
    assert_eq!(
        stored.management_room.as_ref().map(|room| room.as_str()),
        Some("!mgmt:localhost")
    );
    assert_eq!(stored.permission, shared::domain::PermissionLevel::Admin);
}

#[tokio::test]
async fn sync_portals_survives_unsupported_listing() {
    let mut client = ScriptedClient::new();
    client.conversations_unsupported = true;
    let client = Arc::new(client);
    let transport = Arc::new(RecordingTransport::default());
    let (bridge, _storage) = build_bridge(client, transport.clone(), BridgeConfig::default()).await;

    let user = bridge.user(&alice()).await.expect("user");
    let account = user.login(auth_info()).await.expect("login");

    user.sync_portals(&account, false).await.expect("sync");
    assert_eq!(transport.count("create_room"), 0);
}

#[tokio::test]
async fn update_team_reuploads_the_avatar_only_on_change() {
    let mut client = ScriptedClient::new();
    client.team.avatar_url = "https://files.acme.example/team.png".into();
    let client = Arc::new(client);
    let transport = Arc::new(RecordingTransport::default());
    let (bridge, storage) = build_bridge(client, transport.clone(), BridgeConfig::default()).await;

    let user = bridge.user(&alice()).await.expect("user");
    let account = user.login(auth_info()).await.expect("login");

    user.update_team(&account, false).await.expect("first sync");
    let info = storage
        .get_team_info(&TeamId::from("T1"))
        .await
        .expect("get")
        .expect("team row");
    assert_eq!(info.name, "Acme");
    assert_eq!(info.avatar_source, "https://files.acme.example/team.png");
    assert!(info.avatar_ref.is_some());
    assert_eq!(transport.count("upload_media"), 1);

    user.update_team(&account, false).await.expect("second sync");
    assert_eq!(transport.count("upload_media"), 1);
}
