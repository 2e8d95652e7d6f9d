use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    AccountKey, ChannelId, GhostKey, LocalUserId, MediaRef, PermissionLevel, PortalKey,
    RemoteUserId, RoomId, TeamId,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub local_id: LocalUserId,
    pub management_room: Option<RoomId>,
    pub permission: PermissionLevel,
}

impl UserRecord {
    pub fn new(local_id: LocalUserId) -> Self {
        Self {
            local_id,
            management_room: None,
            permission: PermissionLevel::User,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub key: AccountKey,
    pub email: String,
    pub team_name: String,
    pub token: String,
    pub cookie: Option<String>,
}

impl AccountRecord {
    pub fn is_logged_in(&self) -> bool {
        !self.token.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct GhostRecord {
    pub key: GhostKey,
    pub display_name: String,
    pub name_applied: bool,
    pub avatar_source: String,
    pub avatar_ref: Option<MediaRef>,
    pub avatar_applied: bool,
    pub custom_local_id: Option<LocalUserId>,
    pub custom_access_token: String,
}

impl GhostRecord {
    pub fn new(key: GhostKey) -> Self {
        Self {
            key,
            display_name: String::new(),
            name_applied: false,
            avatar_source: String::new(),
            avatar_ref: None,
            avatar_applied: false,
            custom_local_id: None,
            custom_access_token: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortalRecord {
    pub key: PortalKey,
    pub room_id: Option<RoomId>,
    pub name: String,
    pub name_applied: bool,
    pub topic: String,
    pub avatar_source: String,
    pub avatar_ref: Option<MediaRef>,
}

impl PortalRecord {
    pub fn new(key: PortalKey) -> Self {
        Self {
            key,
            room_id: None,
            name: String::new(),
            name_applied: false,
            topic: String::new(),
            avatar_source: String::new(),
            avatar_ref: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TeamInfoRecord {
    pub team_id: TeamId,
    pub name: String,
    pub domain: String,
    pub url: String,
    pub avatar_source: String,
    pub avatar_ref: Option<MediaRef>,
}

impl TeamInfoRecord {
    pub fn new(team_id: TeamId) -> Self {
        Self {
            team_id,
            name: String::new(),
            domain: String::new(),
            url: String::new(),
            avatar_source: String::new(),
            avatar_ref: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub portal: PortalKey,
    pub remote_event_id: String,
    pub local_event_id: String,
    pub author_id: RemoteUserId,
    pub sent_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn get_user(&self, local_id: &LocalUserId) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT local_id, management_room, permission FROM users WHERE local_id = ?",
        )
        .bind(local_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(map_user_row))
    }

    pub async fn get_user_by_remote_id(
        &self,
        team_id: &TeamId,
        remote_user_id: &RemoteUserId,
    ) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT u.local_id, u.management_room, u.permission
             FROM users u
             INNER JOIN accounts a ON a.local_id = u.local_id
             WHERE a.team_id = ? AND a.remote_user_id = ?",
        )
        .bind(team_id.as_str())
        .bind(remote_user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(map_user_row))
    }

    pub async fn get_all_users(&self) -> Result<Vec<UserRecord>> {
        let rows = sqlx::query("SELECT local_id, management_room, permission FROM users")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(map_user_row).collect())
    }

    pub async fn upsert_user(&self, user: &UserRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (local_id, management_room, permission) VALUES (?, ?, ?)
             ON CONFLICT(local_id) DO UPDATE SET
                management_room = excluded.management_room,
                permission = excluded.permission",
        )
        .bind(user.local_id.as_str())
        .bind(user.management_room.as_ref().map(|r| r.as_str()))
        .bind(user.permission.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert user {}", user.local_id))?;
        Ok(())
    }

    pub async fn get_account(&self, key: &AccountKey) -> Result<Option<AccountRecord>> {
        let row = sqlx::query(
            "SELECT local_id, team_id, remote_user_id, email, team_name, token, cookie
             FROM accounts
             WHERE local_id = ? AND team_id = ? AND remote_user_id = ?",
        )
        .bind(key.local_id.as_str())
        .bind(key.team_id.as_str())
        .bind(key.remote_user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(map_account_row))
    }

    pub async fn accounts_for_user(&self, local_id: &LocalUserId) -> Result<Vec<AccountRecord>> {
        let rows = sqlx::query(
            "SELECT local_id, team_id, remote_user_id, email, team_name, token, cookie
             FROM accounts
             WHERE local_id = ?",
        )
        .bind(local_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(map_account_row).collect())
    }

    pub async fn upsert_account(&self, account: &AccountRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO accounts (local_id, team_id, remote_user_id, email, team_name, token, cookie)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(local_id, team_id, remote_user_id) DO UPDATE SET
                email = excluded.email,
                team_name = excluded.team_name,
                token = excluded.token,
                cookie = excluded.cookie",
        )
        .bind(account.key.local_id.as_str())
        .bind(account.key.team_id.as_str())
        .bind(account.key.remote_user_id.as_str())
        .bind(account.email.as_str())
        .bind(account.team_name.as_str())
        .bind(account.token.as_str())
        .bind(account.cookie.as_deref())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert account {}", account.key))?;
        Ok(())
    }

    pub async fn delete_account(&self, key: &AccountKey) -> Result<()> {
        sqlx::query(
            "DELETE FROM accounts WHERE local_id = ? AND team_id = ? AND remote_user_id = ?",
        )
        .bind(key.local_id.as_str())
        .bind(key.team_id.as_str())
        .bind(key.remote_user_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_ghost(&self, key: &GhostKey) -> Result<Option<GhostRecord>> {
        let row = sqlx::query(
            "SELECT team_id, remote_user_id, display_name, name_applied, avatar_source,
                    avatar_ref, avatar_applied, custom_local_id, custom_access_token
             FROM ghosts
             WHERE team_id = ? AND remote_user_id = ?",
        )
        .bind(key.team_id.as_str())
        .bind(key.remote_user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(map_ghost_row))
    }

    pub async fn get_ghost_by_custom_local_id(
        &self,
        local_id: &LocalUserId,
    ) -> Result<Option<GhostRecord>> {
        let row = sqlx::query(
            "SELECT team_id, remote_user_id, display_name, name_applied, avatar_source,
                    avatar_ref, avatar_applied, custom_local_id, custom_access_token
             FROM ghosts
             WHERE custom_local_id = ?",
        )
        .bind(local_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(map_ghost_row))
    }

    pub async fn ghosts_with_custom_local_id(&self) -> Result<Vec<GhostRecord>> {
        let rows = sqlx::query(
            "SELECT team_id, remote_user_id, display_name, name_applied, avatar_source,
                    avatar_ref, avatar_applied, custom_local_id, custom_access_token
             FROM ghosts
             WHERE custom_local_id IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(map_ghost_row).collect())
    }

    pub async fn upsert_ghost(&self, ghost: &GhostRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO ghosts (team_id, remote_user_id, display_name, name_applied,
                                 avatar_source, avatar_ref, avatar_applied,
                                 custom_local_id, custom_access_token)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(team_id, remote_user_id) DO UPDATE SET
                display_name = excluded.display_name,
                name_applied = excluded.name_applied,
                avatar_source = excluded.avatar_source,
                avatar_ref = excluded.avatar_ref,
                avatar_applied = excluded.avatar_applied,
                custom_local_id = excluded.custom_local_id,
                custom_access_token = excluded.custom_access_token",
        )
        .bind(ghost.key.team_id.as_str())
        .bind(ghost.key.remote_user_id.as_str())
        .bind(ghost.display_name.as_str())
        .bind(ghost.name_applied)
        .bind(ghost.avatar_source.as_str())
        .bind(ghost.avatar_ref.as_ref().map(|r| r.0.as_str()))
        .bind(ghost.avatar_applied)
        .bind(ghost.custom_local_id.as_ref().map(|id| id.as_str()))
        .bind(ghost.custom_access_token.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert ghost {}", ghost.key))?;
        Ok(())
    }

    pub async fn get_portal(&self, key: &PortalKey) -> Result<Option<PortalRecord>> {
        let row = sqlx::query(
            "SELECT team_id, receiver_id, channel_id, room_id, name, name_applied,
                    topic, avatar_source, avatar_ref
             FROM portals
             WHERE team_id = ? AND receiver_id = ? AND channel_id = ?",
        )
        .bind(key.team_id.as_str())
        .bind(key.receiver_id.as_str())
        .bind(key.channel_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(map_portal_row))
    }

    pub async fn portals_for_account(
        &self,
        team_id: &TeamId,
        receiver_id: &RemoteUserId,
    ) -> Result<Vec<PortalRecord>> {
        let rows = sqlx::query(
            "SELECT team_id, receiver_id, channel_id, room_id, name, name_applied,
                    topic, avatar_source, avatar_ref
             FROM portals
             WHERE team_id = ? AND receiver_id = ?",
        )
        .bind(team_id.as_str())
        .bind(receiver_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(map_portal_row).collect())
    }

    pub async fn upsert_portal(&self, portal: &PortalRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO portals (team_id, receiver_id, channel_id, room_id, name,
                                  name_applied, topic, avatar_source, avatar_ref)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(team_id, receiver_id, channel_id) DO UPDATE SET
                room_id = excluded.room_id,
                name = excluded.name,
                name_applied = excluded.name_applied,
                topic = excluded.topic,
                avatar_source = excluded.avatar_source,
                avatar_ref = excluded.avatar_ref",
        )
        .bind(portal.key.team_id.as_str())
        .bind(portal.key.receiver_id.as_str())
        .bind(portal.key.channel_id.as_str())
        .bind(portal.room_id.as_ref().map(|r| r.as_str()))
        .bind(portal.name.as_str())
        .bind(portal.name_applied)
        .bind(portal.topic.as_str())
        .bind(portal.avatar_source.as_str())
        .bind(portal.avatar_ref.as_ref().map(|r| r.0.as_str()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert portal {}", portal.key))?;
        Ok(())
    }

    pub async fn delete_portal(&self, key: &PortalKey) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM messages WHERE team_id = ? AND receiver_id = ? AND channel_id = ?",
        )
        .bind(key.team_id.as_str())
        .bind(key.receiver_id.as_str())
        .bind(key.channel_id.as_str())
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM portals WHERE team_id = ? AND receiver_id = ? AND channel_id = ?")
            .bind(key.team_id.as_str())
            .bind(key.receiver_id.as_str())
            .bind(key.channel_id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_team_info(&self, team_id: &TeamId) -> Result<Option<TeamInfoRecord>> {
        let row = sqlx::query(
            "SELECT team_id, name, domain, url, avatar_source, avatar_ref
             FROM team_info
             WHERE team_id = ?",
        )
        .bind(team_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| TeamInfoRecord {
            team_id: TeamId(r.get::<String, _>(0)),
            name: r.get::<String, _>(1),
            domain: r.get::<String, _>(2),
            url: r.get::<String, _>(3),
            avatar_source: r.get::<String, _>(4),
            avatar_ref: r.get::<Option<String>, _>(5).map(MediaRef),
        }))
    }

    pub async fn upsert_team_info(&self, info: &TeamInfoRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO team_info (team_id, name, domain, url, avatar_source, avatar_ref)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(team_id) DO UPDATE SET
                name = excluded.name,
                domain = excluded.domain,
                url = excluded.url,
                avatar_source = excluded.avatar_source,
                avatar_ref = excluded.avatar_ref",
        )
        .bind(info.team_id.as_str())
        .bind(info.name.as_str())
        .bind(info.domain.as_str())
        .bind(info.url.as_str())
        .bind(info.avatar_source.as_str())
        .bind(info.avatar_ref.as_ref().map(|r| r.0.as_str()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert team info for {}", info.team_id))?;
        Ok(())
    }

    pub async fn insert_message(&self, message: &MessageRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (team_id, receiver_id, channel_id, remote_event_id,
                                   local_event_id, author_id, sent_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.portal.team_id.as_str())
        .bind(message.portal.receiver_id.as_str())
        .bind(message.portal.channel_id.as_str())
        .bind(message.remote_event_id.as_str())
        .bind(message.local_event_id.as_str())
        .bind(message.author_id.as_str())
        .bind(message.sent_at)
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "failed to insert message {}@{}",
                message.remote_event_id, message.portal
            )
        })?;
        Ok(())
    }

    pub async fn get_message_by_remote_id(
        &self,
        portal: &PortalKey,
        remote_event_id: &str,
    ) -> Result<Option<MessageRecord>> {
        let row = sqlx::query(
            "SELECT team_id, receiver_id, channel_id, remote_event_id, local_event_id,
                    author_id, sent_at
             FROM messages
             WHERE team_id = ? AND receiver_id = ? AND channel_id = ? AND remote_event_id = ?",
        )
        .bind(portal.team_id.as_str())
        .bind(portal.receiver_id.as_str())
        .bind(portal.channel_id.as_str())
        .bind(remote_event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| MessageRecord {
            portal: PortalKey::new(
                TeamId(r.get::<String, _>(0)),
                RemoteUserId(r.get::<String, _>(1)),
                ChannelId(r.get::<String, _>(2)),
            ),
            remote_event_id: r.get::<String, _>(3),
            local_event_id: r.get::<String, _>(4),
            author_id: RemoteUserId(r.get::<String, _>(5)),
            sent_at: r.get::<DateTime<Utc>, _>(6),
        }))
    }
}

fn map_user_row(r: sqlx::sqlite::SqliteRow) -> UserRecord {
    UserRecord {
        local_id: LocalUserId(r.get::<String, _>(0)),
        management_room: r.get::<Option<String>, _>(1).map(RoomId),
        permission: PermissionLevel::parse(&r.get::<String, _>(2)),
    }
}

fn map_account_row(r: sqlx::sqlite::SqliteRow) -> AccountRecord {
    AccountRecord {
        key: AccountKey {
            local_id: LocalUserId(r.get::<String, _>(0)),
            team_id: TeamId(r.get::<String, _>(1)),
            remote_user_id: RemoteUserId(r.get::<String, _>(2)),
        },
        email: r.get::<String, _>(3),
        team_name: r.get::<String, _>(4),
        token: r.get::<String, _>(5),
        cookie: r.get::<Option<String>, _>(6),
    }
}

fn map_ghost_row(r: sqlx::sqlite::SqliteRow) -> GhostRecord {
    GhostRecord {
        key: GhostKey::new(
            TeamId(r.get::<String, _>(0)),
            RemoteUserId(r.get::<String, _>(1)),
        ),
        display_name: r.get::<String, _>(2),
        name_applied: r.get::<bool, _>(3),
        avatar_source: r.get::<String, _>(4),
        avatar_ref: r.get::<Option<String>, _>(5).map(MediaRef),
        avatar_applied: r.get::<bool, _>(6),
        custom_local_id: r.get::<Option<String>, _>(7).map(LocalUserId),
        custom_access_token: r.get::<String, _>(8),
    }
}

fn map_portal_row(r: sqlx::sqlite::SqliteRow) -> PortalRecord {
    PortalRecord {
        key: PortalKey::new(
            TeamId(r.get::<String, _>(0)),
            RemoteUserId(r.get::<String, _>(1)),
            ChannelId(r.get::<String, _>(2)),
        ),
        room_id: r.get::<Option<String>, _>(3).map(RoomId),
        name: r.get::<String, _>(4),
        name_applied: r.get::<bool, _>(5),
        topic: r.get::<String, _>(6),
        avatar_source: r.get::<String, _>(7),
        avatar_ref: r.get::<Option<String>, _>(8).map(MediaRef),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
