use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};

use bridge_core::{Bridge, MissingRoomTransport};
use remote_api::{auth, AuthClient, MissingRemoteConnector};
use shared::domain::{ChannelId, LocalUserId, PortalKey, RemoteUserId, TeamId};
use storage::Storage;

mod config;

use config::{bridge_config, load_settings, prepare_database_url};

#[derive(Parser, Debug)]
#[command(name = "bridged", about = "Identity bridge between a local chat network and remote Slack-style teams")]
struct Cli {
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge daemon.
    Run,
    /// Log a local user into a remote team with email and password.
    Login {
        local_id: String,
        email: String,
        team_domain: String,
        password: String,
    },
    /// Log a local user in with an existing token.
    LoginToken {
        local_id: String,
        token: String,
        #[arg(long)]
        cookie: Option<String>,
    },
    /// Log a local user out of one remote team.
    Logout {
        local_id: String,
        team_id: String,
        remote_user_id: String,
    },
    /// Resync team metadata and portals for every logged-in account.
    SyncTeams,
    /// Delete a portal and its message index. The room itself is kept.
    DeletePortal {
        team_id: String,
        receiver_id: String,
        channel_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cli = Cli::parse();
    let settings = load_settings();

    let database_url =
        prepare_database_url(cli.database_url.as_deref().unwrap_or(&settings.database_url));
    let storage = Storage::new(&database_url).await?;
    storage.health_check().await?;

    let config = bridge_config(&settings);
    config.validate()?;

    let connector = Arc::new(MissingRemoteConnector);
    let bridge = Bridge::new(
        config,
        storage,
        connector.clone(),
        Arc::new(MissingRoomTransport),
    );

    match cli.command {
        Command::Run => run(bridge).await?,
        Command::Login {
            local_id,
            email,
            team_domain,
            password,
        } => {
            let auth = AuthClient::new(settings.auth_base_url.clone());
            let info = auth.login_password(&email, &team_domain, &password).await?;
            let user = bridge.user(&LocalUserId::new(local_id)).await?;
            let account = user.login(info).await?;
            println!(
                "logged in as {} on team {}",
                account.key.remote_user_id, account.key.team_id
            );
        }
        Command::LoginToken {
            local_id,
            token,
            cookie,
        } => {
            let info = auth::login_token(connector.as_ref(), &token, cookie.as_deref()).await?;
            let user = bridge.user(&LocalUserId::new(local_id)).await?;
            let account = user.login(info).await?;
            println!(
                "logged in as {} on team {}",
                account.key.remote_user_id, account.key.team_id
            );
        }
        Command::Logout {
            local_id,
            team_id,
            remote_user_id,
        } => {
            let user = bridge.user(&LocalUserId::new(local_id)).await?;
            let account = user
                .account(&TeamId::new(team_id), &RemoteUserId::new(remote_user_id))
                .await
                .ok_or_else(|| anyhow!("no account stored for that team"))?;
            user.logout(&account).await?;
            println!("logged out of team {}", account.key.team_id);
        }
        Command::SyncTeams => {
            for user in bridge.registry().all_users().await? {
                user.connect().await?;
            }
            bridge.sync_all_teams().await?;
            println!("team sync finished");
        }
        Command::DeletePortal {
            team_id,
            receiver_id,
            channel_id,
        } => {
            let key = PortalKey::new(
                TeamId::new(team_id),
                RemoteUserId::new(receiver_id),
                ChannelId::new(channel_id),
            );
            match bridge.registry().portal_if_exists(&key).await? {
                Some(portal) => {
                    portal.delete().await?;
                    println!("deleted portal {key}");
                }
                None => println!("no portal found for {key}"),
            }
        }
    }

    Ok(())
}

async fn run(bridge: Bridge) -> Result<()> {
    let mut states = bridge.subscribe_states();
    tokio::spawn(async move {
        loop {
            match states.recv().await {
                Ok(notification) => match notification.account {
                    Some(account) => info!(%account, state = ?notification.state, "bridge state"),
                    None => info!(state = ?notification.state, "bridge state"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "state notifications lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    bridge.start().await?;
    info!("bridge running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    for user in bridge.registry().all_users().await? {
        user.disconnect().await;
    }
    Ok(())
}
