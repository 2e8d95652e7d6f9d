use std::collections::HashMap;

use anyhow::{bail, Result};

use shared::{
    domain::{GhostKey, LocalUserId, PermissionLevel},
    protocol::{ConversationInfo, UserProfile},
};

/// Naming, permission, and double-puppeting policy for one bridge instance.
///
/// Templates use `{placeholder}` substitution. `username_template` must
/// contain `{id}` so every ghost gets a distinct local identity.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub homeserver_domain: String,
    pub username_template: String,
    pub displayname_template: String,
    pub channelname_template: String,
    /// Keyed by exact local user id, by homeserver domain, or `*`.
    pub permissions: HashMap<String, PermissionLevel>,
    /// Shared secrets for automatic double puppeting, keyed by homeserver
    /// domain.
    pub login_shared_secrets: HashMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            homeserver_domain: "localhost".into(),
            username_template: "slack_{id}".into(),
            displayname_template: "{name} (S)".into(),
            channelname_template: "#{name}".into(),
            permissions: HashMap::new(),
            login_shared_secrets: HashMap::new(),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.username_template.contains("{id}") {
            bail!("username_template is missing the {{id}} placeholder");
        }
        if self.homeserver_domain.is_empty() {
            bail!("homeserver_domain must not be empty");
        }
        Ok(())
    }

    /// Local identity of the ghost for one remote user, e.g.
    /// `@slack_t123-u456:example.com`.
    pub fn format_ghost_id(&self, key: &GhostKey) -> LocalUserId {
        let id = format!(
            "{}-{}",
            key.team_id.as_str().to_lowercase(),
            key.remote_user_id.as_str().to_lowercase()
        );
        let localpart = self.username_template.replace("{id}", &id);
        LocalUserId::new(format!("@{localpart}:{}", self.homeserver_domain))
    }

    pub fn format_display_name(&self, profile: &UserProfile) -> String {
        let name = if profile.display_name.is_empty() {
            &profile.real_name
        } else {
            &profile.display_name
        };
        self.displayname_template
            .replace("{name}", name)
            .replace("{real_name}", &profile.real_name)
            .replace("{id}", profile.remote_user_id.as_str())
    }

    pub fn format_channel_name(&self, info: &ConversationInfo, team_name: &str) -> String {
        self.channelname_template
            .replace("{name}", &info.name)
            .replace("{team}", team_name)
    }

    /// Most specific match wins: exact id, then homeserver domain, then `*`.
    pub fn permission_for(&self, local_id: &LocalUserId) -> PermissionLevel {
        if let Some(level) = self.permissions.get(local_id.as_str()) {
            return *level;
        }
        if let Some(domain) = homeserver_of(local_id) {
            if let Some(level) = self.permissions.get(domain) {
                return *level;
            }
        }
        self.permissions
            .get("*")
            .copied()
            .unwrap_or(PermissionLevel::User)
    }

    pub fn shared_secret_for(&self, local_id: &LocalUserId) -> Option<&str> {
        let domain = homeserver_of(local_id)?;
        self.login_shared_secrets.get(domain).map(String::as_str)
    }
}

fn homeserver_of(local_id: &LocalUserId) -> Option<&str> {
    local_id.as_str().split_once(':').map(|(_, domain)| domain)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
