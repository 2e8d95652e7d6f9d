use std::{collections::HashMap, fs};

use bridge_core::BridgeConfig;
use shared::domain::PermissionLevel;

#[derive(Debug)]
pub struct Settings {
    pub database_url: String,
    pub auth_base_url: String,
    pub homeserver_domain: String,
    pub username_template: String,
    pub displayname_template: String,
    pub channelname_template: String,
    pub permissions: HashMap<String, String>,
    pub login_shared_secrets: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/bridge.db".into(),
            auth_base_url: "https://slack.com/api/auth.".into(),
            homeserver_domain: "localhost".into(),
            username_template: "slack_{id}".into(),
            displayname_template: "{name} (S)".into(),
            channelname_template: "#{name}".into(),
            permissions: HashMap::new(),
            login_shared_secrets: HashMap::new(),
        }
    }
}

/// Defaults, then `bridge.toml`, then environment variables. Later layers win.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("bridge.toml") {
        if let Ok(file_cfg) = toml::from_str::<toml::Value>(&raw) {
            if let Some(v) = file_cfg.get("database_url").and_then(toml::Value::as_str) {
                settings.database_url = v.to_string();
            }
            if let Some(v) = file_cfg.get("auth_base_url").and_then(toml::Value::as_str) {
                settings.auth_base_url = v.to_string();
            }
            if let Some(v) = file_cfg
                .get("homeserver_domain")
                .and_then(toml::Value::as_str)
            {
                settings.homeserver_domain = v.to_string();
            }
            if let Some(v) = file_cfg
                .get("username_template")
                .and_then(toml::Value::as_str)
            {
                settings.username_template = v.to_string();
            }
            if let Some(v) = file_cfg
                .get("displayname_template")
                .and_then(toml::Value::as_str)
            {
                settings.displayname_template = v.to_string();
            }
            if let Some(v) = file_cfg
                .get("channelname_template")
                .and_then(toml::Value::as_str)
            {
                settings.channelname_template = v.to_string();
            }
            if let Some(table) = file_cfg.get("permissions").and_then(toml::Value::as_table) {
                for (key, value) in table {
                    if let Some(value) = value.as_str() {
                        settings.permissions.insert(key.clone(), value.to_string());
                    }
                }
            }
            if let Some(table) = file_cfg
                .get("login_shared_secrets")
                .and_then(toml::Value::as_table)
            {
                for (key, value) in table {
                    if let Some(value) = value.as_str() {
                        settings
                            .login_shared_secrets
                            .insert(key.clone(), value.to_string());
                    }
                }
            }
        }
    }

    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("BRIDGE__DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("BRIDGE__AUTH_BASE_URL") {
        settings.auth_base_url = v;
    }
    if let Ok(v) = std::env::var("BRIDGE__HOMESERVER_DOMAIN") {
        settings.homeserver_domain = v;
    }
    if let Ok(v) = std::env::var("BRIDGE__USERNAME_TEMPLATE") {
        settings.username_template = v;
    }
    if let Ok(v) = std::env::var("BRIDGE__DISPLAYNAME_TEMPLATE") {
        settings.displayname_template = v;
    }
    if let Ok(v) = std::env::var("BRIDGE__CHANNELNAME_TEMPLATE") {
        settings.channelname_template = v;
    }

    settings
}

pub fn bridge_config(settings: &Settings) -> BridgeConfig {
    BridgeConfig {
        homeserver_domain: settings.homeserver_domain.clone(),
        username_template: settings.username_template.clone(),
        displayname_template: settings.displayname_template.clone(),
        channelname_template: settings.channelname_template.clone(),
        permissions: settings
            .permissions
            .iter()
            .map(|(key, value)| (key.clone(), PermissionLevel::parse(value)))
            .collect(),
        login_shared_secrets: settings.login_shared_secrets.clone(),
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}
