// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use crate::peer::types::{MediaKind, ServerConfig};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено

/// Публичные STUN серверы, которые используются по умолчанию
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    [
        "stun:stun.l.google.com:19302",
        "stun:stun1.l.google.com:19302",
        "stun:stun2.l.google.com:19302",
    ]
    .iter()
    .enumerate()
    .map(|(i, url)| ServerConfig {
        id: format!("default-stun-{i}"),
        r#type: "stun".into(),
        url: (*url).into(),
        username: None,
        credential: None,
    })
    .collect()
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("server {0}: URL cannot be empty")]
    EmptyUrl(String),

    #[error("server {0}: TURN servers require username and credential")]
    MissingTurnCredentials(String),

    #[error("config is not valid JSON: {0}")]
    Parse(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// Уровень по умолчанию, если не задан RUST_LOG
    pub level: String,
    pub file_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".into(),
            file_info: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub ice_servers: Vec<ServerConfig>,
    pub media_kinds: Vec<MediaKind>,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            media_kinds: vec![MediaKind::Audio, MediaKind::Video],
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_servers(&self.ice_servers)
    }

    /// Устанавливает пользовательские ICE серверы; пустой список возвращает дефолтные
    pub fn set_ice_servers(&mut self, servers: Vec<ServerConfig>) -> Result<(), ConfigError> {
        validate_servers(&servers)?;
        self.ice_servers = if servers.is_empty() {
            DEFAULT_ICE_SERVERS.clone()
        } else {
            servers
        };
        Ok(())
    }

    pub fn ice_servers(&self) -> &[ServerConfig] {
        &self.ice_servers
    }
}

fn validate_servers(servers: &[ServerConfig]) -> Result<(), ConfigError> {
    for server in servers {
        if server.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl(server.id.clone()));
        }

        if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
            return Err(ConfigError::MissingTurnCredentials(server.id.clone()));
        }
    }
    Ok(())
}
