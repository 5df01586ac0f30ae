use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Роль стороны в сессии: инициатор (offer) или присоединившийся (answer)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Offer,
    Answer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Offer => f.write_str("offer"),
            Role::Answer => f.write_str("answer"),
        }
    }
}

/// Непрозрачное описание сессии от транспортного движка.
/// Ядро его не разбирает, только хранит и пересылает.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct Description(serde_json::Value);

impl Description {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_json(self) -> serde_json::Value {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

/// ICE кандидат в том виде, в каком его отдал движок
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NetworkCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

impl NetworkCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Полный пакет соединения: роль, описание и кандидаты
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionBundle {
    pub role: Role,
    pub description: Description,
    pub candidates: Vec<NetworkCandidate>,
}

/// Фаза сигнального автомата
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    RoleAssigned,
    Negotiating,
    AwaitingRemoteCompletion,
    Connected,
    Closed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Closed | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::RoleAssigned => "role assigned",
            Phase::Negotiating => "negotiating",
            Phase::AwaitingRemoteCompletion => "awaiting remote completion",
            Phase::Connected => "connected",
            Phase::Closed => "closed",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Последнее известное состояние связности транспорта
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    #[default]
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Описание удалённого трека, пришедшего от движка
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub id: String,
    pub kind: MediaKind,
}

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Результат применения удалённых кандидатов
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub applied: usize,
    pub rejected: Vec<crate::error::CallError>,
}

/// Хэндл созданной сессии
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub role: Role,
    pub generation: u64,
    pub drain: DrainReport,
}

/// Снимок состояния для UI. Только чтение.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub role: Option<Role>,
    pub published_code: Option<String>,
    pub code_fingerprint: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub connectivity_status: ConnectivityState,
    pub remote_track_available: bool,
    pub local_media_ready: bool,
    pub is_muted: bool,
    pub is_camera_off: bool,
    pub busy: bool,
    pub error: Option<String>,
}
