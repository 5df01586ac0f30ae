//! Ошибки ядра сигнализации

use crate::peer::types::{Phase, Role};
use serde::Serialize;
use thiserror::Error;

/// Ошибка разбора кода подключения
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DecodeError {
    #[error("code is not valid base64: {0}")]
    Base64(String),

    #[error("code payload could not be decompressed: {0}")]
    Decompress(String),

    #[error("code payload is not a session bundle: {0}")]
    Malformed(String),

    #[error("code payload exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

/// Код, который нельзя применить на этой стороне звонка
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum InvalidCodeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("expected an {expected} code, got an {actual} code")]
    RoleMismatch { expected: Role, actual: Role },
}

/// Ошибка источника медиа
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MediaAccessError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("local media has not been started")]
    NotStarted,
}

/// Ошибка примитива транспортного движка
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("webrtc: {0}")]
    Rtc(#[from] webrtc::Error),

    #[error("description could not be converted: {0}")]
    Description(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Ошибки, которые контроллер отдаёт наружу
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CallError {
    #[error("media access error: {0}")]
    MediaAccess(#[from] MediaAccessError),

    #[error("invalid connection code: {0}")]
    InvalidCode(#[from] InvalidCodeError),

    #[error("remote candidate rejected: {0}")]
    InvalidCandidate(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("another command is still in progress")]
    Busy,

    #[error("operation requires phase {expected}, session is {actual}")]
    WrongPhase { expected: Phase, actual: Phase },

    #[error("answer code was already applied")]
    AlreadyCompleted,

    #[error("session was terminated while the command was in flight")]
    Terminated,
}

impl From<DecodeError> for CallError {
    fn from(err: DecodeError) -> Self {
        CallError::InvalidCode(err.into())
    }
}

impl CallError {
    pub fn negotiation(msg: impl Into<String>) -> Self {
        Self::Negotiation(msg.into())
    }

    /// Сообщение для пользователя
    pub fn user_message(&self) -> &'static str {
        match self {
            CallError::MediaAccess(MediaAccessError::NotStarted) => {
                "Start your camera and microphone first."
            }
            CallError::MediaAccess(_) => {
                "Could not access camera or microphone. Please check permissions."
            }
            CallError::InvalidCode(InvalidCodeError::RoleMismatch { .. }) => {
                "This code belongs to the other side of the call."
            }
            CallError::InvalidCode(_) => "Invalid connection code.",
            CallError::InvalidCandidate(_) => {
                "Some network candidates from the code could not be used."
            }
            CallError::Negotiation(_) => "Failed to set up the call. Please try again.",
            CallError::Connection(_) => "Connection failed.",
            CallError::Busy => "Please wait for the current operation to finish.",
            CallError::WrongPhase { .. } => "This action is not available right now.",
            CallError::AlreadyCompleted => "The answer code has already been applied.",
            CallError::Terminated => "The call was ended.",
        }
    }
}
