use std::io;

use crate::net::{ErrorCode, PacketError, PacketType};

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("connection lost")]
    ConnectionLost,
    #[error("malformed packet: {0}")]
    MalformedPacket(PacketError),
    #[error("packet buffer overflow: {0}")]
    BufferOverflow(PacketError),
    #[error("unexpected {0:?} packet")]
    UnexpectedPacket(PacketType),
    #[error("not authorized to send {0:?}")]
    NotAuthorized(PacketType),
    #[error("desync detected at frame {frame}")]
    Desync { frame: u32 },
    #[error("command for company {got} from a client playing as {expected}")]
    PlayerMismatch { expected: u8, got: u8 },
    #[error("rejected: {0}")]
    Rejected(ErrorCode),
    #[error("server full")]
    ServerFull,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("map load failed: {0}")]
    MapLoad(#[from] SimError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<PacketError> for NetworkError {
    fn from(err: PacketError) -> Self {
        if err.is_overflow() {
            NetworkError::BufferOverflow(err)
        } else {
            NetworkError::MalformedPacket(err)
        }
    }
}

impl NetworkError {
    /// Code reported to the peer when this error ends a connection.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            NetworkError::ConnectionLost | NetworkError::Io(_) => ErrorCode::ConnectionLost,
            NetworkError::MalformedPacket(_) => ErrorCode::IllegalPacket,
            NetworkError::UnexpectedPacket(_) => ErrorCode::NotExpected,
            NetworkError::NotAuthorized(_) => ErrorCode::NotAuthorized,
            NetworkError::Desync { .. } => ErrorCode::Desync,
            NetworkError::PlayerMismatch { .. } => ErrorCode::PlayerMismatch,
            NetworkError::Rejected(code) => *code,
            NetworkError::MapLoad(_) => ErrorCode::SavegameFailed,
            NetworkError::ServerFull
            | NetworkError::BufferOverflow(_)
            | NetworkError::Config(_) => ErrorCode::General,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("invalid world data: {0}")]
    InvalidData(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} cannot change while clients are active")]
    Locked(&'static str),
    #[error("{name} must be at least {min}")]
    OutOfRange { name: &'static str, min: u32 },
}
