use std::sync::Arc;

use crate::net::{ErrorCode, PasswordKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
    ConnectionLost,
    Shutdown,
    Error(ErrorCode),
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::ConnectionLost => "connection lost",
            DisconnectReason::Shutdown => "server shutting down",
            DisconnectReason::Error(code) => code.as_str(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            DisconnectReason::Graceful | DisconnectReason::Shutdown => ErrorCode::General,
            DisconnectReason::Timeout | DisconnectReason::ConnectionLost => {
                ErrorCode::ConnectionLost
            }
            DisconnectReason::Kicked => ErrorCode::Kicked,
            DisconnectReason::Error(code) => *code,
        }
    }
}

/// Progress of one map download. Only one session holds a cursor at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapCursor {
    data: Arc<[u8]>,
    sent: usize,
    frame: u32,
}

impl MapCursor {
    pub fn new(data: impl Into<Arc<[u8]>>, frame: u32) -> Self {
        Self {
            data: data.into(),
            sent: 0,
            frame,
        }
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn total(&self) -> usize {
        self.data.len()
    }

    pub fn is_done(&self) -> bool {
        self.sent >= self.data.len()
    }

    pub fn next_chunk(&mut self, max: usize) -> Option<&[u8]> {
        if self.is_done() {
            return None;
        }
        let start = self.sent;
        self.sent = (start + max).min(self.data.len());
        Some(&self.data[start..self.sent])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    NeedPassword(PasswordKind),
    Authorized,
}

impl AuthStage {
    fn after(password: Option<PasswordKind>) -> Self {
        match password {
            Some(kind) => AuthStage::NeedPassword(kind),
            None => AuthStage::Authorized,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Inactive,
    Authorizing(AuthStage),
    MapWait,
    MapTransfer(MapCursor),
    MapDone,
    PreActive,
    Active,
    Closed(DisconnectReason),
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Join { password: Option<PasswordKind> },
    PasswordAccepted { next: Option<PasswordKind> },
    MapRequested { transfer: Option<MapCursor> },
    TransferStarted(MapCursor),
    MapSent,
    MapAcknowledged,
    CaughtUp,
    Close(DisconnectReason),
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Join { .. } => "join",
            SessionEvent::PasswordAccepted { .. } => "password accepted",
            SessionEvent::MapRequested { .. } => "map requested",
            SessionEvent::TransferStarted(_) => "transfer started",
            SessionEvent::MapSent => "map sent",
            SessionEvent::MapAcknowledged => "map acknowledged",
            SessionEvent::CaughtUp => "caught up",
            SessionEvent::Close(_) => "close",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid session transition: {event} while {from}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub event: &'static str,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Inactive => "inactive",
            SessionState::Authorizing(AuthStage::NeedPassword(_)) => "awaiting password",
            SessionState::Authorizing(AuthStage::Authorized) => "authorized",
            SessionState::MapWait => "waiting for map",
            SessionState::MapTransfer(_) => "receiving map",
            SessionState::MapDone => "map sent",
            SessionState::PreActive => "catching up",
            SessionState::Active => "active",
            SessionState::Closed(_) => "closed",
        }
    }

    pub fn apply(&mut self, event: SessionEvent) -> Result<(), InvalidTransition> {
        let current = std::mem::replace(self, SessionState::Inactive);

        let next = match (current, event) {
            (SessionState::Inactive, SessionEvent::Join { password }) => {
                SessionState::Authorizing(AuthStage::after(password))
            }
            (
                SessionState::Authorizing(AuthStage::NeedPassword(_)),
                SessionEvent::PasswordAccepted { next },
            ) => SessionState::Authorizing(AuthStage::after(next)),
            (
                SessionState::Authorizing(AuthStage::Authorized),
                SessionEvent::MapRequested { transfer },
            ) => match transfer {
                Some(cursor) => SessionState::MapTransfer(cursor),
                None => SessionState::MapWait,
            },
            (SessionState::MapWait, SessionEvent::TransferStarted(cursor)) => {
                SessionState::MapTransfer(cursor)
            }
            (SessionState::MapTransfer(_), SessionEvent::MapSent) => SessionState::MapDone,
            (SessionState::MapDone, SessionEvent::MapAcknowledged) => SessionState::PreActive,
            (SessionState::PreActive, SessionEvent::CaughtUp) => SessionState::Active,
            (SessionState::Closed(reason), SessionEvent::Close(_)) => {
                *self = SessionState::Closed(reason);
                return Err(InvalidTransition {
                    from: "closed",
                    event: "close",
                });
            }
            (_, SessionEvent::Close(reason)) => SessionState::Closed(reason),
            (state, event) => {
                let err = InvalidTransition {
                    from: state.name(),
                    event: event.name(),
                };
                *self = state;
                return Err(err);
            }
        };

        *self = next;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed(_))
    }

    pub fn is_authorized(&self) -> bool {
        matches!(
            self,
            SessionState::MapWait
                | SessionState::MapTransfer(_)
                | SessionState::MapDone
                | SessionState::PreActive
                | SessionState::Active
        )
    }

    /// Welcomed sessions: they see joins, quits, chat and client info.
    pub fn has_joined(&self) -> bool {
        matches!(self, SessionState::Authorizing(AuthStage::Authorized)) || self.is_authorized()
    }

    /// States whose outbound queue must collect every scheduled command:
    /// they already hold, or are receiving, the world those commands apply to.
    pub fn collects_commands(&self) -> bool {
        matches!(
            self,
            SessionState::MapTransfer(_)
                | SessionState::MapDone
                | SessionState::PreActive
                | SessionState::Active
        )
    }

    pub fn in_map_transfer(&self) -> bool {
        matches!(self, SessionState::MapTransfer(_))
    }

    pub fn map_cursor_mut(&mut self) -> Option<&mut MapCursor> {
        match self {
            SessionState::MapTransfer(cursor) => Some(cursor),
            _ => None,
        }
    }
}
