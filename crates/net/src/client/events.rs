use crate::net::{ChatAction, ClientIndex, CompanyId, ErrorCode, PasswordKind};
use crate::sim::CompanyInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCloseReason {
    Quit,
    ServerFull,
    Shutdown,
    NewGame,
    ConnectionLost,
    Error(ErrorCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Joining,
    Authorizing(PasswordKind),
    Authorized,
    MapWait(u8),
    Downloading,
    PreActive,
    Active,
    Closed(ClientCloseReason),
}

impl ClientStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, ClientStatus::Closed(_))
    }

    /// Frames may run once the map is loaded.
    pub fn runs_frames(&self) -> bool {
        matches!(self, ClientStatus::PreActive | ClientStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    PasswordRequired(PasswordKind),
    Joined { index: ClientIndex },
    Waiting { ahead: u8 },
    MapProgress { received: usize, total: usize },
    MapLoaded { frame: u32 },
    Active { frame: u32 },
    ClientInfo { index: ClientIndex, playas: CompanyId, name: String },
    ClientJoined { index: ClientIndex },
    ClientQuit { index: ClientIndex, reason: String },
    Chat { action: ChatAction, from: ClientIndex, self_send: bool, message: String },
    CompanyInfo(Vec<CompanyInfo>),
    Desync { frame: u32 },
    ServerFull,
    Error(ErrorCode),
    Shutdown,
    NewGame,
    Disconnected(ClientCloseReason),
}
