use std::net::SocketAddr;

use crate::net::{ChatAction, ClientIndex, DestType};
use crate::session::DisconnectReason;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        addr: SocketAddr,
    },
    ClientJoined {
        index: ClientIndex,
        name: String,
    },
    ClientActive {
        index: ClientIndex,
    },
    ClientDisconnected {
        index: ClientIndex,
        reason: DisconnectReason,
    },
    ConnectionRefused {
        addr: SocketAddr,
        reason: String,
    },
    Chat {
        from: ClientIndex,
        action: ChatAction,
        dest_type: DestType,
        dest: u16,
        message: String,
    },
    Error {
        message: String,
    },
}
