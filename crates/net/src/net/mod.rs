mod channel;
mod dispatch;
mod endpoint;
mod packet;
mod protocol;
mod stats;

pub use channel::{TcpChannel, reject};
pub use dispatch::{Dispatch, Dispatcher, Handler};
pub use endpoint::UdpEndpoint;
pub use packet::{HEADER_SIZE, Packet, PacketError, SEND_MTU};
pub use protocol::{
    COMMAND_TEXT_LENGTH, COMPANY_INFO_VERSION, CHAT_LENGTH, ChatAction, ClientIndex, CompanyId,
    DEFAULT_PORT, DEFAULT_TICK_RATE, DestType, ErrorCode, FIRST_CLIENT_INDEX, GAME_INFO_VERSION,
    MASTER_SERVER_PORT, MASTER_SERVER_VERSION, MASTER_SERVER_WELCOME, MAX_COMPANIES, MapPacket,
    NAME_LENGTH, NEW_COMPANY, NOREV_STRING, PASSWORD_LENGTH, PacketKind, PacketType,
    PasswordKind, REVISION, REVISION_LENGTH, SERVER_INDEX, SPECTATOR, UNIQUE_ID_LENGTH, UdpPacketType,
    version_compatible,
};
pub use stats::NetworkStats;
