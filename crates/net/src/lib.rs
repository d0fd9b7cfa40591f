pub mod client;
pub mod command;
pub mod discovery;
pub mod error;
pub mod net;
pub mod server;
pub mod session;
pub mod sim;
pub mod sync;

pub use client::{
    ClientCloseReason, ClientConfig, ClientEvent, ClientStatus, ConnectTarget, NetworkClient,
};
pub use command::{Command, CommandQueue, QueueError};
pub use discovery::{
    AdvertiseSettings, ContentId, ContentResolver, DiscoveryClient, DiscoveryServer, GameInfo,
    MasterRegistry, NoContent, ServerList, SortKey,
};
pub use error::{ConfigError, NetworkError, SimError};
pub use net::{
    ChatAction, ClientIndex, CompanyId, DEFAULT_PORT, DEFAULT_TICK_RATE, DestType, ErrorCode,
    NEW_COMPANY, NetworkStats, Packet, PacketError, PacketType, PasswordKind, REVISION,
    SERVER_INDEX, SPECTATOR, TcpChannel, UdpEndpoint,
};
pub use server::{GameServer, ServerConfig, ServerEvent, ServerStats};
pub use session::{DisconnectReason, SessionId, SessionRegistry, SessionState};
pub use sim::{CompanyInfo, JournalWorld, Simulation};
pub use sync::{FixedTimestep, FrameSettings, Lockstep, SyncError};
