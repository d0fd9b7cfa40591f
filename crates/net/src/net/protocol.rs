use std::fmt;

use super::packet::PacketError;

pub const DEFAULT_PORT: u16 = 3979;
pub const MASTER_SERVER_PORT: u16 = 3978;
pub const DEFAULT_TICK_RATE: u32 = 30;

pub const MASTER_SERVER_VERSION: u8 = 1;
pub const MASTER_SERVER_WELCOME: &str = "FramelockRegister";
pub const REVISION: &str = env!("CARGO_PKG_VERSION");

pub const GAME_INFO_VERSION: u8 = 4;
pub const COMPANY_INFO_VERSION: u8 = 1;

/// Revision string that is compatible with every other revision.
pub const NOREV_STRING: &str = "norev000";

pub const NAME_LENGTH: usize = 80;
pub const REVISION_LENGTH: usize = 15;
pub const PASSWORD_LENGTH: usize = 20;
pub const UNIQUE_ID_LENGTH: usize = 33;
pub const CHAT_LENGTH: usize = 900;
pub const COMMAND_TEXT_LENGTH: usize = 128;

pub type ClientIndex = u16;
pub type CompanyId = u8;

pub const SERVER_INDEX: ClientIndex = 1;
pub const FIRST_CLIENT_INDEX: ClientIndex = 2;
pub const MAX_COMPANIES: u8 = 8;
pub const NEW_COMPANY: CompanyId = 254;
pub const SPECTATOR: CompanyId = 255;

/// Implemented by every wire enum that tags a packet.
pub trait PacketKind: Copy + Into<u8> + TryFrom<u8, Error = PacketError> + fmt::Debug {
    const COUNT: usize;
}

macro_rules! wire_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident as $field:literal { $($variant:ident = $value:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        $vis enum $name {
            $($variant = $value,)+
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                value as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = PacketError;

            fn try_from(value: u8) -> Result<Self, PacketError> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(PacketError::InvalidValue {
                        field: $field,
                        value: other as u32,
                    }),
                }
            }
        }
    };
}

macro_rules! packet_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($variant:ident = $value:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        $vis enum $name {
            $($variant = $value,)+
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                value as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = PacketError;

            fn try_from(value: u8) -> Result<Self, PacketError> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(PacketError::UnknownType(other)),
                }
            }
        }

        impl PacketKind for $name {
            const COUNT: usize = [$($name::$variant,)+].len();
        }
    };
}

packet_enum! {
    /// Packets on the reliable game connection. The first three values are
    /// frozen so that any revision can report "full" or an error.
    pub enum PacketType {
        ServerFull = 0,
        ClientJoin = 1,
        ServerError = 2,
        ClientCompanyInfo = 3,
        ServerCompanyInfo = 4,
        ServerClientInfo = 5,
        ServerNeedPassword = 6,
        ClientPassword = 7,
        ServerWelcome = 8,
        ClientGetMap = 9,
        ServerWait = 10,
        ServerMap = 11,
        ClientMapOk = 12,
        ServerJoin = 13,
        ServerFrame = 14,
        ServerSync = 15,
        ClientAck = 16,
        ClientCommand = 17,
        ServerCommand = 18,
        ClientChat = 19,
        ServerChat = 20,
        ClientSetPassword = 21,
        ClientSetName = 22,
        ClientQuit = 23,
        ClientError = 24,
        ServerQuit = 25,
        ServerErrorQuit = 26,
        ServerShutdown = 27,
        ServerNewGame = 28,
    }
}

packet_enum! {
    pub enum UdpPacketType {
        ClientFindServer = 0,
        ServerResponse = 1,
        ClientDetailInfo = 2,
        ServerDetailInfo = 3,
        ServerRegister = 4,
        MasterAckRegister = 5,
        ClientGetList = 6,
        MasterResponseList = 7,
        ServerUnregister = 8,
        ClientGetNewGrfs = 9,
        ServerNewGrfs = 10,
    }
}

wire_enum! {
    /// Error codes sent in SERVER_ERROR, CLIENT_ERROR and SERVER_ERROR_QUIT.
    pub enum ErrorCode as "error code" {
        General = 0,
        Desync = 1,
        SavegameFailed = 2,
        ConnectionLost = 3,
        IllegalPacket = 4,
        NotAuthorized = 5,
        NotExpected = 6,
        WrongRevision = 7,
        NameInUse = 8,
        WrongPassword = 9,
        PlayerMismatch = 10,
        Kicked = 11,
    }
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::General => "general error",
            ErrorCode::Desync => "desync error",
            ErrorCode::SavegameFailed => "could not load map",
            ErrorCode::ConnectionLost => "connection lost",
            ErrorCode::IllegalPacket => "protocol error",
            ErrorCode::NotAuthorized => "not authorized",
            ErrorCode::NotExpected => "received invalid or unexpected packet",
            ErrorCode::WrongRevision => "wrong revision",
            ErrorCode::NameInUse => "name already in use",
            ErrorCode::WrongPassword => "wrong password",
            ErrorCode::PlayerMismatch => "company mismatch in command",
            ErrorCode::Kicked => "kicked by server",
        }
    }

    /// Unknown codes from a newer peer still end the connection.
    pub fn from_wire(value: u8) -> Self {
        Self::try_from(value).unwrap_or(ErrorCode::General)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

wire_enum! {
    pub enum PasswordKind as "password kind" {
        Game = 0,
        Company = 1,
    }
}

wire_enum! {
    pub enum MapPacket as "map packet" {
        Start = 0,
        Normal = 1,
        Patch = 2,
        End = 3,
    }
}

wire_enum! {
    pub enum DestType as "destination type" {
        Broadcast = 0,
        Company = 1,
        Client = 2,
    }
}

wire_enum! {
    pub enum ChatAction as "chat action" {
        Join = 0,
        Leave = 1,
        ServerMessage = 2,
        Chat = 3,
        ChatCompany = 4,
        ChatClient = 5,
        GiveMoney = 6,
        NameChange = 7,
    }
}

pub fn version_compatible(ours: &str, theirs: &str) -> bool {
    ours == theirs || ours == NOREV_STRING || theirs == NOREV_STRING
}
