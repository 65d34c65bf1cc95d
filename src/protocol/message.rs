//! Protocol message definitions
//!
//! Defines every packet exchanged over the admin port: the requests an admin
//! client may send (kinds 0-7) and the packets a server emits (kinds 100-126).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::GameDate;

/// Update kinds an admin client can poll for or subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum UpdateType {
    Date = 0,
    ClientInfo = 1,
    CompanyInfo = 2,
    CompanyEconomy = 3,
    CompanyStats = 4,
    Chat = 5,
    Console = 6,
    CmdNames = 7,
    CmdLogging = 8,
    GameScript = 9,
}

/// Update frequencies, as advertised bit-by-bit in the Protocol packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum UpdateFrequency {
    /// One-shot answer to a Poll; never valid for a standing subscription
    Poll = 0x01,
    Daily = 0x02,
    Weekly = 0x04,
    Monthly = 0x08,
    Quarterly = 0x10,
    Annually = 0x20,
    Automatic = 0x40,
}

impl UpdateFrequency {
    pub fn bits(self) -> u16 {
        self as u16
    }
}

/// Chat actions (`NetworkAction` on the server side)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChatAction {
    Join = 0x00,
    Leave = 0x01,
    ServerMessage = 0x02,
    Chat = 0x03,
    ChatCompany = 0x04,
    ChatClient = 0x05,
    GiveMoney = 0x06,
    NameChange = 0x07,
    CompanySpectator = 0x08,
    CompanyJoin = 0x09,
    CompanyNew = 0x0A,
}

/// Chat destination types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Destination {
    Broadcast = 0x00,
    Team = 0x01,
    Client = 0x02,
}

/// Network error codes carried by Error and ClientError packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NetError {
    General = 0x00,
    Desync = 0x01,
    SavegameFailed = 0x02,
    ConnectionLost = 0x03,
    IllegalPacket = 0x04,
    NewgrfMismatch = 0x05,
    NotAuthorized = 0x06,
    NotExpected = 0x07,
    WrongRevision = 0x08,
    NameInUse = 0x09,
    WrongPassword = 0x0A,
    CompanyMismatch = 0x0B,
    Kicked = 0x0C,
    Cheater = 0x0D,
    Full = 0x0E,
    TooManyCommands = 0x0F,
}

impl NetError {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => NetError::General,
            0x01 => NetError::Desync,
            0x02 => NetError::SavegameFailed,
            0x03 => NetError::ConnectionLost,
            0x04 => NetError::IllegalPacket,
            0x05 => NetError::NewgrfMismatch,
            0x06 => NetError::NotAuthorized,
            0x07 => NetError::NotExpected,
            0x08 => NetError::WrongRevision,
            0x09 => NetError::NameInUse,
            0x0A => NetError::WrongPassword,
            0x0B => NetError::CompanyMismatch,
            0x0C => NetError::Kicked,
            0x0D => NetError::Cheater,
            0x0E => NetError::Full,
            0x0F => NetError::TooManyCommands,
            _ => return None,
        })
    }
}

/// Why a company was removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompanyRemoveReason {
    Manual,
    Autoclean,
    Bankrupt,
    /// A reason newer than this client
    Other(u8),
}

impl From<u8> for CompanyRemoveReason {
    fn from(reason: u8) -> Self {
        match reason {
            0x00 => CompanyRemoveReason::Manual,
            0x01 => CompanyRemoveReason::Autoclean,
            0x02 => CompanyRemoveReason::Bankrupt,
            other => CompanyRemoveReason::Other(other),
        }
    }
}

/// Per-type counts of vehicles or stations owned by a company
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCounts {
    pub train: u16,
    pub lorry: u16,
    pub bus: u16,
    pub plane: u16,
    pub ship: u16,
}

/// Packets sent by the admin client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPacket {
    /// Authenticate; must be the first packet on a connection
    Join {
        password: String,
        name: String,
        version: String,
    },

    /// Polite goodbye
    Quit,

    /// Subscribe to an update kind at a standing frequency
    UpdateFrequency {
        update_type: UpdateType,
        frequency: UpdateFrequency,
    },

    /// One-shot request; `id` of [`super::POLL_ALL`] means everything
    Poll { update_type: UpdateType, id: u32 },

    Chat {
        action: ChatAction,
        destination: Destination,
        destination_id: u32,
        message: String,
    },

    /// Remote console command
    Rcon { command: String },

    /// JSON forwarded to the running GameScript
    GameScript { json: String },

    /// Liveness check; the token is quoted back in the Pong
    Ping { token: u32 },
}

impl RequestPacket {
    /// Get the packet kind byte
    pub fn kind(&self) -> u8 {
        match self {
            RequestPacket::Join { .. } => 0,
            RequestPacket::Quit => 1,
            RequestPacket::UpdateFrequency { .. } => 2,
            RequestPacket::Poll { .. } => 3,
            RequestPacket::Chat { .. } => 4,
            RequestPacket::Rcon { .. } => 5,
            RequestPacket::GameScript { .. } => 6,
            RequestPacket::Ping { .. } => 7,
        }
    }
}

/// Kinds of packets sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResponseKind {
    Full = 100,
    Banned = 101,
    Error = 102,
    Protocol = 103,
    Welcome = 104,
    Newgame = 105,
    Shutdown = 106,
    Date = 107,
    ClientJoin = 108,
    ClientInfo = 109,
    ClientUpdate = 110,
    ClientQuit = 111,
    ClientError = 112,
    CompanyNew = 113,
    CompanyInfo = 114,
    CompanyUpdate = 115,
    CompanyRemove = 116,
    CompanyEconomy = 117,
    CompanyStats = 118,
    Chat = 119,
    Rcon = 120,
    Console = 121,
    CmdNames = 122,
    CmdLogging = 123,
    GameScript = 124,
    RconEnd = 125,
    Pong = 126,
}

impl ResponseKind {
    pub fn from_u8(kind: u8) -> Option<Self> {
        use ResponseKind::*;
        Some(match kind {
            100 => Full,
            101 => Banned,
            102 => Error,
            103 => Protocol,
            104 => Welcome,
            105 => Newgame,
            106 => Shutdown,
            107 => Date,
            108 => ClientJoin,
            109 => ClientInfo,
            110 => ClientUpdate,
            111 => ClientQuit,
            112 => ClientError,
            113 => CompanyNew,
            114 => CompanyInfo,
            115 => CompanyUpdate,
            116 => CompanyRemove,
            117 => CompanyEconomy,
            118 => CompanyStats,
            119 => Chat,
            120 => Rcon,
            121 => Console,
            122 => CmdNames,
            123 => CmdLogging,
            124 => GameScript,
            125 => RconEnd,
            126 => Pong,
            _ => return None,
        })
    }
}

/// Packets sent by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePacket {
    /// Server has no free admin slots
    Full,

    /// This address is banned
    Banned,

    Error {
        code: u8,
    },

    /// Protocol version plus the update frequencies allowed per update kind
    Protocol {
        version: u8,
        frequencies: BTreeMap<u16, u16>,
    },

    Welcome {
        name: String,
        version: String,
        dedicated: bool,
        map_name: String,
        seed: u32,
        landscape: u8,
        start_date: GameDate,
        map_width: u16,
        map_height: u16,
    },

    Newgame,

    Shutdown,

    Date {
        current: GameDate,
    },

    ClientJoin {
        id: u32,
    },

    ClientInfo {
        id: u32,
        address: String,
        name: String,
        language: u8,
        join_date: GameDate,
        company: u8,
    },

    ClientUpdate {
        id: u32,
        name: String,
        company: u8,
    },

    ClientQuit {
        id: u32,
    },

    ClientError {
        id: u32,
        error: u8,
    },

    CompanyNew {
        id: u8,
    },

    CompanyInfo {
        id: u8,
        name: String,
        manager: String,
        colour: u8,
        passworded: bool,
        start_year: u32,
        ai: bool,
    },

    CompanyUpdate {
        id: u8,
        name: String,
        manager: String,
        colour: u8,
        passworded: bool,
        bankruptcy_quarters: u8,
        /// Owners of the four company shares; servers on protocol 3 and
        /// later leave them out
        shares: Option<[u8; 4]>,
    },

    CompanyRemove {
        id: u8,
        reason: CompanyRemoveReason,
    },

    CompanyEconomy {
        id: u8,
        money: u64,
        loan: u64,
        income: i64,
        cargo_this_quarter: u16,
        value_last_quarter: u64,
        performance_last_quarter: u16,
        cargo_last_quarter: u16,
        value_previous_quarter: u64,
        performance_previous_quarter: u16,
        cargo_previous_quarter: u16,
    },

    CompanyStats {
        id: u8,
        vehicles: TypeCounts,
        stations: TypeCounts,
    },

    Chat {
        action: u8,
        destination: u8,
        client_id: u32,
        message: String,
        /// Only meaningful for give-money actions
        money: u64,
    },

    /// One line of remote console output
    Rcon {
        colour: u16,
        output: String,
    },

    Console {
        origin: String,
        message: String,
    },

    /// DoCommand IDs and names; not stable across server versions
    CmdNames {
        commands: BTreeMap<u16, String>,
    },

    CmdLogging {
        client_id: u32,
        company: u8,
        command_id: u16,
        p1: u32,
        p2: u32,
        tile: u32,
        text: String,
        frame: u32,
    },

    GameScript {
        json: String,
    },

    /// All output for `command` has been streamed
    RconEnd {
        command: String,
    },

    Pong {
        token: u32,
    },

    /// A kind this client does not know how to decode
    Unknown {
        kind: u8,
        payload: Vec<u8>,
    },
}

impl ResponsePacket {
    /// Get the packet kind, or `None` for [`ResponsePacket::Unknown`]
    pub fn kind(&self) -> Option<ResponseKind> {
        use ResponsePacket as P;
        Some(match self {
            P::Full => ResponseKind::Full,
            P::Banned => ResponseKind::Banned,
            P::Error { .. } => ResponseKind::Error,
            P::Protocol { .. } => ResponseKind::Protocol,
            P::Welcome { .. } => ResponseKind::Welcome,
            P::Newgame => ResponseKind::Newgame,
            P::Shutdown => ResponseKind::Shutdown,
            P::Date { .. } => ResponseKind::Date,
            P::ClientJoin { .. } => ResponseKind::ClientJoin,
            P::ClientInfo { .. } => ResponseKind::ClientInfo,
            P::ClientUpdate { .. } => ResponseKind::ClientUpdate,
            P::ClientQuit { .. } => ResponseKind::ClientQuit,
            P::ClientError { .. } => ResponseKind::ClientError,
            P::CompanyNew { .. } => ResponseKind::CompanyNew,
            P::CompanyInfo { .. } => ResponseKind::CompanyInfo,
            P::CompanyUpdate { .. } => ResponseKind::CompanyUpdate,
            P::CompanyRemove { .. } => ResponseKind::CompanyRemove,
            P::CompanyEconomy { .. } => ResponseKind::CompanyEconomy,
            P::CompanyStats { .. } => ResponseKind::CompanyStats,
            P::Chat { .. } => ResponseKind::Chat,
            P::Rcon { .. } => ResponseKind::Rcon,
            P::Console { .. } => ResponseKind::Console,
            P::CmdNames { .. } => ResponseKind::CmdNames,
            P::CmdLogging { .. } => ResponseKind::CmdLogging,
            P::GameScript { .. } => ResponseKind::GameScript,
            P::RconEnd { .. } => ResponseKind::RconEnd,
            P::Pong { .. } => ResponseKind::Pong,
            P::Unknown { .. } => return None,
        })
    }
}
