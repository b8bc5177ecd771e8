//! Command definitions
//!
//! Opcodes shared with the co-processor firmware, and the length width
//! each command uses for its parameters.

use super::ParamWidth;

/// Command opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // -------------------------------------------------------------------------
    // Preferences
    // -------------------------------------------------------------------------
    PrefBegin = 0x50,
    PrefEnd = 0x51,
    PrefClear = 0x52,
    PrefRemove = 0x53,
    PrefLen = 0x54,
    PrefStat = 0x55,
    PrefPut = 0x56,
    PrefGet = 0x57,
    PrefGetType = 0x58,

    // -------------------------------------------------------------------------
    // File storage
    // -------------------------------------------------------------------------
    FileWrite = 0x60,
    FileRead = 0x61,
    FileDelete = 0x62,
    FileExists = 0x63,
    FileDownload = 0x64,

    // -------------------------------------------------------------------------
    // Sockets
    // -------------------------------------------------------------------------
    SocketCreate = 0x70,
    SocketClose = 0x71,
    SocketErrno = 0x72,
    SocketBind = 0x73,
    SocketListen = 0x74,
    SocketAccept = 0x75,
    SocketConnect = 0x76,
    SocketSend = 0x77,
    SocketRecv = 0x78,
    SocketSendTo = 0x79,
    SocketRecvFrom = 0x7A,
    SocketIoctl = 0x7B,
    SocketPoll = 0x7C,
    SocketSetOpt = 0x7D,
    SocketGetOpt = 0x7E,
    SocketPeerName = 0x7F,
}

impl Opcode {
    /// Every opcode, in wire order
    pub const ALL: [Opcode; 30] = [
        Opcode::PrefBegin,
        Opcode::PrefEnd,
        Opcode::PrefClear,
        Opcode::PrefRemove,
        Opcode::PrefLen,
        Opcode::PrefStat,
        Opcode::PrefPut,
        Opcode::PrefGet,
        Opcode::PrefGetType,
        Opcode::FileWrite,
        Opcode::FileRead,
        Opcode::FileDelete,
        Opcode::FileExists,
        Opcode::FileDownload,
        Opcode::SocketCreate,
        Opcode::SocketClose,
        Opcode::SocketErrno,
        Opcode::SocketBind,
        Opcode::SocketListen,
        Opcode::SocketAccept,
        Opcode::SocketConnect,
        Opcode::SocketSend,
        Opcode::SocketRecv,
        Opcode::SocketSendTo,
        Opcode::SocketRecvFrom,
        Opcode::SocketIoctl,
        Opcode::SocketPoll,
        Opcode::SocketSetOpt,
        Opcode::SocketGetOpt,
        Opcode::SocketPeerName,
    ];

    /// Look up an opcode by its wire value (reply flag must be stripped)
    pub fn from_u8(value: u8) -> Option<Opcode> {
        Self::ALL.iter().copied().find(|op| *op as u8 == value)
    }

    /// Length-prefix width of every request parameter of this command
    pub fn request_width(self) -> ParamWidth {
        match self {
            Opcode::PrefRemove
            | Opcode::PrefLen
            | Opcode::PrefPut
            | Opcode::PrefGet
            | Opcode::PrefGetType
            | Opcode::FileWrite
            | Opcode::SocketSend
            | Opcode::SocketSendTo => ParamWidth::Buffer,
            _ => ParamWidth::Short,
        }
    }

    /// Length-prefix width of every reply parameter of this command
    pub fn reply_width(self) -> ParamWidth {
        match self {
            Opcode::PrefGet
            | Opcode::FileRead
            | Opcode::SocketRecv
            | Opcode::SocketRecvFrom => ParamWidth::Buffer,
            _ => ParamWidth::Short,
        }
    }
}
