use num_derive::{FromPrimitive, ToPrimitive};

// max packet payload length.
pub const MAX_PAYLOAD_LEN: usize = 16_777_215;

pub const PACKET_HEADER_LEN: usize = 4;
/// auth-plugin-data-part-1. The first 8 bytes of the server challenge, also
/// the seed of the pre-4.1 `old_password` scramble.
pub const AUTH_PLUGIN_DATA_PART_1_LENGTH: usize = 8;
/// Full server challenge length (part-1 + part-2).
pub const SCRAMBLE_LENGTH: usize = 20;
pub const SEED_323_LENGTH: usize = 8;
pub const ENCRYPT_LEN: usize = 16;

pub const MAX_USER_LEN: usize = 256;
pub const MAX_PASSWORD_LEN: usize = 256;
/// Prepared statements cached per session; overflow logs and drops.
pub const MAX_SP_SIZE: usize = 256;
/// Upper bound on the whole `user=` directive value.
pub const MAX_USER_INFO: usize = 4096;

/// Initial Handshake protocol versions below this are not replayable.
pub const MIN_GREETING_PROTOCOL_VERSION: u8 = 10;

#[derive(Debug, PartialEq, ToPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum HeaderInfo {
    OKHeader = 0x00,
    ErrHeader = 0xff,
    EOFHeader = 0xfe,
    LocalInFileHeader = 0xfb,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum CommandCode {
    ComSleep = 0,
    ComQuit,
    ComInitDB,
    ComQuery,
    ComFieldList,
    ComCreateDB,
    ComDropDB,
    ComRefresh,
    ComShutdown,
    ComStatistics,
    ComProcessInfo,
    ComConnect,
    ComProcessKill,
    ComDebug,
    ComPing,
    ComTime,
    ComDelayedInsert,
    ComChangeUser,
    ComBinlogDump,
    ComTableDump,
    ComConnectOut,
    ComRegisterSlave,
    ComStmtPrepare,
    ComStmtExecute,
    ComStmtSendLongData,
    ComStmtClose,
    ComStmtReset,
    ComSetOption,
    ComStmtFetch,
    ComDaemon,
    ComBinlogDumpGtid,
    ComResetConnection,
    ComEnd,
}
