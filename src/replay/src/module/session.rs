use crate::protocol::mysql::constants::{SCRAMBLE_LENGTH, SEED_323_LENGTH};

/// Per-session MySQL scratch. Zeroed when the host opens the TCP flow and
/// mutated only by the dispatch hooks.
#[derive(Debug, Default, Clone)]
pub struct MySqlSession {
    /// 20-byte challenge from the replayed server greeting
    pub scramble: [u8; SCRAMBLE_LENGTH],
    /// first 8 challenge bytes, the `old_password` seed
    pub seed323: [u8; SEED_323_LENGTH],
    /// resolved test-side credentials, set while rewriting first auth
    pub user: Vec<u8>,
    pub password: Vec<u8>,

    pub first_auth_sent: bool,
    pub sec_auth_checked: bool,
    pub sec_auth_not_yet_done: bool,
    pub auth_packet_already_added: bool,

    /// wall-clock seconds of the last cache refresh for this session
    pub last_refresh_time: u64,
    /// client sequence right after the splice point; earlier retransmits are
    /// stale once the session runs on a fake-SYN connection
    pub seq_after_ps: u32,
    /// 4-bit counter; the first-auth consistency probe fires on rollover
    pub refresh_tick: u8,
}
