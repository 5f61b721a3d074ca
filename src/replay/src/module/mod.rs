//! Host plug-in contract.
//!
//! The host tracks TCP sessions, reassembles payloads, and drives one hook at
//! a time on a single thread; no hook blocks or performs I/O. The module owns
//! everything MySQL: per-session protocol state, the replay cache, and the
//! renew splice.

pub mod cache;
pub mod credentials;
pub mod mysql;
pub mod session;
pub mod splice;

use crate::error::ModuleError;
use crate::net::Frame;

/// Forwarding decision of a per-packet hook: `Stop` tells the host to drop
/// the current packet without forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketAction {
    Continue,
    Stop,
}

/// Host-provided sink feeding the sliding-window output queue. Frames handed
/// over must already carry their final sequence numbers.
pub trait PacketSink {
    fn save_pack(&mut self, frame: Frame);
}

/// Host-side state machine bits the module reads and writes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionSm {
    /// session was attached to the backend via a synthesized SYN
    pub fake_syn: bool,
    pub sess_over: bool,
    /// the replayed backend greeting has been received
    pub rcv_rep_greet: bool,
    /// a renew needs the backend greeting before auth replays
    pub need_rep_greet: bool,
}

/// The host's per-TCP-session context with the module's scratch in `data`.
#[derive(Debug, Default)]
pub struct SessionCtx<S> {
    pub hash_key: u64,
    pub src_port: u16,
    pub sm: SessionSm,
    pub data: S,
}

impl<S: Default> SessionCtx<S> {
    pub fn new(hash_key: u64, src_port: u16) -> Self {
        Self {
            hash_key,
            src_port,
            sm: SessionSm::default(),
            data: S::default(),
        }
    }
}

/// Host-configured knobs, both in seconds.
#[derive(Debug, Clone, Copy)]
pub struct ModuleOptions {
    /// cache entries idle longer than this are swept
    pub max_idle_secs: u64,
    /// cached frames older than this are deep-copied anew on the next command
    pub max_refresh_secs: u64,
}

impl Default for ModuleOptions {
    fn default() -> Self {
        Self {
            max_idle_secs: 1200,
            max_refresh_secs: 180,
        }
    }
}

/// The protocol plug-in the host dispatches every captured packet through.
///
/// Hooks run serially and to completion; `&mut self` is exclusive for the
/// duration of each call, so no further synchronization is needed as long as
/// the host shards sessions to one executor.
pub trait ReplayModule {
    type Session: Default;

    fn init(&mut self) -> Result<(), ModuleError>;
    fn exit(&mut self);

    /// Periodic sweep; `full` evicts everything regardless of age.
    fn remove_obsolete_resources(&mut self, full: bool);

    fn on_session_create(&mut self, sess: &mut SessionCtx<Self::Session>);
    fn on_session_destroy(&mut self, sess: &mut SessionCtx<Self::Session>);

    /// Should this client packet trigger re-attachment to a fresh backend?
    fn check_renew_session(&mut self, frame: &Frame) -> bool;

    /// Splice cached auth + prepared statements ahead of `live` through
    /// `sink`, rewriting sequence numbers. Idempotent per session.
    fn prepare_for_renew_session(
        &mut self,
        sess: &mut SessionCtx<Self::Session>,
        live: &mut Frame,
        sink: &mut dyn PacketSink,
    ) -> Result<(), ModuleError>;

    /// Per client packet: capture PREPAREs for later reconstruction, refresh
    /// aged cache entries, and drop pre-splice retransmits after a renew.
    fn check_pack_needed_for_recons(
        &mut self,
        sess: &mut SessionCtx<Self::Session>,
        frame: &Frame,
    ) -> PacketAction;

    /// Server greeting on a replayed connection.
    fn proc_greet(
        &mut self,
        sess: &mut SessionCtx<Self::Session>,
        frame: &Frame,
    ) -> PacketAction;

    /// Client auth traffic; rewrites the frame in place.
    fn proc_auth(
        &mut self,
        sess: &mut SessionCtx<Self::Session>,
        frame: &mut Frame,
    ) -> PacketAction;

    /// First server response after first auth: does it ask for the pre-4.1
    /// exchange?
    fn check_needed_for_sec_auth(
        &mut self,
        sess: &mut SessionCtx<Self::Session>,
        frame: &Frame,
    );
}
