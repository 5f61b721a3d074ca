//! The renew splice: re-attach a captured client session to a freshly opened
//! backend connection by replaying cached auth + PREPARE frames ahead of the
//! next live command.
//!
//! All sequence arithmetic is modular 32-bit; a splice straddling the 2^32
//! boundary is well-defined.

use super::cache::ReplayCache;
use super::session::MySqlSession;
use super::{PacketSink, SessionCtx};
use crate::error::ModuleError;
use crate::net::Frame;
use crate::protocol::mysql;
use crate::protocol::mysql::constants::CommandCode;
use tracing::{debug, warn};

/// A renew only matters when the next packet is a command that would fail on
/// a brand-new connection: a COM_QUERY or COM_STMT_EXECUTE at packet number
/// 0, for a session whose first auth is cached.
pub fn check_renew_session(cache: &mut ReplayCache, frame: &Frame, now: u64) -> bool {
    if cache.first_auth(frame.session_key(), now).is_none() {
        return false;
    }
    if frame.payload_len() == 0 {
        return false;
    }
    let payload = frame.payload();
    // the second authenticate_user rides packet number > 0; skip it
    if mysql::packet_number(payload) != Some(0) {
        return false;
    }
    let command = mysql::command(payload);
    debug!("ReplayMod mysql command:{command:?}");
    matches!(
        command,
        Some(CommandCode::ComQuery | CommandCode::ComStmtExecute)
    )
}

/// Rewrite the live packet's sequence backward by the total cached length and
/// emit first auth, second auth, and every PREPARE with recomputed sequence
/// numbers. Re-entry per session is a no-op.
pub fn prepare_for_renew_session(
    cache: &mut ReplayCache,
    sess: &mut SessionCtx<MySqlSession>,
    live: &mut Frame,
    sink: &mut dyn PacketSink,
    now: u64,
) -> Result<(), ModuleError> {
    if sess.data.auth_packet_already_added {
        debug!(
            "ReplayMod dup visit prepare_for_renew_session:{}",
            sess.src_port
        );
        return Ok(());
    }
    sess.sm.need_rep_greet = true;

    let key = sess.hash_key;
    let mut fir = match cache.first_auth(key, now) {
        Some(frame) => frame.clone(),
        None => {
            warn!("ReplayMod no first auth:{}", sess.src_port);
            return Err(ModuleError::MissingFirstAuth {
                src_port: sess.src_port,
            });
        }
    };
    let fir_clen = fir.payload_len() as u32;

    let sec = cache.second_auth(key, now).cloned();
    let sec_clen = sec.as_ref().map_or(0, |frame| frame.payload_len() as u32);
    if sec.is_none() {
        debug!("ReplayMod no sec auth:{}", sess.src_port);
    }

    let ps_clen = cache
        .prepared(key)
        .map_or(0, |item| item.total_payload_bytes());
    let tot_clen = fir_clen + sec_clen + ps_clen;
    debug!(
        "ReplayMod total len subtracted:{tot_clen},p:{}",
        sess.src_port
    );

    sess.data.seq_after_ps = live.seq();
    live.set_seq(live.seq().wrapping_sub(tot_clen));

    // sequence 1 is reserved for the host's fake SYN
    let fir_seq = live.seq().wrapping_add(1);
    fir.set_seq(fir_seq);
    sink.save_pack(fir);
    sess.data.auth_packet_already_added = true;

    if let Some(mut sec_frame) = sec {
        sec_frame.set_seq(fir_seq.wrapping_add(fir_clen));
        sink.save_pack(sec_frame);
        debug!("ReplayMod add sec auth:{}", sess.src_port);
    }

    let mut base_seq = fir_seq.wrapping_add(fir_clen).wrapping_add(sec_clen);
    if let Some(item) = cache.prepared(key) {
        for packet in item.packets() {
            let mut frame = packet.frame().clone();
            frame.set_seq(base_seq);
            base_seq = base_seq.wrapping_add(frame.payload_len() as u32);
            sink.save_pack(frame);
        }
    }
    Ok(())
}
