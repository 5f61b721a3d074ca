//! MySQL dispatch: the `ReplayModule` implementation the host loads.

use super::cache::ReplayCache;
use super::credentials::CredentialStore;
use super::session::MySqlSession;
use super::splice;
use super::{ModuleOptions, PacketAction, PacketSink, ReplayModule, SessionCtx};
use crate::error::{ModuleError, ProtocolError};
use crate::net::{before, Frame};
use crate::protocol::mysql;
use crate::protocol::mysql::auth;
use crate::protocol::mysql::constants::{CommandCode, SEED_323_LENGTH};
use crate::protocol::mysql::greeting;
use tracing::{debug, info, warn};

pub struct MySqlModule {
    opts: ModuleOptions,
    credentials: CredentialStore,
    cache: ReplayCache,
    clock: fn() -> u64,
}

impl MySqlModule {
    pub fn new(opts: ModuleOptions, credentials: CredentialStore) -> Self {
        Self {
            opts,
            credentials,
            cache: ReplayCache::new(),
            clock: common::time::now_secs,
        }
    }

    /// Swap the time source; tests drive a deterministic clock.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache(&self) -> &ReplayCache {
        &self.cache
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }

    fn dispose_auth(
        &mut self,
        sess: &mut SessionCtx<MySqlSession>,
        frame: &mut Frame,
    ) -> Result<(), ModuleError> {
        let now = self.now();
        if !sess.data.first_auth_sent {
            debug!("ReplayMod change fir auth:{}", sess.src_port);
            let prod_user = auth::client_username(frame.payload())?.to_vec();
            let (map_user, password) = match (
                self.credentials.mapped_user_of(&prod_user),
                self.credentials.password_of(&prod_user),
            ) {
                (Some(map_user), Some(password)) => (map_user.to_vec(), password.to_vec()),
                _ => {
                    return Err(ProtocolError::UnknownUser(
                        String::from_utf8_lossy(&prod_user).into_owned(),
                    )
                    .into())
                }
            };
            let rewritten = auth::rewrite_first_auth(
                frame.payload(),
                &map_user,
                &password,
                &sess.data.scramble,
            )?;
            frame.replace_payload(&rewritten)?;
            sess.data.user = map_user;
            sess.data.password = password;
            sess.data.first_auth_sent = true;

            if !sess.sm.fake_syn {
                self.cache.evict(sess.hash_key);
                self.cache.cache_first_auth(sess.hash_key, frame, now);
                sess.data.last_refresh_time = now;
            } else if let Some(create_time) =
                self.cache.first_auth_create_time(sess.hash_key)
            {
                // the cached entry keeps its own refresh cadence
                sess.data.last_refresh_time = create_time;
            } else {
                warn!(
                    "ReplayMod cached first auth for key:{} is nil",
                    sess.hash_key
                );
            }
        } else if sess.data.sec_auth_not_yet_done {
            debug!("ReplayMod change sec auth:{}", sess.src_port);
            sess.data.seed323.copy_from_slice(&sess.data.scramble[..SEED_323_LENGTH]);
            let token = auth::scramble_323(&sess.data.password, &sess.data.seed323);
            auth::rewrite_second_auth(frame.payload_mut(), &token)?;
            sess.data.sec_auth_not_yet_done = false;

            if !sess.sm.fake_syn {
                self.cache.cache_second_auth(sess.hash_key, frame, now);
            }
        }
        Ok(())
    }
}

impl ReplayModule for MySqlModule {
    type Session = MySqlSession;

    fn init(&mut self) -> Result<(), ModuleError> {
        debug!("ReplayMod init");
        self.cache = ReplayCache::new();
        Ok(())
    }

    fn exit(&mut self) {
        info!("ReplayMod exit");
        self.remove_obsolete_resources(true);
        self.cache.clear();
    }

    fn remove_obsolete_resources(&mut self, full: bool) {
        let now = self.now();
        let threshold = if full {
            now + 1
        } else {
            now.saturating_sub(self.opts.max_idle_secs)
        };
        self.cache.sweep(threshold);
    }

    fn on_session_create(&mut self, sess: &mut SessionCtx<MySqlSession>) {
        sess.data = MySqlSession::default();
    }

    fn on_session_destroy(&mut self, sess: &mut SessionCtx<MySqlSession>) {
        self.cache.evict(sess.hash_key);
    }

    fn check_renew_session(&mut self, frame: &Frame) -> bool {
        let now = self.now();
        splice::check_renew_session(&mut self.cache, frame, now)
    }

    fn prepare_for_renew_session(
        &mut self,
        sess: &mut SessionCtx<MySqlSession>,
        live: &mut Frame,
        sink: &mut dyn PacketSink,
    ) -> Result<(), ModuleError> {
        let now = self.now();
        splice::prepare_for_renew_session(&mut self.cache, sess, live, sink, now)
    }

    fn check_pack_needed_for_recons(
        &mut self,
        sess: &mut SessionCtx<MySqlSession>,
        frame: &Frame,
    ) -> PacketAction {
        if sess.sm.fake_syn && before(frame.seq(), sess.data.seq_after_ps) {
            // retransmitted pre-splice data from before the renew
            return PacketAction::Stop;
        }
        if frame.payload_len() == 0 {
            return PacketAction::Continue;
        }

        if mysql::command(frame.payload()) != Some(CommandCode::ComStmtPrepare) {
            let now = self.now();
            if now.saturating_sub(sess.data.last_refresh_time) >= self.opts.max_refresh_secs {
                self.cache.refresh(sess.hash_key);
                sess.data.last_refresh_time = now;
                sess.data.refresh_tick = 0;
            }
            sess.data.refresh_tick = (sess.data.refresh_tick + 1) & 0x0f;
            if sess.data.refresh_tick == 0 && !self.cache.contains_first_auth(sess.hash_key) {
                warn!("ReplayMod no fir auth for key:{}", sess.hash_key);
            }
            return PacketAction::Continue;
        }

        if !sess.sm.fake_syn {
            debug!("ReplayMod push prepare packet:{}", sess.src_port);
            self.cache.push_prepared(sess.hash_key, frame, frame.seq());
        }
        PacketAction::Continue
    }

    fn proc_greet(
        &mut self,
        sess: &mut SessionCtx<MySqlSession>,
        frame: &Frame,
    ) -> PacketAction {
        debug!("ReplayMod recv greet from back:{}", sess.src_port);
        sess.data.sec_auth_checked = false;
        match greeting::parse_greeting(frame.payload()) {
            Ok(greeting) => {
                sess.data.seed323 = greeting.seed323();
                sess.data.scramble = greeting.scramble;
                PacketAction::Continue
            }
            Err(err) => {
                warn!("ReplayMod port:{}, {err}", sess.src_port);
                sess.sm.sess_over = true;
                PacketAction::Stop
            }
        }
    }

    fn proc_auth(
        &mut self,
        sess: &mut SessionCtx<MySqlSession>,
        frame: &mut Frame,
    ) -> PacketAction {
        if !sess.sm.rcv_rep_greet {
            return PacketAction::Stop;
        }
        match self.dispose_auth(sess, frame) {
            Ok(()) => PacketAction::Continue,
            Err(err) => {
                warn!("ReplayMod change auth unsuccessful:{} {err}", sess.src_port);
                sess.sm.sess_over = true;
                PacketAction::Stop
            }
        }
    }

    fn check_needed_for_sec_auth(
        &mut self,
        sess: &mut SessionCtx<MySqlSession>,
        frame: &Frame,
    ) {
        if sess.data.sec_auth_checked {
            return;
        }
        if mysql::is_last_data_packet(frame.payload()) {
            debug!("ReplayMod needs sec auth:{}", sess.src_port);
            sess.data.sec_auth_not_yet_done = true;
        }
        sess.data.sec_auth_checked = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mysql::constants::{PACKET_HEADER_LEN, SCRAMBLE_LENGTH};
    use crate::testutil::{
        client_auth_payload, client_frame, greeting_payload, mysql_payload, RecordingSink,
    };
    use std::cell::Cell;

    const SRC_IP: u32 = 0x0a00_0001;
    const SRC_PORT: u16 = 36000;

    thread_local! {
        static NOW: Cell<u64> = const { Cell::new(100) };
    }

    fn test_clock() -> u64 {
        NOW.with(|now| now.get())
    }

    fn set_now(secs: u64) {
        NOW.with(|now| now.set(secs));
    }

    fn test_scramble() -> [u8; SCRAMBLE_LENGTH] {
        let mut scramble = [0u8; SCRAMBLE_LENGTH];
        for (idx, byte) in scramble.iter_mut().enumerate() {
            *byte = idx as u8 + 1;
        }
        scramble
    }

    fn module(pairs: &str) -> MySqlModule {
        common::log::init_tracing("warn");
        set_now(100);
        let mut module = MySqlModule::new(
            ModuleOptions::default(),
            CredentialStore::load(pairs).unwrap(),
        )
        .with_clock(test_clock);
        module.init().unwrap();
        module
    }

    fn session() -> SessionCtx<MySqlSession> {
        let mut sess = SessionCtx::new(crate::net::session_key(SRC_IP, SRC_PORT), SRC_PORT);
        sess.sm.rcv_rep_greet = true;
        sess
    }

    /// greeting + first auth, straight through the hooks
    fn authenticate(module: &mut MySqlModule, sess: &mut SessionCtx<MySqlSession>) {
        let greet = client_frame(SRC_IP, SRC_PORT, 1, &greeting_payload(&test_scramble()));
        assert_eq!(module.proc_greet(sess, &greet), PacketAction::Continue);

        let mut first_auth = client_frame(
            SRC_IP,
            SRC_PORT,
            100,
            &client_auth_payload(b"root", &[0x5a; 20]),
        );
        assert_eq!(module.proc_auth(sess, &mut first_auth), PacketAction::Continue);
    }

    #[test]
    fn greeting_then_native_password_auth() {
        let mut module = module("root#alice:secret");
        let mut sess = session();
        authenticate(&mut module, &mut sess);

        assert!(sess.data.first_auth_sent);
        assert_eq!(sess.data.scramble, test_scramble());
        assert_eq!(sess.data.user, b"alice");

        let cached = module.cache().peek_first_auth(sess.hash_key).unwrap();
        let parsed = auth::parse_client_auth(&cached.payload()[PACKET_HEADER_LEN..]).unwrap();
        assert_eq!(parsed.username, b"alice");
        assert_eq!(
            parsed.auth_response,
            &auth::native_password_token(b"secret", &test_scramble())[..]
        );
    }

    #[test]
    fn bad_greeting_stops_the_session() {
        let mut module = module("root:secret");
        let mut sess = session();
        let greet = client_frame(SRC_IP, SRC_PORT, 1, &mysql_payload(0, &[9, b'o', b'l', b'd', 0]));
        assert_eq!(module.proc_greet(&mut sess, &greet), PacketAction::Stop);
        assert!(sess.sm.sess_over);
    }

    #[test]
    fn auth_is_ignored_until_the_replayed_greeting() {
        let mut module = module("root:secret");
        let mut sess = session();
        sess.sm.rcv_rep_greet = false;
        let mut first_auth = client_frame(
            SRC_IP,
            SRC_PORT,
            100,
            &client_auth_payload(b"root", &[0x5a; 20]),
        );
        assert_eq!(module.proc_auth(&mut sess, &mut first_auth), PacketAction::Stop);
        assert!(!sess.data.first_auth_sent);
        assert!(!sess.sm.sess_over);
    }

    #[test]
    fn second_auth_triggered_by_eof_marker() {
        let mut module = module("root#alice:secret");
        let mut sess = session();
        authenticate(&mut module, &mut sess);

        let eof = client_frame(SRC_IP, SRC_PORT, 1, &mysql_payload(2, &[0xfe]));
        module.check_needed_for_sec_auth(&mut sess, &eof);
        assert!(sess.data.sec_auth_checked);
        assert!(sess.data.sec_auth_not_yet_done);

        // only the first response is probed
        let ok = client_frame(SRC_IP, SRC_PORT, 2, &mysql_payload(3, &[0x00, 0, 0, 2, 0]));
        module.check_needed_for_sec_auth(&mut sess, &ok);
        assert!(sess.data.sec_auth_not_yet_done);

        let mut second = client_frame(
            SRC_IP,
            SRC_PORT,
            160,
            &mysql_payload(3, b"placehld\0"),
        );
        assert_eq!(module.proc_auth(&mut sess, &mut second), PacketAction::Continue);
        assert!(!sess.data.sec_auth_not_yet_done);

        let seed: [u8; 8] = test_scramble()[..8].try_into().unwrap();
        let expected = auth::scramble_323(b"secret", &seed);
        assert_eq!(
            &second.payload()[PACKET_HEADER_LEN..PACKET_HEADER_LEN + 8],
            &expected[..]
        );
        assert!(module.cache().peek_second_auth(sess.hash_key).is_some());
    }

    #[test]
    fn prepare_then_execute_triggers_renew() {
        let mut module = module("root:secret");
        let mut sess = session();
        authenticate(&mut module, &mut sess);

        let mut body = vec![CommandCode::ComStmtPrepare as u8];
        body.extend_from_slice(b"SELECT ?");
        let prepare = client_frame(SRC_IP, SRC_PORT, 1000, &mysql_payload(0, &body));
        assert_eq!(
            module.check_pack_needed_for_recons(&mut sess, &prepare),
            PacketAction::Continue
        );
        let item = module.cache().prepared(sess.hash_key).unwrap();
        assert_eq!(item.len(), 1);
        assert_eq!(item.total_payload_bytes(), prepare.payload_len() as u32);

        let execute = client_frame(
            SRC_IP,
            SRC_PORT,
            1000 + prepare.payload_len() as u32,
            &mysql_payload(0, &[CommandCode::ComStmtExecute as u8, 1, 0, 0, 0]),
        );
        assert!(module.check_renew_session(&execute));
    }

    #[test]
    fn renew_splices_cached_packets_before_the_live_command() {
        let mut module = module("root:secret");
        let mut sess = session();
        authenticate(&mut module, &mut sess);

        let mut body = vec![CommandCode::ComStmtPrepare as u8];
        body.extend_from_slice(b"SELECT ?");
        let prepare = client_frame(SRC_IP, SRC_PORT, 1000, &mysql_payload(0, &body));
        module.check_pack_needed_for_recons(&mut sess, &prepare);

        let fir_len = module
            .cache()
            .peek_first_auth(sess.hash_key)
            .unwrap()
            .payload_len() as u32;
        let ps_len = prepare.payload_len() as u32;

        let mut live = client_frame(
            SRC_IP,
            SRC_PORT,
            5000,
            &mysql_payload(0, &[CommandCode::ComStmtExecute as u8, 1, 0, 0, 0]),
        );
        assert!(module.check_renew_session(&live));
        let mut sink = RecordingSink::default();
        module
            .prepare_for_renew_session(&mut sess, &mut live, &mut sink)
            .unwrap();

        assert_eq!(live.seq(), 5000 - fir_len - ps_len);
        assert_eq!(sink.frames.len(), 2);
        assert_eq!(sink.frames[0].seq(), live.seq() + 1);
        assert_eq!(sink.frames[1].seq(), live.seq() + 1 + fir_len);
        assert_eq!(sess.data.seq_after_ps, 5000);

        // the host replays on a fresh connection from here on
        sess.sm.fake_syn = true;
        let retransmit = client_frame(SRC_IP, SRC_PORT, 4000, &mysql_payload(0, &[3, b'x']));
        assert_eq!(
            module.check_pack_needed_for_recons(&mut sess, &retransmit),
            PacketAction::Stop
        );
        let fresh = client_frame(SRC_IP, SRC_PORT, 5000, &mysql_payload(0, &[3, b'x']));
        assert_eq!(
            module.check_pack_needed_for_recons(&mut sess, &fresh),
            PacketAction::Continue
        );
    }

    #[test]
    fn command_after_idle_refreshes_cached_buffers() {
        let mut module = module("root:secret");
        let mut sess = session();
        authenticate(&mut module, &mut sess);
        assert_eq!(sess.data.last_refresh_time, 100);

        let old_ptr = module
            .cache()
            .peek_first_auth(sess.hash_key)
            .unwrap()
            .as_bytes()
            .as_ptr();
        let old_bytes = module
            .cache()
            .peek_first_auth(sess.hash_key)
            .unwrap()
            .as_bytes()
            .to_vec();

        set_now(100 + ModuleOptions::default().max_refresh_secs + 1);
        let query = client_frame(SRC_IP, SRC_PORT, 2000, &mysql_payload(0, &[3, b'x']));
        assert_eq!(
            module.check_pack_needed_for_recons(&mut sess, &query),
            PacketAction::Continue
        );
        assert_eq!(
            sess.data.last_refresh_time,
            100 + ModuleOptions::default().max_refresh_secs + 1
        );
        assert_eq!(sess.data.refresh_tick, 1);

        let fir = module.cache().peek_first_auth(sess.hash_key).unwrap();
        assert_ne!(fir.as_bytes().as_ptr(), old_ptr);
        assert_eq!(fir.as_bytes(), &old_bytes[..]);

        // a second command inside the window does not refresh again
        let refreshed_ptr = fir.as_bytes().as_ptr();
        module.check_pack_needed_for_recons(&mut sess, &query);
        assert_eq!(
            module
                .cache()
                .peek_first_auth(sess.hash_key)
                .unwrap()
                .as_bytes()
                .as_ptr(),
            refreshed_ptr
        );
        assert_eq!(sess.data.refresh_tick, 2);
    }

    #[test]
    fn unknown_user_stops_the_session_without_caching() {
        let mut module = module("root:x");
        let mut sess = session();
        let greet = client_frame(SRC_IP, SRC_PORT, 1, &greeting_payload(&test_scramble()));
        module.proc_greet(&mut sess, &greet);

        let mut first_auth = client_frame(
            SRC_IP,
            SRC_PORT,
            100,
            &client_auth_payload(b"ghost", &[0x5a; 20]),
        );
        assert_eq!(module.proc_auth(&mut sess, &mut first_auth), PacketAction::Stop);
        assert!(sess.sm.sess_over);
        assert!(!sess.data.first_auth_sent);
        assert!(!module.cache().contains_first_auth(sess.hash_key));
    }

    #[test]
    fn session_destroy_evicts_every_table() {
        let mut module = module("root:secret");
        let mut sess = session();
        authenticate(&mut module, &mut sess);
        assert!(module.cache().contains_first_auth(sess.hash_key));

        module.on_session_destroy(&mut sess);
        assert!(module.cache().is_empty());
    }

    #[test]
    fn idle_sessions_are_swept() {
        let mut module = module("root:secret");
        let mut sess = session();
        authenticate(&mut module, &mut sess);

        // young entries survive a partial sweep
        module.remove_obsolete_resources(false);
        assert!(module.cache().contains_first_auth(sess.hash_key));

        set_now(100 + ModuleOptions::default().max_idle_secs + 1);
        module.remove_obsolete_resources(false);
        assert!(!module.cache().contains_first_auth(sess.hash_key));
    }

    #[test]
    fn exit_drops_everything() {
        let mut module = module("root:secret");
        let mut sess = session();
        authenticate(&mut module, &mut sess);
        module.exit();
        assert!(module.cache().is_empty());
    }

    #[test]
    fn fake_syn_auth_reuses_the_cached_entry() {
        let mut module = module("root:secret");
        let mut sess = session();
        authenticate(&mut module, &mut sess);
        let cached = module
            .cache()
            .peek_first_auth(sess.hash_key)
            .unwrap()
            .clone();

        // the host re-creates the session on a synthesized connection
        let mut renewed = session();
        renewed.sm.fake_syn = true;
        module.on_session_create(&mut renewed);
        set_now(250);
        authenticate(&mut module, &mut renewed);

        // the cache keeps the original rewritten packet and its cadence
        assert_eq!(
            module.cache().peek_first_auth(renewed.hash_key).unwrap(),
            &cached
        );
        assert_eq!(renewed.data.last_refresh_time, 100);
    }
}
