//! The per-session replay cache: three independent tables keyed by the
//! 64-bit session key.
//!
//! Every stored frame is an owned deep copy; nothing in here aliases
//! capture-side memory. `refresh` re-copies live entries so a long-lived
//! session never pins buffers from an old generation.

use crate::net::Frame;
use crate::protocol::mysql::constants::MAX_SP_SIZE;
use hashbrown::HashMap;
use tracing::info;

#[derive(Debug)]
struct CachedFrame {
    frame: Frame,
    create_time: u64,
    access_time: u64,
}

#[derive(Debug)]
pub struct PreparedPacket {
    /// captured TCP sequence of the PREPARE packet
    pub seq_key: u32,
    frame: Frame,
}

impl PreparedPacket {
    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

#[derive(Debug, Default)]
pub struct PreparedStmts {
    total_payload_bytes: u32,
    packets: Vec<PreparedPacket>,
}

impl PreparedStmts {
    pub fn total_payload_bytes(&self) -> u32 {
        self.total_payload_bytes
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Ascending `seq_key` order.
    pub fn packets(&self) -> impl Iterator<Item = &PreparedPacket> {
        self.packets.iter()
    }
}

#[derive(Debug, Default)]
pub struct ReplayCache {
    first_auth: HashMap<u64, CachedFrame>,
    second_auth: HashMap<u64, CachedFrame>,
    prepared: HashMap<u64, PreparedStmts>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_first_auth(&mut self, key: u64, frame: &Frame, now: u64) {
        self.first_auth.insert(
            key,
            CachedFrame {
                frame: frame.clone(),
                create_time: now,
                access_time: now,
            },
        );
    }

    pub fn cache_second_auth(&mut self, key: u64, frame: &Frame, now: u64) {
        self.second_auth.insert(
            key,
            CachedFrame {
                frame: frame.clone(),
                create_time: now,
                access_time: now,
            },
        );
    }

    /// Lookup that also refreshes the entry's access time, like every read
    /// the sweeper should respect.
    pub fn first_auth(&mut self, key: u64, now: u64) -> Option<&Frame> {
        let entry = self.first_auth.get_mut(&key)?;
        entry.access_time = now;
        Some(&entry.frame)
    }

    pub fn second_auth(&mut self, key: u64, now: u64) -> Option<&Frame> {
        let entry = self.second_auth.get_mut(&key)?;
        entry.access_time = now;
        Some(&entry.frame)
    }

    pub fn contains_first_auth(&self, key: u64) -> bool {
        self.first_auth.contains_key(&key)
    }

    pub fn first_auth_create_time(&self, key: u64) -> Option<u64> {
        self.first_auth.get(&key).map(|entry| entry.create_time)
    }

    /// Read-only peeks that leave the access time alone.
    pub fn peek_first_auth(&self, key: u64) -> Option<&Frame> {
        self.first_auth.get(&key).map(|entry| &entry.frame)
    }

    pub fn peek_second_auth(&self, key: u64) -> Option<&Frame> {
        self.second_auth.get(&key).map(|entry| &entry.frame)
    }

    pub fn prepared(&self, key: u64) -> Option<&PreparedStmts> {
        self.prepared.get(&key)
    }

    /// Append a PREPARE frame at its captured sequence. Returns false when
    /// the per-session cap is hit or the sequence was already cached
    /// (retransmit).
    pub fn push_prepared(&mut self, key: u64, frame: &Frame, tcp_seq: u32) -> bool {
        let item = self.prepared.entry(key).or_default();
        if item.packets.len() >= MAX_SP_SIZE {
            info!("ReplayMod too many prepared stmts for session key:{key}");
            return false;
        }
        match item
            .packets
            .binary_search_by_key(&tcp_seq, |packet| packet.seq_key)
        {
            Ok(_) => false,
            Err(pos) => {
                item.total_payload_bytes += frame.payload_len() as u32;
                item.packets.insert(
                    pos,
                    PreparedPacket {
                        seq_key: tcp_seq,
                        frame: frame.clone(),
                    },
                );
                true
            }
        }
    }

    /// Drop all three tables' entries for `key`.
    pub fn evict(&mut self, key: u64) {
        self.first_auth.remove(&key);
        self.second_auth.remove(&key);
        self.prepared.remove(&key);
    }

    /// Replace every cached buffer for `key` with a fresh deep copy so the
    /// previous generation can be released.
    pub fn refresh(&mut self, key: u64) {
        if let Some(entry) = self.first_auth.get_mut(&key) {
            let fresh = entry.frame.clone();
            entry.frame = fresh;
        }
        if let Some(entry) = self.second_auth.get_mut(&key) {
            let fresh = entry.frame.clone();
            entry.frame = fresh;
        }
        if let Some(item) = self.prepared.get_mut(&key) {
            item.packets = item
                .packets
                .iter()
                .map(|packet| PreparedPacket {
                    seq_key: packet.seq_key,
                    frame: packet.frame.clone(),
                })
                .collect();
        }
    }

    /// Evict every session whose first-auth entry was last touched before
    /// `threshold`; second-auth and prepared entries go with the shared key.
    pub fn sweep(&mut self, threshold: u64) -> usize {
        let stale: Vec<u64> = self
            .first_auth
            .iter()
            .filter(|(_, entry)| entry.access_time < threshold)
            .map(|(&key, _)| key)
            .collect();
        for key in &stale {
            info!("ReplayMod sweep stale session key:{key}, threshold:{threshold}");
            self.evict(*key);
        }
        stale.len()
    }

    pub fn clear(&mut self) {
        self.first_auth.clear();
        self.second_auth.clear();
        self.prepared.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.first_auth.is_empty() && self.second_auth.is_empty() && self.prepared.is_empty()
    }
}
