//! Captured-frame model.
//!
//! Hooks receive full captured frames (Ethernet + IPv4 + TCP + payload) with
//! every multibyte field in network byte order. The replay cache stores owned
//! deep copies; capture-side memory is only borrowed for the duration of a
//! hook. Checksum recomputation stays with the host's send path.

use crate::error::ModuleError;
use byteorder::{BigEndian, ByteOrder};

pub const ETHERNET_HDR_LEN: usize = 14;
const MIN_IP_HDR_LEN: usize = 20;
const MIN_TCP_HDR_LEN: usize = 20;

/// 64-bit replay key shared by every per-session table.
pub fn session_key(src_ip: u32, src_port: u16) -> u64 {
    ((src_ip as u64) << 16) | src_port as u64
}

/// TCP modular sequence comparison: is `a` before `b`?
pub fn before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// One captured frame, owned. Cloning yields a pointer-disjoint deep copy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn from_vec(bytes: Vec<u8>) -> Result<Self, ModuleError> {
        if bytes.len() < ETHERNET_HDR_LEN + MIN_IP_HDR_LEN + MIN_TCP_HDR_LEN {
            return Err(ModuleError::Frame("frame shorter than eth+ip+tcp"));
        }
        let frame = Frame(bytes);
        let ip_hdr = frame.ip_hdr_len();
        if ip_hdr < MIN_IP_HDR_LEN || frame.0.len() < ETHERNET_HDR_LEN + ip_hdr + MIN_TCP_HDR_LEN {
            return Err(ModuleError::Frame("ip header length inconsistent"));
        }
        let tcp_hdr = frame.tcp_hdr_len();
        if tcp_hdr < MIN_TCP_HDR_LEN {
            return Err(ModuleError::Frame("tcp data offset below 20"));
        }
        let tot_len = frame.tot_len() as usize;
        if tot_len < ip_hdr + tcp_hdr || frame.0.len() < ETHERNET_HDR_LEN + tot_len {
            return Err(ModuleError::Frame("ip total length inconsistent"));
        }
        Ok(frame)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn ip_hdr_len(&self) -> usize {
        ((self.0[ETHERNET_HDR_LEN] & 0x0f) as usize) << 2
    }

    fn tcp_at(&self) -> usize {
        ETHERNET_HDR_LEN + self.ip_hdr_len()
    }

    pub fn tcp_hdr_len(&self) -> usize {
        ((self.0[self.tcp_at() + 12] >> 4) as usize) << 2
    }

    pub fn tot_len(&self) -> u16 {
        BigEndian::read_u16(&self.0[ETHERNET_HDR_LEN + 2..])
    }

    pub fn src_ip(&self) -> u32 {
        BigEndian::read_u32(&self.0[ETHERNET_HDR_LEN + 12..])
    }

    pub fn src_port(&self) -> u16 {
        BigEndian::read_u16(&self.0[self.tcp_at()..])
    }

    pub fn seq(&self) -> u32 {
        BigEndian::read_u32(&self.0[self.tcp_at() + 4..])
    }

    pub fn set_seq(&mut self, seq: u32) {
        let at = self.tcp_at() + 4;
        BigEndian::write_u32(&mut self.0[at..at + 4], seq);
    }

    pub fn session_key(&self) -> u64 {
        session_key(self.src_ip(), self.src_port())
    }

    fn payload_at(&self) -> usize {
        self.tcp_at() + self.tcp_hdr_len()
    }

    pub fn payload_len(&self) -> usize {
        self.tot_len() as usize - self.ip_hdr_len() - self.tcp_hdr_len()
    }

    pub fn payload(&self) -> &[u8] {
        let at = self.payload_at();
        &self.0[at..at + self.payload_len()]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let at = self.payload_at();
        let len = self.payload_len();
        &mut self.0[at..at + len]
    }

    /// Swap the TCP payload, fixing `tot_len`. Fails when the rewritten frame
    /// would not fit a 16-bit IP total length.
    pub fn replace_payload(&mut self, new_payload: &[u8]) -> Result<(), ModuleError> {
        let head = self.payload_at();
        let new_tot = head - ETHERNET_HDR_LEN + new_payload.len();
        if new_tot > u16::MAX as usize {
            return Err(ModuleError::Frame("rewritten payload overflows ip tot_len"));
        }
        self.0.truncate(head);
        self.0.extend_from_slice(new_payload);
        BigEndian::write_u16(
            &mut self.0[ETHERNET_HDR_LEN + 2..ETHERNET_HDR_LEN + 4],
            new_tot as u16,
        );
        Ok(())
    }
}
