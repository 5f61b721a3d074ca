pub mod auth;
pub mod constants;
pub mod greeting;

use constants::{CommandCode, HeaderInfo, PACKET_HEADER_LEN};
use num_traits::FromPrimitive;

/// MySQL framing over a TCP payload: 3-byte little-endian payload length,
/// 1-byte packet number, payload. Command packets carry the command code in
/// payload byte 0.
/// [MySQL Packet](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html)
pub fn packet_len(payload: &[u8]) -> Option<usize> {
    if payload.len() < PACKET_HEADER_LEN {
        return None;
    }
    Some(payload[0] as usize | (payload[1] as usize) << 8 | (payload[2] as usize) << 16)
}

pub fn packet_number(payload: &[u8]) -> Option<u8> {
    if payload.len() < PACKET_HEADER_LEN {
        return None;
    }
    Some(payload[3])
}

pub fn command(payload: &[u8]) -> Option<CommandCode> {
    payload
        .get(PACKET_HEADER_LEN)
        .and_then(|&code| CommandCode::from_u8(code))
}

/// True for the single-byte `0xfe` EOF the server sends after first auth to
/// request the pre-4.1 password exchange.
pub fn is_last_data_packet(payload: &[u8]) -> bool {
    packet_len(payload) == Some(1)
        && payload.get(PACKET_HEADER_LEN) == Some(&(HeaderInfo::EOFHeader as u8))
}
