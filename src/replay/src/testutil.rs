//! Frame and packet builders shared by the unit tests. The host owns frame
//! construction in production; tests have to play host.

use crate::module::PacketSink;
use crate::net::{Frame, ETHERNET_HDR_LEN};
use crate::protocol::mysql::constants::SCRAMBLE_LENGTH;
use byteorder::{BigEndian, ByteOrder};

/// Ethernet + IPv4 + TCP around `payload`, client to server.
pub(crate) fn client_frame(src_ip: u32, src_port: u16, seq: u32, payload: &[u8]) -> Frame {
    let tot_len = 20 + 20 + payload.len();
    let mut bytes = vec![0u8; ETHERNET_HDR_LEN];
    bytes[12] = 0x08; // ethertype ipv4

    let mut ip = [0u8; 20];
    ip[0] = 0x45;
    BigEndian::write_u16(&mut ip[2..4], tot_len as u16);
    ip[8] = 64; // ttl
    ip[9] = 6; // tcp
    BigEndian::write_u32(&mut ip[12..16], src_ip);
    BigEndian::write_u32(&mut ip[16..20], 0x0a00_0063);
    bytes.extend_from_slice(&ip);

    let mut tcp = [0u8; 20];
    BigEndian::write_u16(&mut tcp[0..2], src_port);
    BigEndian::write_u16(&mut tcp[2..4], 3306);
    BigEndian::write_u32(&mut tcp[4..8], seq);
    tcp[12] = 0x50; // doff 5
    tcp[13] = 0x18; // psh|ack
    bytes.extend_from_slice(&tcp);

    bytes.extend_from_slice(payload);
    Frame::from_vec(bytes).unwrap()
}

/// One MySQL packet: 3-byte little-endian length, packet number, body.
pub(crate) fn mysql_payload(number: u8, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + body.len());
    payload.push((body.len() & 0xff) as u8);
    payload.push(((body.len() >> 8) & 0xff) as u8);
    payload.push(((body.len() >> 16) & 0xff) as u8);
    payload.push(number);
    payload.extend_from_slice(body);
    payload
}

pub(crate) fn payload_of_len(len: usize) -> Vec<u8> {
    vec![0u8; len]
}

/// A MySQL 5.x Initial Handshake carrying `scramble`.
pub(crate) fn greeting_payload(scramble: &[u8; SCRAMBLE_LENGTH]) -> Vec<u8> {
    let mut body = vec![0x0a];
    body.extend_from_slice(b"5.7.30\0");
    body.extend_from_slice(&[1, 0, 0, 0]); // thread id
    body.extend_from_slice(&scramble[..8]); // auth-plugin-data-part-1
    body.push(0); // filler
    body.extend_from_slice(&[0xff, 0xff]); // capabilities (low)
    body.push(0x21); // charset
    body.extend_from_slice(&[0x02, 0x00]); // status flags
    body.extend_from_slice(&[0xff, 0x81]); // capabilities (high)
    body.push(21); // auth plugin data length
    body.extend_from_slice(&[0u8; 10]); // reserved
    body.extend_from_slice(&scramble[8..]); // auth-plugin-data-part-2
    body.push(0);
    body.extend_from_slice(b"mysql_native_password\0");
    mysql_payload(0, &body)
}

/// A HandshakeResponse41 with CLIENT_SECURE_CONNECTION framing and a plugin
/// name in the tail.
pub(crate) fn client_auth_payload(user: &[u8], auth_response: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    // LONG_PASSWORD | PROTOCOL_41 | SECURE_CONNECTION | PLUGIN_AUTH
    body.extend_from_slice(&[0x01, 0x82, 0x08, 0x00]);
    body.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]); // max packet len
    body.push(0x21); // collation
    body.extend_from_slice(&[0u8; 23]);
    body.extend_from_slice(user);
    body.push(0);
    body.push(auth_response.len() as u8);
    body.extend_from_slice(auth_response);
    body.extend_from_slice(b"mysql_native_password\0");
    mysql_payload(1, &body)
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    pub frames: Vec<Frame>,
}

impl PacketSink for RecordingSink {
    fn save_pack(&mut self, frame: Frame) {
        self.frames.push(frame);
    }
}
