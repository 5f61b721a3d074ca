//! Server Initial Handshake parsing.
//!
//! The replay side only needs the challenge: the 20-byte scramble feeding the
//! `mysql_native_password` token and its first 8 bytes feeding the pre-4.1
//! exchange. Everything else is skipped in place.
//! See: [Protocol::Handshake](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_packets_protocol_handshake.html)

use crate::error::ProtocolError;
use crate::protocol::mysql;
use crate::protocol::mysql::constants::{
    HeaderInfo, AUTH_PLUGIN_DATA_PART_1_LENGTH, MIN_GREETING_PROTOCOL_VERSION,
    PACKET_HEADER_LEN, SCRAMBLE_LENGTH, SEED_323_LENGTH,
};

use winnow::binary::{le_u16, le_u32, le_u8};
use winnow::prelude::*;
use winnow::token::{literal, take, take_until};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub protocol_version: u8,
    pub server_version: Vec<u8>,
    pub thread_id: u32,
    pub scramble: [u8; SCRAMBLE_LENGTH],
}

impl Greeting {
    /// First 8 challenge bytes, the `old_password` seed.
    pub fn seed323(&self) -> [u8; SEED_323_LENGTH] {
        let mut seed = [0u8; SEED_323_LENGTH];
        seed.copy_from_slice(&self.scramble[..SEED_323_LENGTH]);
        seed
    }
}

fn initial_handshake(i: &[u8]) -> IResult<&[u8], Greeting> {
    let (i, protocol_version) = le_u8.parse_peek(i)?;
    let (i, server_version) = take_until(1.., "\0").parse_peek(i)?;
    let (i, _) = literal(b"\0").parse_peek(i)?;
    let (i, thread_id) = le_u32.parse_peek(i)?;
    let (i, part1) = take(AUTH_PLUGIN_DATA_PART_1_LENGTH).parse_peek(i)?;
    let (i, _filler) = take(1u8).parse_peek(i)?;
    let (i, _capabilities_low) = le_u16.parse_peek(i)?;
    let (i, _charset) = le_u8.parse_peek(i)?;
    let (i, _status_flags) = le_u16.parse_peek(i)?;
    let (i, _capabilities_high) = le_u16.parse_peek(i)?;
    let (i, auth_data_len) = le_u8.parse_peek(i)?;
    let (i, _reserved) = take(10u8).parse_peek(i)?;
    // challenge continuation: max(12, auth_data_len - 9) bytes
    let part2_len = ((auth_data_len as isize) - 9).max(12) as usize;
    let (i, part2) = take(part2_len).parse_peek(i)?;

    let mut scramble = [0u8; SCRAMBLE_LENGTH];
    scramble[..AUTH_PLUGIN_DATA_PART_1_LENGTH].copy_from_slice(part1);
    scramble[AUTH_PLUGIN_DATA_PART_1_LENGTH..]
        .copy_from_slice(&part2[..SCRAMBLE_LENGTH - AUTH_PLUGIN_DATA_PART_1_LENGTH]);

    Ok((
        i,
        Greeting {
            protocol_version,
            server_version: server_version.to_vec(),
            thread_id,
            scramble,
        },
    ))
}

/// Parse the greeting out of a server TCP payload (MySQL header included).
///
/// A `0xff` body means the server refused the connection before handshaking;
/// the error text is surfaced so the operator can see why the test server is
/// unhappy.
pub fn parse_greeting(payload: &[u8]) -> Result<Greeting, ProtocolError> {
    let len = mysql::packet_len(payload).ok_or(ProtocolError::Truncated)?;
    if payload.len() < PACKET_HEADER_LEN + len {
        return Err(ProtocolError::Truncated);
    }
    let body = &payload[PACKET_HEADER_LEN..PACKET_HEADER_LEN + len];
    match body.first() {
        None => Err(ProtocolError::Truncated),
        Some(&v) if v == HeaderInfo::ErrHeader as u8 => {
            Err(ProtocolError::GreetingError(server_error_text(body)))
        }
        Some(&v) if v < MIN_GREETING_PROTOCOL_VERSION => {
            Err(ProtocolError::UnsupportedGreeting(v))
        }
        Some(_) => initial_handshake(body)
            .map(|(_, greeting)| greeting)
            .map_err(|_| ProtocolError::MalformedGreeting),
    }
}

fn server_error_text(body: &[u8]) -> String {
    // 0xff, errno:2, then the message (sqlstate prefix only with 4.1 clients)
    let msg = body.get(3..).unwrap_or_default();
    let msg = if msg.first() == Some(&b'#') && msg.len() >= 6 {
        &msg[6..]
    } else {
        msg
    };
    String::from_utf8_lossy(msg).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{greeting_payload, mysql_payload};

    #[test]
    fn parse_5x_greeting() {
        let mut scramble = [0u8; SCRAMBLE_LENGTH];
        for (idx, byte) in scramble.iter_mut().enumerate() {
            *byte = idx as u8 + 1;
        }
        let payload = greeting_payload(&scramble);
        let greeting = parse_greeting(&payload).unwrap();
        assert_eq!(greeting.protocol_version, 10);
        assert_eq!(greeting.server_version, b"5.7.30");
        assert_eq!(greeting.thread_id, 1);
        assert_eq!(greeting.scramble, scramble);
        let expected_seed323: [u8; SEED_323_LENGTH] = scramble[..8].try_into().unwrap();
        assert_eq!(greeting.seed323(), expected_seed323);
    }

    #[test]
    fn old_protocol_rejected() {
        let payload = mysql_payload(0, &[9, b'3', b'.', b'2', b'3', 0]);
        assert_eq!(
            parse_greeting(&payload),
            Err(ProtocolError::UnsupportedGreeting(9))
        );
    }

    #[test]
    fn error_greeting_carries_server_text() {
        let mut body = vec![0xff, 0x15, 0x04];
        body.extend_from_slice(b"Host '10.0.0.9' is not allowed");
        let payload = mysql_payload(0, &body);
        assert_eq!(
            parse_greeting(&payload),
            Err(ProtocolError::GreetingError(
                "Host '10.0.0.9' is not allowed".to_string()
            ))
        );
    }

    #[test]
    fn truncated_greeting_rejected() {
        let mut scramble = [7u8; SCRAMBLE_LENGTH];
        scramble[0] = 1;
        let mut payload = greeting_payload(&scramble);
        payload.truncate(20);
        // header still claims the full body
        assert_eq!(parse_greeting(&payload), Err(ProtocolError::Truncated));
        assert_eq!(parse_greeting(&[0x01, 0x00]), Err(ProtocolError::Truncated));
    }
}
