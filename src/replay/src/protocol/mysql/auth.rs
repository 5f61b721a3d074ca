//! Authentication payload rewriting.
//!
//! The captured client auth packets were computed against the production
//! server's challenge and accounts. Replay substitutes the configured test
//! user and a token recomputed over the test server's scramble, leaving every
//! other field byte-identical.

use crate::error::ProtocolError;
use crate::protocol::mysql;
use crate::protocol::mysql::constants::{
    MAX_PAYLOAD_LEN, PACKET_HEADER_LEN, SCRAMBLE_LENGTH, SEED_323_LENGTH,
};

use byteorder::{ByteOrder, LittleEndian};
use mysql_common::constants::CapabilityFlags;
use sha1::Digest;

pub fn sha1_1(bytes: impl AsRef<[u8]>) -> [u8; 20] {
    sha1::Sha1::digest(bytes).into()
}

pub fn sha1_2(bytes1: impl AsRef<[u8]>, bytes2: impl AsRef<[u8]>) -> [u8; 20] {
    let mut hasher = sha1::Sha1::new();
    hasher.update(bytes1.as_ref());
    hasher.update(bytes2.as_ref());
    hasher.finalize().into()
}

pub fn xor<T, U>(mut left: T, right: U) -> T
where
    T: AsMut<[u8]>,
    U: AsRef<[u8]>,
{
    left.as_mut()
        .iter_mut()
        .zip(right.as_ref().iter())
        .map(|(l, r)| *l ^= r)
        .last();
    left
}

/// `mysql_native_password` token:
/// `SHA1(password) XOR SHA1(scramble + SHA1(SHA1(password)))`.
/// https://mariadb.com/kb/en/connection/#mysql_native_password-plugin
pub fn native_password_token(
    password: &[u8],
    scramble: &[u8; SCRAMBLE_LENGTH],
) -> [u8; SCRAMBLE_LENGTH] {
    let stage1 = sha1_1(password);
    let stage2 = sha1_1(stage1);
    xor(stage1, sha1_2(scramble, stage2))
}

fn hash_323(bytes: &[u8]) -> (u32, u32) {
    let mut nr: u32 = 1345345333;
    let mut add: u32 = 7;
    let mut nr2: u32 = 0x12345671;
    for &byte in bytes {
        if byte == b' ' || byte == b'\t' {
            continue;
        }
        let byte = byte as u32;
        nr ^= (((nr & 63).wrapping_add(add)).wrapping_mul(byte)).wrapping_add(nr << 8);
        nr2 = nr2.wrapping_add((nr2 << 8) ^ nr);
        add = add.wrapping_add(byte);
    }
    (nr & 0x7fff_ffff, nr2 & 0x7fff_ffff)
}

struct Rand323 {
    seed1: u64,
    seed2: u64,
}

impl Rand323 {
    const MAX_VALUE: u64 = 0x3fff_ffff;

    fn new(seed1: u32, seed2: u32) -> Self {
        Self {
            seed1: seed1 as u64 % Self::MAX_VALUE,
            seed2: seed2 as u64 % Self::MAX_VALUE,
        }
    }

    fn next(&mut self) -> f64 {
        self.seed1 = (self.seed1 * 3 + self.seed2) % Self::MAX_VALUE;
        self.seed2 = (self.seed1 + self.seed2 + 33) % Self::MAX_VALUE;
        self.seed1 as f64 / Self::MAX_VALUE as f64
    }
}

/// Pre-4.1 `old_password` response: 8 obfuscated bytes over the first 8
/// challenge bytes. Empty passwords scramble to an all-zero response.
pub fn scramble_323(password: &[u8], seed: &[u8; SEED_323_LENGTH]) -> [u8; SEED_323_LENGTH] {
    let mut out = [0u8; SEED_323_LENGTH];
    if password.is_empty() {
        return out;
    }
    let hashed_password = hash_323(password);
    let hashed_seed = hash_323(seed);
    let mut rng = Rand323::new(
        hashed_password.0 ^ hashed_seed.0,
        hashed_password.1 ^ hashed_seed.1,
    );
    for byte in out.iter_mut() {
        *byte = (rng.next() * 31.0).floor() as u8 + 64;
    }
    let extra = (rng.next() * 31.0).floor() as u8;
    for byte in out.iter_mut() {
        *byte ^= extra;
    }
    out
}

/// Client HandshakeResponse41, split at the two fields the rewrite replaces.
/// The tail (database, auth plugin, connect attributes) is kept as raw bytes
/// and re-emitted verbatim.
#[derive(Debug, PartialEq, Eq)]
pub struct ClientAuth<'a> {
    pub capabilities: CapabilityFlags,
    pub username: &'a [u8],
    pub auth_response: &'a [u8],
    head: &'a [u8],
    tail: &'a [u8],
}

fn lenenc_number(i: &[u8]) -> Option<(usize, u64)> {
    let first = *i.first()?;
    let width = match first {
        0xfc => 2,
        0xfd => 3,
        0xfe => 8,
        0xfb => return None,
        _ => return Some((1, first as u64)),
    };
    if i.len() < 1 + width {
        return None;
    }
    let mut bytes = [0u8; 8];
    bytes[..width].copy_from_slice(&i[1..1 + width]);
    Some((1 + width, u64::from_le_bytes(bytes)))
}

pub fn parse_client_auth(body: &[u8]) -> Result<ClientAuth<'_>, ProtocolError> {
    // caps:4, max packet len:4, collation:1, filler:23
    if body.len() < 32 {
        return Err(ProtocolError::Truncated);
    }
    let capabilities = CapabilityFlags::from_bits_truncate(LittleEndian::read_u32(&body[..4]));
    if !capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
        return Err(ProtocolError::UnsupportedAuthScheme);
    }
    if capabilities.contains(CapabilityFlags::CLIENT_SSL) {
        // TLS-wrapped handshakes are not replayable
        return Err(ProtocolError::UnsupportedAuthScheme);
    }
    let head = &body[..32];
    let rest = &body[32..];

    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(ProtocolError::MalformedAuth)?;
    let username = &rest[..nul];
    let after_user = &rest[nul + 1..];

    let (auth_response, tail) =
        if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA) {
            let (consumed, len) =
                lenenc_number(after_user).ok_or(ProtocolError::MalformedAuth)?;
            let end = consumed + len as usize;
            if after_user.len() < end {
                return Err(ProtocolError::MalformedAuth);
            }
            (&after_user[consumed..end], &after_user[end..])
        } else if capabilities.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
            let len = *after_user.first().ok_or(ProtocolError::MalformedAuth)? as usize;
            if after_user.len() < 1 + len {
                return Err(ProtocolError::MalformedAuth);
            }
            (&after_user[1..1 + len], &after_user[1 + len..])
        } else {
            let nul = after_user
                .iter()
                .position(|&b| b == 0)
                .ok_or(ProtocolError::MalformedAuth)?;
            (&after_user[..nul], &after_user[nul + 1..])
        };

    Ok(ClientAuth {
        capabilities,
        username,
        auth_response,
        head,
        tail,
    })
}

/// The production user name inside a captured client auth payload.
pub fn client_username(payload: &[u8]) -> Result<&[u8], ProtocolError> {
    let body = auth_body(payload)?;
    Ok(parse_client_auth(body)?.username)
}

fn auth_body(payload: &[u8]) -> Result<&[u8], ProtocolError> {
    let len = mysql::packet_len(payload).ok_or(ProtocolError::Truncated)?;
    if payload.len() < PACKET_HEADER_LEN + len {
        return Err(ProtocolError::Truncated);
    }
    Ok(&payload[PACKET_HEADER_LEN..PACKET_HEADER_LEN + len])
}

/// Rebuild a captured first-auth payload with the test user and a
/// `mysql_native_password` token over the test server's scramble. The packet
/// number and every field after the auth response are preserved.
pub fn rewrite_first_auth(
    payload: &[u8],
    user: &[u8],
    password: &[u8],
    scramble: &[u8; SCRAMBLE_LENGTH],
) -> Result<Vec<u8>, ProtocolError> {
    let number = mysql::packet_number(payload).ok_or(ProtocolError::Truncated)?;
    let body = auth_body(payload)?;
    let parsed = parse_client_auth(body)?;
    let lenenc = parsed
        .capabilities
        .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA);
    if !lenenc
        && !parsed
            .capabilities
            .contains(CapabilityFlags::CLIENT_SECURE_CONNECTION)
    {
        // NUL-terminated responses cannot carry a binary token
        return Err(ProtocolError::UnsupportedAuthScheme);
    }

    let mut new_body =
        Vec::with_capacity(parsed.head.len() + user.len() + 2 + SCRAMBLE_LENGTH + parsed.tail.len());
    new_body.extend_from_slice(parsed.head);
    new_body.extend_from_slice(user);
    new_body.push(0);
    if password.is_empty() {
        new_body.push(0);
    } else {
        let token = native_password_token(password, scramble);
        new_body.push(SCRAMBLE_LENGTH as u8);
        new_body.extend_from_slice(&token);
    }
    new_body.extend_from_slice(parsed.tail);

    if new_body.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::RewriteOverflow);
    }
    let mut out = Vec::with_capacity(PACKET_HEADER_LEN + new_body.len());
    out.push((new_body.len() & 0xff) as u8);
    out.push(((new_body.len() >> 8) & 0xff) as u8);
    out.push(((new_body.len() >> 16) & 0xff) as u8);
    out.push(number);
    out.extend_from_slice(&new_body);
    Ok(out)
}

/// Overlay the 8-byte `old_password` response into a second-auth payload in
/// place; the packet length does not change.
pub fn rewrite_second_auth(
    payload: &mut [u8],
    token: &[u8; SEED_323_LENGTH],
) -> Result<(), ProtocolError> {
    if payload.len() < PACKET_HEADER_LEN + SEED_323_LENGTH {
        return Err(ProtocolError::Truncated);
    }
    payload[PACKET_HEADER_LEN..PACKET_HEADER_LEN + SEED_323_LENGTH].copy_from_slice(token);
    Ok(())
}
