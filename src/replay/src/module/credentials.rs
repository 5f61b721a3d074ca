//! Test-server credentials, from the host's `user=` directive.
//!
//! Grammar: `NAME[#MAPPED]:PASS(,NAME[#MAPPED]:PASS)*`. The `#` form presents
//! a different user name to the test server than the one captured in
//! production. Loaded once at module configuration time; lookups afterwards
//! are read-only.

use crate::error::ModuleError;
use crate::protocol::mysql::constants::{MAX_PASSWORD_LEN, MAX_USER_INFO, MAX_USER_LEN};
use hashbrown::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct UserCredential {
    user: Box<[u8]>,
    map_user: Box<[u8]>,
    password: Box<[u8]>,
}

/// 64-bit polynomial hash of a user name (`h ← 31·h + byte`). Distinct users
/// may collide; buckets are confirmed byte-exact.
pub fn user_key(user: &[u8]) -> u64 {
    user.iter()
        .fold(0u64, |key, &byte| key.wrapping_mul(31).wrapping_add(byte as u64))
}

#[derive(Debug, Default)]
pub struct CredentialStore {
    users: HashMap<u64, Vec<UserCredential>>,
}

impl CredentialStore {
    pub fn load(pairs: &str) -> Result<Self, ModuleError> {
        if pairs.len() >= MAX_USER_INFO {
            return Err(ModuleError::Config(
                "user password pairs too long".to_string(),
            ));
        }
        if pairs.len() <= 1 {
            return Err(ModuleError::Config(format!(
                "empty user info: {pairs:?}"
            )));
        }

        let mut store = CredentialStore::default();
        for pair in pairs.split(',') {
            let (name, password) = pair
                .split_once(':')
                .filter(|(name, password)| !name.is_empty() && !password.is_empty())
                .ok_or_else(|| {
                    ModuleError::Config(format!("user without password: {pair:?}"))
                })?;
            let (user, map_user) = match name.split_once('#') {
                Some((user, map_user)) => (user, map_user),
                None => (name, name),
            };
            if user.is_empty() || map_user.is_empty() {
                return Err(ModuleError::Config(format!("empty user name: {pair:?}")));
            }
            if user.len() >= MAX_USER_LEN || map_user.len() >= MAX_USER_LEN {
                return Err(ModuleError::Config(format!("user too long: {user:?}")));
            }
            if password.len() >= MAX_PASSWORD_LEN {
                return Err(ModuleError::Config(format!(
                    "password too long for user: {user:?}"
                )));
            }
            store
                .users
                .entry(user_key(user.as_bytes()))
                .or_default()
                .push(UserCredential {
                    user: user.as_bytes().into(),
                    map_user: map_user.as_bytes().into(),
                    password: password.as_bytes().into(),
                });
        }
        Ok(store)
    }

    fn find(&self, user: &[u8]) -> Option<&UserCredential> {
        self.users
            .get(&user_key(user))?
            .iter()
            .find(|credential| &*credential.user == user)
    }

    pub fn password_of(&self, user: &[u8]) -> Option<&[u8]> {
        self.find(user).map(|credential| &*credential.password)
    }

    /// The name presented to the test server; equals `user` when the pair had
    /// no `#` mapping.
    pub fn mapped_user_of(&self, user: &[u8]) -> Option<&[u8]> {
        self.find(user).map(|credential| &*credential.map_user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_pairs() {
        let store = CredentialStore::load("root:secret,app:hunter2").unwrap();
        assert_eq!(store.password_of(b"root"), Some(&b"secret"[..]));
        assert_eq!(store.mapped_user_of(b"root"), Some(&b"root"[..]));
        assert_eq!(store.password_of(b"app"), Some(&b"hunter2"[..]));
        assert_eq!(store.password_of(b"ghost"), None);
        assert_eq!(store.mapped_user_of(b"ghost"), None);
    }

    #[test]
    fn mapped_pair_in_the_middle_and_at_the_end() {
        // the final pair with '#' behaves exactly like a non-terminal one
        let store = CredentialStore::load("a#b:x,root#alice:secret").unwrap();
        assert_eq!(store.mapped_user_of(b"a"), Some(&b"b"[..]));
        assert_eq!(store.mapped_user_of(b"root"), Some(&b"alice"[..]));
        assert_eq!(store.password_of(b"root"), Some(&b"secret"[..]));
        assert_eq!(store.password_of(b"alice"), None);
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            CredentialStore::load(""),
            Err(ModuleError::Config(_))
        ));
        assert!(matches!(
            CredentialStore::load("x"),
            Err(ModuleError::Config(_))
        ));
        assert!(matches!(
            CredentialStore::load("rootsecret"),
            Err(ModuleError::Config(_))
        ));
        assert!(matches!(
            CredentialStore::load("root:"),
            Err(ModuleError::Config(_))
        ));
        assert!(matches!(
            CredentialStore::load(":secret"),
            Err(ModuleError::Config(_))
        ));
        assert!(matches!(
            CredentialStore::load("a:b,,c:d"),
            Err(ModuleError::Config(_))
        ));
    }

    #[test]
    fn length_boundaries() {
        let user_255 = "u".repeat(255);
        let pass_255 = "p".repeat(255);
        let store = CredentialStore::load(&format!("{user_255}:{pass_255}")).unwrap();
        assert_eq!(
            store.password_of(user_255.as_bytes()),
            Some(pass_255.as_bytes())
        );

        let user_256 = "u".repeat(256);
        assert!(matches!(
            CredentialStore::load(&format!("{user_256}:pw")),
            Err(ModuleError::Config(_))
        ));
        assert!(matches!(
            CredentialStore::load(&format!("u:{}", "p".repeat(256))),
            Err(ModuleError::Config(_))
        ));

        let long = format!("a:{}", "x".repeat(MAX_USER_INFO));
        assert!(matches!(
            CredentialStore::load(&long),
            Err(ModuleError::Config(_))
        ));
    }

    #[test]
    fn polynomial_key() {
        assert_eq!(user_key(b""), 0);
        let expected = b"root"
            .iter()
            .fold(0u64, |k, &b| k.wrapping_mul(31).wrapping_add(b as u64));
        assert_eq!(user_key(b"root"), expected);
        assert_eq!(user_key(b"a"), 97);
        assert_eq!(user_key(b"ab"), 97 * 31 + 98);
    }

    #[test]
    fn colliding_keys_resolved_by_bytes() {
        // "Aa" and "BB" collide under the 31-polynomial
        assert_eq!(user_key(b"Aa"), user_key(b"BB"));
        let store = CredentialStore::load("Aa:first,BB:second").unwrap();
        assert_eq!(store.password_of(b"Aa"), Some(&b"first"[..]));
        assert_eq!(store.password_of(b"BB"), Some(&b"second"[..]));
    }
}
