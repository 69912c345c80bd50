// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of notespace.
//
// notespace is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// notespace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with notespace.  If not,
// see <http://www.gnu.org/licenses/>.

//! # notespace signing keys
//!
//! Access tokens are JWTs signed with HMAC-SHA256. Like [peppers](crate::peppers), the keys are
//! secrets read from configuration and versioned so they can be rotated:
//!
//! ```toml
//! [signing-keys]
//! "keyid:20250212" = [1, 2, 3, 4, ..., 64] # Keys must be 64 octets in length
//! "keyid:20250315" = [65, 66, 67,..., 128]
//! ```
//!
//! New tokens are signed with the lexicographically greatest key; the key ID is carried in the
//! token header so that tokens signed with an older key can still be verified until that key is
//! dropped from configuration.

use std::{fmt::Display, str::FromStr};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use snafu::{Backtrace, Snafu, prelude::*};

use crate::util::{FixedKey, Keyring};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to recognize {text} as a KeyId"))]
    KeyId { text: String, backtrace: Backtrace },
    #[snafu(display("No signing key available"))]
    NoKey { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             KeyId                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

lazy_static! {
    static ref KEY_ID: Regex = Regex::new("^keyid:[-0-9a-zA-Z]+$").unwrap(/* known good */);
}

/// Signing key identifier, of the form "keyid:[-0-9a-zA-Z]+"
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct KeyId(String);

impl KeyId {
    pub fn new(s: &str) -> Result<KeyId> {
        ensure!(KEY_ID.is_match(s), KeyIdSnafu { text: s.to_owned() });
        Ok(KeyId(s.to_owned()))
    }
}

impl Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for KeyId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        KeyId::new(s)
    }
}

impl AsRef<str> for KeyId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        KeyId::new(&s).map_err(|err| <D::Error as serde::de::Error>::custom(format!("{}", err)))
    }
}

pub const SIGNING_KEY_LENGTH: usize = 64;

/// A 64-octet HMAC key
pub type SigningKey = FixedKey<SIGNING_KEY_LENGTH>;

#[derive(Clone, Debug, Deserialize)]
#[serde(transparent)]
pub struct SigningKeys(Keyring<KeyId, SigningKey>);

impl SigningKeys {
    /// Retrieve the key with which new tokens should be signed
    pub fn current(&self) -> Result<(KeyId, SigningKey)> {
        self.0.current().context(NoKeySnafu)
    }
    pub fn find_by_id(&self, keyid: &KeyId) -> Result<SigningKey> {
        self.0.get(keyid).context(NoKeySnafu)
    }
}

impl Default for SigningKeys {
    fn default() -> Self {
        SigningKeys(Keyring::single(
            KeyId(chrono::Local::now().format("keyid:%Y%m%d").to_string()),
            SigningKey::default(),
        ))
    }
}

impl<const N: usize> From<[(KeyId, SigningKey); N]> for SigningKeys {
    fn from(value: [(KeyId, SigningKey); N]) -> Self {
        SigningKeys(Keyring::from(value))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn key_ids() {
        assert!(KeyId::new("keyid:20250212").is_ok());
        assert!(KeyId::new("keyid:").is_err());
        assert!(KeyId::new("20250212").is_err());
    }

    #[test]
    fn rotation() {
        let keys = SigningKeys::from([
            (KeyId::new("keyid:a").unwrap(), SigningKey::default()),
            (KeyId::new("keyid:b").unwrap(), SigningKey::default()),
        ]);
        assert_eq!(KeyId::new("keyid:b").unwrap(), keys.current().unwrap().0);
        assert!(keys.find_by_id(&KeyId::new("keyid:a").unwrap()).is_ok());
        assert!(keys.find_by_id(&KeyId::new("keyid:c").unwrap()).is_err());
        assert!(SigningKey::new(vec![0u8; 32]).is_err());
    }
}
