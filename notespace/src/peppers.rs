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

//! # notespace peppers
//!
//! Passwords are both salted & [peppered]. The salt is generated per-user at signup and lives in
//! the password hash string in the database. The pepper is a server-side secret kept *out* of the
//! database; this module holds the set of peppers the server knows about, each tagged with a
//! version so that they can be rotated.
//!
//! [peppered]: https://cheatsheetseries.owasp.org/cheatsheets/Password_Storage_Cheat_Sheet.html#peppering
//!
//! Peppers are read from the configuration file:
//!
//! ```toml
//! [pepper]
//! "pepper-ver:20250212" = [1, 2, 3, 4, ..., 32] # Peppers must be 32 octets in length
//! "pepper-ver:20250315" = [33, 34, 35, ..., 64]
//! ```
//!
//! The lexicographically greatest version is "current" and is used for new signups. Each user
//! records the version with which they signed-up, so older peppers must stay in the configuration
//! for as long as there are users relying on them.
//!
//! See also module [signing-keys](crate::signing_keys).

use std::fmt::Display;

use lazy_static::lazy_static;
use regex::Regex;
use scylla::{
    cluster::metadata::ColumnType,
    deserialize::{FrameSlice, value::DeserializeValue},
    errors::{DeserializationError, SerializationError, TypeCheckError},
    serialize::{
        value::SerializeValue,
        writers::{CellWriter, WrittenCellProof},
    },
};
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{Backtrace, prelude::*};

use crate::util::{FixedKey, Keyring};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{text} is not a valid pepper version"))]
    BadVersion { text: String, backtrace: Backtrace },
    #[snafu(display("No pepper available"))]
    NoPepper { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        Pepper Versions                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

lazy_static! {
    static ref VERSION: Regex = Regex::new("^pepper-ver:[-a-zA-Z0-9]+$").unwrap(/* known good */);
}

/// Pepper version identifier, of the form "pepper-ver:[-a-zA-Z0-9]+"
///
/// Versions are written down alongside each user's password hash, so they need to round-trip
/// through the database.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(text: &str) -> Result<Version> {
        ensure!(
            VERSION.is_match(text),
            BadVersionSnafu {
                text: text.to_owned()
            }
        );
        Ok(Version(text.to_owned()))
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Version::new(&s).map_err(|err| <D::Error as serde::de::Error>::custom(format!("{}", err)))
    }
}

impl<'frame, 'metadata> DeserializeValue<'frame, 'metadata> for Version {
    fn type_check(typ: &ColumnType<'_>) -> StdResult<(), TypeCheckError> {
        String::type_check(typ)
    }
    fn deserialize(
        typ: &'metadata ColumnType<'metadata>,
        v: Option<FrameSlice<'frame>>,
    ) -> StdResult<Self, DeserializationError> {
        Version::new(&<String as DeserializeValue>::deserialize(typ, v)?)
            .map_err(DeserializationError::new)
    }
}

impl SerializeValue for Version {
    fn serialize<'b>(
        &self,
        typ: &ColumnType<'_>,
        writer: CellWriter<'b>,
    ) -> StdResult<WrittenCellProof<'b>, SerializationError> {
        SerializeValue::serialize(&self.0, typ, writer)
    }
}

pub const PEPPER_LENGTH: usize = 32;

/// A 32-octet secret
pub type Pepper = FixedKey<PEPPER_LENGTH>;

/// The versioned set of peppers known to this server
#[derive(Clone, Debug, Deserialize)]
#[serde(transparent)]
pub struct Peppers(Keyring<Version, Pepper>);

/// Absent configuration, generate a single random pepper versioned by today's date; users created
/// under it won't be able to login after a restart, which is fine for testing.
impl Default for Peppers {
    fn default() -> Self {
        Peppers(Keyring::single(
            Version(chrono::Local::now().format("pepper-ver:%Y%m%d").to_string()),
            Pepper::default(),
        ))
    }
}

impl Peppers {
    /// Retrieve the current (i.e. the most recent) Pepper
    pub fn current_pepper(&self) -> Result<(Version, Pepper)> {
        self.0.current().context(NoPepperSnafu)
    }
    pub fn find_by_version(&self, version: &Version) -> Result<Pepper> {
        self.0.get(version).context(NoPepperSnafu)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_toml() {
        let first = (0..32u8).map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
        let second = (32..64u8).map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
        let text = format!(
            "\"pepper-ver:20250212\" = [{}]\n\"pepper-ver:20250315\" = [{}]\n",
            first, second
        );
        let peppers: Peppers = toml::from_str(&text).unwrap();
        let (version, _) = peppers.current_pepper().unwrap();
        assert_eq!(Version::new("pepper-ver:20250315").unwrap(), version);
        assert!(
            peppers
                .find_by_version(&Version::new("pepper-ver:20250212").unwrap())
                .is_ok()
        );
        assert!(
            peppers
                .find_by_version(&Version::new("pepper-ver:19700101").unwrap())
                .is_err()
        );

        // Too short
        assert!(toml::from_str::<Peppers>("\"pepper-ver:1\" = [1, 2, 3]").is_err());
        // Bad version
        assert!(toml::from_str::<Peppers>(&format!("\"v1\" = [{}]", first)).is_err());
    }
}
