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

//! # util
//!
//! Odds & ends that don't belong anywhere else: a strict two-element destructuring of an iterator
//! (used when picking apart `Authorization` headers), a secret byte-string type for keys read out
//! of configuration, the rotating sets in which such keys are kept, and database credentials that
//! can be given on the command line.

use std::{collections::BTreeMap, fmt::Display, ops::Deref};

use either::Either;
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use serde::{Deserialize, Deserializer};
use serde_bytes::ByteBuf;
use snafu::prelude::*;
use tap::{Conv, Pipe};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          exactly_two                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Returned by [exactly_two] when the iterator didn't yield precisely two items
#[derive(Debug)]
pub struct ExactlyTwoError<T: std::iter::Iterator> {
    // `None` means "nothing at all"; `Left` means "just one"; `Right` holds the first three
    #[allow(clippy::type_complexity)]
    found: Option<Either<T::Item, (T::Item, T::Item, T::Item)>>,
}

impl<T: std::iter::Iterator> ExactlyTwoError<T> {
    /// How many items we saw before giving up (three means "three or more")
    pub fn count(&self) -> usize {
        match &self.found {
            None => 0,
            Some(Either::Left(_)) => 1,
            Some(Either::Right(_)) => 3,
        }
    }
}

impl<T: std::iter::Iterator> Display for ExactlyTwoError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.count() {
            0 => write!(f, "expected two elements; found none"),
            1 => write!(f, "expected two elements; found one"),
            _ => write!(f, "expected two elements; found three or more"),
        }
    }
}

/// Pull exactly two items out of `iter`, failing if it yields fewer or more
pub fn exactly_two<T>(mut iter: T) -> std::result::Result<(T::Item, T::Item), ExactlyTwoError<T>>
where
    T: std::iter::Iterator,
{
    let first = match iter.next() {
        Some(first) => first,
        None => return Err(ExactlyTwoError { found: None }),
    };
    let second = match iter.next() {
        Some(second) => second,
        None => {
            return Err(ExactlyTwoError {
                found: Some(Either::Left(first)),
            });
        }
    };
    match iter.next() {
        Some(third) => Err(ExactlyTwoError {
            found: Some(Either::Right((first, second, third))),
        }),
        None => Ok((first, second)),
    }
}

#[cfg(test)]
mod exactly_two_tests {
    use super::*;

    #[test]
    fn two_and_only_two() {
        assert_eq!(("Bearer", "abc"), exactly_two("Bearer abc".split(' ')).unwrap());
        assert_eq!(1, exactly_two("Bearer".split(' ')).unwrap_err().count());
        assert_eq!(3, exactly_two("a b c d".split(' ')).unwrap_err().count());
        assert_eq!(0, exactly_two(std::iter::empty::<u8>()).unwrap_err().count());
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Key                                               //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Secret key material
///
/// Peppers & signing keys are both written in configuration as arrays of octets; [Key] is just a
/// [SecretSlice] that knows how to deserialize itself from such an array.
#[derive(Clone, Debug)]
pub struct Key(SecretSlice<u8>);

impl Key {
    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }
    /// Fill a new [Key] of `len` octets from the OS RNG
    pub fn random(len: usize) -> Key {
        use rand::RngCore;
        let mut bytes: Vec<u8> = vec![0; len];
        password_hash::rand_core::OsRng.fill_bytes(&mut bytes);
        bytes.into()
    }
}

impl Deref for Key {
    type Target = SecretSlice<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        <ByteBuf as serde::Deserialize>::deserialize(deserializer)?
            .into_vec()
            .conv::<SecretSlice<u8>>()
            .pipe(Key)
            .pipe(Ok)
    }
}

impl From<Vec<u8>> for Key {
    fn from(value: Vec<u8>) -> Self {
        Key(value.into())
    }
}

/// Key material of a length that was wrong for its purpose
#[derive(Debug, Snafu)]
#[snafu(display("Expected {expected} octets of key material; got {len}"))]
pub struct KeyLengthError {
    expected: usize,
    len: usize,
}

/// A [Key] known to be exactly `N` octets long
#[derive(Clone, Debug)]
pub struct FixedKey<const N: usize>(Key);

impl<const N: usize> FixedKey<N> {
    pub fn new(key: impl Into<Key>) -> std::result::Result<FixedKey<N>, KeyLengthError> {
        let key = key.into();
        ensure!(
            key.len() == N,
            KeyLengthSnafu {
                expected: N,
                len: key.len()
            }
        );
        Ok(FixedKey(key))
    }
    pub fn expose_secret(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

/// A fresh, random key; only suitable when nothing outlives the process
impl<const N: usize> Default for FixedKey<N> {
    fn default() -> Self {
        FixedKey(Key::random(N))
    }
}

impl<'de, const N: usize> Deserialize<'de> for FixedKey<N> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        FixedKey::new(Key::deserialize(deserializer)?)
            .map_err(|err| <D::Error as serde::de::Error>::custom(format!("{}", err)))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Keyring                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Secrets indexed by version
///
/// Rotation works by adding a secret under a version that sorts after every existing one; the
/// greatest version is "current". Configuration spells a [Keyring] as a table mapping versions to
/// octet arrays.
#[derive(Clone, Debug, Deserialize)]
#[serde(
    transparent,
    bound(deserialize = "V: Deserialize<'de> + Ord, S: Deserialize<'de>")
)]
pub struct Keyring<V, S>(BTreeMap<V, S>);

impl<V: Clone + Ord, S: Clone> Keyring<V, S> {
    /// A keyring holding just the one secret
    pub fn single(version: V, secret: S) -> Keyring<V, S> {
        Keyring(BTreeMap::from([(version, secret)]))
    }
    /// The current version & its secret, if there are any at all
    pub fn current(&self) -> Option<(V, S)> {
        self.0
            .last_key_value()
            .map(|(version, secret)| (version.clone(), secret.clone()))
    }
    pub fn get(&self, version: &V) -> Option<S> {
        self.0.get(version).cloned()
    }
}

impl<V: Ord, S, const N: usize> From<[(V, S); N]> for Keyring<V, S> {
    fn from(value: [(V, S); N]) -> Self {
        Keyring(BTreeMap::from(value))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Credentials                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Database credentials: a username & password, given on the command line as "user,password"
#[derive(Clone, Debug, Deserialize)]
pub struct Credentials(pub (SecretString, SecretString));

impl Credentials {
    pub fn username(&self) -> &str {
        self.0.0.expose_secret()
    }
    pub fn password(&self) -> &str {
        self.0.1.expose_secret()
    }
}

impl clap::builder::ValueParserFactory for Credentials {
    type Parser = CredentialsParser;

    fn value_parser() -> Self::Parser {
        CredentialsParser
    }
}

#[derive(Clone, Debug)]
pub struct CredentialsParser;

impl clap::builder::TypedValueParser for CredentialsParser {
    type Value = Credentials;

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> std::result::Result<Self::Value, clap::Error> {
        use clap::error::ErrorKind;
        let (user, pass) = value
            .to_str()
            .ok_or(clap::Error::new(ErrorKind::InvalidUtf8))?
            .split(',')
            .pipe(exactly_two)
            .map_err(|_| clap::Error::new(ErrorKind::WrongNumberOfValues))?;
        Ok(Credentials((user.into(), pass.into())))
    }
}

#[cfg(test)]
mod keyring_tests {
    use super::*;

    #[test]
    fn fixed_length() {
        assert!(FixedKey::<4>::new(vec![1u8, 2, 3, 4]).is_ok());
        let err = FixedKey::<4>::new(vec![1u8, 2, 3]).unwrap_err();
        assert_eq!("Expected 4 octets of key material; got 3", format!("{}", err));
        assert_eq!(16, FixedKey::<16>::default().expose_secret().len());
    }

    #[test]
    fn greatest_version_is_current() {
        let ring: Keyring<String, FixedKey<2>> =
            toml::from_str("b = [3, 4]\na = [1, 2]\n").unwrap();
        let (version, key) = ring.current().unwrap();
        assert_eq!("b", version);
        assert_eq!(&[3, 4], key.expose_secret());
        assert_eq!(&[1, 2], ring.get(&"a".to_owned()).unwrap().expose_secret());
        assert!(ring.get(&"c".to_owned()).is_none());
        assert!(toml::from_str::<Keyring<String, FixedKey<2>>>("a = [1]").is_err());
    }
}
