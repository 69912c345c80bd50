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

//! # notespace models
//!
//! ## Introduction
//!
//! I hate these sort of "catch-all" modules named "models" or "entities", but these types are truly
//! foundational: users, the files they upload, and everything that hangs off of a file (comments,
//! ratings, bookmarks) or gathers files together (spaces).
//!
//! Most of the textual types below are refined: they can only be constructed through a checking
//! constructor, and their [Deserialize] implementations (serde & ScyllaDB both) run the same
//! checks, so a [Subject] in hand is a legit subject.

use std::{collections::HashSet, fmt::Display, ops::Deref, str::FromStr};

use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use chrono::{DateTime, Utc};
use email_address::EmailAddress;
use lazy_static::lazy_static;
use password_hash::{PasswordHashString, SaltString, rand_core::OsRng};
use regex::Regex;
use scylla::{
    DeserializeRow,
    cluster::metadata::{ColumnType, NativeType},
    deserialize::{FrameSlice, value::DeserializeValue},
    errors::{DeserializationError, SerializationError, TypeCheckError},
    serialize::{
        value::SerializeValue,
        writers::{CellWriter, WrittenCellProof},
    },
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use snafu::{Backtrace, IntoError, prelude::*};
use tap::Pipe;
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;
use url::Url;
use uuid::Uuid;
use zxcvbn::{Score as Strength, feedback::Feedback, zxcvbn};

use crate::peppers::{self, Pepper, Peppers, Version as PepperVersion};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "Comments must be 1 to {MAX_COMMENT_LENGTH} characters once trimmed; got {chars}"
    ))]
    BadComment { chars: usize, backtrace: Backtrace },
    #[snafu(display("{text} is not a valid document URL"))]
    BadDocUrl { text: String, backtrace: Backtrace },
    #[snafu(display("{email} is not a valid e-mail address"))]
    BadEmail { email: String, backtrace: Backtrace },
    #[snafu(display("{text} is not a valid file name"))]
    BadFilename { text: String, backtrace: Backtrace },
    #[snafu(display("Incorrect password"))]
    BadPassword { backtrace: Backtrace },
    #[snafu(display("{score} is not a valid score; scores run from one to five"))]
    BadScore { score: i64, backtrace: Backtrace },
    #[snafu(display("{text} is not a valid space name"))]
    BadSpaceName { text: String, backtrace: Backtrace },
    #[snafu(display("{text} is not a valid subject"))]
    BadSubject { text: String, backtrace: Backtrace },
    #[snafu(display("{name} is not a valid notespace username"))]
    BadUsername { name: String },
    #[snafu(display("Failed to check the password for {username}: {source}"))]
    CheckPassword {
        username: Username,
        source: password_hash::errors::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("{col_name} expected type {expected:?}; got {actual:?}"))]
    ColumnTypeMismatch {
        col_name: String,
        actual: ColumnType<'static>,
        expected: ColumnType<'static>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to parse {text} as an URL: {source}"))]
    DocUrlParse {
        text: String,
        source: url::ParseError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to hash password: {source}"))]
    HashPassword {
        source: password_hash::errors::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Bad hash string: {source}"))]
    HashString {
        source: password_hash::errors::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to build an Argon2id password hasher: {source}"))]
    Hasher {
        source: argon2::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("No pepper found for user {username}: {source}"))]
    NoPepper {
        username: Username,
        source: peppers::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Password doesn't have enough entropy: {feedback}"))]
    PasswordEntropy {
        feedback: Feedback,
        backtrace: Backtrace,
    },
    #[snafu(display("Passwords may not begin or end in whitespace"))]
    PasswordWhitespace { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

// We start with a series of newtype structs to both refine native types & to allow me to work
// around Rust's orphaned trait rules and implement traits not defined by this crate
// (`DeserializeValue`, `SerializeValue`) on types not defined in this crate.

macro_rules! native_type_check {
    ($var_name:ident, $native_type:ident, $err_type:ty, $column_name:expr) => {
        ($var_name == &ColumnType::Native(NativeType::$native_type))
            .then_some(())
            .ok_or(<$err_type>::new(
                ColumnTypeMismatchSnafu {
                    col_name: $column_name.to_owned(),
                    actual: $var_name.clone().into_owned(),
                    expected: ColumnType::Native(NativeType::$native_type),
                }
                .build(),
            ))
    };
}

pub(crate) fn mk_de_err(err: impl std::error::Error + Send + Sync + 'static) -> DeserializationError {
    DeserializationError::new(err)
}

pub(crate) fn mk_ser_err(err: impl std::error::Error + Send + Sync + 'static) -> SerializationError {
    SerializationError::new(err)
}

fn mk_serde_de_err<'de, D: serde::Deserializer<'de>>(err: impl std::error::Error) -> D::Error {
    <D::Error as serde::de::Error>::custom(format!("{}", err))
}

/// Implement the boilerplate for a refined string newtype: [AsRef], [Deref], [Display],
/// [FromStr], serde [Deserialize] (via [TryFrom]) and the ScyllaDB value traits. The type must
/// provide `TryFrom<String, Error = Error>` and `fn new(&str) -> Result<Self>`.
macro_rules! refined_text {
    ($type_name:ident) => {
        impl AsRef<str> for $type_name {
            fn as_ref(&self) -> &str {
                self.deref()
            }
        }
        impl Deref for $type_name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
        impl Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
        impl FromStr for $type_name {
            type Err = Error;

            fn from_str(s: &str) -> StdResult<Self, Self::Err> {
                $type_name::new(s)
            }
        }
        impl<'de> Deserialize<'de> for $type_name {
            fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                $type_name::try_from(s).map_err(mk_serde_de_err::<'de, D>)
            }
        }
        impl<'frame, 'metadata> DeserializeValue<'frame, 'metadata> for $type_name {
            fn type_check(typ: &ColumnType<'_>) -> StdResult<(), TypeCheckError> {
                String::type_check(typ)
            }
            fn deserialize(
                typ: &'metadata ColumnType<'metadata>,
                v: Option<FrameSlice<'frame>>,
            ) -> StdResult<Self, DeserializationError> {
                $type_name::try_from(<String as DeserializeValue>::deserialize(typ, v)?)
                    .map_err(mk_de_err)
            }
        }
        impl SerializeValue for $type_name {
            fn serialize<'b>(
                &self,
                typ: &ColumnType<'_>,
                writer: CellWriter<'b>,
            ) -> StdResult<WrittenCellProof<'b>, SerializationError> {
                SerializeValue::serialize(&self.0, typ, writer)
            }
        }
    };
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Identifiers                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Use this to declare a type intended to be used as an opaque identifier for some other sort of
/// entity.
///
/// In a NoSQL world, we can't count on an auto-increment column in our tables to serve as an
/// opaque identifier; it is up to the application to assign its own ids, and a v4 UUID is the
/// usual answer. I could have just used [Uuid] everywhere, but I can't bring myself to use the
/// same type to identify users, files & spaces all at the same time.
///
/// The macro defines a newtype struct wrapping [Uuid] implementing [Display], [FromStr],
/// [DeserializeValue] and [SerializeValue]; the default value is a fresh, random id.
macro_rules! define_id {
    ($type_name:ident) => {
        #[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
        #[serde(transparent)]
        pub struct $type_name(Uuid);
        impl $type_name {
            pub fn new() -> $type_name {
                $type_name(Uuid::new_v4())
            }
        }
        impl Default for $type_name {
            fn default() -> Self {
                Self::new()
            }
        }
        impl Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.as_hyphenated())
            }
        }
        impl FromStr for $type_name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> StdResult<Self, Self::Err> {
                Ok($type_name(Uuid::parse_str(s)?))
            }
        }
        impl AsRef<Uuid> for $type_name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }
        impl From<Uuid> for $type_name {
            fn from(value: Uuid) -> Self {
                $type_name(value)
            }
        }
        // Arggghhhh... the derive macro doesn't work with newtype structs.
        impl<'frame, 'metadata> DeserializeValue<'frame, 'metadata> for $type_name {
            fn type_check(typ: &ColumnType<'_>) -> StdResult<(), TypeCheckError> {
                Uuid::type_check(typ)
            }
            fn deserialize(
                typ: &'metadata ColumnType<'metadata>,
                v: Option<FrameSlice<'frame>>,
            ) -> StdResult<Self, DeserializationError> {
                Ok(Self(<Uuid as DeserializeValue>::deserialize(typ, v)?))
            }
        }
        impl SerializeValue for $type_name {
            fn serialize<'b>(
                &self,
                typ: &ColumnType<'_>,
                writer: CellWriter<'b>,
            ) -> StdResult<WrittenCellProof<'b>, SerializationError> {
                SerializeValue::serialize(&self.0, typ, writer)
            }
        }
    };
}

define_id!(UserId);
define_id!(FileId);
define_id!(CommentId);
define_id!(SpaceId);
define_id!(DocLinkId);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Username                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

// notespace usernames must be ASCII, may be from five to sixty-four chacacters in length, and
// must match the regex "^[a-zA-Z][-_.a-zA-Z0-9]+$".
const MIN_USERNAME_LENGTH: usize = 5;
const MAX_USERNAME_LENGTH: usize = 64;

lazy_static! {
    static ref USERNAME: Regex = Regex::new("^[a-zA-Z][-_.a-zA-Z0-9]+$").unwrap(/* known good */);
    // These collide with path segments under `/users`
    static ref BANNED_USERNAMES: HashSet<&'static str> = HashSet::from(["login", "signup", "me"]);
}

fn check_username(s: &str) -> bool {
    s.is_ascii()
        && s.len() >= MIN_USERNAME_LENGTH
        && s.len() <= MAX_USERNAME_LENGTH
        && USERNAME.is_match(s)
        && (!BANNED_USERNAMES.contains(s))
}

/// A refined type representing a notespace username
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    /// Construct a [Username] from a `&str`
    ///
    /// To *move* a [String] into a [Username] (with validity checking) use [TryFrom::try_from()]
    pub fn new(name: &str) -> Result<Username> {
        check_username(name)
            .then_some(Username(name.to_owned()))
            .ok_or(
                BadUsernameSnafu {
                    name: name.to_owned(),
                }
                .build(),
            )
    }
}

impl TryFrom<String> for Username {
    type Error = Error;

    fn try_from(name: String) -> StdResult<Self, Self::Error> {
        if check_username(&name) {
            Ok(Username(name))
        } else {
            BadUsernameSnafu { name }.fail()
        }
    }
}

refined_text!(Username);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           UserEmail                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A refined type representing an e-mail address
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct UserEmail(String);

impl UserEmail {
    pub fn new(email: &str) -> Result<UserEmail> {
        EmailAddress::is_valid(email)
            .then_some(UserEmail(email.to_string()))
            .context(BadEmailSnafu {
                email: email.to_string(),
            })
    }
}

impl TryFrom<String> for UserEmail {
    type Error = Error;

    fn try_from(email: String) -> StdResult<Self, Self::Error> {
        if EmailAddress::is_valid(&email) {
            Ok(UserEmail(email))
        } else {
            BadEmailSnafu { email }.fail()
        }
    }
}

refined_text!(UserEmail);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Subject                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

const MAX_SUBJECT_LENGTH: usize = 64;

fn check_subject(s: &str) -> bool {
    [
        !s.is_empty(),
        UnicodeSegmentation::graphemes(s, true).count() <= MAX_SUBJECT_LENGTH,
        s.trim() == s,
        !s.contains(','),
    ]
    .into_iter()
    .all(|x| x)
}

/// The subject under which a file is filed ("Linear Algebra", "CS-101", "recipes", ...)
///
/// Subjects may be up to sixty-four graphemes in length, may contain interior whitespace but may
/// not begin or end with it, and may not contain commas (so that a list of them can be given in a
/// query string). Subjects are case-sensitive.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    /// Correct-by-construction [Subject] constructor
    pub fn new(text: &str) -> Result<Subject> {
        check_subject(text).then_some(Subject(text.to_string())).ok_or(
            BadSubjectSnafu {
                text: text.to_string(),
            }
            .build(),
        )
    }
}

impl TryFrom<String> for Subject {
    type Error = Error;

    fn try_from(text: String) -> StdResult<Self, Self::Error> {
        if check_subject(&text) {
            Ok(Subject(text))
        } else {
            BadSubjectSnafu { text }.fail()
        }
    }
}

refined_text!(Subject);

#[cfg(test)]
mod subject_tests {
    use super::*;

    #[test]
    fn subjects() {
        assert!(Subject::new("Linear Algebra").is_ok());
        assert!(Subject::new("数学").is_ok());
        assert!(Subject::new("").is_err());
        assert!(Subject::new(" padded").is_err());
        assert!(Subject::new("a,b").is_err());
        assert!(Subject::new(&"x".repeat(65)).is_err());

        let s: StdResult<Subject, _> = serde_json::from_str("\"CS-101\"");
        assert!(s.is_ok());
        let s: StdResult<Subject, _> = serde_json::from_str("\"trailing \"");
        assert!(s.is_err());
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           SpaceName                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

const MAX_SPACE_NAME_LENGTH: usize = 128;

fn check_space_name(s: &str) -> bool {
    !s.trim().is_empty() && UnicodeSegmentation::graphemes(s, true).count() <= MAX_SPACE_NAME_LENGTH
}

/// The name of a [Space]; free text, but neither blank nor absurdly long
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct SpaceName(String);

impl SpaceName {
    pub fn new(text: &str) -> Result<SpaceName> {
        check_space_name(text)
            .then_some(SpaceName(text.to_string()))
            .ok_or(
                BadSpaceNameSnafu {
                    text: text.to_string(),
                }
                .build(),
            )
    }
}

impl TryFrom<String> for SpaceName {
    type Error = Error;

    fn try_from(text: String) -> StdResult<Self, Self::Error> {
        if check_space_name(&text) {
            Ok(SpaceName(text))
        } else {
            BadSpaceNameSnafu { text }.fail()
        }
    }
}

refined_text!(SpaceName);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Filename                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

const MAX_FILENAME_LENGTH: usize = 255;

fn check_filename(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_FILENAME_LENGTH
        && !s.contains(['/', '\\', '\0'])
        && s != "."
        && s != ".."
}

/// The name under which an uploaded file was submitted
///
/// This is only ever used to label the download (it never names anything on disk), but since it
/// winds-up in a `Content-Disposition` header, path separators & NULs are rejected.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Filename(String);

impl Filename {
    pub fn new(text: &str) -> Result<Filename> {
        check_filename(text)
            .then_some(Filename(text.to_string()))
            .ok_or(
                BadFilenameSnafu {
                    text: text.to_string(),
                }
                .build(),
            )
    }
}

impl TryFrom<String> for Filename {
    type Error = Error;

    fn try_from(text: String) -> StdResult<Self, Self::Error> {
        if check_filename(&text) {
            Ok(Filename(text))
        } else {
            BadFilenameSnafu { text }.fail()
        }
    }
}

refined_text!(Filename);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          CommentText                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

const MAX_COMMENT_LENGTH: usize = 4096;


/// Comment text
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CommentText(String);

impl CommentText {
    /// Leading & trailing whitespace is trimmed
    pub fn new(text: &str) -> Result<CommentText> {
        let text = text.trim();
        let chars = text.chars().count();
        ensure!(
            (1..=MAX_COMMENT_LENGTH).contains(&chars),
            BadCommentSnafu { chars }
        );
        Ok(CommentText(text.to_string()))
    }
}

impl TryFrom<String> for CommentText {
    type Error = Error;

    fn try_from(text: String) -> StdResult<Self, Self::Error> {
        CommentText::new(&text)
    }
}

refined_text!(CommentText);

#[cfg(test)]
mod comment_tests {
    use super::*;

    #[test]
    fn comment_lengths() {
        let longest = "x".repeat(MAX_COMMENT_LENGTH);
        let padded = format!("  {}\n\t", longest);
        assert_eq!(longest, CommentText::new(&padded).unwrap().to_string());
        let err = CommentText::new(&format!("{}x", longest)).unwrap_err();
        assert_eq!(
            "Comments must be 1 to 4096 characters once trimmed; got 4097",
            format!("{}", err)
        );
        assert!(CommentText::new(" \n ").is_err());
        // Characters, not octets
        assert!(CommentText::new(&"é".repeat(MAX_COMMENT_LENGTH)).is_ok());
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             DocUrl                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An external document (a shared Google Doc, say) linked into a [Space]
///
/// Only absolute http & https URLs are accepted.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct DocUrl(Url);

impl DocUrl {
    pub fn new(text: &str) -> Result<DocUrl> {
        let url = Url::parse(text).context(DocUrlParseSnafu {
            text: text.to_owned(),
        })?;
        ensure!(
            matches!(url.scheme(), "http" | "https") && url.has_host(),
            BadDocUrlSnafu {
                text: text.to_owned()
            }
        );
        Ok(DocUrl(url))
    }
}

impl Deref for DocUrl {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.0.as_str()
    }
}

impl Display for DocUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DocUrl {
    type Error = Error;

    fn try_from(text: String) -> StdResult<Self, Self::Error> {
        DocUrl::new(&text)
    }
}

impl<'de> Deserialize<'de> for DocUrl {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        DocUrl::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl<'frame, 'metadata> DeserializeValue<'frame, 'metadata> for DocUrl {
    fn type_check(typ: &ColumnType<'_>) -> StdResult<(), TypeCheckError> {
        String::type_check(typ)
    }
    fn deserialize(
        typ: &'metadata ColumnType<'metadata>,
        v: Option<FrameSlice<'frame>>,
    ) -> StdResult<Self, DeserializationError> {
        DocUrl::try_from(<String as DeserializeValue>::deserialize(typ, v)?).map_err(mk_de_err)
    }
}

impl SerializeValue for DocUrl {
    fn serialize<'b>(
        &self,
        typ: &ColumnType<'_>,
        writer: CellWriter<'b>,
    ) -> StdResult<WrittenCellProof<'b>, SerializationError> {
        SerializeValue::serialize(&self.0.as_str(), typ, writer)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Score                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A rating: one to five, inclusive
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Score(i32);

impl Score {
    pub fn new(score: i64) -> Result<Score> {
        (1..=5)
            .contains(&score)
            .then_some(Score(score as i32))
            .context(BadScoreSnafu { score })
    }
    pub fn value(&self) -> i32 {
        self.0
    }
}

impl<'de> Deserialize<'de> for Score {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        <i64 as serde::Deserialize>::deserialize(deserializer)?
            .pipe(Score::new)
            .map_err(mk_serde_de_err::<'de, D>)
    }
}

impl<'frame, 'metadata> DeserializeValue<'frame, 'metadata> for Score {
    fn type_check(typ: &ColumnType<'_>) -> StdResult<(), TypeCheckError> {
        native_type_check!(typ, Int, TypeCheckError, "score")
    }
    fn deserialize(
        typ: &'metadata ColumnType<'metadata>,
        v: Option<FrameSlice<'frame>>,
    ) -> StdResult<Self, DeserializationError> {
        Score::new(<i32 as DeserializeValue>::deserialize(typ, v)? as i64).map_err(mk_de_err)
    }
}

impl SerializeValue for Score {
    fn serialize<'b>(
        &self,
        typ: &ColumnType<'_>,
        writer: CellWriter<'b>,
    ) -> StdResult<WrittenCellProof<'b>, SerializationError> {
        SerializeValue::serialize(&self.0, typ, writer)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         UserHashString                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Newtype idiom to work around Rust's orphaned trait rule
///
/// I've chosen to serialize the hash string as a [PasswordHashString], rather than a
/// [PasswordHash], since the latter doesn't support serde.
#[derive(Clone, Debug, PartialEq)]
pub struct UserHashString(PasswordHashString);

impl UserHashString {
    pub fn password_hash(&self) -> PasswordHash<'_> {
        self.0.password_hash()
    }
}

impl Serialize for UserHashString {
    fn serialize<S>(&self, serializer: S) -> StdResult<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.0.as_str())
    }
}

impl<'de> Deserialize<'de> for UserHashString {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        UserHashString::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl<'frame, 'metadata> DeserializeValue<'frame, 'metadata> for UserHashString {
    fn type_check(typ: &ColumnType<'_>) -> StdResult<(), TypeCheckError> {
        String::type_check(typ)
    }
    fn deserialize(
        typ: &'metadata ColumnType<'metadata>,
        v: Option<FrameSlice<'frame>>,
    ) -> StdResult<Self, DeserializationError> {
        UserHashString::try_from(<String as DeserializeValue>::deserialize(typ, v)?)
            .map_err(mk_de_err)
    }
}

impl SerializeValue for UserHashString {
    fn serialize<'b>(
        &self,
        typ: &ColumnType<'_>,
        writer: CellWriter<'b>,
    ) -> StdResult<WrittenCellProof<'b>, SerializationError> {
        SerializeValue::serialize(&self.0.as_str(), typ, writer)
    }
}

impl TryFrom<String> for UserHashString {
    type Error = Error;

    fn try_from(s: String) -> StdResult<Self, Self::Error> {
        Ok(UserHashString(
            PasswordHashString::new(&s).context(HashStringSnafu)?,
        ))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              User                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Represents a notespace user
///
/// The password hash & pepper version are never sent over the wire; [UserProfile] is the public
/// view.
#[derive(Clone, Debug, Deserialize, DeserializeRow, PartialEq, Serialize)]
pub struct User {
    id: UserId,
    username: Username,
    email: UserEmail,
    display_name: String,
    password_hash: UserHashString,
    pepper_version: PepperVersion,
    created: DateTime<Utc>,
}

/// Apply password validation rules
///
/// I reject passwords that begin or end with whitespace since that's likely to be a mistake on the
/// caller's part that will drive them bonkers when they try to login. I delegate the rest to
/// [zxcvbn] and simply reject passwords that are too weak (score of less than three on a scale of
/// zero-to-four).
fn validate_password(password: &SecretString, user_inputs: &[&str]) -> Result<()> {
    if password
        .expose_secret()
        .starts_with(|c: char| c.is_whitespace())
        || password
            .expose_secret()
            .ends_with(|c: char| c.is_whitespace())
    {
        return PasswordWhitespaceSnafu.fail();
    }

    let entropy = zxcvbn(password.expose_secret(), user_inputs);
    if entropy.score() < Strength::Three {
        return PasswordEntropySnafu {
            // Feedback is set "when score <= 2"
            feedback: entropy.feedback().cloned().unwrap_or_default(),
        }
        .fail();
    }

    debug!(
        "Password check: this password would take O({}) guesses",
        entropy.guesses_log10()
    );
    Ok(())
}

impl User {
    /// Validate a password
    ///
    /// The pepper is looked-up in `peppers` by the version recorded for this user at signup.
    pub fn check_password(&self, peppers: &Peppers, password: SecretString) -> Result<()> {
        let pepper = peppers
            .find_by_version(&self.pepper_version)
            .context(NoPepperSnafu {
                username: self.username.clone(),
            })?;
        let hasher = User::create_password_hasher(&pepper)?;
        match hasher.verify_password(
            password.expose_secret().as_bytes(),
            &self.password_hash.password_hash(),
        ) {
            Ok(_) => Ok(()),
            Err(password_hash::errors::Error::Password) => BadPasswordSnafu.fail(),
            Err(err) => Err(CheckPasswordSnafu {
                username: self.username.clone(),
            }
            .into_error(err)),
        }
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
    pub fn email(&self) -> &UserEmail {
        &self.email
    }
    pub fn hash(&self) -> &UserHashString {
        &self.password_hash
    }
    pub fn id(&self) -> UserId {
        self.id
    }
    /// Create a new [User]
    ///
    /// This constructor will create a new [User] instance without validating uniqueness of the
    /// username (that's the storage layer's job). It will validate the password, rejecting it if
    /// it's too weak, then salt, pepper & hash it.
    pub fn new(
        pepper_version: &PepperVersion,
        pepper_key: &Pepper,
        username: &Username,
        password: &SecretString,
        email: &UserEmail,
        display_name: Option<&str>,
    ) -> Result<User> {
        validate_password(password, &[username.as_ref(), email.as_ref()])?;
        let password_hash = User::hash_password(pepper_key, password)?;
        Ok(User {
            id: UserId::new(),
            username: username.clone(),
            email: email.clone(),
            display_name: display_name
                .map(|s| s.to_owned())
                .unwrap_or(username.to_string()),
            password_hash: UserHashString(password_hash),
            pepper_version: pepper_version.clone(),
            created: Utc::now(),
        })
    }
    pub fn pepper_version(&self) -> &PepperVersion {
        &self.pepper_version
    }
    pub fn username(&self) -> &Username {
        &self.username
    }
    /// Create a notespace user password hasher
    ///
    /// This function returns a [PasswordHasher] employing the Argon2id algorithm (with pepper) with
    /// the default parameters (m=19456 (19 MiB), t=2, p=1). Per the OWASP Password Storage [Cheat
    /// Sheet], Argon2id is the first algorithm which should be considered, and those are one of the
    /// recommended configurations for it.
    ///
    /// [Cheat Sheet]: https://cheatsheetseries.owasp.org/cheatsheets/Password_Storage_Cheat_Sheet.html#password-hashing-algorithms
    fn create_password_hasher(pepper: &Pepper) -> Result<Argon2<'_>> {
        Argon2::new_with_secret(
            pepper.expose_secret(),
            Algorithm::Argon2id,
            Version::default(),
            Params::default(),
        )
        .context(HasherSnafu)
    }
    /// Salt the password, then hash it using a peppered Argon2id
    ///
    /// Per [this] Github issue comment, the pepper is supplied via the `secret` field in the
    /// `new_with_secret()` constructor.
    ///
    /// [this]: https://github.com/RustCrypto/traits/pull/699#issuecomment-891105093
    fn hash_password(pepper: &Pepper, password: &SecretString) -> Result<PasswordHashString> {
        let salt = SaltString::generate(&mut OsRng);
        let hasher = User::create_password_hasher(pepper)?;
        Ok(hasher
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .context(HashPasswordSnafu)?
            .serialize())
    }
}

/// The publicly visible face of a [User]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: Username,
    pub email: UserEmail,
    #[serde(rename = "display-name")]
    pub display_name: String,
    pub created: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        UserProfile {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            created: user.created,
        }
    }
}

#[cfg(test)]
mod user_tests {
    use super::*;

    #[test]
    fn usernames() {
        assert!(Username::new("johndoe").is_ok());
        assert!(Username::new("j.doe-2_x").is_ok());
        assert!(Username::new("jdoe").is_err()); // too short
        assert!(Username::new("1johndoe").is_err());
        assert!(Username::new("login").is_err());
        assert!(Username::new("signup").is_err());
        assert!(Username::new("john doe").is_err());
    }

    #[test]
    fn passwords() {
        let peppers = Peppers::default();
        let (version, pepper) = peppers.current_pepper().unwrap();
        let username = Username::new("johndoe").unwrap();
        let email = UserEmail::new("jdoe@example.com").unwrap();

        let weak = User::new(
            &version,
            &pepper,
            &username,
            &SecretString::from("password"),
            &email,
            None,
        );
        assert!(matches!(weak, Err(Error::PasswordEntropy { .. })));

        let padded = User::new(
            &version,
            &pepper,
            &username,
            &SecretString::from(" f00 b@r sp1at"),
            &email,
            None,
        );
        assert!(matches!(padded, Err(Error::PasswordWhitespace { .. })));

        let user = User::new(
            &version,
            &pepper,
            &username,
            &SecretString::from("f00 b@r sp1at"),
            &email,
            Some("John Doe"),
        )
        .unwrap();
        assert_eq!("John Doe", user.display_name());
        assert!(
            user.check_password(&peppers, SecretString::from("f00 b@r sp1at"))
                .is_ok()
        );
        assert!(matches!(
            user.check_password(&peppers, SecretString::from("f00 b@r splat")),
            Err(Error::BadPassword { .. })
        ));
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Files                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Metadata describing an uploaded file; the bytes themselves live in the [blob store]
///
/// [blob store]: crate::blobs
#[derive(Clone, Debug, Deserialize, DeserializeRow, PartialEq, Serialize)]
pub struct FileMeta {
    pub id: FileId,
    pub owner: UserId,
    pub subject: Subject,
    pub title: String,
    pub description: Option<String>,
    pub filename: Filename,
    pub content_type: String,
    /// Size in bytes
    pub size: i64,
    /// Lower-case hex SHA-256 digest of the content
    pub sha256: String,
    pub public: bool,
    pub uploaded: DateTime<Utc>,
}

impl FileMeta {
    /// Describe a freshly uploaded file owned by `owner`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner: &UserId,
        subject: Subject,
        title: Option<String>,
        description: Option<String>,
        filename: Filename,
        content_type: Option<String>,
        public: bool,
        content: &[u8],
    ) -> FileMeta {
        FileMeta {
            id: FileId::new(),
            owner: *owner,
            subject,
            title: title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(filename.to_string()),
            description: description.filter(|d| !d.trim().is_empty()),
            filename,
            content_type: content_type.unwrap_or("application/octet-stream".to_owned()),
            size: content.len() as i64,
            sha256: content_digest(content),
            public,
            uploaded: Utc::now(),
        }
    }
}

/// Lower-case hex SHA-256 of `content`
pub fn content_digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                 Comments, Ratings & Bookmarks                                  //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize, DeserializeRow, PartialEq, Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub file: FileId,
    pub author: UserId,
    pub text: CommentText,
    pub created: DateTime<Utc>,
}

impl Comment {
    pub fn new(file: &FileId, author: &UserId, text: CommentText) -> Comment {
        Comment {
            id: CommentId::new(),
            file: *file,
            author: *author,
            text,
            created: Utc::now(),
        }
    }
}

/// One user's rating of one file; a user has at most one rating per file
#[derive(Clone, Debug, Deserialize, DeserializeRow, PartialEq, Serialize)]
pub struct Rating {
    pub user: UserId,
    pub file: FileId,
    pub score: Score,
    pub rated: DateTime<Utc>,
}

/// Aggregate ratings for a file, from the perspective of a particular caller
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RatingSummary {
    pub count: usize,
    pub average: Option<f64>,
    pub mine: Option<Score>,
}

impl RatingSummary {
    pub fn new(ratings: &[Rating], caller: Option<&UserId>) -> RatingSummary {
        let count = ratings.len();
        let average = (count > 0).then(|| {
            ratings.iter().map(|r| r.score.value() as f64).sum::<f64>() / count as f64
        });
        let mine = caller.and_then(|id| {
            ratings
                .iter()
                .find(|r| r.user == *id)
                .map(|r| r.score)
        });
        RatingSummary {
            count,
            average,
            mine,
        }
    }
}

#[derive(Clone, Debug, Deserialize, DeserializeRow, PartialEq, Serialize)]
pub struct Bookmark {
    pub user: UserId,
    pub file: FileId,
    pub created: DateTime<Utc>,
}

#[cfg(test)]
mod rating_tests {
    use super::*;

    #[test]
    fn scores() {
        assert!(Score::new(0).is_err());
        assert!(Score::new(6).is_err());
        assert_eq!(3, Score::new(3).unwrap().value());
        let s: StdResult<Score, _> = serde_json::from_str("9");
        assert!(s.is_err());
    }

    #[test]
    fn summary() {
        let file = FileId::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        let ratings = vec![
            Rating {
                user: alice,
                file,
                score: Score::new(5).unwrap(),
                rated: Utc::now(),
            },
            Rating {
                user: bob,
                file,
                score: Score::new(2).unwrap(),
                rated: Utc::now(),
            },
        ];
        let summary = RatingSummary::new(&ratings, Some(&bob));
        assert_eq!(2, summary.count);
        assert_eq!(Some(3.5), summary.average);
        assert_eq!(Some(Score::new(2).unwrap()), summary.mine);

        let summary = RatingSummary::new(&[], None);
        assert_eq!(0, summary.count);
        assert!(summary.average.is_none());
        assert!(summary.mine.is_none());
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Spaces                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A collaboration area: an owner, some members, linked files & external documents
#[derive(Clone, Debug, Deserialize, DeserializeRow, PartialEq, Serialize)]
pub struct Space {
    pub id: SpaceId,
    pub owner: UserId,
    pub name: SpaceName,
    pub description: Option<String>,
    pub created: DateTime<Utc>,
}

impl Space {
    pub fn new(owner: &UserId, name: SpaceName, description: Option<String>) -> Space {
        Space {
            id: SpaceId::new(),
            owner: *owner,
            name,
            description: description.filter(|d| !d.trim().is_empty()),
            created: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, DeserializeRow, PartialEq, Serialize)]
pub struct SpaceMember {
    pub space: SpaceId,
    pub user: UserId,
    pub added: DateTime<Utc>,
}

/// An uploaded file linked into a space
#[derive(Clone, Debug, Deserialize, DeserializeRow, PartialEq, Serialize)]
pub struct SpaceFile {
    pub space: SpaceId,
    pub file: FileId,
    pub added_by: UserId,
    pub added: DateTime<Utc>,
}

/// An external document linked into a space
#[derive(Clone, Debug, Deserialize, DeserializeRow, PartialEq, Serialize)]
pub struct DocLink {
    pub id: DocLinkId,
    pub space: SpaceId,
    pub added_by: UserId,
    pub title: String,
    pub url: DocUrl,
    pub added: DateTime<Utc>,
}

impl DocLink {
    pub fn new(space: &SpaceId, added_by: &UserId, title: &str, url: DocUrl) -> DocLink {
        DocLink {
            id: DocLinkId::new(),
            space: *space,
            added_by: *added_by,
            title: title.trim().to_owned(),
            url,
            added: Utc::now(),
        }
    }
}

#[cfg(test)]
mod space_tests {
    use super::*;

    #[test]
    fn doc_urls() {
        assert!(DocUrl::new("https://docs.google.com/document/d/abc/edit").is_ok());
        assert!(DocUrl::new("http://example.com").is_ok());
        assert!(DocUrl::new("ftp://example.com/x").is_err());
        assert!(DocUrl::new("javascript:alert(1)").is_err());
        assert!(DocUrl::new("not a url").is_err());
    }

    #[test]
    fn names() {
        assert!(SpaceName::new("Study Group").is_ok());
        assert!(SpaceName::new("   ").is_err());
        assert!(Filename::new("notes.pdf").is_ok());
        assert!(Filename::new("../etc/passwd").is_err());
        assert!(Filename::new("..").is_err());
        assert!(CommentText::new("  ").is_err());
        assert_eq!("hi", CommentText::new(" hi ").unwrap().as_ref());
    }
}
