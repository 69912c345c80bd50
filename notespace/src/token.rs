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

//! # notespace access tokens
//!
//! Logging-in with a username & password yields an access token: an HS256 [JWT] naming the user,
//! good for a configurable lifetime. The ID of the signing key goes in the JWT header so that
//! tokens survive key rotation.
//!
//! [JWT]: https://www.rfc-editor.org/rfc/rfc7519.html

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jwt::{Header, SignWithKey, Token, VerifyWithKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use snafu::{Backtrace, prelude::*};

use crate::{
    entities::{UserId, Username},
    signing_keys::{self, KeyId, SigningKey, SigningKeys},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Token expired at {expires}"))]
    Expired {
        expires: DateTime<Utc>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to create an HMAC: {source}"))]
    Hmac {
        source: crypto_common::InvalidLength,
        backtrace: Backtrace,
    },
    #[snafu(display("Bad key ID in token header: {source}"))]
    KeyId {
        source: signing_keys::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("The Key ID was missing from the JWT"))]
    MissingKeyId { backtrace: Backtrace },
    #[snafu(display("No signing key matching {keyid}: {source}"))]
    NoKey {
        keyid: KeyId,
        source: signing_keys::Error,
    },
    #[snafu(display("Invalid token: not before {not_before}"))]
    NotBefore {
        not_before: DateTime<Utc>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to parse JWT: {source}"))]
    Parse {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to sign JWT claims: {source}"))]
    Signature {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Unknown token audience {audience}"))]
    UnknownAudience {
        audience: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Unknown token issuer {issuer}"))]
    UnknownIssuer { issuer: String, backtrace: Backtrace },
    #[snafu(display("Verification failure: {source}"))]
    Verification {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// Access token [claims]; timestamps are seconds since the epoch, per RFC 7519
///
/// [claims]: https://pragmaticwebsecurity.com/articles/apisecurity/hard-parts-of-jwt.html
#[derive(Clone, Debug, Deserialize, Serialize)]
struct AccessClaims {
    #[serde(rename = "iat", with = "chrono::serde::ts_seconds")]
    issued_at: DateTime<Utc>,
    #[serde(rename = "iss")]
    issuer: String,
    #[serde(rename = "aud")]
    audience: String,
    #[serde(rename = "nbf", with = "chrono::serde::ts_seconds")]
    not_before: DateTime<Utc>,
    #[serde(rename = "exp", with = "chrono::serde::ts_seconds")]
    expires: DateTime<Utc>,
    #[serde(rename = "sub")]
    subject: Username,
    /// Usernames are freed when an account is deleted; the id pins the token to one account
    #[serde(rename = "uid")]
    user_id: UserId,
}

fn audience_for(issuer: &str) -> String {
    format!("api.{}", issuer)
}

fn hmac_for(signing_key: &SigningKey) -> Result<Hmac<Sha256>> {
    Hmac::new_from_slice(signing_key.expose_secret()).context(HmacSnafu)
}

/// Mint a new access token for `username` (whose account is `user_id`), signed with
/// `signing_key` (identified by `keyid`), valid for `lifetime` from now. Returns the serialized
/// JWT.
pub fn mint_token(
    username: &Username,
    user_id: &UserId,
    keyid: &KeyId,
    signing_key: &SigningKey,
    issuer: &str,
    lifetime: &Duration,
) -> Result<String> {
    let key = hmac_for(signing_key)?;
    let header = Header {
        key_id: Some(keyid.to_string()),
        ..Default::default()
    };
    let now = Utc::now();
    let claims = AccessClaims {
        issued_at: now,
        issuer: issuer.to_owned(),
        audience: audience_for(issuer),
        not_before: now,
        expires: now + *lifetime,
        subject: username.clone(),
        user_id: *user_id,
    };
    Ok(Token::new(header, claims)
        .sign_with_key(&key)
        .context(SignatureSnafu)?
        .as_str()
        .to_owned())
}

/// Verify `token_string` against `keys` & return the user (name & account id) it names
///
/// Checks the signature, the validity window, the issuer and the audience.
pub fn verify_token(
    token_string: &str,
    keys: &SigningKeys,
    issuer: &str,
) -> Result<(Username, UserId)> {
    // Peek at the header to find out which key signed this token...
    let unverified: Token<Header, AccessClaims, _> =
        Token::parse_unverified(token_string).context(ParseSnafu)?;
    let keyid = unverified
        .header()
        .key_id
        .as_deref()
        .context(MissingKeyIdSnafu)?
        .parse::<KeyId>()
        .context(KeyIdSnafu)?;
    let signing_key = keys.find_by_id(&keyid).context(NoKeySnafu { keyid })?;
    // and verify it with that key.
    let token: Token<Header, AccessClaims, _> = token_string
        .verify_with_key(&hmac_for(&signing_key)?)
        .context(VerificationSnafu)?;
    let claims = token.claims();

    let now = Utc::now();
    ensure!(
        now >= claims.not_before,
        NotBeforeSnafu {
            not_before: claims.not_before
        }
    );
    ensure!(
        now <= claims.expires,
        ExpiredSnafu {
            expires: claims.expires
        }
    );
    ensure!(
        issuer == claims.issuer,
        UnknownIssuerSnafu {
            issuer: claims.issuer.clone()
        }
    );
    ensure!(
        audience_for(issuer) == claims.audience,
        UnknownAudienceSnafu {
            audience: claims.audience.clone()
        }
    );

    Ok((claims.subject.clone(), claims.user_id))
}

#[cfg(test)]
mod test {
    use super::*;

    // Sixty-four octets, exactly
    const KEY: &[u8; 64] = b"Four score and seven years ago our fathers brought forth upon th";

    fn keys() -> (KeyId, SigningKey, SigningKeys) {
        let keyid = KeyId::new("keyid:20250817").unwrap(/* known good */);
        let key = SigningKey::new(KEY.to_vec()).unwrap(/* known good */);
        let keys = SigningKeys::from([(keyid.clone(), key.clone())]);
        (keyid, key, keys)
    }

    #[test]
    fn round_trip() {
        let username = Username::new("johndoe").unwrap(/* known good */);
        let user_id = UserId::new();
        let (keyid, key, keys) = keys();
        let token = mint_token(
            &username,
            &user_id,
            &keyid,
            &key,
            "notespace.example.com",
            &Duration::seconds(300),
        )
        .unwrap();
        assert_eq!(
            (username, user_id),
            verify_token(&token, &keys, "notespace.example.com").unwrap()
        );
    }

    #[test]
    fn rejections() {
        let username = Username::new("johndoe").unwrap(/* known good */);
        let user_id = UserId::new();
        let (keyid, key, keys) = keys();

        let expired = mint_token(
            &username,
            &user_id,
            &keyid,
            &key,
            "notespace.example.com",
            &Duration::seconds(-60),
        )
        .unwrap();
        assert!(matches!(
            verify_token(&expired, &keys, "notespace.example.com"),
            Err(Error::Expired { .. })
        ));

        let token = mint_token(
            &username,
            &user_id,
            &keyid,
            &key,
            "notespace.example.com",
            &Duration::seconds(300),
        )
        .unwrap();
        assert!(matches!(
            verify_token(&token, &keys, "other.example.com"),
            Err(Error::UnknownIssuer { .. })
        ));

        // Signed with a key we don't know
        let rotated = SigningKeys::from([(
            KeyId::new("keyid:20250901").unwrap(),
            SigningKey::default(),
        )]);
        assert!(matches!(
            verify_token(&token, &rotated, "notespace.example.com"),
            Err(Error::NoKey { .. })
        ));

        // Same ID, different key
        let forged = SigningKeys::from([(keyid, SigningKey::default())]);
        assert!(matches!(
            verify_token(&token, &forged, "notespace.example.com"),
            Err(Error::Verification { .. })
        ));

        assert!(verify_token("not.a.jwt", &keys, "notespace.example.com").is_err());
    }
}
