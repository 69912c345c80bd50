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

//! # The users API
//!
//! Signup, login, & account management. Login vends a time-limited access token to be supplied
//! (with the bearer scheme) in the `Authorization` header of subsequent requests; every endpoint
//! also accepts HTTP basic authentication.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{
        State,
        rejection::{ExtensionRejection, JsonRejection},
    },
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::{get, post},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{error, info};

use crate::{
    authn::{self, authenticate, check_password},
    cascade::{self, DeletionSummary, delete_user_cascade},
    define_metric,
    entities::{self, User, UserEmail, UserProfile, Username},
    http::error_response,
    metrics::Sort,
    notespace::Notespace,
    peppers,
    signing_keys,
    storage,
    token::{self, mint_token},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to add user: {source}"))]
    AddUser { source: storage::Error },
    #[snafu(display("Bad request body: {source}"))]
    BadBody { source: JsonRejection },
    #[snafu(display("Failed to delete user {username}: {source}"))]
    DeleteUser {
        username: Username,
        source: cascade::Error,
    },
    #[snafu(display("Invalid credentials: {source}"))]
    InvalidCredentials { source: authn::Error },
    #[snafu(display("No signing keys available: {source}"))]
    NoKeys {
        source: signing_keys::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("{source}"))]
    NoPepper { source: peppers::Error },
    #[snafu(display("This endpoint requires authentication"))]
    NotAuthenticated { backtrace: Backtrace },
    #[snafu(display("Failed to mint a token for user {username}: {source}"))]
    Token {
        username: Username,
        #[snafu(source(from(token::Error, Box::new)))]
        source: Box<token::Error>,
    },
    #[snafu(display("Failed to create user: {source}"))]
    UserSignup { source: entities::Error },
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            ////////////////////////////////////////////////////////////////////////////////////////
            // Broken requests-- tell the caller how to fix it
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::AddUser {
                source: storage::Error::UsernameClaimed { username, .. },
            } => (
                StatusCode::BAD_REQUEST,
                format!("Username {} is already claimed; sorry", username),
            ),
            Error::BadBody { source } => (StatusCode::BAD_REQUEST, source.body_text()),
            Error::UserSignup {
                source: entities::Error::PasswordEntropy { feedback, .. },
            } => (StatusCode::BAD_REQUEST, format!("{}", feedback)),
            Error::UserSignup {
                source: entities::Error::PasswordWhitespace { .. },
            } => (
                StatusCode::BAD_REQUEST,
                "Password rejected due to leading and/or trailing whitespace".to_owned(),
            ),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Authentication failure-- don't tell a potential attacker the way in which they failed
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::InvalidCredentials { source } => source.as_status_and_msg(),
            Error::NotAuthenticated { .. } => {
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            ////////////////////////////////////////////////////////////////////////////////////////
            // Internal failure-- own up to it:
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::AddUser { source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to add user: {source}"),
            ),
            Error::DeleteUser { username, source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to delete user {username}: {source}"),
            ),
            Error::NoKeys { source, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "No signing keys found ({}); did you configure the program?",
                    source
                ),
            ),
            Error::NoPepper { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "No pepper available".to_string(),
            ),
            Error::Token {
                username, source, ..
            } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to mint a token for {}: {}", username, source),
            ),
            Error::UserSignup { source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create user: {source}"),
            ),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = self.as_status_and_msg();
        error_response(code, msg)
    }
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        `/users/signup`                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

define_metric! { "users.signups.successful", users_signups_successful, Sort::IntegralCounter }
define_metric! { "users.signups.failures",   users_signups_failures,   Sort::IntegralCounter }

#[derive(Clone, Debug, Deserialize)]
pub struct SignupReq {
    username: Username,
    password: SecretString,
    email: UserEmail,
    #[serde(rename = "display-name")]
    display_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SignupRsp {
    pub greeting: String,
}

/// Signup as a new user
///
/// - username: ASCII alphanumerics plus '-', '_' & '.', beginning with a letter; must be unique
/// - password: arbitrary UTF-8; must be reasonably strong & may not begin or end with whitespace
/// - email: a contact e-mail for this user
/// - display-name: optional, defaults to the username
///
/// There is no authentication on this method.
async fn signup(
    State(state): State<Arc<Notespace>>,
    req: StdResult<Json<SignupReq>, JsonRejection>,
) -> axum::response::Response {
    async fn signup1(
        req: StdResult<Json<SignupReq>, JsonRejection>,
        state: &Notespace,
    ) -> Result<(Username, SignupRsp)> {
        let Json(req) = req.context(BadBodySnafu)?;
        let (pepper_ver, pepper_key) = state.pepper.current_pepper().context(NoPepperSnafu)?;
        let user = User::new(
            &pepper_ver,
            &pepper_key,
            &req.username,
            &req.password,
            &req.email,
            req.display_name.as_deref(),
        )
        .context(UserSignupSnafu)?;
        state.storage.add_user(&user).await.context(AddUserSnafu)?;
        Ok((
            req.username,
            SignupRsp {
                greeting: "Welcome to notespace!".to_owned(),
            },
        ))
    }

    match signup1(req, &state).await {
        Ok((username, rsp)) => {
            info!("Created user {}", username);
            users_signups_successful.add(1, &[]);
            (StatusCode::CREATED, Json(rsp)).into_response()
        }
        Err(err) => {
            users_signups_failures.add(1, &[]);
            match &err {
                Error::BadBody { .. }
                | Error::AddUser {
                    source: storage::Error::UsernameClaimed { .. },
                }
                | Error::UserSignup {
                    source:
                        entities::Error::PasswordEntropy { .. }
                        | entities::Error::PasswordWhitespace { .. },
                } => info!("Signup rejected: {}", err),
                _ => error!("{:#?}", err),
            }
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         `/users/login`                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

define_metric! { "users.logins.successful", users_logins_successful, Sort::IntegralCounter }
define_metric! { "users.logins.failures",   users_logins_failures,   Sort::IntegralCounter }

#[derive(Clone, Debug, Deserialize)]
pub struct LoginReq {
    username: Username,
    password: SecretString,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoginRsp {
    pub token: String,
}

/// Login as an existing user
///
/// This endpoint will vend a time-limited JWT that can be supplied in the Authorization header
/// (with the bearer scheme) in subsequent requests.
async fn login(
    State(state): State<Arc<Notespace>>,
    req: StdResult<Json<LoginReq>, JsonRejection>,
) -> axum::response::Response {
    async fn login1(
        req: StdResult<Json<LoginReq>, JsonRejection>,
        state: &Notespace,
    ) -> Result<LoginRsp> {
        let Json(LoginReq { username, password }) = req.context(BadBodySnafu)?;
        let user = check_password(state.storage.as_ref(), &state.pepper, &username, password)
            .await
            .context(InvalidCredentialsSnafu)?;
        let (keyid, signing_key) = state.signing_keys.current().context(NoKeysSnafu)?;
        let token = mint_token(
            &username,
            &user.id(),
            &keyid,
            &signing_key,
            &state.host,
            &state.token_lifetime,
        )
        .context(TokenSnafu {
            username: username.clone(),
        })?;
        info!("Logged-in user {}", username);
        Ok(LoginRsp { token })
    }

    match login1(req, &state).await {
        Ok(rsp) => {
            users_logins_successful.add(1, &[]);
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            users_logins_failures.add(1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           `/users/me`                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Retrieve the caller's profile
async fn me(user: StdResult<Extension<User>, ExtensionRejection>) -> axum::response::Response {
    match user {
        Ok(Extension(user)) => (StatusCode::OK, Json(UserProfile::from(&user))).into_response(),
        Err(_) => NotAuthenticatedSnafu.build().into_response(),
    }
}

define_metric! { "users.deletions.successful", users_deletions_successful, Sort::IntegralCounter }
define_metric! { "users.deletions.failures",   users_deletions_failures,   Sort::IntegralCounter }

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeleteRsp {
    pub deleted: DeletionSummary,
}

/// Delete the caller's account, along with everything they own or authored
async fn delete_me(
    State(state): State<Arc<Notespace>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
) -> axum::response::Response {
    async fn delete_me1(
        user: StdResult<Extension<User>, ExtensionRejection>,
        state: &Notespace,
    ) -> Result<DeleteRsp> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let deleted = delete_user_cascade(state.storage.as_ref(), state.blobs.as_ref(), &user)
            .await
            .context(DeleteUserSnafu {
                username: user.username().clone(),
            })?;
        Ok(DeleteRsp { deleted })
    }

    match delete_me1(user, &state).await {
        Ok(rsp) => {
            users_deletions_successful.add(1, &[]);
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            users_deletions_failures.add(1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Return a router for the users API
///
/// The returned [Router] will presumably be merged with other routers.
pub fn make_router(state: Arc<Notespace>) -> Router<Arc<Notespace>> {
    Router::new()
        .route("/users/signup", post(signup))
        .route("/users/login", post(login))
        .route("/users/me", get(me).delete(delete_me))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            authenticate,
        ))
        // All responses are JSON; add the appropriate Content-Type header (but leave the existing
        // Content-Type header should a handler set it specially).
        .layer(SetResponseHeaderLayer::if_not_present(
            CONTENT_TYPE,
            HeaderValue::from_static("text/json; charset=utf-8"),
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
