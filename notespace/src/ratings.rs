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

//! # The ratings API
//!
//! Each user may rate each file they can see (other than their own) from one to five; rating a
//! file again replaces the earlier score.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{
        Path, State,
        rejection::{ExtensionRejection, JsonRejection, PathRejection},
    },
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use serde::Deserialize;
use snafu::{Backtrace, prelude::*};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{error, info};

use crate::{
    access::Viewer,
    authn::authenticate,
    define_metric,
    entities::{self, FileId, FileMeta, Rating, RatingSummary, Score, User},
    http::error_response,
    metrics::Sort,
    notespace::Notespace,
    storage,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Bad request body: {source}"))]
    BadBody { source: JsonRejection },
    #[snafu(display("Bad path: {source}"))]
    BadPath { source: PathRejection },
    #[snafu(display("{source}"))]
    BadScore { source: entities::Error },
    #[snafu(display("You may not rate your own file {id}"))]
    OwnFile { id: FileId, backtrace: Backtrace },
    #[snafu(display("No such file {id}"))]
    NoSuchFile { id: FileId, backtrace: Backtrace },
    #[snafu(display("This endpoint requires authentication"))]
    NotAuthenticated { backtrace: Backtrace },
    #[snafu(display("Storage failure: {source}"))]
    Storage { source: storage::Error },
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            Error::BadBody { source } => (StatusCode::BAD_REQUEST, source.body_text()),
            Error::BadPath { source } => (StatusCode::BAD_REQUEST, source.body_text()),
            Error::BadScore { .. } => (StatusCode::BAD_REQUEST, format!("{}", self)),
            Error::OwnFile { .. } => (StatusCode::FORBIDDEN, format!("{}", self)),
            Error::NoSuchFile { .. } => (StatusCode::NOT_FOUND, format!("{}", self)),
            Error::NotAuthenticated { .. } => {
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            Error::Storage { .. } => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", self)),
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

type MaybeUser = StdResult<Extension<User>, ExtensionRejection>;

async fn summarize(
    state: &Notespace,
    file: &FileId,
    caller: Option<&User>,
) -> Result<RatingSummary> {
    let ratings = state
        .storage
        .ratings_for_file(file)
        .await
        .context(StorageSnafu)?;
    Ok(RatingSummary::new(
        &ratings,
        caller.map(|user| user.id()).as_ref(),
    ))
}

async fn visible_file(state: &Notespace, user: Option<&User>, id: &FileId) -> Result<FileMeta> {
    let storage = state.storage.as_ref();
    Viewer::new(storage, user)
        .await
        .context(StorageSnafu)?
        .visible_file(storage, id)
        .await
        .context(StorageSnafu)?
        .context(NoSuchFileSnafu { id: *id })
}

fn log_failure(err: &Error) {
    match err.as_status_and_msg().0 {
        code if code.is_server_error() => error!("{:#?}", err),
        _ => info!("{}", err),
    }
}

define_metric! { "ratings.recorded", ratings_recorded, Sort::IntegralCounter }

/// The score is a raw integer here; [Score::new] checks the range
#[derive(Clone, Debug, Deserialize)]
pub struct RateReq {
    score: i64,
}

/// Rate a file, replacing any earlier rating by the caller
async fn rate(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<FileId>, PathRejection>,
    req: StdResult<Json<RateReq>, JsonRejection>,
) -> axum::response::Response {
    async fn rate1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<FileId>, PathRejection>,
        req: StdResult<Json<RateReq>, JsonRejection>,
    ) -> Result<RatingSummary> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Path(id) = id.context(BadPathSnafu)?;
        let Json(RateReq { score }) = req.context(BadBodySnafu)?;
        let score = Score::new(score).context(BadScoreSnafu)?;
        let file = visible_file(state, Some(&user), &id).await?;
        ensure!(file.owner != user.id(), OwnFileSnafu { id });
        state
            .storage
            .upsert_rating(&Rating {
                user: user.id(),
                file: id,
                score,
                rated: Utc::now(),
            })
            .await
            .context(StorageSnafu)?;
        ratings_recorded.add(1, &[]);
        summarize(state, &id, Some(&user)).await
    }

    match rate1(&state, user, id, req).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

/// Retrieve a file's rating summary
async fn get_rating(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<FileId>, PathRejection>,
) -> axum::response::Response {
    async fn get_rating1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<FileId>, PathRejection>,
    ) -> Result<RatingSummary> {
        let Path(id) = id.context(BadPathSnafu)?;
        let user = user.ok().map(|Extension(user)| user);
        visible_file(state, user.as_ref(), &id).await?;
        summarize(state, &id, user.as_ref()).await
    }

    match get_rating1(&state, user, id).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

/// Withdraw the caller's rating of a file; withdrawing a rating that doesn't exist is not an error
async fn unrate(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<FileId>, PathRejection>,
) -> axum::response::Response {
    async fn unrate1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<FileId>, PathRejection>,
    ) -> Result<()> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Path(id) = id.context(BadPathSnafu)?;
        state
            .storage
            .delete_rating(&user.id(), &id)
            .await
            .context(StorageSnafu)
    }

    match unrate1(&state, user, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

/// Return a router for the ratings API
pub fn make_router(state: Arc<Notespace>) -> Router<Arc<Notespace>> {
    Router::new()
        .route(
            "/files/{id}/rating",
            get(get_rating).put(rate).delete(unrate),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            authenticate,
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            CONTENT_TYPE,
            HeaderValue::from_static("text/json; charset=utf-8"),
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
