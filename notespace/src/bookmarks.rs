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

//! # The bookmarks API

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{
        Path, State,
        rejection::{ExtensionRejection, PathRejection},
    },
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::{get, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{error, info};

use crate::{
    access::Viewer,
    authn::authenticate,
    define_metric,
    entities::{Bookmark, FileId, FileMeta, User},
    http::error_response,
    metrics::Sort,
    notespace::Notespace,
    storage,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Bad path: {source}"))]
    BadPath { source: PathRejection },
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
            Error::BadPath { source } => (StatusCode::BAD_REQUEST, source.body_text()),
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

fn log_failure(err: &Error) {
    match err.as_status_and_msg().0 {
        code if code.is_server_error() => error!("{:#?}", err),
        _ => info!("{}", err),
    }
}

define_metric! { "bookmarks.added", bookmarks_added, Sort::IntegralCounter }

/// Bookmark a file; answers 201 if the bookmark is new & 200 if the caller had already bookmarked
/// it
async fn add_bookmark(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<FileId>, PathRejection>,
) -> axum::response::Response {
    async fn add_bookmark1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<FileId>, PathRejection>,
    ) -> Result<(bool, Bookmark)> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Path(id) = id.context(BadPathSnafu)?;
        let storage = state.storage.as_ref();
        Viewer::new(storage, Some(&user))
            .await
            .context(StorageSnafu)?
            .visible_file(storage, &id)
            .await
            .context(StorageSnafu)?
            .context(NoSuchFileSnafu { id })?;
        let bookmark = Bookmark {
            user: user.id(),
            file: id,
            created: Utc::now(),
        };
        let created = storage
            .add_bookmark(&bookmark)
            .await
            .context(StorageSnafu)?;
        Ok((created, bookmark))
    }

    match add_bookmark1(&state, user, id).await {
        Ok((true, bookmark)) => {
            bookmarks_added.add(1, &[]);
            (StatusCode::CREATED, Json(bookmark)).into_response()
        }
        Ok((false, bookmark)) => (StatusCode::OK, Json(bookmark)).into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

/// Remove a bookmark; removing one that doesn't exist is not an error
async fn delete_bookmark(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<FileId>, PathRejection>,
) -> axum::response::Response {
    async fn delete_bookmark1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<FileId>, PathRejection>,
    ) -> Result<()> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Path(id) = id.context(BadPathSnafu)?;
        state
            .storage
            .delete_bookmark(&user.id(), &id)
            .await
            .context(StorageSnafu)?;
        Ok(())
    }

    match delete_bookmark1(&state, user, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

/// A bookmark, along with the file to which it refers
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BookmarkedFile {
    pub bookmarked: DateTime<Utc>,
    pub file: FileMeta,
}

/// List the caller's bookmarks, newest first
///
/// Bookmarks referring to files the caller can no longer see (because they've been made private,
/// say, or the caller has left the space through which they saw them) are omitted, but retained:
/// should the file become visible again, so will the bookmark.
async fn list_bookmarks(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
) -> axum::response::Response {
    async fn list_bookmarks1(state: &Notespace, user: MaybeUser) -> Result<Vec<BookmarkedFile>> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let storage = state.storage.as_ref();
        let viewer = Viewer::new(storage, Some(&user))
            .await
            .context(StorageSnafu)?;
        let mut bookmarks = storage
            .bookmarks_for_user(&user.id())
            .await
            .context(StorageSnafu)?;
        bookmarks.sort_by(|lhs, rhs| rhs.created.cmp(&lhs.created));
        let mut rsp = Vec::with_capacity(bookmarks.len());
        for bookmark in bookmarks {
            if let Some(file) = viewer
                .visible_file(storage, &bookmark.file)
                .await
                .context(StorageSnafu)?
            {
                rsp.push(BookmarkedFile {
                    bookmarked: bookmark.created,
                    file,
                });
            }
        }
        Ok(rsp)
    }

    match list_bookmarks1(&state, user).await {
        Ok(rsp) => (StatusCode::OK, Json(rsp)).into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

/// Return a router for the bookmarks API
pub fn make_router(state: Arc<Notespace>) -> Router<Arc<Notespace>> {
    Router::new()
        .route("/bookmarks", get(list_bookmarks))
        .route("/bookmarks/{id}", put(add_bookmark).delete(delete_bookmark))
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
