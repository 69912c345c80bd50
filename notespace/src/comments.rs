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

//! # The comments API
//!
//! Anyone who can see a file may read its comments; any authenticated user who can see it may
//! comment on it. A comment may be deleted by its author or by the owner of the file on which it
//! was made.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{
        Path, State,
        rejection::{ExtensionRejection, JsonRejection, PathRejection},
    },
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::{delete, get},
};
use serde::Deserialize;
use snafu::{Backtrace, prelude::*};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{error, info};

use crate::{
    access::Viewer,
    authn::authenticate,
    define_metric,
    entities::{Comment, CommentId, CommentText, FileId, FileMeta, User},
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
    #[snafu(display("Only the author of comment {id}, or the owner of the file, may delete it"))]
    Forbidden { id: CommentId, backtrace: Backtrace },
    #[snafu(display("No such comment {id}"))]
    NoSuchComment { id: CommentId, backtrace: Backtrace },
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
            Error::Forbidden { .. } => (StatusCode::FORBIDDEN, format!("{}", self)),
            Error::NoSuchComment { .. } | Error::NoSuchFile { .. } => {
                (StatusCode::NOT_FOUND, format!("{}", self))
            }
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

define_metric! { "comments.added", comments_added, Sort::IntegralCounter }
define_metric! { "comments.deleted", comments_deleted, Sort::IntegralCounter }

#[derive(Clone, Debug, Deserialize)]
pub struct CommentReq {
    text: CommentText,
}

/// Comment on a file
async fn add_comment(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<FileId>, PathRejection>,
    req: StdResult<Json<CommentReq>, JsonRejection>,
) -> axum::response::Response {
    async fn add_comment1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<FileId>, PathRejection>,
        req: StdResult<Json<CommentReq>, JsonRejection>,
    ) -> Result<Comment> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Path(id) = id.context(BadPathSnafu)?;
        let Json(CommentReq { text }) = req.context(BadBodySnafu)?;
        let file = visible_file(state, Some(&user), &id).await?;
        let comment = Comment::new(&file.id, &user.id(), text);
        state
            .storage
            .add_comment(&comment)
            .await
            .context(StorageSnafu)?;
        Ok(comment)
    }

    match add_comment1(&state, user, id, req).await {
        Ok(comment) => {
            comments_added.add(1, &[]);
            (StatusCode::CREATED, Json(comment)).into_response()
        }
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

/// List the comments on a file, oldest first
async fn list_comments(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<FileId>, PathRejection>,
) -> axum::response::Response {
    async fn list_comments1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<FileId>, PathRejection>,
    ) -> Result<Vec<Comment>> {
        let Path(id) = id.context(BadPathSnafu)?;
        let user = user.ok().map(|Extension(user)| user);
        let file = visible_file(state, user.as_ref(), &id).await?;
        state
            .storage
            .comments_for_file(&file.id)
            .await
            .context(StorageSnafu)
    }

    match list_comments1(&state, user, id).await {
        Ok(comments) => (StatusCode::OK, Json(comments)).into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

/// Delete a comment
async fn delete_comment(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<CommentId>, PathRejection>,
) -> axum::response::Response {
    async fn delete_comment1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<CommentId>, PathRejection>,
    ) -> Result<()> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Path(id) = id.context(BadPathSnafu)?;
        let storage = state.storage.as_ref();
        let comment = storage
            .comment_for_id(&id)
            .await
            .context(StorageSnafu)?
            .context(NoSuchCommentSnafu { id })?;
        if comment.author != user.id() {
            let owner = storage
                .file_for_id(&comment.file)
                .await
                .context(StorageSnafu)?
                .map(|file| file.owner);
            ensure!(owner == Some(user.id()), ForbiddenSnafu { id });
        }
        storage
            .delete_comment(&comment)
            .await
            .context(StorageSnafu)?;
        comments_deleted.add(1, &[]);
        Ok(())
    }

    match delete_comment1(&state, user, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

/// Return a router for the comments API
pub fn make_router(state: Arc<Notespace>) -> Router<Arc<Notespace>> {
    Router::new()
        .route(
            "/files/{id}/comments",
            get(list_comments).post(add_comment),
        )
        .route("/comments/{id}", delete(delete_comment))
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
