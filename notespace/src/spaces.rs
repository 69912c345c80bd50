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

//! # The spaces API
//!
//! A space is a named collaboration area. Its owner manages the member list; the owner & members
//! may link uploaded files into it and add links to external documents. Spaces are invisible to
//! everyone else: a caller who neither owns nor belongs to a space gets a 404 for anything
//! touching it, while a member attempting an owner-only operation gets a 403.
//!
//! Linking a private file into a space makes it visible to the space's owner & members.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{
        Path, State,
        rejection::{ExtensionRejection, JsonRejection, PathRejection},
    },
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{error, info};

use crate::{
    access::Viewer,
    authn::authenticate,
    cascade::{self, delete_space_cascade},
    define_metric,
    entities::{
        DocLink, DocLinkId, DocUrl, FileId, FileMeta, Space, SpaceFile, SpaceId, SpaceMember,
        SpaceName, User, UserId, Username,
    },
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
    #[snafu(display("Failed to delete space {id}: {source}"))]
    Cascade { id: SpaceId, source: cascade::Error },
    #[snafu(display("Document links require a title"))]
    EmptyTitle { backtrace: Backtrace },
    #[snafu(display("Only {who} may {what}"))]
    Forbidden {
        who: &'static str,
        what: &'static str,
        backtrace: Backtrace,
    },
    #[snafu(display("No such document link {id} in this space"))]
    NoSuchDoc { id: DocLinkId, backtrace: Backtrace },
    #[snafu(display("No such file {id}"))]
    NoSuchFile { id: FileId, backtrace: Backtrace },
    #[snafu(display("File {id} is not linked into this space"))]
    NoSuchLink { id: FileId, backtrace: Backtrace },
    #[snafu(display("No such space {id}"))]
    NoSuchSpace { id: SpaceId, backtrace: Backtrace },
    #[snafu(display("No such user {username}"))]
    NoSuchUser {
        username: Username,
        backtrace: Backtrace,
    },
    #[snafu(display("This endpoint requires authentication"))]
    NotAuthenticated { backtrace: Backtrace },
    #[snafu(display("The owner of a space is implicitly a member & can't be added"))]
    OwnerAsMember { backtrace: Backtrace },
    #[snafu(display("Storage failure: {source}"))]
    Storage { source: storage::Error },
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            Error::BadBody { source } => (StatusCode::BAD_REQUEST, source.body_text()),
            Error::BadPath { source } => (StatusCode::BAD_REQUEST, source.body_text()),
            Error::EmptyTitle { .. } | Error::OwnerAsMember { .. } => {
                (StatusCode::BAD_REQUEST, format!("{}", self))
            }
            Error::NotAuthenticated { .. } => {
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            Error::Forbidden { .. } => (StatusCode::FORBIDDEN, format!("{}", self)),
            Error::NoSuchDoc { .. }
            | Error::NoSuchFile { .. }
            | Error::NoSuchLink { .. }
            | Error::NoSuchSpace { .. }
            | Error::NoSuchUser { .. } => (StatusCode::NOT_FOUND, format!("{}", self)),
            Error::Cascade { .. } | Error::Storage { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", self))
            }
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

/// Look up a space the caller owns or belongs to
async fn enter(state: &Notespace, user: &User, id: &SpaceId) -> Result<(Viewer, Space)> {
    let storage = state.storage.as_ref();
    let viewer = Viewer::new(storage, Some(user))
        .await
        .context(StorageSnafu)?;
    ensure!(viewer.can_enter(id), NoSuchSpaceSnafu { id: *id });
    let space = storage
        .space_for_id(id)
        .await
        .context(StorageSnafu)?
        .context(NoSuchSpaceSnafu { id: *id })?;
    Ok((viewer, space))
}

/// Either the space's owner or `actor` (the member who made some change) may undo it
fn owner_or(space: &Space, user: &User, actor: &UserId, who: &'static str) -> Result<()> {
    ensure!(
        space.owner == user.id() || *actor == user.id(),
        ForbiddenSnafu {
            who,
            what: "do that"
        }
    );
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     Creating & listing spaces                                  //
////////////////////////////////////////////////////////////////////////////////////////////////////

define_metric! { "spaces.created", spaces_created, Sort::IntegralCounter }

#[derive(Clone, Debug, Deserialize)]
pub struct CreateReq {
    name: SpaceName,
    description: Option<String>,
}

/// Create a new space, owned by the caller
async fn create_space(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    req: StdResult<Json<CreateReq>, JsonRejection>,
) -> axum::response::Response {
    async fn create_space1(
        state: &Notespace,
        user: MaybeUser,
        req: StdResult<Json<CreateReq>, JsonRejection>,
    ) -> Result<Space> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Json(CreateReq { name, description }) = req.context(BadBodySnafu)?;
        let space = Space::new(&user.id(), name, description);
        state.storage.add_space(&space).await.context(StorageSnafu)?;
        info!("{} created space {} ({})", user.username(), space.name, space.id);
        Ok(space)
    }

    match create_space1(&state, user, req).await {
        Ok(space) => {
            spaces_created.add(1, &[]);
            (StatusCode::CREATED, Json(space)).into_response()
        }
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

/// List the spaces the caller owns or belongs to, oldest first
async fn list_spaces(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
) -> axum::response::Response {
    async fn list_spaces1(state: &Notespace, user: MaybeUser) -> Result<Vec<Space>> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let storage = state.storage.as_ref();
        let mut spaces = storage
            .spaces_owned_by(&user.id())
            .await
            .context(StorageSnafu)?;
        for member in storage
            .memberships_of(&user.id())
            .await
            .context(StorageSnafu)?
        {
            if let Some(space) = storage
                .space_for_id(&member.space)
                .await
                .context(StorageSnafu)?
            {
                spaces.push(space);
            }
        }
        spaces.sort_by(|lhs, rhs| lhs.created.cmp(&rhs.created));
        Ok(spaces)
    }

    match list_spaces1(&state, user).await {
        Ok(spaces) => (StatusCode::OK, Json(spaces)).into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    Retrieving & deleting spaces                                //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MemberRsp {
    pub user: UserId,
    pub username: Username,
    pub added: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LinkedFileRsp {
    #[serde(rename = "added-by")]
    pub added_by: UserId,
    pub added: DateTime<Utc>,
    pub file: FileMeta,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SpaceRsp {
    pub space: Space,
    pub members: Vec<MemberRsp>,
    pub files: Vec<LinkedFileRsp>,
    pub docs: Vec<DocLink>,
}

/// Retrieve a space along with its members, linked files & document links
async fn get_space(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<SpaceId>, PathRejection>,
) -> axum::response::Response {
    async fn get_space1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<SpaceId>, PathRejection>,
    ) -> Result<SpaceRsp> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Path(id) = id.context(BadPathSnafu)?;
        let (viewer, space) = enter(state, &user, &id).await?;
        let storage = state.storage.as_ref();

        let mut members = Vec::new();
        for member in storage.members_of(&id).await.context(StorageSnafu)? {
            // A member whose account is mid-deletion may be briefly dangling
            if let Some(u) = storage
                .user_for_id(&member.user)
                .await
                .context(StorageSnafu)?
            {
                members.push(MemberRsp {
                    user: member.user,
                    username: u.username().clone(),
                    added: member.added,
                });
            }
        }

        let mut files = Vec::new();
        for link in storage.files_in_space(&id).await.context(StorageSnafu)? {
            if let Some(file) = viewer
                .visible_file(storage, &link.file)
                .await
                .context(StorageSnafu)?
            {
                files.push(LinkedFileRsp {
                    added_by: link.added_by,
                    added: link.added,
                    file,
                });
            }
        }

        let docs = storage
            .doc_links_for_space(&id)
            .await
            .context(StorageSnafu)?;
        Ok(SpaceRsp {
            space,
            members,
            files,
            docs,
        })
    }

    match get_space1(&state, user, id).await {
        Ok(rsp) => (StatusCode::OK, Json(rsp)).into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

define_metric! { "spaces.deleted", spaces_deleted, Sort::IntegralCounter }

/// Delete a space along with its memberships, file links & document links
async fn delete_space(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<SpaceId>, PathRejection>,
) -> axum::response::Response {
    async fn delete_space1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<SpaceId>, PathRejection>,
    ) -> Result<()> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Path(id) = id.context(BadPathSnafu)?;
        let (_, space) = enter(state, &user, &id).await?;
        ensure!(
            space.owner == user.id(),
            ForbiddenSnafu {
                who: "the owner",
                what: "delete a space"
            }
        );
        let summary = delete_space_cascade(state.storage.as_ref(), &space)
            .await
            .context(CascadeSnafu { id })?;
        info!("{} deleted space {}: {:?}", user.username(), id, summary);
        Ok(())
    }

    match delete_space1(&state, user, id).await {
        Ok(()) => {
            spaces_deleted.add(1, &[]);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Members                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize)]
pub struct AddMemberReq {
    username: Username,
}

/// Add a member to a space; 201 if they're new, 200 if they were already a member
async fn add_member(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<SpaceId>, PathRejection>,
    req: StdResult<Json<AddMemberReq>, JsonRejection>,
) -> axum::response::Response {
    async fn add_member1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<SpaceId>, PathRejection>,
        req: StdResult<Json<AddMemberReq>, JsonRejection>,
    ) -> Result<(bool, MemberRsp)> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Path(id) = id.context(BadPathSnafu)?;
        let Json(AddMemberReq { username }) = req.context(BadBodySnafu)?;
        let (_, space) = enter(state, &user, &id).await?;
        ensure!(
            space.owner == user.id(),
            ForbiddenSnafu {
                who: "the owner",
                what: "add members"
            }
        );
        let storage = state.storage.as_ref();
        let member = storage
            .user_for_name(username.as_ref())
            .await
            .context(StorageSnafu)?
            .context(NoSuchUserSnafu {
                username: username.clone(),
            })?;
        ensure!(member.id() != space.owner, OwnerAsMemberSnafu);
        let record = SpaceMember {
            space: id,
            user: member.id(),
            added: Utc::now(),
        };
        let added = storage.add_member(&record).await.context(StorageSnafu)?;
        Ok((
            added,
            MemberRsp {
                user: member.id(),
                username,
                added: record.added,
            },
        ))
    }

    match add_member1(&state, user, id, req).await {
        Ok((true, rsp)) => (StatusCode::CREATED, Json(rsp)).into_response(),
        Ok((false, rsp)) => (StatusCode::OK, Json(rsp)).into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

/// Remove a member from a space; the owner may remove anyone, & any member may leave
async fn remove_member(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    path: StdResult<Path<(SpaceId, Username)>, PathRejection>,
) -> axum::response::Response {
    async fn remove_member1(
        state: &Notespace,
        user: MaybeUser,
        path: StdResult<Path<(SpaceId, Username)>, PathRejection>,
    ) -> Result<()> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Path((id, username)) = path.context(BadPathSnafu)?;
        let (_, space) = enter(state, &user, &id).await?;
        let storage = state.storage.as_ref();
        let member = storage
            .user_for_name(username.as_ref())
            .await
            .context(StorageSnafu)?
            .context(NoSuchUserSnafu { username })?;
        owner_or(&space, &user, &member.id(), "the owner, or the member themself,")?;
        storage
            .remove_member(&id, &member.id())
            .await
            .context(StorageSnafu)?;
        Ok(())
    }

    match remove_member1(&state, user, path).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Linked files                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize)]
pub struct LinkFileReq {
    file: FileId,
}

/// Link a file the caller can see into a space; 201 if newly linked, 200 if it already was
async fn link_file(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<SpaceId>, PathRejection>,
    req: StdResult<Json<LinkFileReq>, JsonRejection>,
) -> axum::response::Response {
    async fn link_file1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<SpaceId>, PathRejection>,
        req: StdResult<Json<LinkFileReq>, JsonRejection>,
    ) -> Result<(bool, SpaceFile)> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Path(id) = id.context(BadPathSnafu)?;
        let Json(LinkFileReq { file }) = req.context(BadBodySnafu)?;
        let (viewer, _) = enter(state, &user, &id).await?;
        let storage = state.storage.as_ref();
        viewer
            .visible_file(storage, &file)
            .await
            .context(StorageSnafu)?
            .context(NoSuchFileSnafu { id: file })?;
        let link = SpaceFile {
            space: id,
            file,
            added_by: user.id(),
            added: Utc::now(),
        };
        let linked = storage.link_file(&link).await.context(StorageSnafu)?;
        Ok((linked, link))
    }

    match link_file1(&state, user, id, req).await {
        Ok((true, link)) => (StatusCode::CREATED, Json(link)).into_response(),
        Ok((false, link)) => (StatusCode::OK, Json(link)).into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

/// Unlink a file from a space; the owner may unlink anything, members only what they linked
async fn unlink_file(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    path: StdResult<Path<(SpaceId, FileId)>, PathRejection>,
) -> axum::response::Response {
    async fn unlink_file1(
        state: &Notespace,
        user: MaybeUser,
        path: StdResult<Path<(SpaceId, FileId)>, PathRejection>,
    ) -> Result<()> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Path((id, file)) = path.context(BadPathSnafu)?;
        let (_, space) = enter(state, &user, &id).await?;
        let storage = state.storage.as_ref();
        let link = storage
            .files_in_space(&id)
            .await
            .context(StorageSnafu)?
            .into_iter()
            .find(|link| link.file == file)
            .context(NoSuchLinkSnafu { id: file })?;
        owner_or(&space, &user, &link.added_by, "the owner, or the member who linked it,")?;
        storage
            .unlink_file(&id, &file)
            .await
            .context(StorageSnafu)?;
        Ok(())
    }

    match unlink_file1(&state, user, path).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         Document links                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

define_metric! { "spaces.docs.added", spaces_docs_added, Sort::IntegralCounter }

#[derive(Clone, Debug, Deserialize)]
pub struct AddDocReq {
    title: String,
    url: DocUrl,
}

/// Add a link to an external document (a Google Doc, say) to a space
async fn add_doc(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<SpaceId>, PathRejection>,
    req: StdResult<Json<AddDocReq>, JsonRejection>,
) -> axum::response::Response {
    async fn add_doc1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<SpaceId>, PathRejection>,
        req: StdResult<Json<AddDocReq>, JsonRejection>,
    ) -> Result<DocLink> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Path(id) = id.context(BadPathSnafu)?;
        let Json(AddDocReq { title, url }) = req.context(BadBodySnafu)?;
        ensure!(!title.trim().is_empty(), EmptyTitleSnafu);
        enter(state, &user, &id).await?;
        let doc = DocLink::new(&id, &user.id(), &title, url);
        state
            .storage
            .add_doc_link(&doc)
            .await
            .context(StorageSnafu)?;
        Ok(doc)
    }

    match add_doc1(&state, user, id, req).await {
        Ok(doc) => {
            spaces_docs_added.add(1, &[]);
            (StatusCode::CREATED, Json(doc)).into_response()
        }
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

/// Remove a document link; the owner may remove anything, members only what they added
async fn delete_doc(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    path: StdResult<Path<(SpaceId, DocLinkId)>, PathRejection>,
) -> axum::response::Response {
    async fn delete_doc1(
        state: &Notespace,
        user: MaybeUser,
        path: StdResult<Path<(SpaceId, DocLinkId)>, PathRejection>,
    ) -> Result<()> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Path((id, doc_id)) = path.context(BadPathSnafu)?;
        let (_, space) = enter(state, &user, &id).await?;
        let storage = state.storage.as_ref();
        let doc = storage
            .doc_link_for_id(&doc_id)
            .await
            .context(StorageSnafu)?
            .filter(|doc| doc.space == id)
            .context(NoSuchDocSnafu { id: doc_id })?;
        owner_or(&space, &user, &doc.added_by, "the owner, or the member who added it,")?;
        storage.delete_doc_link(&doc).await.context(StorageSnafu)?;
        Ok(())
    }

    match delete_doc1(&state, user, path).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

/// Return a router for the spaces API
pub fn make_router(state: Arc<Notespace>) -> Router<Arc<Notespace>> {
    Router::new()
        .route("/spaces", get(list_spaces).post(create_space))
        .route("/spaces/{id}", get(get_space).delete(delete_space))
        .route("/spaces/{id}/members", post(add_member))
        .route("/spaces/{id}/members/{username}", delete(remove_member))
        .route("/spaces/{id}/files", post(link_file))
        .route("/spaces/{id}/files/{file_id}", delete(unlink_file))
        .route("/spaces/{id}/docs", post(add_doc))
        .route("/spaces/{id}/docs/{doc_id}", delete(delete_doc))
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
