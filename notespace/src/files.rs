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

//! # The files API
//!
//! Upload, list, download, edit & delete files, plus the subject cloud. Uploads are
//! `multipart/form-data` with these fields:
//!
//! - `file` (required): the content, with a filename in its `Content-Disposition`
//! - `subject` (required): the subject under which to file it
//! - `title`: defaults to the filename
//! - `description`
//! - `public`: "true" or "false"; defaults to true
//!
//! Files the caller can't see (see [crate::access]) answer 404, never 403.

use std::{collections::HashMap, sync::Arc};

use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{
        DefaultBodyLimit, Multipart, Path, Query, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::{ExtensionRejection, JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{error, info, warn};

use crate::{
    access::Viewer,
    authn::authenticate,
    blobs::{self, BlobStore},
    cascade::{self, delete_file_cascade},
    define_metric,
    entities::{self, FileId, FileMeta, Filename, RatingSummary, Subject, User},
    http::error_response,
    metrics::Sort,
    notespace::Notespace,
    storage,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Bad request body: {source}"))]
    BadBody { source: JsonRejection },
    #[snafu(display("Invalid {name}: {source}"))]
    BadField {
        name: &'static str,
        source: entities::Error,
    },
    #[snafu(display("Failed to read multipart body: {source}"))]
    BadMultipart { source: MultipartError },
    #[snafu(display("Expected a multipart/form-data body: {source}"))]
    BadMultipartRequest { source: MultipartRejection },
    #[snafu(display("Bad path: {source}"))]
    BadPath { source: PathRejection },
    #[snafu(display("'public' must be 'true' or 'false'; got {text}"))]
    BadPublic { text: String, backtrace: Backtrace },
    #[snafu(display("Bad query string: {source}"))]
    BadQuery { source: QueryRejection },
    #[snafu(display("Blob store failure: {source}"))]
    Blob { source: blobs::Error },
    #[snafu(display("Failed to delete file {id}: {source}"))]
    Cascade { id: FileId, source: cascade::Error },
    #[snafu(display("Only the owner of file {id} may do that"))]
    Forbidden { id: FileId, backtrace: Backtrace },
    #[snafu(display("The content of file {id} is missing"))]
    MissingContent { id: FileId, backtrace: Backtrace },
    #[snafu(display("Missing multipart field {name}"))]
    MissingField {
        name: &'static str,
        backtrace: Backtrace,
    },
    #[snafu(display("This endpoint requires authentication"))]
    NotAuthenticated { backtrace: Backtrace },
    #[snafu(display("No such file {id}"))]
    NotFound { id: FileId, backtrace: Backtrace },
    #[snafu(display("Storage failure: {source}"))]
    Storage { source: storage::Error },
    #[snafu(display("Upload of {size} bytes exceeds the limit of {limit}"))]
    TooLarge {
        size: usize,
        limit: usize,
        backtrace: Backtrace,
    },
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            // Broken requests-- tell the caller how to fix it
            Error::BadBody { source } => (StatusCode::BAD_REQUEST, source.body_text()),
            Error::BadField { .. }
            | Error::BadPublic { .. }
            | Error::MissingField { .. } => (StatusCode::BAD_REQUEST, format!("{}", self)),
            Error::BadMultipart { source } => (source.status(), source.body_text()),
            Error::BadMultipartRequest { source } => (source.status(), source.body_text()),
            Error::BadPath { source } => (StatusCode::BAD_REQUEST, source.body_text()),
            Error::BadQuery { source } => (StatusCode::BAD_REQUEST, source.body_text()),
            Error::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, format!("{}", self)),
            Error::NotAuthenticated { .. } => {
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            Error::Forbidden { .. } => (StatusCode::FORBIDDEN, format!("{}", self)),
            Error::NotFound { .. } => (StatusCode::NOT_FOUND, format!("{}", self)),
            // Internal failure-- own up to it
            Error::Blob { .. }
            | Error::Cascade { .. }
            | Error::MissingContent { .. }
            | Error::Storage { .. } => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", self)),
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

/// Look up a file the caller can see; 404 otherwise
async fn visible_file(state: &Notespace, viewer: &Viewer, id: &FileId) -> Result<FileMeta> {
    viewer
        .visible_file(state.storage.as_ref(), id)
        .await
        .context(StorageSnafu)?
        .context(NotFoundSnafu { id: *id })
}

/// Look up a file the caller *owns*; 404 if they can't see it, 403 if they can but don't own it
async fn owned_file(state: &Notespace, user: &User, id: &FileId) -> Result<FileMeta> {
    let viewer = Viewer::new(state.storage.as_ref(), Some(user))
        .await
        .context(StorageSnafu)?;
    let file = visible_file(state, &viewer, id).await?;
    ensure!(file.owner == user.id(), ForbiddenSnafu { id: *id });
    Ok(file)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          `POST /files`                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

define_metric! { "files.uploads.successful", files_uploads_successful, Sort::IntegralCounter }
define_metric! { "files.uploads.failures",   files_uploads_failures,   Sort::IntegralCounter }

#[derive(Debug, Default)]
struct Upload {
    content: Option<(Option<String>, Option<String>, Bytes)>,
    subject: Option<String>,
    title: Option<String>,
    description: Option<String>,
    public: Option<String>,
}

async fn read_upload(mut multipart: Multipart, limit: usize) -> Result<Upload> {
    let mut upload = Upload::default();
    while let Some(field) = multipart.next_field().await.context(BadMultipartSnafu)? {
        let name = field.name().map(|s| s.to_owned());
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().map(|s| s.to_owned());
                let content_type = field.content_type().map(|s| s.to_owned());
                let bytes = field.bytes().await.context(BadMultipartSnafu)?;
                ensure!(
                    bytes.len() <= limit,
                    TooLargeSnafu {
                        size: bytes.len(),
                        limit
                    }
                );
                upload.content = Some((filename, content_type, bytes));
            }
            Some("subject") => upload.subject = Some(field.text().await.context(BadMultipartSnafu)?),
            Some("title") => upload.title = Some(field.text().await.context(BadMultipartSnafu)?),
            Some("description") => {
                upload.description = Some(field.text().await.context(BadMultipartSnafu)?)
            }
            Some("public") => upload.public = Some(field.text().await.context(BadMultipartSnafu)?),
            _ => (),
        }
    }
    Ok(upload)
}

/// Write `content` for `file` to the blob store, then run `record` (which should write the
/// metadata). Content goes first: a blob with no metadata is invisible, metadata with no blob is a
/// 500. Should `record` fail the blob is taken back out.
async fn store_content(
    blobs: &(dyn BlobStore + Send + Sync),
    file: &FileMeta,
    content: &[u8],
    record: impl Future<Output = StdResult<(), storage::Error>>,
) -> Result<()> {
    blobs.put(&file.id, content).await.context(BlobSnafu)?;
    if let Err(err) = record.await {
        if let Err(blob_err) = blobs.delete(&file.id).await {
            warn!("Orphaned the content of {}: {}", file.id, blob_err);
        }
        return Err(err).context(StorageSnafu);
    }
    Ok(())
}

/// Upload a new file
async fn upload(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    multipart: StdResult<Multipart, MultipartRejection>,
) -> axum::response::Response {
    async fn upload1(
        state: &Notespace,
        user: MaybeUser,
        multipart: StdResult<Multipart, MultipartRejection>,
    ) -> Result<FileMeta> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let multipart = multipart.context(BadMultipartRequestSnafu)?;
        let upload = read_upload(multipart, state.max_upload_bytes).await?;

        let (filename, content_type, content) =
            upload.content.context(MissingFieldSnafu { name: "file" })?;
        let filename = Filename::new(&filename.unwrap_or_default())
            .context(BadFieldSnafu { name: "filename" })?;
        let subject = Subject::new(upload.subject.as_deref().context(MissingFieldSnafu {
            name: "subject",
        })?)
        .context(BadFieldSnafu { name: "subject" })?;
        let public = match upload.public.as_deref().map(str::trim) {
            None | Some("true") => true,
            Some("false") => false,
            Some(text) => {
                return BadPublicSnafu {
                    text: text.to_owned(),
                }
                .fail();
            }
        };

        let file = FileMeta::new(
            &user.id(),
            subject,
            upload.title,
            upload.description,
            filename,
            content_type,
            public,
            &content,
        );
        store_content(
            state.blobs.as_ref(),
            &file,
            &content,
            state.storage.add_file(&file),
        )
        .await?;
        info!(
            "{} uploaded {} ({} bytes) as {}",
            user.username(),
            file.filename,
            file.size,
            file.id
        );
        Ok(file)
    }

    match upload1(&state, user, multipart).await {
        Ok(file) => {
            files_uploads_successful.add(1, &[]);
            (StatusCode::CREATED, Json(file)).into_response()
        }
        Err(err) => {
            log_failure(&err);
            files_uploads_failures.add(1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          `GET /files`                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize)]
pub struct ListParams {
    subject: Option<String>,
    /// Owner's username
    owner: Option<String>,
}

/// List the files visible to the caller, newest first, optionally by subject and/or owner
async fn list(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    params: StdResult<Query<ListParams>, QueryRejection>,
) -> axum::response::Response {
    async fn list1(
        state: &Notespace,
        user: MaybeUser,
        params: StdResult<Query<ListParams>, QueryRejection>,
    ) -> Result<Vec<FileMeta>> {
        let Query(params) = params.context(BadQuerySnafu)?;
        let storage = state.storage.as_ref();
        let subject = params
            .subject
            .as_deref()
            .map(Subject::new)
            .transpose()
            .context(BadFieldSnafu { name: "subject" })?;
        let owner = match params.owner.as_deref() {
            Some(name) => match storage.user_for_name(name).await.context(StorageSnafu)? {
                Some(owner) => Some(owner.id()),
                // Nobody by that name owns anything
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        let user = user.ok().map(|Extension(user)| user);
        let viewer = Viewer::new(storage, user.as_ref())
            .await
            .context(StorageSnafu)?;
        let files = storage
            .list_files(owner.as_ref(), subject.as_ref())
            .await
            .context(StorageSnafu)?;
        viewer.filter(storage, files).await.context(StorageSnafu)
    }

    match list1(&state, user, params).await {
        Ok(files) => (StatusCode::OK, Json(files)).into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        `GET /files/{id}`                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FileRsp {
    #[serde(flatten)]
    pub file: FileMeta,
    pub rating: RatingSummary,
}

/// Retrieve a file's metadata, along with its rating summary
async fn get_file(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<FileId>, PathRejection>,
) -> axum::response::Response {
    async fn get_file1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<FileId>, PathRejection>,
    ) -> Result<FileRsp> {
        let Path(id) = id.context(BadPathSnafu)?;
        let user = user.ok().map(|Extension(user)| user);
        let viewer = Viewer::new(state.storage.as_ref(), user.as_ref())
            .await
            .context(StorageSnafu)?;
        let file = visible_file(state, &viewer, &id).await?;
        let ratings = state
            .storage
            .ratings_for_file(&id)
            .await
            .context(StorageSnafu)?;
        Ok(FileRsp {
            file,
            rating: RatingSummary::new(&ratings, viewer.user()),
        })
    }

    match get_file1(&state, user, id).await {
        Ok(rsp) => (StatusCode::OK, Json(rsp)).into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    `GET /files/{id}/content`                                   //
////////////////////////////////////////////////////////////////////////////////////////////////////

define_metric! { "files.downloads", files_downloads, Sort::IntegralCounter }

/// Quote a filename for use in `Content-Disposition`; anything outside printable ASCII, along with
/// quotes & backslashes, becomes '_'
fn disposition_for(filename: &Filename) -> HeaderValue {
    let quoted: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", quoted))
        .unwrap_or(HeaderValue::from_static("attachment"))
}

/// Download a file's content
async fn get_content(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<FileId>, PathRejection>,
) -> axum::response::Response {
    async fn get_content1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<FileId>, PathRejection>,
    ) -> Result<(FileMeta, Bytes)> {
        let Path(id) = id.context(BadPathSnafu)?;
        let user = user.ok().map(|Extension(user)| user);
        let viewer = Viewer::new(state.storage.as_ref(), user.as_ref())
            .await
            .context(StorageSnafu)?;
        let file = visible_file(state, &viewer, &id).await?;
        let content = state
            .blobs
            .get(&id)
            .await
            .context(BlobSnafu)?
            .context(MissingContentSnafu { id })?;
        Ok((file, content))
    }

    match get_content1(&state, user, id).await {
        Ok((file, content)) => {
            files_downloads.add(1, &[]);
            let content_type = HeaderValue::from_str(&file.content_type)
                .unwrap_or(HeaderValue::from_static("application/octet-stream"));
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, content_type),
                    (header::CONTENT_DISPOSITION, disposition_for(&file.filename)),
                ],
                Body::from(content),
            )
                .into_response()
        }
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       `PATCH /files/{id}`                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PatchReq {
    title: Option<String>,
    /// An empty description clears it
    description: Option<String>,
    subject: Option<Subject>,
    public: Option<bool>,
}

/// Edit a file's metadata (the content is immutable)
async fn patch_file(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<FileId>, PathRejection>,
    req: StdResult<Json<PatchReq>, JsonRejection>,
) -> axum::response::Response {
    async fn patch_file1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<FileId>, PathRejection>,
        req: StdResult<Json<PatchReq>, JsonRejection>,
    ) -> Result<FileMeta> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Path(id) = id.context(BadPathSnafu)?;
        let Json(req) = req.context(BadBodySnafu)?;
        let mut file = owned_file(state, &user, &id).await?;
        if let Some(title) = req.title.filter(|t| !t.trim().is_empty()) {
            file.title = title;
        }
        if let Some(description) = req.description {
            file.description = Some(description).filter(|d| !d.trim().is_empty());
        }
        if let Some(subject) = req.subject {
            file.subject = subject;
        }
        if let Some(public) = req.public {
            file.public = public;
        }
        state.storage.update_file(&file).await.context(StorageSnafu)?;
        Ok(file)
    }

    match patch_file1(&state, user, id, req).await {
        Ok(file) => (StatusCode::OK, Json(file)).into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      `DELETE /files/{id}`                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

define_metric! { "files.deletions", files_deletions, Sort::IntegralCounter }

/// Delete a file along with its comments, ratings, bookmarks & space links
async fn delete_file(
    State(state): State<Arc<Notespace>>,
    user: MaybeUser,
    id: StdResult<Path<FileId>, PathRejection>,
) -> axum::response::Response {
    async fn delete_file1(
        state: &Notespace,
        user: MaybeUser,
        id: StdResult<Path<FileId>, PathRejection>,
    ) -> Result<()> {
        let Extension(user) = user.ok().context(NotAuthenticatedSnafu)?;
        let Path(id) = id.context(BadPathSnafu)?;
        let file = owned_file(state, &user, &id).await?;
        let summary = delete_file_cascade(state.storage.as_ref(), state.blobs.as_ref(), &file)
            .await
            .context(CascadeSnafu { id })?;
        info!("{} deleted file {}: {:?}", user.username(), id, summary);
        Ok(())
    }

    match delete_file1(&state, user, id).await {
        Ok(()) => {
            files_deletions.add(1, &[]);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         `GET /subjects`                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SubjectsRsp {
    pub subjects: HashMap<Subject, usize>,
}

/// The subject cloud: each subject with at least one public file, along with its file count
async fn subjects(State(state): State<Arc<Notespace>>) -> axum::response::Response {
    match state.storage.subject_cloud().await.context(StorageSnafu) {
        Ok(subjects) => (StatusCode::OK, Json(SubjectsRsp { subjects })).into_response(),
        Err(err) => {
            log_failure(&err);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Multipart framing on top of the file content itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Return a router for the files API
pub fn make_router(state: Arc<Notespace>) -> Router<Arc<Notespace>> {
    Router::new()
        .route("/files", get(list).post(upload))
        .route(
            "/files/{id}",
            get(get_file).patch(patch_file).delete(delete_file),
        )
        .route("/files/{id}/content", get(get_content))
        .route("/subjects", get(subjects))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            authenticate,
        ))
        .layer(DefaultBodyLimit::max(
            state.max_upload_bytes + MULTIPART_OVERHEAD,
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/json; charset=utf-8"),
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{blobs::MemoryBlobs, entities::UserId};

    fn lecture_notes() -> FileMeta {
        FileMeta::new(
            &UserId::new(),
            Subject::new("Organic Chemistry").unwrap(),
            None,
            None,
            Filename::new("notes.txt").unwrap(),
            None,
            true,
            b"Benzene",
        )
    }

    #[tokio::test]
    async fn content_follows_metadata() {
        let blobs = MemoryBlobs::new();

        let file = lecture_notes();
        store_content(&blobs, &file, b"Benzene", async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(
            Some(Bytes::from_static(b"Benzene")),
            blobs.get(&file.id).await.unwrap()
        );

        // The metadata write fails: nothing may be left behind
        let file = lecture_notes();
        let res = store_content(&blobs, &file, b"Benzene", async {
            Err(storage::Error::new(std::io::Error::other("disk full")))
        })
        .await;
        assert!(matches!(res, Err(Error::Storage { .. })));
        assert!(blobs.get(&file.id).await.unwrap().is_none());
    }

    #[test]
    fn content_disposition() {
        assert_eq!(
            "attachment; filename=\"lecture 1.pdf\"",
            disposition_for(&Filename::new("lecture 1.pdf").unwrap())
                .to_str()
                .unwrap()
        );
        assert_eq!(
            "attachment; filename=\"_quoted_ r_sum_.txt\"",
            disposition_for(&Filename::new("\"quoted\" résumé.txt").unwrap())
                .to_str()
                .unwrap()
        );
    }
}
