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

//! # storage
//!
//! Abstractions for the notespace storage layer.
//!
//! The [Backend] trait is deliberately dumb: each method reads or writes a single sort of record.
//! Composite operations (deleting a file along with everything hanging off of it, say) are built
//! on top of it in [crate::cascade]. Deletes are idempotent throughout; removing something that's
//! already gone is not an error.

use std::collections::HashMap;

use async_trait::async_trait;
use snafu::{Backtrace, prelude::*};

use crate::entities::{
    Bookmark, Comment, CommentId, DocLink, DocLinkId, FileId, FileMeta, Rating, Space, SpaceFile,
    SpaceId, SpaceMember, Subject, User, UserId, Username,
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("A record with ID {id} already exists"))]
    AlreadyExists { id: String, backtrace: Backtrace },
    #[snafu(display("Storage backend error: {source}"))]
    Backend {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[snafu(display("The username {username} is already claimed"))]
    UsernameClaimed {
        username: Username,
        backtrace: Backtrace,
    },
}

impl Error {
    /// Wrap an implementation-specific error
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Backend {
            source: Box::new(err),
        }
    }
}

#[async_trait]
pub trait Backend {
    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Users
    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Add a new user; fails with [Error::UsernameClaimed] if the username is taken
    async fn add_user(&self, user: &User) -> Result<(), Error>;
    /// Retrieve a [User] given a textual username. None means there is no user by that name.
    async fn user_for_name(&self, name: &str) -> Result<Option<User>, Error>;
    async fn user_for_id(&self, id: &UserId) -> Result<Option<User>, Error>;
    /// Remove the user record & release the username
    async fn delete_user(&self, user: &User) -> Result<(), Error>;

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Files
    ////////////////////////////////////////////////////////////////////////////////////////////////

    async fn add_file(&self, file: &FileMeta) -> Result<(), Error>;
    async fn file_for_id(&self, id: &FileId) -> Result<Option<FileMeta>, Error>;
    /// Overwrite the metadata for an existing file
    async fn update_file(&self, file: &FileMeta) -> Result<(), Error>;
    /// List files, optionally restricted by owner and/or subject, newest first
    ///
    /// No visibility filtering is done here.
    async fn list_files(
        &self,
        owner: Option<&UserId>,
        subject: Option<&Subject>,
    ) -> Result<Vec<FileMeta>, Error>;
    async fn files_for_owner(&self, owner: &UserId) -> Result<Vec<FileMeta>, Error>;
    /// Remove the metadata record only; see [crate::cascade::delete_file_cascade]
    async fn delete_file(&self, file: &FileMeta) -> Result<(), Error>;
    /// Map each subject to the number of *public* files filed under it
    async fn subject_cloud(&self) -> Result<HashMap<Subject, usize>, Error>;

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Comments
    ////////////////////////////////////////////////////////////////////////////////////////////////

    async fn add_comment(&self, comment: &Comment) -> Result<(), Error>;
    async fn comment_for_id(&self, id: &CommentId) -> Result<Option<Comment>, Error>;
    /// Comments on `file`, oldest first
    async fn comments_for_file(&self, file: &FileId) -> Result<Vec<Comment>, Error>;
    async fn comments_by_author(&self, author: &UserId) -> Result<Vec<Comment>, Error>;
    async fn delete_comment(&self, comment: &Comment) -> Result<(), Error>;

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Ratings
    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Record `rating`, replacing any prior rating by the same user of the same file
    async fn upsert_rating(&self, rating: &Rating) -> Result<(), Error>;
    async fn ratings_for_file(&self, file: &FileId) -> Result<Vec<Rating>, Error>;
    async fn ratings_by_user(&self, user: &UserId) -> Result<Vec<Rating>, Error>;
    async fn delete_rating(&self, user: &UserId, file: &FileId) -> Result<(), Error>;

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Bookmarks
    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Bookmark a file; return true if the bookmark was newly created, false if it already existed
    async fn add_bookmark(&self, bookmark: &Bookmark) -> Result<bool, Error>;
    async fn bookmarks_for_user(&self, user: &UserId) -> Result<Vec<Bookmark>, Error>;
    async fn bookmarks_for_file(&self, file: &FileId) -> Result<Vec<Bookmark>, Error>;
    /// Remove a bookmark; return true if there was one to remove
    async fn delete_bookmark(&self, user: &UserId, file: &FileId) -> Result<bool, Error>;

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Spaces
    ////////////////////////////////////////////////////////////////////////////////////////////////

    async fn add_space(&self, space: &Space) -> Result<(), Error>;
    async fn space_for_id(&self, id: &SpaceId) -> Result<Option<Space>, Error>;
    async fn spaces_owned_by(&self, owner: &UserId) -> Result<Vec<Space>, Error>;
    /// Remove the space record only; see [crate::cascade::delete_space_cascade]
    async fn delete_space(&self, space: &Space) -> Result<(), Error>;
    /// Add a member; return false if they were already a member
    async fn add_member(&self, member: &SpaceMember) -> Result<bool, Error>;
    /// Remove a member; return true if they *were* a member
    async fn remove_member(&self, space: &SpaceId, user: &UserId) -> Result<bool, Error>;
    async fn members_of(&self, space: &SpaceId) -> Result<Vec<SpaceMember>, Error>;
    /// All the spaces to which `user` belongs (not counting those they own)
    async fn memberships_of(&self, user: &UserId) -> Result<Vec<SpaceMember>, Error>;
    /// Link a file into a space; return false if it was already linked
    async fn link_file(&self, link: &SpaceFile) -> Result<bool, Error>;
    /// Unlink a file from a space; return true if it *was* linked
    async fn unlink_file(&self, space: &SpaceId, file: &FileId) -> Result<bool, Error>;
    async fn files_in_space(&self, space: &SpaceId) -> Result<Vec<SpaceFile>, Error>;
    async fn spaces_linking_file(&self, file: &FileId) -> Result<Vec<SpaceFile>, Error>;
    async fn add_doc_link(&self, doc: &DocLink) -> Result<(), Error>;
    async fn doc_link_for_id(&self, id: &DocLinkId) -> Result<Option<DocLink>, Error>;
    async fn doc_links_for_space(&self, space: &SpaceId) -> Result<Vec<DocLink>, Error>;
    async fn doc_links_by_user(&self, user: &UserId) -> Result<Vec<DocLink>, Error>;
    async fn delete_doc_link(&self, doc: &DocLink) -> Result<(), Error>;
}
