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

//! # scylla
//!
//! [Storage] implementation for ScyllaDB.
//!
//! [Storage]: crate::storage
//!
//! Every table is keyed so that the common access path is a partition read; the less common paths
//! (all files under a subject, all comments by an author, ...) go through secondary indices. The
//! one place where we need a uniqueness guarantee, usernames, is handled with a lightweight
//! transaction against a dedicated `usernames` table.

use std::collections::HashMap;

use async_trait::async_trait;
use enum_map::{Enum, EnumMap};
use futures::stream;
use itertools::Itertools;
use scylla::{
    client::{session::Session as ScyllaSession, session_builder::SessionBuilder},
    deserialize::row::DeserializeRow,
    errors::{
        DeserializationError, ExecutionError, FirstRowError, IntoRowsResultError, NewSessionError,
        PrepareError, RowsError, UseKeyspaceError,
    },
    response::query_result::QueryResult,
    serialize::row::SerializeRow,
    statement::prepared::PreparedStatement,
    value::{CqlValue, Row},
};
use snafu::{Backtrace, prelude::*};
use tap::Pipe;
use tracing::{debug, info};

use crate::{
    entities::{
        Bookmark, Comment, CommentId, DocLink, DocLinkId, FileId, FileMeta, Rating, Space,
        SpaceFile, SpaceId, SpaceMember, Subject, User, UserId,
    },
    storage::{self, Error as StorError},
    util::Credentials,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "The number of prepared statements isn't consistent; this is a bug & should be reported!"
    ))]
    BadPreparedStatementCount { backtrace: Backtrace },
    #[snafu(display("Failed to set keyspace {keyspace}: {source}"))]
    Keyspace {
        keyspace: String,
        source: UseKeyspaceError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to create a ScyllaDB session: {source}"))]
    NewSession {
        source: NewSessionError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to prepare statement: {stmt}: {source}"))]
    Prepare {
        stmt: String,
        source: PrepareError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to create schema ({stmt}): {source}"))]
    Schema {
        stmt: String,
        source: ExecutionError,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             schema                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The notespace schema; each statement is idempotent, so it's safe to apply to an existing keyspace
const SCHEMA: &[&str] = &[
    "create table if not exists users (id uuid primary key, username text, email text, display_name text, password_hash text, pepper_version text, created timestamp)",
    "create index if not exists on users (username)",
    "create table if not exists usernames (username text primary key, id uuid)",
    "create table if not exists files (id uuid primary key, owner uuid, subject text, title text, description text, filename text, content_type text, size bigint, sha256 text, public boolean, uploaded timestamp)",
    "create index if not exists on files (owner)",
    "create index if not exists on files (subject)",
    "create table if not exists comments (id uuid primary key, file uuid, author uuid, text text, created timestamp)",
    "create index if not exists on comments (file)",
    "create index if not exists on comments (author)",
    "create table if not exists ratings (file uuid, user uuid, score int, rated timestamp, primary key (file, user))",
    "create index if not exists on ratings (user)",
    "create table if not exists bookmarks (user uuid, file uuid, created timestamp, primary key (user, file))",
    "create index if not exists on bookmarks (file)",
    "create table if not exists spaces (id uuid primary key, owner uuid, name text, description text, created timestamp)",
    "create index if not exists on spaces (owner)",
    "create table if not exists space_members (space uuid, user uuid, added timestamp, primary key (space, user))",
    "create index if not exists on space_members (user)",
    "create table if not exists space_files (space uuid, file uuid, added_by uuid, added timestamp, primary key (space, file))",
    "create index if not exists on space_files (file)",
    "create table if not exists doc_links (id uuid primary key, space uuid, added_by uuid, title text, url text, added timestamp)",
    "create index if not exists on doc_links (space)",
    "create index if not exists on doc_links (added_by)",
];

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                notespace ScyllaDB session type                                 //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The set of prepared statements used by notespace
///
/// This enum serves as both a mnemonic tag identifying prepared statements and as the key type in
/// a mapping from said tags to the actual [PreparedStatement]s. The [Enum] interface comes from
/// the [enum_map] crate; it requires us to provide an array of [PreparedStatement] of length
/// exactly equal to the number of variants in this enumeration.
#[derive(Clone, Copy, Debug, Enum, Eq, PartialEq)]
enum PreparedStatements {
    InsertUser,
    ClaimUsername,
    ReleaseUsername,
    UserForName,
    UserForId,
    DeleteUser,
    InsertFile,
    FileForId,
    AllFiles,
    FilesByOwner,
    FilesBySubject,
    FilesByOwnerAndSubject,
    DeleteFile,
    SubjectCloud,
    InsertComment,
    CommentForId,
    CommentsForFile,
    CommentsByAuthor,
    DeleteComment,
    UpsertRating,
    RatingsForFile,
    RatingsByUser,
    DeleteRating,
    InsertBookmark,
    BookmarksForUser,
    BookmarksForFile,
    DeleteBookmark,
    InsertSpace,
    SpaceForId,
    SpacesOwnedBy,
    DeleteSpace,
    InsertMember,
    DeleteMember,
    MembersOf,
    MembershipsOf,
    InsertSpaceFile,
    DeleteSpaceFile,
    FilesInSpace,
    SpacesLinkingFile,
    InsertDocLink,
    DocLinkForId,
    DocLinksForSpace,
    DocLinksByUser,
    DeleteDocLink,
}

/// Statement text for each of [PreparedStatements], in declaration order
const STATEMENTS: [&str; 44] = [
    "insert into users (id,username,email,display_name,password_hash,pepper_version,created) values (?,?,?,?,?,?,?)",
    "insert into usernames (username,id) values (?,?) if not exists",
    "delete from usernames where username=?",
    "select id,username,email,display_name,password_hash,pepper_version,created from users where username=?",
    "select id,username,email,display_name,password_hash,pepper_version,created from users where id=?",
    "delete from users where id=?",
    // InsertFile
    "insert into files (id,owner,subject,title,description,filename,content_type,size,sha256,public,uploaded) values (?,?,?,?,?,?,?,?,?,?,?)",
    "select id,owner,subject,title,description,filename,content_type,size,sha256,public,uploaded from files where id=?",
    "select id,owner,subject,title,description,filename,content_type,size,sha256,public,uploaded from files",
    "select id,owner,subject,title,description,filename,content_type,size,sha256,public,uploaded from files where owner=?",
    "select id,owner,subject,title,description,filename,content_type,size,sha256,public,uploaded from files where subject=?",
    "select id,owner,subject,title,description,filename,content_type,size,sha256,public,uploaded from files where owner=? and subject=? allow filtering",
    "delete from files where id=?",
    "select subject,public from files", // SubjectCloud
    // InsertComment
    "insert into comments (id,file,author,text,created) values (?,?,?,?,?)",
    "select id,file,author,text,created from comments where id=?",
    "select id,file,author,text,created from comments where file=?",
    "select id,file,author,text,created from comments where author=?",
    "delete from comments where id=?",
    // UpsertRating
    "insert into ratings (file,user,score,rated) values (?,?,?,?)",
    "select user,file,score,rated from ratings where file=?",
    "select user,file,score,rated from ratings where user=?",
    "delete from ratings where file=? and user=?",
    // InsertBookmark
    "insert into bookmarks (user,file,created) values (?,?,?) if not exists",
    "select user,file,created from bookmarks where user=?",
    "select user,file,created from bookmarks where file=?",
    "delete from bookmarks where user=? and file=? if exists",
    // InsertSpace
    "insert into spaces (id,owner,name,description,created) values (?,?,?,?,?)",
    "select id,owner,name,description,created from spaces where id=?",
    "select id,owner,name,description,created from spaces where owner=?",
    "delete from spaces where id=?",
    // InsertMember
    "insert into space_members (space,user,added) values (?,?,?) if not exists",
    "delete from space_members where space=? and user=? if exists",
    "select space,user,added from space_members where space=?",
    "select space,user,added from space_members where user=?",
    // InsertSpaceFile
    "insert into space_files (space,file,added_by,added) values (?,?,?,?) if not exists",
    "delete from space_files where space=? and file=? if exists",
    "select space,file,added_by,added from space_files where space=?",
    "select space,file,added_by,added from space_files where file=?",
    // InsertDocLink
    "insert into doc_links (id,space,added_by,title,url,added) values (?,?,?,?,?,?)",
    "select id,space,added_by,title,url,added from doc_links where id=?",
    "select id,space,added_by,title,url,added from doc_links where space=?",
    "select id,space,added_by,title,url,added from doc_links where added_by=?",
    "delete from doc_links where id=?",
];

/// `notespace`-specific ScyllaDB Session type
///
/// Instantiate this via [Session::new] with connection info & credentials if need be; when dropped
/// the ScyllaDB session will be terminated.
pub struct Session {
    session: ScyllaSession,
    /// An [EnumMap] is a map whose keys are enum values where all values are guaranteed to be
    /// represented, so indexing can't fail.
    prepared_statements: EnumMap<PreparedStatements, PreparedStatement>,
}

impl Session {
    /// Prepare a statement
    async fn prepare(scylla: &ScyllaSession, stmt: &str) -> Result<PreparedStatement> {
        scylla.prepare(stmt).await.context(PrepareSnafu {
            stmt: stmt.to_owned(),
        })
    }

    /// [Session] constructor
    ///
    /// Construct with a collection of ScyllaDB hosts ("host:port"). If `create_schema` is true,
    /// the keyspace (with replication factor one) & tables will be created if they don't exist.
    pub async fn new(
        hosts: impl IntoIterator<Item = impl AsRef<str>>,
        credentials: &Option<Credentials>,
        keyspace: &str,
        create_schema: bool,
    ) -> Result<Session> {
        let mut builder = SessionBuilder::new().known_nodes(hosts);
        if let Some(credentials) = credentials {
            builder = builder.user(credentials.username(), credentials.password())
        }
        let scylla = builder.build().await.context(NewSessionSnafu)?;

        if create_schema {
            let stmt = format!(
                "create keyspace if not exists {} with replication = {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                keyspace
            );
            scylla
                .query_unpaged(stmt.as_str(), ())
                .await
                .context(SchemaSnafu { stmt: stmt.clone() })?;
        }

        scylla
            .use_keyspace(keyspace, false)
            .await
            .context(KeyspaceSnafu { keyspace })?;

        if create_schema {
            for stmt in SCHEMA {
                scylla
                    .query_unpaged(*stmt, ())
                    .await
                    .context(SchemaSnafu { stmt: *stmt })?;
            }
            info!("Schema applied to keyspace {}", keyspace);
        }

        use futures::stream::StreamExt;
        let prepared_statements = stream::iter(STATEMENTS)
            .then(|s| async { Self::prepare(&scylla, s).await })
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<PreparedStatement>>>()?;
        let prepared_statements: [PreparedStatement; 44] = prepared_statements
            .try_into()
            .map_err(|_| BadPreparedStatementCountSnafu.build())?;

        Ok(Session {
            session: scylla,
            prepared_statements: EnumMap::from_array(prepared_statements),
        })
    }

    /// Execute a prepared statement, disregarding any result
    async fn exec(
        &self,
        stmt: PreparedStatements,
        values: impl SerializeRow + Send,
    ) -> StdResult<QueryResult, StorError> {
        debug!("Executing {:?}", stmt);
        Ok(self
            .session
            .execute_unpaged(&self.prepared_statements[stmt], values)
            .await?)
    }

    /// Execute a prepared statement & deserialize every row of the result
    async fn rows<R>(
        &self,
        stmt: PreparedStatements,
        values: impl SerializeRow + Send,
    ) -> StdResult<Vec<R>, StorError>
    where
        R: for<'frame, 'metadata> DeserializeRow<'frame, 'metadata>,
    {
        self.exec(stmt, values)
            .await?
            .into_rows_result()?
            .rows::<R>()?
            .collect::<StdResult<Vec<R>, _>>()?
            .pipe(Ok)
    }

    /// Execute a prepared statement expected to produce at most one row
    async fn at_most_one<R>(
        &self,
        stmt: PreparedStatements,
        values: impl SerializeRow + Send,
    ) -> StdResult<Option<R>, StorError>
    where
        R: for<'frame, 'metadata> DeserializeRow<'frame, 'metadata>,
    {
        self.rows::<R>(stmt, values)
            .await?
            .into_iter()
            .at_most_one()
            .map_err(|_| StorError::new(AtMostOneSnafu { stmt }.build()))
    }

    /// Execute a lightweight transaction, returning true if it was applied
    async fn lwt(
        &self,
        stmt: PreparedStatements,
        values: impl SerializeRow + Send,
    ) -> StdResult<bool, StorError> {
        // The first column of an LWT result is always the boolean "[applied]"; what follows
        // depends on whether it was applied or not.
        self.exec(stmt, values)
            .await?
            .into_rows_result()?
            .first_row::<Row>()?
            .columns
            .first()
            .pipe(|col| matches!(col, Some(Some(CqlValue::Boolean(true)))))
            .pipe(Ok)
    }
}

/// Returned when a statement that should produce at most one row produces more
#[derive(Debug, Snafu)]
#[snafu(display("{stmt:?} was expected to produce at most one row & did not"))]
struct AtMostOne {
    stmt: PreparedStatements,
    backtrace: Backtrace,
}

// Use these if you don't want to add any context to a failed query.
impl std::convert::From<ExecutionError> for StorError {
    fn from(value: ExecutionError) -> Self {
        StorError::new(value)
    }
}

impl std::convert::From<IntoRowsResultError> for StorError {
    fn from(value: IntoRowsResultError) -> Self {
        StorError::new(value)
    }
}

impl std::convert::From<RowsError> for StorError {
    fn from(value: RowsError) -> Self {
        StorError::new(value)
    }
}

impl std::convert::From<DeserializationError> for StorError {
    fn from(value: DeserializationError) -> Self {
        StorError::new(value)
    }
}

impl std::convert::From<FirstRowError> for StorError {
    fn from(value: FirstRowError) -> Self {
        StorError::new(value)
    }
}

/// Newest first
fn newest_first(mut files: Vec<FileMeta>) -> Vec<FileMeta> {
    files.sort_by(|lhs, rhs| rhs.uploaded.cmp(&lhs.uploaded));
    files
}

#[async_trait]
impl storage::Backend for Session {
    async fn add_user(&self, user: &User) -> StdResult<(), StorError> {
        // Claim the name first; the user row is only written once it's ours.
        if !self
            .lwt(
                PreparedStatements::ClaimUsername,
                (user.username(), user.id()),
            )
            .await?
        {
            return storage::UsernameClaimedSnafu {
                username: user.username().clone(),
            }
            .fail();
        }
        self.exec(
            PreparedStatements::InsertUser,
            (
                user.id(),
                user.username(),
                user.email(),
                user.display_name(),
                user.hash(),
                user.pepper_version(),
                user.created(),
            ),
        )
        .await?;
        Ok(())
    }

    async fn user_for_name(&self, name: &str) -> StdResult<Option<User>, StorError> {
        self.at_most_one::<User>(PreparedStatements::UserForName, (name,))
            .await
    }

    async fn user_for_id(&self, id: &UserId) -> StdResult<Option<User>, StorError> {
        self.at_most_one::<User>(PreparedStatements::UserForId, (id,))
            .await
    }

    async fn delete_user(&self, user: &User) -> StdResult<(), StorError> {
        self.exec(PreparedStatements::DeleteUser, (user.id(),))
            .await?;
        // Release the name last, so it can't be re-claimed while the old row still exists
        self.exec(PreparedStatements::ReleaseUsername, (user.username(),))
            .await?;
        Ok(())
    }

    async fn add_file(&self, file: &FileMeta) -> StdResult<(), StorError> {
        self.update_file(file).await
    }

    async fn file_for_id(&self, id: &FileId) -> StdResult<Option<FileMeta>, StorError> {
        self.at_most_one::<FileMeta>(PreparedStatements::FileForId, (id,))
            .await
    }

    async fn update_file(&self, file: &FileMeta) -> StdResult<(), StorError> {
        self.exec(
            PreparedStatements::InsertFile,
            (
                &file.id,
                &file.owner,
                &file.subject,
                &file.title,
                &file.description,
                &file.filename,
                &file.content_type,
                file.size,
                &file.sha256,
                file.public,
                file.uploaded,
            ),
        )
        .await?;
        Ok(())
    }

    async fn list_files(
        &self,
        owner: Option<&UserId>,
        subject: Option<&Subject>,
    ) -> StdResult<Vec<FileMeta>, StorError> {
        match (owner, subject) {
            (None, None) => self.rows(PreparedStatements::AllFiles, ()).await,
            (Some(owner), None) => self.rows(PreparedStatements::FilesByOwner, (owner,)).await,
            (None, Some(subject)) => {
                self.rows(PreparedStatements::FilesBySubject, (subject,))
                    .await
            }
            (Some(owner), Some(subject)) => {
                self.rows(
                    PreparedStatements::FilesByOwnerAndSubject,
                    (owner, subject),
                )
                .await
            }
        }?
        .pipe(newest_first)
        .pipe(Ok)
    }

    async fn files_for_owner(&self, owner: &UserId) -> StdResult<Vec<FileMeta>, StorError> {
        self.list_files(Some(owner), None).await
    }

    async fn delete_file(&self, file: &FileMeta) -> StdResult<(), StorError> {
        self.exec(PreparedStatements::DeleteFile, (&file.id,))
            .await?;
        Ok(())
    }

    async fn subject_cloud(&self) -> StdResult<HashMap<Subject, usize>, StorError> {
        self.rows::<(Subject, bool)>(PreparedStatements::SubjectCloud, ())
            .await?
            .into_iter()
            .filter_map(|(subject, public)| public.then_some(subject))
            .counts()
            .pipe(Ok)
    }

    async fn add_comment(&self, comment: &Comment) -> StdResult<(), StorError> {
        self.exec(
            PreparedStatements::InsertComment,
            (
                &comment.id,
                &comment.file,
                &comment.author,
                &comment.text,
                comment.created,
            ),
        )
        .await?;
        Ok(())
    }

    async fn comment_for_id(&self, id: &CommentId) -> StdResult<Option<Comment>, StorError> {
        self.at_most_one::<Comment>(PreparedStatements::CommentForId, (id,))
            .await
    }

    async fn comments_for_file(&self, file: &FileId) -> StdResult<Vec<Comment>, StorError> {
        let mut comments = self
            .rows::<Comment>(PreparedStatements::CommentsForFile, (file,))
            .await?;
        comments.sort_by(|lhs, rhs| lhs.created.cmp(&rhs.created));
        Ok(comments)
    }

    async fn comments_by_author(&self, author: &UserId) -> StdResult<Vec<Comment>, StorError> {
        self.rows(PreparedStatements::CommentsByAuthor, (author,))
            .await
    }

    async fn delete_comment(&self, comment: &Comment) -> StdResult<(), StorError> {
        self.exec(PreparedStatements::DeleteComment, (&comment.id,))
            .await?;
        Ok(())
    }

    async fn upsert_rating(&self, rating: &Rating) -> StdResult<(), StorError> {
        self.exec(
            PreparedStatements::UpsertRating,
            (&rating.file, &rating.user, rating.score, rating.rated),
        )
        .await?;
        Ok(())
    }

    async fn ratings_for_file(&self, file: &FileId) -> StdResult<Vec<Rating>, StorError> {
        self.rows(PreparedStatements::RatingsForFile, (file,)).await
    }

    async fn ratings_by_user(&self, user: &UserId) -> StdResult<Vec<Rating>, StorError> {
        self.rows(PreparedStatements::RatingsByUser, (user,)).await
    }

    async fn delete_rating(&self, user: &UserId, file: &FileId) -> StdResult<(), StorError> {
        self.exec(PreparedStatements::DeleteRating, (file, user))
            .await?;
        Ok(())
    }

    async fn add_bookmark(&self, bookmark: &Bookmark) -> StdResult<bool, StorError> {
        self.lwt(
            PreparedStatements::InsertBookmark,
            (&bookmark.user, &bookmark.file, bookmark.created),
        )
        .await
    }

    async fn bookmarks_for_user(&self, user: &UserId) -> StdResult<Vec<Bookmark>, StorError> {
        let mut bookmarks = self
            .rows::<Bookmark>(PreparedStatements::BookmarksForUser, (user,))
            .await?;
        bookmarks.sort_by(|lhs, rhs| rhs.created.cmp(&lhs.created));
        Ok(bookmarks)
    }

    async fn bookmarks_for_file(&self, file: &FileId) -> StdResult<Vec<Bookmark>, StorError> {
        self.rows(PreparedStatements::BookmarksForFile, (file,))
            .await
    }

    async fn delete_bookmark(&self, user: &UserId, file: &FileId) -> StdResult<bool, StorError> {
        self.lwt(PreparedStatements::DeleteBookmark, (user, file))
            .await
    }

    async fn add_space(&self, space: &Space) -> StdResult<(), StorError> {
        self.exec(
            PreparedStatements::InsertSpace,
            (
                &space.id,
                &space.owner,
                &space.name,
                &space.description,
                space.created,
            ),
        )
        .await?;
        Ok(())
    }

    async fn space_for_id(&self, id: &SpaceId) -> StdResult<Option<Space>, StorError> {
        self.at_most_one::<Space>(PreparedStatements::SpaceForId, (id,))
            .await
    }

    async fn spaces_owned_by(&self, owner: &UserId) -> StdResult<Vec<Space>, StorError> {
        self.rows(PreparedStatements::SpacesOwnedBy, (owner,)).await
    }

    async fn delete_space(&self, space: &Space) -> StdResult<(), StorError> {
        self.exec(PreparedStatements::DeleteSpace, (&space.id,))
            .await?;
        Ok(())
    }

    async fn add_member(&self, member: &SpaceMember) -> StdResult<bool, StorError> {
        self.lwt(
            PreparedStatements::InsertMember,
            (&member.space, &member.user, member.added),
        )
        .await
    }

    async fn remove_member(&self, space: &SpaceId, user: &UserId) -> StdResult<bool, StorError> {
        self.lwt(PreparedStatements::DeleteMember, (space, user))
            .await
    }

    async fn members_of(&self, space: &SpaceId) -> StdResult<Vec<SpaceMember>, StorError> {
        self.rows(PreparedStatements::MembersOf, (space,)).await
    }

    async fn memberships_of(&self, user: &UserId) -> StdResult<Vec<SpaceMember>, StorError> {
        self.rows(PreparedStatements::MembershipsOf, (user,)).await
    }

    async fn link_file(&self, link: &SpaceFile) -> StdResult<bool, StorError> {
        self.lwt(
            PreparedStatements::InsertSpaceFile,
            (&link.space, &link.file, &link.added_by, link.added),
        )
        .await
    }

    async fn unlink_file(&self, space: &SpaceId, file: &FileId) -> StdResult<bool, StorError> {
        self.lwt(PreparedStatements::DeleteSpaceFile, (space, file))
            .await
    }

    async fn files_in_space(&self, space: &SpaceId) -> StdResult<Vec<SpaceFile>, StorError> {
        self.rows(PreparedStatements::FilesInSpace, (space,)).await
    }

    async fn spaces_linking_file(&self, file: &FileId) -> StdResult<Vec<SpaceFile>, StorError> {
        self.rows(PreparedStatements::SpacesLinkingFile, (file,))
            .await
    }

    async fn add_doc_link(&self, doc: &DocLink) -> StdResult<(), StorError> {
        self.exec(
            PreparedStatements::InsertDocLink,
            (
                &doc.id,
                &doc.space,
                &doc.added_by,
                &doc.title,
                &doc.url,
                doc.added,
            ),
        )
        .await?;
        Ok(())
    }

    async fn doc_link_for_id(&self, id: &DocLinkId) -> StdResult<Option<DocLink>, StorError> {
        self.at_most_one::<DocLink>(PreparedStatements::DocLinkForId, (id,))
            .await
    }

    async fn doc_links_for_space(&self, space: &SpaceId) -> StdResult<Vec<DocLink>, StorError> {
        self.rows(PreparedStatements::DocLinksForSpace, (space,))
            .await
    }

    async fn doc_links_by_user(&self, user: &UserId) -> StdResult<Vec<DocLink>, StorError> {
        self.rows(PreparedStatements::DocLinksByUser, (user,))
            .await
    }

    async fn delete_doc_link(&self, doc: &DocLink) -> StdResult<(), StorError> {
        self.exec(PreparedStatements::DeleteDocLink, (&doc.id,))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use scylla::{
        cluster::metadata::{ColumnType, NativeType},
        errors::TypeCheckError,
        frame::response::result::{ColumnSpec, TableSpec},
    };

    /// Column types for `table` as declared in [SCHEMA]
    fn schema_columns(table: &str) -> HashMap<&'static str, ColumnType<'static>> {
        let prefix = format!("create table if not exists {} (", table);
        let stmt: &'static str = SCHEMA
            .iter()
            .copied()
            .find(|stmt| stmt.starts_with(&prefix))
            .unwrap();
        stmt[prefix.len()..stmt.len() - 1]
            .split(", primary key")
            .next()
            .unwrap()
            .split(", ")
            .map(|col| {
                let mut words = col.split(' ');
                let name = words.next().unwrap();
                let typ = match words.next().unwrap() {
                    "bigint" => NativeType::BigInt,
                    "boolean" => NativeType::Boolean,
                    "int" => NativeType::Int,
                    "text" => NativeType::Text,
                    "timestamp" => NativeType::Timestamp,
                    "uuid" => NativeType::Uuid,
                    other => panic!("unexpected column type {}", other),
                };
                (name, ColumnType::Native(typ))
            })
            .collect()
    }

    /// Run `R`'s row type check against the result columns of `stmt`, a select
    fn check_select<R>(stmt: PreparedStatements) -> StdResult<(), TypeCheckError>
    where
        R: for<'frame, 'metadata> DeserializeRow<'frame, 'metadata>,
    {
        let text = STATEMENTS[stmt.into_usize()];
        let (columns, rest) = text
            .strip_prefix("select ")
            .unwrap()
            .split_once(" from ")
            .unwrap();
        let table = rest.split(' ').next().unwrap();
        let types = schema_columns(table);
        let specs = columns
            .split(',')
            .map(|name| {
                ColumnSpec::borrowed(
                    name,
                    types[name].clone(),
                    TableSpec::borrowed("notespace", table),
                )
            })
            .collect::<Vec<_>>();
        R::type_check(&specs)
    }

    #[test]
    fn rows_match_entities() {
        use PreparedStatements::*;
        for stmt in [UserForName, UserForId] {
            assert!(check_select::<User>(stmt).is_ok(), "{:?}", stmt);
        }
        for stmt in [
            FileForId,
            AllFiles,
            FilesByOwner,
            FilesBySubject,
            FilesByOwnerAndSubject,
        ] {
            assert!(check_select::<FileMeta>(stmt).is_ok(), "{:?}", stmt);
        }
        for stmt in [CommentForId, CommentsForFile, CommentsByAuthor] {
            assert!(check_select::<Comment>(stmt).is_ok(), "{:?}", stmt);
        }
        for stmt in [RatingsForFile, RatingsByUser] {
            assert!(check_select::<Rating>(stmt).is_ok(), "{:?}", stmt);
        }
        for stmt in [BookmarksForUser, BookmarksForFile] {
            assert!(check_select::<Bookmark>(stmt).is_ok(), "{:?}", stmt);
        }
        for stmt in [SpaceForId, SpacesOwnedBy] {
            assert!(check_select::<Space>(stmt).is_ok(), "{:?}", stmt);
        }
        for stmt in [MembersOf, MembershipsOf] {
            assert!(check_select::<SpaceMember>(stmt).is_ok(), "{:?}", stmt);
        }
        for stmt in [FilesInSpace, SpacesLinkingFile] {
            assert!(check_select::<SpaceFile>(stmt).is_ok(), "{:?}", stmt);
        }
        for stmt in [DocLinkForId, DocLinksForSpace, DocLinksByUser] {
            assert!(check_select::<DocLink>(stmt).is_ok(), "{:?}", stmt);
        }
    }

    #[test]
    fn rows_are_matched_by_name() {
        let table = TableSpec::borrowed("notespace", "users");
        let text = || ColumnType::Native(NativeType::Text);
        let specs = [
            ColumnSpec::borrowed("id", ColumnType::Native(NativeType::Uuid), table.clone()),
            ColumnSpec::borrowed("username", text(), table.clone()),
            ColumnSpec::borrowed("email", text(), table.clone()),
            ColumnSpec::borrowed("display_name", text(), table.clone()),
            ColumnSpec::borrowed("hash", text(), table.clone()),
            ColumnSpec::borrowed("pepper_version", text(), table.clone()),
            ColumnSpec::borrowed(
                "created",
                ColumnType::Native(NativeType::Timestamp),
                table.clone(),
            ),
        ];
        assert!(<User as DeserializeRow>::type_check(&specs).is_err());
    }

    #[test]
    fn schema_is_idempotent() {
        assert!(
            SCHEMA
                .iter()
                .all(|stmt| stmt.contains("if not exists"))
        );
    }
}
