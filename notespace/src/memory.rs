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

//! # In-memory storage
//!
//! A [storage::Backend](crate::storage::Backend) implementation that keeps everything in hash maps
//! behind a single [RwLock]. It's the default when no database is configured, and what the test
//! suite runs against. Nothing survives a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    entities::{
        Bookmark, Comment, CommentId, DocLink, DocLinkId, FileId, FileMeta, Rating, Space,
        SpaceFile, SpaceId, SpaceMember, Subject, User, UserId, Username,
    },
    storage::{self, Error},
};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    usernames: HashMap<Username, UserId>,
    files: HashMap<FileId, FileMeta>,
    comments: HashMap<CommentId, Comment>,
    ratings: HashMap<(UserId, FileId), Rating>,
    bookmarks: HashMap<(UserId, FileId), Bookmark>,
    spaces: HashMap<SpaceId, Space>,
    members: HashMap<(SpaceId, UserId), SpaceMember>,
    space_files: HashMap<(SpaceId, FileId), SpaceFile>,
    doc_links: HashMap<DocLinkId, DocLink>,
}

#[derive(Debug, Default)]
pub struct InMemory {
    tables: RwLock<Tables>,
}

impl InMemory {
    pub fn new() -> InMemory {
        InMemory::default()
    }
}

fn collect<'a, T: Clone + 'a>(
    iter: impl Iterator<Item = &'a T>,
    pred: impl Fn(&T) -> bool,
) -> Vec<T> {
    iter.filter(|x| pred(x)).cloned().collect()
}

#[async_trait]
impl storage::Backend for InMemory {
    async fn add_user(&self, user: &User) -> Result<(), Error> {
        let mut tables = self.tables.write().await;
        if tables.usernames.contains_key(user.username()) {
            return storage::UsernameClaimedSnafu {
                username: user.username().clone(),
            }
            .fail();
        }
        tables.usernames.insert(user.username().clone(), user.id());
        tables.users.insert(user.id(), user.clone());
        Ok(())
    }
    async fn user_for_name(&self, name: &str) -> Result<Option<User>, Error> {
        let tables = self.tables.read().await;
        Ok(Username::new(name)
            .ok()
            .and_then(|name| tables.usernames.get(&name))
            .and_then(|id| tables.users.get(id))
            .cloned())
    }
    async fn user_for_id(&self, id: &UserId) -> Result<Option<User>, Error> {
        Ok(self.tables.read().await.users.get(id).cloned())
    }
    async fn delete_user(&self, user: &User) -> Result<(), Error> {
        let mut tables = self.tables.write().await;
        tables.users.remove(&user.id());
        tables.usernames.remove(user.username());
        Ok(())
    }

    async fn add_file(&self, file: &FileMeta) -> Result<(), Error> {
        let mut tables = self.tables.write().await;
        if tables.files.contains_key(&file.id) {
            return storage::AlreadyExistsSnafu {
                id: file.id.to_string(),
            }
            .fail();
        }
        tables.files.insert(file.id, file.clone());
        Ok(())
    }
    async fn file_for_id(&self, id: &FileId) -> Result<Option<FileMeta>, Error> {
        Ok(self.tables.read().await.files.get(id).cloned())
    }
    async fn update_file(&self, file: &FileMeta) -> Result<(), Error> {
        self.tables.write().await.files.insert(file.id, file.clone());
        Ok(())
    }
    async fn list_files(
        &self,
        owner: Option<&UserId>,
        subject: Option<&Subject>,
    ) -> Result<Vec<FileMeta>, Error> {
        let tables = self.tables.read().await;
        let mut files = collect(tables.files.values(), |f| {
            owner.is_none_or(|o| f.owner == *o) && subject.is_none_or(|s| f.subject == *s)
        });
        files.sort_by(|a, b| b.uploaded.cmp(&a.uploaded));
        Ok(files)
    }
    async fn files_for_owner(&self, owner: &UserId) -> Result<Vec<FileMeta>, Error> {
        self.list_files(Some(owner), None).await
    }
    async fn delete_file(&self, file: &FileMeta) -> Result<(), Error> {
        self.tables.write().await.files.remove(&file.id);
        Ok(())
    }
    async fn subject_cloud(&self) -> Result<HashMap<Subject, usize>, Error> {
        let tables = self.tables.read().await;
        let mut cloud = HashMap::new();
        tables
            .files
            .values()
            .filter(|f| f.public)
            .for_each(|f| *cloud.entry(f.subject.clone()).or_insert(0) += 1);
        Ok(cloud)
    }

    async fn add_comment(&self, comment: &Comment) -> Result<(), Error> {
        self.tables
            .write()
            .await
            .comments
            .insert(comment.id, comment.clone());
        Ok(())
    }
    async fn comment_for_id(&self, id: &CommentId) -> Result<Option<Comment>, Error> {
        Ok(self.tables.read().await.comments.get(id).cloned())
    }
    async fn comments_for_file(&self, file: &FileId) -> Result<Vec<Comment>, Error> {
        let tables = self.tables.read().await;
        let mut comments = collect(tables.comments.values(), |c| c.file == *file);
        comments.sort_by(|a, b| a.created.cmp(&b.created));
        Ok(comments)
    }
    async fn comments_by_author(&self, author: &UserId) -> Result<Vec<Comment>, Error> {
        let tables = self.tables.read().await;
        Ok(collect(tables.comments.values(), |c| c.author == *author))
    }
    async fn delete_comment(&self, comment: &Comment) -> Result<(), Error> {
        self.tables.write().await.comments.remove(&comment.id);
        Ok(())
    }

    async fn upsert_rating(&self, rating: &Rating) -> Result<(), Error> {
        self.tables
            .write()
            .await
            .ratings
            .insert((rating.user, rating.file), rating.clone());
        Ok(())
    }
    async fn ratings_for_file(&self, file: &FileId) -> Result<Vec<Rating>, Error> {
        let tables = self.tables.read().await;
        Ok(collect(tables.ratings.values(), |r| r.file == *file))
    }
    async fn ratings_by_user(&self, user: &UserId) -> Result<Vec<Rating>, Error> {
        let tables = self.tables.read().await;
        Ok(collect(tables.ratings.values(), |r| r.user == *user))
    }
    async fn delete_rating(&self, user: &UserId, file: &FileId) -> Result<(), Error> {
        self.tables.write().await.ratings.remove(&(*user, *file));
        Ok(())
    }

    async fn add_bookmark(&self, bookmark: &Bookmark) -> Result<bool, Error> {
        let mut tables = self.tables.write().await;
        let key = (bookmark.user, bookmark.file);
        if tables.bookmarks.contains_key(&key) {
            Ok(false)
        } else {
            tables.bookmarks.insert(key, bookmark.clone());
            Ok(true)
        }
    }
    async fn bookmarks_for_user(&self, user: &UserId) -> Result<Vec<Bookmark>, Error> {
        let tables = self.tables.read().await;
        let mut bookmarks = collect(tables.bookmarks.values(), |b| b.user == *user);
        bookmarks.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(bookmarks)
    }
    async fn bookmarks_for_file(&self, file: &FileId) -> Result<Vec<Bookmark>, Error> {
        let tables = self.tables.read().await;
        Ok(collect(tables.bookmarks.values(), |b| b.file == *file))
    }
    async fn delete_bookmark(&self, user: &UserId, file: &FileId) -> Result<bool, Error> {
        Ok(self
            .tables
            .write()
            .await
            .bookmarks
            .remove(&(*user, *file))
            .is_some())
    }

    async fn add_space(&self, space: &Space) -> Result<(), Error> {
        self.tables
            .write()
            .await
            .spaces
            .insert(space.id, space.clone());
        Ok(())
    }
    async fn space_for_id(&self, id: &SpaceId) -> Result<Option<Space>, Error> {
        Ok(self.tables.read().await.spaces.get(id).cloned())
    }
    async fn spaces_owned_by(&self, owner: &UserId) -> Result<Vec<Space>, Error> {
        let tables = self.tables.read().await;
        Ok(collect(tables.spaces.values(), |s| s.owner == *owner))
    }
    async fn delete_space(&self, space: &Space) -> Result<(), Error> {
        self.tables.write().await.spaces.remove(&space.id);
        Ok(())
    }
    async fn add_member(&self, member: &SpaceMember) -> Result<bool, Error> {
        let mut tables = self.tables.write().await;
        let key = (member.space, member.user);
        if tables.members.contains_key(&key) {
            Ok(false)
        } else {
            tables.members.insert(key, member.clone());
            Ok(true)
        }
    }
    async fn remove_member(&self, space: &SpaceId, user: &UserId) -> Result<bool, Error> {
        Ok(self
            .tables
            .write()
            .await
            .members
            .remove(&(*space, *user))
            .is_some())
    }
    async fn members_of(&self, space: &SpaceId) -> Result<Vec<SpaceMember>, Error> {
        let tables = self.tables.read().await;
        Ok(collect(tables.members.values(), |m| m.space == *space))
    }
    async fn memberships_of(&self, user: &UserId) -> Result<Vec<SpaceMember>, Error> {
        let tables = self.tables.read().await;
        Ok(collect(tables.members.values(), |m| m.user == *user))
    }
    async fn link_file(&self, link: &SpaceFile) -> Result<bool, Error> {
        let mut tables = self.tables.write().await;
        let key = (link.space, link.file);
        if tables.space_files.contains_key(&key) {
            Ok(false)
        } else {
            tables.space_files.insert(key, link.clone());
            Ok(true)
        }
    }
    async fn unlink_file(&self, space: &SpaceId, file: &FileId) -> Result<bool, Error> {
        Ok(self
            .tables
            .write()
            .await
            .space_files
            .remove(&(*space, *file))
            .is_some())
    }
    async fn files_in_space(&self, space: &SpaceId) -> Result<Vec<SpaceFile>, Error> {
        let tables = self.tables.read().await;
        Ok(collect(tables.space_files.values(), |l| l.space == *space))
    }
    async fn spaces_linking_file(&self, file: &FileId) -> Result<Vec<SpaceFile>, Error> {
        let tables = self.tables.read().await;
        Ok(collect(tables.space_files.values(), |l| l.file == *file))
    }
    async fn add_doc_link(&self, doc: &DocLink) -> Result<(), Error> {
        self.tables
            .write()
            .await
            .doc_links
            .insert(doc.id, doc.clone());
        Ok(())
    }
    async fn doc_link_for_id(&self, id: &DocLinkId) -> Result<Option<DocLink>, Error> {
        Ok(self.tables.read().await.doc_links.get(id).cloned())
    }
    async fn doc_links_for_space(&self, space: &SpaceId) -> Result<Vec<DocLink>, Error> {
        let tables = self.tables.read().await;
        let mut docs = collect(tables.doc_links.values(), |d| d.space == *space);
        docs.sort_by(|a, b| a.added.cmp(&b.added));
        Ok(docs)
    }
    async fn doc_links_by_user(&self, user: &UserId) -> Result<Vec<DocLink>, Error> {
        let tables = self.tables.read().await;
        Ok(collect(tables.doc_links.values(), |d| d.added_by == *user))
    }
    async fn delete_doc_link(&self, doc: &DocLink) -> Result<(), Error> {
        self.tables.write().await.doc_links.remove(&doc.id);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use chrono::Utc;
    use secrecy::SecretString;

    use crate::{
        entities::{Filename, UserEmail},
        peppers::Peppers,
        storage::Backend,
    };

    fn user(name: &str) -> User {
        let peppers = Peppers::default();
        let (version, pepper) = peppers.current_pepper().unwrap();
        User::new(
            &version,
            &pepper,
            &Username::new(name).unwrap(),
            &SecretString::from("c0rrect h0rse b@ttery"),
            &UserEmail::new("someone@example.com").unwrap(),
            None,
        )
        .unwrap()
    }

    fn file(owner: &UserId, subject: &str, public: bool) -> FileMeta {
        FileMeta::new(
            owner,
            Subject::new(subject).unwrap(),
            None,
            None,
            Filename::new("notes.txt").unwrap(),
            Some("text/plain".to_owned()),
            public,
            b"some notes",
        )
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let storage = InMemory::new();
        let alice = user("alice");
        storage.add_user(&alice).await.unwrap();
        assert!(matches!(
            storage.add_user(&user("alice")).await,
            Err(Error::UsernameClaimed { .. })
        ));
        assert_eq!(
            alice.id(),
            storage.user_for_name("alice").await.unwrap().unwrap().id()
        );
        storage.delete_user(&alice).await.unwrap();
        assert!(storage.user_for_name("alice").await.unwrap().is_none());
        // Idempotent
        storage.delete_user(&alice).await.unwrap();
        // & the name is free again
        storage.add_user(&user("alice")).await.unwrap();
    }

    #[tokio::test]
    async fn files_and_subjects() {
        let storage = InMemory::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        let f1 = file(&alice, "Calculus", true);
        storage.add_file(&f1).await.unwrap();
        let f2 = file(&alice, "Calculus", false);
        storage.add_file(&f2).await.unwrap();
        let f3 = file(&bob, "Chemistry", true);
        storage.add_file(&f3).await.unwrap();
        assert!(storage.add_file(&f3).await.is_err());

        let all = storage.list_files(None, None).await.unwrap();
        assert_eq!(3, all.len());
        assert!(all.windows(2).all(|w| w[0].uploaded >= w[1].uploaded));

        let calculus = Subject::new("Calculus").unwrap();
        assert_eq!(
            2,
            storage
                .list_files(Some(&alice), Some(&calculus))
                .await
                .unwrap()
                .len()
        );
        assert_eq!(
            0,
            storage
                .list_files(Some(&bob), Some(&calculus))
                .await
                .unwrap()
                .len()
        );

        let cloud = storage.subject_cloud().await.unwrap();
        assert_eq!(Some(&1), cloud.get(&calculus));
        assert_eq!(Some(&1), cloud.get(&Subject::new("Chemistry").unwrap()));
    }

    #[tokio::test]
    async fn bookmarks_and_ratings() {
        let storage = InMemory::new();
        let (user, file) = (UserId::new(), FileId::new());
        let bookmark = Bookmark {
            user,
            file,
            created: Utc::now(),
        };
        assert!(storage.add_bookmark(&bookmark).await.unwrap());
        assert!(!storage.add_bookmark(&bookmark).await.unwrap());
        assert!(storage.delete_bookmark(&user, &file).await.unwrap());
        assert!(!storage.delete_bookmark(&user, &file).await.unwrap());

        let mut rating = Rating {
            user,
            file,
            score: crate::entities::Score::new(2).unwrap(),
            rated: Utc::now(),
        };
        storage.upsert_rating(&rating).await.unwrap();
        rating.score = crate::entities::Score::new(4).unwrap();
        storage.upsert_rating(&rating).await.unwrap();
        let ratings = storage.ratings_for_file(&file).await.unwrap();
        assert_eq!(1, ratings.len());
        assert_eq!(4, ratings[0].score.value());
    }
}
