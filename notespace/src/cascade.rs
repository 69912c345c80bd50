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

//! # Cascading deletes
//!
//! Removing a file, a space or a user means removing everything that hangs off of it. None of the
//! storage backends offer multi-record transactions, so each cascade is a fixed sequence of
//! individually idempotent deletes, dependents first. If a cascade fails part-way, running it
//! again picks up where it left off. In particular the user record goes last, so a user whose
//! account deletion failed can still log in & retry.

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};
use tracing::{debug, info};

use crate::{
    blobs::{self, BlobStore},
    entities::{FileMeta, Space, User},
    storage::{self, Backend as StorageBackend},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to delete the content of file {file}: {source}"))]
    Blob {
        file: crate::entities::FileId,
        source: blobs::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Storage failure while {step}: {source}"))]
    Storage {
        step: &'static str,
        source: storage::Error,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// What a cascade removed
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeletionSummary {
    pub users: usize,
    pub spaces: usize,
    pub files: usize,
    pub comments: usize,
    pub ratings: usize,
    pub bookmarks: usize,
    pub space_links: usize,
    pub doc_links: usize,
    pub memberships: usize,
}

impl AddAssign for DeletionSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.users += rhs.users;
        self.spaces += rhs.spaces;
        self.files += rhs.files;
        self.comments += rhs.comments;
        self.ratings += rhs.ratings;
        self.bookmarks += rhs.bookmarks;
        self.space_links += rhs.space_links;
        self.doc_links += rhs.doc_links;
        self.memberships += rhs.memberships;
    }
}

/// Delete `file` along with its comments, ratings, bookmarks, space links & content
pub async fn delete_file_cascade(
    storage: &(dyn StorageBackend + Send + Sync),
    blobs: &(dyn BlobStore + Send + Sync),
    file: &FileMeta,
) -> Result<DeletionSummary> {
    let mut summary = DeletionSummary::default();

    for comment in storage
        .comments_for_file(&file.id)
        .await
        .context(StorageSnafu {
            step: "listing comments",
        })?
    {
        storage
            .delete_comment(&comment)
            .await
            .context(StorageSnafu {
                step: "deleting a comment",
            })?;
        summary.comments += 1;
    }
    for rating in storage
        .ratings_for_file(&file.id)
        .await
        .context(StorageSnafu {
            step: "listing ratings",
        })?
    {
        storage
            .delete_rating(&rating.user, &rating.file)
            .await
            .context(StorageSnafu {
                step: "deleting a rating",
            })?;
        summary.ratings += 1;
    }
    for bookmark in storage
        .bookmarks_for_file(&file.id)
        .await
        .context(StorageSnafu {
            step: "listing bookmarks",
        })?
    {
        storage
            .delete_bookmark(&bookmark.user, &bookmark.file)
            .await
            .context(StorageSnafu {
                step: "deleting a bookmark",
            })?;
        summary.bookmarks += 1;
    }
    for link in storage
        .spaces_linking_file(&file.id)
        .await
        .context(StorageSnafu {
            step: "listing space links",
        })?
    {
        storage
            .unlink_file(&link.space, &link.file)
            .await
            .context(StorageSnafu {
                step: "unlinking a file",
            })?;
        summary.space_links += 1;
    }
    blobs
        .delete(&file.id)
        .await
        .context(BlobSnafu { file: file.id })?;
    storage.delete_file(file).await.context(StorageSnafu {
        step: "deleting file metadata",
    })?;
    summary.files += 1;

    debug!("Deleted file {}: {:?}", file.id, summary);
    Ok(summary)
}

/// Delete `space` along with its doc links, file links & memberships; the linked files themselves
/// are untouched
pub async fn delete_space_cascade(
    storage: &(dyn StorageBackend + Send + Sync),
    space: &Space,
) -> Result<DeletionSummary> {
    let mut summary = DeletionSummary::default();

    for doc in storage
        .doc_links_for_space(&space.id)
        .await
        .context(StorageSnafu {
            step: "listing doc links",
        })?
    {
        storage.delete_doc_link(&doc).await.context(StorageSnafu {
            step: "deleting a doc link",
        })?;
        summary.doc_links += 1;
    }
    for link in storage
        .files_in_space(&space.id)
        .await
        .context(StorageSnafu {
            step: "listing space files",
        })?
    {
        storage
            .unlink_file(&link.space, &link.file)
            .await
            .context(StorageSnafu {
                step: "unlinking a file",
            })?;
        summary.space_links += 1;
    }
    for member in storage
        .members_of(&space.id)
        .await
        .context(StorageSnafu {
            step: "listing members",
        })?
    {
        storage
            .remove_member(&member.space, &member.user)
            .await
            .context(StorageSnafu {
                step: "removing a member",
            })?;
        summary.memberships += 1;
    }
    storage.delete_space(space).await.context(StorageSnafu {
        step: "deleting a space",
    })?;
    summary.spaces += 1;

    debug!("Deleted space {}: {:?}", space.id, summary);
    Ok(summary)
}

/// Delete `user` & everything they own or authored
///
/// 1. spaces they own (via [delete_space_cascade])
/// 2. files they own (via [delete_file_cascade])
/// 3. their comments, ratings & bookmarks on other people's files
/// 4. doc links they added to, and their memberships in, other people's spaces; files they linked
///    into other people's spaces belong to someone else, so those links stay
/// 5. the user record itself
pub async fn delete_user_cascade(
    storage: &(dyn StorageBackend + Send + Sync),
    blobs: &(dyn BlobStore + Send + Sync),
    user: &User,
) -> Result<DeletionSummary> {
    let id = user.id();
    info!("Deleting user {} ({})", user.username(), id);
    let mut summary = DeletionSummary::default();

    for space in storage
        .spaces_owned_by(&id)
        .await
        .context(StorageSnafu {
            step: "listing owned spaces",
        })?
    {
        summary += delete_space_cascade(storage, &space).await?;
    }
    for file in storage
        .files_for_owner(&id)
        .await
        .context(StorageSnafu {
            step: "listing owned files",
        })?
    {
        summary += delete_file_cascade(storage, blobs, &file).await?;
    }

    for comment in storage
        .comments_by_author(&id)
        .await
        .context(StorageSnafu {
            step: "listing authored comments",
        })?
    {
        storage
            .delete_comment(&comment)
            .await
            .context(StorageSnafu {
                step: "deleting a comment",
            })?;
        summary.comments += 1;
    }
    for rating in storage.ratings_by_user(&id).await.context(StorageSnafu {
        step: "listing ratings",
    })? {
        storage
            .delete_rating(&rating.user, &rating.file)
            .await
            .context(StorageSnafu {
                step: "deleting a rating",
            })?;
        summary.ratings += 1;
    }
    for bookmark in storage
        .bookmarks_for_user(&id)
        .await
        .context(StorageSnafu {
            step: "listing bookmarks",
        })?
    {
        storage
            .delete_bookmark(&bookmark.user, &bookmark.file)
            .await
            .context(StorageSnafu {
                step: "deleting a bookmark",
            })?;
        summary.bookmarks += 1;
    }

    for doc in storage
        .doc_links_by_user(&id)
        .await
        .context(StorageSnafu {
            step: "listing added doc links",
        })?
    {
        storage.delete_doc_link(&doc).await.context(StorageSnafu {
            step: "deleting a doc link",
        })?;
        summary.doc_links += 1;
    }
    for membership in storage
        .memberships_of(&id)
        .await
        .context(StorageSnafu {
            step: "listing memberships",
        })?
    {
        storage
            .remove_member(&membership.space, &membership.user)
            .await
            .context(StorageSnafu {
                step: "leaving a space",
            })?;
        summary.memberships += 1;
    }

    storage.delete_user(user).await.context(StorageSnafu {
        step: "deleting the user record",
    })?;
    summary.users += 1;

    info!("Deleted user {}: {:?}", user.username(), summary);
    Ok(summary)
}

#[cfg(test)]
mod test {
    use super::*;

    use chrono::Utc;
    use secrecy::SecretString;

    use crate::{
        blobs::MemoryBlobs,
        entities::{
            Bookmark, Comment, CommentText, DocLink, DocUrl, Filename, Rating, Score, SpaceFile,
            SpaceMember, SpaceName, Subject, UserEmail, Username,
        },
        memory::InMemory,
        peppers::Peppers,
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

    fn file(owner: &User) -> FileMeta {
        FileMeta::new(
            &owner.id(),
            Subject::new("History").unwrap(),
            None,
            None,
            Filename::new("notes.md").unwrap(),
            None,
            true,
            b"# Notes",
        )
    }

    #[tokio::test]
    async fn user_cascade() {
        let storage = InMemory::new();
        let blobs = MemoryBlobs::new();
        let (alice, bob) = (user("alice"), user("bobby"));
        storage.add_user(&alice).await.unwrap();
        storage.add_user(&bob).await.unwrap();

        // Alice owns a file & a space; Bob owns a file & a space
        let alices_file = file(&alice);
        storage.add_file(&alices_file).await.unwrap();
        blobs.put(&alices_file.id, b"# Notes").await.unwrap();
        let bobs_file = file(&bob);
        storage.add_file(&bobs_file).await.unwrap();
        let alices_space = Space::new(&alice.id(), SpaceName::new("A").unwrap(), None);
        storage.add_space(&alices_space).await.unwrap();
        let bobs_space = Space::new(&bob.id(), SpaceName::new("B").unwrap(), None);
        storage.add_space(&bobs_space).await.unwrap();

        // Bob is a member of Alice's space & has linked his file into it
        storage
            .add_member(&SpaceMember {
                space: alices_space.id,
                user: bob.id(),
                added: Utc::now(),
            })
            .await
            .unwrap();
        storage
            .link_file(&SpaceFile {
                space: alices_space.id,
                file: bobs_file.id,
                added_by: bob.id(),
                added: Utc::now(),
            })
            .await
            .unwrap();
        // Alice is a member of Bob's space, linked her file into it & added a doc
        storage
            .add_member(&SpaceMember {
                space: bobs_space.id,
                user: alice.id(),
                added: Utc::now(),
            })
            .await
            .unwrap();
        storage
            .link_file(&SpaceFile {
                space: bobs_space.id,
                file: alices_file.id,
                added_by: alice.id(),
                added: Utc::now(),
            })
            .await
            .unwrap();
        storage
            .add_doc_link(&DocLink::new(
                &bobs_space.id,
                &alice.id(),
                "Outline",
                DocUrl::new("https://docs.google.com/document/d/xyz").unwrap(),
            ))
            .await
            .unwrap();
        // Alice comments on, rates & bookmarks Bob's file; Bob comments on Alice's
        storage
            .add_comment(&Comment::new(
                &bobs_file.id,
                &alice.id(),
                CommentText::new("Nice").unwrap(),
            ))
            .await
            .unwrap();
        storage
            .add_comment(&Comment::new(
                &alices_file.id,
                &bob.id(),
                CommentText::new("Thanks").unwrap(),
            ))
            .await
            .unwrap();
        storage
            .upsert_rating(&Rating {
                user: alice.id(),
                file: bobs_file.id,
                score: Score::new(5).unwrap(),
                rated: Utc::now(),
            })
            .await
            .unwrap();
        storage
            .add_bookmark(&Bookmark {
                user: alice.id(),
                file: bobs_file.id,
                created: Utc::now(),
            })
            .await
            .unwrap();

        let summary = delete_user_cascade(&storage, &blobs, &alice).await.unwrap();
        assert_eq!(1, summary.users);
        assert_eq!(1, summary.spaces);
        assert_eq!(1, summary.files);
        assert_eq!(2, summary.comments); // Bob's on her file + hers on Bob's
        assert_eq!(1, summary.ratings);
        assert_eq!(1, summary.bookmarks);
        assert_eq!(1, summary.doc_links);
        assert_eq!(2, summary.memberships); // Bob in her space, her in Bob's
        // Bob's file in her space, her file in Bob's
        assert_eq!(2, summary.space_links);

        assert!(storage.user_for_name("alice").await.unwrap().is_none());
        assert!(storage.file_for_id(&alices_file.id).await.unwrap().is_none());
        assert!(blobs.get(&alices_file.id).await.unwrap().is_none());
        assert!(storage.space_for_id(&alices_space.id).await.unwrap().is_none());
        // Bob's things survive
        assert!(storage.file_for_id(&bobs_file.id).await.unwrap().is_some());
        assert!(storage.space_for_id(&bobs_space.id).await.unwrap().is_some());
        assert!(storage.comments_for_file(&bobs_file.id).await.unwrap().is_empty());
        assert!(storage.members_of(&bobs_space.id).await.unwrap().is_empty());

        // Running it again is harmless
        let again = delete_user_cascade(&storage, &blobs, &alice).await.unwrap();
        assert_eq!(0, again.files);
        assert_eq!(0, again.spaces);
    }
}
