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

//! # Who may see what
//!
//! A file is visible to a caller when it's public, when the caller owns it, or when it's linked
//! into a space the caller owns or belongs to. A space is visible only to its owner & members.
//! Handlers answer 404 for things the caller can't see, so as not to disclose their existence.

use std::collections::HashSet;

use crate::{
    entities::{FileId, FileMeta, SpaceId, User, UserId},
    storage::{Backend as StorageBackend, Error},
};

type Result<T> = std::result::Result<T, Error>;

/// A caller (possibly anonymous) along with the spaces they can enter
///
/// Building one costs two storage round-trips; after that it can vet any number of files.
#[derive(Clone, Debug, Default)]
pub struct Viewer {
    user: Option<UserId>,
    spaces: HashSet<SpaceId>,
}

impl Viewer {
    pub fn anonymous() -> Viewer {
        Viewer::default()
    }
    pub async fn new(
        storage: &(dyn StorageBackend + Send + Sync),
        user: Option<&User>,
    ) -> Result<Viewer> {
        let Some(user) = user else {
            return Ok(Viewer::anonymous());
        };
        let mut spaces: HashSet<SpaceId> = storage
            .spaces_owned_by(&user.id())
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();
        spaces.extend(
            storage
                .memberships_of(&user.id())
                .await?
                .into_iter()
                .map(|m| m.space),
        );
        Ok(Viewer {
            user: Some(user.id()),
            spaces,
        })
    }
    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }
    /// True if the caller owns or belongs to `space`
    pub fn can_enter(&self, space: &SpaceId) -> bool {
        self.spaces.contains(space)
    }
    pub async fn can_see(
        &self,
        storage: &(dyn StorageBackend + Send + Sync),
        file: &FileMeta,
    ) -> Result<bool> {
        if file.public || self.user.is_some_and(|id| id == file.owner) {
            return Ok(true);
        }
        if self.spaces.is_empty() {
            return Ok(false);
        }
        Ok(storage
            .spaces_linking_file(&file.id)
            .await?
            .iter()
            .any(|link| self.can_enter(&link.space)))
    }
    /// Look up a file by id; None if it doesn't exist *or* the caller can't see it
    pub async fn visible_file(
        &self,
        storage: &(dyn StorageBackend + Send + Sync),
        id: &FileId,
    ) -> Result<Option<FileMeta>> {
        match storage.file_for_id(id).await? {
            Some(file) if self.can_see(storage, &file).await? => Ok(Some(file)),
            _ => Ok(None),
        }
    }
    /// Retain only the files the caller can see, preserving order
    pub async fn filter(
        &self,
        storage: &(dyn StorageBackend + Send + Sync),
        files: Vec<FileMeta>,
    ) -> Result<Vec<FileMeta>> {
        let mut visible = Vec::with_capacity(files.len());
        for file in files {
            if self.can_see(storage, &file).await? {
                visible.push(file);
            }
        }
        Ok(visible)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use chrono::Utc;
    use secrecy::SecretString;

    use crate::{
        entities::{Filename, Space, SpaceFile, SpaceMember, SpaceName, Subject, UserEmail, Username},
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

    #[tokio::test]
    async fn visibility() {
        let storage = InMemory::new();
        let (alice, bob, carol) = (user("alice"), user("bobby"), user("carol"));
        let private = FileMeta::new(
            &alice.id(),
            Subject::new("Physics").unwrap(),
            None,
            None,
            Filename::new("secret.pdf").unwrap(),
            None,
            false,
            b"%PDF",
        );
        storage.add_file(&private).await.unwrap();

        let anon = Viewer::anonymous();
        assert!(!anon.can_see(&storage, &private).await.unwrap());
        let as_alice = Viewer::new(&storage, Some(&alice)).await.unwrap();
        assert!(as_alice.can_see(&storage, &private).await.unwrap());
        let as_bob = Viewer::new(&storage, Some(&bob)).await.unwrap();
        assert!(!as_bob.can_see(&storage, &private).await.unwrap());

        // Link it into a space of which Bob is a member...
        let space = Space::new(&alice.id(), SpaceName::new("Study").unwrap(), None);
        storage.add_space(&space).await.unwrap();
        storage
            .add_member(&SpaceMember {
                space: space.id,
                user: bob.id(),
                added: Utc::now(),
            })
            .await
            .unwrap();
        storage
            .link_file(&SpaceFile {
                space: space.id,
                file: private.id,
                added_by: alice.id(),
                added: Utc::now(),
            })
            .await
            .unwrap();

        let as_bob = Viewer::new(&storage, Some(&bob)).await.unwrap();
        assert!(as_bob.can_enter(&space.id));
        assert!(
            as_bob
                .visible_file(&storage, &private.id)
                .await
                .unwrap()
                .is_some()
        );
        // but Carol still can't see it
        let as_carol = Viewer::new(&storage, Some(&carol)).await.unwrap();
        assert!(!as_carol.can_enter(&space.id));
        assert!(
            as_carol
                .visible_file(&storage, &private.id)
                .await
                .unwrap()
                .is_none()
        );
    }
}
