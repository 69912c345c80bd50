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

//! # notespace
//!
//! Share notes & files, organized by subject, in collaborative spaces.
//!
//! The library crate holds everything but process management: entities & their refinements,
//! the storage & blob-store abstractions with their implementations, authentication, and the HTTP
//! API. The `notespaced` binary reads configuration, sets up logging, and serves
//! [server::make_router].
pub mod access;
pub mod authn;
pub mod blobs;
pub mod bookmarks;
pub mod cascade;
pub mod comments;
pub mod entities;
pub mod files;
pub mod http;
pub mod memory;
pub mod metrics;
pub mod notespace;
pub mod peppers;
pub mod ratings;
pub mod scylla;
pub mod server;
#[path = "signing-keys.rs"]
pub mod signing_keys;
pub mod spaces;
pub mod storage;
pub mod token;
pub mod users;
pub mod util;
