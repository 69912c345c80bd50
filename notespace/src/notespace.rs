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

use std::sync::Arc;

use chrono::Duration;
use opentelemetry_prometheus_text_exporter::PrometheusExporter;

use crate::{
    blobs::BlobStore, peppers::Peppers, signing_keys::SigningKeys,
    storage::Backend as StorageBackend,
};

/// Application state available to all handlers
pub struct Notespace {
    /// The host name under which we issue tokens
    pub host: String,
    pub storage: Arc<dyn StorageBackend + Send + Sync>,
    pub blobs: Arc<dyn BlobStore + Send + Sync>,
    pub exporter: PrometheusExporter,
    pub pepper: Peppers,
    pub signing_keys: SigningKeys,
    pub token_lifetime: Duration,
    /// Uploads larger than this are refused with a 413
    pub max_upload_bytes: usize,
}
