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

//! Shared fixtures for the notespace integration tests: an in-memory server on an ephemeral port
//! & a thin client for driving it.

use std::{
    net::SocketAddr,
    sync::{Arc, LazyLock},
};

use chrono::Duration;
use opentelemetry_prometheus_text_exporter::PrometheusExporter;
use reqwest::{Method, RequestBuilder, Response, StatusCode, multipart};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use notespace::{
    blobs::MemoryBlobs, memory::InMemory, notespace::Notespace, peppers::Peppers,
    server::{init_telemetry, make_router},
    signing_keys::SigningKeys,
};

pub const PASSWORD: &str = "f00 b@r sp1at w1bble";

// The meter provider is process-global, so every server in this process shares one exporter
static EXPORTER: LazyLock<PrometheusExporter> = LazyLock::new(init_telemetry);

/// Start a notespace server backed by in-memory storage; return its base URL
pub async fn spawn_server(max_upload_bytes: usize) -> String {
    let state = Arc::new(Notespace {
        host: "localhost".to_owned(),
        storage: Arc::new(InMemory::new()),
        blobs: Arc::new(MemoryBlobs::new()),
        exporter: EXPORTER.clone(),
        pepper: Peppers::default(),
        signing_keys: SigningKeys::default(),
        token_lifetime: Duration::seconds(3600),
        max_upload_bytes,
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, make_router(state)).await });
    format!("http://{}/api/v1", addr)
}

/// A caller: anonymous, or signed-up & logged-in
pub struct Caller {
    base: String,
    client: reqwest::Client,
    token: Option<String>,
}

impl Caller {
    pub fn anonymous(base: &str) -> Caller {
        Caller {
            base: base.to_owned(),
            client: reqwest::Client::new(),
            token: None,
        }
    }

    /// Sign up `username` & log them in
    pub async fn signup(base: &str, username: &str) -> Caller {
        let anon = Caller::anonymous(base);
        let rsp = anon
            .post("/users/signup")
            .json(&json!({
                "username": username,
                "password": PASSWORD,
                "email": format!("{}@example.com", username),
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(StatusCode::CREATED, rsp.status());
        let rsp = anon
            .post("/users/login")
            .json(&json!({"username": username, "password": PASSWORD}))
            .send()
            .await
            .unwrap();
        assert_eq!(StatusCode::OK, rsp.status());
        let token = rsp.json::<Value>().await.unwrap()["token"]
            .as_str()
            .unwrap()
            .to_owned();
        Caller {
            base: base.to_owned(),
            client: reqwest::Client::new(),
            token: Some(token),
        }
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    /// Upload `content` as `filename` under `subject`
    pub async fn upload(
        &self,
        filename: &str,
        subject: &str,
        public: bool,
        content: Vec<u8>,
    ) -> Response {
        let form = multipart::Form::new()
            .part(
                "file",
                multipart::Part::bytes(content)
                    .file_name(filename.to_owned())
                    .mime_str("text/plain")
                    .unwrap(),
            )
            .text("subject", subject.to_owned())
            .text("public", public.to_string());
        self.post("/files").multipart(form).send().await.unwrap()
    }

    /// Upload a small file & return its id
    pub async fn upload_ok(&self, filename: &str, subject: &str, public: bool) -> String {
        let rsp = self
            .upload(filename, subject, public, b"Lecture notes".to_vec())
            .await;
        assert_eq!(StatusCode::CREATED, rsp.status());
        rsp.json::<Value>().await.unwrap()["id"]
            .as_str()
            .unwrap()
            .to_owned()
    }
}
