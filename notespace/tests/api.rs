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

//! Drive the notespace API end-to-end over HTTP

mod common;

use reqwest::StatusCode;
use serde_json::{Value, json};

use common::{Caller, PASSWORD, spawn_server};

#[tokio::test]
async fn healthcheck_and_metrics() {
    let base = spawn_server(1024 * 1024).await;
    // These two live outside the versioned API
    let root = base.trim_end_matches("/api/v1");
    let rsp = reqwest::get(format!("{}/healthcheck", root)).await.unwrap();
    assert_eq!(StatusCode::OK, rsp.status());
    assert_eq!("GOOD", rsp.text().await.unwrap());
    let rsp = reqwest::get(format!("{}/metrics", root)).await.unwrap();
    assert_eq!(StatusCode::OK, rsp.status());
    // The healthcheck above was counted by the request middleware
    assert!(rsp.text().await.unwrap().contains("http_get_healthcheck"));
}

#[tokio::test]
async fn signup_and_login() {
    let base = spawn_server(1024 * 1024).await;
    let anon = Caller::anonymous(&base);

    let rsp = anon
        .post("/users/signup")
        .json(&json!({"username": "alice", "password": "password", "email": "a@example.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());

    let alice = Caller::signup(&base, "alice").await;
    let rsp = anon
        .post("/users/signup")
        .json(&json!({"username": "alice", "password": PASSWORD, "email": "a2@example.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());

    let rsp = anon
        .post("/users/login")
        .json(&json!({"username": "alice", "password": "not the password"}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());

    let rsp = alice.get("/users/me").send().await.unwrap();
    assert_eq!(StatusCode::OK, rsp.status());
    let me = rsp.json::<Value>().await.unwrap();
    assert_eq!("alice", me["username"]);
    assert_eq!("alice", me["display-name"]);

    let rsp = anon.get("/users/me").send().await.unwrap();
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());
    let rsp = anon
        .get("/users/me")
        .bearer_auth("a.b.c")
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());
}

#[tokio::test]
async fn upload_list_download() {
    let base = spawn_server(1024 * 1024).await;
    let alice = Caller::signup(&base, "alice").await;
    let anon = Caller::anonymous(&base);

    let rsp = anon
        .upload("notes.txt", "Linear Algebra", true, b"Eigenvalues".to_vec())
        .await;
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());

    let rsp = alice
        .upload("notes.txt", "Linear Algebra", true, b"Eigenvalues".to_vec())
        .await;
    assert_eq!(StatusCode::CREATED, rsp.status());
    let file = rsp.json::<Value>().await.unwrap();
    assert_eq!("notes.txt", file["title"]);
    assert_eq!(11, file["size"]);
    assert_eq!("Linear Algebra", file["subject"]);
    let id = file["id"].as_str().unwrap().to_owned();
    alice.upload_ok("syllabus.txt", "Topology", true).await;

    let files = anon
        .get("/files")
        .send()
        .await
        .unwrap()
        .json::<Vec<Value>>()
        .await
        .unwrap();
    assert_eq!(2, files.len());
    let files = anon
        .get("/files?subject=Topology")
        .send()
        .await
        .unwrap()
        .json::<Vec<Value>>()
        .await
        .unwrap();
    assert_eq!(1, files.len());
    assert_eq!("syllabus.txt", files[0]["filename"]);
    let files = anon
        .get("/files?owner=nobody")
        .send()
        .await
        .unwrap()
        .json::<Vec<Value>>()
        .await
        .unwrap();
    assert!(files.is_empty());

    let rsp = anon
        .get(&format!("/files/{}/content", id))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::OK, rsp.status());
    assert_eq!(
        "text/plain",
        rsp.headers()[reqwest::header::CONTENT_TYPE].to_str().unwrap()
    );
    assert_eq!(b"Eigenvalues".to_vec(), rsp.bytes().await.unwrap().to_vec());

    let rsp = anon.get(&format!("/files/{}", id)).send().await.unwrap();
    assert_eq!(StatusCode::OK, rsp.status());
    let file = rsp.json::<Value>().await.unwrap();
    assert_eq!(0, file["rating"]["count"]);

    let rsp = alice
        .patch(&format!("/files/{}", id))
        .json(&json!({"title": "Eigen-notes", "subject": "Algebra"}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::OK, rsp.status());
    assert_eq!("Eigen-notes", rsp.json::<Value>().await.unwrap()["title"]);

    let subjects = anon
        .get("/subjects")
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(1, subjects["subjects"]["Algebra"]);
    assert_eq!(1, subjects["subjects"]["Topology"]);
    assert!(subjects["subjects"]["Linear Algebra"].is_null());

    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(b"x".to_vec()).file_name("x.txt"),
    );
    let rsp = alice.post("/files").multipart(form).send().await.unwrap();
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());

    let rsp = alice.delete(&format!("/files/{}", id)).send().await.unwrap();
    assert_eq!(StatusCode::NO_CONTENT, rsp.status());
    let rsp = anon.get(&format!("/files/{}", id)).send().await.unwrap();
    assert_eq!(StatusCode::NOT_FOUND, rsp.status());
}

#[tokio::test]
async fn oversized_uploads() {
    let base = spawn_server(1024).await;
    let alice = Caller::signup(&base, "alice").await;
    let rsp = alice
        .upload("big.txt", "Physics", true, vec![b'x'; 2048])
        .await;
    assert_eq!(StatusCode::PAYLOAD_TOO_LARGE, rsp.status());
    let rsp = alice
        .upload("small.txt", "Physics", true, vec![b'x'; 512])
        .await;
    assert_eq!(StatusCode::CREATED, rsp.status());
}

#[tokio::test]
async fn malformed_uploads() {
    let base = spawn_server(1024 * 1024).await;
    let alice = Caller::signup(&base, "alice").await;
    let form = || {
        reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(b"Mitochondria".to_vec()).file_name("cells.txt"),
        )
    };

    let rsp = alice
        .post("/files")
        .multipart(form().text("subject", "Biology").text("public", "maybe"))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());
    let body = rsp.json::<Value>().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("maybe"));

    let rsp = alice
        .post("/files")
        .multipart(form().text("public", "false"))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());

    let rsp = alice
        .post("/files")
        .multipart(form().text("subject", "Biology").text("public", "false"))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::CREATED, rsp.status());
    assert_eq!(Value::Bool(false), rsp.json::<Value>().await.unwrap()["public"]);
}

#[tokio::test]
async fn private_files() {
    let base = spawn_server(1024 * 1024).await;
    let alice = Caller::signup(&base, "alice").await;
    let bobby = Caller::signup(&base, "bobby").await;
    let anon = Caller::anonymous(&base);

    let private = alice.upload_ok("diary.txt", "Personal", false).await;
    let public = alice.upload_ok("notes.txt", "Chemistry", true).await;

    for caller in [&bobby, &anon] {
        let rsp = caller
            .get(&format!("/files/{}", private))
            .send()
            .await
            .unwrap();
        assert_eq!(StatusCode::NOT_FOUND, rsp.status());
        let rsp = caller
            .get(&format!("/files/{}/content", private))
            .send()
            .await
            .unwrap();
        assert_eq!(StatusCode::NOT_FOUND, rsp.status());
        let files = caller
            .get("/files")
            .send()
            .await
            .unwrap()
            .json::<Vec<Value>>()
            .await
            .unwrap();
        assert_eq!(1, files.len());
    }
    let rsp = bobby
        .patch(&format!("/files/{}", private))
        .json(&json!({"public": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NOT_FOUND, rsp.status());

    let rsp = alice.get(&format!("/files/{}", private)).send().await.unwrap();
    assert_eq!(StatusCode::OK, rsp.status());

    // Visible, but not bobby's to change
    let rsp = bobby
        .delete(&format!("/files/{}", public))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::FORBIDDEN, rsp.status());

    let subjects = anon
        .get("/subjects")
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert!(subjects["subjects"]["Personal"].is_null());
}

#[tokio::test]
async fn comments() {
    let base = spawn_server(1024 * 1024).await;
    let alice = Caller::signup(&base, "alice").await;
    let bobby = Caller::signup(&base, "bobby").await;
    let carol = Caller::signup(&base, "carol").await;
    let anon = Caller::anonymous(&base);
    let file = alice.upload_ok("notes.txt", "History", true).await;

    let rsp = anon
        .post(&format!("/files/{}/comments", file))
        .json(&json!({"text": "Nice"}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());
    let rsp = bobby
        .post(&format!("/files/{}/comments", file))
        .json(&json!({"text": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());

    let mut ids = Vec::new();
    for text in ["First!", "Very helpful, thanks"] {
        let rsp = bobby
            .post(&format!("/files/{}/comments", file))
            .json(&json!({ "text": text }))
            .send()
            .await
            .unwrap();
        assert_eq!(StatusCode::CREATED, rsp.status());
        ids.push(
            rsp.json::<Value>().await.unwrap()["id"]
                .as_str()
                .unwrap()
                .to_owned(),
        );
    }

    let comments = anon
        .get(&format!("/files/{}/comments", file))
        .send()
        .await
        .unwrap()
        .json::<Vec<Value>>()
        .await
        .unwrap();
    assert_eq!(2, comments.len());
    assert_eq!("First!", comments[0]["text"]);

    let rsp = carol
        .delete(&format!("/comments/{}", ids[0]))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::FORBIDDEN, rsp.status());
    // The file's owner may moderate
    let rsp = alice
        .delete(&format!("/comments/{}", ids[0]))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NO_CONTENT, rsp.status());
    let rsp = bobby
        .delete(&format!("/comments/{}", ids[1]))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NO_CONTENT, rsp.status());

    let comments = anon
        .get(&format!("/files/{}/comments", file))
        .send()
        .await
        .unwrap()
        .json::<Vec<Value>>()
        .await
        .unwrap();
    assert!(comments.is_empty());
}

#[tokio::test]
async fn ratings() {
    let base = spawn_server(1024 * 1024).await;
    let alice = Caller::signup(&base, "alice").await;
    let bobby = Caller::signup(&base, "bobby").await;
    let anon = Caller::anonymous(&base);
    let file = alice.upload_ok("notes.txt", "Biology", true).await;
    let path = format!("/files/{}/rating", file);

    let rsp = alice.put(&path).json(&json!({"score": 5})).send().await.unwrap();
    assert_eq!(StatusCode::FORBIDDEN, rsp.status());
    let rsp = bobby.put(&path).json(&json!({"score": 7})).send().await.unwrap();
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());

    let rsp = bobby.put(&path).json(&json!({"score": 2})).send().await.unwrap();
    assert_eq!(StatusCode::OK, rsp.status());
    let rsp = bobby.put(&path).json(&json!({"score": 4})).send().await.unwrap();
    assert_eq!(StatusCode::OK, rsp.status());
    let summary = rsp.json::<Value>().await.unwrap();
    assert_eq!(1, summary["count"]);
    assert_eq!(4.0, summary["average"]);
    assert_eq!(4, summary["mine"]);

    let summary = anon
        .get(&path)
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(1, summary["count"]);
    assert!(summary["mine"].is_null());

    let rsp = bobby.delete(&path).send().await.unwrap();
    assert_eq!(StatusCode::NO_CONTENT, rsp.status());
    let rsp = bobby.delete(&path).send().await.unwrap();
    assert_eq!(StatusCode::NO_CONTENT, rsp.status());
    let summary = anon
        .get(&path)
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(0, summary["count"]);
    assert!(summary["average"].is_null());
}

#[tokio::test]
async fn bookmarks() {
    let base = spawn_server(1024 * 1024).await;
    let alice = Caller::signup(&base, "alice").await;
    let bobby = Caller::signup(&base, "bobby").await;
    let file = alice.upload_ok("notes.txt", "Economics", true).await;
    let private = alice.upload_ok("draft.txt", "Economics", false).await;

    let path = format!("/bookmarks/{}", file);
    let rsp = bobby.put(&path).send().await.unwrap();
    assert_eq!(StatusCode::CREATED, rsp.status());
    let rsp = bobby.put(&path).send().await.unwrap();
    assert_eq!(StatusCode::OK, rsp.status());
    let rsp = bobby
        .put(&format!("/bookmarks/{}", private))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NOT_FOUND, rsp.status());

    let marks = bobby
        .get("/bookmarks")
        .send()
        .await
        .unwrap()
        .json::<Vec<Value>>()
        .await
        .unwrap();
    assert_eq!(1, marks.len());
    assert_eq!("notes.txt", marks[0]["file"]["filename"]);

    // Once the file is hidden, the bookmark drops out of the listing
    let rsp = alice
        .patch(&format!("/files/{}", file))
        .json(&json!({"public": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::OK, rsp.status());
    let marks = bobby
        .get("/bookmarks")
        .send()
        .await
        .unwrap()
        .json::<Vec<Value>>()
        .await
        .unwrap();
    assert!(marks.is_empty());

    let rsp = bobby.delete(&path).send().await.unwrap();
    assert_eq!(StatusCode::NO_CONTENT, rsp.status());
}

#[tokio::test]
async fn spaces() {
    let base = spawn_server(1024 * 1024).await;
    let alice = Caller::signup(&base, "alice").await;
    let bobby = Caller::signup(&base, "bobby").await;
    let carol = Caller::signup(&base, "carol").await;

    let rsp = alice
        .post("/spaces")
        .json(&json!({"name": "Study Group", "description": "Finals prep"}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::CREATED, rsp.status());
    let space = rsp.json::<Value>().await.unwrap()["id"]
        .as_str()
        .unwrap()
        .to_owned();
    let private = alice.upload_ok("answers.txt", "Calculus", false).await;

    let rsp = alice
        .post(&format!("/spaces/{}/files", space))
        .json(&json!({ "file": private }))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::CREATED, rsp.status());
    let rsp = alice
        .post(&format!("/spaces/{}/members", space))
        .json(&json!({"username": "bobby"}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::CREATED, rsp.status());
    let rsp = alice
        .post(&format!("/spaces/{}/members", space))
        .json(&json!({"username": "bobby"}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::OK, rsp.status());
    let rsp = alice
        .post(&format!("/spaces/{}/members", space))
        .json(&json!({"username": "alice"}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());
    let rsp = alice
        .post(&format!("/spaces/{}/members", space))
        .json(&json!({"username": "nobody"}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NOT_FOUND, rsp.status());
    let rsp = bobby
        .post(&format!("/spaces/{}/members", space))
        .json(&json!({"username": "carol"}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::FORBIDDEN, rsp.status());

    // Members see the space & the private files linked into it
    let rsp = bobby.get(&format!("/spaces/{}", space)).send().await.unwrap();
    assert_eq!(StatusCode::OK, rsp.status());
    let detail = rsp.json::<Value>().await.unwrap();
    assert_eq!("Study Group", detail["space"]["name"]);
    assert_eq!(1, detail["members"].as_array().unwrap().len());
    assert_eq!("bobby", detail["members"][0]["username"]);
    assert_eq!(1, detail["files"].as_array().unwrap().len());
    let rsp = bobby.get(&format!("/files/{}", private)).send().await.unwrap();
    assert_eq!(StatusCode::OK, rsp.status());
    let spaces = bobby
        .get("/spaces")
        .send()
        .await
        .unwrap()
        .json::<Vec<Value>>()
        .await
        .unwrap();
    assert_eq!(1, spaces.len());

    // Outsiders see nothing
    let rsp = carol.get(&format!("/spaces/{}", space)).send().await.unwrap();
    assert_eq!(StatusCode::NOT_FOUND, rsp.status());
    let rsp = carol.get(&format!("/files/{}", private)).send().await.unwrap();
    assert_eq!(StatusCode::NOT_FOUND, rsp.status());

    let rsp = bobby
        .post(&format!("/spaces/{}/docs", space))
        .json(&json!({"title": "Shared notes", "url": "https://docs.example.com/d/1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::CREATED, rsp.status());
    let doc = rsp.json::<Value>().await.unwrap()["id"]
        .as_str()
        .unwrap()
        .to_owned();
    let rsp = bobby
        .post(&format!("/spaces/{}/docs", space))
        .json(&json!({"title": "  ", "url": "https://docs.example.com/d/2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());

    let rsp = bobby
        .delete(&format!("/spaces/{}", space))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::FORBIDDEN, rsp.status());
    let rsp = alice
        .delete(&format!("/spaces/{}/docs/{}", space, doc))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NO_CONTENT, rsp.status());

    // Members may leave
    let rsp = bobby
        .delete(&format!("/spaces/{}/members/bobby", space))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NO_CONTENT, rsp.status());
    let rsp = bobby.get(&format!("/spaces/{}", space)).send().await.unwrap();
    assert_eq!(StatusCode::NOT_FOUND, rsp.status());
    let rsp = bobby.get(&format!("/files/{}", private)).send().await.unwrap();
    assert_eq!(StatusCode::NOT_FOUND, rsp.status());

    let rsp = alice
        .delete(&format!("/spaces/{}/files/{}", space, private))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NO_CONTENT, rsp.status());
    let rsp = alice
        .delete(&format!("/spaces/{}", space))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NO_CONTENT, rsp.status());
    let rsp = alice.get(&format!("/spaces/{}", space)).send().await.unwrap();
    assert_eq!(StatusCode::NOT_FOUND, rsp.status());
    // The file itself survives its space
    let rsp = alice.get(&format!("/files/{}", private)).send().await.unwrap();
    assert_eq!(StatusCode::OK, rsp.status());
}

#[tokio::test]
async fn delete_account() {
    let base = spawn_server(1024 * 1024).await;
    let alice = Caller::signup(&base, "alice").await;
    let bobby = Caller::signup(&base, "bobby").await;
    let anon = Caller::anonymous(&base);

    let file = alice.upload_ok("notes.txt", "Art", true).await;
    let rsp = bobby
        .post(&format!("/files/{}/comments", file))
        .json(&json!({"text": "Lovely"}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::CREATED, rsp.status());
    let rsp = bobby
        .put(&format!("/bookmarks/{}", file))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::CREATED, rsp.status());
    let rsp = alice
        .post("/spaces")
        .json(&json!({"name": "Studio"}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::CREATED, rsp.status());

    let rsp = alice.delete("/users/me").send().await.unwrap();
    assert_eq!(StatusCode::OK, rsp.status());
    let deleted = rsp.json::<Value>().await.unwrap()["deleted"].clone();
    assert_eq!(1, deleted["users"]);
    assert_eq!(1, deleted["files"]);
    assert_eq!(1, deleted["spaces"]);
    assert_eq!(1, deleted["comments"]);
    assert_eq!(1, deleted["bookmarks"]);

    let rsp = anon.get(&format!("/files/{}", file)).send().await.unwrap();
    assert_eq!(StatusCode::NOT_FOUND, rsp.status());
    let marks = bobby
        .get("/bookmarks")
        .send()
        .await
        .unwrap()
        .json::<Vec<Value>>()
        .await
        .unwrap();
    assert!(marks.is_empty());
    let rsp = anon
        .post("/users/login")
        .json(&json!({"username": "alice", "password": PASSWORD}))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());
    // The old token no longer names anybody
    let rsp = alice.get("/users/me").send().await.unwrap();
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());
}

#[tokio::test]
async fn tokens_outlive_neither_account_nor_name() {
    let base = spawn_server(1024 * 1024).await;
    let first = Caller::signup(&base, "alice").await;
    let first_id = first
        .get("/users/me")
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap()["id"]
        .clone();
    let rsp = first.delete("/users/me").send().await.unwrap();
    assert_eq!(StatusCode::OK, rsp.status());

    // Somebody else takes the freed name...
    let second = Caller::signup(&base, "alice").await;
    let rsp = second.get("/users/me").send().await.unwrap();
    assert_eq!(StatusCode::OK, rsp.status());
    assert_ne!(first_id, rsp.json::<Value>().await.unwrap()["id"]);
    // but the first account's token doesn't follow it.
    let rsp = first.get("/users/me").send().await.unwrap();
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());
}

#[tokio::test]
async fn one_authorization_header() {
    let base = spawn_server(1024 * 1024).await;
    let alice = Caller::signup(&base, "alice").await;
    let rsp = alice.get("/users/me").send().await.unwrap();
    assert_eq!(StatusCode::OK, rsp.status());

    // `bearer_auth` appends a second `Authorization` header to the one `Caller` already set
    let rsp = alice
        .get("/users/me")
        .bearer_auth("a.b.c")
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());
    let body = rsp.json::<Value>().await.unwrap();
    assert_eq!("Multiple authorization headers", body["error"]);
}
