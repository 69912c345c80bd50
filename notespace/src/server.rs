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

//! # Assembling the service
//!
//! [make_router] stitches the per-resource API routers together under `/api/v1`, adds the
//! operational endpoints, & wraps the lot in request-id, tracing & metrics middleware.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use axum::{
    Router,
    extract::State,
    http::{HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
};
use opentelemetry::{KeyValue, global};
use opentelemetry_prometheus_text_exporter::PrometheusExporter;
use tap::Pipe;
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::error;

use crate::{
    bookmarks, comments, files, metrics::check_metric_names, notespace::Notespace, ratings,
    spaces, users,
};

/// Count requests by method & path
///
/// OTel instrument names must be ASCII alphanumerics, '_', '.', '-' & '/'; anything else in the
/// path is dropped, and '/' becomes '.'.
async fn otel_middleware(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let stem: String = request
        .uri()
        .path()
        .chars()
        .filter_map(|c| match c {
            '/' => Some('.'),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' => Some(c),
            _ => None,
        })
        .collect();

    let name = format!("http.{}{}", request.method().as_str().to_lowercase(), stem);
    global::meter("notespace")
        .u64_counter(name)
        .build()
        .add(1, &[]);
    next.run(request).await
}

async fn healthcheck() -> &'static str {
    "GOOD"
}

async fn metrics(State(state): State<Arc<Notespace>>) -> axum::response::Response {
    let mut output = Vec::new();
    match state.exporter.export(&mut output) {
        Ok(_) => match String::from_utf8(output) {
            Ok(text) => text.into_response(),
            Err(err) => {
                error!("Non UTF-8 Prometheus exposition: {:?}", err);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        Err(err) => {
            error!("Failed to encode Prometheus metrics: {:?}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Counter for generating request IDs; a u64 is more readable than a UUID, and doubles as a rough
/// gauge of how many requests the server has handled since it started
#[derive(Clone, Debug, Default)]
pub struct RequestIdGenerator {
    counter: Arc<AtomicU64>,
}

impl MakeRequestId for RequestIdGenerator {
    fn make_request_id<B>(&mut self, _request: &axum::extract::Request<B>) -> Option<RequestId> {
        self.counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
            .pipe(|s| RequestId::new(HeaderValue::from_str(&s).unwrap(/* known good */)))
            .pipe(Some)
    }
}

/// Make the [Router] for the entire service
pub fn make_router(state: Arc<Notespace>) -> Router {
    let api = Router::new()
        .merge(users::make_router(state.clone()))
        .merge(files::make_router(state.clone()))
        .merge(comments::make_router(state.clone()))
        .merge(ratings::make_router(state.clone()))
        .merge(bookmarks::make_router(state.clone()))
        .merge(spaces::make_router(state.clone()));

    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/metrics", get(metrics))
        .nest("/api/v1", api)
        // Incoming requests should hit `SetRequestIdLayer` *first*, so it's applied last:
        //
        //                 requests
        //                    |
        //                    v
        // +---------  SetRequestIdLayer      ---------+
        // | +-------      OTEL layer         -------+ |
        // | | +-----      TraceLayer         -----+ | |
        // | | | +--- PropagateRequestIdLayer ---+ | | |
        // | | | |          handler              | | | |
        // | | | +--- PropagateRequestIdLayer ---+ | | |
        // | | +-----      TraceLayer         -----+ | |
        // | +-------      OTEL Layer         -------+ |
        // +---------   SetRequestIdLayer     ---------+
        //                    |
        //                    v
        //                responses
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(axum::middleware::from_fn(otel_middleware))
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            RequestIdGenerator::default(),
        ))
        .with_state(state)
}

/// Initialize telemetry
///
/// <div class="warning">
///
/// This must be invoked before any instruments are accessed; counters created earlier remain bound
/// to the no-op provider.
///
/// </div>
///
/// Install an [SdkMeterProvider] whose sole reader is a Prometheus text exporter, and return that
/// exporter for use in serving `/metrics`.
///
/// [SdkMeterProvider]: opentelemetry_sdk::metrics::SdkMeterProvider
pub fn init_telemetry() -> PrometheusExporter {
    check_metric_names();
    let exporter = PrometheusExporter::new();
    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_resource(
            opentelemetry_sdk::Resource::builder_empty()
                .with_attribute(KeyValue::new("service.name", "notespace"))
                .build(),
        )
        .with_reader(exporter.clone())
        .build();
    global::set_meter_provider(provider);
    exporter
}
