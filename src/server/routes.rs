//! HTTP endpoints
//!
//! `PUT /<id>?<token>` or `POST /<id>?<token>` publishes a raw WebM byte
//! stream; `GET /<id>` plays it back. Both sides of a broadcast meet here:
//! the request body is fed to the parser in bounded slices, and each viewer
//! streams its bounded queue until end of stream or disconnect.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, Response, StatusCode};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::{stream, StreamExt};
use tokio::sync::mpsc;

use crate::broadcast::{BroadcastEntry, BroadcastSet, ViewerId};

use super::config::ServerConfig;

/// Shared state of the HTTP edge
#[derive(Clone)]
pub struct AppState {
    set: BroadcastSet,
    config: ServerConfig,
}

/// Build the relay router
pub fn router(set: BroadcastSet, config: ServerConfig) -> Router {
    Router::new()
        .route("/:id", get(watch).put(publish).post(publish))
        .with_state(AppState { set, config })
}

fn text_response(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(message.to_owned()))
        .unwrap()
}

/// Releases the producer side even when the request future is dropped
struct ProducerGuard(Arc<BroadcastEntry>);

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Detaches the viewer when the response stream is dropped
struct ViewerGuard {
    entry: Arc<BroadcastEntry>,
    viewer_id: ViewerId,
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        self.entry.broadcast().disconnect(self.viewer_id);
    }
}

/// `PUT`/`POST /<id>?<token>`: ingest a producer's WebM stream
async fn publish(
    Path(id): Path<String>,
    RawQuery(token): RawQuery,
    State(state): State<AppState>,
    body: Body,
) -> Response<Body> {
    if !state.set.hooks().authorize(&id, token.as_deref().unwrap_or("")) {
        return text_response(StatusCode::FORBIDDEN, "Invalid token.");
    }

    let entry = match state.set.writable(&id).await {
        Ok(entry) => entry,
        Err(e) => return text_response(StatusCode::FORBIDDEN, &e.to_string()),
    };
    let _guard = ProducerGuard(Arc::clone(&entry));

    let mut body = body.into_data_stream();
    while let Some(chunk) = body.next().await {
        let Ok(data) = chunk else {
            // Transport error: the grace period decides the stream's fate
            break;
        };
        for piece in data.chunks(state.config.ingest_chunk_size) {
            if let Err(e) = entry.write(piece).await {
                entry.broadcast().reset().await;
                tracing::warn!(stream = %id, error = %e, "Producer upload failed");
                return text_response(StatusCode::BAD_REQUEST, &e.to_string());
            }
        }
    }

    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())
        .unwrap()
}

/// `GET /<id>`: attach a viewer and stream its queue
async fn watch(Path(id): Path<String>, State(state): State<AppState>) -> Response<Body> {
    let Some(entry) = state.set.readable(&id).await else {
        return text_response(StatusCode::NOT_FOUND, "Stream offline.");
    };

    let (tx, rx) = mpsc::channel::<Bytes>(state.config.viewer_queue_capacity);
    let viewer_id = entry.broadcast().connect(tx, false);
    let guard = ViewerGuard { entry, viewer_id };

    // An empty chunk is the end-of-stream marker; a closed channel means
    // the broadcast went away
    let stream = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        match rx.recv().await {
            Some(chunk) if !chunk.is_empty() => {
                Some((Ok::<Bytes, Infallible>(chunk), (rx, guard)))
            }
            _ => None,
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/webm")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap()
}
