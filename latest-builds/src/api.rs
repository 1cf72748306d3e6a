use crate::blob_store::BlobStore;
use crate::config::{Listener as ListenerConfig, Storage};
use crate::counter;
use crate::metrics_defs::API_REQUESTS;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;

pub const NO_DOCUMENT_MESSAGE: &str = "Error returning last SQL Server patches.";

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BlobStore>,
    pub storage: Storage,
    pub ready: Arc<AtomicBool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/builds", get(latest_builds_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}

pub async fn serve(listener: ListenerConfig, state: AppState) -> Result<(), ApiError> {
    let addr = format!("{}:{}", listener.host, listener.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "serving latest builds");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

enum LatestBuildsResponse {
    Document(Bytes),
    Unavailable,
}

impl IntoResponse for LatestBuildsResponse {
    fn into_response(self) -> Response {
        match self {
            LatestBuildsResponse::Document(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response(),
            LatestBuildsResponse::Unavailable => (
                StatusCode::BAD_REQUEST,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                NO_DOCUMENT_MESSAGE,
            )
                .into_response(),
        }
    }
}

/// Returns the stored derived document verbatim. Request parameters are ignored.
/// An empty blob counts as no document.
async fn latest_builds_handler(State(state): State<AppState>) -> LatestBuildsResponse {
    let result = state
        .store
        .retrieve(&state.storage.container, &state.storage.derived_blob)
        .await;

    match result {
        Ok(body) if !body.is_empty() => {
            counter!(API_REQUESTS, "status" => "200").increment(1);
            LatestBuildsResponse::Document(body)
        }
        Ok(_) => {
            tracing::error!(blob = %state.storage.derived_blob, "latest builds document is empty");
            counter!(API_REQUESTS, "status" => "400").increment(1);
            LatestBuildsResponse::Unavailable
        }
        Err(err) => {
            tracing::error!(blob = %state.storage.derived_blob, error = %err, "could not read latest builds");
            counter!(API_REQUESTS, "status" => "400").increment(1);
            LatestBuildsResponse::Unavailable
        }
    }
}

async fn health_handler() -> &'static str {
    "ok\n"
}

async fn ready_handler(State(state): State<AppState>) -> Response {
    if state.ready.load(Ordering::Relaxed) {
        "ok\n".into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MemoryBlobStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(store: Arc<MemoryBlobStore>, ready: bool) -> AppState {
        AppState {
            store,
            storage: Storage::default(),
            ready: Arc::new(AtomicBool::new(ready)),
        }
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_no_document_returns_400() {
        let app = router(state(Arc::new(MemoryBlobStore::new()), true));

        let (status, content_type, body) = get(app, "/api/builds").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(content_type.as_deref(), Some("text/plain; charset=utf-8"));
        assert_eq!(body, NO_DOCUMENT_MESSAGE);
    }

    #[tokio::test]
    async fn test_empty_document_returns_400() {
        let store = Arc::new(MemoryBlobStore::new());
        store
            .store("sqlserverbuildsapi", "builds.json", Bytes::new())
            .await
            .unwrap();
        let app = router(state(store, true));

        let (status, _, body) = get(app, "/api/builds").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, NO_DOCUMENT_MESSAGE);
    }

    #[tokio::test]
    async fn test_document_returned_verbatim() {
        let document = r#"[{"SQLServer":"2019","Version":15,"Build":"15.0.4261.1","ReleaseDate":"2022-09-14","Link":null,"FileVersion":null}]"#;
        let store = Arc::new(MemoryBlobStore::new());
        store
            .store(
                "sqlserverbuildsapi",
                "builds.json",
                Bytes::from_static(document.as_bytes()),
            )
            .await
            .unwrap();
        let app = router(state(store, true));

        // Query parameters make no difference.
        for uri in ["/api/builds", "/api/builds?version=15"] {
            let (status, content_type, body) = get(app.clone(), uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(content_type.as_deref(), Some("application/json"));
            assert_eq!(body, document);
        }
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let store = Arc::new(MemoryBlobStore::new());

        let (status, _, body) = get(router(state(store.clone(), false)), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok\n");

        let (status, _, _) = get(router(state(store.clone(), false)), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _, _) = get(router(state(store, true)), "/ready").await;
        assert_eq!(status, StatusCode::OK);
    }
}
