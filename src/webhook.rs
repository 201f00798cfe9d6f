// src/webhook.rs

use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    source::{scheduler::Scheduler, ExternalDispatch, PluginDispatcher},
    util::MultiError,
};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("source name is missing")]
    MissingSource,
    #[error("request body is empty")]
    EmptyPayload,
    #[error("cannot read request body: {0}")]
    UnreadableBody(String),
    #[error("source \"{0}\" not found")]
    NotFound(String),
    #[error(transparent)]
    Delivery(#[from] MultiError),
}

impl BridgeError {
    pub fn status(&self) -> StatusCode {
        match self {
            BridgeError::MissingSource | BridgeError::EmptyPayload | BridgeError::UnreadableBody(_) => {
                StatusCode::BAD_REQUEST
            }
            BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: self.to_string() };
        (self.status(), Json(body)).into_response()
    }
}

/// Hands externally posted payloads to every started instance bound to
/// the addressed source whose plugin accepts external requests.
pub struct WebhookBridge {
    scheduler: Arc<Scheduler>,
    dispatcher: Arc<dyn PluginDispatcher>,
}

impl WebhookBridge {
    pub fn new(scheduler: Arc<Scheduler>, dispatcher: Arc<dyn PluginDispatcher>) -> Self {
        Self { scheduler, dispatcher }
    }

    /// Deliver `payload` to all instances of `source`, concurrently.
    /// Returns how many instances accepted it.
    pub async fn deliver(&self, source: &str, payload: Vec<u8>) -> Result<usize, BridgeError> {
        if source.trim().is_empty() {
            return Err(BridgeError::MissingSource);
        }
        if payload.is_empty() {
            return Err(BridgeError::EmptyPayload);
        }

        let instances: Vec<_> = self
            .scheduler
            .instances_for_source(source)
            .into_iter()
            .filter(|instance| {
                let accepts = self.dispatcher.accepts_external(&instance.plugin);
                if !accepts {
                    debug!(source, plugin = %instance.plugin, "plugin takes no external requests, skipping");
                }
                accepts
            })
            .collect();
        if instances.is_empty() {
            return Err(BridgeError::NotFound(source.to_string()));
        }
        let total = instances.len();

        let deliveries = instances.into_iter().map(|instance| {
            let plugin = instance.plugin.clone();
            let request = ExternalDispatch {
                instance,
                source: source.to_string(),
                payload: payload.clone(),
            };
            async move {
                self.dispatcher
                    .dispatch_external(request)
                    .await
                    .map_err(|err| err.context(format!("plugin `{plugin}`")))
            }
        });

        let errors: MultiError = join_all(deliveries)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();
        if let Some(err) = errors.into_result() {
            warn!(source, failed = err.len(), total, "webhook delivery failed");
            return Err(err.into());
        }
        debug!(source, instances = total, "webhook payload delivered");
        Ok(total)
    }
}

/// `POST /sources/v1/{source_name}`; the bare prefix answers 400.
pub fn router(bridge: Arc<WebhookBridge>) -> Router {
    Router::new()
        .route("/sources/v1/:source_name", post(handle_source))
        .route("/sources/v1/", post(missing_source))
        .route("/sources/v1", post(missing_source))
        .layer(Extension(bridge))
        .layer(TraceLayer::new_for_http())
}

async fn handle_source(
    Path(source_name): Path<String>,
    Extension(bridge): Extension<Arc<WebhookBridge>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<serde_json::Value>, BridgeError> {
    let body = body.map_err(|rejection| BridgeError::UnreadableBody(rejection.body_text()))?;
    bridge.deliver(&source_name, body.to_vec()).await?;
    Ok(Json(json!({ "success": true })))
}

async fn missing_source() -> BridgeError {
    BridgeError::MissingSource
}

/// Serve the webhook surface until `cancel` fires.
pub async fn serve(bridge: Arc<WebhookBridge>, addr: SocketAddr, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Started webhook server on http://{}", listener.local_addr()?);
    axum::serve(listener, router(bridge))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("webhook server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, source::scheduler::test_util::RecordingDispatcher};
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    async fn bridge(dispatcher: RecordingDispatcher) -> (Arc<WebhookBridge>, Arc<RecordingDispatcher>) {
        let cfg = Config::from_yaml(
            r#"
sources:
  incoming:
    plugins:
      webhook: { enabled: true }
      echo: { enabled: true, config: { verbose: true } }
  other:
    plugins:
      webhook: { enabled: true }
communications:
  sinks:
    - name: log
      bindings: { sources: [incoming] }
    - name: audit
      bindings: { sources: [other, incoming] }
"#,
        )
        .unwrap();
        let dispatcher = Arc::new(dispatcher);
        let scheduler = Arc::new(Scheduler::new(cfg.sources.clone(), dispatcher.clone()));
        scheduler.schedule_all(&cfg).await.unwrap();
        (Arc::new(WebhookBridge::new(scheduler, dispatcher.clone())), dispatcher)
    }

    async fn post(app: Router, uri: &str, body: &'static str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).method("POST").body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn unknown_source_is_not_found() {
        let (bridge, dispatcher) = bridge(RecordingDispatcher::default()).await;
        let (status, body) = post(router(bridge), "/sources/v1/unknown-source", "{}").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "source \"unknown-source\" not found" }));
        assert!(dispatcher.external.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn payload_reaches_every_instance_of_the_source() {
        let (bridge, dispatcher) = bridge(RecordingDispatcher::default()).await;
        let (status, body) = post(router(bridge), "/sources/v1/incoming", r#"{"message":"hi"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));

        let external = dispatcher.external.lock().unwrap().clone();
        // echo[incoming], webhook[incoming], webhook[other, incoming]
        assert_eq!(external.len(), 3);
        assert!(external.iter().all(|d| d.source == "incoming" && d.payload == br#"{"message":"hi"}"#));
    }

    #[tokio::test]
    async fn empty_body_and_missing_name_are_bad_requests() {
        let (bridge, dispatcher) = bridge(RecordingDispatcher::default()).await;

        let (status, body) = post(router(bridge.clone()), "/sources/v1/incoming", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "request body is empty");

        let (status, body) = post(router(bridge), "/sources/v1/", "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "source name is missing");
        assert!(dispatcher.external.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_instances_are_aggregated() {
        let failing = RecordingDispatcher {
            fail_external_for: vec!["echo".into()],
            ..Default::default()
        };
        let (bridge, dispatcher) = bridge(failing).await;
        let (status, body) = post(router(bridge), "/sources/v1/incoming", "ping").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let error = body["error"].as_str().unwrap();
        assert!(error.starts_with("1 error occurred:"), "{error}");
        assert!(error.contains("plugin `echo`"), "{error}");
        assert_eq!(dispatcher.external.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn deliver_reports_accepted_instances() {
        let (bridge, _) = bridge(RecordingDispatcher::default()).await;
        assert_eq!(bridge.deliver("other", b"x".to_vec()).await.unwrap(), 1);
        assert!(matches!(bridge.deliver(" ", b"x".to_vec()).await, Err(BridgeError::MissingSource)));
    }

    #[tokio::test]
    async fn streaming_only_plugins_are_skipped() {
        let mixed = RecordingDispatcher {
            streaming_only: vec!["echo".into()],
            ..Default::default()
        };
        let (bridge, dispatcher) = bridge(mixed).await;
        let (status, body) = post(router(bridge), "/sources/v1/incoming", "ping").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));
        let external = dispatcher.external.lock().unwrap().clone();
        assert_eq!(external.len(), 2);
        assert!(external.iter().all(|d| d.instance.plugin == "webhook"));
    }

    #[tokio::test]
    async fn source_without_capable_instances_is_not_found() {
        let watch_only = RecordingDispatcher {
            streaming_only: vec!["webhook".into()],
            ..Default::default()
        };
        let (bridge, dispatcher) = bridge(watch_only).await;
        let (status, body) = post(router(bridge), "/sources/v1/other", "ping").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "source \"other\" not found" }));
        assert!(dispatcher.external.lock().unwrap().is_empty());
    }
}
