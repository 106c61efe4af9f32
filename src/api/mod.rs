//! REST API layer: route handlers, DTOs, bearer auth, and router
//! composition.
//!
//! Resource endpoints are mounted under `/api/v1` and require
//! `Authorization: Bearer <token>`. `/health` is open.

pub mod auth;
pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::app_state::AppState;

/// OpenAPI document for every REST endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "Narrative Pipeline API",
        description = "Buy-call intake, narrative analysis results, and queue administration."
    ),
    paths(
        handlers::narrative::submit_call,
        handlers::narrative::list_narratives,
        handlers::narrative::narrative_stats,
        handlers::narrative::trending,
        handlers::narrative::get_narrative,
        handlers::narrative::reanalyze,
        handlers::narrative::sentiment_history,
        handlers::narrative::delete_narrative,
        handlers::queue::queue_stats,
        handlers::queue::reprocess_dlq,
        handlers::queue::purge_queue,
        handlers::system::health_handler,
    ),
    components(schemas(
        crate::error::ErrorResponse,
        crate::service::CallReceipt,
        crate::store::NarrativeStats,
        dto::SubmitCallRequest,
        dto::NarrativeDetailResponse,
        dto::TrendingResponse,
        dto::DeleteNarrativeResponse,
        dto::QueueStatsResponse,
        dto::ReprocessRequest,
        dto::ReprocessResponse,
        dto::PurgeRequest,
        dto::PurgeResponse,
        handlers::system::HealthResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "Narratives", description = "Token narratives and sentiment history"),
        (name = "Queue", description = "Work and dead-letter queue administration"),
        (name = "System", description = "Service health"),
    )
)]
pub struct ApiDoc;

#[derive(Debug)]
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::app_state::{Backends, Pipeline};
    use crate::config::QueueConfig;
    use crate::domain::{Clock, ManualClock};
    use crate::enrichment::ScriptedEnrichmentClient;
    use crate::queue::{InMemoryJobQueue, JobQueue, QueueName};
    use crate::store::InMemoryNarrativeStore;

    const TOKEN: &str = "test-token";

    struct Harness {
        app: Router,
        queue: Arc<InMemoryJobQueue>,
    }

    fn harness_with_token(token: Option<&str>) -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_epoch());
        let config = QueueConfig::default();
        let queue = Arc::new(InMemoryJobQueue::new(Arc::clone(&clock), &config));
        let pipeline = Pipeline::assemble(
            Backends {
                store: Arc::new(InMemoryNarrativeStore::new()),
                queue: Arc::clone(&queue) as Arc<dyn JobQueue>,
                client: Arc::new(ScriptedEnrichmentClient::new()),
                clock,
            },
            &config,
            Duration::from_secs(12),
            token.map(str::to_string),
        );
        Harness {
            app: build_router().with_state(pipeline.state),
            queue,
        }
    }

    fn harness() -> Harness {
        harness_with_token(Some(TOKEN))
    }

    fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {TOKEN}"));
        let built = match body {
            Some(json) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        };
        let Ok(req) = built else {
            panic!("invalid request");
        };
        req
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let Ok(response) = app.clone().oneshot(req).await else {
            panic!("router failed");
        };
        let status = response.status();
        let Ok(bytes) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body read failed");
        };
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn call(symbol: &str, address: &str) -> Value {
        json!({ "tokenSymbol": symbol, "tokenAddress": address })
    }

    #[tokio::test]
    async fn health_is_open() {
        let h = harness();
        let Ok(req) = Request::builder().uri("/health").body(Body::empty()) else {
            panic!("invalid request");
        };
        let (status, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn missing_or_wrong_token_is_unauthorized() {
        let h = harness();
        let Ok(req) = Request::builder()
            .uri("/api/v1/narratives")
            .body(Body::empty())
        else {
            panic!("invalid request");
        };
        let (status, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], 1100);

        let Ok(req) = Request::builder()
            .uri("/api/v1/queue/stats")
            .header(AUTHORIZATION, "Bearer nope")
            .body(Body::empty())
        else {
            panic!("invalid request");
        };
        let (status, _) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unconfigured_token_rejects_everything() {
        let h = harness_with_token(None);
        let (status, _) = send(&h.app, request(Method::GET, "/api/v1/narratives", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn submit_returns_created_then_ok() {
        let h = harness();
        let (status, body) = send(
            &h.app,
            request(Method::POST, "/api/v1/narratives", Some(call("BONK", "Dez63"))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["isNew"], true);
        assert_eq!(body["status"], "queued");

        let (status, body) = send(
            &h.app,
            request(Method::POST, "/api/v1/narratives", Some(call("BONK", "Dez63"))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isNew"], false);
        assert_eq!(h.queue.ready_bodies(QueueName::Main).await.len(), 2);
    }

    #[tokio::test]
    async fn submit_without_symbol_is_bad_request() {
        let h = harness();
        let (status, body) = send(
            &h.app,
            request(
                Method::POST,
                "/api/v1/narratives",
                Some(json!({ "tokenAddress": "Dez63" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], 1001);
        assert!(h.queue.ready_bodies(QueueName::Main).await.is_empty());
    }

    #[tokio::test]
    async fn detail_list_and_delete() {
        let h = harness();
        send(
            &h.app,
            request(Method::POST, "/api/v1/narratives", Some(call("BONK", "Dez63"))),
        )
        .await;

        let (status, body) = send(&h.app, request(Method::GET, "/api/v1/narratives/Dez63", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["narrative"]["tokenSymbol"], "BONK");
        assert_eq!(body["recentAnalyses"], json!([]));

        let (status, body) = send(
            &h.app,
            request(Method::GET, "/api/v1/narratives?tokenSymbol=bon", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["total"], 1);

        let (status, body) = send(&h.app, request(Method::DELETE, "/api/v1/narratives/Dez63", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deletedToken"]["symbol"], "BONK");
        assert_eq!(body["snapshotsDeleted"], 0);

        let (status, body) = send(&h.app, request(Method::GET, "/api/v1/narratives/Dez63", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], 2001);
    }

    #[tokio::test]
    async fn reanalyze_unknown_token_is_not_found() {
        let h = harness();
        let (status, _) = send(
            &h.app,
            request(Method::POST, "/api/v1/narratives/nope/reanalyze", None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn trending_rejects_unknown_metric() {
        let h = harness();
        let (status, _) = send(
            &h.app,
            request(Method::GET, "/api/v1/narratives/trending?metric=volume", None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &h.app,
            request(Method::GET, "/api/v1/narratives/trending?metric=topicRank", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metric"], "topicRank");
    }

    #[tokio::test]
    async fn queue_stats_reports_depths() {
        let h = harness();
        send(
            &h.app,
            request(Method::POST, "/api/v1/narratives", Some(call("BONK", "Dez63"))),
        )
        .await;
        let (status, body) = send(&h.app, request(Method::GET, "/api/v1/queue/stats", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mainQueue"]["messageCount"], 1);
        assert_eq!(body["deadLetterQueue"]["name"], "narrative_analysis_dlq");
    }

    #[tokio::test]
    async fn purge_requires_confirmation_and_known_queue() {
        let h = harness();
        send(
            &h.app,
            request(Method::POST, "/api/v1/narratives", Some(call("BONK", "Dez63"))),
        )
        .await;

        let (status, body) = send(
            &h.app,
            request(Method::POST, "/api/v1/queue/purge", Some(json!({}))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], 1003);

        let (status, body) = send(
            &h.app,
            request(
                Method::POST,
                "/api/v1/queue/purge",
                Some(json!({ "queueName": "orders", "confirm": true })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], 1002);

        let (status, body) = send(
            &h.app,
            request(
                Method::POST,
                "/api/v1/queue/purge",
                Some(json!({ "confirm": true })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["purgedCount"], 1);
        assert_eq!(body["queueName"], "narrative_analysis_queue");
    }

    #[tokio::test]
    async fn reprocess_defaults_limit() {
        let h = harness();
        let (status, body) = send(
            &h.app,
            request(Method::POST, "/api/v1/queue/reprocess-dlq", Some(json!({}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reprocessedCount"], 0);
    }

    #[test]
    fn openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/v1/narratives",
            "/api/v1/narratives/{token_address}",
            "/api/v1/queue/purge",
            "/health",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
