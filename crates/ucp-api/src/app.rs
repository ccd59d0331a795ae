use axum::middleware;
use axum::routing::{get, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer_token;
use crate::handlers;
use crate::state::AppState;

/// Wires the ARM-RPC frontend (§4.3/§4.4), the flat operation-status/result
/// surface (§4.6), and the credential endpoints (§4.9) into one router.
/// Every route except `/health` sits behind the bearer-token middleware, the
/// same `route_layer` shape the teacher uses.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/status", get(handlers::status))
        .route("/operationStatuses/:id", get(handlers::get_operation_status))
        .route("/operationResults/:id", get(handlers::get_operation_result))
        .route(
            "/credentials/:plane_name",
            put(handlers::put_credential).get(handlers::get_credential),
        )
        // Catch-all for the ARM-RPC resource surface: `/planes/{type}/{name}/...`.
        // `classify_path` (in `path.rs`) tells a bare resource id apart from a
        // type listing on GET, and splits the trailing action verb on POST.
        .route(
            "/*resource_path",
            get(handlers::get_or_list)
                .put(handlers::put_resource)
                .patch(handlers::patch_resource)
                .delete(handlers::delete_resource)
                .post(handlers::post_action),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;
    use ucp_driver::{EnvironmentsController, PlaneRegistry};
    use ucp_routing::TypeRegistry;
    use ucp_store::{InMemoryStore, ResourceLockTable};
    use ucp_worker::CancellationRegistry;

    use super::*;

    const TEST_TOKEN: &str = "test-token";

    fn test_state() -> AppState {
        let store = Arc::new(InMemoryStore::new());
        let mut types = TypeRegistry::new();
        types.register(Arc::new(EnvironmentsController), vec![]);
        AppState {
            storage: store.clone(),
            queue: store.clone(),
            secrets: store.clone(),
            credentials: store,
            types: Arc::new(types),
            planes: Arc::new(PlaneRegistry::new()),
            locks: ResourceLockTable::new(),
            cancellations: CancellationRegistry::new(),
            auth_token: Arc::new(TEST_TOKEN.to_string()),
            default_poll_interval_secs: 5,
        }
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.header("Authorization", format!("Bearer {}", TEST_TOKEN))
    }

    #[tokio::test]
    async fn unauthenticated_request_returns_401() {
        let app = build_app(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_returns_401() {
        let app = build_app(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .header("Authorization", "Bearer wrong-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_returns_200_with_valid_token() {
        let app = build_app(test_state());
        let resp = app
            .oneshot(authed(Request::builder().uri("/health")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_returns_200() {
        let app = build_app(test_state());
        let resp = app
            .oneshot(authed(Request::builder().uri("/status")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_resource_returns_404() {
        let app = build_app(test_state());
        let resp = app
            .oneshot(
                authed(Request::builder().uri(
                    "/planes/radius/local/resourceGroups/g/providers/Applications.Core/environments/env1?api-version=2024-01-01",
                ))
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn put_creates_then_get_returns_200() {
        let app = build_app(test_state());
        let body = serde_json::json!({"location": "global", "properties": {}});
        let put_resp = app
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method("PUT")
                        .uri(
                            "/planes/radius/local/resourceGroups/g/providers/Applications.Core/environments/env1?api-version=2024-01-01",
                        )
                        .header("content-type", "application/json"),
                )
                .body(Body::from(body.to_string()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(put_resp.status(), StatusCode::CREATED);

        let get_resp = app
            .oneshot(
                authed(Request::builder().uri(
                    "/planes/radius/local/resourceGroups/g/providers/Applications.Core/environments/env1",
                ))
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(get_resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn delete_of_missing_resource_is_idempotent_204() {
        let app = build_app(test_state());
        let resp = app
            .oneshot(
                authed(
                    Request::builder().method("DELETE").uri(
                        "/planes/radius/local/resourceGroups/g/providers/Applications.Core/environments/nope",
                    ),
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn operation_not_found_returns_404() {
        let app = build_app(test_state());
        let resp = app
            .oneshot(
                authed(Request::builder().uri(format!("/operationStatuses/{}", uuid::Uuid::new_v4())))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
