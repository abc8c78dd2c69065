//! Inbound webhook ingress.
//!
//! Per provider, per tenant:
//! - `POST /webhooks/{tenant_id}/{provider}/orders/create`
//! - `POST /webhooks/{tenant_id}/{provider}/orders/status`
//!
//! Every request is authenticated from the raw body via the provider
//! adapter before anything else happens; unauthenticated requests are
//! rejected with no side effect. Status payloads whose remote status has no
//! local equivalent are acknowledged and ignored.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use storebridge_core::{Provider, TenantId};

use crate::error::SyncError;
use crate::models::Store;
use crate::providers::WebhookAction;
use crate::state::AppState;

/// Build the ingress router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/webhooks/{tenant_id}/{provider}/orders/create",
            post(order_create),
        )
        .route(
            "/webhooks/{tenant_id}/{provider}/orders/status",
            post(order_status),
        )
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Errors a webhook request can produce, mapped onto HTTP statuses.
#[derive(Debug, thiserror::Error)]
enum WebhookError {
    #[error("unknown provider")]
    UnknownProvider,
    #[error("no active store for this tenant and provider")]
    UnknownStore,
    #[error("webhook authentication failed")]
    Unauthenticated,
    #[error("request body is not valid JSON")]
    MalformedBody,
    #[error("payload could not be mapped")]
    Unmappable,
    #[error("internal error")]
    Internal,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::UnknownProvider | Self::UnknownStore => StatusCode::NOT_FOUND,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::MalformedBody => StatusCode::BAD_REQUEST,
            Self::Unmappable => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

impl From<SyncError> for WebhookError {
    fn from(err: SyncError) -> Self {
        match &err {
            SyncError::Provider(e) if e.is_business_error() => {
                warn!(error = %err, "webhook payload rejected");
                Self::Unmappable
            }
            _ => {
                tracing::error!(error = %err, "webhook processing failed");
                Self::Internal
            }
        }
    }
}

/// Resolve and authenticate the store addressed by the request path.
async fn authenticated_store(
    state: &AppState,
    tenant_id: Uuid,
    provider: &str,
    action: WebhookAction,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Store, WebhookError> {
    let provider: Provider = provider.parse().map_err(|_| WebhookError::UnknownProvider)?;
    let store = state
        .stores()
        .find_active(TenantId::new(tenant_id), provider)
        .await
        .map_err(|_| WebhookError::Internal)?
        .ok_or(WebhookError::UnknownStore)?;

    let verified = state
        .service()
        .verify_webhook(&store, action, headers, body)
        .map_err(WebhookError::from)?;
    if !verified {
        warn!(
            tenant_id = %store.tenant_id,
            store_id = %store.id,
            provider = %store.provider,
            "rejected webhook with invalid signature"
        );
        return Err(WebhookError::Unauthenticated);
    }
    Ok(store)
}

async fn order_create(
    State(state): State<AppState>,
    Path((tenant_id, provider)): Path<(Uuid, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WebhookError> {
    let store = authenticated_store(
        &state,
        tenant_id,
        &provider,
        WebhookAction::OrderCreate,
        &headers,
        &body,
    )
    .await?;

    let payload: serde_json::Value =
        serde_json::from_slice(&body).map_err(|_| WebhookError::MalformedBody)?;
    let order_id = state.service().ingest_order_created(&store, &payload).await?;

    Ok((StatusCode::OK, Json(serde_json::json!({ "order_id": order_id }))).into_response())
}

async fn order_status(
    State(state): State<AppState>,
    Path((tenant_id, provider)): Path<(Uuid, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WebhookError> {
    let store = authenticated_store(
        &state,
        tenant_id,
        &provider,
        WebhookAction::OrderStatus,
        &headers,
        &body,
    )
    .await?;

    let payload: serde_json::Value =
        serde_json::from_slice(&body).map_err(|_| WebhookError::MalformedBody)?;
    let applied = state.service().ingest_order_status(&store, &payload).await?;

    Ok((StatusCode::OK, Json(serde_json::json!({ "applied": applied }))).into_response())
}

async fn health(State(state): State<AppState>) -> Response {
    if let Some(pool) = state.pool() {
        match sqlx::query("SELECT 1").fetch_one(pool).await {
            Ok(_) => (StatusCode::OK, "ok").into_response(),
            Err(e) => {
                tracing::error!(error = %e, "health check failed");
                (StatusCode::SERVICE_UNAVAILABLE, "database unavailable").into_response()
            }
        }
    } else {
        (StatusCode::OK, "ok").into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use secrecy::SecretString;
    use tower::ServiceExt;

    use storebridge_core::{OrderStatus, StoreId, SyncStatus};

    use crate::config::{EngineConfig, LimiterConfig};
    use crate::db::{MemoryCatalog, MemoryOrders, MemoryStores, OrderRepository};
    use crate::limiter::RequestExecutor;
    use crate::providers::AdapterRegistry;
    use crate::sync::{SyncLifecycle, SyncService};

    use super::*;

    struct TestApp {
        router: Router,
        orders: Arc<MemoryOrders>,
        store: Store,
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            database_url: SecretString::from("postgres://unused"),
            host: "127.0.0.1".parse().expect("ip"),
            port: 0,
            worker: crate::config::WorkerConfig::default(),
            limits: LimiterConfig::default(),
            shopify_api_version: "2026-01".to_string(),
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
        }
    }

    fn app() -> TestApp {
        let stores = Arc::new(MemoryStores::new());
        let catalog = Arc::new(MemoryCatalog::new());
        let orders = Arc::new(MemoryOrders::new());

        let store = Store {
            id: StoreId::generate(),
            tenant_id: TenantId::generate(),
            provider: Provider::EasyOrder,
            credentials: SecretString::from(
                r#"{"base_url":"https://api.easyorder.example","api_key":"k","webhook_token":"hook-token"}"#,
            ),
            active: true,
            sync_status: SyncStatus::Synced,
            last_sync_attempt_at: None,
            auto_sync: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        stores.insert(store.clone());

        let executor = Arc::new(RequestExecutor::new(LimiterConfig::default()));
        let adapters =
            AdapterRegistry::standard(&test_config(), reqwest::Client::new(), executor);
        let lifecycle = SyncLifecycle::new(stores.clone());
        let service = Arc::new(SyncService::new(
            stores.clone(),
            catalog,
            orders.clone(),
            adapters,
            lifecycle,
        ));

        let state = AppState::new(stores, service, None);
        TestApp {
            router: router(state),
            orders,
            store,
        }
    }

    fn order_created_body() -> String {
        serde_json::json!({
            "order": {
                "id": "EO-1",
                "customer": { "name": "Kim", "email": "kim@example.com" },
                "items": [
                    { "product_slug": "shirt", "sku": "S-1", "quantity": 1, "unit_price": "10.00" }
                ],
                "payment": { "method": "card", "status": "paid" },
                "shipping_fee": "1.00",
                "currency": "EUR"
            }
        })
        .to_string()
    }

    fn request(app: &TestApp, path_suffix: &str, token: Option<&str>, body: String) -> Request<Body> {
        let uri = format!(
            "/webhooks/{}/easyorder/orders/{path_suffix}",
            app.store.tenant_id
        );
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(token) = token {
            builder = builder.header("x-easyorder-token", token);
        }
        builder.body(Body::from(body)).expect("request")
    }

    #[tokio::test]
    async fn test_valid_webhook_creates_order() {
        let app = app();
        let response = app
            .router
            .clone()
            .oneshot(request(&app, "create", Some("hook-token"), order_created_body()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_token_is_rejected_with_no_side_effect() {
        let app = app();
        let response = app
            .router
            .clone()
            .oneshot(request(&app, "create", Some("wrong-token"), order_created_body()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // No order was written.
        assert!(
            app.orders
                .order(storebridge_core::OrderId::new(1))
                .await
                .expect("read")
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_missing_auth_header_is_rejected() {
        let app = app();
        let response = app
            .router
            .clone()
            .oneshot(request(&app, "create", None, order_created_body()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_provider_404s() {
        let app = app();
        let uri = format!("/webhooks/{}/bigcommerce/orders/create", app.store.tenant_id);
        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::from("{}"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_webhook_updates_order() {
        let app = app();
        app.orders.insert_order(
            app.store.tenant_id,
            app.store.id,
            Some("EO-1"),
            OrderStatus::Pending,
        );

        let body = serde_json::json!({ "order": { "id": "EO-1", "status": "shipped" } }).to_string();
        let response = app
            .router
            .clone()
            .oneshot(request(&app, "status", Some("hook-token"), body))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let order = app
            .orders
            .order(storebridge_core::OrderId::new(1))
            .await
            .expect("read")
            .expect("order");
        assert_eq!(order.status, OrderStatus::Shipped);
        assert_eq!(order.remote_status.as_deref(), Some("shipped"));
    }

    #[tokio::test]
    async fn test_unmapped_status_is_acknowledged_and_ignored() {
        let app = app();
        app.orders.insert_order(
            app.store.tenant_id,
            app.store.id,
            Some("EO-1"),
            OrderStatus::Pending,
        );

        let body =
            serde_json::json!({ "order": { "id": "EO-1", "status": "archived" } }).to_string();
        let response = app
            .router
            .clone()
            .oneshot(request(&app, "status", Some("hook-token"), body))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let order = app
            .orders
            .order(storebridge_core::OrderId::new(1))
            .await
            .expect("read")
            .expect("order");
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_health_without_database_is_ok() {
        let app = app();
        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
