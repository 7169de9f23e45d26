//! HTTP routes
//!
//! The webhook endpoint maps the handler's reply onto the status codes the
//! gateway keys its retry behavior on: 2xx stops redelivery, 4xx marks the
//! delivery failed. Processing failures inside well-formed events still
//! answer 200; see the billing crate's webhook module for the policy.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use asaas_billing::WebhookReply;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/asaas", post(asaas_webhook))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn asaas_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(expected) = &state.webhook_token {
        let presented = headers
            .get("asaas-access-token")
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            tracing::warn!("Webhook delivery with missing or wrong access token");
            return (StatusCode::FORBIDDEN, "Invalid access token").into_response();
        }
    }

    match state.billing.handle_webhook(&body).await {
        WebhookReply::Processed { event } => {
            (StatusCode::OK, Json(json!({ "received": event }))).into_response()
        }
        WebhookReply::Ignored { event } => {
            (StatusCode::OK, Json(json!({ "ignored": event }))).into_response()
        }
        WebhookReply::Malformed(message) => (StatusCode::BAD_REQUEST, message).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asaas_billing::{AsaasConfig, BillingConfig, BillingService};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    fn app(webhook_token: Option<&str>) -> Router {
        let billing = BillingService::new_in_memory(
            AsaasConfig::new("test_key", true),
            BillingConfig::new(),
        );
        create_router(AppState {
            billing: Arc::new(billing),
            webhook_token: webhook_token.map(str::to_string),
        })
    }

    fn webhook_request(token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhooks/asaas")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("asaas-access-token", token);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let response = app(None)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_webhook_token_is_forbidden() {
        let response = app(Some("secret"))
            .oneshot(webhook_request(Some("not-the-secret"), "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_event_type_is_a_bad_request() {
        let response = app(Some("secret"))
            .oneshot(webhook_request(Some("secret"), r#"{"payment":{"id":"pay_1"}}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"Missing event type");
    }

    #[tokio::test]
    async fn unknown_events_still_acknowledge_with_200() {
        let response = app(None)
            .oneshot(webhook_request(
                None,
                r#"{"event":"TRANSFER_CREATED","transfer":{}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
