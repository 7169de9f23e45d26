//! Asaas REST API client
//!
//! A pure protocol adapter: one HTTP call per operation, a typed error on any
//! non-2xx status, no retries and no validation of its own. Resource wrappers
//! are uniform and return the decoded JSON body as-is.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{BillingError, BillingResult, GatewayErrorDetail};

const PRODUCTION_API_BASE: &str = "https://api.asaas.com/v3";
const SANDBOX_API_BASE: &str = "https://api-sandbox.asaas.com/v3";
const PRODUCTION_HOSTED_BASE: &str = "https://www.asaas.com";
const SANDBOX_HOSTED_BASE: &str = "https://sandbox.asaas.com";

/// Gateway connection settings. Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct AsaasConfig {
    pub api_key: String,
    pub sandbox: bool,
    /// Overrides the API base URL; used to point the client at a local mock.
    pub base_url: Option<String>,
}

impl AsaasConfig {
    pub fn new(api_key: impl Into<String>, sandbox: bool) -> Self {
        Self {
            api_key: api_key.into(),
            sandbox,
            base_url: None,
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        let api_key = std::env::var("ASAAS_API_KEY")
            .map_err(|_| BillingError::Config("ASAAS_API_KEY not set".to_string()))?;
        let sandbox = std::env::var("ASAAS_SANDBOX")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);
        Ok(Self::new(api_key, sandbox))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// REST API base, selected by the sandbox flag unless overridden.
    pub fn api_base(&self) -> &str {
        match &self.base_url {
            Some(base) => base,
            None if self.sandbox => SANDBOX_API_BASE,
            None => PRODUCTION_API_BASE,
        }
    }

    /// Base for hosted pages (checkout session show URL).
    pub fn hosted_base(&self) -> &str {
        if self.sandbox {
            SANDBOX_HOSTED_BASE
        } else {
            PRODUCTION_HOSTED_BASE
        }
    }
}

/// Pagination envelope returned by list operations, passed through unmodified.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub total_count: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub has_more: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    #[serde(default)]
    errors: Vec<GatewayErrorDetail>,
}

/// HTTP client for the gateway. Cheap to clone; holds no mutable state.
#[derive(Clone)]
pub struct AsaasClient {
    http: reqwest::Client,
    config: Arc<AsaasConfig>,
}

impl AsaasClient {
    pub fn new(config: AsaasConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &AsaasConfig {
        &self.config
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, String)],
    ) -> BillingResult<Value> {
        let url = format!("{}{}", self.config.api_base(), path);
        let mut req = self
            .http
            .request(method, &url)
            .header("access_token", &self.config.api_key);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            // Some DELETE endpoints answer an empty body.
            let text = response.text().await?;
            if text.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|e| {
                BillingError::Storage(format!("undecodable gateway response: {e}"))
            });
        }

        Err(Self::decode_error(status, response.text().await.unwrap_or_default()))
    }

    fn decode_error(status: StatusCode, body: String) -> BillingError {
        let parsed: GatewayErrorBody =
            serde_json::from_str(&body).unwrap_or(GatewayErrorBody { errors: Vec::new() });
        let message = parsed
            .errors
            .first()
            .and_then(|e| e.description.clone())
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("gateway request failed")
                    .to_string()
            });
        let error_code = parsed.errors.first().and_then(|e| e.code.clone());
        tracing::warn!(
            status = status.as_u16(),
            message = %message,
            error_code = ?error_code,
            "Gateway request failed"
        );
        BillingError::GatewayApi {
            status: status.as_u16(),
            message,
            errors: parsed.errors,
            error_code,
        }
    }

    pub async fn get(&self, path: &str) -> BillingResult<Value> {
        self.request(Method::GET, path, None, &[]).await
    }

    pub async fn list(&self, path: &str, filters: &[(&str, String)]) -> BillingResult<Value> {
        self.request(Method::GET, path, None, filters).await
    }

    pub async fn list_page<T: DeserializeOwned>(
        &self,
        path: &str,
        filters: &[(&str, String)],
    ) -> BillingResult<Page<T>> {
        let value = self.list(path, filters).await?;
        serde_json::from_value(value)
            .map_err(|e| BillingError::Storage(format!("undecodable page envelope: {e}")))
    }

    pub async fn post(&self, path: &str, body: &Value) -> BillingResult<Value> {
        self.request(Method::POST, path, Some(body), &[]).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> BillingResult<Value> {
        self.request(Method::PUT, path, Some(body), &[]).await
    }

    pub async fn delete(&self, path: &str) -> BillingResult<Value> {
        self.request(Method::DELETE, path, None, &[]).await
    }

    // Customers

    pub async fn create_customer(&self, payload: &Value) -> BillingResult<Value> {
        self.post("/customers", payload).await
    }

    pub async fn find_customer(&self, id: &str) -> BillingResult<Value> {
        self.get(&format!("/customers/{id}")).await
    }

    pub async fn update_customer(&self, id: &str, payload: &Value) -> BillingResult<Value> {
        self.put(&format!("/customers/{id}"), payload).await
    }

    pub async fn delete_customer(&self, id: &str) -> BillingResult<Value> {
        self.delete(&format!("/customers/{id}")).await
    }

    pub async fn list_customers(&self, filters: &[(&str, String)]) -> BillingResult<Value> {
        self.list("/customers", filters).await
    }

    // Subscriptions

    pub async fn create_subscription(&self, payload: &Value) -> BillingResult<Value> {
        self.post("/subscriptions", payload).await
    }

    pub async fn find_subscription(&self, id: &str) -> BillingResult<Value> {
        self.get(&format!("/subscriptions/{id}")).await
    }

    pub async fn update_subscription(&self, id: &str, payload: &Value) -> BillingResult<Value> {
        self.put(&format!("/subscriptions/{id}"), payload).await
    }

    pub async fn delete_subscription(&self, id: &str) -> BillingResult<Value> {
        self.delete(&format!("/subscriptions/{id}")).await
    }

    pub async fn list_subscriptions(&self, filters: &[(&str, String)]) -> BillingResult<Value> {
        self.list("/subscriptions", filters).await
    }

    pub async fn subscription_payments(&self, id: &str) -> BillingResult<Value> {
        self.get(&format!("/subscriptions/{id}/payments")).await
    }

    pub async fn update_subscription_credit_card(
        &self,
        id: &str,
        payload: &Value,
    ) -> BillingResult<Value> {
        self.put(&format!("/subscriptions/{id}/creditCard"), payload)
            .await
    }

    // Payments

    pub async fn create_payment(&self, payload: &Value) -> BillingResult<Value> {
        self.post("/payments", payload).await
    }

    pub async fn find_payment(&self, id: &str) -> BillingResult<Value> {
        self.get(&format!("/payments/{id}")).await
    }

    pub async fn update_payment(&self, id: &str, payload: &Value) -> BillingResult<Value> {
        self.put(&format!("/payments/{id}"), payload).await
    }

    pub async fn delete_payment(&self, id: &str) -> BillingResult<Value> {
        self.delete(&format!("/payments/{id}")).await
    }

    pub async fn restore_payment(&self, id: &str) -> BillingResult<Value> {
        self.post(&format!("/payments/{id}/restore"), &Value::Null)
            .await
    }

    pub async fn refund_payment(&self, id: &str, payload: &Value) -> BillingResult<Value> {
        self.post(&format!("/payments/{id}/refund"), payload).await
    }

    pub async fn payment_pix_qr_code(&self, id: &str) -> BillingResult<Value> {
        self.get(&format!("/payments/{id}/pixQrCode")).await
    }

    pub async fn payment_identification_field(&self, id: &str) -> BillingResult<Value> {
        self.get(&format!("/payments/{id}/identificationField"))
            .await
    }

    pub async fn list_payments(&self, filters: &[(&str, String)]) -> BillingResult<Value> {
        self.list("/payments", filters).await
    }

    // Checkouts

    pub async fn create_checkout(&self, payload: &Value) -> BillingResult<Value> {
        self.post("/checkouts", payload).await
    }

    pub async fn cancel_checkout(&self, id: &str) -> BillingResult<Value> {
        self.post(&format!("/checkouts/{id}/cancel"), &Value::Null)
            .await
    }

    // Fiscal invoices

    pub async fn schedule_invoice(&self, payload: &Value) -> BillingResult<Value> {
        self.post("/invoices", payload).await
    }

    pub async fn find_invoice(&self, id: &str) -> BillingResult<Value> {
        self.get(&format!("/invoices/{id}")).await
    }

    pub async fn update_invoice(&self, id: &str, payload: &Value) -> BillingResult<Value> {
        self.put(&format!("/invoices/{id}"), payload).await
    }

    pub async fn authorize_invoice(&self, id: &str) -> BillingResult<Value> {
        self.post(&format!("/invoices/{id}/authorize"), &Value::Null)
            .await
    }

    pub async fn cancel_invoice(&self, id: &str) -> BillingResult<Value> {
        self.post(&format!("/invoices/{id}/cancel"), &Value::Null)
            .await
    }

    pub async fn list_invoices(&self, filters: &[(&str, String)]) -> BillingResult<Value> {
        self.list("/invoices", filters).await
    }

    // Webhook configuration management

    pub async fn create_webhook_config(&self, payload: &Value) -> BillingResult<Value> {
        self.post("/webhooks", payload).await
    }

    pub async fn list_webhook_configs(&self) -> BillingResult<Value> {
        self.list("/webhooks", &[]).await
    }

    pub async fn update_webhook_config(&self, id: &str, payload: &Value) -> BillingResult<Value> {
        self.put(&format!("/webhooks/{id}"), payload).await
    }

    pub async fn delete_webhook_config(&self, id: &str) -> BillingResult<Value> {
        self.delete(&format!("/webhooks/{id}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_follows_sandbox_flag() {
        let sandbox = AsaasConfig::new("key", true);
        assert_eq!(sandbox.api_base(), SANDBOX_API_BASE);
        assert_eq!(sandbox.hosted_base(), SANDBOX_HOSTED_BASE);

        let production = AsaasConfig::new("key", false);
        assert_eq!(production.api_base(), PRODUCTION_API_BASE);
        assert_eq!(production.hosted_base(), PRODUCTION_HOSTED_BASE);
    }

    #[tokio::test]
    async fn non_2xx_becomes_typed_gateway_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/customers")
            .with_status(400)
            .with_body(
                r#"{"errors":[{"code":"invalid_cpfCnpj","description":"CPF/CNPJ invalido"}]}"#,
            )
            .create_async()
            .await;

        let client = AsaasClient::new(AsaasConfig::new("key", true).with_base_url(server.url()));
        let err = client
            .create_customer(&serde_json::json!({"name": "x"}))
            .await
            .unwrap_err();

        match err {
            BillingError::GatewayApi {
                status,
                message,
                errors,
                error_code,
            } => {
                assert_eq!(status, 400);
                assert_eq!(message, "CPF/CNPJ invalido");
                assert_eq!(errors.len(), 1);
                assert_eq!(error_code.as_deref(), Some("invalid_cpfCnpj"));
            }
            other => panic!("expected GatewayApi error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_returns_pagination_envelope_unmodified() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/payments")
            .match_query(mockito::Matcher::UrlEncoded(
                "customer".into(),
                "cus_1".into(),
            ))
            .with_status(200)
            .with_body(
                r#"{"data":[{"id":"pay_1"}],"totalCount":1,"limit":10,"offset":0,"hasMore":false}"#,
            )
            .create_async()
            .await;

        let client = AsaasClient::new(AsaasConfig::new("key", true).with_base_url(server.url()));
        let page: Page<Value> = client
            .list_page("/payments", &[("customer", "cus_1".to_string())])
            .await
            .unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.total_count, Some(1));
        assert_eq!(page.has_more, Some(false));
    }
}
