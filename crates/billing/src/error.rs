//! Billing error taxonomy
//!
//! Gateway API failures are always surfaced to the caller; webhook payload
//! problems are distinguished from other processing failures because the
//! transport boundary answers 400 for the former and 200 for the latter.

use uuid::Uuid;

/// A single error entry as reported by the gateway in a non-2xx body.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct GatewayErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Non-2xx response from the gateway REST API.
    #[error("gateway error ({status}): {message}")]
    GatewayApi {
        status: u16,
        /// First error description from the response body, if present.
        message: String,
        /// Raw list of gateway-reported errors.
        errors: Vec<GatewayErrorDetail>,
        /// First gateway error code, if present.
        error_code: Option<String>,
    },

    /// Builder pre-flight validation failure; raised before any network call.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or unresolvable configuration (e.g. no price for a plan).
    #[error("configuration error: {0}")]
    Config(String),

    /// Explicit gateway-customer creation for an owner that already has one.
    #[error("owner {0} already has a gateway customer")]
    CustomerAlreadyExists(Uuid),

    /// Operation on a record that has no gateway id yet.
    #[error("{0} has no gateway id")]
    MissingGatewayId(&'static str),

    #[error("owner {0} not found")]
    OwnerNotFound(Uuid),

    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    /// Malformed inbound webhook payload; the transport layer answers 400.
    #[error("{0}")]
    MalformedWebhook(String),

    /// Persistence failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type BillingResult<T> = Result<T, BillingError>;

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Storage(e.to_string())
    }
}

impl BillingError {
    /// First gateway error description, when this is a gateway failure.
    pub fn gateway_message(&self) -> Option<&str> {
        match self {
            BillingError::GatewayApi { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, BillingError::Validation(_))
    }
}
