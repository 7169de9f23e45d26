//! Application state

use std::sync::Arc;

use asaas_billing::BillingService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingService>,
    /// Expected value of the `asaas-access-token` webhook header; `None`
    /// disables the check.
    pub webhook_token: Option<String>,
}
