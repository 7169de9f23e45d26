//! Billing defaults consumed by the builders
//!
//! Explicit builder calls always win; these values are fallbacks only. The
//! config is assembled once at startup and shared read-only (no mutable
//! process-wide state).

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::types::{BillingType, Cycle};

/// Fallback values for subscription and checkout construction.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Default payment method for new subscriptions.
    pub default_billing_type: BillingType,
    /// Default billing period for new subscriptions.
    pub default_cycle: Cycle,
    /// Plan name -> price lookup used when a builder sets no explicit price.
    pub plans: HashMap<String, Decimal>,
    /// Checkout callback fallbacks.
    pub checkout_success_url: Option<String>,
    pub checkout_cancel_url: Option<String>,
    pub checkout_expired_url: Option<String>,
    /// Checkout session lifetime fallback.
    pub checkout_expiration_minutes: Option<i64>,
    /// Billing types offered by checkout sessions that set no allow-list.
    pub checkout_billing_types: Vec<BillingType>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_billing_type: BillingType::Undefined,
            default_cycle: Cycle::Monthly,
            plans: HashMap::new(),
            checkout_success_url: None,
            checkout_cancel_url: None,
            checkout_expired_url: None,
            checkout_expiration_minutes: None,
            checkout_billing_types: Vec::new(),
        }
    }
}

impl BillingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(mut self, name: impl Into<String>, price: Decimal) -> Self {
        self.plans.insert(name.into(), price);
        self
    }

    pub fn with_default_billing_type(mut self, billing_type: BillingType) -> Self {
        self.default_billing_type = billing_type;
        self
    }

    pub fn with_default_cycle(mut self, cycle: Cycle) -> Self {
        self.default_cycle = cycle;
        self
    }

    pub fn with_checkout_urls(
        mut self,
        success: impl Into<String>,
        cancel: impl Into<String>,
        expired: impl Into<String>,
    ) -> Self {
        self.checkout_success_url = Some(success.into());
        self.checkout_cancel_url = Some(cancel.into());
        self.checkout_expired_url = Some(expired.into());
        self
    }

    pub fn with_checkout_expiration_minutes(mut self, minutes: i64) -> Self {
        self.checkout_expiration_minutes = Some(minutes);
        self
    }

    pub fn with_checkout_billing_types(mut self, types: Vec<BillingType>) -> Self {
        self.checkout_billing_types = types;
        self
    }

    /// Price for a logical plan name, if the table knows it.
    pub fn plan_price(&self, plan: &str) -> Option<Decimal> {
        self.plans.get(plan).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_table_lookup() {
        let config = BillingConfig::new()
            .with_plan("pro", Decimal::new(9990, 2))
            .with_plan("basic", Decimal::new(1990, 2));
        assert_eq!(config.plan_price("pro"), Some(Decimal::new(9990, 2)));
        assert_eq!(config.plan_price("enterprise"), None);
    }
}
