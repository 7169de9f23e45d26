//! Hosted checkout sessions
//!
//! A checkout is a gateway-hosted payment page. The builder assembles items,
//! the charge shape (one-off, installments, or recurrent) and the redirect
//! URLs, validates the combination locally, then creates the session.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::client::AsaasClient;
use crate::config::BillingConfig;
use crate::customers::CustomerService;
use crate::error::{BillingError, BillingResult};
use crate::external_ref::ExternalRef;
use crate::types::{BillingType, ChargeType, Cycle, Split};

/// One line item on the hosted page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItem {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub quantity: u32,
    pub value: Decimal,
}

impl CheckoutItem {
    pub fn new(name: impl Into<String>, value: Decimal) -> Self {
        Self {
            name: name.into(),
            description: None,
            quantity: 1,
            value,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }
}

/// How the checkout charges the customer.
#[derive(Debug, Clone)]
enum ChargeShape {
    Detached,
    Installment {
        /// Fixed plan: this many installments of this value each.
        fixed: Option<(u32, Decimal)>,
        /// Customer chooses, up to this many.
        max_count: Option<u32>,
    },
    Recurrent {
        cycle: Option<Cycle>,
        next_due_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    },
}

/// A created session. `url` is where the customer must be sent.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub status: Option<String>,
    pub raw: Value,
    hosted_base: String,
}

impl CheckoutSession {
    pub fn url(&self) -> String {
        format!("{}/checkoutSession/show?id={}", self.hosted_base, self.id)
    }
}

pub struct CheckoutBuilder {
    service: CheckoutService,
    owner_id: Option<Uuid>,
    withhold_customer_id: bool,
    customer_data: Option<Value>,
    items: Vec<CheckoutItem>,
    billing_types: Vec<BillingType>,
    shape: ChargeShape,
    due_date_limit_days: Option<u32>,
    success_url: Option<String>,
    cancel_url: Option<String>,
    expired_url: Option<String>,
    expiration_minutes: Option<i64>,
    description: Option<String>,
    external_reference: Option<String>,
    metadata: Option<Value>,
    splits: Vec<Split>,
}

impl CheckoutBuilder {
    /// Bind the session to a known owner; their gateway customer is created
    /// on demand and the session carries a decodable reference back to them.
    pub fn owner(mut self, owner_id: Uuid) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn item(mut self, item: CheckoutItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn billing_types(mut self, billing_types: Vec<BillingType>) -> Self {
        self.billing_types = billing_types;
        self
    }

    /// Add one billing type to the page's allow-list.
    pub fn allow(mut self, billing_type: BillingType) -> Self {
        if !self.billing_types.contains(&billing_type) {
            self.billing_types.push(billing_type);
        }
        self
    }

    pub fn only_pix(self) -> Self {
        self.billing_types(vec![BillingType::Pix])
    }

    pub fn only_boleto(self) -> Self {
        self.billing_types(vec![BillingType::Boleto])
    }

    pub fn only_credit_card(self) -> Self {
        self.billing_types(vec![BillingType::CreditCard])
    }

    pub fn allow_all(self) -> Self {
        self.billing_types(vec![
            BillingType::Pix,
            BillingType::CreditCard,
            BillingType::Boleto,
        ])
    }

    /// Let the customer fill their data on the hosted page. A bound owner is
    /// kept for local bookkeeping and webhook correlation, but the payload
    /// omits their gateway customer id, so an incomplete profile (no address,
    /// no document) does not block the checkout. `customer_data` optionally
    /// prefills the page's form with raw gateway fields (`name`, `cpfCnpj`,
    /// ...).
    pub fn as_guest(mut self, customer_data: Option<Value>) -> Self {
        self.withhold_customer_id = true;
        self.customer_data = customer_data;
        self
    }

    /// Select the charge shape directly. Installment and recurrent details
    /// still come from [`installments`](Self::installments) and
    /// [`recurrent`](Self::recurrent); an incomplete shape fails validation.
    pub fn charge_type(mut self, charge_type: ChargeType) -> Self {
        self.shape = match charge_type {
            ChargeType::Detached => ChargeShape::Detached,
            ChargeType::Installment => ChargeShape::Installment {
                fixed: None,
                max_count: None,
            },
            ChargeType::Recurrent => ChargeShape::Recurrent {
                cycle: None,
                next_due_date: None,
                end_date: None,
            },
        };
        self
    }

    /// Pay in exactly `count` installments of `value_each`.
    pub fn installments(mut self, count: u32, value_each: Decimal) -> Self {
        self.shape = ChargeShape::Installment {
            fixed: Some((count, value_each)),
            max_count: None,
        };
        self
    }

    /// Let the customer pick the installment count, up to `count`.
    pub fn max_installments(mut self, count: u32) -> Self {
        self.shape = ChargeShape::Installment {
            fixed: None,
            max_count: Some(count),
        };
        self
    }

    /// Recurrent checkout: the page creates a subscription on payment.
    pub fn recurrent(mut self, cycle: Cycle) -> Self {
        self.shape = ChargeShape::Recurrent {
            cycle: Some(cycle),
            next_due_date: None,
            end_date: None,
        };
        self
    }

    /// Recurrent checkout whose first charge is due on `first_due_date`
    /// instead of today.
    pub fn recurrent_starting(mut self, cycle: Cycle, first_due_date: NaiveDate) -> Self {
        self.shape = ChargeShape::Recurrent {
            cycle: Some(cycle),
            next_due_date: Some(first_due_date),
            end_date: None,
        };
        self
    }

    pub fn recurrent_until(mut self, cycle: Cycle, end_date: NaiveDate) -> Self {
        self.shape = ChargeShape::Recurrent {
            cycle: Some(cycle),
            next_due_date: None,
            end_date: Some(end_date),
        };
        self
    }

    pub fn success_url(mut self, url: impl Into<String>) -> Self {
        self.success_url = Some(url.into());
        self
    }

    pub fn cancel_url(mut self, url: impl Into<String>) -> Self {
        self.cancel_url = Some(url.into());
        self
    }

    pub fn expired_url(mut self, url: impl Into<String>) -> Self {
        self.expired_url = Some(url.into());
        self
    }

    pub fn expires_in_minutes(mut self, minutes: i64) -> Self {
        self.expiration_minutes = Some(minutes);
        self
    }

    /// Days a generated boleto stays payable after the session is paid.
    pub fn due_date_limit_days(mut self, days: u32) -> Self {
        self.due_date_limit_days = Some(days);
        self
    }

    /// Free-text description shown on the hosted page.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Override the reference the gateway echoes back on webhook events.
    /// Bound owners get a decodable owner reference by default.
    pub fn external_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn split(mut self, split: Split) -> Self {
        self.splits.push(split);
        self
    }

    fn effective_billing_types(&self) -> Vec<BillingType> {
        if !self.billing_types.is_empty() {
            return self.billing_types.clone();
        }
        let configured = &self.service.config.checkout_billing_types;
        if !configured.is_empty() {
            return configured.clone();
        }
        // Nothing chosen anywhere: the page offers every method.
        vec![BillingType::Pix, BillingType::CreditCard, BillingType::Boleto]
    }

    fn validate(&self, billing_types: &[BillingType]) -> BillingResult<()> {
        if self.items.is_empty() {
            return Err(BillingError::Validation(
                "checkout requires at least one item".to_string(),
            ));
        }
        for item in &self.items {
            if item.value <= Decimal::ZERO {
                return Err(BillingError::Validation(format!(
                    "checkout item '{}' must have a positive value",
                    item.name
                )));
            }
            if item.quantity == 0 {
                return Err(BillingError::Validation(format!(
                    "checkout item '{}' must have a positive quantity",
                    item.name
                )));
            }
        }
        match &self.shape {
            ChargeShape::Installment { fixed, max_count } => {
                let count = fixed.map(|(count, _)| count).or(*max_count).unwrap_or(0);
                if count < 2 {
                    return Err(BillingError::Validation(
                        "installment checkouts need at least two installments".to_string(),
                    ));
                }
                if let Some((_, value_each)) = fixed {
                    if *value_each <= Decimal::ZERO {
                        return Err(BillingError::Validation(
                            "installment value must be positive".to_string(),
                        ));
                    }
                }
                if !billing_types.contains(&BillingType::CreditCard) {
                    return Err(BillingError::Validation(
                        "installment checkouts require the credit card billing type".to_string(),
                    ));
                }
            }
            ChargeShape::Recurrent { cycle, .. } => {
                if cycle.is_none() {
                    return Err(BillingError::Validation(
                        "recurrent checkouts require a cycle".to_string(),
                    ));
                }
            }
            ChargeShape::Detached => {}
        }
        Ok(())
    }

    /// Validate and assemble the outbound payload. Split from
    /// [`create`](Self::create) so the assembly rules stay inspectable.
    async fn payload(&self) -> BillingResult<(ChargeType, Value)> {
        let billing_types = self.effective_billing_types();
        self.validate(&billing_types)?;

        let charge_type = match &self.shape {
            ChargeShape::Detached => ChargeType::Detached,
            ChargeShape::Installment { .. } => ChargeType::Installment,
            ChargeShape::Recurrent { .. } => ChargeType::Recurrent,
        };
        let mut payload = json!({
            "billingTypes": billing_types,
            "chargeTypes": [charge_type],
            "items": self.items,
        });
        let minutes = self
            .expiration_minutes
            .or(self.service.config.checkout_expiration_minutes);
        let callback = json!({
            "successUrl": self
                .success_url
                .clone()
                .or_else(|| self.service.config.checkout_success_url.clone()),
            "cancelUrl": self
                .cancel_url
                .clone()
                .or_else(|| self.service.config.checkout_cancel_url.clone()),
            "expiredUrl": self
                .expired_url
                .clone()
                .or_else(|| self.service.config.checkout_expired_url.clone()),
        });
        if let Some(map) = payload.as_object_mut() {
            map.insert("callback".to_string(), callback);
            if let Some(minutes) = minutes {
                map.insert("minutesToExpire".to_string(), json!(minutes));
            }
            match &self.shape {
                ChargeShape::Installment { fixed, max_count } => {
                    let mut installment = json!({});
                    if let Some(obj) = installment.as_object_mut() {
                        if let Some((count, value_each)) = fixed {
                            obj.insert("installmentCount".to_string(), json!(count));
                            obj.insert("installmentValue".to_string(), json!(value_each));
                        }
                        if let Some(count) = max_count {
                            obj.insert("maxInstallmentCount".to_string(), json!(count));
                        }
                    }
                    map.insert("installment".to_string(), installment);
                }
                ChargeShape::Recurrent {
                    cycle,
                    next_due_date,
                    end_date,
                } => {
                    let first_due = next_due_date.unwrap_or_else(|| Utc::now().date_naive());
                    let mut subscription = json!({
                        "cycle": cycle,
                        "nextDueDate": first_due,
                    });
                    if let Some(obj) = subscription.as_object_mut() {
                        if let Some(date) = end_date {
                            obj.insert("endDate".to_string(), json!(date));
                        }
                    }
                    map.insert("subscription".to_string(), subscription);
                }
                ChargeShape::Detached => {}
            }
            if let Some(days) = self.due_date_limit_days {
                map.insert("dueDateLimitDays".to_string(), json!(days));
            }
            if let Some(description) = &self.description {
                map.insert("description".to_string(), json!(description));
            }
            if let Some(metadata) = &self.metadata {
                map.insert("metadata".to_string(), metadata.clone());
            }
            if !self.splits.is_empty() {
                map.insert("splits".to_string(), json!(self.splits));
            }
            if let Some(owner_id) = self.owner_id {
                if self.withhold_customer_id {
                    // The page collects the customer's data itself; the local
                    // owner link survives through the external reference.
                    if let Some(customer_data) = &self.customer_data {
                        map.insert("customerData".to_string(), customer_data.clone());
                    }
                } else {
                    let customer_id = self
                        .service
                        .customers
                        .ensure_gateway_customer(owner_id)
                        .await?;
                    map.insert("customer".to_string(), json!(customer_id));
                }
            } else if let Some(customer_data) = &self.customer_data {
                map.insert("customerData".to_string(), customer_data.clone());
            }
            let reference = self.external_reference.clone().or_else(|| {
                self.owner_id
                    .map(|owner_id| ExternalRef::for_owner(owner_id).encode())
            });
            if let Some(reference) = reference {
                map.insert("externalReference".to_string(), json!(reference));
            }
        }
        Ok((charge_type, payload))
    }

    /// Validate, create the session at the gateway, and return it.
    pub async fn create(self) -> BillingResult<CheckoutSession> {
        let service = self.service.clone();
        let (charge_type, payload) = self.payload().await?;
        let raw = service.client.create_checkout(&payload).await?;
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BillingError::Storage("checkout response without id".into()))?;
        let status = raw
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string);

        tracing::info!(checkout_id = %id, charge_type = ?charge_type, "Checkout session created");
        Ok(CheckoutSession {
            id,
            status,
            raw,
            hosted_base: service.client.config().hosted_base().to_string(),
        })
    }
}

#[derive(Clone)]
pub struct CheckoutService {
    client: AsaasClient,
    customers: CustomerService,
    config: std::sync::Arc<BillingConfig>,
}

impl CheckoutService {
    pub fn new(
        client: AsaasClient,
        store: std::sync::Arc<dyn crate::store::BillingStore>,
        config: std::sync::Arc<BillingConfig>,
    ) -> Self {
        let customers = CustomerService::new(client.clone(), store);
        Self {
            client,
            customers,
            config,
        }
    }

    pub fn build(&self) -> CheckoutBuilder {
        CheckoutBuilder {
            service: self.clone(),
            owner_id: None,
            withhold_customer_id: false,
            customer_data: None,
            items: Vec::new(),
            billing_types: Vec::new(),
            shape: ChargeShape::Detached,
            due_date_limit_days: None,
            success_url: None,
            cancel_url: None,
            expired_url: None,
            expiration_minutes: None,
            description: None,
            external_reference: None,
            metadata: None,
            splits: Vec::new(),
        }
    }

    pub async fn cancel(&self, checkout_id: &str) -> BillingResult<Value> {
        self.client.cancel_checkout(checkout_id).await
    }
}
