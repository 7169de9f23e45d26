//! Recurring subscriptions
//!
//! Mirrors gateway subscriptions locally and layers the lifecycle the
//! application reasons about on top: trials, cancellation with a paid-through
//! grace period, and resumption while that grace period lasts.
//!
//! Cancelling never deletes the gateway subscription. It flips the gateway
//! status to `INACTIVE` so the history and the ability to resume survive.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::client::AsaasClient;
use crate::config::BillingConfig;
use crate::customers::CustomerService;
use crate::error::{BillingError, BillingResult};
use crate::external_ref::ExternalRef;
use crate::payments::GatewayPayment;
use crate::store::{BillingStore, SubscriptionStore};
use crate::types::{
    BillingType, CreditCard, CreditCardHolderInfo, Cycle, Discount, Fine, Interest, Split,
    SubscriptionStatus,
};

/// Default type tag for owners with a single subscription.
pub const DEFAULT_TAG: &str = "default";

#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Distinguishes multiple subscriptions held by one owner.
    pub tag: String,
    /// Application plan key, resolved against `BillingConfig::plans`.
    pub plan: String,
    pub gateway_id: String,
    pub status: SubscriptionStatus,
    pub billing_type: BillingType,
    pub cycle: Cycle,
    pub value: Decimal,
    pub next_due_date: Option<NaiveDate>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    /// Set on cancellation: the moment access actually lapses.
    pub ends_at: Option<DateTime<Utc>>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    pub fn new(owner_id: Uuid, gateway_id: impl Into<String>, plan: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            tag: DEFAULT_TAG.to_string(),
            plan: plan.into(),
            gateway_id: gateway_id.into(),
            status: SubscriptionStatus::Active,
            billing_type: BillingType::Undefined,
            cycle: Cycle::Monthly,
            value: Decimal::ZERO,
            next_due_date: None,
            trial_ends_at: None,
            ends_at: None,
            metadata: Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn on_trial(&self) -> bool {
        self.trial_ends_at.is_some_and(|t| t > Utc::now())
    }

    /// Cancelled, but the already-paid period has not run out yet.
    pub fn on_grace_period(&self) -> bool {
        self.ends_at.is_some_and(|t| t > Utc::now())
    }

    /// A cancellation was requested, whether or not it has taken effect.
    pub fn canceled(&self) -> bool {
        self.ends_at.is_some()
    }

    /// Cancelled and past the grace period.
    pub fn ended(&self) -> bool {
        self.canceled() && !self.on_grace_period()
    }

    /// Active at the gateway and not cancelled locally.
    pub fn recurring(&self) -> bool {
        self.status == SubscriptionStatus::Active && !self.on_trial() && self.ends_at.is_none()
    }

    /// Grants access: recurring, trialing, or riding out a grace period.
    pub fn valid(&self) -> bool {
        self.recurring() || self.on_trial() || self.on_grace_period()
    }

    pub fn is_plan(&self, plan: &str) -> bool {
        self.plan == plan
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Subscription object from gateway responses and webhook payloads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySubscription {
    pub id: Option<String>,
    pub customer: Option<String>,
    pub status: Option<SubscriptionStatus>,
    pub billing_type: Option<BillingType>,
    pub cycle: Option<Cycle>,
    pub value: Option<Decimal>,
    pub next_due_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub external_reference: Option<String>,
    pub deleted: Option<bool>,
}

impl GatewaySubscription {
    pub fn apply_to(&self, record: &mut SubscriptionRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(billing_type) = self.billing_type {
            record.billing_type = billing_type;
        }
        if let Some(cycle) = self.cycle {
            record.cycle = cycle;
        }
        if let Some(value) = self.value {
            record.value = value;
        }
        if self.next_due_date.is_some() {
            record.next_due_date = self.next_due_date;
        }
        record.touch();
    }
}

/// Builds and creates one subscription. Obtained from
/// [`SubscriptionService::build`].
pub struct SubscriptionBuilder {
    service: SubscriptionService,
    owner_id: Uuid,
    plan: String,
    tag: String,
    price: Option<Decimal>,
    billing_type: Option<BillingType>,
    cycle: Option<Cycle>,
    trial_days: Option<i64>,
    next_due_date: Option<NaiveDate>,
    max_payments: Option<u32>,
    end_date: Option<NaiveDate>,
    description: Option<String>,
    discount: Option<Discount>,
    interest: Option<Interest>,
    fine: Option<Fine>,
    splits: Vec<Split>,
    credit_card: Option<(CreditCard, CreditCardHolderInfo)>,
    card_token: Option<String>,
    metadata: Value,
}

impl SubscriptionBuilder {
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Explicit price, overriding the configured plan table.
    pub fn price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn billing_type(mut self, billing_type: BillingType) -> Self {
        self.billing_type = Some(billing_type);
        self
    }

    pub fn with_pix(self) -> Self {
        self.billing_type(BillingType::Pix)
    }

    pub fn with_boleto(self) -> Self {
        self.billing_type(BillingType::Boleto)
    }

    /// Pay by card, passing the raw card data straight through to the
    /// gateway. Prefer [`with_card_token`](Self::with_card_token) when a
    /// token from a previous charge is available.
    pub fn with_credit_card(mut self, card: CreditCard, holder: CreditCardHolderInfo) -> Self {
        self.credit_card = Some((card, holder));
        self.billing_type(BillingType::CreditCard)
    }

    pub fn with_card_token(mut self, token: impl Into<String>) -> Self {
        self.card_token = Some(token.into());
        self.billing_type(BillingType::CreditCard)
    }

    pub fn cycle(mut self, cycle: Cycle) -> Self {
        self.cycle = Some(cycle);
        self
    }

    pub fn monthly(self) -> Self {
        self.cycle(Cycle::Monthly)
    }

    pub fn yearly(self) -> Self {
        self.cycle(Cycle::Yearly)
    }

    /// Trial: the first charge is pushed out past the trial window.
    pub fn trial_days(mut self, days: i64) -> Self {
        self.trial_days = Some(days);
        self
    }

    pub fn next_due_date(mut self, date: NaiveDate) -> Self {
        self.next_due_date = Some(date);
        self
    }

    /// Stop charging after this many successful payments.
    pub fn max_payments(mut self, count: u32) -> Self {
        self.max_payments = Some(count);
        self
    }

    /// Stop charging past this date.
    pub fn end_date(mut self, date: NaiveDate) -> Self {
        self.end_date = Some(date);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn discount(mut self, discount: Discount) -> Self {
        self.discount = Some(discount);
        self
    }

    pub fn interest(mut self, interest: Interest) -> Self {
        self.interest = Some(interest);
        self
    }

    pub fn fine(mut self, fine: Fine) -> Self {
        self.fine = Some(fine);
        self
    }

    pub fn split(mut self, split: Split) -> Self {
        self.splits.push(split);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Create the subscription at the gateway and persist the record.
    ///
    /// The price is resolved before any gateway call, so an unknown plan
    /// fails without creating a customer as a side effect.
    pub async fn create(self) -> BillingResult<SubscriptionRecord> {
        let service = self.service.clone();
        let value = match self.price {
            Some(price) => price,
            None => service.config.plan_price(&self.plan).ok_or_else(|| {
                BillingError::Config(format!("no configured price for plan '{}'", self.plan))
            })?,
        };
        if value <= Decimal::ZERO {
            return Err(BillingError::Validation(
                "subscription price must be positive".to_string(),
            ));
        }
        if let Some(existing) = service
            .store
            .find_subscription_for_owner(self.owner_id, &self.tag)
            .await?
        {
            if existing.valid() {
                return Err(BillingError::Validation(format!(
                    "owner already holds a valid '{}' subscription",
                    self.tag
                )));
            }
        }

        let customer_id = service.customers.ensure_gateway_customer(self.owner_id).await?;

        let trial_ends_at = self.trial_days.map(|days| Utc::now() + Duration::days(days));
        let next_due_date = match (trial_ends_at, self.next_due_date) {
            // A trial wins: the first charge lands when the trial lapses.
            (Some(trial_end), _) => trial_end.date_naive(),
            (None, Some(date)) => date,
            (None, None) => Utc::now().date_naive(),
        };
        let billing_type = self
            .billing_type
            .unwrap_or(service.config.default_billing_type);
        let cycle = self.cycle.unwrap_or(service.config.default_cycle);

        let mut payload = json!({
            "customer": customer_id,
            "billingType": billing_type,
            "cycle": cycle,
            "value": value,
            "nextDueDate": next_due_date,
            "externalReference":
                ExternalRef::for_subscription(self.owner_id, &self.tag, &self.plan).encode(),
        });
        if let Some(map) = payload.as_object_mut() {
            if let Some(description) = &self.description {
                map.insert("description".to_string(), json!(description));
            }
            if let Some(discount) = &self.discount {
                map.insert("discount".to_string(), json!(discount));
            }
            if let Some(interest) = &self.interest {
                map.insert("interest".to_string(), json!(interest));
            }
            if let Some(fine) = &self.fine {
                map.insert("fine".to_string(), json!(fine));
            }
            if !self.splits.is_empty() {
                map.insert("split".to_string(), json!(self.splits));
            }
            if let Some(count) = self.max_payments {
                map.insert("maxPayments".to_string(), json!(count));
            }
            if let Some(date) = self.end_date {
                map.insert("endDate".to_string(), json!(date));
            }
            if let Some((card, holder)) = &self.credit_card {
                map.insert("creditCard".to_string(), json!(card));
                map.insert("creditCardHolderInfo".to_string(), json!(holder));
            }
            if let Some(token) = &self.card_token {
                map.insert("creditCardToken".to_string(), json!(token));
            }
        }

        let response = service.client.create_subscription(&payload).await?;
        let gateway: GatewaySubscription = serde_json::from_value(response)
            .map_err(|e| BillingError::Storage(format!("undecodable subscription response: {e}")))?;
        let gateway_id = gateway.id.clone().ok_or_else(|| {
            BillingError::Storage("gateway subscription response without id".into())
        })?;

        let mut record = SubscriptionRecord::new(self.owner_id, gateway_id, self.plan);
        record.tag = self.tag;
        record.billing_type = billing_type;
        record.cycle = cycle;
        record.value = value;
        record.next_due_date = Some(next_due_date);
        record.trial_ends_at = trial_ends_at;
        record.metadata = self.metadata;
        gateway.apply_to(&mut record);
        service.store.insert_subscription(&record).await?;

        tracing::info!(
            owner_id = %record.owner_id,
            gateway_subscription_id = %record.gateway_id,
            plan = %record.plan,
            tag = %record.tag,
            trialing = record.on_trial(),
            "Subscription created"
        );
        Ok(record)
    }
}

#[derive(Clone)]
pub struct SubscriptionService {
    client: AsaasClient,
    store: Arc<dyn BillingStore>,
    customers: CustomerService,
    config: Arc<BillingConfig>,
}

impl SubscriptionService {
    pub fn new(
        client: AsaasClient,
        store: Arc<dyn BillingStore>,
        config: Arc<BillingConfig>,
    ) -> Self {
        let customers = CustomerService::new(client.clone(), store.clone());
        Self {
            client,
            store,
            customers,
            config,
        }
    }

    pub fn build(&self, owner_id: Uuid, plan: impl Into<String>) -> SubscriptionBuilder {
        SubscriptionBuilder {
            service: self.clone(),
            owner_id,
            plan: plan.into(),
            tag: DEFAULT_TAG.to_string(),
            price: None,
            billing_type: None,
            cycle: None,
            trial_days: None,
            next_due_date: None,
            max_payments: None,
            end_date: None,
            description: None,
            discount: None,
            interest: None,
            fine: None,
            splits: Vec::new(),
            credit_card: None,
            card_token: None,
            metadata: Value::Null,
        }
    }

    /// Cancel: the gateway subscription goes inactive and the local record
    /// keeps access until the already-paid period runs out.
    pub async fn cancel(&self, subscription_id: Uuid) -> BillingResult<SubscriptionRecord> {
        let mut record = self.require(subscription_id).await?;
        if record.canceled() {
            return Ok(record);
        }

        self.client
            .update_subscription(&record.gateway_id, &json!({ "status": "INACTIVE" }))
            .await?;

        record.status = SubscriptionStatus::Inactive;
        record.ends_at = Some(grace_period_end(&record));
        record.touch();
        self.store.update_subscription(&record).await?;

        tracing::info!(
            gateway_subscription_id = %record.gateway_id,
            ends_at = %record.ends_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            "Subscription cancelled"
        );
        Ok(record)
    }

    /// Undo a cancellation while the grace period still runs.
    pub async fn resume(&self, subscription_id: Uuid) -> BillingResult<SubscriptionRecord> {
        let mut record = self.require(subscription_id).await?;
        if !record.on_grace_period() {
            return Err(BillingError::Validation(
                "only subscriptions on a grace period can be resumed".to_string(),
            ));
        }

        self.client
            .update_subscription(&record.gateway_id, &json!({ "status": "ACTIVE" }))
            .await?;

        record.status = SubscriptionStatus::Active;
        record.ends_at = None;
        record.touch();
        self.store.update_subscription(&record).await?;

        tracing::info!(
            gateway_subscription_id = %record.gateway_id,
            "Subscription resumed"
        );
        Ok(record)
    }

    /// Swap the plan (and with it the price) on an existing subscription.
    pub async fn swap_plan(
        &self,
        subscription_id: Uuid,
        plan: &str,
        price: Option<Decimal>,
    ) -> BillingResult<SubscriptionRecord> {
        let mut record = self.require(subscription_id).await?;
        let value = match price {
            Some(price) => price,
            None => self.config.plan_price(plan).ok_or_else(|| {
                BillingError::Config(format!("no configured price for plan '{plan}'"))
            })?,
        };

        let payload = json!({
            "value": value,
            "externalReference":
                ExternalRef::for_subscription(record.owner_id, &record.tag, plan).encode(),
            "updatePendingPayments": true,
        });
        let response = self
            .client
            .update_subscription(&record.gateway_id, &payload)
            .await?;
        let gateway: GatewaySubscription = serde_json::from_value(response)
            .map_err(|e| BillingError::Storage(format!("undecodable subscription response: {e}")))?;

        record.plan = plan.to_string();
        record.value = value;
        gateway.apply_to(&mut record);
        self.store.update_subscription(&record).await?;

        tracing::info!(
            gateway_subscription_id = %record.gateway_id,
            plan = %record.plan,
            "Subscription plan swapped"
        );
        Ok(record)
    }

    /// Switch how future charges are collected, e.g. from boleto to Pix.
    pub async fn change_billing_type(
        &self,
        subscription_id: Uuid,
        billing_type: BillingType,
    ) -> BillingResult<SubscriptionRecord> {
        let mut record = self.require(subscription_id).await?;
        let response = self
            .client
            .update_subscription(&record.gateway_id, &json!({ "billingType": billing_type }))
            .await?;
        let gateway: GatewaySubscription = serde_json::from_value(response)
            .map_err(|e| BillingError::Storage(format!("undecodable subscription response: {e}")))?;

        record.billing_type = billing_type;
        gateway.apply_to(&mut record);
        self.store.update_subscription(&record).await?;
        Ok(record)
    }

    /// Tokenized card swap for credit-card subscriptions.
    pub async fn update_credit_card(
        &self,
        subscription_id: Uuid,
        card: &CreditCard,
        holder: &CreditCardHolderInfo,
    ) -> BillingResult<()> {
        let record = self.require(subscription_id).await?;
        let payload = json!({
            "creditCard": card,
            "creditCardHolderInfo": holder,
        });
        self.client
            .update_subscription_credit_card(&record.gateway_id, &payload)
            .await?;
        Ok(())
    }

    /// Charges the gateway issued for this subscription, newest first.
    pub async fn gateway_payments(
        &self,
        subscription_id: Uuid,
    ) -> BillingResult<Vec<GatewayPayment>> {
        let record = self.require(subscription_id).await?;
        let response = self.client.subscription_payments(&record.gateway_id).await?;
        let data = response
            .get("data")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        serde_json::from_value(data)
            .map_err(|e| BillingError::Storage(format!("undecodable payment list: {e}")))
    }

    /// Pull the gateway's view of a subscription and resync the record.
    pub async fn sync(&self, subscription_id: Uuid) -> BillingResult<SubscriptionRecord> {
        let mut record = self.require(subscription_id).await?;
        let response = self.client.find_subscription(&record.gateway_id).await?;
        let gateway: GatewaySubscription = serde_json::from_value(response)
            .map_err(|e| BillingError::Storage(format!("undecodable subscription response: {e}")))?;
        gateway.apply_to(&mut record);
        self.store.update_subscription(&record).await?;
        Ok(record)
    }

    pub async fn find(&self, subscription_id: Uuid) -> BillingResult<Option<SubscriptionRecord>> {
        self.store.find_subscription(subscription_id).await
    }

    pub async fn find_for_owner(
        &self,
        owner_id: Uuid,
        tag: &str,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        self.store.find_subscription_for_owner(owner_id, tag).await
    }

    pub async fn for_owner(&self, owner_id: Uuid) -> BillingResult<Vec<SubscriptionRecord>> {
        self.store.subscriptions_for_owner(owner_id).await
    }

    async fn require(&self, subscription_id: Uuid) -> BillingResult<SubscriptionRecord> {
        self.store
            .find_subscription(subscription_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("subscription", subscription_id.to_string()))
    }
}

/// When access lapses after a cancellation: the end of the last paid-through
/// day, or immediately when nothing was paid ahead.
fn grace_period_end(record: &SubscriptionRecord) -> DateTime<Utc> {
    let now = Utc::now();
    if let Some(trial_end) = record.trial_ends_at {
        if trial_end > now {
            return trial_end;
        }
    }
    match record.next_due_date {
        Some(date) => {
            let end = date
                .and_hms_opt(23, 59, 59)
                .map(|t| t.and_utc())
                .unwrap_or(now);
            if end > now {
                end
            } else {
                now
            }
        }
        None => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_subscription() -> SubscriptionRecord {
        let mut record = SubscriptionRecord::new(Uuid::new_v4(), "sub_1", "pro");
        record.value = Decimal::new(4990, 2);
        record.next_due_date = Some(Utc::now().date_naive() + Duration::days(20));
        record
    }

    #[test]
    fn recurring_subscription_is_valid() {
        let record = active_subscription();
        assert!(record.recurring());
        assert!(record.valid());
        assert!(!record.on_trial());
        assert!(!record.canceled());
    }

    #[test]
    fn trialing_subscription_is_valid_but_not_recurring() {
        let mut record = active_subscription();
        record.trial_ends_at = Some(Utc::now() + Duration::days(7));
        assert!(record.on_trial());
        assert!(!record.recurring());
        assert!(record.valid());
    }

    #[test]
    fn cancellation_with_paid_time_left_keeps_access_until_it_runs_out() {
        let mut record = active_subscription();
        record.status = SubscriptionStatus::Inactive;
        record.ends_at = Some(grace_period_end(&record));

        assert!(record.canceled());
        assert!(record.on_grace_period());
        assert!(record.valid());
        assert!(!record.ended());

        // Past the grace period the subscription no longer grants access.
        record.ends_at = Some(Utc::now() - Duration::seconds(1));
        assert!(record.ended());
        assert!(!record.valid());
    }

    #[test]
    fn grace_period_end_prefers_remaining_trial_time() {
        let mut record = active_subscription();
        record.trial_ends_at = Some(Utc::now() + Duration::days(3));
        let end = grace_period_end(&record);
        assert_eq!(end, record.trial_ends_at.unwrap());
    }

    #[test]
    fn grace_period_end_without_paid_time_is_immediate() {
        let mut record = active_subscription();
        record.next_due_date = Some(Utc::now().date_naive() - Duration::days(5));
        let end = grace_period_end(&record);
        assert!(end <= Utc::now());
    }
}
