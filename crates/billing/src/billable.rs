//! Per-owner facade
//!
//! `Billable` scopes the billing services to one owner so call sites read as
//! questions and actions about that owner instead of service plumbing. It is
//! a borrow of [`BillingService`](crate::BillingService) plus an owner id;
//! construct one per call chain via `billing.billable(owner_id)`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::checkout::CheckoutBuilder;
use crate::error::{BillingError, BillingResult};
use crate::invoices::InvoiceRecord;
use crate::payments::{ChargeParams, PaymentRecord};
use crate::store::{OwnerRecord, OwnerStore};
use crate::subscriptions::{SubscriptionBuilder, SubscriptionRecord, DEFAULT_TAG};
use crate::types::BillingType;
use crate::BillingService;

#[derive(Clone, Copy)]
pub struct Billable<'a> {
    service: &'a BillingService,
    owner_id: Uuid,
}

impl<'a> Billable<'a> {
    pub(crate) fn new(service: &'a BillingService, owner_id: Uuid) -> Self {
        Self { service, owner_id }
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    pub async fn owner(&self) -> BillingResult<OwnerRecord> {
        self.service
            .store()
            .find_owner(self.owner_id)
            .await?
            .ok_or(BillingError::OwnerNotFound(self.owner_id))
    }
}

/// Gateway customer handling.
impl Billable<'_> {
    /// Gateway customer id, creating the customer on first use.
    pub async fn gateway_customer_id(&self) -> BillingResult<String> {
        self.service
            .customers()
            .ensure_gateway_customer(self.owner_id)
            .await
    }

    /// Explicit creation; fails if the owner already has a gateway customer.
    pub async fn create_gateway_customer(&self) -> BillingResult<String> {
        self.service
            .customers()
            .create_gateway_customer(self.owner_id)
            .await
    }

    /// Push the owner's current profile to the gateway customer, optionally
    /// overriding fields in the outgoing payload.
    pub async fn sync_gateway_customer(
        &self,
        overrides: serde_json::Value,
    ) -> BillingResult<serde_json::Value> {
        self.service
            .customers()
            .sync_gateway_customer(self.owner_id, overrides)
            .await
    }
}

/// Subscription state and lifecycle.
impl Billable<'_> {
    /// Start building a subscription to `plan` for this owner.
    pub fn subscribe(&self, plan: impl Into<String>) -> SubscriptionBuilder {
        self.service.subscriptions().build(self.owner_id, plan)
    }

    /// The owner's subscription under the default type tag.
    pub async fn subscription(&self) -> BillingResult<Option<SubscriptionRecord>> {
        self.subscription_tagged(DEFAULT_TAG).await
    }

    pub async fn subscription_tagged(
        &self,
        tag: &str,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        self.service
            .subscriptions()
            .find_for_owner(self.owner_id, tag)
            .await
    }

    pub async fn subscriptions(&self) -> BillingResult<Vec<SubscriptionRecord>> {
        self.service.subscriptions().for_owner(self.owner_id).await
    }

    /// Does a valid default-tag subscription exist?
    pub async fn subscribed(&self) -> BillingResult<bool> {
        self.subscribed_tagged(DEFAULT_TAG).await
    }

    pub async fn subscribed_tagged(&self, tag: &str) -> BillingResult<bool> {
        Ok(self
            .subscription_tagged(tag)
            .await?
            .is_some_and(|s| s.valid()))
    }

    /// Valid subscription to a specific plan under the default tag.
    pub async fn subscribed_to_plan(&self, plan: &str) -> BillingResult<bool> {
        Ok(self
            .subscription_tagged(DEFAULT_TAG)
            .await?
            .is_some_and(|s| s.valid() && s.is_plan(plan)))
    }

    /// Subscription-attached trial under the default tag.
    pub async fn on_trial(&self) -> BillingResult<bool> {
        Ok(self
            .subscription_tagged(DEFAULT_TAG)
            .await?
            .is_some_and(|s| s.on_trial()))
    }

    /// Owner-level trial independent of any subscription.
    pub async fn on_generic_trial(&self) -> BillingResult<bool> {
        Ok(self.owner().await?.on_generic_trial())
    }

    /// Cancel the subscription under `tag`, keeping access until the
    /// paid-through period lapses.
    pub async fn cancel_subscription(&self, tag: &str) -> BillingResult<SubscriptionRecord> {
        let record = self.require_subscription(tag).await?;
        self.service.subscriptions().cancel(record.id).await
    }

    /// Undo a cancellation while the grace period still runs.
    pub async fn resume_subscription(&self, tag: &str) -> BillingResult<SubscriptionRecord> {
        let record = self.require_subscription(tag).await?;
        self.service.subscriptions().resume(record.id).await
    }

    pub async fn swap_plan(&self, tag: &str, plan: &str) -> BillingResult<SubscriptionRecord> {
        let record = self.require_subscription(tag).await?;
        self.service
            .subscriptions()
            .swap_plan(record.id, plan, None)
            .await
    }

    pub async fn change_billing_type(
        &self,
        tag: &str,
        billing_type: BillingType,
    ) -> BillingResult<SubscriptionRecord> {
        let record = self.require_subscription(tag).await?;
        self.service
            .subscriptions()
            .change_billing_type(record.id, billing_type)
            .await
    }

    async fn require_subscription(&self, tag: &str) -> BillingResult<SubscriptionRecord> {
        self.subscription_tagged(tag)
            .await?
            .ok_or_else(|| BillingError::NotFound("subscription", tag.to_string()))
    }
}

/// One-off charges.
impl Billable<'_> {
    pub async fn charge(&self, params: ChargeParams) -> BillingResult<PaymentRecord> {
        self.service.payments().charge(self.owner_id, params).await
    }

    /// Convenience for the common case: one value, one due date.
    pub async fn charge_simple(
        &self,
        billing_type: BillingType,
        value: Decimal,
        due_date: NaiveDate,
    ) -> BillingResult<PaymentRecord> {
        self.charge(ChargeParams::new(billing_type, value, due_date))
            .await
    }

    pub async fn payments(&self) -> BillingResult<Vec<PaymentRecord>> {
        self.service.payments().for_owner(self.owner_id).await
    }

    /// Only the charges that actually settled.
    pub async fn paid_payments(&self) -> BillingResult<Vec<PaymentRecord>> {
        let mut payments = self.payments().await?;
        payments.retain(PaymentRecord::is_paid);
        Ok(payments)
    }
}

/// Hosted checkout and invoices.
impl Billable<'_> {
    /// Checkout builder pre-bound to this owner.
    pub fn checkout(&self) -> CheckoutBuilder {
        self.service.checkouts().build().owner(self.owner_id)
    }

    pub async fn invoices(&self) -> BillingResult<Vec<InvoiceRecord>> {
        self.service.invoices().for_owner(self.owner_id).await
    }
}
