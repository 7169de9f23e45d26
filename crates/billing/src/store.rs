//! Persistence boundary
//!
//! The record store is an external collaborator with plain single-row CRUD
//! semantics, so it is expressed as a set of narrow async traits. `PgStore`
//! (see `postgres`) is the production implementation; `MemoryStore` backs
//! tests and embedded use.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::BillingResult;
use crate::invoices::InvoiceRecord;
use crate::payments::PaymentRecord;
use crate::subscriptions::SubscriptionRecord;

/// The billable entity (e.g. an application user) as this crate sees it.
#[derive(Debug, Clone)]
pub struct OwnerRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub cpf_cnpj: Option<String>,
    pub phone: Option<String>,
    /// Gateway customer id. Set at most once; immutable thereafter.
    pub gateway_id: Option<String>,
    /// Application-level trial independent of any subscription.
    pub trial_ends_at: Option<DateTime<Utc>>,
}

impl OwnerRecord {
    pub fn new(id: Uuid, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
            cpf_cnpj: None,
            phone: None,
            gateway_id: None,
            trial_ends_at: None,
        }
    }

    pub fn on_generic_trial(&self) -> bool {
        self.trial_ends_at.is_some_and(|t| t > Utc::now())
    }
}

#[async_trait]
pub trait OwnerStore: Send + Sync {
    async fn insert_owner(&self, owner: &OwnerRecord) -> BillingResult<()>;
    async fn find_owner(&self, id: Uuid) -> BillingResult<Option<OwnerRecord>>;
    async fn find_owner_by_gateway_id(&self, gateway_id: &str)
        -> BillingResult<Option<OwnerRecord>>;
    /// Records the gateway customer id created for an owner.
    async fn set_owner_gateway_id(&self, id: Uuid, gateway_id: &str) -> BillingResult<()>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn insert_subscription(&self, subscription: &SubscriptionRecord) -> BillingResult<()>;
    async fn update_subscription(&self, subscription: &SubscriptionRecord) -> BillingResult<()>;
    async fn find_subscription(&self, id: Uuid) -> BillingResult<Option<SubscriptionRecord>>;
    async fn find_subscription_by_gateway_id(
        &self,
        gateway_id: &str,
    ) -> BillingResult<Option<SubscriptionRecord>>;
    /// One owner may hold several subscriptions distinguished by type tag.
    async fn find_subscription_for_owner(
        &self,
        owner_id: Uuid,
        tag: &str,
    ) -> BillingResult<Option<SubscriptionRecord>>;
    async fn subscriptions_for_owner(
        &self,
        owner_id: Uuid,
    ) -> BillingResult<Vec<SubscriptionRecord>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_payment(&self, payment: &PaymentRecord) -> BillingResult<()>;
    async fn update_payment(&self, payment: &PaymentRecord) -> BillingResult<()>;
    async fn find_payment(&self, id: Uuid) -> BillingResult<Option<PaymentRecord>>;
    async fn find_payment_by_gateway_id(
        &self,
        gateway_id: &str,
    ) -> BillingResult<Option<PaymentRecord>>;
    async fn payments_for_owner(&self, owner_id: Uuid) -> BillingResult<Vec<PaymentRecord>>;
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn insert_invoice(&self, invoice: &InvoiceRecord) -> BillingResult<()>;
    async fn update_invoice(&self, invoice: &InvoiceRecord) -> BillingResult<()>;
    async fn find_invoice(&self, id: Uuid) -> BillingResult<Option<InvoiceRecord>>;
    async fn find_invoice_by_gateway_id(
        &self,
        gateway_id: &str,
    ) -> BillingResult<Option<InvoiceRecord>>;
    async fn invoices_for_owner(&self, owner_id: Uuid) -> BillingResult<Vec<InvoiceRecord>>;
}

/// Umbrella trait for everything the billing services need from storage.
pub trait BillingStore: OwnerStore + SubscriptionStore + PaymentStore + InvoiceStore {}

impl<T: OwnerStore + SubscriptionStore + PaymentStore + InvoiceStore> BillingStore for T {}

/// In-memory store backed by hash maps. Single-row update semantics only,
/// mirroring what the production store guarantees.
#[derive(Default)]
pub struct MemoryStore {
    owners: Mutex<HashMap<Uuid, OwnerRecord>>,
    subscriptions: Mutex<HashMap<Uuid, SubscriptionRecord>>,
    payments: Mutex<HashMap<Uuid, PaymentRecord>>,
    invoices: Mutex<HashMap<Uuid, InvoiceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock<'a, T>(map: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl OwnerStore for MemoryStore {
    async fn insert_owner(&self, owner: &OwnerRecord) -> BillingResult<()> {
        Self::lock(&self.owners).insert(owner.id, owner.clone());
        Ok(())
    }

    async fn find_owner(&self, id: Uuid) -> BillingResult<Option<OwnerRecord>> {
        Ok(Self::lock(&self.owners).get(&id).cloned())
    }

    async fn find_owner_by_gateway_id(
        &self,
        gateway_id: &str,
    ) -> BillingResult<Option<OwnerRecord>> {
        Ok(Self::lock(&self.owners)
            .values()
            .find(|o| o.gateway_id.as_deref() == Some(gateway_id))
            .cloned())
    }

    async fn set_owner_gateway_id(&self, id: Uuid, gateway_id: &str) -> BillingResult<()> {
        if let Some(owner) = Self::lock(&self.owners).get_mut(&id) {
            owner.gateway_id = Some(gateway_id.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn insert_subscription(&self, subscription: &SubscriptionRecord) -> BillingResult<()> {
        Self::lock(&self.subscriptions).insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn update_subscription(&self, subscription: &SubscriptionRecord) -> BillingResult<()> {
        Self::lock(&self.subscriptions).insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn find_subscription(&self, id: Uuid) -> BillingResult<Option<SubscriptionRecord>> {
        Ok(Self::lock(&self.subscriptions).get(&id).cloned())
    }

    async fn find_subscription_by_gateway_id(
        &self,
        gateway_id: &str,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        Ok(Self::lock(&self.subscriptions)
            .values()
            .find(|s| s.gateway_id == gateway_id)
            .cloned())
    }

    async fn find_subscription_for_owner(
        &self,
        owner_id: Uuid,
        tag: &str,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        Ok(Self::lock(&self.subscriptions)
            .values()
            .find(|s| s.owner_id == owner_id && s.tag == tag)
            .cloned())
    }

    async fn subscriptions_for_owner(
        &self,
        owner_id: Uuid,
    ) -> BillingResult<Vec<SubscriptionRecord>> {
        Ok(Self::lock(&self.subscriptions)
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_payment(&self, payment: &PaymentRecord) -> BillingResult<()> {
        Self::lock(&self.payments).insert(payment.id, payment.clone());
        Ok(())
    }

    async fn update_payment(&self, payment: &PaymentRecord) -> BillingResult<()> {
        Self::lock(&self.payments).insert(payment.id, payment.clone());
        Ok(())
    }

    async fn find_payment(&self, id: Uuid) -> BillingResult<Option<PaymentRecord>> {
        Ok(Self::lock(&self.payments).get(&id).cloned())
    }

    async fn find_payment_by_gateway_id(
        &self,
        gateway_id: &str,
    ) -> BillingResult<Option<PaymentRecord>> {
        Ok(Self::lock(&self.payments)
            .values()
            .find(|p| p.gateway_id == gateway_id)
            .cloned())
    }

    async fn payments_for_owner(&self, owner_id: Uuid) -> BillingResult<Vec<PaymentRecord>> {
        Ok(Self::lock(&self.payments)
            .values()
            .filter(|p| p.owner_id == Some(owner_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn insert_invoice(&self, invoice: &InvoiceRecord) -> BillingResult<()> {
        Self::lock(&self.invoices).insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn update_invoice(&self, invoice: &InvoiceRecord) -> BillingResult<()> {
        Self::lock(&self.invoices).insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn find_invoice(&self, id: Uuid) -> BillingResult<Option<InvoiceRecord>> {
        Ok(Self::lock(&self.invoices).get(&id).cloned())
    }

    async fn find_invoice_by_gateway_id(
        &self,
        gateway_id: &str,
    ) -> BillingResult<Option<InvoiceRecord>> {
        Ok(Self::lock(&self.invoices)
            .values()
            .find(|i| i.gateway_id == gateway_id)
            .cloned())
    }

    async fn invoices_for_owner(&self, owner_id: Uuid) -> BillingResult<Vec<InvoiceRecord>> {
        Ok(Self::lock(&self.invoices)
            .values()
            .filter(|i| i.owner_id == Some(owner_id))
            .cloned()
            .collect())
    }
}
