//! Billing integration for the Asaas payment gateway.
//!
//! Binds an application's users to gateway customers, subscriptions,
//! one-off charges, hosted checkout sessions and fiscal invoices, and keeps
//! the local view of all of them current from the gateway's webhook stream.
//!
//! [`BillingService`] wires everything together; [`Billable`] scopes it to
//! one owner:
//!
//! ```no_run
//! # use asaas_billing::{BillingService, BillingConfig, AsaasConfig};
//! # use asaas_billing::store::MemoryStore;
//! # use std::sync::Arc;
//! # async fn demo(owner_id: uuid::Uuid) -> asaas_billing::BillingResult<()> {
//! let billing = BillingService::new(
//!     AsaasConfig::new("my_api_key", true),
//!     Arc::new(MemoryStore::new()),
//!     BillingConfig::new().with_plan("pro", rust_decimal::Decimal::new(4990, 2)),
//! );
//! let subscription = billing.billable(owner_id).subscribe("pro").create().await?;
//! assert!(subscription.valid());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod billable;
pub mod checkout;
pub mod client;
pub mod config;
pub mod customers;
pub mod error;
pub mod events;
pub mod external_ref;
pub mod invoices;
pub mod payments;
pub mod postgres;
pub mod store;
pub mod subscriptions;
pub mod types;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

use std::sync::Arc;

pub use billable::Billable;
pub use checkout::{CheckoutBuilder, CheckoutItem, CheckoutService, CheckoutSession};
pub use client::{AsaasClient, AsaasConfig, Page};
pub use config::BillingConfig;
pub use customers::CustomerService;
pub use error::{BillingError, BillingResult, GatewayErrorDetail};
pub use events::{BillingEvent, Notifier};
pub use external_ref::ExternalRef;
pub use invoices::{InvoiceParams, InvoiceRecord, InvoiceService, InvoiceTaxes};
pub use payments::{ChargeParams, PaymentRecord, PaymentService, PixQrCode};
pub use postgres::PgStore;
pub use store::{BillingStore, MemoryStore, OwnerRecord};
pub use subscriptions::{SubscriptionBuilder, SubscriptionRecord, SubscriptionService};
pub use types::{BillingType, ChargeType, Cycle, InvoiceStatus, PaymentStatus, SubscriptionStatus};
pub use webhooks::{WebhookEvent, WebhookHandler, WebhookReply};

use uuid::Uuid;

/// Entry point owning the gateway client, the record store and every
/// per-concern service.
pub struct BillingService {
    client: AsaasClient,
    store: Arc<dyn BillingStore>,
    notifier: Notifier,
    customers: CustomerService,
    subscriptions: SubscriptionService,
    payments: PaymentService,
    invoices: InvoiceService,
    checkouts: CheckoutService,
    webhooks: WebhookHandler,
}

impl BillingService {
    pub fn new(
        gateway: AsaasConfig,
        store: Arc<dyn BillingStore>,
        config: BillingConfig,
    ) -> Self {
        let client = AsaasClient::new(gateway);
        let config = Arc::new(config);
        let notifier = Notifier::new();
        Self {
            customers: CustomerService::new(client.clone(), store.clone()),
            subscriptions: SubscriptionService::new(
                client.clone(),
                store.clone(),
                config.clone(),
            ),
            payments: PaymentService::new(client.clone(), store.clone()),
            invoices: InvoiceService::new(client.clone(), store.clone()),
            checkouts: CheckoutService::new(client.clone(), store.clone(), config),
            webhooks: WebhookHandler::new(store.clone(), notifier.clone()),
            client,
            store,
            notifier,
        }
    }

    /// Gateway credentials from `ASAAS_API_KEY` / `ASAAS_SANDBOX`.
    pub fn from_env(store: Arc<dyn BillingStore>, config: BillingConfig) -> BillingResult<Self> {
        Ok(Self::new(AsaasConfig::from_env()?, store, config))
    }

    /// Everything in memory; for tests and embedded use.
    pub fn new_in_memory(gateway: AsaasConfig, config: BillingConfig) -> Self {
        Self::new(gateway, Arc::new(MemoryStore::new()), config)
    }

    /// All operations scoped to one owner.
    pub fn billable(&self, owner_id: Uuid) -> Billable<'_> {
        Billable::new(self, owner_id)
    }

    /// Start a hosted checkout session not bound to any owner.
    pub fn checkout(&self) -> CheckoutBuilder {
        self.checkouts.build()
    }

    /// Register an owner so billing operations can reference it.
    pub async fn register_owner(&self, owner: &OwnerRecord) -> BillingResult<()> {
        use store::OwnerStore;
        self.store.insert_owner(owner).await
    }

    /// Route one webhook delivery body.
    pub async fn handle_webhook(&self, body: &[u8]) -> WebhookReply {
        self.webhooks.handle_bytes(body).await
    }

    /// Receiver for typed billing notifications.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BillingEvent> {
        self.notifier.subscribe()
    }

    pub fn client(&self) -> &AsaasClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<dyn BillingStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn customers(&self) -> &CustomerService {
        &self.customers
    }

    pub fn subscriptions(&self) -> &SubscriptionService {
        &self.subscriptions
    }

    pub fn payments(&self) -> &PaymentService {
        &self.payments
    }

    pub fn invoices(&self) -> &InvoiceService {
        &self.invoices
    }

    pub fn checkouts(&self) -> &CheckoutService {
        &self.checkouts
    }

    pub fn webhooks(&self) -> &WebhookHandler {
        &self.webhooks
    }
}
