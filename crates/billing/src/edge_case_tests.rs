//! End-to-end scenarios against a mock gateway.
//!
//! Each section seeds an in-memory store, points the client at a mockito
//! server, and drives a full flow through `BillingService`, asserting both
//! the local records and the notification stream.

use std::sync::Arc;

use chrono::{Duration, Utc};
use mockito::Matcher;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::client::AsaasConfig;
use crate::config::BillingConfig;
use crate::error::BillingError;
use crate::payments::PaymentRecord;
use crate::store::{MemoryStore, OwnerRecord, PaymentStore, SubscriptionStore};
use crate::subscriptions::SubscriptionRecord;
use crate::types::{BillingType, PaymentStatus, SubscriptionStatus};
use crate::webhooks::WebhookReply;
use crate::BillingService;

fn test_config() -> BillingConfig {
    BillingConfig::new()
        .with_plan("basic", Decimal::new(1990, 2))
        .with_plan("pro", Decimal::new(4990, 2))
        .with_default_billing_type(BillingType::Pix)
}

async fn billing_against(server: &mockito::ServerGuard) -> (BillingService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let billing = BillingService::new(
        AsaasConfig::new("test_key", true).with_base_url(server.url()),
        store.clone(),
        test_config(),
    );
    (billing, store)
}

async fn seed_owner(billing: &BillingService, gateway_id: Option<&str>) -> Uuid {
    let mut owner = OwnerRecord::new(Uuid::new_v4(), "Ana Souza", "ana@example.org");
    owner.cpf_cnpj = Some("12345678909".to_string());
    owner.gateway_id = gateway_id.map(str::to_string);
    billing.register_owner(&owner).await.unwrap();
    owner.id
}

// ---------------------------------------------------------------------------
// Subscription lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscribing_creates_the_gateway_customer_and_the_subscription() {
    let mut server = mockito::Server::new_async().await;
    let customer_mock = server
        .mock("POST", "/customers")
        .match_body(Matcher::PartialJson(json!({ "name": "Ana Souza" })))
        .with_status(200)
        .with_body(r#"{"id":"cus_1"}"#)
        .expect(1)
        .create_async()
        .await;
    let subscription_mock = server
        .mock("POST", "/subscriptions")
        .match_body(Matcher::PartialJson(json!({
            "customer": "cus_1",
            "billingType": "PIX",
            "cycle": "MONTHLY",
            "value": 49.9
        })))
        .with_status(200)
        .with_body(r#"{"id":"sub_1","status":"ACTIVE","cycle":"MONTHLY","value":49.9}"#)
        .expect(1)
        .create_async()
        .await;

    let (billing, store) = billing_against(&server).await;
    let owner_id = seed_owner(&billing, None).await;

    let subscription = billing
        .billable(owner_id)
        .subscribe("pro")
        .create()
        .await
        .unwrap();

    customer_mock.assert_async().await;
    subscription_mock.assert_async().await;

    assert_eq!(subscription.gateway_id, "sub_1");
    assert_eq!(subscription.value, Decimal::new(4990, 2));
    assert!(subscription.valid());
    assert!(subscription.recurring());

    // The customer id created along the way is persisted on the owner.
    let owner = crate::store::OwnerStore::find_owner(store.as_ref(), owner_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(owner.gateway_id.as_deref(), Some("cus_1"));
}

#[tokio::test]
async fn unknown_plan_fails_before_any_gateway_side_effect() {
    let mut server = mockito::Server::new_async().await;
    let customer_mock = server
        .mock("POST", "/customers")
        .expect(0)
        .create_async()
        .await;

    let (billing, _) = billing_against(&server).await;
    let owner_id = seed_owner(&billing, None).await;

    let err = billing
        .billable(owner_id)
        .subscribe("enterprise")
        .create()
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::Config(_)), "{err}");
    // No customer was created for the failed attempt.
    customer_mock.assert_async().await;
}

#[tokio::test]
async fn trial_pushes_the_first_charge_past_the_trial_window() {
    let mut server = mockito::Server::new_async().await;
    let _subscription_mock = server
        .mock("POST", "/subscriptions")
        .match_body(Matcher::PartialJson(json!({ "customer": "cus_1" })))
        .with_status(200)
        .with_body(r#"{"id":"sub_1","status":"ACTIVE"}"#)
        .create_async()
        .await;

    let (billing, _) = billing_against(&server).await;
    let owner_id = seed_owner(&billing, Some("cus_1")).await;

    let subscription = billing
        .billable(owner_id)
        .subscribe("basic")
        .trial_days(14)
        .create()
        .await
        .unwrap();

    assert!(subscription.on_trial());
    assert!(subscription.valid());
    assert!(!subscription.recurring());
    assert_eq!(
        subscription.next_due_date,
        Some((Utc::now() + Duration::days(14)).date_naive())
    );
}

#[tokio::test]
async fn a_second_valid_subscription_under_the_same_tag_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    let customer_mock = server
        .mock("POST", "/customers")
        .expect(0)
        .create_async()
        .await;

    let (billing, store) = billing_against(&server).await;
    let owner_id = seed_owner(&billing, Some("cus_1")).await;
    let mut existing = SubscriptionRecord::new(owner_id, "sub_1", "basic");
    existing.next_due_date = Some(Utc::now().date_naive() + Duration::days(10));
    store.insert_subscription(&existing).await.unwrap();

    let err = billing
        .billable(owner_id)
        .subscribe("pro")
        .create()
        .await
        .unwrap_err();

    assert!(err.is_validation(), "{err}");
    customer_mock.assert_async().await;
}

#[tokio::test]
async fn cancelling_keeps_access_until_the_paid_period_and_resume_undoes_it() {
    let mut server = mockito::Server::new_async().await;
    let inactivate_mock = server
        .mock("PUT", "/subscriptions/sub_1")
        .match_body(Matcher::PartialJson(json!({ "status": "INACTIVE" })))
        .with_status(200)
        .with_body(r#"{"id":"sub_1","status":"INACTIVE"}"#)
        .expect(1)
        .create_async()
        .await;
    let reactivate_mock = server
        .mock("PUT", "/subscriptions/sub_1")
        .match_body(Matcher::PartialJson(json!({ "status": "ACTIVE" })))
        .with_status(200)
        .with_body(r#"{"id":"sub_1","status":"ACTIVE"}"#)
        .expect(1)
        .create_async()
        .await;

    let (billing, store) = billing_against(&server).await;
    let owner_id = seed_owner(&billing, Some("cus_1")).await;
    let paid_through = Utc::now().date_naive() + Duration::days(12);
    let mut subscription = SubscriptionRecord::new(owner_id, "sub_1", "pro");
    subscription.next_due_date = Some(paid_through);
    store.insert_subscription(&subscription).await.unwrap();

    let cancelled = billing
        .subscriptions()
        .cancel(subscription.id)
        .await
        .unwrap();
    inactivate_mock.assert_async().await;
    assert_eq!(cancelled.status, SubscriptionStatus::Inactive);
    assert!(cancelled.on_grace_period());
    assert!(cancelled.valid());
    assert_eq!(cancelled.ends_at.unwrap().date_naive(), paid_through);

    let resumed = billing
        .subscriptions()
        .resume(subscription.id)
        .await
        .unwrap();
    reactivate_mock.assert_async().await;
    assert_eq!(resumed.status, SubscriptionStatus::Active);
    assert_eq!(resumed.ends_at, None);
    assert!(resumed.recurring());
}

#[tokio::test]
async fn resume_after_the_grace_period_lapsed_is_refused() {
    let server = mockito::Server::new_async().await;
    let (billing, store) = billing_against(&server).await;
    let owner_id = seed_owner(&billing, Some("cus_1")).await;
    let mut subscription = SubscriptionRecord::new(owner_id, "sub_1", "pro");
    subscription.status = SubscriptionStatus::Inactive;
    subscription.ends_at = Some(Utc::now() - Duration::days(1));
    store.insert_subscription(&subscription).await.unwrap();

    let err = billing
        .subscriptions()
        .resume(subscription.id)
        .await
        .unwrap_err();
    assert!(err.is_validation(), "{err}");
}

// ---------------------------------------------------------------------------
// One-off charges
// ---------------------------------------------------------------------------

#[tokio::test]
async fn a_charge_persists_the_gateway_artifacts() {
    let mut server = mockito::Server::new_async().await;
    let _payment_mock = server
        .mock("POST", "/payments")
        .match_body(Matcher::PartialJson(json!({
            "customer": "cus_1",
            "billingType": "BOLETO",
            "value": 150.0
        })))
        .with_status(200)
        .with_body(
            r#"{"id":"pay_1","status":"PENDING","billingType":"BOLETO","value":150.0,
               "bankSlipUrl":"https://sandbox.asaas.com/b/pdf/pay_1",
               "invoiceUrl":"https://sandbox.asaas.com/i/pay_1"}"#,
        )
        .create_async()
        .await;

    let (billing, _) = billing_against(&server).await;
    let owner_id = seed_owner(&billing, Some("cus_1")).await;

    let payment = billing
        .billable(owner_id)
        .charge_simple(
            BillingType::Boleto,
            Decimal::new(15000, 2),
            Utc::now().date_naive() + Duration::days(5),
        )
        .await
        .unwrap();

    assert_eq!(payment.gateway_id, "pay_1");
    assert!(payment.is_pending());
    assert!(payment.is_boleto());
    assert!(payment.bank_slip_url.is_some());
    assert!(payment.invoice_url.is_some());
}

#[tokio::test]
async fn refund_stamps_both_refund_signals() {
    let mut server = mockito::Server::new_async().await;
    let _refund_mock = server
        .mock("POST", "/payments/pay_1/refund")
        .with_status(200)
        .with_body(r#"{"id":"pay_1","status":"REFUNDED"}"#)
        .create_async()
        .await;

    let (billing, store) = billing_against(&server).await;
    let owner_id = seed_owner(&billing, Some("cus_1")).await;
    let mut payment = PaymentRecord::new("pay_1", Decimal::new(9900, 2));
    payment.owner_id = Some(owner_id);
    payment.status = PaymentStatus::Received;
    store.insert_payment(&payment).await.unwrap();

    let refunded = billing.payments().refund(payment.id, None).await.unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert!(refunded.refunded_at.is_some());
    assert!(refunded.is_refunded());
}

// ---------------------------------------------------------------------------
// Webhook stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn payment_received_updates_the_record_and_notifies_subscribers() {
    let server = mockito::Server::new_async().await;
    let (billing, store) = billing_against(&server).await;
    let owner_id = seed_owner(&billing, Some("cus_1")).await;
    let mut payment = PaymentRecord::new("pay_1", Decimal::new(4990, 2));
    payment.owner_id = Some(owner_id);
    store.insert_payment(&payment).await.unwrap();

    let mut events = billing.subscribe();
    let body = serde_json::to_vec(&json!({
        "event": "PAYMENT_RECEIVED",
        "payment": {
            "id": "pay_1",
            "status": "RECEIVED",
            "netValue": 48.9,
            "paymentDate": Utc::now().date_naive()
        }
    }))
    .unwrap();

    let reply = billing.handle_webhook(&body).await;
    assert_eq!(
        reply,
        WebhookReply::Processed {
            event: "PAYMENT_RECEIVED".to_string()
        }
    );

    let stored = store.find_payment(payment.id).await.unwrap().unwrap();
    assert!(stored.is_paid());
    assert_eq!(stored.net_value, Some(Decimal::new(489, 1)));

    assert_eq!(events.try_recv().unwrap().kind(), "WebhookReceived");
    assert_eq!(events.try_recv().unwrap().kind(), "PaymentReceived");
}

#[tokio::test]
async fn renewal_charge_from_the_gateway_is_adopted_and_linked_to_its_subscription() {
    let server = mockito::Server::new_async().await;
    let (billing, store) = billing_against(&server).await;
    let owner_id = seed_owner(&billing, Some("cus_1")).await;
    let subscription = SubscriptionRecord::new(owner_id, "sub_1", "pro");
    store.insert_subscription(&subscription).await.unwrap();

    let mut events = billing.subscribe();
    let body = serde_json::to_vec(&json!({
        "event": "PAYMENT_CREATED",
        "payment": {
            "id": "pay_renewal",
            "subscription": "sub_1",
            "status": "PENDING",
            "billingType": "PIX",
            "value": 49.9,
            "pixQrCode": { "encodedImage": "aGVsbG8=", "payload": "00020126...6304" }
        }
    }))
    .unwrap();

    let reply = billing.handle_webhook(&body).await;
    assert!(matches!(reply, WebhookReply::Processed { .. }));

    let stored = store
        .find_payment_by_gateway_id("pay_renewal")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.owner_id, Some(owner_id));
    assert_eq!(stored.subscription_id, Some(subscription.id));
    assert!(stored.pix_copy_paste.is_some());

    assert_eq!(events.try_recv().unwrap().kind(), "WebhookReceived");
    assert_eq!(events.try_recv().unwrap().kind(), "PaymentCreated");
    assert_eq!(events.try_recv().unwrap().kind(), "PixGenerated");
}

#[tokio::test]
async fn replaying_a_payment_update_leaves_the_record_unchanged() {
    let server = mockito::Server::new_async().await;
    let (billing, store) = billing_against(&server).await;
    let owner_id = seed_owner(&billing, Some("cus_1")).await;
    let mut payment = PaymentRecord::new("pay_1", Decimal::new(4990, 2));
    payment.owner_id = Some(owner_id);
    store.insert_payment(&payment).await.unwrap();

    let body = serde_json::to_vec(&json!({
        "event": "PAYMENT_UPDATED",
        "payment": {
            "id": "pay_1",
            "status": "OVERDUE",
            "value": 49.9,
            "dueDate": "2026-08-01"
        }
    }))
    .unwrap();

    let reply = billing.handle_webhook(&body).await;
    assert!(matches!(reply, WebhookReply::Processed { .. }));
    let first = store.find_payment(payment.id).await.unwrap().unwrap();

    let reply = billing.handle_webhook(&body).await;
    assert!(matches!(reply, WebhookReply::Processed { .. }));
    let second = store.find_payment(payment.id).await.unwrap().unwrap();

    assert_eq!(second.status, first.status);
    assert_eq!(second.value, first.value);
    assert_eq!(second.due_date, first.due_date);
    assert_eq!(second.payment_date, first.payment_date);
    assert_eq!(second.owner_id, first.owner_id);
}

#[tokio::test]
async fn repeated_payment_created_updates_the_row_instead_of_duplicating_it() {
    let server = mockito::Server::new_async().await;
    let (billing, store) = billing_against(&server).await;
    let owner_id = seed_owner(&billing, Some("cus_1")).await;

    let body = |status: &str| {
        serde_json::to_vec(&json!({
            "event": "PAYMENT_CREATED",
            "payment": {
                "id": "pay_dup",
                "customer": "cus_1",
                "status": status,
                "billingType": "PIX",
                "value": 49.9
            }
        }))
        .unwrap()
    };

    let reply = billing.handle_webhook(&body("PENDING")).await;
    assert!(matches!(reply, WebhookReply::Processed { .. }));
    let first = store
        .find_payment_by_gateway_id("pay_dup")
        .await
        .unwrap()
        .unwrap();

    let reply = billing.handle_webhook(&body("CONFIRMED")).await;
    assert!(matches!(reply, WebhookReply::Processed { .. }));

    let rows = store.payments_for_owner(owner_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, first.id);
    assert_eq!(rows[0].status, PaymentStatus::Confirmed);
}

#[tokio::test]
async fn gateway_deletion_event_after_a_local_cancel_keeps_the_grace_period() {
    let mut server = mockito::Server::new_async().await;
    let _inactivate_mock = server
        .mock("PUT", "/subscriptions/sub_1")
        .with_status(200)
        .with_body(r#"{"id":"sub_1","status":"INACTIVE"}"#)
        .create_async()
        .await;

    let (billing, store) = billing_against(&server).await;
    let owner_id = seed_owner(&billing, Some("cus_1")).await;
    let mut subscription = SubscriptionRecord::new(owner_id, "sub_1", "pro");
    subscription.next_due_date = Some(Utc::now().date_naive() + Duration::days(9));
    store.insert_subscription(&subscription).await.unwrap();

    let cancelled = billing
        .subscriptions()
        .cancel(subscription.id)
        .await
        .unwrap();
    let grace_end = cancelled.ends_at.unwrap();

    // The gateway later reports the deletion; the grace period must not move.
    let body = serde_json::to_vec(&json!({
        "event": "SUBSCRIPTION_DELETED",
        "subscription": { "id": "sub_1", "status": "INACTIVE" }
    }))
    .unwrap();
    let reply = billing.handle_webhook(&body).await;
    assert!(matches!(reply, WebhookReply::Processed { .. }));

    let stored = store
        .find_subscription(subscription.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.ends_at, Some(grace_end));
    assert!(stored.on_grace_period());
}

#[tokio::test]
async fn webhook_bodies_that_cannot_be_classified_are_malformed() {
    let server = mockito::Server::new_async().await;
    let (billing, _) = billing_against(&server).await;

    let reply = billing.handle_webhook(b"{\"payment\":{\"id\":\"pay_1\"}}").await;
    assert_eq!(reply, WebhookReply::Malformed("Missing event type".to_string()));

    let reply = billing.handle_webhook(b"!!not json!!").await;
    assert!(matches!(reply, WebhookReply::Malformed(_)));
}

#[tokio::test]
async fn unknown_webhook_events_are_acknowledged_without_state_changes() {
    let server = mockito::Server::new_async().await;
    let (billing, _) = billing_against(&server).await;

    let body = serde_json::to_vec(&json!({ "event": "TRANSFER_CREATED", "transfer": {} })).unwrap();
    let reply = billing.handle_webhook(&body).await;
    assert_eq!(
        reply,
        WebhookReply::Ignored {
            event: "TRANSFER_CREATED".to_string()
        }
    );
}

// ---------------------------------------------------------------------------
// Hosted checkout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn checkout_session_url_points_at_the_hosted_page() {
    let mut server = mockito::Server::new_async().await;
    let _checkout_mock = server
        .mock("POST", "/checkouts")
        .match_body(Matcher::PartialJson(json!({ "customer": "cus_1" })))
        .with_status(200)
        .with_body(r#"{"id":"chk_1","status":"ACTIVE"}"#)
        .create_async()
        .await;

    let (billing, _) = billing_against(&server).await;
    let owner_id = seed_owner(&billing, Some("cus_1")).await;

    let session = billing
        .billable(owner_id)
        .checkout()
        .item(crate::CheckoutItem::new("Plano Pro", Decimal::new(4990, 2)))
        .create()
        .await
        .unwrap();

    assert_eq!(session.id, "chk_1");
    assert_eq!(
        session.url(),
        "https://sandbox.asaas.com/checkoutSession/show?id=chk_1"
    );
}

// ---------------------------------------------------------------------------
// Fiscal invoices
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scheduled_invoice_is_completed_by_the_authorization_event() {
    let mut server = mockito::Server::new_async().await;
    let _invoice_mock = server
        .mock("POST", "/invoices")
        .match_body(Matcher::PartialJson(json!({ "payment": "pay_1" })))
        .with_status(200)
        .with_body(r#"{"id":"inv_1","status":"SCHEDULED","value":150.0}"#)
        .create_async()
        .await;

    let (billing, store) = billing_against(&server).await;
    let owner_id = seed_owner(&billing, Some("cus_1")).await;
    let mut payment = PaymentRecord::new("pay_1", Decimal::new(15000, 2));
    payment.owner_id = Some(owner_id);
    store.insert_payment(&payment).await.unwrap();

    let invoice = billing
        .invoices()
        .schedule_for_payment(
            payment.id,
            crate::InvoiceParams::new(
                "Assinatura mensal",
                Decimal::new(15000, 2),
                Utc::now().date_naive(),
            ),
        )
        .await
        .unwrap();
    assert_eq!(invoice.gateway_id, "inv_1");
    assert!(!invoice.is_authorized());

    let mut events = billing.subscribe();
    let body = serde_json::to_vec(&json!({
        "event": "INVOICE_AUTHORIZED",
        "invoice": {
            "id": "inv_1",
            "status": "AUTHORIZED",
            "number": "2026-000042",
            "validationCode": "f00d",
            "pdfUrl": "https://sandbox.asaas.com/nota.pdf"
        }
    }))
    .unwrap();
    let reply = billing.handle_webhook(&body).await;
    assert!(matches!(reply, WebhookReply::Processed { .. }));

    let stored = billing.invoices().find(invoice.id).await.unwrap().unwrap();
    assert!(stored.is_authorized());
    assert_eq!(stored.number.as_deref(), Some("2026-000042"));
    assert!(stored.pdf_url.is_some());

    assert_eq!(events.try_recv().unwrap().kind(), "WebhookReceived");
    assert_eq!(events.try_recv().unwrap().kind(), "InvoiceAuthorized");
}
