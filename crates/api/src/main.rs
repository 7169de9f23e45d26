#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Asaas billing webhook server
//!
//! Hosts the webhook endpoint the gateway delivers billing events to, backed
//! by the Postgres record store.

mod config;
mod routes;
mod state;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use asaas_billing::{AsaasConfig, BillingConfig, BillingService, PgStore};

use crate::{config::Config, routes::create_router, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,asaas_billing=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting billing server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let store = PgStore::new(pool);
    store.ensure_schema().await?;
    tracing::info!("Database connection established");

    let mut billing_config = BillingConfig::new();
    for (plan, price) in &config.plans {
        billing_config = billing_config.with_plan(plan.clone(), *price);
    }
    if let (Some(success), Some(cancel), Some(expired)) = (
        &config.checkout_success_url,
        &config.checkout_cancel_url,
        &config.checkout_expired_url,
    ) {
        billing_config =
            billing_config.with_checkout_urls(success.as_str(), cancel.as_str(), expired.as_str());
    }

    let billing = Arc::new(BillingService::new(
        AsaasConfig::from_env()?,
        Arc::new(store),
        billing_config,
    ));

    // Log the notification stream; applications embedding the library hang
    // their own side effects off the same channel.
    let mut events = billing.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::info!(kind = event.kind(), "Billing event");
        }
    });

    let app = create_router(AppState {
        billing,
        webhook_token: config.webhook_token.clone(),
    })
    .layer(TraceLayer::new_for_http());

    tracing::info!(addr = %config.bind_addr, "Listening");
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
