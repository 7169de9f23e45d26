//! Server configuration from the environment

use std::collections::HashMap;

use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// Shared secret the gateway sends in the `asaas-access-token` header.
    /// Unset means webhook deliveries are accepted unauthenticated (local
    /// development only).
    pub webhook_token: Option<String>,
    /// Plan table, parsed from `BILLING_PLANS` ("pro=49.90,basic=19.90").
    pub plans: HashMap<String, Decimal>,
    pub checkout_success_url: Option<String>,
    pub checkout_cancel_url: Option<String>,
    pub checkout_expired_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
        let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
        let bind_addr = format!("0.0.0.0:{port}");
        let webhook_token = std::env::var("ASAAS_WEBHOOK_TOKEN").ok();
        if webhook_token.is_none() {
            tracing::warn!("ASAAS_WEBHOOK_TOKEN not set; webhook deliveries are unauthenticated");
        }

        let plans = match std::env::var("BILLING_PLANS") {
            Ok(raw) => parse_plans(&raw)?,
            Err(_) => HashMap::new(),
        };

        Ok(Self {
            database_url,
            bind_addr,
            webhook_token,
            plans,
            checkout_success_url: std::env::var("CHECKOUT_SUCCESS_URL").ok(),
            checkout_cancel_url: std::env::var("CHECKOUT_CANCEL_URL").ok(),
            checkout_expired_url: std::env::var("CHECKOUT_EXPIRED_URL").ok(),
        })
    }
}

fn parse_plans(raw: &str) -> anyhow::Result<HashMap<String, Decimal>> {
    let mut plans = HashMap::new();
    for entry in raw.split(',').filter(|e| !e.trim().is_empty()) {
        let (name, price) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("BILLING_PLANS entry '{entry}' is not name=price"))?;
        let price: Decimal = price
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("BILLING_PLANS price '{price}' is not a number"))?;
        plans.insert(name.trim().to_string(), price);
    }
    Ok(plans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_table_parses_name_price_pairs() {
        let plans = parse_plans("pro=49.90, basic=19.90").unwrap();
        assert_eq!(plans.get("pro"), Some(&Decimal::new(4990, 2)));
        assert_eq!(plans.get("basic"), Some(&Decimal::new(1990, 2)));
    }

    #[test]
    fn malformed_plan_entries_are_rejected() {
        assert!(parse_plans("pro:49.90").is_err());
        assert!(parse_plans("pro=very expensive").is_err());
    }
}
