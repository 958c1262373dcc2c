//! Payment capability
//!
//! Injected into the coordinator. Payment is slow (bounded only by its
//! configured timeout) and non-idempotent: the coordinator never retries a
//! `pay` call, and a timeout is treated as failure.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::models::PaymentMethod;

/// Result of a payment attempt that reached the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Charge capability. `Err` means the provider was unreachable
/// (`PaymentUnavailable`); a decline is `Ok` with `ok == false`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn pay(
        &self,
        total_minor_units: i64,
        method: PaymentMethod,
        external_ref: &str,
    ) -> Result<PaymentOutcome, EngineError>;
}

/// Scriptable in-process gateway for tests and dev runs.
pub struct MockPaymentGateway {
    behavior: Mutex<MockBehavior>,
    calls: Mutex<u64>,
}

#[derive(Debug, Clone)]
pub enum MockBehavior {
    Approve,
    Decline(String),
    Unavailable,
}

impl MockPaymentGateway {
    pub fn approving() -> Self {
        Self {
            behavior: Mutex::new(MockBehavior::Approve),
            calls: Mutex::new(0),
        }
    }

    pub fn declining(reason: &str) -> Self {
        Self {
            behavior: Mutex::new(MockBehavior::Decline(reason.to_string())),
            calls: Mutex::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap_or_else(|e| e.into_inner()) = behavior;
    }

    pub fn calls(&self) -> u64 {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn pay(
        &self,
        total_minor_units: i64,
        _method: PaymentMethod,
        external_ref: &str,
    ) -> Result<PaymentOutcome, EngineError> {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        let behavior = self
            .behavior
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match behavior {
            MockBehavior::Approve => Ok(PaymentOutcome {
                ok: true,
                auth_code: Some(format!("AUTH-{}", &external_ref[..8.min(external_ref.len())])),
                error: None,
            }),
            MockBehavior::Decline(reason) => Ok(PaymentOutcome {
                ok: false,
                auth_code: None,
                error: Some(reason),
            }),
            MockBehavior::Unavailable => {
                tracing::warn!(total = total_minor_units, "Mock gateway simulating outage");
                Err(EngineError::PaymentUnavailable)
            }
        }
    }
}

/// HTTP payment provider adapter.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChargeRequest<'a> {
    amount: i64,
    method: PaymentMethod,
    reference: &'a str,
}

impl HttpPaymentGateway {
    pub fn new(url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn pay(
        &self,
        total_minor_units: i64,
        method: PaymentMethod,
        external_ref: &str,
    ) -> Result<PaymentOutcome, EngineError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&ChargeRequest {
                amount: total_minor_units,
                method,
                reference: external_ref,
            })
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Payment provider unreachable");
                EngineError::PaymentUnavailable
            })?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "Payment provider error response");
            return Err(EngineError::PaymentUnavailable);
        }

        response
            .json::<PaymentOutcome>()
            .await
            .map_err(|_| EngineError::PaymentUnavailable)
    }
}
