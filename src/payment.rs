use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::GatewaySettings;
use crate::engine::EngineError;
use crate::model::{Millimes, Payment, PaymentStatus, PaymentType};

/// ISO 4217 numeric code for the Tunisian dinar.
const CURRENCY_TND: &str = "788";

impl Payment {
    pub fn new(kind: PaymentType, percentage: u8) -> Self {
        Self {
            kind,
            percentage,
            paid_amount: 0,
            processing_amount: None,
            status: PaymentStatus::Pending,
        }
    }

    /// The share of `total` due up front.
    pub fn initial_amount(&self, total: Millimes) -> Millimes {
        let share = i128::from(total) * i128::from(self.percentage) / 100;
        Millimes::try_from(share).unwrap_or(total)
    }

    /// What the next gateway request should charge: the balance once partly
    /// paid, the up-front share otherwise.
    pub fn amount_due(&self, total: Millimes) -> Millimes {
        match self.status {
            PaymentStatus::PartiallyPaid => total.saturating_sub(self.paid_amount).max(0),
            _ => self.initial_amount(total),
        }
    }

    /// Apply a gateway success callback.
    pub fn settle(&mut self, total: Millimes) {
        let amount = self
            .processing_amount
            .take()
            .unwrap_or_else(|| self.initial_amount(total));
        if self.status == PaymentStatus::PartiallyPaid {
            self.paid_amount = self.paid_amount.saturating_add(amount);
        } else {
            self.paid_amount = amount;
        }
        self.status = if self.paid_amount >= total {
            PaymentStatus::Paid
        } else if self.paid_amount > 0 {
            PaymentStatus::PartiallyPaid
        } else {
            PaymentStatus::Pending
        };
    }

    /// Apply a gateway failure callback. A settled payment stays settled.
    pub fn fail(&mut self) {
        self.processing_amount = None;
        if self.status != PaymentStatus::Paid {
            self.status = PaymentStatus::Failed;
        }
    }
}

/// Hosted payment page provider. `order_ref` comes back on the success or
/// failure callback.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Returns the URL the customer is redirected to.
    async fn register_payment(&self, amount: Millimes, order_ref: &str)
    -> Result<String, EngineError>;
}

/// Used when no gateway is configured. Every registration fails.
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    async fn register_payment(&self, _amount: Millimes, order_ref: &str) -> Result<String, EngineError> {
        warn!(order_ref, "payment requested but no gateway is configured");
        Err(EngineError::Upstream("payment gateway not configured".into()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    form_url: Option<String>,
    error_message: Option<String>,
}

/// Register-order REST endpoint taking its parameters in the query string.
pub struct RestGateway {
    client: reqwest::Client,
    settings: GatewaySettings,
}

impl RestGateway {
    pub fn new(settings: GatewaySettings) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| EngineError::Upstream(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl PaymentGateway for RestGateway {
    async fn register_payment(&self, amount: Millimes, order_ref: &str) -> Result<String, EngineError> {
        let amount = amount.to_string();
        let params = [
            ("userName", self.settings.user.as_str()),
            ("password", self.settings.password.as_str()),
            ("amount", amount.as_str()),
            ("currency", CURRENCY_TND),
            ("orderNumber", order_ref),
            ("returnUrl", self.settings.return_url.as_str()),
            ("failUrl", self.settings.fail_url.as_str()),
            ("language", "en"),
            ("pageView", "DESKTOP"),
        ];
        let response = self
            .client
            .post(&self.settings.register_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| EngineError::Upstream(format!("gateway request failed: {e}")))?;
        let body: RegisterResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Upstream(format!("gateway response unreadable: {e}")))?;

        match body.form_url {
            Some(url) if !url.is_empty() => {
                debug!(order_ref, "gateway order registered");
                Ok(url)
            }
            _ => Err(EngineError::Upstream(
                body.error_message
                    .unwrap_or_else(|| "gateway returned no form URL".into()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_amount_uses_percentage() {
        let p = Payment::new(PaymentType::Online, 30);
        assert_eq!(p.initial_amount(200_000), 60_000);
        assert_eq!(Payment::new(PaymentType::Online, 100).initial_amount(200_000), 200_000);
    }

    #[test]
    fn extreme_totals_do_not_overflow() {
        let p = Payment::new(PaymentType::Online, 50);
        assert_eq!(p.initial_amount(Millimes::MAX), Millimes::MAX / 2);

        let mut p = Payment::new(PaymentType::Online, 100);
        p.status = PaymentStatus::PartiallyPaid;
        p.paid_amount = Millimes::MAX - 1;
        p.processing_amount = Some(10);
        p.settle(Millimes::MAX);
        assert_eq!(p.paid_amount, Millimes::MAX);
        assert_eq!(p.status, PaymentStatus::Paid);
    }

    #[test]
    fn full_payment_settles_to_paid() {
        let mut p = Payment::new(PaymentType::Online, 100);
        p.processing_amount = Some(p.amount_due(150_000));
        p.settle(150_000);
        assert_eq!(p.status, PaymentStatus::Paid);
        assert_eq!(p.paid_amount, 150_000);
        assert_eq!(p.processing_amount, None);
    }

    #[test]
    fn deposit_then_balance() {
        let total = 300_000;
        let mut p = Payment::new(PaymentType::Online, 50);
        p.processing_amount = Some(p.amount_due(total));
        p.settle(total);
        assert_eq!(p.status, PaymentStatus::PartiallyPaid);
        assert_eq!(p.paid_amount, 150_000);

        assert_eq!(p.amount_due(total), 150_000);
        p.processing_amount = Some(p.amount_due(total));
        p.settle(total);
        assert_eq!(p.status, PaymentStatus::Paid);
        assert_eq!(p.paid_amount, total);
    }

    #[test]
    fn settle_without_processing_amount_uses_percentage() {
        let mut p = Payment::new(PaymentType::Online, 30);
        p.settle(100_000);
        assert_eq!(p.paid_amount, 30_000);
        assert_eq!(p.status, PaymentStatus::PartiallyPaid);
    }

    #[test]
    fn zero_total_settles_paid() {
        let mut p = Payment::new(PaymentType::Online, 100);
        p.settle(0);
        assert_eq!(p.status, PaymentStatus::Paid);
    }

    #[test]
    fn failure_never_downgrades_paid() {
        let mut p = Payment::new(PaymentType::Online, 100);
        p.settle(10_000);
        p.processing_amount = Some(1);
        p.fail();
        assert_eq!(p.status, PaymentStatus::Paid);
        assert_eq!(p.processing_amount, None);

        let mut q = Payment::new(PaymentType::Online, 100);
        q.processing_amount = Some(10_000);
        q.fail();
        assert_eq!(q.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn disabled_gateway_is_upstream_failure() {
        let err = DisabledGateway.register_payment(1000, "abc").await.unwrap_err();
        assert_eq!(err.kind(), crate::engine::ErrorKind::Upstream);
    }
}
