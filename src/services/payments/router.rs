use super::{GatewayError, GatewayKind, PaymentGateway, RazorpayGateway, StripeGateway};
use crate::{config::AppConfig, errors::ServiceError};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

/// Chooses the payment gateway for an order's currency.
///
/// INR goes to Razorpay and every other currency to Stripe. A caller may
/// prefer Stripe for any currency, but Razorpay only for INR.
#[derive(Clone, Default)]
pub struct PaymentGatewayRouter {
    razorpay: Option<Arc<dyn PaymentGateway>>,
    stripe: Option<Arc<dyn PaymentGateway>>,
}

impl PaymentGatewayRouter {
    pub fn new(
        razorpay: Option<Arc<dyn PaymentGateway>>,
        stripe: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        Self { razorpay, stripe }
    }

    /// Builds HTTP clients for every gateway that has credentials configured.
    pub fn from_config(config: &AppConfig) -> Result<Self, GatewayError> {
        let timeout = Duration::from_secs(config.payment_gateway_timeout_secs);

        let razorpay = match config.razorpay_credentials() {
            Some((key_id, key_secret)) => Some(Arc::new(RazorpayGateway::new(
                config.razorpay_base_url.clone(),
                key_id,
                key_secret,
                timeout,
            )?) as Arc<dyn PaymentGateway>),
            None => {
                warn!("Razorpay credentials not configured; INR checkout is disabled");
                None
            }
        };

        let stripe = match config.stripe_secret() {
            Some(secret) => Some(Arc::new(StripeGateway::new(
                config.stripe_base_url.clone(),
                secret,
                timeout,
            )?) as Arc<dyn PaymentGateway>),
            None => {
                warn!("Stripe secret key not configured; non-INR checkout is disabled");
                None
            }
        };

        info!(
            razorpay = razorpay.is_some(),
            stripe = stripe.is_some(),
            "Payment gateways configured"
        );
        Ok(Self::new(razorpay, stripe))
    }

    /// Pure selection rule, independent of what is configured.
    pub fn select_kind(
        currency: &str,
        preferred: Option<GatewayKind>,
    ) -> Result<GatewayKind, ServiceError> {
        let is_inr = currency.eq_ignore_ascii_case("INR");
        match preferred {
            Some(GatewayKind::Razorpay) if !is_inr => Err(ServiceError::ValidationError(format!(
                "razorpay only accepts INR payments, not {}",
                currency
            ))),
            Some(kind) => Ok(kind),
            None if is_inr => Ok(GatewayKind::Razorpay),
            None => Ok(GatewayKind::Stripe),
        }
    }

    pub fn route(
        &self,
        currency: &str,
        preferred: Option<GatewayKind>,
    ) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        let kind = Self::select_kind(currency, preferred)?;
        let gateway = match kind {
            GatewayKind::Razorpay => self.razorpay.clone(),
            GatewayKind::Stripe => self.stripe.clone(),
        };
        gateway.ok_or_else(|| {
            ServiceError::ServiceUnavailable(format!("{} payments are not configured", kind))
        })
    }
}
