use super::{
    razorpay::error_from_response, GatewayError, GatewayKind, PaymentGateway, PaymentRequest,
    PaymentSession,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Stripe PaymentIntents API client.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    id: String,
    client_secret: Option<String>,
}

/// One key per order, so replays return the same intent.
pub fn idempotency_key(request: &PaymentRequest) -> String {
    format!("order-{}", request.order_id)
}

impl StripeGateway {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Stripe
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentSession, GatewayError> {
        let form = [
            ("amount", request.amount_minor.to_string()),
            ("currency", request.currency.to_ascii_lowercase()),
            ("metadata[order_id]", request.order_id.to_string()),
            ("metadata[user_id]", request.user_id.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key(request))
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let intent: PaymentIntentResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let client_secret = intent.client_secret.ok_or_else(|| {
            GatewayError::InvalidResponse("payment intent has no client_secret".to_string())
        })?;
        debug!(payment_intent_id = %intent.id, "Stripe payment intent created");

        Ok(PaymentSession::Stripe {
            payment_intent_id: intent.id,
            client_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> StripeGateway {
        StripeGateway::new(server.uri(), "sk_test_123", Duration::from_secs(5)).unwrap()
    }

    fn request() -> PaymentRequest {
        PaymentRequest {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            amount_minor: 1550,
            currency: "USD".to_string(),
        }
    }

    #[tokio::test]
    async fn creates_intent_with_metadata_and_idempotency_key() {
        let server = MockServer::start().await;
        let req = request();

        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(header("authorization", "Bearer sk_test_123"))
            .and(header("idempotency-key", idempotency_key(&req).as_str()))
            .and(body_string_contains("amount=1550"))
            .and(body_string_contains("currency=usd"))
            .and(body_string_contains(req.order_id.to_string().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_123",
                "object": "payment_intent",
                "client_secret": "pi_123_secret_abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = gateway(&server).create_payment(&req).await.unwrap();
        assert_eq!(
            session,
            PaymentSession::Stripe {
                payment_intent_id: "pi_123".into(),
                client_secret: "pi_123_secret_abc".into(),
            }
        );
    }

    #[tokio::test]
    async fn missing_client_secret_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_123"
            })))
            .mount(&server)
            .await;

        let err = gateway(&server).create_payment(&request()).await.unwrap_err();
        assert_matches!(err, GatewayError::InvalidResponse(_));
    }

    #[tokio::test]
    async fn server_error_is_reported_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = gateway(&server).create_payment(&request()).await.unwrap_err();
        assert_matches!(err, GatewayError::Status { status: 503, .. });
    }
}
