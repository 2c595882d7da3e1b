use super::{GatewayError, GatewayKind, PaymentGateway, PaymentRequest, PaymentSession};
use crate::entities::order;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const MAX_ERROR_BODY: usize = 512;

/// Razorpay Orders API client.
#[derive(Clone)]
pub struct RazorpayGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: String,
    notes: OrderNotes,
}

#[derive(Debug, Serialize)]
struct OrderNotes {
    order_id: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    id: String,
}

pub(super) async fn error_from_response(response: reqwest::Response) -> GatewayError {
    let status = response.status().as_u16();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    GatewayError::Status { status, body }
}

impl RazorpayGateway {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Razorpay
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentSession, GatewayError> {
        let body = CreateOrderBody {
            amount: request.amount_minor,
            currency: &request.currency,
            receipt: request.order_id.to_string(),
            notes: OrderNotes {
                order_id: request.order_id.to_string(),
                user_id: request.user_id.to_string(),
            },
        };

        let response = self
            .client
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let created: CreateOrderResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        debug!(gateway_order_id = %created.id, "Razorpay order created");

        Ok(PaymentSession::Razorpay {
            gateway_order_id: created.id,
        })
    }

    /// A Razorpay order can be paid from its id alone, so a stored id is reused.
    fn resume(&self, order: &order::Model) -> Option<PaymentSession> {
        order
            .razorpay_order_id
            .clone()
            .map(|gateway_order_id| PaymentSession::Razorpay { gateway_order_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> RazorpayGateway {
        RazorpayGateway::new(server.uri(), "rzp_test_key", "rzp_test_secret", Duration::from_secs(5))
            .unwrap()
    }

    fn request() -> PaymentRequest {
        PaymentRequest {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            amount_minor: 2000,
            currency: "INR".to_string(),
        }
    }

    #[tokio::test]
    async fn creates_order_with_receipt_and_minor_amount() {
        let server = MockServer::start().await;
        let req = request();

        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .and(header_exists("authorization"))
            .and(body_partial_json(serde_json::json!({
                "amount": 2000,
                "currency": "INR",
                "receipt": req.order_id.to_string(),
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "order_Rz123",
                "entity": "order",
                "status": "created"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = gateway(&server).create_payment(&req).await.unwrap();
        assert_eq!(
            session,
            PaymentSession::Razorpay {
                gateway_order_id: "order_Rz123".into()
            }
        );
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let err = gateway(&server).create_payment(&request()).await.unwrap_err();
        assert_matches!(err, GatewayError::Status { status: 401, body } if body == "bad credentials");
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = gateway(&server).create_payment(&request()).await.unwrap_err();
        assert_matches!(err, GatewayError::InvalidResponse(_));
    }
}
