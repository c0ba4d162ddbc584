use crate::config::GatewayConfig;
use crate::payments::error::PaymentResult;
use crate::payments::gateway::{
    interpret_register_response, CardGateway, RegisterOrder, RegisteredOrder,
};
use crate::payments::utils::{PaymentHttpClient, RequestAuth};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// REST client for the card gateway (`register.do`, `acknowledgeTransaction.do`).
///
/// Credentials travel as query parameters, which is what the gateway expects.
pub struct CardGatewayClient {
    config: GatewayConfig,
    http: PaymentHttpClient,
}

impl CardGatewayClient {
    pub fn new(config: GatewayConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "gateway",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn default_currency(&self) -> &str {
        &self.config.currency
    }

    pub fn default_language(&self) -> &str {
        &self.config.language
    }
}

#[async_trait]
impl CardGateway for CardGatewayClient {
    #[instrument(skip(self, order), fields(order_number = %order.order_number, amount = order.amount))]
    async fn register(&self, order: &RegisterOrder) -> PaymentResult<RegisteredOrder> {
        let amount = order.amount.to_string();
        let url = self.http.url_with_params(
            &self.config.register_url,
            &[
                ("userName", self.config.merchant_id.as_str()),
                ("password", self.config.password.as_str()),
                ("orderNumber", order.order_number.as_str()),
                ("amount", amount.as_str()),
                ("currency", order.currency.as_str()),
                ("returnUrl", order.return_url.as_str()),
                ("failUrl", order.fail_url.as_str()),
                ("language", order.language.as_str()),
            ],
        )?;

        let raw: JsonValue = self
            .http
            .request_json(reqwest::Method::GET, url, RequestAuth::None, None, &[])
            .await?;

        match interpret_register_response(&order.order_number, raw) {
            Ok(registered) => {
                info!(order_id = %registered.order_id, "gateway registered order");
                Ok(registered)
            }
            Err(e) => {
                warn!(error = %e, "gateway refused registration");
                Err(e)
            }
        }
    }

    #[instrument(skip(self))]
    async fn acknowledge(&self, order_id: &str) -> PaymentResult<JsonValue> {
        let url = self.http.url_with_params(
            &self.config.acknowledge_url,
            &[
                ("userName", self.config.merchant_id.as_str()),
                ("password", self.config.password.as_str()),
                ("orderId", order_id),
            ],
        )?;

        self.http
            .request_json(reqwest::Method::GET, url, RequestAuth::None, None, &[])
            .await
    }

    fn name(&self) -> &'static str {
        "card_gateway"
    }
}
