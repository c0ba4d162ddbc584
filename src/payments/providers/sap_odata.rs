use crate::config::ErpConfig;
use crate::payments::erp::{ErpClient, ErpPaymentDocument, PendingAmount};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::parse_major_amount;
use crate::payments::utils::{provider_status, PaymentHttpClient, RequestAuth};
use async_trait::async_trait;
use reqwest::header::SET_COOKIE;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, info, instrument};

const DEFAULT_CURRENCY: &str = "012";

/// OData client for the ERP pending-amount and payment-lot services.
pub struct SapODataClient {
    config: ErpConfig,
    http: PaymentHttpClient,
}

/// Anti-forgery token and session cookies obtained from `$metadata`.
struct CsrfSession {
    token: String,
    cookies: String,
}

impl SapODataClient {
    pub fn new(config: ErpConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new("erp", Duration::from_secs(config.timeout_secs), 0)?;
        Ok(Self { config, http })
    }

    fn auth(&self) -> RequestAuth<'_> {
        if self.config.username.is_empty() {
            RequestAuth::None
        } else {
            RequestAuth::Basic {
                username: &self.config.username,
                password: &self.config.password,
            }
        }
    }

    fn endpoint(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }

    async fn fetch_csrf_session(&self) -> PaymentResult<CsrfSession> {
        let url = self
            .http
            .url(&Self::endpoint(&self.config.posting_base_url, "$metadata"))?;
        let response = self
            .http
            .send(
                reqwest::Method::GET,
                url,
                self.auth(),
                None,
                &[("X-CSRF-Token", "Fetch")],
            )
            .await
            .map_err(classify_erp_error)?;

        let token = response
            .headers()
            .get("x-csrf-token")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PaymentError::ProviderError {
                provider: "erp".to_string(),
                message: "ERP did not return an X-CSRF-Token".to_string(),
                provider_code: None,
                retryable: true,
            })?
            .to_string();

        let cookies = join_cookies(
            response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok()),
        );

        Ok(CsrfSession { token, cookies })
    }
}

/// Keep the `name=value` part of each `Set-Cookie` header and join them for a
/// `Cookie` request header.
fn join_cookies<'a>(set_cookies: impl Iterator<Item = &'a str>) -> String {
    set_cookies
        .filter_map(|c| c.split(';').next())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

/// ERP 4xx answers mean the document itself was refused. Auth, CSRF and throttling
/// answers are retryable.
fn classify_erp_error(error: PaymentError) -> PaymentError {
    match provider_status(&error) {
        Some(401 | 403 | 408 | 429) => match error {
            PaymentError::ProviderError {
                provider,
                message,
                provider_code,
                ..
            } => PaymentError::ProviderError {
                provider,
                message,
                provider_code,
                retryable: true,
            },
            other => other,
        },
        Some(status @ 400..=499) => PaymentError::ErpValidationError {
            status,
            message: error.to_string(),
        },
        _ => error,
    }
}

fn parse_pending_amount(raw: &JsonValue) -> PaymentResult<PendingAmount> {
    let invalid = || PaymentError::ProviderError {
        provider: "erp".to_string(),
        message: "Invalid ERP PendingAmount response".to_string(),
        provider_code: None,
        retryable: false,
    };

    let d = raw.get("d").ok_or_else(invalid)?;
    let amount = match d.get("EvAmount").ok_or_else(invalid)? {
        JsonValue::String(s) => parse_major_amount(s).map_err(|_| invalid())?,
        JsonValue::Number(n) => parse_major_amount(&n.to_string()).map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    let currency = d
        .get("EvWaers")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_CURRENCY)
        .to_string();

    Ok(PendingAmount { amount, currency })
}

#[async_trait]
impl ErpClient for SapODataClient {
    #[instrument(skip(self))]
    async fn fetch_pending_amount(&self, order_number: &str) -> PaymentResult<PendingAmount> {
        let url = self.http.url(&Self::endpoint(
            &self.config.pending_amount_base_url,
            &format!("PendingAmountSet('{}')?$format=json", order_number),
        ))?;

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                url,
                self.auth(),
                None,
                &[("Accept", "application/json")],
            )
            .await
            .map_err(classify_erp_error)?;

        let pending = parse_pending_amount(&raw)?;
        debug!(amount = %pending.amount, currency = %pending.currency, "ERP pending amount");
        Ok(pending)
    }

    #[instrument(skip(self, document), fields(invoice = %document.invoice_number))]
    async fn post_payment(&self, document: &ErpPaymentDocument) -> PaymentResult<JsonValue> {
        let session = self.fetch_csrf_session().await?;
        let body = serde_json::to_value(document).map_err(|e| PaymentError::ProviderError {
            provider: "erp".to_string(),
            message: format!("document serialization failed: {}", e),
            provider_code: None,
            retryable: false,
        })?;

        let url = self
            .http
            .url(&Self::endpoint(&self.config.posting_base_url, "PaymentLotSet"))?;
        let mut headers = vec![
            ("X-CSRF-Token", session.token.as_str()),
            ("Accept", "application/json"),
        ];
        if !session.cookies.is_empty() {
            headers.push(("Cookie", session.cookies.as_str()));
        }

        let response = self
            .http
            .send(reqwest::Method::POST, url, self.auth(), Some(&body), &headers)
            .await
            .map_err(classify_erp_error)?;

        let text = response.text().await.map_err(|e| PaymentError::NetworkError {
            message: format!("erp response body could not be read: {}", e.without_url()),
        })?;
        let answer = if text.trim().is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
        };

        info!("ERP accepted payment lot");
        Ok(answer)
    }

    fn name(&self) -> &'static str {
        "sap_odata"
    }
}
