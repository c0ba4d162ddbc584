use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::{Client, Method, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Credentials attached to an outbound request.
#[derive(Clone, Copy)]
pub enum RequestAuth<'a> {
    None,
    Basic { username: &'a str, password: &'a str },
}

/// Thin wrapper over `reqwest` shared by the gateway and ERP adapters.
///
/// Transport failures become [`PaymentError::NetworkError`]; HTTP failures become
/// [`PaymentError::ProviderError`] tagged with the upstream name and status code.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    provider: &'static str,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            provider,
            timeout,
            max_retries,
        })
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// Build a URL with query parameters, percent-encoded.
    pub fn url_with_params(&self, base: &str, params: &[(&str, &str)]) -> PaymentResult<Url> {
        Url::parse_with_params(base, params).map_err(|e| PaymentError::ProviderError {
            provider: self.provider.to_string(),
            message: format!("invalid endpoint URL: {}", e),
            provider_code: None,
            retryable: false,
        })
    }

    pub fn url(&self, raw: &str) -> PaymentResult<Url> {
        Url::parse(raw).map_err(|e| PaymentError::ProviderError {
            provider: self.provider.to_string(),
            message: format!("invalid endpoint URL: {}", e),
            provider_code: None,
            retryable: false,
        })
    }

    /// Send a request and return the raw response when the status is 2xx.
    ///
    /// Connection errors and 5xx answers are retried up to `max_retries` times with
    /// exponential backoff.
    pub async fn send(
        &self,
        method: Method,
        url: Url,
        auth: RequestAuth<'_>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<Response> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url.clone());
            request = request.timeout(self.timeout);

            if let RequestAuth::Basic { username, password } = auth {
                request = request.basic_auth(username, Some(password));
            }
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }

                    let text = resp.text().await.unwrap_or_default();
                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            provider = self.provider,
                            status = %status,
                            attempt = attempt + 1,
                            "upstream server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(PaymentError::ProviderError {
                        provider: self.provider.to_string(),
                        message: format!("HTTP {}: {}", status, truncate(&text, 512)),
                        provider_code: Some(status.as_u16().to_string()),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    // The URL can carry credentials as query parameters.
                    last_error = Some(PaymentError::NetworkError {
                        message: format!("{} request failed: {}", self.provider, e.without_url()),
                    });
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(PaymentError::NetworkError {
            message: format!("{} request failed", self.provider),
        }))
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        auth: RequestAuth<'_>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let response = self
            .send(method, url, auth, body, additional_headers)
            .await?;
        self.read_json(response).await
    }

    pub async fn read_json<T: DeserializeOwned>(&self, response: Response) -> PaymentResult<T> {
        let text = response
            .text()
            .await
            .map_err(|e| PaymentError::NetworkError {
                message: format!(
                    "{} response body could not be read: {}",
                    self.provider,
                    e.without_url()
                ),
            })?;
        serde_json::from_str::<T>(&text).map_err(|e| PaymentError::ProviderError {
            provider: self.provider.to_string(),
            message: format!("invalid JSON response: {}", e),
            provider_code: None,
            retryable: false,
        })
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Status code carried by a `ProviderError`, if any.
pub fn provider_status(error: &PaymentError) -> Option<u16> {
    match error {
        PaymentError::ProviderError { provider_code, .. } => {
            provider_code.as_deref().and_then(|c| c.parse().ok())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_with_params_encodes_values() {
        let client = PaymentHttpClient::new("gateway", Duration::from_secs(1), 0).unwrap();
        let url = client
            .url_with_params(
                "https://gateway.test/register.do",
                &[("returnUrl", "https://shop.test/ok?x=1&y=2")],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://gateway.test/register.do?returnUrl=https%3A%2F%2Fshop.test%2Fok%3Fx%3D1%26y%3D2"
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn provider_status_reads_code() {
        let err = PaymentError::ProviderError {
            provider: "erp".to_string(),
            message: "HTTP 400".to_string(),
            provider_code: Some("400".to_string()),
            retryable: false,
        };
        assert_eq!(provider_status(&err), Some(400));
        assert_eq!(
            provider_status(&PaymentError::NetworkError {
                message: "timeout".to_string()
            }),
            None
        );
    }

    #[tokio::test]
    async fn unreachable_host_maps_to_network_error() {
        let client = PaymentHttpClient::new("gateway", Duration::from_millis(200), 0).unwrap();
        let url = client.url("http://127.0.0.1:9/register.do").unwrap();
        let err = client
            .send(Method::GET, url, RequestAuth::None, None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::NetworkError { .. }));
    }
}
