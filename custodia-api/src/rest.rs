//! A thin REST client used by the custodian drivers (section 4.5) to talk
//! to Bitflyer/Gemini/Uphold/Zebpay over HTTPS, and by the ledger/KMS
//! backend adapters. Retries use the same exponential backoff shape as the
//! rest of the workspace.

use std::time::Duration;

use custodia_api_core::error::{EngineApiError, EngineErrorKind};
use custodia_std::backoff;
use reqwest::{IntoUrl, Method};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

pub const GET: Method = Method::GET;
pub const POST: Method = Method::POST;
pub const PUT: Method = Method::PUT;

pub const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A generic REST client used for outbound calls to custodian APIs.
#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    /// Identifies the caller in the user agent header, e.g. "custodia-engine".
    from: String,
}

impl RestClient {
    pub fn new(from: impl Into<String>) -> Self {
        let from = from.into();
        let client = reqwest::Client::builder()
            .user_agent(from.clone())
            .https_only(true)
            .timeout(API_REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build reqwest Client");
        Self { client, from }
    }

    #[inline]
    pub fn get<U, T>(&self, url: U, query: &T) -> reqwest::RequestBuilder
    where
        U: IntoUrl,
        T: Serialize + ?Sized,
    {
        self.builder(GET, url).query(query)
    }

    #[inline]
    pub fn post<U, T>(&self, url: U, body: &T) -> reqwest::RequestBuilder
    where
        U: IntoUrl,
        T: Serialize + ?Sized,
    {
        self.builder(POST, url).json(body)
    }

    #[inline]
    pub fn put<U, T>(&self, url: U, body: &T) -> reqwest::RequestBuilder
    where
        U: IntoUrl,
        T: Serialize + ?Sized,
    {
        self.builder(PUT, url).json(body)
    }

    pub fn builder(
        &self,
        method: Method,
        url: impl IntoUrl,
    ) -> reqwest::RequestBuilder {
        self.client.request(method, url)
    }

    /// Sends the request and JSON-deserializes a successful response.
    /// Non-2xx responses are classified per section 4.5's error mapping:
    /// 5xx -> `CustodianTransient`, 4xx -> `CustodianTerminal`.
    pub async fn send<T: DeserializeOwned>(
        &self,
        request_builder: reqwest::RequestBuilder,
    ) -> Result<T, EngineApiError> {
        let bytes = self.send_bytes(request_builder).await?;
        serde_json::from_slice(&bytes).map_err(EngineApiError::from)
    }

    /// Sends the request, retrying transient failures with exponential
    /// backoff, up to `retries` additional attempts.
    pub async fn send_with_retries<T: DeserializeOwned>(
        &self,
        request_builder: reqwest::RequestBuilder,
        retries: usize,
    ) -> Result<T, EngineApiError> {
        let request = request_builder
            .build()
            .map_err(|e| EngineApiError::new(EngineErrorKind::Server, e))?;

        let mut backoff_durations = backoff::get_backoff_iter();
        let mut last_err = None;
        for attempt in 0..=retries {
            let request_clone = match request.try_clone() {
                Some(r) => r,
                None if attempt == 0 => request
                    .try_clone()
                    .expect("first attempt always clones the original"),
                None => break,
            };
            match self.send_bytes_request(request_clone).await {
                Ok(bytes) =>
                    return serde_json::from_slice(&bytes)
                        .map_err(EngineApiError::from),
                Err(err) if err.kind == EngineErrorKind::CustodianTransient => {
                    last_err = Some(err);
                    if attempt < retries {
                        tokio::time::sleep(backoff_durations.next().unwrap())
                            .await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            EngineApiError::new(
                EngineErrorKind::CustodianTransient,
                "retries exhausted",
            )
        }))
    }

    async fn send_bytes(
        &self,
        request_builder: reqwest::RequestBuilder,
    ) -> Result<bytes::Bytes, EngineApiError> {
        let request = request_builder
            .build()
            .map_err(|e| EngineApiError::new(EngineErrorKind::Server, e))?;
        self.send_bytes_request(request).await
    }

    async fn send_bytes_request(
        &self,
        request: reqwest::Request,
    ) -> Result<bytes::Bytes, EngineApiError> {
        debug!(target: "custodia_api::rest", url = %request.url(), "sending request");

        let resp = self.client.execute(request).await.map_err(|e| {
            warn!(target: "custodia_api::rest", "request failed: {e:#}");
            if e.is_timeout() {
                EngineApiError::new(EngineErrorKind::Timeout, e)
            } else {
                EngineApiError::new(EngineErrorKind::CustodianTransient, e)
            }
        })?;

        let status = resp.status();
        if status.is_success() {
            resp.bytes()
                .await
                .map_err(|e| EngineApiError::new(EngineErrorKind::Decode, e))
        } else if status.is_server_error() {
            let body = resp.text().await.unwrap_or_default();
            Err(EngineApiError::new(
                EngineErrorKind::CustodianTransient,
                format!("{status}: {body}"),
            ))
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(EngineApiError::new(
                EngineErrorKind::CustodianTerminal,
                format!("{status}: {body}"),
            ))
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.from
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builds_client_without_panicking() {
        let _client = RestClient::new("custodia-engine");
    }
}
