//! The Gemini driver (section 4.5): bulk pay submit, client/tx-ref status
//! poll.

use async_trait::async_trait;
use custodia_api::rest::RestClient;
use custodia_api_core::error::{EngineApiError, EngineErrorKind};
use serde::{Deserialize, Serialize};

use crate::authorization::AuthorizationLedger;
use crate::ledger::LedgerGateway;
use crate::payment::AuthenticatedPaymentState;

use super::{CustodianDriver, PollOutcome};

pub struct GeminiConfig {
    pub base_url: String,
    pub client_id: String,
}

pub struct GeminiDriver {
    http: RestClient,
    config: GeminiConfig,
    ledger: LedgerGateway,
    authz: AuthorizationLedger,
}

impl GeminiDriver {
    pub fn new(
        http: RestClient,
        config: GeminiConfig,
        ledger: LedgerGateway,
        authz: AuthorizationLedger,
    ) -> Self {
        Self {
            http,
            config,
            ledger,
            authz,
        }
    }
}

#[derive(Serialize)]
struct BulkPayRequest {
    payments: Vec<PaymentEntry>,
}

#[derive(Serialize)]
struct PaymentEntry {
    tx_ref: String,
    amount: String,
    currency: String,
    destination: String,
}

#[derive(Deserialize)]
struct BulkPayResponse {
    result: String,
    payments: Vec<PaymentResult>,
}

#[derive(Deserialize)]
struct PaymentResult {
    tx_ref: String,
    status: Option<String>,
}

#[derive(Deserialize)]
struct PaymentStatusResponse {
    result: String,
    status: Option<String>,
}

#[async_trait]
impl CustodianDriver for GeminiDriver {
    fn ledger(&self) -> &LedgerGateway {
        &self.ledger
    }

    fn authorizations(&self) -> &AuthorizationLedger {
        &self.authz
    }

    async fn submit(
        &self,
        state: &AuthenticatedPaymentState,
    ) -> Result<Option<String>, EngineApiError> {
        let tx_ref = state.details.payout_id.clone();
        let url = format!("{}/v1/payments/bulkPay", self.config.base_url);
        let req = BulkPayRequest {
            payments: vec![PaymentEntry {
                tx_ref: tx_ref.clone(),
                amount: state.details.amount.to_string(),
                currency: state.details.currency.clone(),
                destination: state.details.to.clone(),
            }],
        };
        let resp: BulkPayResponse = self.http.send(self.http.post(url, &req)).await?;
        if resp.result != "ok" {
            return Err(EngineApiError::new(
                EngineErrorKind::CustodianTerminal,
                "gemini bulkPay returned result=error",
            ));
        }
        let _ = resp.payments.into_iter().find(|p| p.tx_ref == tx_ref);
        Ok(Some(tx_ref))
    }

    async fn poll(&self, state: &AuthenticatedPaymentState) -> Result<PollOutcome, EngineApiError> {
        let tx_ref = state.external_id.clone().ok_or_else(|| {
            EngineApiError::new(
                EngineErrorKind::Server,
                "gemini poll called without a tx_ref",
            )
        })?;
        let url = format!(
            "{}/v1/payment/{}/{}",
            self.config.base_url, self.config.client_id, tx_ref
        );
        let resp: PaymentStatusResponse =
            self.http.send(self.http.post(url, &())).await?;

        if resp.result == "error" {
            return Ok(PollOutcome::TerminalFailure);
        }
        match resp.status.as_deref() {
            Some("success") | Some("ok") => Ok(PollOutcome::Success),
            Some("pending") | None => Ok(PollOutcome::StillPending),
            Some(_) => Ok(PollOutcome::TerminalFailure),
        }
    }
}
