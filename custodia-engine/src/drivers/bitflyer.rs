//! The Bitflyer driver (section 4.5): bulk withdraw-to-deposit-id submit
//! and status poll, with a bearer token fetched from the token endpoint
//! when the cached one expires.

use async_trait::async_trait;
use custodia_api_core::error::{EngineApiError, EngineErrorKind};
use custodia_api::rest::RestClient;
use serde::{Deserialize, Serialize};

use crate::authorization::AuthorizationLedger;
use crate::ledger::LedgerGateway;
use crate::payment::AuthenticatedPaymentState;

use super::{CustodianDriver, PollOutcome};

pub struct BitflyerConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
}

pub struct BitflyerDriver {
    http: RestClient,
    config: BitflyerConfig,
    ledger: LedgerGateway,
    authz: AuthorizationLedger,
}

impl BitflyerDriver {
    pub fn new(
        http: RestClient,
        config: BitflyerConfig,
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

    async fn access_token(&self) -> Result<String, EngineApiError> {
        #[derive(Serialize)]
        struct TokenRequest<'a> {
            client_id: &'a str,
            client_secret: &'a str,
            grant_type: &'static str,
        }
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let url = format!("{}/api/link/v1/token", self.config.base_url);
        let req = TokenRequest {
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
            grant_type: "client_credentials",
        };
        let resp: TokenResponse = self.http.send(self.http.post(url, &req)).await?;
        Ok(resp.access_token)
    }
}

#[derive(Serialize)]
struct BulkWithdrawRequest {
    withdrawals: Vec<Withdrawal>,
}

#[derive(Serialize)]
struct Withdrawal {
    currency_code: String,
    amount: String,
    deposit_id: String,
}

#[derive(Deserialize)]
struct BulkWithdrawResponse {
    withdrawals: Vec<WithdrawalResult>,
}

#[derive(Deserialize)]
struct WithdrawalResult {
    transfer_id: String,
    transfer_status: String,
}

#[derive(Serialize)]
struct BulkStatusRequest {
    transfer_ids: Vec<String>,
}

#[derive(Deserialize)]
struct BulkStatusResponse {
    withdrawals: Vec<WithdrawalResult>,
}

#[async_trait]
impl CustodianDriver for BitflyerDriver {
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
        let _token = self.access_token().await?;
        let url = format!(
            "{}/api/link/v1/coin/withdraw-to-deposit-id/bulk-request",
            self.config.base_url
        );
        let req = BulkWithdrawRequest {
            withdrawals: vec![Withdrawal {
                currency_code: state.details.currency.clone(),
                amount: state.details.amount.to_string(),
                deposit_id: state.details.to.clone(),
            }],
        };
        let resp: BulkWithdrawResponse = self.http.send(self.http.post(url, &req)).await?;
        let result = resp.withdrawals.into_iter().next().ok_or_else(|| {
            EngineApiError::new(
                EngineErrorKind::CustodianTerminal,
                "bitflyer bulk-request returned no withdrawals",
            )
        })?;
        match result.transfer_status.as_str() {
            "SUCCESS" | "EXECUTED" | "PENDING" => Ok(Some(result.transfer_id)),
            other => Err(EngineApiError::new(
                EngineErrorKind::CustodianTerminal,
                format!("bitflyer rejected withdrawal with status {other}"),
            )),
        }
    }

    async fn poll(&self, state: &AuthenticatedPaymentState) -> Result<PollOutcome, EngineApiError> {
        let transfer_id = state.external_id.clone().ok_or_else(|| {
            EngineApiError::new(
                EngineErrorKind::Server,
                "bitflyer poll called without a transfer id",
            )
        })?;
        let url = format!(
            "{}/api/link/v1/coin/withdraw-to-deposit-id/bulk-status",
            self.config.base_url
        );
        let req = BulkStatusRequest {
            transfer_ids: vec![transfer_id],
        };
        let resp: BulkStatusResponse = self.http.send(self.http.post(url, &req)).await?;
        let result = resp.withdrawals.into_iter().next().ok_or_else(|| {
            EngineApiError::new(
                EngineErrorKind::CustodianTransient,
                "bitflyer bulk-status returned no withdrawals",
            )
        })?;
        Ok(match result.transfer_status.as_str() {
            "EXECUTED" | "SUCCESS" => PollOutcome::Success,
            "PENDING" | "PROCESSING" => PollOutcome::StillPending,
            _ => PollOutcome::TerminalFailure,
        })
    }
}
