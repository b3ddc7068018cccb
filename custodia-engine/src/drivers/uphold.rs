//! The Uphold driver (section 4.5): create a card transaction, then commit
//! it; a committed transaction with `status=completed` is paid.

use async_trait::async_trait;
use custodia_api::rest::RestClient;
use custodia_api_core::error::{EngineApiError, EngineErrorKind};
use serde::{Deserialize, Serialize};

use crate::authorization::AuthorizationLedger;
use crate::ledger::LedgerGateway;
use crate::payment::AuthenticatedPaymentState;

use super::{CustodianDriver, PollOutcome};

pub struct UpholdConfig {
    pub base_url: String,
    pub card_id: String,
}

pub struct UpholdDriver {
    http: RestClient,
    config: UpholdConfig,
    ledger: LedgerGateway,
    authz: AuthorizationLedger,
}

impl UpholdDriver {
    pub fn new(
        http: RestClient,
        config: UpholdConfig,
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
struct CreateTransactionRequest {
    denomination: Denomination,
    destination: String,
}

#[derive(Serialize)]
struct Denomination {
    amount: String,
    currency: String,
}

#[derive(Deserialize)]
struct TransactionResponse {
    id: String,
    status: String,
}

#[async_trait]
impl CustodianDriver for UpholdDriver {
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
        let url = format!(
            "{}/v0/me/cards/{}/transactions",
            self.config.base_url, self.config.card_id
        );
        let req = CreateTransactionRequest {
            denomination: Denomination {
                amount: state.details.amount.to_string(),
                currency: state.details.currency.clone(),
            },
            destination: state.details.to.clone(),
        };
        let resp: TransactionResponse = self.http.send(self.http.post(url, &req)).await?;
        Ok(Some(resp.id))
    }

    async fn poll(&self, state: &AuthenticatedPaymentState) -> Result<PollOutcome, EngineApiError> {
        let tx_id = state.external_id.clone().ok_or_else(|| {
            EngineApiError::new(
                EngineErrorKind::Server,
                "uphold poll called without a transaction id",
            )
        })?;
        let url = format!(
            "{}/v0/me/cards/{}/transactions/{}/commit",
            self.config.base_url, self.config.card_id, tx_id
        );
        let resp: TransactionResponse = self
            .http
            .send(self.http.post(url, &serde_json::json!({})))
            .await?;

        Ok(match resp.status.as_str() {
            "completed" => PollOutcome::Success,
            "pending" | "processing" => PollOutcome::StillPending,
            _ => PollOutcome::TerminalFailure,
        })
    }
}
