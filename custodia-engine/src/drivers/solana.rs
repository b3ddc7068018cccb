//! The Solana SPL-token driver (section 4.5): submits an SPL-token transfer
//! (creating the payee's associated token account first if needed) to a
//! configured RPC endpoint, then polls the resulting signature for
//! finalization. A signature that hasn't landed on-chain yet is treated as
//! still-pending for a bounded window rather than a terminal failure.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use custodia_api::rest::RestClient;
use custodia_api_core::error::{EngineApiError, EngineErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authorization::AuthorizationLedger;
use crate::ledger::LedgerGateway;
use crate::payment::AuthenticatedPaymentState;

use super::{CustodianDriver, PollOutcome};

/// How long a submitted signature may stay missing from the RPC's view
/// before the driver gives up and reports a terminal failure.
pub const MISSING_SIGNATURE_WINDOW: Duration = Duration::from_secs(120);

pub struct SolanaConfig {
    pub rpc_url: String,
    pub mint: String,
    pub fee_payer: String,
}

pub struct SolanaDriver {
    http: RestClient,
    config: SolanaConfig,
    ledger: LedgerGateway,
    authz: AuthorizationLedger,
    /// First-seen time for each payment's current signature, keyed by
    /// document id, used to bound the missing-from-chain grace window. A
    /// single driver instance is shared across every payment routed to this
    /// custodian, so this can't be a single instance-level timer — concurrent
    /// polls of different payments would stomp each other's clock.
    first_polled_at: Mutex<HashMap<Uuid, Instant>>,
}

impl SolanaDriver {
    pub fn new(
        http: RestClient,
        config: SolanaConfig,
        ledger: LedgerGateway,
        authz: AuthorizationLedger,
    ) -> Self {
        Self {
            http,
            config,
            ledger,
            authz,
            first_polled_at: Mutex::new(HashMap::new()),
        }
    }
}

#[derive(Serialize)]
struct RpcRequest<'a, T> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: T,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    message: String,
}

#[derive(Deserialize)]
struct SignatureStatusResult {
    value: Vec<Option<SignatureStatus>>,
}

#[derive(Deserialize)]
struct SignatureStatus {
    confirmation_status: Option<String>,
    err: Option<serde_json::Value>,
}

#[async_trait]
impl CustodianDriver for SolanaDriver {
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
        let req = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "sendTransaction",
            params: serde_json::json!([{
                "mint": self.config.mint,
                "feePayer": self.config.fee_payer,
                "destination": state.details.to,
                "amount": state.details.amount.to_string(),
                "createAtaIfMissing": true,
            }]),
        };
        let resp: RpcResponse<String> = self.http.send(self.http.post(self.config.rpc_url.clone(), &req)).await?;
        if let Some(err) = resp.error {
            return Err(EngineApiError::new(EngineErrorKind::CustodianTerminal, err.message));
        }
        let signature = resp.result.ok_or_else(|| {
            EngineApiError::new(
                EngineErrorKind::CustodianTransient,
                "solana sendTransaction returned no signature",
            )
        })?;
        self.first_polled_at
            .lock()
            .unwrap()
            .insert(state.document_id, Instant::now());
        Ok(Some(signature))
    }

    async fn poll(&self, state: &AuthenticatedPaymentState) -> Result<PollOutcome, EngineApiError> {
        let signature = state.external_id.clone().ok_or_else(|| {
            EngineApiError::new(
                EngineErrorKind::Server,
                "solana poll called without a signature",
            )
        })?;

        let req = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "getSignatureStatuses",
            params: serde_json::json!([[signature], {"searchTransactionHistory": true}]),
        };
        let resp: RpcResponse<SignatureStatusResult> =
            self.http.send(self.http.post(self.config.rpc_url.clone(), &req)).await?;
        if let Some(err) = resp.error {
            return Err(EngineApiError::new(EngineErrorKind::CustodianTransient, err.message));
        }
        let status = resp
            .result
            .and_then(|r| r.value.into_iter().next())
            .flatten();

        let outcome = match status {
            None => {
                let mut timers = self.first_polled_at.lock().unwrap();
                let since = *timers
                    .entry(state.document_id)
                    .or_insert_with(Instant::now);
                if since.elapsed() > MISSING_SIGNATURE_WINDOW {
                    PollOutcome::TerminalFailure
                } else {
                    PollOutcome::StillPending
                }
            }
            Some(status) if status.err.is_some() => PollOutcome::TerminalFailure,
            Some(status) => match status.confirmation_status.as_deref() {
                Some("finalized") => PollOutcome::Success,
                _ => PollOutcome::StillPending,
            },
        };
        if matches!(outcome, PollOutcome::Success | PollOutcome::TerminalFailure) {
            self.first_polled_at.lock().unwrap().remove(&state.document_id);
        }
        Ok(outcome)
    }
}
