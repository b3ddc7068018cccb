//! The Zebpay driver (section 4.5): a signed bulk-transfer submit and a
//! simple status poll by id. Insufficient authorizations is treated as a
//! precondition error here, not a custodian error — enforced upstream by
//! [`crate::authorization::AuthorizationLedger`], not re-checked in this
//! driver.

use async_trait::async_trait;
use custodia_api::rest::RestClient;
use custodia_api_core::error::{EngineApiError, EngineErrorKind};
use serde::{Deserialize, Serialize};

use crate::authorization::AuthorizationLedger;
use crate::ledger::LedgerGateway;
use crate::payment::AuthenticatedPaymentState;

use super::{CustodianDriver, PollOutcome};

pub struct ZebpayConfig {
    pub base_url: String,
    /// Key id used to sign the bulk-transfer envelope through the KMS; the
    /// signature itself is produced the same way ledger revisions are
    /// signed (section 4.2), reusing the KMS rather than a bespoke HMAC.
    pub signing_key_id: String,
}

pub struct ZebpayDriver {
    http: RestClient,
    config: ZebpayConfig,
    kms: std::sync::Arc<dyn custodia_api_core::def::KmsClient>,
    ledger: LedgerGateway,
    authz: AuthorizationLedger,
}

impl ZebpayDriver {
    pub fn new(
        http: RestClient,
        config: ZebpayConfig,
        kms: std::sync::Arc<dyn custodia_api_core::def::KmsClient>,
        ledger: LedgerGateway,
        authz: AuthorizationLedger,
    ) -> Self {
        Self {
            http,
            config,
            kms,
            ledger,
            authz,
        }
    }
}

#[derive(Serialize)]
struct BulkTransferRequest {
    transfers: Vec<TransferEntry>,
    #[serde(with = "b64_signature")]
    signature: Vec<u8>,
}

#[derive(Serialize)]
struct TransferEntry {
    amount: String,
    currency: String,
    destination: String,
    reference: String,
}

#[derive(Deserialize)]
struct BulkTransferResponse {
    id: String,
}

#[derive(Deserialize)]
struct TransferStatusResponse {
    status: String,
}

mod b64_signature {
    use base64::Engine as _;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

#[async_trait]
impl CustodianDriver for ZebpayDriver {
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
        let transfer = TransferEntry {
            amount: state.details.amount.to_string(),
            currency: state.details.currency.clone(),
            destination: state.details.to.clone(),
            reference: state.details.payout_id.clone(),
        };
        let envelope = serde_json::to_vec(&transfer).map_err(EngineApiError::from)?;
        let signature = self
            .kms
            .sign(&self.config.signing_key_id, &envelope)
            .await?;

        let url = format!("{}/api/bulktransfer", self.config.base_url);
        let req = BulkTransferRequest {
            transfers: vec![transfer],
            signature,
        };
        let resp: BulkTransferResponse = self.http.send(self.http.post(url, &req)).await?;
        Ok(Some(resp.id))
    }

    async fn poll(&self, state: &AuthenticatedPaymentState) -> Result<PollOutcome, EngineApiError> {
        let id = state.external_id.clone().ok_or_else(|| {
            EngineApiError::new(
                EngineErrorKind::Server,
                "zebpay poll called without a transfer id",
            )
        })?;
        let url = format!("{}/api/checktransferstatus/{}/status", self.config.base_url, id);
        let resp: TransferStatusResponse = self.http.send(self.http.get(url, &())).await?;

        Ok(match resp.status.as_str() {
            "completed" | "success" => PollOutcome::Success,
            "pending" | "processing" => PollOutcome::StillPending,
            _ => PollOutcome::TerminalFailure,
        })
    }
}
