//! Builds one [`CustodianDriver`] per configured custodian and looks them up
//! by [`CustodianKind`] (section 4.5). Each driver gets its own
//! [`LedgerGateway`]/[`AuthorizationLedger`] pair; both are cheap to
//! construct since the underlying backend/KMS/HTTP handles are shared `Arc`
//! clones.

use std::collections::HashMap;
use std::sync::Arc;

use custodia_api::rest::RestClient;
use custodia_api_core::def::{KmsClient, LedgerBackend};
use custodia_api_core::error::EngineApiError;
use custodia_api_core::models::CustodianKind;
use custodia_engine::authorization::{AuthorizationLedger, MinAuthorizers};
use custodia_engine::drivers::bitflyer::{BitflyerConfig, BitflyerDriver};
use custodia_engine::drivers::gemini::{GeminiConfig, GeminiDriver};
use custodia_engine::drivers::solana::{SolanaConfig, SolanaDriver};
use custodia_engine::drivers::uphold::{UpholdConfig, UpholdDriver};
use custodia_engine::drivers::zebpay::{ZebpayConfig, ZebpayDriver};
use custodia_engine::drivers::DynDriver;
use custodia_engine::ledger::{LedgerGateway, SigningKey};
use uuid::Uuid;

use crate::config::Config;

/// Everything a fresh [`LedgerGateway`] needs, shared across every driver.
struct LedgerDeps {
    backend: Arc<dyn LedgerBackend>,
    kms: Arc<dyn KmsClient>,
    signing_key_id: String,
    namespace: Uuid,
    signer_set: Vec<String>,
}

impl LedgerDeps {
    fn gateway(&self) -> LedgerGateway {
        LedgerGateway::new(
            self.backend.clone(),
            self.kms.clone(),
            SigningKey { key_id: self.signing_key_id.clone() },
            self.namespace,
            self.signer_set.clone(),
        )
    }
}

/// Builds a [`DynDriver`] for every custodian named in the config's
/// `[custodians.*]` tables and a [`LedgerGateway`] for general-purpose
/// (non-drive) ledger reads.
pub struct DriverRegistry {
    drivers: HashMap<CustodianKind, DynDriver>,
    ledger: LedgerGateway,
}

impl DriverRegistry {
    pub fn build(
        config: &Config,
        backend: Arc<dyn LedgerBackend>,
        kms: Arc<dyn KmsClient>,
    ) -> Result<Self, EngineApiError> {
        let deps = LedgerDeps {
            backend,
            kms,
            signing_key_id: config.ledger_signing_key_id.clone(),
            namespace: config.namespace,
            signer_set: config.ledger_signer_set.clone(),
        };
        let min_authorizers = MinAuthorizers(config.min_authorizers);
        let http = RestClient::new("custodia-engine");

        let mut drivers: HashMap<CustodianKind, DynDriver> = HashMap::new();

        let c = &config.custodians.bitflyer;
        if !c.base_url.is_empty() {
            drivers.insert(
                CustodianKind::Bitflyer,
                Arc::new(BitflyerDriver::new(
                    http.clone(),
                    BitflyerConfig {
                        base_url: c.base_url.clone(),
                        client_id: c.client_id.clone(),
                        client_secret: c.client_secret.clone(),
                    },
                    deps.gateway(),
                    AuthorizationLedger::new(min_authorizers),
                )),
            );
        }

        let c = &config.custodians.gemini;
        if !c.base_url.is_empty() {
            drivers.insert(
                CustodianKind::Gemini,
                Arc::new(GeminiDriver::new(
                    http.clone(),
                    GeminiConfig {
                        base_url: c.base_url.clone(),
                        client_id: c.client_id.clone(),
                    },
                    deps.gateway(),
                    AuthorizationLedger::new(min_authorizers),
                )),
            );
        }

        let c = &config.custodians.uphold;
        if !c.base_url.is_empty() {
            drivers.insert(
                CustodianKind::Uphold,
                Arc::new(UpholdDriver::new(
                    http.clone(),
                    UpholdConfig {
                        base_url: c.base_url.clone(),
                        card_id: c.card_id.clone(),
                    },
                    deps.gateway(),
                    AuthorizationLedger::new(min_authorizers),
                )),
            );
        }

        let c = &config.custodians.zebpay;
        if !c.base_url.is_empty() {
            drivers.insert(
                CustodianKind::Zebpay,
                Arc::new(ZebpayDriver::new(
                    http.clone(),
                    ZebpayConfig {
                        base_url: c.base_url.clone(),
                        signing_key_id: c.signing_key_id.clone(),
                    },
                    deps.kms.clone(),
                    deps.gateway(),
                    AuthorizationLedger::new(min_authorizers),
                )),
            );
        }

        let c = &config.custodians.solana;
        if !c.base_url.is_empty() {
            drivers.insert(
                CustodianKind::Solana,
                Arc::new(SolanaDriver::new(
                    http.clone(),
                    SolanaConfig {
                        rpc_url: c.base_url.clone(),
                        mint: c.mint.clone(),
                        fee_payer: c.fee_payer.clone(),
                    },
                    deps.gateway(),
                    AuthorizationLedger::new(min_authorizers),
                )),
            );
        }

        let ledger = deps.gateway();
        Ok(Self { drivers, ledger })
    }

    pub fn driver(&self, kind: CustodianKind) -> Option<&DynDriver> {
        self.drivers.get(&kind)
    }

    pub fn ledger(&self) -> &LedgerGateway {
        &self.ledger
    }
}
