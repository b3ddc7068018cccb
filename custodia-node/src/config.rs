//! Layered configuration (section 10.3): CLI flags override a TOML file,
//! which overrides built-in defaults; secrets may additionally come from a
//! `.env` file in development.

use std::path::Path;

use custodia_engine::authorizer::{Environment, RawKeyEntry};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroize;

/// Per-custodian base URL and credentials, loaded from the `[custodians.*]`
/// TOML tables.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CustodianCredentials {
    pub base_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub card_id: String,
    #[serde(default)]
    pub signing_key_id: String,
    #[serde(default)]
    pub mint: String,
    #[serde(default)]
    pub fee_payer: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CustodiansConfig {
    #[serde(default)]
    pub bitflyer: CustodianCredentials,
    #[serde(default)]
    pub gemini: CustodianCredentials,
    #[serde(default)]
    pub uphold: CustodianCredentials,
    #[serde(default)]
    pub zebpay: CustodianCredentials,
    #[serde(default)]
    pub solana: CustodianCredentials,
}

/// One entry in the authorizer keystore's configured key set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizerKeyConfig {
    pub key_id: String,
    pub key: String,
}

/// The full, resolved node configuration (section 10.3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Selects the active operator key set.
    pub env: Environment,
    /// First argument to every idempotency-key derivation.
    pub namespace: Uuid,
    /// The minimum distinct authorizer keys required before a payment may
    /// leave `prepared`. Defaults to 2; see the recorded decision for the
    /// previously open minimum-authorizers question.
    #[serde(default = "default_min_authorizers")]
    pub min_authorizers: u32,
    /// Operator key set used to authenticate the HTTP surface and to
    /// authorize payments.
    pub authorizer_keys: Vec<AuthorizerKeyConfig>,
    /// The id of the key this node signs ledger revisions with.
    pub ledger_signing_key_id: String,
    /// The ledger backend's current trusted signer set (key ids).
    pub ledger_signer_set: Vec<String>,
    /// `host:port` the operator HTTP surface listens on.
    pub listen_addr: String,
    /// Redis connection string for the prepare/authorize/submit streams.
    pub redis_url: String,
    /// Ledger backend endpoint (QLDB-like transactional driver).
    pub ledger_endpoint: String,
    /// KMS endpoint used for sign/verify/get-public-key.
    pub kms_endpoint: String,
    #[serde(default)]
    pub custodians: CustodiansConfig,
}

fn default_min_authorizers() -> u32 {
    2
}

impl Config {
    /// Loads defaults, overlays a TOML file if `path` exists, and does not
    /// itself consult CLI flags or the environment — callers compose that
    /// layering in `cli.rs`.
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Parses the keystore's raw TOML entries into the shape
    /// [`custodia_engine::authorizer::Keystore`] expects.
    pub fn raw_key_entries(&self) -> Vec<RawKeyEntry> {
        self.authorizer_keys
            .iter()
            .map(|k| RawKeyEntry {
                key_id: k.key_id.clone(),
                encoded: k.key.clone(),
            })
            .collect()
    }
}

impl Drop for Config {
    fn drop(&mut self) {
        for entry in &mut self.authorizer_keys {
            entry.key.zeroize();
        }
        self.custodians.bitflyer.client_secret.zeroize();
        self.custodians.gemini.client_secret.zeroize();
        self.custodians.uphold.client_secret.zeroize();
        self.custodians.zebpay.client_secret.zeroize();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_a_minimal_toml_config() {
        let toml = r#"
            env = "development"
            namespace = "7478bd8a-2247-493d-b419-368f1a1d7a6c"
            authorizer_keys = []
            ledger_signing_key_id = "ledger-key-1"
            ledger_signer_set = ["ledger-key-1"]
            listen_addr = "127.0.0.1:8080"
            redis_url = "redis://localhost:6379"
            ledger_endpoint = "https://ledger.example"
            kms_endpoint = "https://kms.example"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.min_authorizers, 2);
        assert_eq!(config.env, Environment::Development);
    }
}
