//! The authorizer keystore (section 4.3): an environment-scoped set of
//! ed25519 public keys used to authenticate operator HTTP-signature requests
//! and, separately, an attestation-aware store keyed by PCR2 for the
//! enclave-signed flow. Both are initialized once at start-up and are
//! read-only thereafter; any reload is an atomic pointer swap via
//! [`arc_swap::ArcSwap`] (section 9's "global environment-derived key sets"
//! design note).

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use custodia_api::sig_auth::KeyResolver;
use custodia_api_core::error::{EngineApiError, EngineErrorKind};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Which operator key set is active. Selects the keystore's contents at
/// start-up; never changes at runtime.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    Development,
}

/// An unparsed keystore entry: either a raw hex-encoded ed25519 public key or
/// an `ssh-ed25519 <base64> <comment>` authorized-key line.
#[derive(Clone, Debug)]
pub struct RawKeyEntry {
    pub key_id: String,
    pub encoded: String,
}

/// Parses `encoded` into a raw 32-byte ed25519 public key, accepting either
/// hex or an SSH authorized-key line.
fn decode_key(encoded: &str) -> Result<[u8; 32], EngineApiError> {
    let trimmed = encoded.trim();
    if let Some(rest) = trimmed.strip_prefix("ssh-ed25519 ") {
        let b64_field = rest.split_whitespace().next().ok_or_else(|| {
            EngineApiError::new(
                EngineErrorKind::InvalidAuthorizer,
                "malformed ssh-ed25519 authorized-key line",
            )
        })?;
        let blob = {
            use base64::Engine as _;
            base64::engine::general_purpose::STANDARD
                .decode(b64_field)
                .map_err(|e| {
                    EngineApiError::new(
                        EngineErrorKind::InvalidAuthorizer,
                        format!("invalid ssh-ed25519 base64 blob: {e}"),
                    )
                })?
        };
        return decode_ssh_wire_format(&blob);
    }

    decode_hex_key(trimmed)
}

/// Decodes the `string "ssh-ed25519"`, `string <pubkey bytes>` wire pair
/// inside an OpenSSH `ssh-ed25519` public key blob.
fn decode_ssh_wire_format(blob: &[u8]) -> Result<[u8; 32], EngineApiError> {
    let malformed = || {
        EngineApiError::new(
            EngineErrorKind::InvalidAuthorizer,
            "malformed ssh-ed25519 key blob",
        )
    };

    let mut pos = 0usize;
    let read_field = |pos: &mut usize| -> Result<&[u8], EngineApiError> {
        let len_bytes: [u8; 4] = blob
            .get(*pos..*pos + 4)
            .ok_or_else(malformed)?
            .try_into()
            .map_err(|_| malformed())?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        *pos += 4;
        let field = blob.get(*pos..*pos + len).ok_or_else(malformed)?;
        *pos += len;
        Ok(field)
    };

    let key_type = read_field(&mut pos)?;
    if key_type != b"ssh-ed25519" {
        return Err(malformed());
    }
    let pubkey_field = read_field(&mut pos)?;

    pubkey_field.try_into().map_err(|_| malformed())
}

fn decode_hex_key(hex: &str) -> Result<[u8; 32], EngineApiError> {
    let malformed = || {
        EngineApiError::new(
            EngineErrorKind::InvalidAuthorizer,
            "authorizer key is not valid hex or ssh-ed25519",
        )
    };
    if hex.len() != 64 {
        return Err(malformed());
    }
    let mut out = [0u8; 32];
    for (i, chunk) in out.iter_mut().enumerate() {
        let byte_str = hex.get(i * 2..i * 2 + 2).ok_or_else(malformed)?;
        *chunk = u8::from_str_radix(byte_str, 16).map_err(|_| malformed())?;
    }
    Ok(out)
}

/// Environment-scoped set of ed25519 public keys, keyed by key id.
pub struct Keystore {
    env: Environment,
    keys: ArcSwap<HashMap<String, [u8; 32]>>,
}

impl Keystore {
    pub fn new(env: Environment, entries: &[RawKeyEntry]) -> Result<Self, EngineApiError> {
        let keys = Self::parse_entries(entries)?;
        Ok(Self {
            env,
            keys: ArcSwap::from_pointee(keys),
        })
    }

    fn parse_entries(
        entries: &[RawKeyEntry],
    ) -> Result<HashMap<String, [u8; 32]>, EngineApiError> {
        entries
            .iter()
            .map(|entry| Ok((entry.key_id.clone(), decode_key(&entry.encoded)?)))
            .collect()
    }

    /// Atomically replaces the current key set.
    pub fn reload(&self, entries: &[RawKeyEntry]) -> Result<(), EngineApiError> {
        let keys = Self::parse_entries(entries)?;
        self.keys.store(Arc::new(keys));
        Ok(())
    }

    pub fn env(&self) -> Environment {
        self.env
    }

    pub fn lookup_verifier(&self, key_id: &str) -> Result<[u8; 32], EngineApiError> {
        self.keys.load().get(key_id).copied().ok_or_else(|| {
            EngineApiError::new(
                EngineErrorKind::InvalidAuthorizer,
                format!("unknown authorizer key id: {key_id}"),
            )
        })
    }

    pub fn len(&self) -> usize {
        self.keys.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyResolver for Keystore {
    fn resolve(&self, key_id: &str) -> Option<[u8; 32]> {
        self.keys.load().get(key_id).copied()
    }
}

/// The expected PCR0/1/2 triple for a given PCR2 value, used by the
/// attestation-aware verifier store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PcrExpectation {
    pub pcr0_hex: String,
    pub pcr1_hex: String,
    pub pcr2_hex: String,
}

/// A minimal enclave attestation document: the three PCR values it attests
/// to plus the time it was produced, used to bound replay.
#[derive(Clone, Debug)]
pub struct AttestationDocument {
    pub pcr0_hex: String,
    pub pcr1_hex: String,
    pub pcr2_hex: String,
    pub produced_at: DateTime<Utc>,
}

/// How old an attestation document may be before it's rejected as stale.
pub const MAX_ATTESTATION_AGE: Duration = Duration::minutes(5);

/// An attestation-aware verifier store, keyed by hex-encoded PCR2 (section
/// 4.3). Coexists with [`Keystore`] as an alternative keystore selected by
/// deployment mode (see the section 9 design decision recorded in
/// `DESIGN.md`).
pub struct AttestationVerifierStore {
    expectations: HashMap<String, PcrExpectation>,
}

impl AttestationVerifierStore {
    pub fn new(expectations: Vec<PcrExpectation>) -> Self {
        Self {
            expectations: expectations
                .into_iter()
                .map(|e| (e.pcr2_hex.clone(), e))
                .collect(),
        }
    }

    /// Verifies `doc` against the PCR2-keyed expectation, bounding replay
    /// with an injectable `now` so tests don't depend on wall-clock time.
    pub fn verify(
        &self,
        doc: &AttestationDocument,
        now: DateTime<Utc>,
    ) -> Result<(), EngineApiError> {
        let expectation = self.expectations.get(&doc.pcr2_hex).ok_or_else(|| {
            EngineApiError::new(
                EngineErrorKind::InvalidAuthorizer,
                format!("no expectation registered for pcr2 {}", doc.pcr2_hex),
            )
        })?;

        if expectation.pcr0_hex != doc.pcr0_hex || expectation.pcr1_hex != doc.pcr1_hex {
            return Err(EngineApiError::new(
                EngineErrorKind::InvalidAuthorizer,
                "attestation PCR0/PCR1 do not match the registered expectation",
            ));
        }

        let age = now - doc.produced_at;
        if age > MAX_ATTESTATION_AGE || age < Duration::zero() {
            return Err(EngineApiError::new(
                EngineErrorKind::InvalidAuthorizer,
                format!("attestation document age {age} is outside the allowed window"),
            ));
        }

        Ok(())
    }
}
