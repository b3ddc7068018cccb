//! Shared fakes for the scenario suite (section 8): an in-memory
//! [`LedgerBackend`]/[`KmsClient`] pair, and a scripted [`CustodianDriver`]
//! that stands in for a custodian's HTTP endpoint so a scenario can dictate
//! exactly what `submit`/`poll` return without a live server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::sync::Arc;

use async_trait::async_trait;
use custodia_api_core::def::{DigestTip, KmsClient, LedgerBackend, RawLedgerEntry, RevisionProof};
use custodia_api_core::error::{EngineApiError, EngineErrorKind};
use custodia_engine::authorization::{AuthorizationLedger, MinAuthorizers};
use custodia_engine::drivers::{CustodianDriver, PollOutcome};
use custodia_engine::ledger::{LedgerGateway, SigningKey};
use custodia_engine::payment::AuthenticatedPaymentState;
use uuid::Uuid;

#[derive(Default)]
pub struct MemLedger {
    documents: Mutex<Vec<(Uuid, Uuid, Vec<Vec<u8>>)>>,
    last_payload: Mutex<Option<Vec<u8>>>,
}

fn hash_b64(payload: &[u8]) -> String {
    use base64::Engine as _;
    let hash = ring::digest::digest(&ring::digest::SHA256, payload);
    base64::engine::general_purpose::STANDARD.encode(hash.as_ref())
}

#[async_trait]
impl LedgerBackend for MemLedger {
    async fn insert(&self, idempotency_key: Uuid, payload: Vec<u8>) -> Result<Uuid, EngineApiError> {
        let document_id = Uuid::new_v4();
        *self.last_payload.lock().unwrap() = Some(payload.clone());
        self.documents
            .lock()
            .unwrap()
            .push((document_id, idempotency_key, vec![payload]));
        Ok(document_id)
    }

    async fn append(&self, document_id: Uuid, payload: Vec<u8>) -> Result<(), EngineApiError> {
        *self.last_payload.lock().unwrap() = Some(payload.clone());
        let mut docs = self.documents.lock().unwrap();
        let (_, _, payloads) = docs
            .iter_mut()
            .find(|(id, _, _)| *id == document_id)
            .ok_or_else(EngineApiError::default)?;
        payloads.push(payload);
        Ok(())
    }

    async fn get_history(&self, document_id: Uuid) -> Result<Vec<RawLedgerEntry>, EngineApiError> {
        let docs = self.documents.lock().unwrap();
        let Some((_, _, payloads)) = docs.iter().find(|(id, _, _)| *id == document_id) else {
            return Ok(Vec::new());
        };
        Ok(payloads
            .iter()
            .enumerate()
            .map(|(i, payload)| RawLedgerEntry {
                strand_id: "strand-0".to_owned(),
                sequence_no: i as u64,
                content_hash_b64: hash_b64(payload),
                payload: payload.clone(),
                document_id,
                version: i as u64,
                transaction_id: format!("tx-{i}"),
                transaction_time: chrono::Utc::now(),
            })
            .collect())
    }

    async fn get_document_id_by_idempotency_key(
        &self,
        idempotency_key: Uuid,
    ) -> Result<Option<Uuid>, EngineApiError> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .iter()
            .find(|(_, key, _)| *key == idempotency_key)
            .map(|(id, _, _)| *id))
    }

    async fn get_digest(&self) -> Result<DigestTip, EngineApiError> {
        let last = self.last_payload.lock().unwrap();
        let digest_b64 = last.as_deref().map(hash_b64).unwrap_or_default();
        Ok(DigestTip {
            digest_b64,
            strand_id: "strand-0".to_owned(),
            sequence_no: 0,
        })
    }

    async fn get_revision(&self, _strand_id: &str, _sequence_no: u64) -> Result<RevisionProof, EngineApiError> {
        Ok(RevisionProof { proof_hashes: Vec::new() })
    }
}

pub struct TrivialKms;

#[async_trait]
impl KmsClient for TrivialKms {
    async fn sign(&self, _key_id: &str, payload: &[u8]) -> Result<Vec<u8>, EngineApiError> {
        Ok(payload.to_vec())
    }
    async fn verify(&self, _key_id: &str, payload: &[u8], signature: &[u8]) -> Result<bool, EngineApiError> {
        Ok(payload == signature)
    }
    async fn get_public_key(&self, _key_id: &str) -> Result<Vec<u8>, EngineApiError> {
        Ok(Vec::new())
    }
}

/// One scripted response to a `submit` or `poll` call.
pub enum Scripted<T> {
    Ok(T),
    TransientError,
    TerminalError(&'static str),
}

/// A driver whose `submit`/`poll` responses are scripted up front, standing
/// in for a custodian's HTTP endpoint (section 10.5).
pub struct ScriptedDriver {
    pub ledger: LedgerGateway,
    pub authz: AuthorizationLedger,
    submit_script: Mutex<Vec<Scripted<Option<String>>>>,
    poll_script: Mutex<Vec<Scripted<PollOutcome>>>,
    pub submit_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
}

impl ScriptedDriver {
    pub fn new(min_authorizers: u32) -> Self {
        Self::with_ledger(min_authorizers, Arc::new(MemLedger::default()))
    }

    pub fn with_ledger(min_authorizers: u32, backend: Arc<MemLedger>) -> Self {
        let ledger = LedgerGateway::new(
            backend,
            Arc::new(TrivialKms),
            SigningKey { key_id: "ledger-key-1".into() },
            Uuid::new_v4(),
            vec!["ledger-key-1".into()],
        );
        Self {
            ledger,
            authz: AuthorizationLedger::new(MinAuthorizers(min_authorizers)),
            submit_script: Mutex::new(Vec::new()),
            poll_script: Mutex::new(Vec::new()),
            submit_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
        }
    }

    pub fn push_submit(&self, outcome: Scripted<Option<String>>) -> &Self {
        self.submit_script.lock().unwrap().push(outcome);
        self
    }

    pub fn push_poll(&self, outcome: Scripted<PollOutcome>) -> &Self {
        self.poll_script.lock().unwrap().push(outcome);
        self
    }
}

#[async_trait]
impl CustodianDriver for ScriptedDriver {
    fn ledger(&self) -> &LedgerGateway {
        &self.ledger
    }

    fn authorizations(&self) -> &AuthorizationLedger {
        &self.authz
    }

    async fn submit(&self, _state: &AuthenticatedPaymentState) -> Result<Option<String>, EngineApiError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.submit_script.lock().unwrap();
        if script.is_empty() {
            return Ok(None);
        }
        match script.remove(0) {
            Scripted::Ok(v) => Ok(v),
            Scripted::TransientError => Err(EngineApiError::new(
                EngineErrorKind::CustodianTransient,
                "500 internal server error",
            )),
            Scripted::TerminalError(msg) => {
                Err(EngineApiError::new(EngineErrorKind::CustodianTerminal, msg))
            }
        }
    }

    async fn poll(&self, _state: &AuthenticatedPaymentState) -> Result<PollOutcome, EngineApiError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.poll_script.lock().unwrap();
        if script.is_empty() {
            return Ok(PollOutcome::StillPending);
        }
        match script.remove(0) {
            Scripted::Ok(v) => Ok(v),
            Scripted::TransientError => Err(EngineApiError::new(
                EngineErrorKind::CustodianTransient,
                "500 internal server error",
            )),
            Scripted::TerminalError(msg) => {
                Err(EngineApiError::new(EngineErrorKind::CustodianTerminal, msg))
            }
        }
    }
}
