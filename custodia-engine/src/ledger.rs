//! The ledger gateway (section 4.2): a transactional wrapper over an
//! append-only, content-hashed ledger backend that signs every write and
//! re-verifies signatures, idempotency keys, transition validity, and the
//! Merkle digest proof on every read.

use std::sync::Arc;

use custodia_api_core::def::{KmsClient, LedgerBackend, RawLedgerEntry};
use custodia_api_core::error::{EngineApiError, EngineErrorKind};
use uuid::Uuid;

use crate::merkle;
use crate::payment::{AuthenticatedPaymentState, LedgerHistoryEntry, PaymentDetails, PaymentState};

/// The ledger's own signing key, distinct from the operator ed25519
/// authorizer keys in [`crate::authorizer`]: the engine signs every revision
/// it writes with this key through the KMS, and every read re-verifies that
/// signature.
pub struct SigningKey {
    pub key_id: String,
}

/// Wraps a [`LedgerBackend`] and [`KmsClient`] pair behind the sign-verify
/// envelope every read and write must pass through.
pub struct LedgerGateway {
    backend: Arc<dyn LedgerBackend>,
    kms: Arc<dyn KmsClient>,
    signing_key: SigningKey,
    namespace: Uuid,
    /// Key ids the ledger currently trusts for its own signing envelope;
    /// read-only after start-up (section 4.3's "effectively read-only"
    /// pattern, reused here for the internal KMS signer set).
    signer_set: Vec<String>,
}

impl LedgerGateway {
    pub fn new(
        backend: Arc<dyn LedgerBackend>,
        kms: Arc<dyn KmsClient>,
        signing_key: SigningKey,
        namespace: Uuid,
        signer_set: Vec<String>,
    ) -> Self {
        Self {
            backend,
            kms,
            signing_key,
            namespace,
            signer_set,
        }
    }

    /// Creates a new payment document in `prepared` status. Fails if a
    /// document with the same idempotency key already exists.
    pub async fn insert(&self, details: PaymentDetails) -> Result<Uuid, EngineApiError> {
        let idempotency_key = details.idempotency_key(self.namespace);
        if self
            .backend
            .get_document_id_by_idempotency_key(idempotency_key)
            .await?
            .is_some()
        {
            return Err(EngineApiError::new(
                EngineErrorKind::IdempotencyMismatch,
                "a payment with identical details already exists",
            ));
        }

        // The backend assigns the document id and it is embedded in the
        // payload we sign, so we generate it up front and keep it stable.
        let document_id = Uuid::new_v4();
        let state = AuthenticatedPaymentState::new(details, document_id);
        let envelope = self.sign(&state, idempotency_key).await?;
        let envelope_bytes = serde_json::to_vec(&envelope)?;
        self.backend.insert(idempotency_key, envelope_bytes).await
    }

    /// Loads and fully re-verifies a document's history, then returns the
    /// decoded latest [`AuthenticatedPaymentState`] alongside that history.
    pub async fn get_by_document_id(
        &self,
        document_id: Uuid,
    ) -> Result<(AuthenticatedPaymentState, Vec<LedgerHistoryEntry>), EngineApiError> {
        let history = self.backend.get_history(document_id).await?;
        if history.is_empty() {
            return Err(EngineApiError::record_not_found(format!(
                "no payment with document id {document_id}"
            )));
        }
        let (verified_states, envelopes) = self.verify_history(&history).await?;
        let latest = verified_states
            .into_iter()
            .next_back()
            .expect("history is non-empty");

        let entries = history
            .into_iter()
            .zip(envelopes)
            .map(|(raw, envelope)| LedgerHistoryEntry {
                strand_id: raw.strand_id,
                sequence_no: raw.sequence_no,
                content_hash_b64: raw.content_hash_b64,
                state: envelope,
                document_id: raw.document_id,
                version: raw.version,
                transaction_id: raw.transaction_id,
                transaction_time: raw.transaction_time,
            })
            .collect();

        Ok((latest, entries))
    }

    /// Looks a document up by idempotency key and re-verifies it the same
    /// way as [`Self::get_by_document_id`].
    pub async fn get_by_idempotency_key(
        &self,
        idempotency_key: Uuid,
    ) -> Result<(AuthenticatedPaymentState, Vec<LedgerHistoryEntry>), EngineApiError> {
        let document_id = self
            .backend
            .get_document_id_by_idempotency_key(idempotency_key)
            .await?
            .ok_or_else(|| {
                EngineApiError::record_not_found(format!(
                    "no payment with idempotency key {idempotency_key}"
                ))
            })?;
        self.get_by_document_id(document_id).await
    }

    /// Atomically: loads + verifies the latest revision, validates the
    /// transition to `next.status`, signs, and appends. Never called for a
    /// `pending -> pending` self-transition — callers skip the ledger write
    /// entirely in that case (section 9's adopted design decision).
    pub async fn write_next(
        &self,
        next: &AuthenticatedPaymentState,
    ) -> Result<PaymentState, EngineApiError> {
        let (current, _history) = self.get_by_document_id(next.document_id).await?;

        if current.status == next.status || !current.status.next_state_valid(next.status) {
            return Err(EngineApiError::invalid_transition(format!(
                "{} -> {} is not an allowed transition",
                current.status, next.status
            )));
        }

        let idempotency_key = next.details.idempotency_key(self.namespace);
        let envelope = self.sign(next, idempotency_key).await?;
        let envelope_bytes = serde_json::to_vec(&envelope)?;
        self.backend.append(next.document_id, envelope_bytes).await?;
        Ok(envelope)
    }

    async fn sign(
        &self,
        state: &AuthenticatedPaymentState,
        idempotency_key: Uuid,
    ) -> Result<PaymentState, EngineApiError> {
        let payload = serde_json::to_vec(state)?;
        let signature = self.kms.sign(&self.signing_key.key_id, &payload).await?;
        Ok(PaymentState {
            payload,
            signature,
            idempotency_key,
            signer_key_id: self.signing_key.key_id.clone(),
        })
    }

    /// Implements the read-time verification in section 4.2: decode each
    /// revision's envelope, verify its signature through the KMS and confirm
    /// the signer is in the current signer set, confirm the idempotency key
    /// matches the recomputed UUIDv5, confirm consecutive entries form a
    /// valid transition path, and Merkle-verify the latest entry's block
    /// address against the ledger's digest tip.
    async fn verify_history(
        &self,
        history: &[RawLedgerEntry],
    ) -> Result<(Vec<AuthenticatedPaymentState>, Vec<PaymentState>), EngineApiError> {
        let mut states = Vec::with_capacity(history.len());
        let mut envelopes = Vec::with_capacity(history.len());

        for entry in history {
            let envelope: PaymentState = serde_json::from_slice(&entry.payload)?;

            if !self.signer_set.iter().any(|k| k == &envelope.signer_key_id) {
                return Err(EngineApiError::new(
                    EngineErrorKind::SignatureInvalid,
                    format!("signer {} is not in the current signer set", envelope.signer_key_id),
                ));
            }

            let verified = self
                .kms
                .verify(&envelope.signer_key_id, &envelope.payload, &envelope.signature)
                .await?;
            if !verified {
                return Err(EngineApiError::new(
                    EngineErrorKind::SignatureInvalid,
                    format!("signature on document {} failed to verify", entry.document_id),
                ));
            }

            let state: AuthenticatedPaymentState = serde_json::from_slice(&envelope.payload)?;
            let recomputed = state.details.idempotency_key(self.namespace);
            if recomputed != envelope.idempotency_key {
                return Err(EngineApiError::new(
                    EngineErrorKind::IdempotencyMismatch,
                    format!(
                        "stored idempotency key {} does not match recomputed {}",
                        envelope.idempotency_key, recomputed
                    ),
                ));
            }

            states.push(state);
            envelopes.push(envelope);
        }

        for window in states.windows(2) {
            let (prev, next) = (&window[0], &window[1]);
            if !prev.status.next_state_valid(next.status) {
                return Err(EngineApiError::invalid_transition(format!(
                    "ledger history contains illegal transition {} -> {}",
                    prev.status, next.status
                )));
            }
        }

        if let Some(latest_raw) = history.last() {
            let entry_hash = decode_hash(&latest_raw.content_hash_b64)?;
            let tip = self.backend.get_digest().await?;
            let proof = self
                .backend
                .get_revision(&latest_raw.strand_id, latest_raw.sequence_no)
                .await?;
            merkle::verify(entry_hash, &proof.proof_hashes, &tip.digest_b64)?;
        }

        Ok((states, envelopes))
    }
}

fn decode_hash(b64: &str) -> Result<custodia_api_core::def::ProofHash, EngineApiError> {
    use base64::Engine as _;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| {
            EngineApiError::new(
                EngineErrorKind::MerkleInvalid,
                format!("content hash is not valid base64: {e}"),
            )
        })?;
    bytes.try_into().map_err(|_| {
        EngineApiError::new(
            EngineErrorKind::MerkleInvalid,
            "content hash is not 32 bytes",
        )
    })
}
