//! Backend-contract traits (section 6): the ledger protocol and the KMS
//! protocol. The engine is implemented entirely in terms of these traits;
//! concrete backends are out of scope per section 1.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::EngineApiError;

/// A single proof step: one 32-byte sibling hash on the path from a ledger
/// entry's own hash up to the digest tip.
pub type ProofHash = [u8; 32];

/// The result of `GetDigest`: the current tip digest plus the block address
/// it was computed over, both as they arrive from the backend (base64 for
/// the digest).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DigestTip {
    /// Base64-encoded SHA-256 digest.
    pub digest_b64: String,
    pub strand_id: String,
    pub sequence_no: u64,
}

/// The result of `GetRevision`: the proof hashes needed to re-derive the
/// digest tip from one entry's own content hash.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RevisionProof {
    pub proof_hashes: Vec<ProofHash>,
}

/// A raw, unverified row as the ledger backend returns it. The gateway
/// (custodia-engine) is responsible for all signature/transition/Merkle
/// verification; this trait only transports bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawLedgerEntry {
    pub strand_id: String,
    pub sequence_no: u64,
    /// Base64-encoded SHA-256 content hash of `payload`.
    pub content_hash_b64: String,
    pub payload: Vec<u8>,
    pub document_id: Uuid,
    pub version: u64,
    pub transaction_id: String,
    pub transaction_time: chrono::DateTime<chrono::Utc>,
}

/// Transactional driver contract presented by the verifiable-ledger backend
/// (section 6, "Ledger protocol"). Implementations are expected to be
/// cheaply cloneable shared handles (e.g. an `Arc`-wrapped client).
#[async_trait]
pub trait LedgerBackend: Send + Sync + 'static {
    /// Appends `payload` as a new document, failing if `idempotency_key`
    /// already has a document.
    async fn insert(
        &self,
        idempotency_key: Uuid,
        payload: Vec<u8>,
    ) -> Result<Uuid, EngineApiError>;

    /// Appends `payload` as a new revision of an existing document.
    async fn append(
        &self,
        document_id: Uuid,
        payload: Vec<u8>,
    ) -> Result<(), EngineApiError>;

    /// Full revision history for a document, ascending by version.
    async fn get_history(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<RawLedgerEntry>, EngineApiError>;

    /// Looks up a document id by its idempotency key.
    async fn get_document_id_by_idempotency_key(
        &self,
        idempotency_key: Uuid,
    ) -> Result<Option<Uuid>, EngineApiError>;

    /// Current digest tip.
    async fn get_digest(&self) -> Result<DigestTip, EngineApiError>;

    /// Merkle proof for the entry at the given block address.
    async fn get_revision(
        &self,
        strand_id: &str,
        sequence_no: u64,
    ) -> Result<RevisionProof, EngineApiError>;
}

/// `Sign`/`Verify`/`GetPublicKey` contract presented by the KMS backend
/// (section 6, "KMS protocol"). The engine signs its own ledger records
/// with ECDSA-SHA256 and verifies operator signatures with ed25519; this
/// trait is algorithm-agnostic and keyed purely by `key_id`.
#[async_trait]
pub trait KmsClient: Send + Sync + 'static {
    async fn sign(
        &self,
        key_id: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, EngineApiError>;

    async fn verify(
        &self,
        key_id: &str,
        payload: &[u8],
        signature: &[u8],
    ) -> Result<bool, EngineApiError>;

    async fn get_public_key(
        &self,
        key_id: &str,
    ) -> Result<Vec<u8>, EngineApiError>;
}
