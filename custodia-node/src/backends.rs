//! Thin REST adapters from the ledger/KMS protocols (section 6) to concrete
//! HTTP endpoints. The ledger backend and KMS themselves are out of scope
//! (section 1's "external collaborators through their contracts"); this
//! module only forwards bytes over the same [`RestClient`] the custodian
//! drivers use, so the node binary has something to construct a working
//! [`LedgerGateway`] from.

use async_trait::async_trait;
use custodia_api::rest::RestClient;
use custodia_api_core::def::{DigestTip, KmsClient, LedgerBackend, RevisionProof};
use custodia_api_core::error::EngineApiError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Base64-encodes/decodes a byte field for the JSON bodies exchanged with
/// the ledger/KMS endpoints, the same convention
/// `custodia_api_core::models::serde_bytes_base64` uses for queue envelopes.
mod b64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(de)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

pub struct HttpLedgerBackend {
    http: RestClient,
    endpoint: String,
}

impl HttpLedgerBackend {
    pub fn new(http: RestClient, endpoint: String) -> Self {
        Self { http, endpoint }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct InsertRequest {
    idempotency_key: Uuid,
    #[serde(with = "b64_bytes")]
    payload: Vec<u8>,
}

#[derive(Deserialize)]
struct InsertResponse {
    document_id: Uuid,
}

#[derive(Serialize)]
struct AppendRequest {
    document_id: Uuid,
    #[serde(with = "b64_bytes")]
    payload: Vec<u8>,
}

#[derive(Deserialize)]
struct RawLedgerEntryDto {
    strand_id: String,
    sequence_no: u64,
    content_hash_b64: String,
    #[serde(with = "b64_bytes")]
    payload: Vec<u8>,
    document_id: Uuid,
    version: u64,
    transaction_id: String,
    transaction_time: chrono::DateTime<chrono::Utc>,
}

impl From<RawLedgerEntryDto> for custodia_api_core::def::RawLedgerEntry {
    fn from(dto: RawLedgerEntryDto) -> Self {
        Self {
            strand_id: dto.strand_id,
            sequence_no: dto.sequence_no,
            content_hash_b64: dto.content_hash_b64,
            payload: dto.payload,
            document_id: dto.document_id,
            version: dto.version,
            transaction_id: dto.transaction_id,
            transaction_time: dto.transaction_time,
        }
    }
}

#[derive(Deserialize)]
struct DigestTipDto {
    digest_b64: String,
    strand_id: String,
    sequence_no: u64,
}

impl From<DigestTipDto> for DigestTip {
    fn from(dto: DigestTipDto) -> Self {
        Self {
            digest_b64: dto.digest_b64,
            strand_id: dto.strand_id,
            sequence_no: dto.sequence_no,
        }
    }
}

#[derive(Deserialize)]
struct RevisionProofDto {
    proof_hashes_b64: Vec<String>,
}

#[async_trait]
impl LedgerBackend for HttpLedgerBackend {
    async fn insert(
        &self,
        idempotency_key: Uuid,
        payload: Vec<u8>,
    ) -> Result<Uuid, EngineApiError> {
        let req = InsertRequest { idempotency_key, payload };
        let resp: InsertResponse = self
            .http
            .send(self.http.post(self.url("/documents"), &req))
            .await?;
        Ok(resp.document_id)
    }

    async fn append(
        &self,
        document_id: Uuid,
        payload: Vec<u8>,
    ) -> Result<(), EngineApiError> {
        let req = AppendRequest { document_id, payload };
        let _: serde_json::Value = self
            .http
            .send(self.http.post(self.url("/documents/revisions"), &req))
            .await?;
        Ok(())
    }

    async fn get_history(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<custodia_api_core::def::RawLedgerEntry>, EngineApiError> {
        let entries: Vec<RawLedgerEntryDto> = self
            .http
            .send(
                self.http
                    .get(self.url(&format!("/documents/{document_id}/history")), &()),
            )
            .await?;
        Ok(entries.into_iter().map(Into::into).collect())
    }

    async fn get_document_id_by_idempotency_key(
        &self,
        idempotency_key: Uuid,
    ) -> Result<Option<Uuid>, EngineApiError> {
        #[derive(Deserialize)]
        struct Resp {
            document_id: Option<Uuid>,
        }
        let resp: Resp = self
            .http
            .send(self.http.get(
                self.url(&format!("/documents/by-idempotency-key/{idempotency_key}")),
                &(),
            ))
            .await?;
        Ok(resp.document_id)
    }

    async fn get_digest(&self) -> Result<DigestTip, EngineApiError> {
        let dto: DigestTipDto = self
            .http
            .send(self.http.get(self.url("/digest"), &()))
            .await?;
        Ok(dto.into())
    }

    async fn get_revision(
        &self,
        strand_id: &str,
        sequence_no: u64,
    ) -> Result<RevisionProof, EngineApiError> {
        let dto: RevisionProofDto = self
            .http
            .send(self.http.get(
                self.url(&format!("/strands/{strand_id}/revisions/{sequence_no}")),
                &(),
            ))
            .await?;
        let proof_hashes = dto
            .proof_hashes_b64
            .iter()
            .map(|b64| decode_proof_hash(b64))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RevisionProof { proof_hashes })
    }
}

fn decode_proof_hash(
    b64: &str,
) -> Result<custodia_api_core::def::ProofHash, EngineApiError> {
    use base64::Engine as _;
    use custodia_api_core::error::{EngineErrorKind, EngineApiError as Err};
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| Err::new(EngineErrorKind::MerkleInvalid, e))?;
    bytes
        .try_into()
        .map_err(|_| Err::new(EngineErrorKind::MerkleInvalid, "proof hash is not 32 bytes"))
}

pub struct HttpKmsClient {
    http: RestClient,
    endpoint: String,
}

impl HttpKmsClient {
    pub fn new(http: RestClient, endpoint: String) -> Self {
        Self { http, endpoint }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct SignRequest<'a> {
    key_id: &'a str,
    #[serde(with = "b64_bytes")]
    payload: Vec<u8>,
}

#[derive(Deserialize)]
struct SignResponse {
    #[serde(with = "b64_bytes")]
    signature: Vec<u8>,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    key_id: &'a str,
    #[serde(with = "b64_bytes")]
    payload: Vec<u8>,
    #[serde(with = "b64_bytes")]
    signature: Vec<u8>,
}

#[derive(Deserialize)]
struct VerifyResponse {
    valid: bool,
}

#[derive(Deserialize)]
struct PublicKeyResponse {
    #[serde(with = "b64_bytes")]
    public_key: Vec<u8>,
}

#[async_trait]
impl KmsClient for HttpKmsClient {
    async fn sign(&self, key_id: &str, payload: &[u8]) -> Result<Vec<u8>, EngineApiError> {
        let req = SignRequest { key_id, payload: payload.to_vec() };
        let resp: SignResponse = self
            .http
            .send(self.http.post(self.url("/sign"), &req))
            .await?;
        Ok(resp.signature)
    }

    async fn verify(
        &self,
        key_id: &str,
        payload: &[u8],
        signature: &[u8],
    ) -> Result<bool, EngineApiError> {
        let req = VerifyRequest {
            key_id,
            payload: payload.to_vec(),
            signature: signature.to_vec(),
        };
        let resp: VerifyResponse = self
            .http
            .send(self.http.post(self.url("/verify"), &req))
            .await?;
        Ok(resp.valid)
    }

    async fn get_public_key(&self, key_id: &str) -> Result<Vec<u8>, EngineApiError> {
        let resp: PublicKeyResponse = self
            .http
            .send(
                self.http
                    .get(self.url(&format!("/keys/{key_id}")), &()),
            )
            .await?;
        Ok(resp.public_key)
    }
}
