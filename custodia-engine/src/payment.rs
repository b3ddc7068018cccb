//! The payment data model (section 3): immutable payment details,
//! idempotency-key derivation, and the writable in-memory payment record.

use chrono::{DateTime, Utc};
use custodia_api_core::models::CustodianKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::PaymentStatus;

/// Immutable payment details. The tuple `(to, from, currency, amount,
/// custodian, payout_id)` is the sole input to idempotency-key derivation —
/// changing any field yields a distinct document (invariant I5).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub to: String,
    pub from: String,
    pub currency: String,
    pub amount: Decimal,
    pub custodian: CustodianKind,
    pub payout_id: String,
}

impl PaymentDetails {
    /// `UUIDv5(namespace, to || from || currency || amount || custodian ||
    /// payout_id)`, fields ASCII-concatenated in this fixed order with no
    /// separators. Deterministic and pure; bit-exact with the legacy scheme
    /// it must stay compatible with (design note in section 9).
    pub fn idempotency_key(&self, namespace: Uuid) -> Uuid {
        let mut name = String::with_capacity(64);
        name.push_str(&self.to);
        name.push_str(&self.from);
        name.push_str(&self.currency);
        name.push_str(&self.amount.to_string());
        name.push_str(self.custodian.as_str());
        name.push_str(&self.payout_id);
        Uuid::new_v5(&namespace, name.as_bytes())
    }
}

/// `{authorizer key id, payment document id}`. At most one per key id per
/// payment (invariant I4).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAuthorization {
    pub key_id: String,
    pub document_id: Uuid,
}

/// The writable view of a payment: details, status, authorizations, ledger
/// coordinates, and whatever external id the custodian assigned. This is
/// what gets serialized as the ledger payload (see [`PaymentState`]).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthenticatedPaymentState {
    pub details: PaymentDetails,
    pub status: PaymentStatus,
    pub authorizations: Vec<PaymentAuthorization>,
    pub document_id: Uuid,
    pub external_id: Option<String>,
}

impl AuthenticatedPaymentState {
    pub fn new(details: PaymentDetails, document_id: Uuid) -> Self {
        Self {
            details,
            status: PaymentStatus::Prepared,
            authorizations: Vec::new(),
            document_id,
            external_id: None,
        }
    }

    /// Number of distinct authorizer key ids (invariant I4 implies this
    /// equals `self.authorizations.len()`).
    pub fn authorization_count(&self) -> usize {
        self.authorizations.len()
    }
}

/// A committed ledger row: an opaque payload (the serialized
/// [`AuthenticatedPaymentState`]), a detached signature over that payload,
/// the idempotency key, and the id of the signing key (resolved to a public
/// key through the KMS's `GetPublicKey`, rather than embedding raw key
/// material). The payload is never interpreted before the signature is
/// verified (section 4.2).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentState {
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
    pub idempotency_key: Uuid,
    pub signer_key_id: String,
}

/// A ledger-supplied, never-forged entry: block address, content hash, the
/// committed [`PaymentState`], and bookkeeping metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerHistoryEntry {
    pub strand_id: String,
    pub sequence_no: u64,
    pub content_hash_b64: String,
    pub state: PaymentState,
    pub document_id: Uuid,
    pub version: u64,
    pub transaction_id: String,
    pub transaction_time: DateTime<Utc>,
}
