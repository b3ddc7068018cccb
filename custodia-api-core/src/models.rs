//! Wire DTOs exchanged across the operator-facing HTTP surface (section 6)
//! and the worker's queue envelope (section 6, "Queue protocol").

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The custodian a payment is routed to. Mirrors `PaymentDetails.custodian`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodianKind {
    Uphold,
    Bitflyer,
    Gemini,
    Zebpay,
    Solana,
}

impl CustodianKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uphold => "uphold",
            Self::Bitflyer => "bitflyer",
            Self::Gemini => "gemini",
            Self::Zebpay => "zebpay",
            Self::Solana => "solana",
        }
    }
}

/// Request body for `POST /payments` (Prepare).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub to: String,
    pub from: String,
    pub currency: String,
    pub amount: Decimal,
    pub custodian: CustodianKind,
    pub payout_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub document_id: Uuid,
    pub idempotency_key: Uuid,
}

/// Request body for `POST /payments/:doc_id/authorizations` (Authorize).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    pub key_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub document_id: Uuid,
    pub authorization_count: usize,
    pub quorum_met: bool,
}

/// Request body for `POST /payments/:doc_id/submit` (Submit). Empty: the
/// document id in the path fully identifies the payment to drive forward.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SubmitRequest {}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub document_id: Uuid,
    pub status: String,
}

/// The signed HTTP request envelope carried by a queue message's `data`
/// field, per section 6's "Queue protocol".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueEnvelope {
    pub request: SignedRequestFields,
}

/// The minimal set of fields needed to reconstruct a signed HTTP request
/// from a queue entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedRequestFields {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    #[serde(with = "serde_bytes_base64")]
    pub body: Vec<u8>,
}

/// A control-stream configuration message delivered alongside request
/// envelopes, per section 6.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamConfig {
    pub stream: String,
    pub consumer_group: String,
}

mod serde_bytes_base64 {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &[u8],
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        ser.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(de)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn custodian_kind_serde_is_snake_case() {
        let json = serde_json::to_string(&CustodianKind::Bitflyer).unwrap();
        assert_eq!(json, "\"bitflyer\"");
    }

    #[test]
    fn prepare_request_roundtrips() {
        let req = PrepareRequest {
            to: "acct-1".into(),
            from: "acct-2".into(),
            currency: "USD".into(),
            amount: Decimal::new(110, 2),
            custodian: CustodianKind::Gemini,
            payout_id: "batch-7".into(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: PrepareRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req.to, back.to);
        assert_eq!(req.amount, back.amount);
    }
}
