//! HTTP-signature authentication for the operator-facing surface (section
//! 6): an ed25519 signature over `(request-target)`, `host`, `date`,
//! `digest`, `content-length`, `content-type`, carried in a `Signature`
//! request header using the same `keyId="...",algorithm="...",
//! headers="...",signature="..."` shape as the `Signature` HTTP auth
//! scheme.

use std::fmt::Write as _;

use chrono::{DateTime, Duration, Utc};
use custodia_api_core::error::{EngineApiError, EngineErrorKind};
use ring::signature::{ED25519, UnparsedPublicKey};

/// How far into the future a `date` header may be, relative to now.
pub const MAX_CLOCK_SKEW_FORWARD: Duration = Duration::minutes(1);
/// How far into the past a `date` header may be, relative to now.
pub const MAX_CLOCK_SKEW_BACKWARD_DAYS: i64 = 30;

/// The headers every operator request must sign, in order.
pub const REQUIRED_SIGNED_HEADERS: &[&str] = &[
    "(request-target)",
    "host",
    "date",
    "digest",
    "content-length",
    "content-type",
];

/// Resolves a `keyId` from a `Signature` header to a raw 32-byte ed25519
/// public key. Implemented by the authorizer keystore in `custodia-engine`.
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, key_id: &str) -> Option<[u8; 32]>;
}

/// The parsed `Signature` header, before verification.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignatureHeader {
    pub key_id: String,
    pub algorithm: String,
    pub headers: Vec<String>,
    pub signature: Vec<u8>,
}

impl SignatureHeader {
    /// Parses a `Signature: keyId="k1",algorithm="ed25519",headers="(request-target) host date",signature="base64"` header value.
    pub fn parse(value: &str) -> Result<Self, EngineApiError> {
        let mut key_id = None;
        let mut algorithm = None;
        let mut headers = None;
        let mut signature = None;

        for field in split_fields(value) {
            let (name, val) = field.split_once('=').ok_or_else(|| {
                EngineApiError::new(
                    EngineErrorKind::SignatureInvalid,
                    "malformed Signature header field",
                )
            })?;
            let val = val.trim_matches('"');
            match name.trim() {
                "keyId" => key_id = Some(val.to_owned()),
                "algorithm" => algorithm = Some(val.to_owned()),
                "headers" => {
                    headers = Some(
                        val.split_whitespace().map(str::to_owned).collect(),
                    )
                }
                "signature" => {
                    signature = Some(decode_base64(val)?);
                }
                _ => {}
            }
        }

        Ok(Self {
            key_id: key_id.ok_or_else(|| missing("keyId"))?,
            algorithm: algorithm.ok_or_else(|| missing("algorithm"))?,
            headers: headers.ok_or_else(|| missing("headers"))?,
            signature: signature.ok_or_else(|| missing("signature"))?,
        })
    }
}

fn missing(field: &'static str) -> EngineApiError {
    EngineApiError::new(
        EngineErrorKind::SignatureInvalid,
        format!("Signature header missing field: {field}"),
    )
}

/// Splits a `k="v",k2="v2"` string on top-level commas (commas inside quotes
/// don't count).
fn split_fields(value: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = value[start..].trim();
    if !last.is_empty() {
        fields.push(last);
    }
    fields
}

fn decode_base64(s: &str) -> Result<Vec<u8>, EngineApiError> {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| {
            EngineApiError::new(EngineErrorKind::SignatureInvalid, e)
        })
}

/// The concrete values of every signed header, in request order.
pub struct RequestSigningMaterial<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub host: &'a str,
    pub date: &'a str,
    pub digest: &'a str,
    pub content_length: &'a str,
    pub content_type: &'a str,
}

/// Builds the signing string the same way it must have been built by the
/// caller: one `name: value` line per entry in `headers`, joined by `\n`,
/// with `(request-target)` synthesized as `<lowercased method> <path>`.
pub fn build_signing_string(
    headers: &[String],
    material: &RequestSigningMaterial<'_>,
) -> Result<String, EngineApiError> {
    let mut out = String::new();
    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let value = match header.as_str() {
            "(request-target)" => {
                let method = material.method.to_ascii_lowercase();
                write!(out, "(request-target): {method} {}", material.path)
                    .expect("String writes don't fail");
                continue;
            }
            "host" => material.host,
            "date" => material.date,
            "digest" => material.digest,
            "content-length" => material.content_length,
            "content-type" => material.content_type,
            other =>
                return Err(EngineApiError::new(
                    EngineErrorKind::SignatureInvalid,
                    format!("unsupported signed header: {other}"),
                )),
        };
        write!(out, "{header}: {value}").expect("String writes don't fail");
    }
    Ok(out)
}

/// Verifies the `date` header falls within the allowed window relative to
/// `now`: no more than [`MAX_CLOCK_SKEW_FORWARD`] in the future, no more
/// than [`MAX_CLOCK_SKEW_BACKWARD_DAYS`] in the past.
pub fn verify_date_window(
    date: &DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), EngineApiError> {
    let earliest = now - Duration::days(MAX_CLOCK_SKEW_BACKWARD_DAYS);
    let latest = now + MAX_CLOCK_SKEW_FORWARD;
    if *date < earliest || *date > latest {
        return Err(EngineApiError::new(
            EngineErrorKind::SignatureInvalid,
            format!("date {date} outside allowed window [{earliest}, {latest}]"),
        ));
    }
    Ok(())
}

/// Verifies a fully parsed [`SignatureHeader`] against `material`, resolving
/// `key_id` via `resolver`. Does not check the signed-header set matches
/// [`REQUIRED_SIGNED_HEADERS`] exactly — callers that need that should
/// compare `sig_header.headers` themselves.
pub fn verify_signature(
    sig_header: &SignatureHeader,
    material: &RequestSigningMaterial<'_>,
    resolver: &dyn KeyResolver,
) -> Result<(), EngineApiError> {
    let pubkey_bytes = resolver.resolve(&sig_header.key_id).ok_or_else(|| {
        EngineApiError::new(
            EngineErrorKind::InvalidAuthorizer,
            format!("unknown key id: {}", sig_header.key_id),
        )
    })?;

    let signing_string =
        build_signing_string(&sig_header.headers, material)?;

    UnparsedPublicKey::new(&ED25519, &pubkey_bytes)
        .verify(signing_string.as_bytes(), &sig_header.signature)
        .map_err(|_| {
            EngineApiError::new(
                EngineErrorKind::SignatureInvalid,
                "ed25519 signature did not verify",
            )
        })
}

#[cfg(test)]
mod test {
    use ring::signature::Ed25519KeyPair;

    use super::*;

    struct FixedResolver(pub [u8; 32]);
    impl KeyResolver for FixedResolver {
        fn resolve(&self, _key_id: &str) -> Option<[u8; 32]> {
            Some(self.0)
        }
    }

    #[test]
    fn parses_signature_header() {
        let raw = r#"keyId="op-1",algorithm="ed25519",headers="(request-target) host date",signature="AAAA""#;
        let parsed = SignatureHeader::parse(raw).unwrap();
        assert_eq!(parsed.key_id, "op-1");
        assert_eq!(parsed.algorithm, "ed25519");
        assert_eq!(
            parsed.headers,
            vec!["(request-target)", "host", "date"]
        );
    }

    #[test]
    fn signing_string_matches_expected_shape() {
        let material = RequestSigningMaterial {
            method: "POST",
            path: "/payments",
            host: "engine.example",
            date: "Mon, 27 Jul 2026 00:00:00 GMT",
            digest: "SHA-256=abc",
            content_length: "12",
            content_type: "application/json",
        };
        let headers: Vec<String> = REQUIRED_SIGNED_HEADERS
            .iter()
            .map(|s| s.to_string())
            .collect();
        let signing_string =
            build_signing_string(&headers, &material).unwrap();
        assert!(signing_string.starts_with(
            "(request-target): post /payments\nhost: engine.example"
        ));
    }

    #[test]
    fn round_trip_sign_and_verify() {
        let seed = [7u8; 32];
        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed).unwrap();
        let pubkey: [u8; 32] = {
            use ring::signature::KeyPair as _;
            key_pair.public_key().as_ref().try_into().unwrap()
        };

        let material = RequestSigningMaterial {
            method: "POST",
            path: "/payments",
            host: "engine.example",
            date: "Mon, 27 Jul 2026 00:00:00 GMT",
            digest: "SHA-256=abc",
            content_length: "12",
            content_type: "application/json",
        };
        let headers: Vec<String> = REQUIRED_SIGNED_HEADERS
            .iter()
            .map(|s| s.to_string())
            .collect();
        let signing_string =
            build_signing_string(&headers, &material).unwrap();
        let sig = key_pair.sign(signing_string.as_bytes());

        let sig_header = SignatureHeader {
            key_id: "op-1".to_owned(),
            algorithm: "ed25519".to_owned(),
            headers,
            signature: sig.as_ref().to_vec(),
        };

        let resolver = FixedResolver(pubkey);
        verify_signature(&sig_header, &material, &resolver).unwrap();
    }

    #[test]
    fn date_window_rejects_future_skew() {
        let now = Utc::now();
        let too_far = now + Duration::minutes(5);
        assert!(verify_date_window(&too_far, now).is_err());
    }

    #[test]
    fn date_window_accepts_recent_past() {
        let now = Utc::now();
        let recent = now - Duration::days(1);
        assert!(verify_date_window(&recent, now).is_ok());
    }
}
