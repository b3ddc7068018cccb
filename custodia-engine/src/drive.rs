//! The drive loop (section 4.6): the single entry point that advances a
//! payment from its current status toward a terminal one, dispatching to a
//! [`CustodianDriver`] and respecting a deadline across re-entrant polling.

use custodia_api_core::error::{EngineApiError, EngineErrorKind};
use custodia_std::deadline::Deadline;

use crate::drivers::{CustodianDriver, PollOutcome};
use crate::payment::AuthenticatedPaymentState;
use crate::state::PaymentStatus;

/// Request-scoped context threaded through a drive call: the deadline by
/// which a terminal status must be reached, and (for `pending`) how long to
/// sleep between polls.
pub struct DriveContext {
    pub deadline: Deadline,
    pub poll_interval: std::time::Duration,
}

impl DriveContext {
    pub fn new(deadline: Deadline, poll_interval: std::time::Duration) -> Self {
        Self {
            deadline,
            poll_interval,
        }
    }

    pub fn with_default_deadline(poll_interval: std::time::Duration) -> Self {
        Self::new(Deadline::default_drive_deadline(), poll_interval)
    }
}

impl Default for DriveContext {
    fn default() -> Self {
        Self::with_default_deadline(std::time::Duration::from_secs(2))
    }
}

/// Advances `state` through the driver's verbs until a terminal status, an
/// unrecoverable error, or `ctx.deadline` expiry. Modeled as a bounded loop
/// rather than recursion (section 9's adopted redesign): each iteration
/// dispatches on the current status, and `pending`'s "poll again" outcome
/// loops back around instead of re-entering the call stack.
pub async fn drive(
    ctx: &DriveContext,
    driver: &dyn CustodianDriver,
    state: &mut AuthenticatedPaymentState,
) -> Result<AuthenticatedPaymentState, EngineApiError> {
    loop {
        if ctx.deadline.is_expired() {
            return Err(EngineApiError::new(
                EngineErrorKind::DeadlineExceeded,
                format!(
                    "drive deadline exceeded for document {} at status {}",
                    state.document_id, state.status
                ),
            ));
        }

        let status_before = state.status;

        match state.status {
            PaymentStatus::Prepared => {
                driver.authorize(state).await?;
            }
            PaymentStatus::Authorized => {
                driver.pay(state).await?;
            }
            PaymentStatus::Pending => {
                driver.pay(state).await?;
                if state.status == PaymentStatus::Pending {
                    // Still polling: sleep, then let the loop re-check the
                    // deadline before the next attempt.
                    tokio::time::sleep(ctx.poll_interval).await;
                    continue;
                }
            }
            PaymentStatus::Paid => {
                return driver.pay(state).await;
            }
            PaymentStatus::Failed => {
                return driver.fail(state).await;
            }
        }

        if state.status == status_before {
            return Err(EngineApiError::invalid_transition(format!(
                "drive loop made no progress from status {status_before}"
            )));
        }

        if state.status.is_terminal() {
            return Ok(state.clone());
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use custodia_api_core::def::{DigestTip, KmsClient, LedgerBackend, RawLedgerEntry, RevisionProof};
    use custodia_api_core::models::CustodianKind;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;
    use crate::authorization::{AuthorizationLedger, MinAuthorizers};
    use crate::ledger::{LedgerGateway, SigningKey};
    use crate::payment::PaymentDetails;

    #[derive(Default)]
    struct MemLedger {
        docs: std::sync::Mutex<Vec<(Uuid, Uuid, Vec<Vec<u8>>)>>,
        last: std::sync::Mutex<Option<Vec<u8>>>,
    }

    fn hash_b64(payload: &[u8]) -> String {
        use base64::Engine as _;
        let h = ring::digest::digest(&ring::digest::SHA256, payload);
        base64::engine::general_purpose::STANDARD.encode(h.as_ref())
    }

    #[async_trait]
    impl LedgerBackend for MemLedger {
        async fn insert(&self, key: Uuid, payload: Vec<u8>) -> Result<Uuid, EngineApiError> {
            let id = Uuid::new_v4();
            *self.last.lock().unwrap() = Some(payload.clone());
            self.docs.lock().unwrap().push((id, key, vec![payload]));
            Ok(id)
        }
        async fn append(&self, id: Uuid, payload: Vec<u8>) -> Result<(), EngineApiError> {
            *self.last.lock().unwrap() = Some(payload.clone());
            let mut docs = self.docs.lock().unwrap();
            let (_, _, p) = docs.iter_mut().find(|(d, _, _)| *d == id).unwrap();
            p.push(payload);
            Ok(())
        }
        async fn get_history(&self, id: Uuid) -> Result<Vec<RawLedgerEntry>, EngineApiError> {
            let docs = self.docs.lock().unwrap();
            let Some((_, _, payloads)) = docs.iter().find(|(d, _, _)| *d == id) else {
                return Ok(Vec::new());
            };
            Ok(payloads
                .iter()
                .enumerate()
                .map(|(i, p)| RawLedgerEntry {
                    strand_id: "strand-0".into(),
                    sequence_no: i as u64,
                    content_hash_b64: hash_b64(p),
                    payload: p.clone(),
                    document_id: id,
                    version: i as u64,
                    transaction_id: format!("tx-{i}"),
                    transaction_time: chrono::Utc::now(),
                })
                .collect())
        }
        async fn get_document_id_by_idempotency_key(
            &self,
            key: Uuid,
        ) -> Result<Option<Uuid>, EngineApiError> {
            Ok(self
                .docs
                .lock()
                .unwrap()
                .iter()
                .find(|(_, k, _)| *k == key)
                .map(|(d, _, _)| *d))
        }
        async fn get_digest(&self) -> Result<DigestTip, EngineApiError> {
            let last = self.last.lock().unwrap();
            let digest_b64 = last.as_deref().map(hash_b64).unwrap_or_default();
            Ok(DigestTip {
                digest_b64,
                strand_id: "strand-0".into(),
                sequence_no: 0,
            })
        }
        async fn get_revision(&self, _: &str, _: u64) -> Result<RevisionProof, EngineApiError> {
            Ok(RevisionProof {
                proof_hashes: Vec::new(),
            })
        }
    }

    struct TrivialKms;

    #[async_trait]
    impl KmsClient for TrivialKms {
        async fn sign(&self, _: &str, payload: &[u8]) -> Result<Vec<u8>, EngineApiError> {
            Ok(payload.to_vec())
        }
        async fn verify(&self, _: &str, payload: &[u8], sig: &[u8]) -> Result<bool, EngineApiError> {
            Ok(payload == sig)
        }
        async fn get_public_key(&self, _: &str) -> Result<Vec<u8>, EngineApiError> {
            Ok(Vec::new())
        }
    }

    /// A driver that accepts on first submit and reports success on the
    /// first poll, so a full S1-style happy path completes in one drive
    /// call.
    struct InstantPayDriver {
        ledger: LedgerGateway,
        authz: AuthorizationLedger,
        polls: AtomicUsize,
    }

    #[async_trait]
    impl CustodianDriver for InstantPayDriver {
        fn ledger(&self) -> &LedgerGateway {
            &self.ledger
        }
        fn authorizations(&self) -> &AuthorizationLedger {
            &self.authz
        }
        async fn submit(
            &self,
            _state: &AuthenticatedPaymentState,
        ) -> Result<Option<String>, EngineApiError> {
            Ok(Some("ext-1".to_owned()))
        }
        async fn poll(&self, _state: &AuthenticatedPaymentState) -> Result<PollOutcome, EngineApiError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(PollOutcome::Success)
        }
    }

    fn details() -> PaymentDetails {
        PaymentDetails {
            to: "alice".into(),
            from: "engine".into(),
            currency: "USD".into(),
            amount: dec!(10.00),
            custodian: CustodianKind::Bitflyer,
            payout_id: "batch-1".into(),
        }
    }

    fn driver() -> (InstantPayDriver, Uuid) {
        let ledger = LedgerGateway::new(
            Arc::new(MemLedger::default()),
            Arc::new(TrivialKms),
            SigningKey {
                key_id: "ledger-key-1".into(),
            },
            Uuid::new_v4(),
            vec!["ledger-key-1".into()],
        );
        (
            InstantPayDriver {
                ledger,
                authz: AuthorizationLedger::new(MinAuthorizers(2)),
                polls: AtomicUsize::new(0),
            },
            Uuid::new_v4(),
        )
    }

    #[tokio::test]
    async fn drives_prepared_to_paid_once_quorum_is_met() {
        let (driver, _) = driver();
        let document_id = driver.ledger.insert(details()).await.unwrap();
        let (mut state, _) = driver.ledger.get_by_document_id(document_id).await.unwrap();
        driver.authorizations().authorize(&mut state, "op-1");
        driver.authorizations().authorize(&mut state, "op-2");

        let ctx = DriveContext::with_default_deadline(std::time::Duration::from_millis(1));
        let result = drive(&ctx, &driver, &mut state).await.unwrap();

        assert_eq!(result.status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn insufficient_authorizations_blocks_prepared() {
        let (driver, _) = driver();
        let document_id = driver.ledger.insert(details()).await.unwrap();
        let (mut state, _) = driver.ledger.get_by_document_id(document_id).await.unwrap();
        driver.authorizations().authorize(&mut state, "op-1");

        let ctx = DriveContext::default();
        let err = drive(&ctx, &driver, &mut state).await.unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::InsufficientAuthorizations);
    }

    #[tokio::test]
    async fn expired_deadline_is_reported_without_writes() {
        let (driver, _) = driver();
        let document_id = driver.ledger.insert(details()).await.unwrap();
        let (mut state, _) = driver.ledger.get_by_document_id(document_id).await.unwrap();

        let ctx = DriveContext::new(
            Deadline::after(std::time::Duration::from_millis(0)),
            std::time::Duration::from_millis(1),
        );
        let err = drive(&ctx, &driver, &mut state).await.unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::DeadlineExceeded);
    }

    #[tokio::test]
    async fn driving_a_paid_payment_is_a_no_op() {
        let (driver, _) = driver();
        let document_id = driver.ledger.insert(details()).await.unwrap();
        let (mut state, _) = driver.ledger.get_by_document_id(document_id).await.unwrap();
        driver.authorizations().authorize(&mut state, "op-1");
        driver.authorizations().authorize(&mut state, "op-2");
        let ctx = DriveContext::with_default_deadline(std::time::Duration::from_millis(1));
        drive(&ctx, &driver, &mut state).await.unwrap();

        let again = drive(&ctx, &driver, &mut state).await.unwrap();
        assert_eq!(again.status, PaymentStatus::Paid);
    }
}
