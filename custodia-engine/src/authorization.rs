//! Authorization quorum (section 4.4): recording one authorization per
//! operator key id against a payment, and deciding whether the accumulated
//! set clears the configured minimum before the drive loop may move a
//! payment out of `prepared`.

use custodia_api_core::error::{EngineApiError, EngineErrorKind};
use uuid::Uuid;

use crate::payment::{AuthenticatedPaymentState, PaymentAuthorization};

/// The minimum distinct authorizer key ids required before a payment may
/// leave `prepared`. Defaults to 2 (section 9's recorded decision for the
/// previously open "what quorum size" question).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MinAuthorizers(pub u32);

impl Default for MinAuthorizers {
    fn default() -> Self {
        Self(2)
    }
}

/// Records authorizations against an in-memory [`AuthenticatedPaymentState`]
/// and evaluates quorum. Does not itself touch the ledger; callers persist
/// the returned state with [`crate::ledger::LedgerGateway::write_next`] once
/// they decide a write is warranted.
pub struct AuthorizationLedger {
    min_authorizers: MinAuthorizers,
}

impl AuthorizationLedger {
    pub fn new(min_authorizers: MinAuthorizers) -> Self {
        Self { min_authorizers }
    }

    /// Adds `key_id`'s authorization to `state` if it hasn't already
    /// authorized this document (invariant I4: at most one authorization per
    /// key id per payment). A repeat authorization from the same key is a
    /// no-op, not an error — idempotent per the retry semantics the rest of
    /// the engine assumes.
    pub fn authorize(&self, state: &mut AuthenticatedPaymentState, key_id: &str) {
        let document_id = state.document_id;
        if !state.authorizations.iter().any(|a| a.key_id == key_id) {
            state.authorizations.push(PaymentAuthorization {
                key_id: key_id.to_owned(),
                document_id,
            });
        }
    }

    pub fn has_quorum(&self, state: &AuthenticatedPaymentState) -> bool {
        state.authorization_count() as u32 >= self.min_authorizers.0
    }

    /// Returns `Ok(())` if `state` has reached quorum, else
    /// `InsufficientAuthorizations` naming how many more are needed.
    pub fn require_quorum(&self, state: &AuthenticatedPaymentState) -> Result<(), EngineApiError> {
        if self.has_quorum(state) {
            return Ok(());
        }
        let have = state.authorization_count() as u32;
        let need = self.min_authorizers.0;
        Err(EngineApiError::new(
            EngineErrorKind::InsufficientAuthorizations,
            format!("payment {} has {have}/{need} authorizations", state.document_id),
        ))
    }
}

#[cfg(test)]
mod test {
    use custodia_api_core::models::CustodianKind;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::payment::PaymentDetails;

    fn fresh_state() -> AuthenticatedPaymentState {
        AuthenticatedPaymentState::new(
            PaymentDetails {
                to: "alice".into(),
                from: "engine".into(),
                currency: "USD".into(),
                amount: dec!(10.00),
                custodian: CustodianKind::Gemini,
                payout_id: "batch-1".into(),
            },
            Uuid::new_v4(),
        )
    }

    #[test]
    fn below_quorum_until_min_authorizers_reached() {
        let ledger = AuthorizationLedger::new(MinAuthorizers(2));
        let mut state = fresh_state();

        ledger.authorize(&mut state, "op-1");
        assert!(!ledger.has_quorum(&state));
        assert_eq!(
            ledger.require_quorum(&state).unwrap_err().kind,
            EngineErrorKind::InsufficientAuthorizations
        );

        ledger.authorize(&mut state, "op-2");
        assert!(ledger.has_quorum(&state));
        assert!(ledger.require_quorum(&state).is_ok());
    }

    #[test]
    fn repeat_authorization_from_same_key_is_a_no_op() {
        let ledger = AuthorizationLedger::new(MinAuthorizers(2));
        let mut state = fresh_state();

        ledger.authorize(&mut state, "op-1");
        ledger.authorize(&mut state, "op-1");
        ledger.authorize(&mut state, "op-1");

        assert_eq!(state.authorization_count(), 1);
        assert!(!ledger.has_quorum(&state));
    }

    #[test]
    fn default_min_authorizers_is_two() {
        assert_eq!(MinAuthorizers::default(), MinAuthorizers(2));
    }
}
