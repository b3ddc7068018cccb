//! The per-custodian driver contract (section 4.5): every custodian
//! implements the same four verbs; the shared transition-check-sign-append
//! helper lives here so variants only override what actually differs.

pub mod bitflyer;
pub mod gemini;
pub mod solana;
pub mod uphold;
pub mod zebpay;

use std::sync::Arc;

use async_trait::async_trait;
use custodia_api_core::error::{EngineApiError, EngineErrorKind};

use crate::authorization::AuthorizationLedger;
use crate::ledger::LedgerGateway;
use crate::payment::AuthenticatedPaymentState;
use crate::state::PaymentStatus;

/// Outcome of a custodian status poll (section 4.5's common pay-loop shape).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    StillPending,
    Success,
    TerminalFailure,
}

/// The four-verb contract every custodian driver implements. `Prepare` and
/// `Authorize` are identical across custodians (a plain transition-check-
/// sign-append) and are provided as default methods; `Pay` and `Fail` are
/// mostly shared too, with `submit` and `poll` as the only custodian-specific
/// hooks.
#[async_trait]
pub trait CustodianDriver: Send + Sync {
    fn ledger(&self) -> &LedgerGateway;
    fn authorizations(&self) -> &AuthorizationLedger;

    /// Submits the payment to the custodian for the first time. Returns
    /// `Ok(Some(external_id))` on acceptance, `Ok(None)` if the custodian
    /// wants the caller to poll without an external id yet, or an error
    /// classified as `CustodianTransient` / `CustodianTerminal`.
    async fn submit(
        &self,
        state: &AuthenticatedPaymentState,
    ) -> Result<Option<String>, EngineApiError>;

    /// Polls the custodian for the outcome of a previously submitted
    /// payment.
    async fn poll(&self, state: &AuthenticatedPaymentState) -> Result<PollOutcome, EngineApiError>;

    /// The `prepared` revision itself is written by
    /// [`LedgerGateway::insert`] at payment creation time, so this verb has
    /// nothing left to do; it exists to round out the four-verb contract for
    /// callers that dispatch on the custodian driver uniformly.
    async fn prepare(
        &self,
        state: &mut AuthenticatedPaymentState,
    ) -> Result<AuthenticatedPaymentState, EngineApiError> {
        Ok(state.clone())
    }

    async fn authorize(
        &self,
        state: &mut AuthenticatedPaymentState,
    ) -> Result<AuthenticatedPaymentState, EngineApiError> {
        self.authorizations().require_quorum(state)?;
        state.status = PaymentStatus::Authorized;
        self.ledger().write_next(state).await?;
        Ok(state.clone())
    }

    /// The common pay-loop shape (section 4.5): submit once on first entry,
    /// poll thereafter, writing at most one `pending` revision and a final
    /// `paid` on success. `paid` itself is a no-op stabilizer.
    async fn pay(
        &self,
        state: &mut AuthenticatedPaymentState,
    ) -> Result<AuthenticatedPaymentState, EngineApiError> {
        match state.status {
            PaymentStatus::Paid => Ok(state.clone()),
            PaymentStatus::Authorized => {
                let external_id = self.submit(state).await?;
                state.status = PaymentStatus::Pending;
                state.external_id = external_id.or_else(|| state.external_id.clone());
                self.ledger().write_next(state).await?;
                Ok(state.clone())
            }
            PaymentStatus::Pending => match self.poll_tolerating_404(state).await? {
                PollOutcome::StillPending => Ok(state.clone()),
                PollOutcome::Success => {
                    state.status = PaymentStatus::Paid;
                    self.ledger().write_next(state).await?;
                    Ok(state.clone())
                }
                PollOutcome::TerminalFailure => {
                    state.status = PaymentStatus::Failed;
                    self.ledger().write_next(state).await?;
                    Ok(state.clone())
                }
            },
            other => Err(EngineApiError::invalid_transition(format!(
                "pay() called from unexpected status {other}"
            ))),
        }
    }

    /// Wraps [`Self::poll`], mapping a 404 response while already `pending`
    /// to `StillPending` rather than propagating it as a terminal failure
    /// (section 4.5's error-mapping table).
    async fn poll_tolerating_404(
        &self,
        state: &AuthenticatedPaymentState,
    ) -> Result<PollOutcome, EngineApiError> {
        match self.poll(state).await {
            Err(e) if e.kind == EngineErrorKind::CustodianTerminal && e.msg.starts_with("404") => {
                Ok(PollOutcome::StillPending)
            }
            other => other,
        }
    }

    async fn fail(
        &self,
        state: &mut AuthenticatedPaymentState,
    ) -> Result<AuthenticatedPaymentState, EngineApiError> {
        if state.status != PaymentStatus::Failed {
            state.status = PaymentStatus::Failed;
            self.ledger().write_next(state).await?;
        }
        Ok(state.clone())
    }
}

/// A boxed driver handle, sized for storage in worker/server state.
pub type DynDriver = Arc<dyn CustodianDriver>;
