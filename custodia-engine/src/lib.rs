//! The settlement engine: the payment state machine, the append-only ledger
//! gateway, the authorizer keystore, the authorization quorum, and the
//! per-custodian driver trait that together drive a payment from
//! `prepared` to a terminal state.

pub mod authorization;
pub mod authorizer;
pub mod drive;
pub mod drivers;
pub mod ledger;
pub mod merkle;
pub mod payment;
pub mod state;

pub use authorization::{AuthorizationLedger, MinAuthorizers};
pub use authorizer::{AttestationVerifierStore, Environment, Keystore};
pub use drive::{drive, DriveContext};
pub use drivers::CustodianDriver;
pub use ledger::LedgerGateway;
pub use payment::{
    AuthenticatedPaymentState, LedgerHistoryEntry, PaymentAuthorization, PaymentDetails,
    PaymentState,
};
pub use state::PaymentStatus;
