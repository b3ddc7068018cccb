//! End-to-end scenario tests (section 8, S1-S4): full drive-loop runs
//! against scripted custodian responses and an in-memory ledger/KMS pair.
//! S5 (Merkle known-answer) and S6 (transition-sequence enumeration) are
//! exercised closer to the code they cover, in `merkle.rs` and `state.rs`.

mod support;

use std::time::Duration;

use custodia_api_core::error::EngineErrorKind;
use custodia_api_core::models::CustodianKind;
use custodia_engine::drivers::{CustodianDriver, PollOutcome};
use custodia_engine::payment::PaymentDetails;
use custodia_engine::state::PaymentStatus;
use custodia_engine::{drive, DriveContext};
use rust_decimal_macros::dec;
use uuid::uuid;

use support::{Scripted, ScriptedDriver};

fn s1_details() -> PaymentDetails {
    PaymentDetails {
        to: String::new(),
        from: String::new(),
        currency: String::new(),
        amount: dec!(1.1),
        custodian: CustodianKind::Bitflyer,
        payout_id: String::new(),
    }
}

/// S1: happy path. Two authorizations reach quorum, one submit and one
/// poll are enough to reach `paid`, and the derived idempotency key matches
/// the literal value fixed in section 8.
#[tokio::test]
async fn s1_happy_path_reaches_paid() {
    let namespace = uuid!("7478bd8a-2247-493d-b419-368f1a1d7a6c");
    let details = s1_details();
    assert_eq!(
        details.idempotency_key(namespace),
        uuid!("1803df27-f29c-537a-9384-bb5b523ea3f7")
    );

    let driver = ScriptedDriver::new(2);
    driver.push_submit(Scripted::Ok(Some("ext-1".to_owned())));
    driver.push_poll(Scripted::Ok(PollOutcome::StillPending));
    driver.push_poll(Scripted::Ok(PollOutcome::Success));

    let document_id = driver.ledger.insert(details).await.unwrap();
    let (mut state, _) = driver.ledger.get_by_document_id(document_id).await.unwrap();
    driver.authorizations().authorize(&mut state, "op-1");
    driver.authorizations().authorize(&mut state, "op-2");

    let ctx = DriveContext::with_default_deadline(Duration::from_millis(5));
    let result = drive(&ctx, &driver, &mut state).await.unwrap();

    assert_eq!(result.status, PaymentStatus::Paid);
    assert_eq!(driver.submit_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(driver.poll_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

/// S2: a transient 500 on submit while `authorized` must propagate as
/// `CustodianTransient` and leave the ledger's status at `authorized`.
#[tokio::test]
async fn s2_transient_submit_error_leaves_status_authorized() {
    let driver = ScriptedDriver::new(2);
    driver.push_submit(Scripted::TransientError);

    let document_id = driver.ledger.insert(s1_details()).await.unwrap();
    let (mut state, _) = driver.ledger.get_by_document_id(document_id).await.unwrap();
    driver.authorizations().authorize(&mut state, "op-1");
    driver.authorizations().authorize(&mut state, "op-2");

    let ctx = DriveContext::with_default_deadline(Duration::from_millis(5));
    let err = drive(&ctx, &driver, &mut state).await.unwrap_err();
    assert_eq!(err.kind, EngineErrorKind::CustodianTransient);

    let (reloaded, _) = driver.ledger.get_by_document_id(document_id).await.unwrap();
    assert_eq!(reloaded.status, PaymentStatus::Authorized);
}

/// S3: a 404 on poll while `pending` must not be treated as a terminal
/// failure; the status stays `pending` and a subsequent drive call polls
/// again rather than giving up.
#[tokio::test]
async fn s3_poll_404_keeps_status_pending() {
    let driver = ScriptedDriver::new(2);
    driver.push_submit(Scripted::Ok(Some("ext-1".to_owned())));
    driver.push_poll(Scripted::TerminalError("404 not found"));

    let document_id = driver.ledger.insert(s1_details()).await.unwrap();
    let (mut state, _) = driver.ledger.get_by_document_id(document_id).await.unwrap();
    driver.authorizations().authorize(&mut state, "op-1");
    driver.authorizations().authorize(&mut state, "op-2");

    // A 1ms deadline with a 10ms poll interval lets the loop run exactly
    // once past the pending poll before expiring, so the still-pending
    // status (not a terminal failure) is what the caller observes.
    let ctx = DriveContext::new(
        custodia_std::deadline::Deadline::after(Duration::from_millis(15)),
        Duration::from_millis(10),
    );
    let result = drive(&ctx, &driver, &mut state).await;

    match result {
        Ok(s) => assert_eq!(s.status, PaymentStatus::Pending),
        Err(e) => assert_eq!(e.kind, EngineErrorKind::DeadlineExceeded),
    }

    let (reloaded, _) = driver.ledger.get_by_document_id(document_id).await.unwrap();
    assert_eq!(reloaded.status, PaymentStatus::Pending);
}

/// S4: zebpay-shaped quorum check. A `prepared` payment with only one
/// authorization is rejected with `InsufficientAuthorizations`; adding a
/// second reaches `authorized`.
#[tokio::test]
async fn s4_quorum_blocks_then_admits() {
    let driver = ScriptedDriver::new(2);

    let details = PaymentDetails {
        custodian: CustodianKind::Zebpay,
        ..s1_details()
    };
    let document_id = driver.ledger.insert(details).await.unwrap();
    let (mut state, _) = driver.ledger.get_by_document_id(document_id).await.unwrap();
    driver.authorizations().authorize(&mut state, "op-1");

    let ctx = DriveContext::with_default_deadline(Duration::from_millis(5));
    let err = drive(&ctx, &driver, &mut state).await.unwrap_err();
    assert_eq!(err.kind, EngineErrorKind::InsufficientAuthorizations);

    driver.authorizations().authorize(&mut state, "op-2");
    driver.push_submit(Scripted::Ok(Some("ext-2".to_owned())));
    driver.push_poll(Scripted::Ok(PollOutcome::Success));

    let result = drive(&ctx, &driver, &mut state).await.unwrap();
    assert_eq!(result.status, PaymentStatus::Paid);
}

/// Round-trip/idempotence law (section 8): driving a `paid` payment again
/// is a no-op that returns `paid` without issuing another submit or poll.
#[tokio::test]
async fn driving_an_already_paid_payment_is_a_no_op() {
    let driver = ScriptedDriver::new(2);
    driver.push_submit(Scripted::Ok(Some("ext-1".to_owned())));
    driver.push_poll(Scripted::Ok(PollOutcome::Success));

    let document_id = driver.ledger.insert(s1_details()).await.unwrap();
    let (mut state, _) = driver.ledger.get_by_document_id(document_id).await.unwrap();
    driver.authorizations().authorize(&mut state, "op-1");
    driver.authorizations().authorize(&mut state, "op-2");

    let ctx = DriveContext::with_default_deadline(Duration::from_millis(5));
    drive(&ctx, &driver, &mut state).await.unwrap();
    assert_eq!(state.status, PaymentStatus::Paid);

    let calls_before = driver.submit_calls.load(std::sync::atomic::Ordering::SeqCst);
    let again = drive(&ctx, &driver, &mut state).await.unwrap();
    assert_eq!(again.status, PaymentStatus::Paid);
    assert_eq!(
        driver.submit_calls.load(std::sync::atomic::Ordering::SeqCst),
        calls_before
    );
}
