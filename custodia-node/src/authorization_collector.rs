//! The authorization collector (section 4.4): holds authorizations that
//! have arrived while a payment is still `prepared`, before quorum has been
//! reached and the drive loop can write the `authorized` revision.
//!
//! [`custodia_engine::AuthorizationLedger`] only ever mutates an in-memory
//! [`AuthenticatedPaymentState`] passed to it; it never persists anything
//! itself. Because `prepared -> prepared` is not a valid ledger transition
//! (only `pending -> pending` is), there is nowhere in the ledger to stash
//! an authorization count that hasn't yet reached quorum. This collector is
//! the process-wide, ledger-external home for that count between the
//! Authorize and Submit HTTP calls; once quorum is reached and the drive
//! loop writes the `authorized` revision, the accumulated set is embedded in
//! that revision and this collector's entry for the document is no longer
//! needed.

use std::collections::HashMap;
use std::sync::Mutex;

use custodia_engine::PaymentAuthorization;
use uuid::Uuid;

#[derive(Default)]
pub struct AuthorizationCollector {
    by_document: Mutex<HashMap<Uuid, Vec<PaymentAuthorization>>>,
}

impl AuthorizationCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `key_id`'s authorization of `document_id`, idempotent per key
    /// id (mirrors [`custodia_engine::AuthorizationLedger::authorize`]'s
    /// duplicate semantics).
    pub fn record(&self, document_id: Uuid, key_id: &str) {
        let mut by_document = self.by_document.lock().unwrap();
        let entries = by_document.entry(document_id).or_default();
        if !entries.iter().any(|a| a.key_id == key_id) {
            entries.push(PaymentAuthorization {
                key_id: key_id.to_owned(),
                document_id,
            });
        }
    }

    /// The authorizations collected so far for `document_id`.
    pub fn collected(&self, document_id: Uuid) -> Vec<PaymentAuthorization> {
        self.by_document
            .lock()
            .unwrap()
            .get(&document_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drops the collected authorizations for `document_id`, once they've
    /// been durably embedded in an `authorized` ledger revision.
    pub fn clear(&self, document_id: Uuid) {
        self.by_document.lock().unwrap().remove(&document_id);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn records_are_idempotent_per_key() {
        let collector = AuthorizationCollector::new();
        let doc = Uuid::new_v4();

        collector.record(doc, "op-1");
        collector.record(doc, "op-1");
        collector.record(doc, "op-2");

        assert_eq!(collector.collected(doc).len(), 2);
    }

    #[test]
    fn clear_removes_the_document() {
        let collector = AuthorizationCollector::new();
        let doc = Uuid::new_v4();

        collector.record(doc, "op-1");
        collector.clear(doc);

        assert!(collector.collected(doc).is_empty());
    }

    #[test]
    fn unrecorded_document_collects_empty() {
        let collector = AuthorizationCollector::new();
        assert!(AuthorizationCollector::new().collected(Uuid::new_v4()).is_empty());
        assert!(collector.collected(Uuid::new_v4()).is_empty());
    }
}
