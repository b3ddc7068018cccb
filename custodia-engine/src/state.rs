//! The payment lifecycle and its transition relation.
//!
//! `prepared -> authorized -> pending -> paid`, with `failed` reachable from
//! any non-terminal status. `pending -> pending` is the only self-transition,
//! and it is never committed to the ledger (see [`super::ledger`]).

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};

/// A payment's position in the settlement lifecycle.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Prepared,
    Authorized,
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    /// Whether this status has no further valid transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Failed)
    }

    /// The set of statuses reachable in one transition from `self`,
    /// excluding the `pending -> pending` self-transition (which the ledger
    /// never observes as a distinct transition; see module docs).
    pub fn valid_transitions(self) -> &'static [PaymentStatus] {
        match self {
            Self::Prepared => &[Self::Authorized, Self::Failed],
            Self::Authorized => &[Self::Pending, Self::Failed],
            Self::Pending => &[Self::Paid, Self::Failed],
            Self::Paid => &[],
            Self::Failed => &[],
        }
    }

    /// True iff `candidate` is a legal next status for `self`, including the
    /// `pending -> pending` poll-again self-transition.
    pub fn next_state_valid(self, candidate: PaymentStatus) -> bool {
        if self == Self::Pending && candidate == Self::Pending {
            return true;
        }
        self.valid_transitions().contains(&candidate)
    }

    /// Every path from `prepared` to a terminal status. Used only by tests
    /// (section 8, scenario S6).
    pub fn all_valid_transition_sequences() -> Vec<Vec<PaymentStatus>> {
        fn walk(
            current: PaymentStatus,
            path: &mut Vec<PaymentStatus>,
            out: &mut Vec<Vec<PaymentStatus>>,
        ) {
            if current.is_terminal() {
                out.push(path.clone());
                return;
            }
            for &next in current.valid_transitions() {
                path.push(next);
                walk(next, path, out);
                path.pop();
            }
        }

        let mut out = Vec::new();
        let mut path = vec![PaymentStatus::Prepared];
        walk(PaymentStatus::Prepared, &mut path, &mut out);
        out
    }
}

/// Iterates every [`PaymentStatus`] variant; used by proptests that need to
/// sample the full status space.
pub fn all_statuses() -> impl Iterator<Item = PaymentStatus> {
    PaymentStatus::iter()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prepared_advances_to_authorized_or_failed() {
        assert!(PaymentStatus::Prepared.next_state_valid(PaymentStatus::Authorized));
        assert!(PaymentStatus::Prepared.next_state_valid(PaymentStatus::Failed));
        assert!(!PaymentStatus::Prepared.next_state_valid(PaymentStatus::Pending));
        assert!(!PaymentStatus::Prepared.next_state_valid(PaymentStatus::Paid));
    }

    #[test]
    fn pending_self_transition_is_valid() {
        assert!(PaymentStatus::Pending.next_state_valid(PaymentStatus::Pending));
    }

    #[test]
    fn terminal_statuses_have_no_transitions() {
        assert!(PaymentStatus::Paid.valid_transitions().is_empty());
        assert!(PaymentStatus::Failed.valid_transitions().is_empty());
        assert!(!PaymentStatus::Paid.next_state_valid(PaymentStatus::Failed));
    }

    #[test]
    fn only_pending_has_a_self_transition() {
        for status in all_statuses() {
            if status != PaymentStatus::Pending {
                assert!(!status.next_state_valid(status), "{status} should not self-transition");
            }
        }
    }

    /// Scenario S6: exactly these five paths, and nothing else.
    #[test]
    fn all_valid_transition_sequences_matches_scenario_s6() {
        use PaymentStatus::*;
        let mut got = PaymentStatus::all_valid_transition_sequences();
        got.sort();

        let mut want = vec![
            vec![Prepared, Authorized, Pending, Paid],
            vec![Prepared, Authorized, Pending, Failed],
            vec![Prepared, Authorized, Failed],
            vec![Prepared, Failed],
        ];
        want.sort();

        assert_eq!(got, want);
    }

    fn arb_status() -> impl proptest::strategy::Strategy<Value = PaymentStatus> {
        use proptest::prelude::*;
        prop_oneof![
            Just(PaymentStatus::Prepared),
            Just(PaymentStatus::Authorized),
            Just(PaymentStatus::Pending),
            Just(PaymentStatus::Paid),
            Just(PaymentStatus::Failed),
        ]
    }

    /// Every path `all_valid_transition_sequences` produces is itself a
    /// chain of individually-legal transitions ending in a terminal status.
    #[test]
    fn transition_sequences_are_all_individually_legal() {
        for path in PaymentStatus::all_valid_transition_sequences() {
            let mut prev = PaymentStatus::Prepared;
            for &next in &path {
                assert!(prev.valid_transitions().contains(&next));
                prev = next;
            }
            assert!(prev.is_terminal());
        }
    }

    proptest::proptest! {
        /// A terminal status never has a valid next status, and a
        /// non-`pending` status never self-transitions.
        #[test]
        fn terminal_statuses_never_transition(status in arb_status()) {
            if status.is_terminal() {
                proptest::prop_assert!(status.valid_transitions().is_empty());
            }
            if status != PaymentStatus::Pending {
                proptest::prop_assert!(!status.next_state_valid(status));
            }
        }
    }
}
