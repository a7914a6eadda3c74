//! Eligibility decision over a sibling set.
//!
//! Pure function: no I/O, no clocks. Given our candidate and a fresh,
//! sequence-ordered sibling set it decides whether we hold the lock or which
//! single node we must wait on.
//!
//! # Rules
//!
//! - Write: eligible iff no sibling has a lower sequence number. Otherwise
//!   wait on the immediately preceding sibling, whatever its kind.
//! - Read: eligible iff no `write-` sibling has a lower sequence number.
//!   Otherwise wait on the nearest preceding writer. Readers never wait on
//!   readers.
//!
//! Waiting on exactly one predecessor means a deletion wakes at most the
//! waiters directly behind it instead of the whole queue.

use crate::node::{CandidateNode, NodeKind};

/// Outcome of one evaluation round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The candidate may hold the lock now.
    Eligible,
    /// The candidate must wait for `predecessor` to be deleted.
    Blocked {
        /// Sibling whose deletion triggers the next evaluation.
        predecessor: CandidateNode,
    },
    /// The candidate is not in the sibling set.
    Missing,
}

/// Decide eligibility of `own` within `siblings`.
///
/// `siblings` must be sorted ascending by sequence number, as returned by
/// [`crate::node::sibling_set`].
pub fn evaluate(own: &CandidateNode, siblings: &[CandidateNode]) -> Verdict {
    let Some(position) = siblings.iter().position(|node| node.name == own.name) else {
        return Verdict::Missing;
    };
    let ahead = &siblings[..position];

    let blocker = match own.kind {
        NodeKind::Write => ahead.last(),
        NodeKind::Read => ahead.iter().rev().find(|node| node.kind == NodeKind::Write),
    };

    match blocker {
        Some(predecessor) => Verdict::Blocked { predecessor: predecessor.clone() },
        None => Verdict::Eligible,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::node::sibling_set;

    fn node(kind: NodeKind, seq: u64) -> CandidateNode {
        CandidateNode { name: format!("{}{seq:010}", kind.prefix()), kind, seq }
    }

    fn blocked_on(verdict: &Verdict) -> Option<u64> {
        match verdict {
            Verdict::Blocked { predecessor } => Some(predecessor.seq),
            _ => None,
        }
    }

    #[test]
    fn lone_writer_is_eligible() {
        let own = node(NodeKind::Write, 1);
        assert_eq!(evaluate(&own, &[own.clone()]), Verdict::Eligible);
    }

    #[test]
    fn writer_waits_on_immediate_predecessor() {
        let siblings = vec![node(NodeKind::Write, 1), node(NodeKind::Read, 2), node(NodeKind::Write, 3)];
        let verdict = evaluate(&siblings[2], &siblings);
        assert_eq!(blocked_on(&verdict), Some(2));
    }

    #[test]
    fn readers_share() {
        let siblings = vec![node(NodeKind::Read, 1), node(NodeKind::Read, 2), node(NodeKind::Read, 3)];
        for own in &siblings {
            assert_eq!(evaluate(own, &siblings), Verdict::Eligible);
        }
    }

    #[test]
    fn reader_waits_on_nearest_writer() {
        let siblings = vec![
            node(NodeKind::Write, 1),
            node(NodeKind::Read, 2),
            node(NodeKind::Write, 3),
            node(NodeKind::Read, 4),
            node(NodeKind::Read, 5),
        ];
        assert_eq!(blocked_on(&evaluate(&siblings[4], &siblings)), Some(3));
        assert_eq!(blocked_on(&evaluate(&siblings[1], &siblings)), Some(1));
    }

    #[test]
    fn later_writer_does_not_block_earlier_reader() {
        let siblings = vec![node(NodeKind::Read, 1), node(NodeKind::Write, 2)];
        assert_eq!(evaluate(&siblings[0], &siblings), Verdict::Eligible);
        assert_eq!(blocked_on(&evaluate(&siblings[1], &siblings)), Some(1));
    }

    #[test]
    fn missing_candidate() {
        let siblings = vec![node(NodeKind::Read, 1)];
        assert_eq!(evaluate(&node(NodeKind::Write, 9), &siblings), Verdict::Missing);
    }

    fn kinds() -> impl Strategy<Value = Vec<NodeKind>> {
        prop::collection::vec(prop_oneof![Just(NodeKind::Read), Just(NodeKind::Write)], 1..24)
    }

    proptest! {
        /// At any instant the eligible set is either one writer at the head
        /// or a run of readers at the head.
        #[test]
        fn prop_eligible_set_is_exclusive(kinds in kinds(), gaps in prop::collection::vec(1u64..5, 24)) {
            let mut seq = 0;
            let names: Vec<String> = kinds
                .iter()
                .zip(&gaps)
                .map(|(kind, gap)| {
                    seq += gap;
                    format!("{}{seq:010}", kind.prefix())
                })
                .collect();
            let siblings = sibling_set(&names);

            let eligible: Vec<_> =
                siblings.iter().filter(|own| evaluate(own, &siblings) == Verdict::Eligible).collect();

            prop_assert!(!eligible.is_empty(), "head of the queue is always eligible");
            let writers = eligible.iter().filter(|n| n.kind == NodeKind::Write).count();
            if writers > 0 {
                prop_assert_eq!(eligible.len(), 1);
                prop_assert_eq!(eligible[0].seq, siblings[0].seq);
            } else {
                let run = siblings.iter().take_while(|n| n.kind == NodeKind::Read).count();
                prop_assert_eq!(eligible.len(), run);
            }
        }

        /// A blocked candidate always waits on an earlier node that actually
        /// conflicts with it.
        #[test]
        fn prop_predecessor_precedes_and_conflicts(kinds in kinds()) {
            let siblings: Vec<_> =
                kinds.iter().enumerate().map(|(i, kind)| node(*kind, i as u64)).collect();

            for own in &siblings {
                if let Verdict::Blocked { predecessor } = evaluate(own, &siblings) {
                    prop_assert!(predecessor.seq < own.seq);
                    prop_assert!(own.kind == NodeKind::Write || predecessor.kind == NodeKind::Write);
                }
            }
        }
    }
}
