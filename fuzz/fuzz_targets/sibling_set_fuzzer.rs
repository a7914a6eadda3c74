//! Fuzz target for sibling-set parsing and eligibility
//!
//! Prevent double grants and self-waits from malformed or adversarial child
//! listings.
//!
//! # Strategy
//!
//! - Child names: well-formed `read-`/`write-` names mixed with arbitrary
//!   strings (foreign children, truncated names, huge numbers)
//! - Sequence gaps and duplicates across kinds
//!
//! # Invariants
//!
//! - Parsed siblings are sorted by sequence number
//! - NEVER panic on any child name
//! - A candidate never waits on itself or on a later node
//! - A reader never waits on a reader
//! - If a writer is eligible it is the only eligible node
//! - The head of a non-empty sibling set is eligible
//! - Duplicate sequence numbers are only checked for panics

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use zklock_core::{NodeKind, Verdict, evaluate, sibling_set};

#[derive(Debug, Clone, Arbitrary)]
enum FuzzedChild {
    Read { seq: u32 },
    Write { seq: u32 },
    Raw(String),
}

impl FuzzedChild {
    fn name(&self) -> String {
        match self {
            Self::Read { seq } => format!("read-{seq:010}"),
            Self::Write { seq } => format!("write-{seq:010}"),
            Self::Raw(name) => name.clone(),
        }
    }
}

fuzz_target!(|children: Vec<FuzzedChild>| {
    let names: Vec<String> = children.iter().map(FuzzedChild::name).collect();
    let siblings = sibling_set(&names);

    assert!(siblings.windows(2).all(|pair| pair[0].seq <= pair[1].seq));

    // The service never hands out a sequence number twice; only check that
    // duplicates do not panic.
    let unique = siblings.windows(2).all(|pair| pair[0].seq != pair[1].seq);
    if !unique {
        for own in &siblings {
            let _ = evaluate(own, &siblings);
        }
        return;
    }

    let mut eligible_writers = 0;
    let mut eligible = 0;
    for own in &siblings {
        match evaluate(own, &siblings) {
            Verdict::Eligible => {
                eligible += 1;
                if own.kind == NodeKind::Write {
                    eligible_writers += 1;
                }
            },
            Verdict::Blocked { predecessor } => {
                assert!(predecessor.seq < own.seq, "waits on {predecessor:?} from {own:?}");
                assert!(
                    own.kind == NodeKind::Write || predecessor.kind == NodeKind::Write,
                    "reader waits on reader"
                );
            },
            Verdict::Missing => panic!("listed candidate reported missing: {own:?}"),
        }
    }

    if eligible_writers > 0 {
        assert_eq!(eligible, 1, "writer shares the lock");
    }

    if !siblings.is_empty() {
        assert_eq!(evaluate(&siblings[0], &siblings), Verdict::Eligible);
    }
});
