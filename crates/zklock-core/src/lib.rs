//! zklock Core
//!
//! A fair read/write lock built from four coordination-service primitives:
//! create an ephemeral sequential node, list children, watch a node for
//! deletion, and delete a node.
//!
//! # Architecture
//!
//! ```text
//! ZkRwLock::{r}lock
//!   ├─ create   <path>/read-NNNNNNNNNN | <path>/write-NNNNNNNNNN
//!   ├─ children <path>            (fresh sibling set every round)
//!   ├─ evaluate                   (pure: eligible or blocked on predecessor)
//!   └─ watch    <path>/<predecessor>, suspend until it fires, repeat
//! ```
//!
//! The coordination service is reached only through the [`Coordinator`]
//! trait. Production code plugs in a real ensemble client; tests use the
//! in-memory ensemble from `zklock-harness`.
//!
//! # Components
//!
//! - [`ZkRwLock`]: single-use lock handle and its acquisition loop
//! - [`evaluate`]: sibling-set eligibility decision
//! - [`CandidateNode`]: parsed `read-`/`write-` sequential node name
//! - [`Coordinator`], [`Watch`], [`WatchEvent`]: consumed primitives
//! - [`Acl`], [`Perms`]: access control attached to created nodes

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod acl;
pub mod coord;
pub mod eligibility;
pub mod error;
pub mod node;
pub mod rwlock;

pub use acl::{Acl, Perms};
pub use coord::{Coordinator, Watch, WatchEvent};
pub use eligibility::{Verdict, evaluate};
pub use error::{CoordError, LockError};
pub use node::{CandidateNode, NodeKind, sibling_set};
pub use rwlock::{LockConfig, LockState, ZkRwLock};
