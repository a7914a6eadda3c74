//! Contention simulator.
//!
//! Runs many readers and writers, each on its own session, against one lock
//! path in a [`MemoryEnsemble`] and checks mutual exclusion from the outside
//! with shared counters.
//!
//! ```text
//! zklock-sim
//!   ├─ MemoryEnsemble        (shared znode tree)
//!   ├─ reader tasks × N      (session each, rlock/hold/runlock per round)
//!   ├─ writer tasks × M      (session each, lock/hold/unlock per round)
//!   └─ Occupancy             (atomic counters, violation tally)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use zklock_core::{Acl, CoordError, LockConfig, LockError, NodeKind, Perms, ZkRwLock};
use zklock_harness::MemoryEnsemble;

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Number of reader tasks.
    pub readers: usize,
    /// Number of writer tasks.
    pub writers: usize,
    /// Acquisitions per task.
    pub rounds: usize,
    /// Upper bound of the random hold time, in milliseconds.
    pub hold_ms: u64,
    /// RNG seed for hold times.
    pub seed: u64,
    /// Lock path, created if missing.
    pub lock_path: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            readers: 8,
            writers: 4,
            rounds: 10,
            hold_ms: 5,
            seed: 0,
            lock_path: "/zklock/sim".to_string(),
        }
    }
}

/// Errors that end a simulation.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Setting up the ensemble failed.
    #[error("setup failed: {0}")]
    Setup(#[from] CoordError),

    /// A worker's lock call failed.
    #[error("worker {worker} failed: {source}")]
    Lock {
        /// Worker index.
        worker: usize,
        /// Underlying lock error.
        source: LockError,
    },

    /// A worker task panicked or was cancelled.
    #[error("worker task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Exclusion was violated at least once.
    #[error("mutual exclusion violated {0} times")]
    Violation(usize),

    /// Candidates were left under the lock path.
    #[error("{0} candidate nodes left behind")]
    Leftover(usize),
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimReport {
    /// Read acquisitions completed.
    pub reads: usize,
    /// Write acquisitions completed.
    pub writes: usize,
    /// Highest number of readers observed inside at once.
    pub max_concurrent_readers: usize,
    /// Watch notifications delivered by the ensemble.
    pub watches_fired: u64,
    /// Wall time of the run.
    pub elapsed: Duration,
}

/// Who is inside the critical section right now.
#[derive(Debug, Default)]
struct Occupancy {
    readers: AtomicUsize,
    writers: AtomicUsize,
    max_readers: AtomicUsize,
    violations: AtomicUsize,
}

impl Occupancy {
    fn enter(&self, kind: NodeKind) {
        match kind {
            NodeKind::Read => {
                let inside = self.readers.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_readers.fetch_max(inside, Ordering::SeqCst);
                if self.writers.load(Ordering::SeqCst) != 0 {
                    self.violation("reader entered while a writer holds");
                }
            },
            NodeKind::Write => {
                if self.writers.fetch_add(1, Ordering::SeqCst) != 0 {
                    self.violation("two writers inside");
                }
                if self.readers.load(Ordering::SeqCst) != 0 {
                    self.violation("writer entered while readers hold");
                }
            },
        }
    }

    fn leave(&self, kind: NodeKind) {
        match kind {
            NodeKind::Read => self.readers.fetch_sub(1, Ordering::SeqCst),
            NodeKind::Write => self.writers.fetch_sub(1, Ordering::SeqCst),
        };
    }

    fn violation(&self, what: &str) {
        tracing::error!(what, "exclusion violated");
        self.violations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Run the simulation to completion.
///
/// # Errors
///
/// Returns `SimError` if setup fails, any lock call fails, exclusion is
/// violated, or candidates remain afterwards.
pub async fn run(config: SimConfig) -> Result<SimReport, SimError> {
    let ensemble = MemoryEnsemble::new();
    ensemble.ensure_path(&config.lock_path)?;

    let occupancy = Arc::new(Occupancy::default());
    let started = Instant::now();
    let mut tasks = Vec::with_capacity(config.readers + config.writers);

    let kinds = std::iter::repeat_n(NodeKind::Read, config.readers)
        .chain(std::iter::repeat_n(NodeKind::Write, config.writers));
    for (worker, kind) in kinds.enumerate() {
        let session = ensemble.connect();
        let occupancy = Arc::clone(&occupancy);
        let config = config.clone();
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(worker as u64));

        tasks.push(tokio::spawn(async move {
            for round in 0..config.rounds {
                let lock_config = LockConfig::new(config.lock_path.as_str())
                    .with_acl(Acl::world(Perms::ALL))
                    .with_data(format!("worker-{worker}/round-{round}"));
                let mut lock = ZkRwLock::with_config(Arc::clone(&session), lock_config);

                let acquired = match kind {
                    NodeKind::Read => lock.rlock().await,
                    NodeKind::Write => lock.lock().await,
                };
                acquired.map_err(|source| SimError::Lock { worker, source })?;

                occupancy.enter(kind);
                let hold = rng.gen_range(0..=config.hold_ms);
                tokio::time::sleep(Duration::from_millis(hold)).await;
                occupancy.leave(kind);

                let released = match kind {
                    NodeKind::Read => lock.runlock().await,
                    NodeKind::Write => lock.unlock().await,
                };
                released.map_err(|source| SimError::Lock { worker, source })?;
            }
            tracing::debug!(worker, %kind, rounds = config.rounds, "worker done");
            Ok::<_, SimError>(())
        }));
    }

    for task in tasks {
        task.await??;
    }

    let violations = occupancy.violations.load(Ordering::SeqCst);
    if violations > 0 {
        return Err(SimError::Violation(violations));
    }
    let leftover = ensemble.child_count(&config.lock_path);
    if leftover > 0 {
        return Err(SimError::Leftover(leftover));
    }

    Ok(SimReport {
        reads: config.readers * config.rounds,
        writes: config.writers * config.rounds,
        max_concurrent_readers: occupancy.max_readers.load(Ordering::SeqCst),
        watches_fired: ensemble.watches_fired(),
        elapsed: started.elapsed(),
    })
}
