// ============================================================================
// Transaction Engines
// ============================================================================
//
// - ReadEngine: read-only retry loop (snapshot, no locks)
// - CommitEngine: lock / validate / write-back / publish / unlock
// - FairnessController: starvation detection, backoff and parking
// - Stm: owns one global epoch and drives the retry loops
//
// ============================================================================

pub mod commit;
pub mod fairness;
pub mod read;
pub mod stm;

pub use commit::{CommitEngine, CommitOutcome};
pub use fairness::{Admission, Attempts, FairnessController, StarveGuard};
pub use read::ReadEngine;
pub use stm::Stm;
