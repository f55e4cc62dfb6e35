//! Proposals: creation, voting and quorum-based finalization.
//!
//! Lifecycle:
//! 1. An approved member creates a proposal with a deadline in the future
//! 2. Approved members vote yes/no/abstain until the deadline; re-voting
//!    replaces the earlier choice
//! 3. Once the deadline has passed any approved member may finalize it,
//!    exactly once, into `approved`, `rejected` or `quorum_not_met`

pub mod engine;
pub mod tally;

pub use engine::{ProposalEngine, ProposalView, MAX_TITLE_CHARS};
pub use tally::{Decision, Finalization, QuorumRule, DEFAULT_QUORUM_PERCENT};
