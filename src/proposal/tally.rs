//! Quorum and majority arithmetic for proposal finalization.
//!
//! Pure functions only; the store applies them inside its finalize
//! transaction so the inputs come from one consistent snapshot.

use crate::types::{Proposal, ProposalStatus, VoteTally};
use serde::{Deserialize, Serialize};

/// Default share of approved members that must vote.
pub const DEFAULT_QUORUM_PERCENT: u8 = 50;

/// Participation rule applied at finalization.
///
/// Quorum is met when `total_votes >= ceil(total_members * percent / 100)`;
/// the threshold is inclusive, so exactly half of ten members is enough at
/// 50%. With quorum met, `yes > no` approves and anything else (including a
/// tie) rejects. Abstentions count toward quorum only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumRule {
    percent: u8,
}

impl Default for QuorumRule {
    fn default() -> Self {
        Self {
            percent: DEFAULT_QUORUM_PERCENT,
        }
    }
}

impl QuorumRule {
    /// Returns `None` unless `1 <= percent <= 100`.
    pub fn new(percent: u8) -> Option<Self> {
        (1..=100).contains(&percent).then_some(Self { percent })
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Minimum number of votes for quorum, rounded up.
    pub fn required_votes(&self, total_members: u64) -> u64 {
        let scaled = total_members.saturating_mul(u64::from(self.percent));
        scaled.div_ceil(100)
    }

    /// Decide the terminal status for a tally.
    pub fn decide(&self, tally: &VoteTally, total_members: u64) -> Decision {
        let quorum_required = self.required_votes(total_members);
        let quorum_met = tally.total() >= quorum_required;

        let status = if !quorum_met {
            ProposalStatus::QuorumNotMet
        } else if tally.yes > tally.no {
            ProposalStatus::Approved
        } else {
            ProposalStatus::Rejected
        };

        Decision {
            status,
            quorum_required,
            quorum_met,
        }
    }
}

/// Outcome of applying a [`QuorumRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub status: ProposalStatus,
    pub quorum_required: u64,
    pub quorum_met: bool,
}

/// Report of a completed finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalization {
    /// Proposal as stored after finalization (terminal status).
    pub proposal: Proposal,
    pub tally: VoteTally,
    /// Approved members at the finalization snapshot.
    pub total_members: u64,
    pub quorum_required: u64,
    pub quorum_met: bool,
}

impl Finalization {
    pub fn outcome(&self) -> ProposalStatus {
        self.proposal.status
    }
}
