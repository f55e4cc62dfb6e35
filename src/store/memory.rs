//! In-process governance store.
//!
//! All state sits behind one mutex and every trait method completes under a
//! single lock acquisition, so each method is trivially serializable. Used by
//! tests and by the `memory` backend setting.

use super::{GovernanceStore, StoreError, StoreResult};
use crate::proposal::tally::{Finalization, QuorumRule};
use crate::types::*;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory governance store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    organizations: BTreeMap<OrganizationId, Organization>,
    memberships: BTreeMap<MembershipId, Membership>,
    membership_index: HashMap<(OrganizationId, UserId), MembershipId>,
    proposals: BTreeMap<ProposalId, Proposal>,
    votes: BTreeMap<VoteId, Vote>,
    vote_index: HashMap<(ProposalId, UserId), VoteId>,
    treasuries: HashMap<OrganizationId, Treasury>,
    transactions: Vec<TreasuryTransaction>,
    /// Number of upcoming calls that fail with a conflict.
    injected_conflicts: u32,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_injected_conflict(&mut self) -> StoreResult<()> {
        if self.injected_conflicts > 0 {
            self.injected_conflicts -= 1;
            return Err(StoreError::Conflict("injected conflict".to_string()));
        }
        Ok(())
    }

    fn approved_members(&self, organization: OrganizationId) -> u64 {
        self.memberships
            .values()
            .filter(|m| m.organization_id == organization && m.is_approved())
            .count() as u64
    }

    fn tally(&self, proposal: ProposalId) -> VoteTally {
        VoteTally::from_votes(self.votes.values().filter(|v| v.proposal_id == proposal))
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` store calls fail with [`StoreError::Conflict`].
    ///
    /// Exercises the retry path of the engines.
    pub fn inject_conflicts(&self, count: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.injected_conflicts = count;
        }
    }

    /// Lock state for one unit of work.
    fn begin(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        state.take_injected_conflict()?;
        Ok(state)
    }
}

#[async_trait]
impl GovernanceStore for MemoryStore {
    async fn create_organization(
        &self,
        draft: NewOrganization,
        now: Timestamp,
    ) -> StoreResult<Organization> {
        let mut state = self.begin()?;

        let organization = Organization {
            id: OrganizationId(state.next_id()),
            name: draft.name,
            mission: draft.mission,
            rules: draft.rules,
            owner_id: draft.owner_id,
            created_at: now,
        };

        let owner = Membership {
            id: MembershipId(state.next_id()),
            organization_id: organization.id,
            user_id: draft.owner_id,
            status: MembershipStatus::Approved,
            role: Role::Owner,
            joined_at: now,
        };

        let treasury = Treasury {
            organization_id: organization.id,
            balance: Amount::ZERO,
            currency: draft.currency,
            updated_at: now,
        };

        state
            .membership_index
            .insert((organization.id, owner.user_id), owner.id);
        state.memberships.insert(owner.id, owner);
        state.treasuries.insert(organization.id, treasury);
        state
            .organizations
            .insert(organization.id, organization.clone());

        Ok(organization)
    }

    async fn organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        let state = self.begin()?;
        Ok(state.organizations.get(&id).cloned())
    }

    async fn organizations(&self) -> StoreResult<Vec<Organization>> {
        let state = self.begin()?;
        // Ids are allocated in creation order
        Ok(state.organizations.values().rev().cloned().collect())
    }

    async fn membership(&self, id: MembershipId) -> StoreResult<Option<Membership>> {
        let state = self.begin()?;
        Ok(state.memberships.get(&id).cloned())
    }

    async fn membership_for(
        &self,
        organization: OrganizationId,
        user: UserId,
    ) -> StoreResult<Option<Membership>> {
        let state = self.begin()?;
        Ok(state
            .membership_index
            .get(&(organization, user))
            .and_then(|id| state.memberships.get(id))
            .cloned())
    }

    async fn memberships(&self, organization: OrganizationId) -> StoreResult<Vec<Membership>> {
        let state = self.begin()?;
        Ok(state
            .memberships
            .values()
            .rev()
            .filter(|m| m.organization_id == organization)
            .cloned()
            .collect())
    }

    async fn count_approved_members(&self, organization: OrganizationId) -> StoreResult<u64> {
        let state = self.begin()?;
        Ok(state.approved_members(organization))
    }

    async fn insert_membership(
        &self,
        organization: OrganizationId,
        user: UserId,
        status: MembershipStatus,
        role: Role,
        now: Timestamp,
    ) -> StoreResult<Membership> {
        let mut state = self.begin()?;

        if state.membership_index.contains_key(&(organization, user)) {
            return Err(StoreError::UniqueViolation(format!(
                "membership ({}, {}) already exists",
                organization, user
            )));
        }

        let membership = Membership {
            id: MembershipId(state.next_id()),
            organization_id: organization,
            user_id: user,
            status,
            role,
            joined_at: now,
        };

        state
            .membership_index
            .insert((organization, user), membership.id);
        state.memberships.insert(membership.id, membership.clone());

        Ok(membership)
    }

    async fn transition_membership(
        &self,
        id: MembershipId,
        from: MembershipStatus,
        to: MembershipStatus,
    ) -> StoreResult<Option<Membership>> {
        let mut state = self.begin()?;

        match state.memberships.get_mut(&id) {
            Some(membership) if membership.status == from && !membership.is_owner() => {
                membership.status = to;
                Ok(Some(membership.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_membership(
        &self,
        id: MembershipId,
        expected: MembershipStatus,
    ) -> StoreResult<bool> {
        let mut state = self.begin()?;

        let removable = state
            .memberships
            .get(&id)
            .is_some_and(|m| m.status == expected && !m.is_owner());
        if !removable {
            return Ok(false);
        }

        if let Some(membership) = state.memberships.remove(&id) {
            state
                .membership_index
                .remove(&(membership.organization_id, membership.user_id));
        }
        Ok(true)
    }

    async fn insert_proposal(&self, draft: NewProposal, now: Timestamp) -> StoreResult<Proposal> {
        let mut state = self.begin()?;

        let proposal = Proposal {
            id: ProposalId(state.next_id()),
            organization_id: draft.organization_id,
            creator_id: draft.creator_id,
            title: draft.title,
            description: draft.description,
            deadline: draft.deadline,
            status: ProposalStatus::Active,
            created_at: now,
            finalized_at: None,
        };

        state.proposals.insert(proposal.id, proposal.clone());
        Ok(proposal)
    }

    async fn proposal(&self, id: ProposalId) -> StoreResult<Option<Proposal>> {
        let state = self.begin()?;
        Ok(state.proposals.get(&id).cloned())
    }

    async fn proposals(&self, organization: OrganizationId) -> StoreResult<Vec<Proposal>> {
        let state = self.begin()?;
        Ok(state
            .proposals
            .values()
            .rev()
            .filter(|p| p.organization_id == organization)
            .cloned()
            .collect())
    }

    async fn votes(&self, proposal: ProposalId) -> StoreResult<Vec<Vote>> {
        let state = self.begin()?;
        Ok(state
            .votes
            .values()
            .filter(|v| v.proposal_id == proposal)
            .cloned()
            .collect())
    }

    async fn upsert_vote(
        &self,
        proposal: ProposalId,
        user: UserId,
        choice: VoteChoice,
        now: Timestamp,
    ) -> StoreResult<Option<Vote>> {
        let mut state = self.begin()?;

        let organization = match state.proposals.get(&proposal) {
            Some(p) if p.status == ProposalStatus::Active && now < p.deadline => {
                p.organization_id
            }
            _ => return Ok(None),
        };

        let eligible = state
            .membership_index
            .get(&(organization, user))
            .and_then(|id| state.memberships.get(id))
            .is_some_and(Membership::is_approved);
        if !eligible {
            return Ok(None);
        }

        let vote = match state.vote_index.get(&(proposal, user)).copied() {
            Some(existing) => {
                let vote = state
                    .votes
                    .get_mut(&existing)
                    .ok_or_else(|| {
                        StoreError::Corrupt(format!("vote index points at missing vote {existing}"))
                    })?;
                vote.choice = choice;
                vote.voted_at = now;
                vote.clone()
            }
            None => {
                let vote = Vote {
                    id: VoteId(state.next_id()),
                    proposal_id: proposal,
                    user_id: user,
                    choice,
                    voted_at: now,
                };
                state.vote_index.insert((proposal, user), vote.id);
                state.votes.insert(vote.id, vote.clone());
                vote
            }
        };

        Ok(Some(vote))
    }

    async fn finalize_proposal(
        &self,
        proposal: ProposalId,
        now: Timestamp,
        rule: QuorumRule,
    ) -> StoreResult<Option<Finalization>> {
        let mut state = self.begin()?;

        let organization = match state.proposals.get(&proposal) {
            Some(p) if p.status == ProposalStatus::Active && now >= p.deadline => {
                p.organization_id
            }
            _ => return Ok(None),
        };

        let tally = state.tally(proposal);
        let total_members = state.approved_members(organization);
        let decision = rule.decide(&tally, total_members);

        let stored = match state.proposals.get_mut(&proposal) {
            Some(p) => {
                p.status = decision.status;
                p.finalized_at = Some(now);
                p.clone()
            }
            None => return Ok(None),
        };

        Ok(Some(Finalization {
            proposal: stored,
            tally,
            total_members,
            quorum_required: decision.quorum_required,
            quorum_met: decision.quorum_met,
        }))
    }

    async fn treasury(&self, organization: OrganizationId) -> StoreResult<Option<Treasury>> {
        let state = self.begin()?;
        Ok(state.treasuries.get(&organization).cloned())
    }

    async fn apply_treasury_entry(
        &self,
        entry: NewTransaction,
    ) -> StoreResult<Option<(Treasury, TreasuryTransaction)>> {
        let mut state = self.begin()?;

        let new_balance = match state.treasuries.get(&entry.organization_id) {
            Some(treasury) => match treasury.balance.checked_add(entry.amount) {
                Some(balance) if !balance.is_negative() => balance,
                _ => return Ok(None),
            },
            None => return Ok(None),
        };

        let transaction = TreasuryTransaction {
            id: TransactionId(state.next_id()),
            organization_id: entry.organization_id,
            amount: entry.amount,
            kind: entry.kind,
            description: entry.description,
            actor_id: entry.actor_id,
            created_at: entry.created_at,
        };

        let treasury = match state.treasuries.get_mut(&entry.organization_id) {
            Some(treasury) => {
                treasury.balance = new_balance;
                treasury.updated_at = entry.created_at;
                treasury.clone()
            }
            None => return Ok(None),
        };
        state.transactions.push(transaction.clone());

        Ok(Some((treasury, transaction)))
    }

    async fn transactions(
        &self,
        organization: OrganizationId,
        limit: usize,
    ) -> StoreResult<Vec<TreasuryTransaction>> {
        let state = self.begin()?;
        // Appended in commit order, so reverse is most recent first
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.organization_id == organization)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ledger_sum(&self, organization: OrganizationId) -> StoreResult<Amount> {
        let state = self.begin()?;
        state
            .transactions
            .iter()
            .filter(|t| t.organization_id == organization)
            .try_fold(Amount::ZERO, |sum, t| sum.checked_add(t.amount))
            .ok_or_else(|| StoreError::Corrupt(format!("ledger sum overflow for {}", organization)))
    }
}
