//! Proposal engine.
//!
//! Every precondition is checked up front so callers get a precise error,
//! then enforced again by the store's guarded write. When the write's guard
//! fails (a finalize or removal committed in between), the proposal is
//! re-read and the failure classified from what is stored now.

use super::tally::{Finalization, QuorumRule};
use crate::context::Context;
use crate::error::{GovernanceError, GovernanceResult, Resource};
use crate::membership::{require_approved, require_organization};
use crate::store::GovernanceStore;
use crate::types::{
    NewProposal, OrganizationId, Proposal, ProposalId, ProposalStatus, Timestamp, UserId, Vote,
    VoteChoice, VoteTally,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Longest accepted proposal title, in characters.
pub const MAX_TITLE_CHARS: usize = 200;

/// A proposal with its current tally and the viewer's own vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalView {
    pub proposal: Proposal,
    pub tally: VoteTally,
    pub my_vote: Option<VoteChoice>,
}

pub struct ProposalEngine<S: GovernanceStore + ?Sized> {
    ctx: Context<S>,
    rule: QuorumRule,
}

impl<S: GovernanceStore + ?Sized> ProposalEngine<S> {
    pub fn new(ctx: Context<S>, rule: QuorumRule) -> Self {
        Self { ctx, rule }
    }

    pub fn rule(&self) -> QuorumRule {
        self.rule
    }

    /// Open a new proposal.
    ///
    /// The title is trimmed and must be 1-200 characters; the deadline must
    /// be strictly in the future.
    pub async fn create(
        &self,
        actor: UserId,
        organization: OrganizationId,
        title: &str,
        description: &str,
        deadline: Timestamp,
    ) -> GovernanceResult<Proposal> {
        require_organization(&self.ctx, organization).await?;
        require_approved(&self.ctx, organization, actor).await?;

        let title = title.trim();
        let title_len = title.chars().count();
        if title_len == 0 {
            return Err(GovernanceError::invalid("title must not be empty"));
        }
        if title_len > MAX_TITLE_CHARS {
            return Err(GovernanceError::invalid(format!(
                "title must be at most {} characters",
                MAX_TITLE_CHARS
            )));
        }

        let now = self.ctx.now();
        if deadline <= now {
            return Err(GovernanceError::invalid("deadline must be in the future"));
        }

        let draft = NewProposal {
            organization_id: organization,
            creator_id: actor,
            title: title.to_string(),
            description: description.trim().to_string(),
            deadline,
        };

        let proposal = self
            .ctx
            .run(|| self.ctx.store.insert_proposal(draft.clone(), now))
            .await?;

        info!(
            organization = %organization,
            proposal = %proposal.id,
            creator = %actor,
            deadline,
            "proposal created"
        );
        Ok(proposal)
    }

    /// Record or replace `actor`'s vote.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the proposal does not exist
    /// - `Forbidden` unless `actor` is an approved member
    /// - `AlreadyFinalized` if the proposal is no longer active
    /// - `DeadlinePassed` once `now >= deadline`
    pub async fn cast_vote(
        &self,
        actor: UserId,
        proposal_id: ProposalId,
        choice: VoteChoice,
    ) -> GovernanceResult<Vote> {
        let proposal = self.load(proposal_id).await?;
        require_approved(&self.ctx, proposal.organization_id, actor).await?;

        let now = self.ctx.now();
        check_open(&proposal, now)?;

        let vote = self
            .ctx
            .run(|| self.ctx.store.upsert_vote(proposal_id, actor, choice, now))
            .await?;

        match vote {
            Some(vote) => {
                info!(proposal = %proposal_id, voter = %actor, choice = %choice, "vote recorded");
                Ok(vote)
            }
            None => {
                warn!(proposal = %proposal_id, voter = %actor, "vote guard failed, re-reading");
                Err(self.classify_vote_failure(proposal_id, actor, now).await)
            }
        }
    }

    /// Close voting and store the outcome.
    ///
    /// Requires the deadline to have passed (`now >= deadline`). The vote
    /// snapshot, member count and status write happen in one store unit, so
    /// a vote racing the deadline is either counted or rejected, never both.
    ///
    /// # Errors
    ///
    /// Any authenticated user may trigger it; membership is not checked.
    ///
    /// - `NotFound` if the proposal does not exist
    /// - `AlreadyFinalized` if the proposal is no longer active
    /// - `DeadlinePending` before the deadline
    pub async fn finalize(
        &self,
        actor: UserId,
        proposal_id: ProposalId,
    ) -> GovernanceResult<Finalization> {
        let proposal = self.load(proposal_id).await?;

        let now = self.ctx.now();
        check_closed(&proposal, now)?;

        let rule = self.rule;
        let report = self
            .ctx
            .run(|| self.ctx.store.finalize_proposal(proposal_id, now, rule))
            .await?;

        match report {
            Some(report) => {
                info!(
                    proposal = %proposal_id,
                    finalized_by = %actor,
                    outcome = %report.outcome(),
                    yes = report.tally.yes,
                    no = report.tally.no,
                    abstain = report.tally.abstain,
                    members = report.total_members,
                    quorum_required = report.quorum_required,
                    "proposal finalized"
                );
                Ok(report)
            }
            None => {
                warn!(proposal = %proposal_id, "finalize claim failed, re-reading");
                let current = self.load(proposal_id).await?;
                check_closed(&current, now)?;
                Err(GovernanceError::AlreadyFinalized)
            }
        }
    }

    /// One proposal with its tally and `viewer`'s vote.
    pub async fn get(
        &self,
        viewer: UserId,
        proposal_id: ProposalId,
    ) -> GovernanceResult<ProposalView> {
        let proposal = self.load(proposal_id).await?;
        self.view(viewer, proposal).await
    }

    /// Every proposal of an organization, most recent first.
    pub async fn list(
        &self,
        viewer: UserId,
        organization: OrganizationId,
    ) -> GovernanceResult<Vec<ProposalView>> {
        require_organization(&self.ctx, organization).await?;

        let proposals = self
            .ctx
            .run(|| self.ctx.store.proposals(organization))
            .await?;

        let mut views = Vec::with_capacity(proposals.len());
        for proposal in proposals {
            views.push(self.view(viewer, proposal).await?);
        }

        debug!(organization = %organization, count = views.len(), "listed proposals");
        Ok(views)
    }

    async fn view(&self, viewer: UserId, proposal: Proposal) -> GovernanceResult<ProposalView> {
        let votes = self.ctx.run(|| self.ctx.store.votes(proposal.id)).await?;
        let my_vote = votes
            .iter()
            .find(|v| v.user_id == viewer)
            .map(|v| v.choice);

        Ok(ProposalView {
            tally: VoteTally::from_votes(&votes),
            my_vote,
            proposal,
        })
    }

    async fn load(&self, proposal_id: ProposalId) -> GovernanceResult<Proposal> {
        self.ctx
            .run(|| self.ctx.store.proposal(proposal_id))
            .await?
            .ok_or(GovernanceError::NotFound(Resource::Proposal))
    }

    async fn classify_vote_failure(
        &self,
        proposal_id: ProposalId,
        actor: UserId,
        now: Timestamp,
    ) -> GovernanceError {
        let proposal = match self.load(proposal_id).await {
            Ok(proposal) => proposal,
            Err(err) => return err,
        };
        if let Err(err) = check_open(&proposal, now) {
            return err;
        }
        match require_approved(&self.ctx, proposal.organization_id, actor).await {
            Err(err) => err,
            Ok(_) => GovernanceError::StorageUnavailable(format!(
                "vote on proposal {} was not applied",
                proposal_id
            )),
        }
    }
}

/// Voting is open while active and strictly before the deadline.
fn check_open(proposal: &Proposal, now: Timestamp) -> GovernanceResult<()> {
    if proposal.status != ProposalStatus::Active {
        return Err(GovernanceError::AlreadyFinalized);
    }
    if now >= proposal.deadline {
        return Err(GovernanceError::DeadlinePassed);
    }
    Ok(())
}

/// Finalizable once active and at or past the deadline.
fn check_closed(proposal: &Proposal, now: Timestamp) -> GovernanceResult<()> {
    if proposal.status != ProposalStatus::Active {
        return Err(GovernanceError::AlreadyFinalized);
    }
    if now < proposal.deadline {
        return Err(GovernanceError::DeadlinePending);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::types::{MembershipStatus, NewOrganization, Role};
    use std::sync::Arc;

    const OWNER: UserId = UserId(1);
    const START: Timestamp = 1_700_000_000;
    const HOUR: i64 = 3_600;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: ManualClock,
        engine: ProposalEngine<MemoryStore>,
        org: OrganizationId,
    }

    /// Organization with the owner plus `extra` approved members (ids 100..).
    async fn fixture(extra: i64) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(START);
        let org = store
            .create_organization(
                NewOrganization {
                    name: "Neighborhood Watch".to_string(),
                    mission: String::new(),
                    rules: String::new(),
                    owner_id: OWNER,
                    currency: "USD".to_string(),
                },
                START,
            )
            .await
            .unwrap()
            .id;
        for i in 0..extra {
            store
                .insert_membership(
                    org,
                    UserId(100 + i),
                    MembershipStatus::Approved,
                    Role::Member,
                    START,
                )
                .await
                .unwrap();
        }

        let ctx = Context::new(store.clone()).with_clock(Arc::new(clock.clone()));
        Fixture {
            store,
            clock,
            engine: ProposalEngine::new(ctx, QuorumRule::default()),
            org,
        }
    }

    #[tokio::test]
    async fn test_create_validates_title_and_deadline() {
        let f = fixture(0).await;

        let err = f.engine.create(OWNER, f.org, "   ", "", START + HOUR).await;
        assert!(matches!(err, Err(GovernanceError::InvalidInput(_))));

        let long = "x".repeat(MAX_TITLE_CHARS + 1);
        let err = f.engine.create(OWNER, f.org, &long, "", START + HOUR).await;
        assert!(matches!(err, Err(GovernanceError::InvalidInput(_))));

        let err = f.engine.create(OWNER, f.org, "Title", "", START).await;
        assert!(matches!(err, Err(GovernanceError::InvalidInput(_))));

        let exact = "é".repeat(MAX_TITLE_CHARS);
        let proposal = f
            .engine
            .create(OWNER, f.org, &exact, "", START + HOUR)
            .await
            .unwrap();
        assert_eq!(proposal.status, ProposalStatus::Active);
    }

    #[tokio::test]
    async fn test_non_member_cannot_create_or_vote() {
        let f = fixture(0).await;
        let stranger = UserId(55);

        assert!(matches!(
            f.engine.create(stranger, f.org, "Title", "", START + HOUR).await,
            Err(GovernanceError::Forbidden(_))
        ));

        let proposal = f
            .engine
            .create(OWNER, f.org, "Title", "", START + HOUR)
            .await
            .unwrap();
        assert!(matches!(
            f.engine.cast_vote(stranger, proposal.id, VoteChoice::Yes).await,
            Err(GovernanceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_revote_replaces_choice() {
        let f = fixture(0).await;
        let proposal = f
            .engine
            .create(OWNER, f.org, "Title", "", START + HOUR)
            .await
            .unwrap();

        f.engine.cast_vote(OWNER, proposal.id, VoteChoice::Yes).await.unwrap();
        f.engine.cast_vote(OWNER, proposal.id, VoteChoice::No).await.unwrap();

        let votes = f.store.votes(proposal.id).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].choice, VoteChoice::No);

        let view = f.engine.get(OWNER, proposal.id).await.unwrap();
        assert_eq!(view.tally, VoteTally { yes: 0, no: 1, abstain: 0 });
        assert_eq!(view.my_vote, Some(VoteChoice::No));
    }

    #[tokio::test]
    async fn test_vote_at_deadline_is_rejected_and_keeps_prior_vote() {
        let f = fixture(0).await;
        let proposal = f
            .engine
            .create(OWNER, f.org, "Title", "", START + HOUR)
            .await
            .unwrap();
        f.engine.cast_vote(OWNER, proposal.id, VoteChoice::Yes).await.unwrap();

        f.clock.set(START + HOUR);
        assert_eq!(
            f.engine.cast_vote(OWNER, proposal.id, VoteChoice::No).await,
            Err(GovernanceError::DeadlinePassed)
        );

        let votes = f.store.votes(proposal.id).await.unwrap();
        assert_eq!(votes[0].choice, VoteChoice::Yes);
    }

    #[tokio::test]
    async fn test_finalize_before_deadline_is_pending() {
        let f = fixture(0).await;
        let proposal = f
            .engine
            .create(OWNER, f.org, "Title", "", START + HOUR)
            .await
            .unwrap();

        f.clock.set(START + HOUR - 1);
        assert_eq!(
            f.engine.finalize(OWNER, proposal.id).await,
            Err(GovernanceError::DeadlinePending)
        );
    }

    #[tokio::test]
    async fn test_finalize_majority_with_quorum() {
        // Owner + 9 members = 10 approved; 5 yes, 2 no
        let f = fixture(9).await;
        let proposal = f
            .engine
            .create(OWNER, f.org, "Fund the playground", "", START + HOUR)
            .await
            .unwrap();

        for i in 0..5 {
            f.engine
                .cast_vote(UserId(100 + i), proposal.id, VoteChoice::Yes)
                .await
                .unwrap();
        }
        for i in 5..7 {
            f.engine
                .cast_vote(UserId(100 + i), proposal.id, VoteChoice::No)
                .await
                .unwrap();
        }

        f.clock.set(START + HOUR);
        let report = f.engine.finalize(OWNER, proposal.id).await.unwrap();
        assert_eq!(report.outcome(), ProposalStatus::Approved);
        assert_eq!(report.total_members, 10);
        assert_eq!(report.quorum_required, 5);
        assert!(report.quorum_met);
        assert_eq!(report.proposal.finalized_at, Some(START + HOUR));
    }

    #[tokio::test]
    async fn test_finalize_low_turnout() {
        let f = fixture(9).await;
        let proposal = f
            .engine
            .create(OWNER, f.org, "Title", "", START + HOUR)
            .await
            .unwrap();

        f.engine.cast_vote(UserId(100), proposal.id, VoteChoice::Yes).await.unwrap();
        f.engine.cast_vote(UserId(101), proposal.id, VoteChoice::Yes).await.unwrap();
        f.engine.cast_vote(UserId(102), proposal.id, VoteChoice::No).await.unwrap();

        f.clock.advance(2 * HOUR);
        let report = f.engine.finalize(OWNER, proposal.id).await.unwrap();
        assert_eq!(report.outcome(), ProposalStatus::QuorumNotMet);
        assert!(!report.quorum_met);
    }

    #[tokio::test]
    async fn test_second_finalize_is_already_finalized() {
        let f = fixture(0).await;
        let proposal = f
            .engine
            .create(OWNER, f.org, "Title", "", START + HOUR)
            .await
            .unwrap();
        f.engine.cast_vote(OWNER, proposal.id, VoteChoice::No).await.unwrap();

        f.clock.advance(HOUR);
        let first = f.engine.finalize(OWNER, proposal.id).await.unwrap();
        assert_eq!(first.outcome(), ProposalStatus::Rejected);

        f.clock.advance(HOUR);
        assert_eq!(
            f.engine.finalize(OWNER, proposal.id).await,
            Err(GovernanceError::AlreadyFinalized)
        );
        let stored = f.store.proposal(proposal.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Rejected);
        assert_eq!(stored.finalized_at, Some(START + HOUR));

        assert_eq!(
            f.engine.cast_vote(OWNER, proposal.id, VoteChoice::Yes).await,
            Err(GovernanceError::AlreadyFinalized)
        );
    }

    #[tokio::test]
    async fn test_outsider_may_finalize_after_deadline() {
        let f = fixture(2).await;
        let outsider = UserId(55);
        let proposal = f
            .engine
            .create(OWNER, f.org, "Title", "", START + HOUR)
            .await
            .unwrap();
        for voter in [OWNER, UserId(100), UserId(101)] {
            f.engine.cast_vote(voter, proposal.id, VoteChoice::Yes).await.unwrap();
        }

        assert_eq!(
            f.engine.finalize(outsider, proposal.id).await,
            Err(GovernanceError::DeadlinePending)
        );

        f.clock.advance(HOUR);
        let report = f.engine.finalize(outsider, proposal.id).await.unwrap();
        assert_eq!(report.outcome(), ProposalStatus::Approved);
        assert_eq!(report.tally.yes, 3);
    }

    #[tokio::test]
    async fn test_unknown_proposal() {
        let f = fixture(0).await;
        assert_eq!(
            f.engine.finalize(OWNER, ProposalId(404)).await,
            Err(GovernanceError::NotFound(Resource::Proposal))
        );
    }

    #[tokio::test]
    async fn test_list_is_most_recent_first_with_my_vote() {
        let f = fixture(1).await;
        let first = f
            .engine
            .create(OWNER, f.org, "First", "", START + HOUR)
            .await
            .unwrap();
        let second = f
            .engine
            .create(OWNER, f.org, "Second", "", START + HOUR)
            .await
            .unwrap();
        f.engine.cast_vote(UserId(100), first.id, VoteChoice::Abstain).await.unwrap();

        let views = f.engine.list(UserId(100), f.org).await.unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].proposal.id, second.id);
        assert_eq!(views[0].my_vote, None);
        assert_eq!(views[1].my_vote, Some(VoteChoice::Abstain));
        assert_eq!(views[1].tally.abstain, 1);
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let f = fixture(0).await;
        let proposal = f
            .engine
            .create(OWNER, f.org, "Title", "", START + HOUR)
            .await
            .unwrap();

        f.store.inject_conflicts(2);
        let vote = f.engine.cast_vote(OWNER, proposal.id, VoteChoice::Yes).await;
        assert!(vote.is_ok());
    }
}
