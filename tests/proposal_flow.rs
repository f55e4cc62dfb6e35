//! Integration test for end-to-end proposal flow.
//!
//! Tests the complete lifecycle:
//! 1. Owner creates the organization; members join and are approved
//! 2. A member opens a proposal with a deadline
//! 3. Members vote, some change their minds
//! 4. Deadline passes: late votes are refused
//! 5. Finalize computes quorum and majority exactly once
//!
//! Runs against the in-memory store and a SQLite file.

use agora::clock::ManualClock;
use agora::governance::{Caller, Governance, GovernanceSettings};
use agora::membership::MembershipDecision;
use agora::store::{GovernanceStore, MemoryStore, SqliteStore};
use agora::types::{
    MembershipAction, OrganizationId, ProposalStatus, Timestamp, UserId, VoteChoice,
};
use agora::GovernanceError;
use std::sync::Arc;
use tempfile::TempDir;

const START: Timestamp = 1_700_000_000;
const DAY: i64 = 86_400;
const OWNER: Caller = Caller::User(UserId(1));

fn member(i: i64) -> Caller {
    Caller::User(UserId(100 + i))
}

/// Organization with the owner plus `extra` approved members.
async fn organization_with_members<S: GovernanceStore + ?Sized>(
    gov: &Governance<S>,
    extra: i64,
) -> OrganizationId {
    let org = gov
        .create_organization(OWNER, "Riverside Commons", "Keep the river clean", "One vote each")
        .await
        .unwrap();

    for i in 0..extra {
        let request = gov.request_join(member(i), org.id).await.unwrap();
        let decision = gov
            .decide_membership(OWNER, org.id, request.id, MembershipAction::Approve)
            .await
            .unwrap();
        assert!(matches!(decision, MembershipDecision::Updated { .. }));
    }

    org.id
}

async fn run_majority_flow<S: GovernanceStore + ?Sized>(gov: &Governance<S>, clock: &ManualClock) {
    // Owner + 9 members = 10 approved
    let org = organization_with_members(gov, 9).await;

    let proposal = gov
        .create_proposal(member(0), org, "Buy a canoe", "For river cleanups", START + DAY)
        .await
        .unwrap();
    assert_eq!(proposal.status, ProposalStatus::Active);

    // Member 4 first votes no, then switches to yes
    gov.cast_vote(member(4), proposal.id, VoteChoice::No).await.unwrap();
    for i in 0..5 {
        gov.cast_vote(member(i), proposal.id, VoteChoice::Yes).await.unwrap();
    }
    for i in 5..7 {
        gov.cast_vote(member(i), proposal.id, VoteChoice::No).await.unwrap();
    }

    let view = gov.get_proposal(member(4), proposal.id).await.unwrap();
    assert_eq!(view.tally.yes, 5);
    assert_eq!(view.tally.no, 2);
    assert_eq!(view.my_vote, Some(VoteChoice::Yes));

    // Too early
    assert_eq!(
        gov.finalize(OWNER, proposal.id).await,
        Err(GovernanceError::DeadlinePending)
    );

    clock.set(START + DAY);

    // Late vote is refused and leaves the earlier vote alone
    assert_eq!(
        gov.cast_vote(member(5), proposal.id, VoteChoice::Yes).await,
        Err(GovernanceError::DeadlinePassed)
    );

    let report = gov.finalize(member(8), proposal.id).await.unwrap();
    assert_eq!(report.outcome(), ProposalStatus::Approved);
    assert_eq!(report.total_members, 10);
    assert_eq!(report.quorum_required, 5);
    assert_eq!(report.tally.total(), 7);

    // Second finalize changes nothing
    clock.advance(DAY);
    assert_eq!(
        gov.finalize(OWNER, proposal.id).await,
        Err(GovernanceError::AlreadyFinalized)
    );
    let listed = gov.list_proposals(OWNER, org).await.unwrap();
    assert_eq!(listed[0].proposal.status, ProposalStatus::Approved);
    assert_eq!(listed[0].proposal.finalized_at, Some(START + DAY));
    assert_eq!(listed[0].tally.no, 2);
}

async fn run_quorum_not_met_flow<S: GovernanceStore + ?Sized>(
    gov: &Governance<S>,
    clock: &ManualClock,
) {
    let org = organization_with_members(gov, 9).await;
    let proposal = gov
        .create_proposal(OWNER, org, "Paint the shed", "", clock_now(clock) + DAY)
        .await
        .unwrap();

    gov.cast_vote(member(0), proposal.id, VoteChoice::Yes).await.unwrap();
    gov.cast_vote(member(1), proposal.id, VoteChoice::Yes).await.unwrap();
    gov.cast_vote(member(2), proposal.id, VoteChoice::No).await.unwrap();

    clock.advance(DAY);
    let report = gov.finalize(OWNER, proposal.id).await.unwrap();
    assert_eq!(report.outcome(), ProposalStatus::QuorumNotMet);
    assert!(!report.quorum_met);
}

fn clock_now(clock: &ManualClock) -> Timestamp {
    use agora::clock::Clock;
    clock.now()
}

fn memory_governance() -> (Governance<MemoryStore>, ManualClock) {
    let clock = ManualClock::new(START);
    let gov = Governance::with_clock(
        Arc::new(MemoryStore::new()),
        GovernanceSettings::default(),
        Arc::new(clock.clone()),
    );
    (gov, clock)
}

async fn sqlite_governance(dir: &TempDir) -> (Governance<SqliteStore>, ManualClock) {
    let store = SqliteStore::open(&dir.path().join("agora.db"), 4)
        .await
        .unwrap();
    store.migrate().await.unwrap();

    let clock = ManualClock::new(START);
    let gov = Governance::with_clock(
        Arc::new(store),
        GovernanceSettings::default(),
        Arc::new(clock.clone()),
    );
    (gov, clock)
}

#[tokio::test]
async fn test_majority_flow_memory() {
    let (gov, clock) = memory_governance();
    run_majority_flow(&gov, &clock).await;
}

#[tokio::test]
async fn test_majority_flow_sqlite() {
    let dir = TempDir::new().unwrap();
    let (gov, clock) = sqlite_governance(&dir).await;
    run_majority_flow(&gov, &clock).await;
}

#[tokio::test]
async fn test_quorum_not_met_memory() {
    let (gov, clock) = memory_governance();
    run_quorum_not_met_flow(&gov, &clock).await;
}

#[tokio::test]
async fn test_quorum_not_met_sqlite() {
    let dir = TempDir::new().unwrap();
    let (gov, clock) = sqlite_governance(&dir).await;
    run_quorum_not_met_flow(&gov, &clock).await;
}

#[tokio::test]
async fn test_votes_of_removed_members_still_count() {
    let (gov, clock) = memory_governance();
    // Owner + 3 members
    let org = organization_with_members(&gov, 3).await;
    let proposal = gov
        .create_proposal(OWNER, org, "Move meetings to Tuesday", "", START + DAY)
        .await
        .unwrap();

    gov.cast_vote(member(0), proposal.id, VoteChoice::Yes).await.unwrap();
    gov.cast_vote(member(1), proposal.id, VoteChoice::Yes).await.unwrap();

    // Remove member 0 after voting; member count drops to 3
    let rows = gov.list_memberships(OWNER, org).await.unwrap();
    let row = rows.iter().find(|m| m.user_id == UserId(100)).unwrap();
    gov.decide_membership(OWNER, org, row.id, MembershipAction::Remove)
        .await
        .unwrap();

    // A removed member can no longer vote
    assert!(matches!(
        gov.cast_vote(member(0), proposal.id, VoteChoice::No).await,
        Err(GovernanceError::Forbidden(_))
    ));

    clock.advance(DAY);
    let report = gov.finalize(OWNER, proposal.id).await.unwrap();
    assert_eq!(report.total_members, 3);
    assert_eq!(report.tally.yes, 2);
    assert_eq!(report.outcome(), ProposalStatus::Approved);
}

#[tokio::test]
async fn test_concurrent_finalize_has_one_winner() {
    let clock = ManualClock::new(START);
    let gov = Arc::new(Governance::with_clock(
        Arc::new(MemoryStore::new()),
        GovernanceSettings::default(),
        Arc::new(clock.clone()),
    ));
    let org = organization_with_members(gov.as_ref(), 1).await;
    let proposal = gov
        .create_proposal(OWNER, org, "Adopt bylaws", "", START + 10)
        .await
        .unwrap();
    gov.cast_vote(OWNER, proposal.id, VoteChoice::Yes).await.unwrap();
    clock.advance(10);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let gov = Arc::clone(&gov);
        handles.push(tokio::spawn(async move { gov.finalize(OWNER, proposal.id).await }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(report) => {
                winners += 1;
                assert_eq!(report.outcome(), ProposalStatus::Approved);
            }
            Err(err) => assert_eq!(err, GovernanceError::AlreadyFinalized),
        }
    }
    assert_eq!(winners, 1);
}

/// Finalize racing last-second votes on a shared SQLite file: every vote is
/// either stored and counted, or refused as `AlreadyFinalized`.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_finalize_racing_votes_counts_exactly_the_accepted_ones_sqlite() {
    const VOTERS: i64 = 20;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        SqliteStore::open(&dir.path().join("agora.db"), 8)
            .await
            .unwrap(),
    );
    store.migrate().await.unwrap();

    // Voters still see the deadline ahead; the finalizer is already past it
    let voter_clock = ManualClock::new(START);
    let closer_clock = ManualClock::new(START + 10);
    let voters = Arc::new(Governance::with_clock(
        store.clone(),
        GovernanceSettings::default(),
        Arc::new(voter_clock),
    ));
    let closer = Arc::new(Governance::with_clock(
        store.clone(),
        GovernanceSettings::default(),
        Arc::new(closer_clock),
    ));

    let org = organization_with_members(voters.as_ref(), VOTERS).await;

    for round in 0..5 {
        let proposal = voters
            .create_proposal(OWNER, org, &format!("Round {round}"), "", START + 10)
            .await
            .unwrap();

        let votes: Vec<_> = (0..VOTERS)
            .map(|i| {
                let gov = Arc::clone(&voters);
                tokio::spawn(async move {
                    gov.cast_vote(member(i), proposal.id, VoteChoice::Yes).await
                })
            })
            .collect();
        let finalize = {
            let gov = Arc::clone(&closer);
            tokio::spawn(async move { gov.finalize(OWNER, proposal.id).await })
        };

        let mut accepted = 0;
        for handle in votes {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(err) => assert_eq!(err, GovernanceError::AlreadyFinalized),
            }
        }
        let report = finalize.await.unwrap().unwrap();

        let stored = store.votes(proposal.id).await.unwrap().len() as u64;
        assert_eq!(stored, accepted);
        assert_eq!(report.tally.total(), accepted);
        assert_eq!(report.tally.yes, accepted);
        assert_eq!(report.total_members, VOTERS as u64 + 1);
    }
}
