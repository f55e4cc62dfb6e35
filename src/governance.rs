//! Governance facade.
//!
//! The single entry point an outer layer (HTTP handlers, a bot, the CLI)
//! calls. It resolves the caller, applies the organization-level rules and
//! delegates to the membership, proposal and treasury engines. It holds no
//! entity state of its own: every call re-reads the store.

use crate::clock::{Clock, SystemClock};
use crate::config::{AgoraConfig, ConfigError, DEFAULT_CURRENCY, DEFAULT_TRANSACTION_PAGE_SIZE};
use crate::context::Context;
use crate::error::{GovernanceError, GovernanceResult};
use crate::membership::{require_organization, MembershipDecision, MembershipManager};
use crate::proposal::{Finalization, ProposalEngine, ProposalView, QuorumRule};
use crate::retry::RetryPolicy;
use crate::store::GovernanceStore;
use crate::treasury::{LedgerAudit, TreasuryLedger, TreasuryReceipt};
use crate::types::{
    Amount, Membership, MembershipAction, MembershipId, NewOrganization, Organization,
    OrganizationId, Proposal, ProposalId, Timestamp, TransactionKind, Treasury,
    TreasuryTransaction, UserId, Vote, VoteChoice,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Longest accepted organization name, in characters.
pub const MAX_NAME_CHARS: usize = 100;

/// Who is making a call, as answered by the external identity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Caller {
    Anonymous,
    User(UserId),
}

impl Caller {
    /// The authenticated user, or `NotAuthenticated`.
    pub fn require(&self) -> GovernanceResult<UserId> {
        match self {
            Caller::User(user) => Ok(*user),
            Caller::Anonymous => Err(GovernanceError::NotAuthenticated),
        }
    }
}

impl From<Option<UserId>> for Caller {
    fn from(user: Option<UserId>) -> Self {
        user.map_or(Caller::Anonymous, Caller::User)
    }
}

/// Runtime knobs for the engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernanceSettings {
    pub quorum: QuorumRule,
    pub default_currency: String,
    pub transaction_page_size: usize,
    pub retry: RetryPolicy,
}

impl Default for GovernanceSettings {
    fn default() -> Self {
        Self {
            quorum: QuorumRule::default(),
            default_currency: DEFAULT_CURRENCY.to_string(),
            transaction_page_size: DEFAULT_TRANSACTION_PAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl GovernanceSettings {
    pub fn from_config(config: &AgoraConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            quorum: config.governance.quorum_rule()?,
            default_currency: config.governance.default_currency.clone(),
            transaction_page_size: config.governance.transaction_page_size,
            retry: config.retry.policy()?,
        })
    }
}

/// An organization as seen in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationSummary {
    pub organization: Organization,
    pub member_count: u64,
    /// The caller's own row, if any.
    pub my_membership: Option<Membership>,
}

/// An organization with its treasury.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationOverview {
    pub organization: Organization,
    pub member_count: u64,
    pub treasury: Treasury,
    pub my_membership: Option<Membership>,
}

pub struct Governance<S: GovernanceStore + ?Sized> {
    ctx: Context<S>,
    settings: GovernanceSettings,
    memberships: MembershipManager<S>,
    proposals: ProposalEngine<S>,
    treasury: TreasuryLedger<S>,
}

impl<S: GovernanceStore + ?Sized> Governance<S> {
    pub fn new(store: Arc<S>, settings: GovernanceSettings) -> Self {
        Self::with_clock(store, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<S>, settings: GovernanceSettings, clock: Arc<dyn Clock>) -> Self {
        let ctx = Context::new(store)
            .with_clock(clock)
            .with_retry(settings.retry);

        Self {
            memberships: MembershipManager::new(ctx.clone()),
            proposals: ProposalEngine::new(ctx.clone(), settings.quorum),
            treasury: TreasuryLedger::new(ctx.clone(), settings.transaction_page_size),
            ctx,
            settings,
        }
    }

    pub fn settings(&self) -> &GovernanceSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<S> {
        &self.ctx.store
    }

    // ------------------------------------------------------------------
    // Organizations
    // ------------------------------------------------------------------

    /// Create an organization owned by the caller, with an empty treasury in
    /// the configured currency.
    pub async fn create_organization(
        &self,
        caller: Caller,
        name: &str,
        mission: &str,
        rules: &str,
    ) -> GovernanceResult<Organization> {
        let owner = caller.require()?;

        let name = name.trim();
        let name_len = name.chars().count();
        if name_len == 0 || name_len > MAX_NAME_CHARS {
            return Err(GovernanceError::invalid(format!(
                "name must be 1-{} characters",
                MAX_NAME_CHARS
            )));
        }

        let draft = NewOrganization {
            name: name.to_string(),
            mission: mission.trim().to_string(),
            rules: rules.trim().to_string(),
            owner_id: owner,
            currency: self.settings.default_currency.clone(),
        };
        let now = self.ctx.now();

        let organization = self
            .ctx
            .run(|| self.ctx.store.create_organization(draft.clone(), now))
            .await?;

        info!(organization = %organization.id, owner = %owner, "organization created");
        Ok(organization)
    }

    /// Every organization, most recent first, with the caller's membership.
    pub async fn list_organizations(
        &self,
        caller: Caller,
    ) -> GovernanceResult<Vec<OrganizationSummary>> {
        let user = caller.require()?;
        let organizations = self.ctx.run(|| self.ctx.store.organizations()).await?;

        let mut summaries = Vec::with_capacity(organizations.len());
        for organization in organizations {
            let id = organization.id;
            summaries.push(OrganizationSummary {
                member_count: self
                    .ctx
                    .run(|| self.ctx.store.count_approved_members(id))
                    .await?,
                my_membership: self
                    .ctx
                    .run(|| self.ctx.store.membership_for(id, user))
                    .await?,
                organization,
            });
        }

        debug!(count = summaries.len(), "listed organizations");
        Ok(summaries)
    }

    pub async fn get_organization(
        &self,
        caller: Caller,
        organization: OrganizationId,
    ) -> GovernanceResult<OrganizationOverview> {
        let user = caller.require()?;
        let found = require_organization(&self.ctx, organization).await?;

        Ok(OrganizationOverview {
            organization: found,
            member_count: self
                .ctx
                .run(|| self.ctx.store.count_approved_members(organization))
                .await?,
            treasury: self.treasury.balance(organization).await?,
            my_membership: self
                .ctx
                .run(|| self.ctx.store.membership_for(organization, user))
                .await?,
        })
    }

    // ------------------------------------------------------------------
    // Memberships
    // ------------------------------------------------------------------

    pub async fn request_join(
        &self,
        caller: Caller,
        organization: OrganizationId,
    ) -> GovernanceResult<Membership> {
        let user = caller.require()?;
        self.memberships.request_join(user, organization).await
    }

    pub async fn decide_membership(
        &self,
        caller: Caller,
        organization: OrganizationId,
        membership: MembershipId,
        action: MembershipAction,
    ) -> GovernanceResult<MembershipDecision> {
        let actor = caller.require()?;
        self.memberships
            .decide(actor, organization, membership, action)
            .await
    }

    pub async fn list_memberships(
        &self,
        caller: Caller,
        organization: OrganizationId,
    ) -> GovernanceResult<Vec<Membership>> {
        let actor = caller.require()?;
        self.memberships.list(actor, organization).await
    }

    // ------------------------------------------------------------------
    // Proposals
    // ------------------------------------------------------------------

    pub async fn create_proposal(
        &self,
        caller: Caller,
        organization: OrganizationId,
        title: &str,
        description: &str,
        deadline: Timestamp,
    ) -> GovernanceResult<Proposal> {
        let actor = caller.require()?;
        self.proposals
            .create(actor, organization, title, description, deadline)
            .await
    }

    pub async fn list_proposals(
        &self,
        caller: Caller,
        organization: OrganizationId,
    ) -> GovernanceResult<Vec<ProposalView>> {
        let viewer = caller.require()?;
        self.proposals.list(viewer, organization).await
    }

    pub async fn get_proposal(
        &self,
        caller: Caller,
        proposal: ProposalId,
    ) -> GovernanceResult<ProposalView> {
        let viewer = caller.require()?;
        self.proposals.get(viewer, proposal).await
    }

    pub async fn cast_vote(
        &self,
        caller: Caller,
        proposal: ProposalId,
        choice: VoteChoice,
    ) -> GovernanceResult<Vote> {
        let voter = caller.require()?;
        self.proposals.cast_vote(voter, proposal, choice).await
    }

    pub async fn finalize(
        &self,
        caller: Caller,
        proposal: ProposalId,
    ) -> GovernanceResult<Finalization> {
        let actor = caller.require()?;
        self.proposals.finalize(actor, proposal).await
    }

    // ------------------------------------------------------------------
    // Treasury
    // ------------------------------------------------------------------

    pub async fn record_transaction(
        &self,
        caller: Caller,
        organization: OrganizationId,
        kind: TransactionKind,
        amount: Amount,
        description: &str,
    ) -> GovernanceResult<TreasuryReceipt> {
        let actor = caller.require()?;
        self.treasury
            .record(actor, organization, kind, amount, description)
            .await
    }

    pub async fn get_balance(
        &self,
        caller: Caller,
        organization: OrganizationId,
    ) -> GovernanceResult<Treasury> {
        caller.require()?;
        self.treasury.balance(organization).await
    }

    pub async fn list_transactions(
        &self,
        caller: Caller,
        organization: OrganizationId,
        limit: Option<usize>,
    ) -> GovernanceResult<Vec<TreasuryTransaction>> {
        caller.require()?;
        self.treasury.list_transactions(organization, limit).await
    }

    /// Compare one organization's balance with its ledger sum.
    ///
    /// Operator-level: no caller is required.
    pub async fn audit_ledger(
        &self,
        organization: OrganizationId,
    ) -> GovernanceResult<LedgerAudit> {
        self.treasury.audit(organization).await
    }

    /// Audit every organization, most recently created first.
    pub async fn audit_all(&self) -> GovernanceResult<Vec<LedgerAudit>> {
        let organizations = self.ctx.run(|| self.ctx.store.organizations()).await?;

        let mut audits = Vec::with_capacity(organizations.len());
        for organization in organizations {
            audits.push(self.treasury.audit(organization.id).await?);
        }
        Ok(audits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{ErrorKind, Resource};
    use crate::store::MemoryStore;
    use crate::types::{MembershipStatus, Role};

    const START: Timestamp = 1_700_000_000;

    fn governance() -> (Governance<MemoryStore>, ManualClock) {
        let clock = ManualClock::new(START);
        let gov = Governance::with_clock(
            Arc::new(MemoryStore::new()),
            GovernanceSettings::default(),
            Arc::new(clock.clone()),
        );
        (gov, clock)
    }

    fn user(id: i64) -> Caller {
        Caller::User(UserId(id))
    }

    #[tokio::test]
    async fn test_anonymous_callers_are_rejected() {
        let (gov, _) = governance();
        let org = gov
            .create_organization(user(1), "Chess Club", "", "")
            .await
            .unwrap();

        let results = [
            gov.create_organization(Caller::Anonymous, "X", "", "").await.err(),
            gov.request_join(Caller::Anonymous, org.id).await.err(),
            gov.get_balance(Caller::Anonymous, org.id).await.err(),
            gov.list_proposals(Caller::Anonymous, org.id).await.err(),
            gov.list_organizations(Caller::Anonymous).await.err(),
        ];
        for err in results {
            assert_eq!(err, Some(GovernanceError::NotAuthenticated));
        }
    }

    #[tokio::test]
    async fn test_create_organization_validates_name() {
        let (gov, _) = governance();

        let long = "n".repeat(MAX_NAME_CHARS + 1);
        for bad in ["", "   ", long.as_str()] {
            let err = gov.create_organization(user(1), bad, "", "").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }

        let org = gov
            .create_organization(user(1), "  Chess Club  ", " Play ", "")
            .await
            .unwrap();
        assert_eq!(org.name, "Chess Club");
        assert_eq!(org.mission, "Play");
        assert_eq!(org.owner_id, UserId(1));
    }

    #[tokio::test]
    async fn test_organization_views_include_caller_membership() {
        let (gov, _) = governance();
        let org = gov
            .create_organization(user(1), "Chess Club", "", "")
            .await
            .unwrap();
        gov.request_join(user(2), org.id).await.unwrap();

        let listed = gov.list_organizations(user(2)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].member_count, 1);
        assert_eq!(
            listed[0].my_membership.as_ref().map(|m| m.status),
            Some(MembershipStatus::Pending)
        );

        let overview = gov.get_organization(user(1), org.id).await.unwrap();
        assert_eq!(overview.treasury.balance, Amount::ZERO);
        assert_eq!(overview.treasury.currency, "USD");
        assert_eq!(
            overview.my_membership.map(|m| m.role),
            Some(Role::Owner)
        );

        assert_eq!(
            gov.get_organization(user(1), OrganizationId(999)).await,
            Err(GovernanceError::NotFound(Resource::Organization))
        );
    }

    #[tokio::test]
    async fn test_non_member_can_finalize() {
        let (gov, clock) = governance();
        let org = gov
            .create_organization(user(1), "Chess Club", "", "")
            .await
            .unwrap();
        let proposal = gov
            .create_proposal(user(1), org.id, "New boards", "", START + 60)
            .await
            .unwrap();

        clock.advance(60);
        assert_eq!(
            gov.finalize(Caller::Anonymous, proposal.id).await.unwrap_err(),
            GovernanceError::NotAuthenticated
        );

        // User 9 never joined; owner alone is 1 member, so quorum ceil(0.5) = 1 is not met
        let report = gov.finalize(user(9), proposal.id).await.unwrap();
        assert!(!report.quorum_met);
        assert_eq!(
            gov.finalize(user(1), proposal.id).await.unwrap_err(),
            GovernanceError::AlreadyFinalized
        );
    }

    #[tokio::test]
    async fn test_settings_from_config() {
        let mut config = AgoraConfig::default();
        config.governance.quorum_percent = 66;
        config.governance.default_currency = "EUR".to_string();

        let settings = GovernanceSettings::from_config(&config).unwrap();
        assert_eq!(settings.quorum.percent(), 66);

        let gov = Governance::new(Arc::new(MemoryStore::new()), settings);
        let org = gov
            .create_organization(user(1), "Euro Club", "", "")
            .await
            .unwrap();
        let balance = gov.get_balance(user(3), org.id).await.unwrap();
        assert_eq!(balance.currency, "EUR");
    }

    #[test]
    fn test_caller_from_option() {
        assert_eq!(Caller::from(None), Caller::Anonymous);
        assert_eq!(Caller::from(Some(UserId(4))), Caller::User(UserId(4)));
        assert_eq!(Caller::User(UserId(4)).require(), Ok(UserId(4)));
    }
}
