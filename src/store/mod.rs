//! Persistence port for governance state.
//!
//! The engines hold no state between calls; everything lives behind
//! [`GovernanceStore`]. Each mutating method is one indivisible unit of work:
//! a backend either applies all of its effect or none of it, and guarded
//! mutations evaluate their guard against the state they commit on, never
//! against an earlier read. When a guard does not hold the method returns
//! `None`/`false` and the calling engine re-reads to classify the failure.
//!
//! Backends:
//! - [`memory::MemoryStore`]: process-local, every call under one lock
//! - [`sqlite::SqliteStore`]: `sqlx` over SQLite with guarded statements

pub mod memory;
pub mod sqlite;

use crate::config::StoreConfig;
use crate::proposal::tally::{Finalization, QuorumRule};
use crate::types::*;
use async_trait::async_trait;
use std::sync::Arc;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Concurrent transaction conflict or busy database. Safe to retry.
    #[error("Serialization conflict: {0}")]
    Conflict(String),

    /// Insert collided with a uniqueness constraint.
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Backend unreachable or failed.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Determine if a storage error is transient.
pub fn is_store_error_retryable(err: &StoreError) -> bool {
    err.is_retryable()
}

/// Trait abstraction over the transactional governance store.
#[async_trait]
pub trait GovernanceStore: Send + Sync {
    // ------------------------------------------------------------------
    // Organizations
    // ------------------------------------------------------------------

    /// Insert an organization, its owner's `approved`/`owner` membership and
    /// a zero-balance treasury as one unit.
    async fn create_organization(
        &self,
        draft: NewOrganization,
        now: Timestamp,
    ) -> StoreResult<Organization>;

    async fn organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>>;

    /// All organizations, most recently created first.
    async fn organizations(&self) -> StoreResult<Vec<Organization>>;

    // ------------------------------------------------------------------
    // Memberships
    // ------------------------------------------------------------------

    async fn membership(&self, id: MembershipId) -> StoreResult<Option<Membership>>;

    async fn membership_for(
        &self,
        organization: OrganizationId,
        user: UserId,
    ) -> StoreResult<Option<Membership>>;

    /// Every membership row of an organization, most recent first.
    async fn memberships(&self, organization: OrganizationId) -> StoreResult<Vec<Membership>>;

    async fn count_approved_members(&self, organization: OrganizationId) -> StoreResult<u64>;

    /// Insert a membership row.
    ///
    /// Fails with [`StoreError::UniqueViolation`] if a row for the
    /// (organization, user) pair already exists.
    async fn insert_membership(
        &self,
        organization: OrganizationId,
        user: UserId,
        status: MembershipStatus,
        role: Role,
        now: Timestamp,
    ) -> StoreResult<Membership>;

    /// Move a non-owner membership from `from` to `to`.
    ///
    /// Returns `None` when the row is missing, is an owner row, or is no
    /// longer in `from`.
    async fn transition_membership(
        &self,
        id: MembershipId,
        from: MembershipStatus,
        to: MembershipStatus,
    ) -> StoreResult<Option<Membership>>;

    /// Delete a non-owner membership currently in `expected`.
    async fn delete_membership(
        &self,
        id: MembershipId,
        expected: MembershipStatus,
    ) -> StoreResult<bool>;

    // ------------------------------------------------------------------
    // Proposals and votes
    // ------------------------------------------------------------------

    async fn insert_proposal(&self, draft: NewProposal, now: Timestamp) -> StoreResult<Proposal>;

    async fn proposal(&self, id: ProposalId) -> StoreResult<Option<Proposal>>;

    /// Every proposal of an organization, most recent first.
    async fn proposals(&self, organization: OrganizationId) -> StoreResult<Vec<Proposal>>;

    async fn votes(&self, proposal: ProposalId) -> StoreResult<Vec<Vote>>;

    /// Insert or replace `user`'s vote on `proposal`.
    ///
    /// Guard, evaluated atomically with the write: the proposal is `active`,
    /// `now < deadline`, and `user` is an approved member of the proposal's
    /// organization. Returns `None` when the guard fails.
    async fn upsert_vote(
        &self,
        proposal: ProposalId,
        user: UserId,
        choice: VoteChoice,
        now: Timestamp,
    ) -> StoreResult<Option<Vote>>;

    /// Finalize a proposal as one serializable unit.
    ///
    /// Claims the proposal (`active` and `deadline <= now`), counts its votes
    /// and the organization's approved members from a single consistent
    /// snapshot, applies `rule`, and stores the terminal status. Returns
    /// `None` when the proposal is missing, not active, or still open.
    async fn finalize_proposal(
        &self,
        proposal: ProposalId,
        now: Timestamp,
        rule: QuorumRule,
    ) -> StoreResult<Option<Finalization>>;

    // ------------------------------------------------------------------
    // Treasury
    // ------------------------------------------------------------------

    async fn treasury(&self, organization: OrganizationId) -> StoreResult<Option<Treasury>>;

    /// Apply a signed ledger entry to the balance and append it, atomically.
    ///
    /// The balance update is guarded by `balance + entry.amount >= 0`.
    /// Returns `None` (and changes nothing) when the guard fails or the
    /// organization has no treasury.
    async fn apply_treasury_entry(
        &self,
        entry: NewTransaction,
    ) -> StoreResult<Option<(Treasury, TreasuryTransaction)>>;

    /// Ledger entries, most recent first.
    async fn transactions(
        &self,
        organization: OrganizationId,
        limit: usize,
    ) -> StoreResult<Vec<TreasuryTransaction>>;

    /// Sum of every ledger entry of an organization.
    async fn ledger_sum(&self, organization: OrganizationId) -> StoreResult<Amount>;
}

/// Open the backend named by the configuration.
///
/// SQLite stores are migrated before they are returned.
pub async fn open_store(config: &StoreConfig) -> StoreResult<Arc<dyn GovernanceStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreConfig::Sqlite {
            url,
            max_connections,
        } => {
            let store = SqliteStore::connect(url, *max_connections).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(is_store_error_retryable(&StoreError::Conflict("busy".into())));
        assert!(!is_store_error_retryable(&StoreError::UniqueViolation(
            "memberships".into()
        )));
        assert!(!is_store_error_retryable(&StoreError::Unavailable(
            "closed".into()
        )));
        assert!(!is_store_error_retryable(&StoreError::Corrupt("kind".into())));
    }

    #[tokio::test]
    async fn test_open_memory_store() {
        let store = open_store(&StoreConfig::Memory).await.unwrap();
        assert!(store.organizations().await.unwrap().is_empty());
    }
}
