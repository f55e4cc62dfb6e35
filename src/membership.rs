//! Membership admission.
//!
//! One row per (organization, user). State machine for `member` rows:
//!
//! ```text
//! (none) --request--> pending --approve--> approved --remove--> (none)
//!                        |
//!                        +----reject----> rejected --request--> pending
//! ```
//!
//! The owner row is created with the organization as `approved`/`owner` and
//! no operation moves or deletes it. Every transition is a compare-and-set
//! on the row's current status, so two owners' clicks racing on the same
//! request resolve to one winner and one `InvalidTransition`.

use crate::context::Context;
use crate::error::{GovernanceError, GovernanceResult, Resource};
use crate::store::{GovernanceStore, StoreError};
use crate::types::{
    Membership, MembershipAction, MembershipId, MembershipStatus, OrganizationId, Role, UserId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Rounds of read-classify-write before a join request gives up on a row
/// that keeps changing underneath it.
const JOIN_ATTEMPTS: usize = 3;

/// Result of an owner decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MembershipDecision {
    /// Row moved to a new status (approve, reject).
    Updated { membership: Membership },
    /// Row deleted (remove).
    Removed { membership_id: MembershipId },
}

/// Membership manager.
pub struct MembershipManager<S: GovernanceStore + ?Sized> {
    ctx: Context<S>,
}

impl<S: GovernanceStore + ?Sized> MembershipManager<S> {
    pub fn new(ctx: Context<S>) -> Self {
        Self { ctx }
    }

    /// Ask to join an organization.
    ///
    /// Creates a `pending`/`member` row, or re-opens a `rejected` one.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the organization does not exist
    /// - `AlreadyMember` if the user is approved
    /// - `RequestPending` if a request is already waiting
    pub async fn request_join(
        &self,
        user: UserId,
        organization: OrganizationId,
    ) -> GovernanceResult<Membership> {
        require_organization(&self.ctx, organization).await?;
        let now = self.ctx.now();

        for _ in 0..JOIN_ATTEMPTS {
            let existing = self
                .ctx
                .run(|| self.ctx.store.membership_for(organization, user))
                .await?;

            let outcome = match existing {
                Some(row) => match row.status {
                    MembershipStatus::Approved => return Err(GovernanceError::AlreadyMember),
                    MembershipStatus::Pending => return Err(GovernanceError::RequestPending),
                    MembershipStatus::Rejected => {
                        self.ctx
                            .run(|| {
                                self.ctx.store.transition_membership(
                                    row.id,
                                    MembershipStatus::Rejected,
                                    MembershipStatus::Pending,
                                )
                            })
                            .await?
                    }
                },
                None => {
                    self.ctx
                        .run(move || async move {
                            match self
                                .ctx
                                .store
                                .insert_membership(
                                    organization,
                                    user,
                                    MembershipStatus::Pending,
                                    Role::Member,
                                    now,
                                )
                                .await
                            {
                                Ok(row) => Ok(Some(row)),
                                // Lost a first-insert race; classify on the next round
                                Err(StoreError::UniqueViolation(_)) => Ok(None),
                                Err(e) => Err(e),
                            }
                        })
                        .await?
                }
            };

            if let Some(membership) = outcome {
                info!(
                    organization = %organization,
                    user = %user,
                    membership = %membership.id,
                    "membership requested"
                );
                return Ok(membership);
            }

            warn!(
                organization = %organization,
                user = %user,
                "membership row changed during join, re-reading"
            );
        }

        Err(GovernanceError::StorageUnavailable(format!(
            "membership for user {} in organization {} kept changing",
            user, organization
        )))
    }

    /// Approve, reject or remove a membership as the organization's owner.
    ///
    /// # Errors
    ///
    /// Checked in this order:
    /// - `NotFound(Organization)`
    /// - `Forbidden` unless `actor` owns the organization
    /// - `NotFound(Membership)` if the row is missing or belongs elsewhere
    /// - `SelfRemoval` when the owner targets their own row with remove
    /// - `InvalidTransition` when the row is not in the action's source state
    pub async fn decide(
        &self,
        actor: UserId,
        organization: OrganizationId,
        membership_id: MembershipId,
        action: MembershipAction,
    ) -> GovernanceResult<MembershipDecision> {
        require_organization(&self.ctx, organization).await?;
        require_owner(&self.ctx, organization, actor).await?;

        let target = self
            .ctx
            .run(|| self.ctx.store.membership(membership_id))
            .await?
            .filter(|m| m.organization_id == organization)
            .ok_or(GovernanceError::NotFound(Resource::Membership))?;

        if action == MembershipAction::Remove && target.user_id == actor {
            return Err(GovernanceError::SelfRemoval);
        }

        let from = source_status(action);
        if target.status != from || target.is_owner() {
            return Err(GovernanceError::InvalidTransition {
                from: target.status,
                action,
            });
        }

        let decision = match action {
            MembershipAction::Approve | MembershipAction::Reject => {
                let to = if action == MembershipAction::Approve {
                    MembershipStatus::Approved
                } else {
                    MembershipStatus::Rejected
                };
                self.ctx
                    .run(|| self.ctx.store.transition_membership(membership_id, from, to))
                    .await?
                    .map(|membership| MembershipDecision::Updated { membership })
            }
            MembershipAction::Remove => self
                .ctx
                .run(|| self.ctx.store.delete_membership(membership_id, from))
                .await?
                .then_some(MembershipDecision::Removed { membership_id }),
        };

        match decision {
            Some(decision) => {
                info!(
                    organization = %organization,
                    membership = %membership_id,
                    user = %target.user_id,
                    action = %action,
                    "membership decided"
                );
                Ok(decision)
            }
            None => {
                // Another decision committed between our read and the write
                warn!(
                    membership = %membership_id,
                    action = %action,
                    "membership decision lost a race"
                );
                let current = self
                    .ctx
                    .run(|| self.ctx.store.membership(membership_id))
                    .await?
                    .ok_or(GovernanceError::NotFound(Resource::Membership))?;
                Err(GovernanceError::InvalidTransition {
                    from: current.status,
                    action,
                })
            }
        }
    }

    /// Every membership row of an organization, most recent first. Owner only.
    pub async fn list(
        &self,
        actor: UserId,
        organization: OrganizationId,
    ) -> GovernanceResult<Vec<Membership>> {
        require_organization(&self.ctx, organization).await?;
        require_owner(&self.ctx, organization, actor).await?;

        let rows = self
            .ctx
            .run(|| self.ctx.store.memberships(organization))
            .await?;
        debug!(organization = %organization, count = rows.len(), "listed memberships");
        Ok(rows)
    }
}

fn source_status(action: MembershipAction) -> MembershipStatus {
    match action {
        MembershipAction::Approve | MembershipAction::Reject => MembershipStatus::Pending,
        MembershipAction::Remove => MembershipStatus::Approved,
    }
}

pub(crate) async fn require_organization<S: GovernanceStore + ?Sized>(
    ctx: &Context<S>,
    organization: OrganizationId,
) -> GovernanceResult<crate::types::Organization> {
    ctx.run(|| ctx.store.organization(organization))
        .await?
        .ok_or(GovernanceError::NotFound(Resource::Organization))
}

/// The caller's row, if it is `approved`.
pub(crate) async fn require_approved<S: GovernanceStore + ?Sized>(
    ctx: &Context<S>,
    organization: OrganizationId,
    user: UserId,
) -> GovernanceResult<Membership> {
    ctx.run(|| ctx.store.membership_for(organization, user))
        .await?
        .filter(Membership::is_approved)
        .ok_or_else(|| GovernanceError::forbidden("approved membership required"))
}

pub(crate) async fn require_owner<S: GovernanceStore + ?Sized>(
    ctx: &Context<S>,
    organization: OrganizationId,
    user: UserId,
) -> GovernanceResult<Membership> {
    ctx.run(|| ctx.store.membership_for(organization, user))
        .await?
        .filter(|m| m.is_owner() && m.is_approved())
        .ok_or_else(|| GovernanceError::forbidden("organization owner required"))
}
