//! Treasury ledger.
//!
//! Each organization has one balance and an append-only list of signed
//! entries. A [`TreasuryLedger::record`] call hands the store a single guarded
//! entry: the balance moves and the entry is appended together, and only if
//! the result stays non-negative. There is no read-then-write window for two
//! concurrent withdrawals to share.
//!
//! Invariant (checked by [`TreasuryLedger::audit`]):
//! `balance == sum(entry.amount)` for every organization.

use crate::config::MAX_TRANSACTION_PAGE_SIZE;
use crate::context::Context;
use crate::error::{GovernanceError, GovernanceResult, Resource};
use crate::membership::{require_organization, require_owner};
use crate::store::GovernanceStore;
use crate::types::{
    Amount, NewTransaction, OrganizationId, TransactionKind, Treasury, TreasuryTransaction, UserId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Longest accepted entry description, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 500;

/// Balance after a recorded entry, with the entry itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryReceipt {
    pub treasury: Treasury,
    pub transaction: TreasuryTransaction,
}

/// Result of comparing the stored balance with the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAudit {
    pub organization_id: OrganizationId,
    pub balance: Amount,
    pub ledger_sum: Amount,
    pub consistent: bool,
}

pub struct TreasuryLedger<S: GovernanceStore + ?Sized> {
    ctx: Context<S>,
    page_size: usize,
}

impl<S: GovernanceStore + ?Sized> TreasuryLedger<S> {
    /// `page_size` is the listing length used when no limit is given.
    pub fn new(ctx: Context<S>, page_size: usize) -> Self {
        Self {
            ctx,
            page_size: page_size.clamp(1, MAX_TRANSACTION_PAGE_SIZE),
        }
    }

    /// Apply a deposit, withdrawal or proposal expense. Owner only.
    ///
    /// `amount` is the positive magnitude; debits are stored negated.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the organization does not exist
    /// - `Forbidden` unless `actor` owns the organization
    /// - `InvalidInput` for a non-positive amount or an overlong description
    /// - `InsufficientFunds` if a debit would take the balance below zero;
    ///   nothing is written in that case
    pub async fn record(
        &self,
        actor: UserId,
        organization: OrganizationId,
        kind: TransactionKind,
        amount: Amount,
        description: &str,
    ) -> GovernanceResult<TreasuryReceipt> {
        require_organization(&self.ctx, organization).await?;
        require_owner(&self.ctx, organization, actor).await?;

        if !amount.is_positive() {
            return Err(GovernanceError::invalid("amount must be greater than zero"));
        }

        let description = description.trim();
        if description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(GovernanceError::invalid(format!(
                "description must be at most {} characters",
                MAX_DESCRIPTION_CHARS
            )));
        }

        let signed = if kind.is_debit() {
            amount
                .checked_neg()
                .ok_or_else(|| GovernanceError::invalid("amount out of range"))?
        } else {
            amount
        };

        let entry = NewTransaction {
            organization_id: organization,
            amount: signed,
            kind,
            description: description.to_string(),
            actor_id: actor,
            created_at: self.ctx.now(),
        };

        let applied = self
            .ctx
            .run(|| self.ctx.store.apply_treasury_entry(entry.clone()))
            .await?;

        match applied {
            Some((treasury, transaction)) => {
                info!(
                    organization = %organization,
                    transaction = %transaction.id,
                    kind = %kind,
                    amount = %signed,
                    balance = %treasury.balance,
                    "treasury entry recorded"
                );
                Ok(TreasuryReceipt {
                    treasury,
                    transaction,
                })
            }
            None => {
                let treasury = self.balance(organization).await?;
                if kind.is_debit() {
                    warn!(
                        organization = %organization,
                        available = %treasury.balance,
                        requested = %amount,
                        "treasury debit refused"
                    );
                    Err(GovernanceError::InsufficientFunds {
                        available: treasury.balance,
                        requested: amount,
                    })
                } else {
                    Err(GovernanceError::invalid("deposit overflows the balance"))
                }
            }
        }
    }

    /// Current balance and currency.
    pub async fn balance(&self, organization: OrganizationId) -> GovernanceResult<Treasury> {
        let treasury = self
            .ctx
            .run(|| self.ctx.store.treasury(organization))
            .await?;

        match treasury {
            Some(treasury) => Ok(treasury),
            None => {
                require_organization(&self.ctx, organization).await?;
                Err(GovernanceError::NotFound(Resource::Treasury))
            }
        }
    }

    /// Ledger entries, most recent first.
    ///
    /// `limit` defaults to the configured page size and is capped at 500.
    pub async fn list_transactions(
        &self,
        organization: OrganizationId,
        limit: Option<usize>,
    ) -> GovernanceResult<Vec<TreasuryTransaction>> {
        let limit = match limit {
            Some(0) => return Err(GovernanceError::invalid("limit must be at least 1")),
            Some(limit) => limit.min(MAX_TRANSACTION_PAGE_SIZE),
            None => self.page_size,
        };

        require_organization(&self.ctx, organization).await?;
        let entries = self
            .ctx
            .run(|| self.ctx.store.transactions(organization, limit))
            .await?;

        debug!(organization = %organization, count = entries.len(), limit, "listed transactions");
        Ok(entries)
    }

    /// Recompute the ledger sum and compare it with the stored balance.
    pub async fn audit(&self, organization: OrganizationId) -> GovernanceResult<LedgerAudit> {
        let treasury = self.balance(organization).await?;
        let ledger_sum = self
            .ctx
            .run(|| self.ctx.store.ledger_sum(organization))
            .await?;

        let audit = LedgerAudit {
            organization_id: organization,
            balance: treasury.balance,
            ledger_sum,
            consistent: treasury.balance == ledger_sum,
        };

        if !audit.consistent {
            warn!(
                organization = %organization,
                balance = %audit.balance,
                ledger_sum = %audit.ledger_sum,
                "treasury balance does not match ledger"
            );
        }
        Ok(audit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::NewOrganization;
    use proptest::prelude::*;
    use std::sync::Arc;

    const OWNER: UserId = UserId(1);

    fn amount(s: &str) -> Amount {
        s.parse().unwrap()
    }

    async fn setup() -> (Arc<MemoryStore>, TreasuryLedger<MemoryStore>, OrganizationId) {
        let store = Arc::new(MemoryStore::new());
        let org = store
            .create_organization(
                NewOrganization {
                    name: "Food Bank".to_string(),
                    mission: String::new(),
                    rules: String::new(),
                    owner_id: OWNER,
                    currency: "USD".to_string(),
                },
                0,
            )
            .await
            .unwrap()
            .id;
        let ledger = TreasuryLedger::new(Context::new(store.clone()), 50);
        (store, ledger, org)
    }

    #[tokio::test]
    async fn test_deposit_then_withdraw() {
        let (_, ledger, org) = setup().await;

        let receipt = ledger
            .record(OWNER, org, TransactionKind::Deposit, amount("100"), "seed")
            .await
            .unwrap();
        assert_eq!(receipt.treasury.balance, amount("100"));
        assert_eq!(receipt.transaction.amount, amount("100"));

        let receipt = ledger
            .record(OWNER, org, TransactionKind::Withdrawal, amount("60.25"), "rent")
            .await
            .unwrap();
        assert_eq!(receipt.treasury.balance, amount("39.75"));
        assert_eq!(receipt.transaction.amount, amount("-60.25"));
    }

    #[tokio::test]
    async fn test_overdraw_is_refused_without_side_effects() {
        let (_, ledger, org) = setup().await;
        ledger
            .record(OWNER, org, TransactionKind::Deposit, amount("100"), "")
            .await
            .unwrap();

        let err = ledger
            .record(OWNER, org, TransactionKind::ProposalExpense, amount("100.01"), "")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GovernanceError::InsufficientFunds {
                available: amount("100"),
                requested: amount("100.01"),
            }
        );

        assert_eq!(ledger.list_transactions(org, None).await.unwrap().len(), 1);
        assert!(ledger.audit(org).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn test_only_owner_records() {
        let (_, ledger, org) = setup().await;
        let err = ledger
            .record(UserId(2), org, TransactionKind::Deposit, amount("5"), "")
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected() {
        let (_, ledger, org) = setup().await;
        for bad in ["0", "-5"] {
            let err = ledger
                .record(OWNER, org, TransactionKind::Deposit, amount(bad), "")
                .await
                .unwrap_err();
            assert!(matches!(err, GovernanceError::InvalidInput(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_listing_limits() {
        let (_, ledger, org) = setup().await;
        for i in 1..=3 {
            ledger
                .record(OWNER, org, TransactionKind::Deposit, Amount::from_units(i).unwrap(), "")
                .await
                .unwrap();
        }

        let listed = ledger.list_transactions(org, Some(2)).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].amount, amount("3"));

        assert!(matches!(
            ledger.list_transactions(org, Some(0)).await,
            Err(GovernanceError::InvalidInput(_))
        ));
        assert_eq!(
            ledger.list_transactions(OrganizationId(999), None).await,
            Err(GovernanceError::NotFound(Resource::Organization))
        );
    }

    #[tokio::test]
    async fn test_balance_of_unknown_org() {
        let (_, ledger, _) = setup().await;
        assert_eq!(
            ledger.balance(OrganizationId(999)).await,
            Err(GovernanceError::NotFound(Resource::Organization))
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Deposit(i64),
        Withdraw(i64),
        Expense(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..50_000).prop_map(Op::Deposit),
            (1i64..50_000).prop_map(Op::Withdraw),
            (1i64..50_000).prop_map(Op::Expense),
        ]
    }

    proptest! {
        /// Property: after any sequence of records the balance equals the
        /// ledger sum and never goes negative
        #[test]
        fn ledger_sum_matches_balance(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let (_, ledger, org) = setup().await;
                let mut expected = 0i64;

                for op in ops {
                    let (kind, minor) = match op {
                        Op::Deposit(m) => (TransactionKind::Deposit, m),
                        Op::Withdraw(m) => (TransactionKind::Withdrawal, m),
                        Op::Expense(m) => (TransactionKind::ProposalExpense, m),
                    };
                    let result = ledger
                        .record(OWNER, org, kind, Amount::from_minor_units(minor), "")
                        .await;

                    if kind.is_debit() && minor > expected {
                        prop_assert!(
                            matches!(result, Err(GovernanceError::InsufficientFunds { .. })),
                            "overdraw must be refused"
                        );
                    } else {
                        prop_assert!(result.is_ok());
                        expected += if kind.is_debit() { -minor } else { minor };
                    }
                }

                let audit = ledger.audit(org).await.unwrap();
                prop_assert!(audit.consistent);
                prop_assert_eq!(audit.balance.minor_units(), expected);
                prop_assert!(expected >= 0);
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
