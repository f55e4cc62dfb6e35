//! SQLite governance store over `sqlx`.
//!
//! Every guarded mutation is a single statement (or a transaction whose first
//! statement is the guarded write), so SQLite's write lock serializes the
//! guard with the state it commits on. Busy/locked errors surface as
//! [`StoreError::Conflict`] and are retried by the engines.

use super::{GovernanceStore, StoreError, StoreResult};
use crate::proposal::tally::{Finalization, QuorumRule};
use crate::types::*;
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// How long a connection waits on a locked database before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS organizations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        mission TEXT NOT NULL DEFAULT '',
        rules TEXT NOT NULL DEFAULT '',
        owner_id INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS memberships (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        organization_id INTEGER NOT NULL REFERENCES organizations(id),
        user_id INTEGER NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('pending', 'approved', 'rejected')),
        role TEXT NOT NULL CHECK (role IN ('owner', 'member')),
        joined_at INTEGER NOT NULL,
        UNIQUE (organization_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS proposals (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        organization_id INTEGER NOT NULL REFERENCES organizations(id),
        creator_id INTEGER NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        deadline INTEGER NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('active', 'approved', 'rejected', 'quorum_not_met')),
        created_at INTEGER NOT NULL,
        finalized_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS votes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        proposal_id INTEGER NOT NULL REFERENCES proposals(id),
        user_id INTEGER NOT NULL,
        choice TEXT NOT NULL CHECK (choice IN ('yes', 'no', 'abstain')),
        voted_at INTEGER NOT NULL,
        UNIQUE (proposal_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS treasuries (
        organization_id INTEGER PRIMARY KEY REFERENCES organizations(id),
        balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
        currency TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS treasury_transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        organization_id INTEGER NOT NULL REFERENCES organizations(id),
        amount INTEGER NOT NULL,
        kind TEXT NOT NULL CHECK (kind IN ('deposit', 'withdrawal', 'proposal_expense')),
        description TEXT NOT NULL DEFAULT '',
        actor_id INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_memberships_org_status
        ON memberships (organization_id, status)
    "#,
    "CREATE INDEX IF NOT EXISTS idx_proposals_org ON proposals (organization_id)",
    r#"
    CREATE INDEX IF NOT EXISTS idx_transactions_org
        ON treasury_transactions (organization_id, id)
    "#,
];

const MEMBERSHIP_COLUMNS: &str = "id, organization_id, user_id, status, role, joined_at";
const PROPOSAL_COLUMNS: &str =
    "id, organization_id, creator_id, title, description, deadline, status, created_at, finalized_at";
const TRANSACTION_COLUMNS: &str =
    "id, organization_id, amount, kind, description, actor_id, created_at";

/// SQLite-backed governance store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect using a `sqlite:` URL, creating the database file if missing.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Unavailable(format!("invalid sqlite url '{}': {}", url, e)))?;
        Self::connect_with(with_defaults(options), max_connections).await
    }

    /// Open (or create) a database file.
    pub async fn open(path: &Path, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new().filename(path);
        Self::connect_with(with_defaults(options), max_connections).await
    }

    /// Private in-memory database on a single long-lived connection.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        Ok(Self { pool })
    }

    async fn connect_with(
        options: SqliteConnectOptions,
        max_connections: u32,
    ) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        debug!(max_connections = max_connections.max(1), "sqlite pool connected");
        Ok(Self { pool })
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;

        info!(tables = 6, "sqlite schema ready");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn with_defaults(options: SqliteConnectOptions) -> SqliteConnectOptions {
    options
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true)
}

/// Classify a driver error.
///
/// SQLite reports lock contention as SQLITE_BUSY (5) or SQLITE_LOCKED (6),
/// possibly extended (e.g. 517 BUSY_SNAPSHOT); the primary code is the low
/// byte.
fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::UniqueViolation(db.message().to_string())
        }
        sqlx::Error::Database(db) if is_busy_code(db.code().as_deref()) => {
            StoreError::Conflict(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut => StoreError::Conflict(err.to_string()),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_) => StoreError::Corrupt(err.to_string()),
        _ => StoreError::Unavailable(err.to_string()),
    }
}

fn is_busy_code(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i64>().ok())
        .is_some_and(|c| matches!(c & 0xff, 5 | 6))
}

// ============================================================================
// Row decoding
// ============================================================================

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("decode {} failed: {}", name, e)))
}

fn tag<T>(row: &SqliteRow, name: &str) -> StoreResult<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: String = column(row, name)?;
    raw.parse()
        .map_err(|e: UnknownVariant| StoreError::Corrupt(e.to_string()))
}

fn count(value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative count {}", value)))
}

fn decode_organization(row: &SqliteRow) -> StoreResult<Organization> {
    Ok(Organization {
        id: OrganizationId(column(row, "id")?),
        name: column(row, "name")?,
        mission: column(row, "mission")?,
        rules: column(row, "rules")?,
        owner_id: UserId(column(row, "owner_id")?),
        created_at: column(row, "created_at")?,
    })
}

fn decode_membership(row: &SqliteRow) -> StoreResult<Membership> {
    Ok(Membership {
        id: MembershipId(column(row, "id")?),
        organization_id: OrganizationId(column(row, "organization_id")?),
        user_id: UserId(column(row, "user_id")?),
        status: tag(row, "status")?,
        role: tag(row, "role")?,
        joined_at: column(row, "joined_at")?,
    })
}

fn decode_proposal(row: &SqliteRow) -> StoreResult<Proposal> {
    Ok(Proposal {
        id: ProposalId(column(row, "id")?),
        organization_id: OrganizationId(column(row, "organization_id")?),
        creator_id: UserId(column(row, "creator_id")?),
        title: column(row, "title")?,
        description: column(row, "description")?,
        deadline: column(row, "deadline")?,
        status: tag(row, "status")?,
        created_at: column(row, "created_at")?,
        finalized_at: column(row, "finalized_at")?,
    })
}

fn decode_vote(row: &SqliteRow) -> StoreResult<Vote> {
    Ok(Vote {
        id: VoteId(column(row, "id")?),
        proposal_id: ProposalId(column(row, "proposal_id")?),
        user_id: UserId(column(row, "user_id")?),
        choice: tag(row, "choice")?,
        voted_at: column(row, "voted_at")?,
    })
}

fn decode_treasury(row: &SqliteRow) -> StoreResult<Treasury> {
    Ok(Treasury {
        organization_id: OrganizationId(column(row, "organization_id")?),
        balance: Amount::from_minor_units(column(row, "balance")?),
        currency: column(row, "currency")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn decode_transaction(row: &SqliteRow) -> StoreResult<TreasuryTransaction> {
    Ok(TreasuryTransaction {
        id: TransactionId(column(row, "id")?),
        organization_id: OrganizationId(column(row, "organization_id")?),
        amount: Amount::from_minor_units(column(row, "amount")?),
        kind: tag(row, "kind")?,
        description: column(row, "description")?,
        actor_id: UserId(column(row, "actor_id")?),
        created_at: column(row, "created_at")?,
    })
}

#[async_trait]
impl GovernanceStore for SqliteStore {
    async fn create_organization(
        &self,
        draft: NewOrganization,
        now: Timestamp,
    ) -> StoreResult<Organization> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let row = sqlx::query(
            r#"
            INSERT INTO organizations (name, mission, rules, owner_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING id, name, mission, rules, owner_id, created_at
            "#,
        )
        .bind(&draft.name)
        .bind(&draft.mission)
        .bind(&draft.rules)
        .bind(draft.owner_id.get())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let organization = decode_organization(&row)?;

        sqlx::query(
            r#"
            INSERT INTO memberships (organization_id, user_id, status, role, joined_at)
            VALUES (?1, ?2, 'approved', 'owner', ?3)
            "#,
        )
        .bind(organization.id.get())
        .bind(draft.owner_id.get())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO treasuries (organization_id, balance, currency, updated_at)
            VALUES (?1, 0, ?2, ?3)
            "#,
        )
        .bind(organization.id.get())
        .bind(&draft.currency)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(organization)
    }

    async fn organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, mission, rules, owner_id, created_at
            FROM organizations WHERE id = ?1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(decode_organization).transpose()
    }

    async fn organizations(&self) -> StoreResult<Vec<Organization>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, mission, rules, owner_id, created_at
            FROM organizations ORDER BY id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(decode_organization).collect()
    }

    async fn membership(&self, id: MembershipId) -> StoreResult<Option<Membership>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM memberships WHERE id = ?1",
            MEMBERSHIP_COLUMNS
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(decode_membership).transpose()
    }

    async fn membership_for(
        &self,
        organization: OrganizationId,
        user: UserId,
    ) -> StoreResult<Option<Membership>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM memberships WHERE organization_id = ?1 AND user_id = ?2",
            MEMBERSHIP_COLUMNS
        ))
        .bind(organization.get())
        .bind(user.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(decode_membership).transpose()
    }

    async fn memberships(&self, organization: OrganizationId) -> StoreResult<Vec<Membership>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM memberships WHERE organization_id = ?1 ORDER BY id DESC",
            MEMBERSHIP_COLUMNS
        ))
        .bind(organization.get())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(decode_membership).collect()
    }

    async fn count_approved_members(&self, organization: OrganizationId) -> StoreResult<u64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM memberships WHERE organization_id = ?1 AND status = 'approved'",
        )
        .bind(organization.get())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        count(n)
    }

    async fn insert_membership(
        &self,
        organization: OrganizationId,
        user: UserId,
        status: MembershipStatus,
        role: Role,
        now: Timestamp,
    ) -> StoreResult<Membership> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO memberships (organization_id, user_id, status, role, joined_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING {}
            "#,
            MEMBERSHIP_COLUMNS
        ))
        .bind(organization.get())
        .bind(user.get())
        .bind(status.as_str())
        .bind(role.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        decode_membership(&row)
    }

    async fn transition_membership(
        &self,
        id: MembershipId,
        from: MembershipStatus,
        to: MembershipStatus,
    ) -> StoreResult<Option<Membership>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE memberships SET status = ?3
            WHERE id = ?1 AND status = ?2 AND role = 'member'
            RETURNING {}
            "#,
            MEMBERSHIP_COLUMNS
        ))
        .bind(id.get())
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(decode_membership).transpose()
    }

    async fn delete_membership(
        &self,
        id: MembershipId,
        expected: MembershipStatus,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM memberships WHERE id = ?1 AND status = ?2 AND role = 'member'",
        )
        .bind(id.get())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_proposal(&self, draft: NewProposal, now: Timestamp) -> StoreResult<Proposal> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO proposals
                (organization_id, creator_id, title, description, deadline, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6)
            RETURNING {}
            "#,
            PROPOSAL_COLUMNS
        ))
        .bind(draft.organization_id.get())
        .bind(draft.creator_id.get())
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(draft.deadline)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        decode_proposal(&row)
    }

    async fn proposal(&self, id: ProposalId) -> StoreResult<Option<Proposal>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM proposals WHERE id = ?1",
            PROPOSAL_COLUMNS
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(decode_proposal).transpose()
    }

    async fn proposals(&self, organization: OrganizationId) -> StoreResult<Vec<Proposal>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM proposals WHERE organization_id = ?1 ORDER BY id DESC",
            PROPOSAL_COLUMNS
        ))
        .bind(organization.get())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(decode_proposal).collect()
    }

    async fn votes(&self, proposal: ProposalId) -> StoreResult<Vec<Vote>> {
        let rows = sqlx::query(
            r#"
            SELECT id, proposal_id, user_id, choice, voted_at
            FROM votes WHERE proposal_id = ?1 ORDER BY id
            "#,
        )
        .bind(proposal.get())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(decode_vote).collect()
    }

    async fn upsert_vote(
        &self,
        proposal: ProposalId,
        user: UserId,
        choice: VoteChoice,
        now: Timestamp,
    ) -> StoreResult<Option<Vote>> {
        // The guard and the write are one statement; SQLite holds the write
        // lock across both.
        let row = sqlx::query(
            r#"
            INSERT INTO votes (proposal_id, user_id, choice, voted_at)
            SELECT ?1, ?2, ?3, ?4
            WHERE EXISTS (
                SELECT 1 FROM proposals p
                WHERE p.id = ?1 AND p.status = 'active' AND p.deadline > ?4
            )
            AND EXISTS (
                SELECT 1 FROM memberships m
                JOIN proposals p ON p.organization_id = m.organization_id
                WHERE p.id = ?1 AND m.user_id = ?2 AND m.status = 'approved'
            )
            ON CONFLICT (proposal_id, user_id)
            DO UPDATE SET choice = excluded.choice, voted_at = excluded.voted_at
            RETURNING id, proposal_id, user_id, choice, voted_at
            "#,
        )
        .bind(proposal.get())
        .bind(user.get())
        .bind(choice.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(decode_vote).transpose()
    }

    async fn finalize_proposal(
        &self,
        proposal: ProposalId,
        now: Timestamp,
        rule: QuorumRule,
    ) -> StoreResult<Option<Finalization>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Claim first: the no-op write takes the database write lock, so the
        // counts below cannot move until commit.
        let claimed: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE proposals SET status = status
            WHERE id = ?1 AND status = 'active' AND deadline <= ?2
            RETURNING organization_id
            "#,
        )
        .bind(proposal.get())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let Some(organization) = claimed else {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(None);
        };

        let rows = sqlx::query(
            "SELECT choice, COUNT(*) AS n FROM votes WHERE proposal_id = ?1 GROUP BY choice",
        )
        .bind(proposal.get())
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let mut tally = VoteTally::default();
        for row in &rows {
            let choice: VoteChoice = tag(row, "choice")?;
            let n = count(column(row, "n")?)?;
            match choice {
                VoteChoice::Yes => tally.yes = n,
                VoteChoice::No => tally.no = n,
                VoteChoice::Abstain => tally.abstain = n,
            }
        }

        let members: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM memberships WHERE organization_id = ?1 AND status = 'approved'",
        )
        .bind(organization)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let total_members = count(members)?;

        let decision = rule.decide(&tally, total_members);

        let row = sqlx::query(&format!(
            r#"
            UPDATE proposals SET status = ?2, finalized_at = ?3
            WHERE id = ?1
            RETURNING {}
            "#,
            PROPOSAL_COLUMNS
        ))
        .bind(proposal.get())
        .bind(decision.status.as_str())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let stored = decode_proposal(&row)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(Some(Finalization {
            proposal: stored,
            tally,
            total_members,
            quorum_required: decision.quorum_required,
            quorum_met: decision.quorum_met,
        }))
    }

    async fn treasury(&self, organization: OrganizationId) -> StoreResult<Option<Treasury>> {
        let row = sqlx::query(
            r#"
            SELECT organization_id, balance, currency, updated_at
            FROM treasuries WHERE organization_id = ?1
            "#,
        )
        .bind(organization.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(decode_treasury).transpose()
    }

    async fn apply_treasury_entry(
        &self,
        entry: NewTransaction,
    ) -> StoreResult<Option<(Treasury, TreasuryTransaction)>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let row = sqlx::query(
            r#"
            UPDATE treasuries
            SET balance = balance + ?2, updated_at = ?3
            WHERE organization_id = ?1
              AND balance + ?2 >= 0
              AND (?2 <= 0 OR balance <= 9223372036854775807 - ?2)
            RETURNING organization_id, balance, currency, updated_at
            "#,
        )
        .bind(entry.organization_id.get())
        .bind(entry.amount.minor_units())
        .bind(entry.created_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(None);
        };
        let treasury = decode_treasury(&row)?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO treasury_transactions
                (organization_id, amount, kind, description, actor_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(entry.organization_id.get())
        .bind(entry.amount.minor_units())
        .bind(entry.kind.as_str())
        .bind(&entry.description)
        .bind(entry.actor_id.get())
        .bind(entry.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let transaction = decode_transaction(&row)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(Some((treasury, transaction)))
    }

    async fn transactions(
        &self,
        organization: OrganizationId,
        limit: usize,
    ) -> StoreResult<Vec<TreasuryTransaction>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM treasury_transactions
            WHERE organization_id = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(organization.get())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(decode_transaction).collect()
    }

    async fn ledger_sum(&self, organization: OrganizationId) -> StoreResult<Amount> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM treasury_transactions WHERE organization_id = ?1",
        )
        .bind(organization.get())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(Amount::from_minor_units(sum))
    }
}
