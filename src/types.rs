//! Domain model for organizations, memberships, proposals, votes and the
//! treasury ledger.
//!
//! Every tagged field (membership status, vote choice, transaction kind, ...)
//! is a closed enum. Storage backends persist them through `as_str` and parse
//! them back with `FromStr`, so an unknown tag surfaces as an error instead of
//! falling through unhandled.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unix timestamp in seconds.
pub type Timestamp = i64;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Raw row identifier.
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// Authenticated user, as reported by the external identity layer.
    UserId
);
id_type!(
    /// Organization (DAO) identity.
    OrganizationId
);
id_type!(MembershipId);
id_type!(ProposalId);
id_type!(VoteId);
id_type!(TransactionId);

/// Error returned when a stored or user-supplied tag does not name a variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Storage and wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $label,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(
    /// Admission state of a membership row.
    MembershipStatus, "membership status", {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
);

string_enum!(
    /// Role within an organization.
    Role, "role", {
        Owner => "owner",
        Member => "member",
    }
);

string_enum!(
    /// Owner decision on a membership row.
    MembershipAction, "membership action", {
        Approve => "approve",
        Reject => "reject",
        Remove => "remove",
    }
);

string_enum!(
    /// Proposal lifecycle state. `Active` is the only non-terminal state.
    ProposalStatus, "proposal status", {
        Active => "active",
        Approved => "approved",
        Rejected => "rejected",
        QuorumNotMet => "quorum_not_met",
    }
);

string_enum!(
    /// Ballot choice.
    VoteChoice, "vote choice", {
        Yes => "yes",
        No => "no",
        Abstain => "abstain",
    }
);

string_enum!(
    /// Treasury ledger entry kind.
    TransactionKind, "transaction kind", {
        Deposit => "deposit",
        Withdrawal => "withdrawal",
        ProposalExpense => "proposal_expense",
    }
);

impl ProposalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProposalStatus::Active)
    }
}

impl TransactionKind {
    /// Whether entries of this kind decrease the balance.
    pub fn is_debit(&self) -> bool {
        match self {
            TransactionKind::Deposit => false,
            TransactionKind::Withdrawal | TransactionKind::ProposalExpense => true,
        }
    }
}

// ============================================================================
// Money
// ============================================================================

/// Number of fractional digits carried by [`Amount`].
pub const AMOUNT_SCALE: u32 = 2;

const MINOR_PER_UNIT: i64 = 10i64.pow(AMOUNT_SCALE);

/// Amount parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("amount '{0}' is not a decimal number")]
    Malformed(String),

    #[error("amount '{0}' has more than two fractional digits")]
    TooPrecise(String),

    #[error("amount '{0}' is out of range")]
    Overflow(String),
}

/// Signed fixed-point money value with two fractional digits.
///
/// Stored as integer minor units (cents for a two-digit currency), so sums
/// and comparisons never lose precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_minor_units(minor: i64) -> Self {
        Self(minor)
    }

    /// Whole units, e.g. `Amount::from_units(100)` is `100.00`.
    pub fn from_units(units: i64) -> Option<Self> {
        units.checked_mul(MINOR_PER_UNIT).map(Self)
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn checked_neg(self) -> Option<Amount> {
        self.0.checked_neg().map(Amount)
    }

    pub fn abs(self) -> Amount {
        Amount(self.0.saturating_abs())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        let per_unit = MINOR_PER_UNIT as u64;
        write!(
            f,
            "{}{}.{:0width$}",
            sign,
            magnitude / per_unit,
            magnitude % per_unit,
            width = AMOUNT_SCALE as usize
        )
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    /// Parse `"100"`, `"-3"`, `"12.5"` or `"12.50"`. Exponents, separators and
    /// a leading `+` are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AmountError::Empty);
        }

        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (whole, fraction) = match digits.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (digits, ""),
        };

        let all_digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if whole.is_empty() || !all_digits(whole) || !all_digits(fraction) {
            return Err(AmountError::Malformed(s.to_string()));
        }
        if digits.ends_with('.') {
            return Err(AmountError::Malformed(s.to_string()));
        }
        if fraction.len() > AMOUNT_SCALE as usize {
            return Err(AmountError::TooPrecise(s.to_string()));
        }

        let overflow = || AmountError::Overflow(s.to_string());

        let whole: i64 = whole.parse().map_err(|_| overflow())?;
        let mut minor_fraction: i64 = if fraction.is_empty() {
            0
        } else {
            fraction.parse().map_err(|_| overflow())?
        };
        for _ in fraction.len()..AMOUNT_SCALE as usize {
            minor_fraction *= 10;
        }

        let minor = whole
            .checked_mul(MINOR_PER_UNIT)
            .and_then(|m| m.checked_add(minor_fraction))
            .ok_or_else(overflow)?;

        Ok(Amount(if negative { -minor } else { minor }))
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.to_string()
    }
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub mission: String,
    pub rules: String,
    pub owner_id: UserId,
    pub created_at: Timestamp,
}

/// Validated input for creating an organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrganization {
    pub name: String,
    pub mission: String,
    pub rules: String,
    pub owner_id: UserId,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: MembershipId,
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub status: MembershipStatus,
    pub role: Role,
    pub joined_at: Timestamp,
}

impl Membership {
    pub fn is_approved(&self) -> bool {
        self.status == MembershipStatus::Approved
    }

    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub organization_id: OrganizationId,
    pub creator_id: UserId,
    pub title: String,
    pub description: String,
    pub deadline: Timestamp,
    pub status: ProposalStatus,
    pub created_at: Timestamp,
    pub finalized_at: Option<Timestamp>,
}

/// Validated input for creating a proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProposal {
    pub organization_id: OrganizationId,
    pub creator_id: UserId,
    pub title: String,
    pub description: String,
    pub deadline: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub proposal_id: ProposalId,
    pub user_id: UserId,
    pub choice: VoteChoice,
    pub voted_at: Timestamp,
}

/// Per-choice vote counts for a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoteTally {
    pub yes: u64,
    pub no: u64,
    pub abstain: u64,
}

impl VoteTally {
    pub fn total(&self) -> u64 {
        self.yes + self.no + self.abstain
    }

    pub fn record(&mut self, choice: VoteChoice) {
        match choice {
            VoteChoice::Yes => self.yes += 1,
            VoteChoice::No => self.no += 1,
            VoteChoice::Abstain => self.abstain += 1,
        }
    }

    pub fn from_votes<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> Self {
        let mut tally = Self::default();
        for vote in votes {
            tally.record(vote.choice);
        }
        tally
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Treasury {
    pub organization_id: OrganizationId,
    pub balance: Amount,
    pub currency: String,
    pub updated_at: Timestamp,
}

/// Immutable ledger entry. `amount` is signed: positive for deposits,
/// negative for withdrawals and proposal expenses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryTransaction {
    pub id: TransactionId,
    pub organization_id: OrganizationId,
    pub amount: Amount,
    pub kind: TransactionKind,
    pub description: String,
    pub actor_id: UserId,
    pub created_at: Timestamp,
}

/// Ledger entry to append. `amount` is already signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub organization_id: OrganizationId,
    pub amount: Amount,
    pub kind: TransactionKind,
    pub description: String,
    pub actor_id: UserId,
    pub created_at: Timestamp,
}
