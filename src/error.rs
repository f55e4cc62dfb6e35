//! Governance error taxonomy.
//!
//! Every domain-rule violation is returned to the caller as a typed
//! [`GovernanceError`]; none are logged and swallowed. [`ErrorKind`] groups the
//! variants into the coarse classes an outer layer maps to responses.

use crate::store::StoreError;
use crate::types::{Amount, AmountError, MembershipAction, MembershipStatus, UnknownVariant};
use std::fmt;

/// Entity a lookup failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Organization,
    Membership,
    Proposal,
    Treasury,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Organization => "organization",
            Resource::Membership => "membership",
            Resource::Proposal => "proposal",
            Resource::Treasury => "treasury",
        };
        f.write_str(name)
    }
}

/// Coarse error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotAuthenticated,
    Forbidden,
    NotFound,
    InvalidInput,
    Conflict,
    InsufficientFunds,
    DeadlinePending,
    DeadlinePassed,
    StorageUnavailable,
}

/// Result type for governance operations.
pub type GovernanceResult<T> = Result<T, GovernanceError>;

/// Governance operation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GovernanceError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(Resource),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Already a member")]
    AlreadyMember,

    #[error("Membership request already pending")]
    RequestPending,

    #[error("Proposal already finalized")]
    AlreadyFinalized,

    #[error("Cannot remove yourself as owner")]
    SelfRemoval,

    #[error("Cannot {action} a membership that is {from}")]
    InvalidTransition {
        from: MembershipStatus,
        action: MembershipAction,
    },

    #[error("Insufficient treasury balance: available {available}, requested {requested}")]
    InsufficientFunds { available: Amount, requested: Amount },

    #[error("Voting deadline has not passed yet")]
    DeadlinePending,

    #[error("Voting deadline has passed")]
    DeadlinePassed,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl GovernanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAuthenticated => ErrorKind::NotAuthenticated,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::AlreadyMember
            | Self::RequestPending
            | Self::AlreadyFinalized
            | Self::SelfRemoval
            | Self::InvalidTransition { .. } => ErrorKind::Conflict,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::DeadlinePending => ErrorKind::DeadlinePending,
            Self::DeadlinePassed => ErrorKind::DeadlinePassed,
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
        }
    }

    pub(crate) fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }
}

impl From<StoreError> for GovernanceError {
    fn from(err: StoreError) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<UnknownVariant> for GovernanceError {
    fn from(err: UnknownVariant) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<AmountError> for GovernanceError {
    fn from(err: AmountError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}
