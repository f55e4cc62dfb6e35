//! Agora - DAO Governance and Ledger Engine
//!
//! Membership admission, proposal voting with quorum-based finalization, and
//! a treasury kept as an append-only ledger of signed entries.
//!
//! Key principles:
//! - Every operation re-reads authoritative state from the store
//! - Guarded writes, never read-then-write, for balances, votes and finalization
//! - Domain failures are typed errors returned to the caller
//! - Storage conflicts are retried a bounded number of times
//!
//! Entry point: [`Governance`], built over any [`GovernanceStore`].

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod governance;
pub mod membership;
pub mod proposal;
pub mod retry;
pub mod store;
pub mod treasury;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AgoraConfig;
pub use error::{ErrorKind, GovernanceError, GovernanceResult, Resource};
pub use governance::{Caller, Governance, GovernanceSettings};
pub use store::{open_store, GovernanceStore, MemoryStore, SqliteStore, StoreError};
pub use types::*;
