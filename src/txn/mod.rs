//! Transactions - snapshot-isolated BEGIN / COMMIT / ROLLBACK
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │  TransactionManager                              │
//! │  - Issues monotonic transaction and commit ids   │
//! │  - Serialized two-phase commit publication       │
//! ├──────────────────────────────────────────────────┤
//! │  TransactionContext                              │
//! │  - Fixed snapshot commit id per transaction      │
//! │  - Write set stamped at commit, reverted at      │
//! │    rollback                                      │
//! └──────────────────────────────────────────────────┘
//! ```
//! Write-write conflicts surface immediately as `WriteConflict` at the row
//! lock, never by blocking; the caller aborts and retries.

pub mod context;
pub mod manager;

pub use context::{TransactionContext, TransactionPhase, WriteRecord};
pub use manager::TransactionManager;
