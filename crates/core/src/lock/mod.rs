//! Process-wide lock manager.
//!
//! Stands in for row-level locks around the read-check-write units of the
//! ledger. Locks are keyed by resource, owned by a holder, and expire once
//! they are older than the manager's timeout, so a crashed holder never wedges
//! a resource for good.
//!
//! # Modules
//!
//! - `types` - Lock keys and status snapshots
//! - `clock` - Time source abstraction (system and manual clocks)
//! - `manager` - The lock table, guards and the background sweeper

pub mod clock;
pub mod manager;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::{Acquisition, LockGuard, LockManager, SweeperHandle};
pub use types::{ActiveLock, ConcurrencyStatus, LockInfo, LockKey};
